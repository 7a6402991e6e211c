use async_trait::async_trait;
use model::{Address, LoyaltyEntry, LoyaltySummary, MessengerIdentity, NewAddress, User};
use repository::{LoyaltyRepository, RepositoryError, UsersRepository};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{ServiceError, not_found};

/// Entries returned with the loyalty summary.
const HISTORY_LIMIT: i64 = 50;
const DEFAULT_ADJUST_DESCRIPTION: &str = "Корректировка администратором";

/// # UserService
///
/// Messenger profiles, delivery addresses and the bonus ledger.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Finds the user behind a verified messenger identity, creating it on
    /// first sight.
    async fn resolve(&self, identity: &MessengerIdentity) -> Result<User, ServiceError>;

    /// Creates or refreshes the profile from the identity and returns it with
    /// saved addresses.
    async fn profile(&self, identity: &MessengerIdentity) -> Result<User, ServiceError>;

    async fn add_address(&self, user_id: i32, address: &NewAddress) -> Result<Address, ServiceError>;

    /// Current balance and the latest ledger entries.
    async fn loyalty(&self, user_id: i32) -> Result<LoyaltySummary, ServiceError>;

    /// Manual bonus correction by an operator. The balance never goes negative.
    async fn adjust_bonus(
        &self,
        user_id: i32,
        amount: i32,
        description: Option<&str>,
    ) -> Result<LoyaltyEntry, ServiceError>;
}

pub struct UserServiceImpl<U, L> {
    users: Arc<U>,
    loyalty: Arc<L>,
}

impl<U: UsersRepository, L: LoyaltyRepository> UserServiceImpl<U, L> {
    pub fn new(users: Arc<U>, loyalty: Arc<L>) -> Self {
        Self { users, loyalty }
    }
}

fn required(value: &str, field: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

#[async_trait]
impl<U: UsersRepository, L: LoyaltyRepository> UserService for UserServiceImpl<U, L> {
    async fn resolve(&self, identity: &MessengerIdentity) -> Result<User, ServiceError> {
        match self
            .users
            .find_by_platform(identity.platform, &identity.platform_id)
            .await?
        {
            Some(user) => Ok(user),
            None => self.profile(identity).await,
        }
    }

    #[instrument(skip(self, identity), fields(platform = %identity.platform))]
    async fn profile(&self, identity: &MessengerIdentity) -> Result<User, ServiceError> {
        let user = self.users.upsert_by_platform(identity).await?;
        // Upsert returns the bare row; reload to attach addresses.
        Ok(self.users.get_by_id(user.id).await?)
    }

    async fn add_address(&self, user_id: i32, address: &NewAddress) -> Result<Address, ServiceError> {
        required(&address.street, "street")?;
        required(&address.house, "house")?;
        let created = self
            .users
            .add_address(user_id, address)
            .await
            .map_err(not_found(format!("User #{user_id}")))?;
        info!(user_id, address_id = created.id, "Address added");
        Ok(created)
    }

    async fn loyalty(&self, user_id: i32) -> Result<LoyaltySummary, ServiceError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await
            .map_err(not_found(format!("User #{user_id}")))?;
        let history = self.loyalty.history(user_id, HISTORY_LIMIT).await?;
        Ok(LoyaltySummary {
            bonus_points: user.bonus_points,
            history,
        })
    }

    #[instrument(skip(self, description))]
    async fn adjust_bonus(
        &self,
        user_id: i32,
        amount: i32,
        description: Option<&str>,
    ) -> Result<LoyaltyEntry, ServiceError> {
        if amount == 0 {
            return Err(ServiceError::InvalidInput("amount must not be zero".into()));
        }
        let description = description
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ADJUST_DESCRIPTION);

        let entry = self
            .loyalty
            .adjust(user_id, amount, description)
            .await
            .map_err(|e| match e {
                RepositoryError::InsufficientBonus => {
                    ServiceError::InvalidInput("bonus balance cannot go negative".into())
                }
                RepositoryError::NotFound => ServiceError::NotFound(format!("User #{user_id}")),
                other => other.into(),
            })?;
        info!(user_id, amount, "Bonus balance adjusted");
        Ok(entry)
    }
}
