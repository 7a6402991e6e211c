//! # Data Repository Layer
//!
//! Repository traits and PostgreSQL implementations for users, catalog,
//! settings, orders and the loyalty ledger.
//!
//! Operations that move money or bonus points are exposed as single methods
//! ([`OrdersRepository::create`], [`OrdersRepository::confirm_payment`],
//! [`LoyaltyRepository::adjust`]) that run inside one database transaction:
//! a balance mutation and its ledger entry are always written together.

mod pg;

pub use pg::{
    PgCatalogRepository, PgLoyaltyRepository, PgOrdersRepository, PgSettingsRepository,
    PgUsersRepository,
};

use async_trait::async_trait;
use deadpool_postgres::PoolError;
use model::{
    Address, Bouquet, LoyaltyEntry, MessengerIdentity, NewAddress, NewOrder, Order, OrderStatus,
    Platform, User,
};
use std::collections::HashMap;
use thiserror::Error;

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A debit would take the bonus balance below zero.
    #[error("Insufficient bonus points")]
    InsufficientBonus,
    /// The row changed between the read and the conditional write.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A stored value could not be mapped onto the domain model.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result of a first-time payment confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub order_id: i32,
    pub user_id: i32,
    /// Points credited in the same transaction (0 when nothing was earned).
    pub bonus_credited: i32,
}

/// # UsersRepository
///
/// Users are keyed by exactly one messenger identity and carry the bonus balance.
#[async_trait]
pub trait UsersRepository: Send + Sync {
    /// Loads the user together with saved addresses.
    async fn get_by_id(&self, user_id: i32) -> Result<User, RepositoryError>;

    async fn find_by_platform(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, RepositoryError>;

    /// Creates the user on first sight, otherwise refreshes the profile names.
    async fn upsert_by_platform(&self, identity: &MessengerIdentity) -> Result<User, RepositoryError>;

    async fn add_address(&self, user_id: i32, address: &NewAddress) -> Result<Address, RepositoryError>;

    async fn get_address(&self, address_id: i32) -> Result<Option<Address>, RepositoryError>;

    /// Every populated messenger identity across all users.
    async fn list_identities(&self) -> Result<Vec<(Platform, String)>, RepositoryError>;
}

/// Read-only access to catalog prices.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_bouquet(&self, bouquet_id: i32) -> Result<Option<Bouquet>, RepositoryError>;
}

/// Read-only access to the key/value settings table.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>, RepositoryError>;
}

/// # OrdersRepository
///
/// Orders with their item snapshots and the payment-state transitions.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Inserts the order and its items and, when `bonus_used > 0`, debits the
    /// owner's balance with a matching `spend` ledger entry, all in one
    /// transaction. The debit is re-checked against the live balance and fails
    /// with [`RepositoryError::InsufficientBonus`] instead of going negative.
    async fn create(&self, order: &NewOrder) -> Result<Order, RepositoryError>;

    /// Full order with items and delivery address.
    async fn get_by_id(&self, order_id: i32) -> Result<Order, RepositoryError>;

    async fn list_by_user(&self, user_id: i32) -> Result<Vec<Order>, RepositoryError>;

    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError>;

    /// Compare-and-set on `status`; [`RepositoryError::Conflict`] when the
    /// stored status is no longer `from`.
    async fn update_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, RepositoryError>;

    async fn set_payment_id(&self, order_id: i32, payment_id: &str) -> Result<(), RepositoryError>;

    /// Marks the order paid (and confirmed when still `new`) and credits
    /// `bonus_earned` with an `earn` ledger entry, in one transaction.
    ///
    /// Returns `Ok(None)` when the order is already paid; only one concurrent
    /// caller can ever observe `Some`.
    async fn confirm_payment(
        &self,
        order_id: i32,
    ) -> Result<Option<PaymentConfirmation>, RepositoryError>;

    /// Marks a pending payment canceled. Returns whether anything changed.
    async fn cancel_payment(&self, order_id: i32) -> Result<bool, RepositoryError>;
}

/// # LoyaltyRepository
///
/// Append-only bonus ledger.
#[async_trait]
pub trait LoyaltyRepository: Send + Sync {
    /// Latest entries first.
    async fn history(&self, user_id: i32, limit: i64) -> Result<Vec<LoyaltyEntry>, RepositoryError>;

    /// Manual correction: balance change plus ledger entry in one transaction.
    async fn adjust(
        &self,
        user_id: i32,
        amount: i32,
        description: &str,
    ) -> Result<LoyaltyEntry, RepositoryError>;
}
