use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Address, MessengerIdentity, NewAddress, Platform, User};
use tokio_postgres::{Client, Row};

use crate::{RepositoryError, UsersRepository};

const USER_COLUMNS: &str =
    "id, telegram_id, max_id, first_name, last_name, username, phone, bonus_points, created_at";

const ADDRESS_COLUMNS: &str =
    "id, user_id, title, street, house, apartment, entrance, floor, comment, is_default";

/// Column holding the identity of the given platform.
fn identity_column(platform: Platform) -> &'static str {
    match platform {
        Platform::Telegram => "telegram_id",
        Platform::Max => "max_id",
    }
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        max_id: row.get("max_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        phone: row.get("phone"),
        bonus_points: row.get("bonus_points"),
        created_at: row.get("created_at"),
        addresses: Vec::new(),
    }
}

pub(crate) fn address_from_row(row: &Row) -> Address {
    Address {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        street: row.get("street"),
        house: row.get("house"),
        apartment: row.get("apartment"),
        entrance: row.get("entrance"),
        floor: row.get("floor"),
        comment: row.get("comment"),
        is_default: row.get("is_default"),
    }
}

async fn load_addresses(client: &Client, user: &mut User) -> Result<(), RepositoryError> {
    let query = format!(
        "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 ORDER BY is_default DESC, id"
    );
    let rows = client.query(&query, &[&user.id]).await?;
    user.addresses = rows.iter().map(address_from_row).collect();
    Ok(())
}

/// PostgreSQL implementation of the UsersRepository trait.
pub struct PgUsersRepository {
    pool: Pool,
}

impl PgUsersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsersRepository for PgUsersRepository {
    async fn get_by_id(&self, user_id: i32) -> Result<User, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = client
            .query_opt(&query, &[&user_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let mut user = user_from_row(&row);
        load_addresses(&client, &mut user).await?;
        Ok(user)
    }

    async fn find_by_platform(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1",
            identity_column(platform)
        );
        let row = client.query_opt(&query, &[&platform_id]).await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn upsert_by_platform(&self, identity: &MessengerIdentity) -> Result<User, RepositoryError> {
        let client = self.pool.get().await?;
        let column = identity_column(identity.platform);
        let query = format!(
            r#"
            INSERT INTO users ({column}, first_name, last_name, username)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ({column}) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                username = EXCLUDED.username
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = client
            .query_one(
                &query,
                &[
                    &identity.platform_id,
                    &identity.first_name,
                    &identity.last_name,
                    &identity.username,
                ],
            )
            .await?;
        let mut user = user_from_row(&row);
        load_addresses(&client, &mut user).await?;
        Ok(user)
    }

    async fn add_address(&self, user_id: i32, address: &NewAddress) -> Result<Address, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        if address.is_default {
            tx.execute(
                "UPDATE addresses SET is_default = FALSE WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        }

        let title = address.title.clone().unwrap_or_else(|| "Дом".to_string());
        let query = format!(
            r#"
            INSERT INTO addresses (user_id, title, street, house, apartment, entrance, floor, comment, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ADDRESS_COLUMNS}
            "#
        );
        let row = tx
            .query_one(
                &query,
                &[
                    &user_id,
                    &title,
                    &address.street,
                    &address.house,
                    &address.apartment,
                    &address.entrance,
                    &address.floor,
                    &address.comment,
                    &address.is_default,
                ],
            )
            .await?;
        tx.commit().await?;
        Ok(address_from_row(&row))
    }

    async fn get_address(&self, address_id: i32) -> Result<Option<Address>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE id = $1");
        let row = client.query_opt(&query, &[&address_id]).await?;
        Ok(row.as_ref().map(address_from_row))
    }

    async fn list_identities(&self) -> Result<Vec<(Platform, String)>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT telegram_id, max_id FROM users WHERE telegram_id IS NOT NULL OR max_id IS NOT NULL ORDER BY id",
                &[],
            )
            .await?;

        let mut identities = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(id) = row.get::<_, Option<String>>("telegram_id") {
                identities.push((Platform::Telegram, id));
            }
            if let Some(id) = row.get::<_, Option<String>>("max_id") {
                identities.push((Platform::Max, id));
            }
        }
        Ok(identities)
    }
}
