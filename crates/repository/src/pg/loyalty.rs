use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{LoyaltyEntry, LoyaltyKind};
use tokio_postgres::{Row, Transaction};
use tracing::debug;

use super::parse_column;
use crate::{LoyaltyRepository, RepositoryError};

const ENTRY_COLUMNS: &str = "id, user_id, amount, type, description, order_id, created_at";

fn entry_from_row(row: &Row) -> Result<LoyaltyEntry, RepositoryError> {
    Ok(LoyaltyEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        kind: parse_column(row, "type")?,
        description: row.get("description"),
        order_id: row.get("order_id"),
        created_at: row.get("created_at"),
    })
}

/// Moves `amount` points on the user's balance and appends the matching
/// ledger entry inside `tx`.
///
/// The balance update is a single conditional statement, so a debit that
/// would go below zero affects no rows and is reported as
/// [`RepositoryError::InsufficientBonus`]; the caller's transaction is then
/// dropped and nothing is written.
pub(crate) async fn apply_tx(
    tx: &Transaction<'_>,
    user_id: i32,
    amount: i32,
    description: &str,
    order_id: Option<i32>,
) -> Result<LoyaltyEntry, RepositoryError> {
    let updated = tx
        .execute(
            r#"
            UPDATE users
            SET bonus_points = bonus_points + $2
            WHERE id = $1 AND bonus_points + $2 >= 0
            "#,
            &[&user_id, &amount],
        )
        .await?;

    if updated == 0 {
        let exists = tx
            .query_opt("SELECT 1 FROM users WHERE id = $1", &[&user_id])
            .await?
            .is_some();
        return Err(if exists {
            RepositoryError::InsufficientBonus
        } else {
            RepositoryError::NotFound
        });
    }

    let kind = LoyaltyKind::for_amount(amount);
    let query = format!(
        r#"
        INSERT INTO loyalty_history (user_id, amount, type, description, order_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {ENTRY_COLUMNS}
        "#
    );
    let row = tx
        .query_one(
            &query,
            &[&user_id, &amount, &kind.as_str(), &description, &order_id],
        )
        .await?;

    debug!(user_id, amount, ?order_id, "Bonus ledger entry written");
    entry_from_row(&row)
}

/// PostgreSQL implementation of the LoyaltyRepository trait.
pub struct PgLoyaltyRepository {
    pool: Pool,
}

impl PgLoyaltyRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoyaltyRepository for PgLoyaltyRepository {
    async fn history(&self, user_id: i32, limit: i64) -> Result<Vec<LoyaltyEntry>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM loyalty_history WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = client.query(&query, &[&user_id, &limit]).await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn adjust(
        &self,
        user_id: i32,
        amount: i32,
        description: &str,
    ) -> Result<LoyaltyEntry, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let entry = apply_tx(&tx, user_id, amount, description, None).await?;
        tx.commit().await?;
        Ok(entry)
    }
}
