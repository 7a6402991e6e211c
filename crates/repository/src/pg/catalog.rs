use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::Bouquet;
use std::collections::HashMap;

use crate::{CatalogRepository, RepositoryError, SettingsRepository};

/// PostgreSQL implementation of the CatalogRepository trait.
pub struct PgCatalogRepository {
    pool: Pool,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn get_bouquet(&self, bouquet_id: i32) -> Result<Option<Bouquet>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, price FROM bouquets WHERE id = $1",
                &[&bouquet_id],
            )
            .await?;
        Ok(row.map(|row| Bouquet {
            id: row.get("id"),
            name: row.get("name"),
            price: row.get("price"),
        }))
    }
}

/// PostgreSQL implementation of the SettingsRepository trait.
pub struct PgSettingsRepository {
    pool: Pool,
}

impl PgSettingsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT key, value FROM settings WHERE key = ANY($1)",
                &[&keys],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }
}
