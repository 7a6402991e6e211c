//! PostgreSQL implementations of the repository traits.
//!
//! Each repository owns a clone of the connection pool. Transactional helpers
//! take a `&Transaction<'_>` so they can be composed into one atomic unit.

mod catalog;
mod loyalty;
mod orders;
mod users;

pub use catalog::{PgCatalogRepository, PgSettingsRepository};
pub use loyalty::PgLoyaltyRepository;
pub use orders::PgOrdersRepository;
pub use users::PgUsersRepository;

use crate::RepositoryError;
use model::ParseEnumError;
use std::str::FromStr;
use tokio_postgres::Row;

/// Reads a text column holding one of the model enums.
fn parse_column<T>(row: &Row, column: &str) -> Result<T, RepositoryError>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))
}
