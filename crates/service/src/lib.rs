//! Business logic layer for the flower shop.
//!
//! - [`OrderService`]: pricing and order creation, order queries, the
//!   fulfillment state machine.
//! - [`PaymentService`]: payment creation and the idempotent provider webhook.
//! - [`UserService`]: messenger profiles, addresses and the bonus ledger.
//!
//! Every service is generic over the repository traits, so tests run against
//! an in-memory store. Notifications are sent only after the database work
//! has committed, and their failures never reach the caller.

mod orders;
mod payments;
pub mod pricing;
mod users;

#[cfg(test)]
mod memory;

pub use orders::{OrderService, OrderServiceImpl};
pub use payments::{PaymentService, PaymentServiceImpl, PaymentSession, WebhookOutcome};
pub use users::{UserService, UserServiceImpl};

use model::OrderStatus;
use payment_gateway::GatewayError;
use repository::RepositoryError;
use thiserror::Error;

/// The main error type for every service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request is structurally or semantically invalid.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    /// Any other invalid input (addresses, bonus adjustments).
    #[error("Invalid request: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(String),
    /// The caller does not own the resource.
    #[error("Access denied")]
    Forbidden,
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    /// The resource is not in a state that allows the operation.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Payment provider error: {0}")]
    Payment(#[from] GatewayError),
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(RepositoryError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ServiceError::NotFound("resource".into()),
            RepositoryError::InsufficientBonus => {
                ServiceError::InvalidOrder("insufficient bonus points".into())
            }
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Db(other),
        }
    }
}

/// Maps a repository `NotFound` onto a named [`ServiceError::NotFound`].
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(RepositoryError) -> ServiceError {
    let what = what.into();
    move |e| match e {
        RepositoryError::NotFound => ServiceError::NotFound(what),
        other => other.into(),
    }
}
