//! Payment provider integration.
//!
//! [`PaymentGateway`] is the narrow contract the order workflow needs from the
//! provider (create a payment, get a confirmation URL back). [`YooKassaClient`]
//! implements it over the provider's REST API. Incoming webhooks are turned into
//! a single [`PaymentEvent`] by [`webhook::normalize`].

pub mod webhook;
mod yookassa;

pub use webhook::{PaymentEvent, PaymentEventKind, WebhookBody, WebhookError};
pub use yookassa::YooKassaClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Shop credentials are absent; payments are disabled.
    #[error("payment provider is not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("provider API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// One line of the fiscal receipt attached to a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub name: String,
    /// Unit price in rubles.
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Amount to charge in rubles.
    pub amount: i32,
    pub order_id: i32,
    pub description: String,
    pub lines: Vec<ReceiptLine>,
    pub customer_email: String,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    pub id: String,
    pub confirmation_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, GatewayError>;
}

/// Gateway used when the shop credentials are missing.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_payment(&self, _request: &PaymentRequest) -> Result<CreatedPayment, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
