//! Messenger notifications for order lifecycle events.
//!
//! Every messenger platform is a [`NotificationChannel`]; the [`Dispatcher`]
//! looks up which platforms a user is registered on and delivers to each of
//! them independently. Delivery is best effort: failures are logged and never
//! reach the caller, because the business transaction they describe has
//! already been committed.

mod dispatcher;
mod max;
mod telegram;
pub mod templates;

pub use dispatcher::{BroadcastPolicy, BroadcastReport, Dispatcher, Notifier};
pub use max::MaxChannel;
pub use telegram::TelegramChannel;

use async_trait::async_trait;
use model::{Order, OrderStatus, Platform};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The messenger API accepted the request but refused to deliver.
    #[error("{platform} API error: {description}")]
    Api {
        platform: Platform,
        description: String,
    },
}

/// Inline button opening the storefront WebApp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAppButton {
    pub text: String,
    pub url: String,
}

/// A rendered message ready to be handed to a messenger API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    /// Text uses Telegram legacy Markdown.
    pub markdown: bool,
    pub button: Option<WebAppButton>,
}

impl Message {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: false,
            button: None,
        }
    }
}

/// Who placed the order, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub name: String,
    pub platform: Platform,
}

/// Operator-facing events.
#[derive(Debug, Clone, Copy)]
pub enum AdminAlert<'a> {
    NewOrder {
        order: &'a Order,
        customer: &'a Customer,
    },
    PaymentReceived {
        order: &'a Order,
        customer: &'a Customer,
    },
}

/// A messenger platform able to deliver order notifications.
///
/// Implementors provide the transport ([`send_message`](Self::send_message))
/// and the WebApp URL; the event methods render the platform's own copy from
/// [`templates`] and send it.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn platform(&self) -> Platform;

    /// Storefront URL used for buttons, without trailing slash.
    fn webapp_url(&self) -> &str;

    async fn send_message(&self, recipient: &str, message: &Message) -> Result<(), NotifyError>;

    async fn send_order_created(&self, recipient: &str, order: &Order) -> Result<(), NotifyError> {
        let message = templates::order_created(self.platform(), order, self.webapp_url());
        self.send_message(recipient, &message).await
    }

    async fn send_payment_success(&self, recipient: &str, order: &Order) -> Result<(), NotifyError> {
        let message = templates::payment_success(self.platform(), order, self.webapp_url());
        self.send_message(recipient, &message).await
    }

    async fn send_status_change(
        &self,
        recipient: &str,
        order_id: i32,
        status: OrderStatus,
    ) -> Result<(), NotifyError> {
        let message =
            templates::status_change(self.platform(), order_id, status.as_str(), self.webapp_url());
        self.send_message(recipient, &message).await
    }

    async fn send_admin_alert(&self, recipient: &str, alert: &AdminAlert<'_>) -> Result<(), NotifyError> {
        let message = templates::admin_alert(self.platform(), alert);
        self.send_message(recipient, &message).await
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
        self.send_message(recipient, &Message::plain(text)).await
    }
}
