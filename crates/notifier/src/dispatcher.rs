use async_trait::async_trait;
use model::{Order, OrderStatus, Platform, User};
use repository::{RepositoryError, UsersRepository};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::{AdminAlert, Customer, NotificationChannel, NotifyError};

/// Throttle applied to operator broadcasts.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastPolicy {
    /// Pause after this many successful sends.
    pub batch_size: usize,
    pub pause: Duration,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            batch_size: 25,
            pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

/// # Notifier
///
/// Order lifecycle events as seen by the business layer. Every method is
/// infallible from the caller's point of view: delivery problems are logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Customer confirmation plus operator "new order" alert.
    async fn order_created(&self, order: &Order);

    /// Customer payment receipt plus operator "payment received" alert.
    async fn payment_succeeded(&self, order: &Order);

    async fn status_changed(&self, order: &Order);

    /// Sends `text` to every registered identity on every enabled platform.
    async fn broadcast(&self, text: &str) -> Result<BroadcastReport, RepositoryError>;
}

#[derive(Clone, Copy)]
enum CustomerEvent<'a> {
    Created(&'a Order),
    Paid(&'a Order),
    Status(&'a Order),
}

impl CustomerEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            CustomerEvent::Created(_) => "order created",
            CustomerEvent::Paid(_) => "payment success",
            CustomerEvent::Status(_) => "order status",
        }
    }

    fn order(&self) -> &Order {
        match *self {
            CustomerEvent::Created(order) | CustomerEvent::Paid(order) | CustomerEvent::Status(order) => {
                order
            }
        }
    }

    async fn deliver(
        self,
        channel: &dyn NotificationChannel,
        recipient: &str,
    ) -> Result<(), NotifyError> {
        match self {
            CustomerEvent::Created(order) => channel.send_order_created(recipient, order).await,
            CustomerEvent::Paid(order) => channel.send_payment_success(recipient, order).await,
            CustomerEvent::Status(order) => {
                channel
                    .send_status_change(recipient, order.id, order.status)
                    .await
            }
        }
    }
}

/// Routes events to the channels a user is registered on.
pub struct Dispatcher<U> {
    users: Arc<U>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    operators: Vec<(Platform, String)>,
    policy: BroadcastPolicy,
}

impl<U: UsersRepository> Dispatcher<U> {
    pub fn new(users: Arc<U>, policy: BroadcastPolicy) -> Self {
        Self {
            users,
            channels: Vec::new(),
            operators: Vec::new(),
            policy,
        }
    }

    /// Enables a platform. Platforms without a channel are skipped silently.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.retain(|c| c.platform() != channel.platform());
        self.channels.push(channel);
        self
    }

    /// Adds an operator recipient for admin alerts.
    pub fn with_operator(mut self, platform: Platform, recipient: impl Into<String>) -> Self {
        self.operators.push((platform, recipient.into()));
        self
    }

    fn channel(&self, platform: Platform) -> Option<&dyn NotificationChannel> {
        self.channels
            .iter()
            .find(|c| c.platform() == platform)
            .map(|c| c.as_ref())
    }

    async fn load_user(&self, user_id: i32) -> Option<User> {
        match self.users.get_by_id(user_id).await {
            Ok(user) => Some(user),
            Err(e) => {
                error!(user_id, "Failed to load user for notification: {}", e);
                None
            }
        }
    }

    /// One attempt per registered identity; a failure on one platform does
    /// not stop the others.
    async fn notify_customer(&self, user: Option<&User>, event: CustomerEvent<'_>) {
        let Some(user) = user else { return };
        for (platform, recipient) in user.identities() {
            let Some(channel) = self.channel(platform) else {
                debug!(%platform, user_id = user.id, "Channel disabled, skipping");
                continue;
            };
            if let Err(e) = event.deliver(channel, recipient).await {
                error!(
                    %platform,
                    user_id = user.id,
                    order_id = event.order().id,
                    "Failed to notify ({}): {}",
                    event.name(),
                    e
                );
            }
        }
    }

    async fn alert_operators(&self, alert: AdminAlert<'_>) {
        for (platform, recipient) in &self.operators {
            let Some(channel) = self.channel(*platform) else {
                continue;
            };
            if let Err(e) = channel.send_admin_alert(recipient, &alert).await {
                error!(%platform, "Failed to send operator alert: {}", e);
            }
        }
    }
}

fn customer_of(user: Option<&User>) -> Customer {
    match user {
        Some(user) => Customer {
            name: user.display_name(),
            platform: user.primary_platform(),
        },
        None => Customer {
            name: "Клиент".to_string(),
            platform: Platform::Telegram,
        },
    }
}

#[async_trait]
impl<U: UsersRepository + 'static> Notifier for Dispatcher<U> {
    #[instrument(skip(self, order), fields(order_id = order.id))]
    async fn order_created(&self, order: &Order) {
        let user = self.load_user(order.user_id).await;
        let customer = customer_of(user.as_ref());
        tokio::join!(
            self.notify_customer(user.as_ref(), CustomerEvent::Created(order)),
            self.alert_operators(AdminAlert::NewOrder {
                order,
                customer: &customer
            }),
        );
    }

    #[instrument(skip(self, order), fields(order_id = order.id))]
    async fn payment_succeeded(&self, order: &Order) {
        let user = self.load_user(order.user_id).await;
        let customer = customer_of(user.as_ref());
        tokio::join!(
            self.notify_customer(user.as_ref(), CustomerEvent::Paid(order)),
            self.alert_operators(AdminAlert::PaymentReceived {
                order,
                customer: &customer
            }),
        );
    }

    #[instrument(skip(self, order), fields(order_id = order.id, status = %order.status))]
    async fn status_changed(&self, order: &Order) {
        let user = self.load_user(order.user_id).await;
        self.notify_customer(user.as_ref(), CustomerEvent::Status(order))
            .await;
    }

    async fn broadcast(&self, text: &str) -> Result<BroadcastReport, RepositoryError> {
        let identities = self.users.list_identities().await?;
        let mut report = BroadcastReport::default();

        for (platform, recipient) in &identities {
            let Some(channel) = self.channel(*platform) else {
                continue;
            };
            match channel.send_text(recipient, text).await {
                Ok(()) => {
                    report.sent += 1;
                    if self.policy.batch_size > 0 && report.sent % self.policy.batch_size == 0 {
                        sleep(self.policy.pause).await;
                    }
                }
                Err(e) => {
                    warn!(%platform, recipient = %recipient, "Broadcast delivery failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.total = report.sent + report.failed;
        info!(
            sent = report.sent,
            failed = report.failed,
            "Broadcast finished"
        );
        Ok(report)
    }
}
