use async_trait::async_trait;
use model::{Order, OrderStatus, PaymentStatus};
use notifier::Notifier;
use payment_gateway::{
    PaymentEvent, PaymentEventKind, PaymentGateway, PaymentRequest, ReceiptLine, WebhookBody,
    webhook,
};
use repository::{OrdersRepository, RepositoryError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{ServiceError, not_found};

/// What the client needs to redirect the buyer to the provider.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_id: String,
    pub confirmation_url: String,
}

/// How a webhook delivery was handled. The provider always gets a 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First success for this order: marked paid and bonus credited.
    Confirmed { order_id: i32, bonus_credited: i32 },
    /// Repeated success for an order that is already paid.
    Duplicate { order_id: i32 },
    Canceled { order_id: i32 },
    /// Cancel event for an order whose payment is no longer pending.
    CancelIgnored { order_id: i32 },
    /// The referenced order does not exist.
    UnknownOrder { order_id: i32 },
    /// The event's payment id differs from the one issued for the order.
    PaymentMismatch { order_id: i32 },
    /// No usable `metadata.orderId`.
    NoOrder,
    /// An event type we do not act on.
    Ignored,
    /// The body could not be parsed.
    Malformed,
}

impl WebhookOutcome {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Confirmed { .. } => "confirmed",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::Canceled { .. } => "canceled",
            WebhookOutcome::CancelIgnored { .. } => "cancel_ignored",
            WebhookOutcome::UnknownOrder { .. } => "unknown_order",
            WebhookOutcome::PaymentMismatch { .. } => "payment_mismatch",
            WebhookOutcome::NoOrder => "no_order",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Malformed => "malformed",
        }
    }
}

/// # PaymentService
///
/// Creating provider payments and settling them from provider webhooks.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Creates a provider payment for the caller's unpaid order.
    ///
    /// # Errors
    /// [`ServiceError::Forbidden`] for someone else's order,
    /// [`ServiceError::Conflict`] when the order is already paid or canceled,
    /// [`ServiceError::Payment`] when the provider call fails.
    async fn create_payment(&self, user_id: i32, order_id: i32) -> Result<PaymentSession, ServiceError>;

    /// Applies one webhook delivery. Safe to call any number of times for the
    /// same event: the bonus is credited at most once per order.
    ///
    /// Malformed bodies and unknown orders are reported through the outcome;
    /// `Err` means a database failure, in which case nothing was committed.
    async fn handle_webhook(&self, body: WebhookBody<'_>) -> Result<WebhookOutcome, ServiceError>;
}

pub struct PaymentServiceImpl<O> {
    orders: Arc<O>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    receipt_email: String,
    return_url: String,
}

impl<O: OrdersRepository> PaymentServiceImpl<O> {
    pub fn new(
        orders: Arc<O>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        receipt_email: impl Into<String>,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            gateway,
            notifier,
            receipt_email: receipt_email.into(),
            return_url: return_url.into(),
        }
    }

    /// Checks that the event refers to the payment issued for the order.
    /// Orders paid without a recorded payment id accept any event.
    async fn check_payment(
        &self,
        order_id: i32,
        event: &PaymentEvent,
    ) -> Result<Option<WebhookOutcome>, ServiceError> {
        let order = match self.orders.get_by_id(order_id).await {
            Ok(order) => order,
            Err(RepositoryError::NotFound) => {
                warn!(order_id, "Payment webhook for unknown order");
                return Ok(Some(WebhookOutcome::UnknownOrder { order_id }));
            }
            Err(e) => return Err(e.into()),
        };
        match order.payment_id.as_deref() {
            Some(expected) if event.payment_id.as_deref() != Some(expected) => {
                warn!(
                    order_id,
                    expected,
                    received = event.payment_id.as_deref().unwrap_or(""),
                    "Payment webhook for a different payment"
                );
                Ok(Some(WebhookOutcome::PaymentMismatch { order_id }))
            }
            _ => Ok(None),
        }
    }

    async fn settle_success(&self, order_id: i32) -> Result<WebhookOutcome, ServiceError> {
        let confirmation = match self.orders.confirm_payment(order_id).await {
            Ok(Some(confirmation)) => confirmation,
            Ok(None) => {
                info!(order_id, "Payment already settled, skipping");
                return Ok(WebhookOutcome::Duplicate { order_id });
            }
            Err(RepositoryError::NotFound) => {
                warn!(order_id, "Payment webhook for unknown order");
                return Ok(WebhookOutcome::UnknownOrder { order_id });
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            order_id,
            user_id = confirmation.user_id,
            bonus = confirmation.bonus_credited,
            "Payment confirmed"
        );

        // Committed; from here on only best-effort notifications.
        match self.orders.get_by_id(order_id).await {
            Ok(order) => self.notifier.payment_succeeded(&order).await,
            Err(e) => error!(order_id, "Failed to reload paid order for notifications: {}", e),
        }

        Ok(WebhookOutcome::Confirmed {
            order_id,
            bonus_credited: confirmation.bonus_credited,
        })
    }

    async fn settle_cancel(&self, order_id: i32) -> Result<WebhookOutcome, ServiceError> {
        if self.orders.cancel_payment(order_id).await? {
            info!(order_id, "Payment canceled");
            Ok(WebhookOutcome::Canceled { order_id })
        } else {
            Ok(WebhookOutcome::CancelIgnored { order_id })
        }
    }
}

/// Receipt lines for an order. Their sum always equals `total_price`.
///
/// Without a bonus discount every item keeps its unit price. With one, each
/// item becomes a single line carrying its discounted line total; the
/// discount is spread in proportion to the line totals and the rounding
/// remainder goes to the largest line. A delivery fee, when charged, is a
/// separate line.
pub(crate) fn receipt_lines(order: &Order) -> Vec<ReceiptLine> {
    let mut lines: Vec<ReceiptLine> = if order.bonus_used <= 0 {
        order
            .items
            .iter()
            .map(|item| ReceiptLine {
                name: item.name.clone(),
                price: i64::from(item.price),
                quantity: item.quantity,
            })
            .collect()
    } else {
        let items_total = order.items_total().max(1);
        let discount = i64::from(order.bonus_used);
        let mut allocated = 0;
        let mut lines: Vec<ReceiptLine> = order
            .items
            .iter()
            .map(|item| {
                let total = item.line_total();
                let share = discount * total / items_total;
                allocated += share;
                ReceiptLine {
                    name: item.name.clone(),
                    price: total - share,
                    quantity: 1,
                }
            })
            .collect();
        if let Some(largest) = lines.iter_mut().max_by_key(|l| l.price) {
            largest.price -= discount - allocated;
        }
        lines
    };

    let delivery = order.delivery_cost();
    if delivery > 0 {
        lines.push(ReceiptLine {
            name: "Доставка".to_string(),
            price: delivery,
            quantity: 1,
        });
    }
    lines
}

#[async_trait]
impl<O: OrdersRepository> PaymentService for PaymentServiceImpl<O> {
    #[instrument(skip(self))]
    async fn create_payment(&self, user_id: i32, order_id: i32) -> Result<PaymentSession, ServiceError> {
        let order = self
            .orders
            .get_by_id(order_id)
            .await
            .map_err(not_found(format!("Order #{order_id}")))?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden);
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!("order #{order_id} is already paid")));
        }
        if order.status == OrderStatus::Canceled {
            return Err(ServiceError::Conflict(format!("order #{order_id} is canceled")));
        }

        let request = PaymentRequest {
            amount: order.total_price,
            order_id,
            description: format!("Заказ #{order_id}"),
            lines: receipt_lines(&order),
            customer_email: self.receipt_email.clone(),
            return_url: self.return_url.clone(),
        };
        let created = self.gateway.create_payment(&request).await?;
        self.orders.set_payment_id(order_id, &created.id).await?;

        info!(order_id, payment_id = %created.id, "Payment session created");
        Ok(PaymentSession {
            payment_id: created.id,
            confirmation_url: created.confirmation_url,
        })
    }

    async fn handle_webhook(&self, body: WebhookBody<'_>) -> Result<WebhookOutcome, ServiceError> {
        let event: PaymentEvent = match webhook::normalize(body) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring payment webhook: {}", e);
                return Ok(WebhookOutcome::Malformed);
            }
        };
        let Some(order_id) = event.order_id else {
            warn!(event = event.kind.as_str(), "Payment webhook without order id");
            return Ok(WebhookOutcome::NoOrder);
        };

        if let PaymentEventKind::Other(kind) = &event.kind {
            info!(order_id, event = %kind, "Payment webhook event ignored");
            return Ok(WebhookOutcome::Ignored);
        }
        if let Some(rejected) = self.check_payment(order_id, &event).await? {
            return Ok(rejected);
        }

        match event.kind {
            PaymentEventKind::Succeeded => self.settle_success(order_id).await,
            PaymentEventKind::Canceled => self.settle_cancel(order_id).await,
            PaymentEventKind::Other(_) => Ok(WebhookOutcome::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FakeGateway, MemoryStore, RecordingNotifier, Sent};
    use crate::orders::{OrderService, OrderServiceImpl};
    use model::{CreateOrderRequest, OrderLineRequest};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        gateway: Arc<FakeGateway>,
        orders: OrderServiceImpl<MemoryStore, MemoryStore, MemoryStore, MemoryStore>,
        payments: PaymentServiceImpl<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_bouquet(5, "Нежность", 1000);
        store.add_bouquet(6, "Лаванда", 1250);
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(FakeGateway::default());
        let orders = OrderServiceImpl::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
        );
        let payments = PaymentServiceImpl::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            "shop@example.com",
            "https://shop.example/orders",
        );
        Fixture {
            store,
            notifier,
            gateway,
            orders,
            payments,
        }
    }

    fn cart(lines: &[(i32, i32)], delivery_type: &str, bonus: i32) -> CreateOrderRequest {
        CreateOrderRequest {
            items: lines
                .iter()
                .map(|&(bouquet_id, quantity)| OrderLineRequest {
                    bouquet_id: Some(bouquet_id),
                    quantity,
                    ..Default::default()
                })
                .collect(),
            delivery_type: delivery_type.into(),
            bonus_used: Some(bonus),
            ..Default::default()
        }
    }

    fn succeeded(order_id: i32) -> String {
        json!({
            "type": "notification",
            "event": "payment.succeeded",
            "object": {
                "id": format!("pay-{order_id}"),
                "metadata": { "orderId": order_id.to_string() }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_webhook_credits_bonus_exactly_once() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), Some("m1"), 0);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 2)], "pickup", 0))
            .await
            .unwrap();

        let body = succeeded(order.id);
        let first = f
            .payments
            .handle_webhook(WebhookBody::Raw(body.as_bytes()))
            .await
            .unwrap();
        assert_eq!(
            first,
            WebhookOutcome::Confirmed {
                order_id: order.id,
                bonus_credited: 100
            }
        );

        let second = f
            .payments
            .handle_webhook(WebhookBody::Text(&body))
            .await
            .unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate { order_id: order.id });

        assert_eq!(f.store.balance(user), 100);
        assert_eq!(f.store.ledger_sum(user), 100);
        let paid = f.store.order(order.id);
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.status, OrderStatus::Confirmed);

        let paid_notifications = f
            .notifier
            .sent()
            .into_iter()
            .filter(|s| *s == Sent::Paid(order.id))
            .count();
        assert_eq!(paid_notifications, 1);
    }

    #[tokio::test]
    async fn test_ledger_matches_balance_through_spend_and_earn() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 500);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 2)], "delivery", 1000))
            .await
            .unwrap();
        assert_eq!(order.bonus_used, 400);
        assert_eq!(order.total_price, 1900);
        assert_eq!(f.store.balance(user), 100);

        f.payments
            .handle_webhook(WebhookBody::Json(json!({
                "event": "payment.succeeded",
                "object": { "metadata": { "orderId": order.id } }
            })))
            .await
            .unwrap();

        assert_eq!(f.store.balance(user), 200);
        assert_eq!(f.store.ledger_sum(user), f.store.balance(user));
    }

    #[tokio::test]
    async fn test_success_after_operator_cancel_keeps_status() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 0);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 1)], "pickup", 0))
            .await
            .unwrap();
        f.orders
            .change_status(order.id, OrderStatus::Canceled)
            .await
            .unwrap();

        let body = succeeded(order.id);
        f.payments
            .handle_webhook(WebhookBody::Raw(body.as_bytes()))
            .await
            .unwrap();

        let stored = f.store.order(order.id);
        assert_eq!(stored.status, OrderStatus::Canceled);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_cancel_event_only_touches_pending_payments() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 0);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 1)], "pickup", 0))
            .await
            .unwrap();
        let cancel = json!({
            "event": "payment.canceled",
            "object": { "metadata": { "orderId": order.id.to_string() } }
        });

        let outcome = f
            .payments
            .handle_webhook(WebhookBody::Json(cancel.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Canceled { order_id: order.id });
        let stored = f.store.order(order.id);
        assert_eq!(stored.payment_status, PaymentStatus::Canceled);
        assert_eq!(stored.status, OrderStatus::New);
        assert_eq!(f.store.balance(user), 0);

        let again = f
            .payments
            .handle_webhook(WebhookBody::Json(cancel))
            .await
            .unwrap();
        assert_eq!(again, WebhookOutcome::CancelIgnored { order_id: order.id });
    }

    #[tokio::test]
    async fn test_unusable_webhooks_are_reported_not_raised() {
        let f = fixture();
        let outcome = async |body: serde_json::Value| {
            f.payments.handle_webhook(WebhookBody::Json(body)).await.unwrap()
        };

        assert_eq!(
            f.payments
                .handle_webhook(WebhookBody::Raw(b"<html>"))
                .await
                .unwrap(),
            WebhookOutcome::Malformed
        );
        assert_eq!(
            outcome(json!({ "event": "payment.succeeded", "object": {} })).await,
            WebhookOutcome::NoOrder
        );
        assert_eq!(
            outcome(json!({
                "event": "payment.succeeded",
                "object": { "metadata": { "orderId": "777" } }
            }))
            .await,
            WebhookOutcome::UnknownOrder { order_id: 777 }
        );
        assert_eq!(
            outcome(json!({
                "event": "payment.waiting_for_capture",
                "object": { "metadata": { "orderId": "1" } }
            }))
            .await,
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_create_payment_with_delivery_line() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 0);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 2)], "delivery", 0))
            .await
            .unwrap();

        let session = f.payments.create_payment(user, order.id).await.unwrap();
        assert_eq!(session.payment_id, format!("pay-{}", order.id));
        assert_eq!(
            f.store.order(order.id).payment_id.as_deref(),
            Some(session.payment_id.as_str())
        );

        let request = f.gateway.requests().pop().unwrap();
        assert_eq!(request.amount, 2300);
        assert_eq!(request.return_url, "https://shop.example/orders");
        assert_eq!(
            request.lines,
            vec![
                ReceiptLine {
                    name: "Нежность".into(),
                    price: 1000,
                    quantity: 2
                },
                ReceiptLine {
                    name: "Доставка".into(),
                    price: 300,
                    quantity: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_receipt_sums_to_total_with_bonus() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 1000);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 1), (6, 3)], "delivery", 1000))
            .await
            .unwrap();
        // subtotal 4750, cap 950, 3800 >= 3000 so no fee.
        assert_eq!(order.bonus_used, 950);
        assert_eq!(order.total_price, 3800);

        let lines = receipt_lines(&order);
        let sum: i64 = lines.iter().map(|l| l.price * i64::from(l.quantity)).sum();
        assert_eq!(sum, i64::from(order.total_price));
        assert!(lines.iter().all(|l| l.price > 0));
    }

    #[tokio::test]
    async fn test_webhook_for_another_payment_is_rejected() {
        let f = fixture();
        let user = f.store.add_user(Some("1"), None, 0);
        let order = f
            .orders
            .create_order(user, &cart(&[(5, 2)], "pickup", 0))
            .await
            .unwrap();
        f.payments.create_payment(user, order.id).await.unwrap();

        let forged = |payment_id: Option<&str>| {
            let mut object = json!({ "metadata": { "orderId": order.id } });
            if let Some(id) = payment_id {
                object["id"] = json!(id);
            }
            json!({ "event": "payment.succeeded", "object": object })
        };
        for body in [forged(Some("pay-999")), forged(None)] {
            let outcome = f
                .payments
                .handle_webhook(WebhookBody::Json(body))
                .await
                .unwrap();
            assert_eq!(outcome, WebhookOutcome::PaymentMismatch { order_id: order.id });
        }
        let cancel = json!({
            "event": "payment.canceled",
            "object": { "id": "pay-999", "metadata": { "orderId": order.id } }
        });
        assert_eq!(
            f.payments.handle_webhook(WebhookBody::Json(cancel)).await.unwrap(),
            WebhookOutcome::PaymentMismatch { order_id: order.id }
        );
        assert_eq!(f.store.order(order.id).payment_status, PaymentStatus::Pending);
        assert_eq!(f.store.balance(user), 0);

        let genuine = succeeded(order.id);
        assert_eq!(
            f.payments
                .handle_webhook(WebhookBody::Text(&genuine))
                .await
                .unwrap(),
            WebhookOutcome::Confirmed {
                order_id: order.id,
                bonus_credited: 100
            }
        );
        assert_eq!(f.store.balance(user), 100);
    }

    #[tokio::test]
    async fn test_create_payment_guards() {
        let f = fixture();
        let owner = f.store.add_user(Some("1"), None, 0);
        let stranger = f.store.add_user(Some("2"), None, 0);
        let order = f
            .orders
            .create_order(owner, &cart(&[(5, 1)], "pickup", 0))
            .await
            .unwrap();

        assert!(matches!(
            f.payments.create_payment(stranger, order.id).await,
            Err(ServiceError::Forbidden)
        ));
        assert!(matches!(
            f.payments.create_payment(owner, 4242).await,
            Err(ServiceError::NotFound(_))
        ));

        let body = succeeded(order.id);
        f.payments
            .handle_webhook(WebhookBody::Raw(body.as_bytes()))
            .await
            .unwrap();
        assert!(matches!(
            f.payments.create_payment(owner, order.id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(f.gateway.requests().is_empty());
    }
}
