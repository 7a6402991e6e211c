use async_trait::async_trait;
use model::{CreateOrderRequest, DeliveryType, NewOrder, NewOrderItem, Order, OrderLineRequest, OrderStatus};
use notifier::Notifier;
use repository::{CatalogRepository, OrdersRepository, SettingsRepository, UsersRepository};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::pricing::{self, PricingSettings};
use crate::{ServiceError, not_found};

const MAX_QUANTITY: i32 = 999;
/// Upper bound for a client-priced constructor bouquet, in rubles.
const MAX_CONSTRUCTOR_PRICE: i32 = 1_000_000;

/// # OrderService
///
/// Order creation, order queries and the fulfillment state machine.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Prices and persists a new order for `user_id`.
    ///
    /// Catalog prices are re-read, the bonus redemption is clamped, and the
    /// order, its items and the bonus debit are written in one transaction.
    /// The customer and the operators are notified after the commit.
    ///
    /// # Errors
    /// [`ServiceError::InvalidOrder`] for a bad cart (nothing is written),
    /// [`ServiceError::NotFound`] for an unknown bouquet.
    async fn create_order(
        &self,
        user_id: i32,
        request: &CreateOrderRequest,
    ) -> Result<Order, ServiceError>;

    /// Loads an order on behalf of its owner; [`ServiceError::Forbidden`] otherwise.
    async fn get_order_for_user(&self, user_id: i32, order_id: i32) -> Result<Order, ServiceError>;

    /// The user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: i32) -> Result<Vec<Order>, ServiceError>;

    async fn get_order(&self, order_id: i32) -> Result<Order, ServiceError>;

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, ServiceError>;

    /// Moves the order to `next` if the state machine allows it and notifies
    /// the customer.
    ///
    /// # Errors
    /// [`ServiceError::InvalidTransition`] when `next` is not reachable from
    /// the current status; [`ServiceError::Conflict`] when the status changed
    /// concurrently.
    async fn change_status(&self, order_id: i32, next: OrderStatus) -> Result<Order, ServiceError>;
}

pub struct OrderServiceImpl<O, U, C, S> {
    orders: Arc<O>,
    users: Arc<U>,
    catalog: Arc<C>,
    settings: Arc<S>,
    notifier: Arc<dyn Notifier>,
}

impl<O, U, C, S> OrderServiceImpl<O, U, C, S>
where
    O: OrdersRepository,
    U: UsersRepository,
    C: CatalogRepository,
    S: SettingsRepository,
{
    pub fn new(
        orders: Arc<O>,
        users: Arc<U>,
        catalog: Arc<C>,
        settings: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            users,
            catalog,
            settings,
            notifier,
        }
    }

    /// Turns a requested cart line into an item snapshot.
    ///
    /// Catalog lines always take the current catalog name and price; the
    /// client's name and price are trusted only for constructor bouquets.
    async fn resolve_line(&self, line: &OrderLineRequest) -> Result<NewOrderItem, ServiceError> {
        if line.quantity <= 0 {
            return Err(ServiceError::InvalidOrder(
                "item quantity must be positive".into(),
            ));
        }
        if line.quantity > MAX_QUANTITY {
            return Err(ServiceError::InvalidOrder(format!(
                "item quantity must not exceed {MAX_QUANTITY}"
            )));
        }
        let client_name = line
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let constructor_data = line
            .constructor_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ServiceError::InvalidOrder(format!("bad constructor data: {e}")))?;

        match (line.is_constructor, line.bouquet_id) {
            (true, _) => {
                let name = client_name.ok_or_else(|| {
                    ServiceError::InvalidOrder("constructor item has no name".into())
                })?;
                let price = line.price.filter(|p| *p > 0).ok_or_else(|| {
                    ServiceError::InvalidOrder("constructor item needs a positive price".into())
                })?;
                if price > MAX_CONSTRUCTOR_PRICE {
                    return Err(ServiceError::InvalidOrder(format!(
                        "constructor item price must not exceed {MAX_CONSTRUCTOR_PRICE}"
                    )));
                }
                Ok(NewOrderItem {
                    bouquet_id: None,
                    name: name.to_string(),
                    price,
                    quantity: line.quantity,
                    is_constructor: true,
                    constructor_data,
                })
            }
            (false, Some(bouquet_id)) => {
                let bouquet = self
                    .catalog
                    .get_bouquet(bouquet_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Bouquet #{bouquet_id}")))?;
                Ok(NewOrderItem {
                    bouquet_id: Some(bouquet.id),
                    name: bouquet.name,
                    price: bouquet.price,
                    quantity: line.quantity,
                    is_constructor: false,
                    constructor_data,
                })
            }
            (false, None) => Err(ServiceError::InvalidOrder(
                "item must reference a bouquet or be a constructor bouquet".into(),
            )),
        }
    }

    async fn pricing_settings(&self) -> Result<PricingSettings, ServiceError> {
        let values = self.settings.get_many(&PricingSettings::KEYS).await?;
        Ok(PricingSettings::from_map(&values))
    }
}

fn to_rubles(value: i64, what: &str) -> Result<i32, ServiceError> {
    i32::try_from(value).map_err(|_| ServiceError::InvalidOrder(format!("{what} is out of range")))
}

#[async_trait]
impl<O, U, C, S> OrderService for OrderServiceImpl<O, U, C, S>
where
    O: OrdersRepository,
    U: UsersRepository,
    C: CatalogRepository,
    S: SettingsRepository,
{
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    async fn create_order(
        &self,
        user_id: i32,
        request: &CreateOrderRequest,
    ) -> Result<Order, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::InvalidOrder("order has no items".into()));
        }
        let delivery_type: DeliveryType = request
            .delivery_type
            .parse()
            .map_err(|e| ServiceError::InvalidOrder(format!("{e}")))?;

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            items.push(self.resolve_line(line).await?);
        }

        if let Some(address_id) = request.address_id {
            let owned = self
                .users
                .get_address(address_id)
                .await?
                .is_some_and(|a| a.user_id == user_id);
            if !owned {
                return Err(ServiceError::InvalidOrder(format!(
                    "unknown address #{address_id}"
                )));
            }
        }

        let settings = self.pricing_settings().await?;
        let user = self
            .users
            .get_by_id(user_id)
            .await
            .map_err(not_found(format!("User #{user_id}")))?;

        let subtotal: i64 = items
            .iter()
            .map(|it| i64::from(it.price) * i64::from(it.quantity))
            .sum();
        let quote = pricing::quote(
            subtotal,
            delivery_type,
            i64::from(request.bonus_used.unwrap_or(0)),
            i64::from(user.bonus_points),
            &settings,
        );

        let new_order = NewOrder {
            user_id,
            address_id: request.address_id,
            delivery_type,
            delivery_date: request.delivery_date.clone(),
            delivery_time: request.delivery_time.clone(),
            recipient_name: request.recipient_name.clone(),
            recipient_phone: request.recipient_phone.clone(),
            comment: request.comment.clone(),
            is_anonymous: request.is_anonymous,
            card_text: request.card_text.clone(),
            total_price: to_rubles(quote.total_price, "order total")?,
            bonus_used: to_rubles(quote.bonus_used, "bonus used")?,
            bonus_earned: to_rubles(quote.bonus_earned, "bonus earned")?,
            items,
        };

        let order = self.orders.create(&new_order).await?;
        info!(
            order_id = order.id,
            user_id,
            total = order.total_price,
            bonus_used = order.bonus_used,
            "Order created"
        );

        self.notifier.order_created(&order).await;
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn get_order_for_user(&self, user_id: i32, order_id: i32) -> Result<Order, ServiceError> {
        let order = self.get_order(order_id).await?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden);
        }
        Ok(order)
    }

    async fn list_orders_for_user(&self, user_id: i32) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.list_by_user(user_id).await?)
    }

    async fn get_order(&self, order_id: i32) -> Result<Order, ServiceError> {
        self.orders
            .get_by_id(order_id)
            .await
            .map_err(not_found(format!("Order #{order_id}")))
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.list_all(status).await?)
    }

    #[instrument(skip(self))]
    async fn change_status(&self, order_id: i32, next: OrderStatus) -> Result<Order, ServiceError> {
        let current = self.get_order(order_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let order = self
            .orders
            .update_status(order_id, current.status, next)
            .await?;
        info!(order_id, from = %current.status, to = %next, "Order status changed");

        self.notifier.status_changed(&order).await;
        Ok(order)
    }
}
