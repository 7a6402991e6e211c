//! In-memory implementations of the repository traits, plus recording fakes
//! for the notifier and the payment gateway.
//!
//! Each repository call takes the store lock once, so the multi-row
//! operations are atomic in the same way the SQL transactions are.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use model::{
    Address, Bouquet, LoyaltyEntry, LoyaltyKind, MessengerIdentity, NewAddress, NewOrder, Order,
    OrderItem, OrderStatus, PaymentStatus, Platform, User,
};
use notifier::{BroadcastReport, Notifier};
use payment_gateway::{CreatedPayment, GatewayError, PaymentGateway, PaymentRequest};
use repository::{
    CatalogRepository, LoyaltyRepository, OrdersRepository, PaymentConfirmation, RepositoryError,
    SettingsRepository, UsersRepository,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    users: Vec<User>,
    addresses: Vec<Address>,
    bouquets: HashMap<i32, Bouquet>,
    settings: HashMap<String, String>,
    orders: Vec<Order>,
    ledger: Vec<LoyaltyEntry>,
    next_id: i32,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn user_mut(&mut self, user_id: i32) -> Result<&mut User, RepositoryError> {
        self.users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(RepositoryError::NotFound)
    }

    fn order_mut(&mut self, order_id: i32) -> Result<&mut Order, RepositoryError> {
        self.orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(RepositoryError::NotFound)
    }

    /// Balance change plus ledger entry; refuses to go below zero.
    fn apply(
        &mut self,
        user_id: i32,
        amount: i32,
        description: String,
        order_id: Option<i32>,
    ) -> Result<LoyaltyEntry, RepositoryError> {
        let user = self.user_mut(user_id)?;
        if user.bonus_points + amount < 0 {
            return Err(RepositoryError::InsufficientBonus);
        }
        user.bonus_points += amount;
        let entry = LoyaltyEntry {
            id: self.next_id(),
            user_id,
            amount,
            kind: LoyaltyKind::for_amount(amount),
            description,
            order_id,
            created_at: now(),
        };
        self.ledger.push(entry.clone());
        Ok(entry)
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 8, 9, 0, 0).unwrap()
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, telegram_id: Option<&str>, max_id: Option<&str>, bonus_points: i32) -> i32 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.users.push(User {
            id,
            telegram_id: telegram_id.map(String::from),
            max_id: max_id.map(String::from),
            first_name: Some("Анна".into()),
            last_name: None,
            username: None,
            phone: None,
            bonus_points: 0,
            created_at: now(),
            addresses: Vec::new(),
        });
        if bonus_points > 0 {
            state
                .apply(id, bonus_points, "Стартовый баланс".into(), None)
                .unwrap();
        }
        id
    }

    pub fn add_bouquet(&self, id: i32, name: &str, price: i32) {
        self.state.lock().unwrap().bouquets.insert(
            id,
            Bouquet {
                id,
                name: name.to_string(),
                price,
            },
        );
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    pub fn balance(&self, user_id: i32) -> i32 {
        let state = self.state.lock().unwrap();
        state.users.iter().find(|u| u.id == user_id).unwrap().bonus_points
    }

    pub fn ledger_sum(&self, user_id: i32) -> i32 {
        let state = self.state.lock().unwrap();
        state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.amount)
            .sum()
    }

    pub fn ledger(&self, user_id: i32) -> Vec<LoyaltyEntry> {
        let state = self.state.lock().unwrap();
        state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    pub fn order(&self, order_id: i32) -> Order {
        let state = self.state.lock().unwrap();
        state.orders.iter().find(|o| o.id == order_id).unwrap().clone()
    }
}

#[async_trait]
impl UsersRepository for MemoryStore {
    async fn get_by_id(&self, user_id: i32) -> Result<User, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut user = state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        user.addresses = state
            .addresses
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        Ok(user)
    }

    async fn find_by_platform(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.identities().contains(&(platform, platform_id)))
            .cloned())
    }

    async fn upsert_by_platform(&self, identity: &MessengerIdentity) -> Result<User, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let key = (identity.platform, identity.platform_id.as_str());
        if let Some(user) = state.users.iter_mut().find(|u| u.identities().contains(&key)) {
            user.first_name = Some(identity.first_name.clone());
            user.last_name = identity.last_name.clone();
            user.username = identity.username.clone();
            return Ok(user.clone());
        }
        let id = state.next_id();
        let (telegram_id, max_id) = match identity.platform {
            Platform::Telegram => (Some(identity.platform_id.clone()), None),
            Platform::Max => (None, Some(identity.platform_id.clone())),
        };
        let user = User {
            id,
            telegram_id,
            max_id,
            first_name: Some(identity.first_name.clone()),
            last_name: identity.last_name.clone(),
            username: identity.username.clone(),
            phone: None,
            bonus_points: 0,
            created_at: now(),
            addresses: Vec::new(),
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn add_address(&self, user_id: i32, address: &NewAddress) -> Result<Address, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.user_mut(user_id)?;
        let id = state.next_id();
        let address = Address {
            id,
            user_id,
            title: address.title.clone().unwrap_or_else(|| "Дом".into()),
            street: address.street.clone(),
            house: address.house.clone(),
            apartment: address.apartment.clone(),
            entrance: address.entrance.clone(),
            floor: address.floor.clone(),
            comment: address.comment.clone(),
            is_default: address.is_default,
        };
        state.addresses.push(address.clone());
        Ok(address)
    }

    async fn get_address(&self, address_id: i32) -> Result<Option<Address>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state.addresses.iter().find(|a| a.id == address_id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<(Platform, String)>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .flat_map(|u| {
                u.identities()
                    .into_iter()
                    .map(|(p, id)| (p, id.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_bouquet(&self, bouquet_id: i32) -> Result<Option<Bouquet>, RepositoryError> {
        Ok(self.state.lock().unwrap().bouquets.get(&bouquet_id).cloned())
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| state.settings.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }
}

#[async_trait]
impl OrdersRepository for MemoryStore {
    async fn create(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let balance = state.user_mut(order.user_id)?.bonus_points;
        if balance < order.bonus_used {
            return Err(RepositoryError::InsufficientBonus);
        }

        let id = state.next_id();
        let mut items = Vec::with_capacity(order.items.len());
        for it in &order.items {
            let item_id = state.next_id();
            items.push(OrderItem {
                id: item_id,
                order_id: id,
                bouquet_id: it.bouquet_id,
                name: it.name.clone(),
                price: it.price,
                quantity: it.quantity,
                is_constructor: it.is_constructor,
                constructor_data: it.constructor_data.clone(),
            });
        }
        let address = order
            .address_id
            .and_then(|a| state.addresses.iter().find(|x| x.id == a).cloned());
        let created = Order {
            id,
            user_id: order.user_id,
            address_id: order.address_id,
            delivery_type: order.delivery_type,
            delivery_date: order.delivery_date.clone(),
            delivery_time: order.delivery_time.clone(),
            recipient_name: order.recipient_name.clone(),
            recipient_phone: order.recipient_phone.clone(),
            comment: order.comment.clone(),
            is_anonymous: order.is_anonymous,
            card_text: order.card_text.clone(),
            total_price: order.total_price,
            bonus_used: order.bonus_used,
            bonus_earned: order.bonus_earned,
            status: OrderStatus::New,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            created_at: now(),
            items,
            address,
        };
        if order.bonus_used > 0 {
            state.apply(
                order.user_id,
                -order.bonus_used,
                format!("Списание за заказ #{id}"),
                Some(id),
            )?;
        }
        state.orders.push(created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, order_id: i32) -> Result<Order, RepositoryError> {
        Ok(self.state.lock().unwrap().order_mut(order_id)?.clone())
    }

    async fn list_by_user(&self, user_id: i32) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .rev()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .rev()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let order = state.order_mut(order_id)?;
        if order.status != from {
            return Err(RepositoryError::Conflict(format!(
                "order #{order_id} is no longer '{from}'"
            )));
        }
        order.status = to;
        Ok(order.clone())
    }

    async fn set_payment_id(&self, order_id: i32, payment_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.order_mut(order_id)?.payment_id = Some(payment_id.to_string());
        Ok(())
    }

    async fn confirm_payment(
        &self,
        order_id: i32,
    ) -> Result<Option<PaymentConfirmation>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let order = state.order_mut(order_id)?;
        if order.payment_status == PaymentStatus::Paid {
            return Ok(None);
        }
        order.payment_status = PaymentStatus::Paid;
        if order.status == OrderStatus::New {
            order.status = OrderStatus::Confirmed;
        }
        let confirmation = PaymentConfirmation {
            order_id,
            user_id: order.user_id,
            bonus_credited: order.bonus_earned,
        };
        if confirmation.bonus_credited > 0 {
            state.apply(
                confirmation.user_id,
                confirmation.bonus_credited,
                format!("Кэшбэк за заказ #{order_id}"),
                Some(order_id),
            )?;
        }
        Ok(Some(confirmation))
    }

    async fn cancel_payment(&self, order_id: i32) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        match state.order_mut(order_id) {
            Ok(order) if order.payment_status == PaymentStatus::Pending => {
                order.payment_status = PaymentStatus::Canceled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LoyaltyRepository for MemoryStore {
    async fn history(&self, user_id: i32, limit: i64) -> Result<Vec<LoyaltyEntry>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn adjust(
        &self,
        user_id: i32,
        amount: i32,
        description: &str,
    ) -> Result<LoyaltyEntry, RepositoryError> {
        self.state
            .lock()
            .unwrap()
            .apply(user_id, amount, description.to_string(), None)
    }
}

/// Event recorded by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Created(i32),
    Paid(i32),
    Status(i32, OrderStatus),
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn order_created(&self, order: &Order) {
        self.sent.lock().unwrap().push(Sent::Created(order.id));
    }

    async fn payment_succeeded(&self, order: &Order) {
        self.sent.lock().unwrap().push(Sent::Paid(order.id));
    }

    async fn status_changed(&self, order: &Order) {
        self.sent.lock().unwrap().push(Sent::Status(order.id, order.status));
    }

    async fn broadcast(&self, _text: &str) -> Result<BroadcastReport, RepositoryError> {
        Ok(BroadcastReport::default())
    }
}

/// Gateway that records requests and answers with a fixed payment.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<PaymentRequest>>,
}

impl FakeGateway {
    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(CreatedPayment {
            id: format!("pay-{}", request.order_id),
            confirmation_url: format!("https://pay.example/{}", request.order_id),
        })
    }
}
