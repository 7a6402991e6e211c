//! Domain types shared by every layer of the flower shop backend.
//!
//! Money is stored in whole rubles (`i32`), bonus points are the same unit
//! (1 point = 1 ruble).

mod status;

pub use status::{DeliveryType, OrderStatus, ParseEnumError, PaymentStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messenger platform a user is registered on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Max,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Max => "max",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User — покупатель, привязанный к одному из мессенджеров.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub telegram_id: Option<String>,
    pub max_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bonus_points: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

impl User {
    /// Every external identity populated on this user, Telegram first.
    pub fn identities(&self) -> Vec<(Platform, &str)> {
        let mut out = Vec::with_capacity(2);
        if let Some(id) = self.telegram_id.as_deref().filter(|s| !s.is_empty()) {
            out.push((Platform::Telegram, id));
        }
        if let Some(id) = self.max_id.as_deref().filter(|s| !s.is_empty()) {
            out.push((Platform::Max, id));
        }
        out
    }

    /// Platform shown to operators; Max only when the user has no Telegram id.
    pub fn primary_platform(&self) -> Platform {
        match (&self.telegram_id, &self.max_id) {
            (None, Some(_)) => Platform::Max,
            _ => Platform::Telegram,
        }
    }

    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() { "Клиент".to_string() } else { name }
    }
}

/// Identity proven by a messenger WebApp init-data signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerIdentity {
    pub platform: Platform,
    pub platform_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// Address — адрес доставки пользователя.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub street: String,
    pub house: String,
    pub apartment: Option<String>,
    pub entrance: Option<String>,
    pub floor: Option<String>,
    pub comment: Option<String>,
    pub is_default: bool,
}

impl Address {
    /// Single-line form used in notifications: `street, house, кв. N`.
    pub fn one_line(&self) -> String {
        let mut line = format!("{}, {}", self.street, self.house);
        if let Some(apartment) = self.apartment.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(", кв. ");
            line.push_str(apartment);
        }
        line
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewAddress {
    pub title: Option<String>,
    pub street: String,
    pub house: String,
    pub apartment: Option<String>,
    pub entrance: Option<String>,
    pub floor: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Catalog bouquet as seen by the pricing step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bouquet {
    pub id: i32,
    pub name: String,
    pub price: i32,
}

/// OrderItem — позиция заказа, снимок цены на момент оформления.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub bouquet_id: Option<i32>,
    pub name: String,
    pub price: i32,
    pub quantity: i32,
    pub is_constructor: bool,
    pub constructor_data: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        i64::from(self.price) * i64::from(self.quantity)
    }
}

/// Order — заказ покупателя.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub address_id: Option<i32>,
    pub delivery_type: DeliveryType,
    pub delivery_date: Option<String>,
    pub delivery_time: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub comment: Option<String>,
    pub is_anonymous: bool,
    pub card_text: Option<String>,
    pub total_price: i32,
    pub bonus_used: i32,
    pub bonus_earned: i32,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
    pub address: Option<Address>,
}

impl Order {
    /// Sum of `price × quantity` over the item snapshots.
    pub fn items_total(&self) -> i64 {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    /// Delivery fee that was folded into `total_price` at creation time.
    pub fn delivery_cost(&self) -> i64 {
        i64::from(self.total_price) - self.items_total() + i64::from(self.bonus_used)
    }
}

/// Fully priced order ready to be persisted in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: i32,
    pub address_id: Option<i32>,
    pub delivery_type: DeliveryType,
    pub delivery_date: Option<String>,
    pub delivery_time: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub comment: Option<String>,
    pub is_anonymous: bool,
    pub card_text: Option<String>,
    pub total_price: i32,
    pub bonus_used: i32,
    pub bonus_earned: i32,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub bouquet_id: Option<i32>,
    pub name: String,
    pub price: i32,
    pub quantity: i32,
    pub is_constructor: bool,
    pub constructor_data: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyKind {
    Earn,
    Spend,
}

impl LoyaltyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyKind::Earn => "earn",
            LoyaltyKind::Spend => "spend",
        }
    }

    pub fn for_amount(amount: i32) -> Self {
        if amount >= 0 { LoyaltyKind::Earn } else { LoyaltyKind::Spend }
    }
}

impl std::str::FromStr for LoyaltyKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(LoyaltyKind::Earn),
            "spend" => Ok(LoyaltyKind::Spend),
            other => Err(ParseEnumError::new("loyalty kind", other)),
        }
    }
}

/// LoyaltyEntry — запись бонусного журнала (amount > 0 начисление, < 0 списание).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyEntry {
    pub id: i32,
    pub user_id: i32,
    pub amount: i32,
    #[serde(rename = "type")]
    pub kind: LoyaltyKind,
    pub description: String,
    pub order_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltySummary {
    pub bonus_points: i32,
    pub history: Vec<LoyaltyEntry>,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    pub address_id: Option<i32>,
    #[serde(default)]
    pub delivery_type: String,
    pub delivery_date: Option<String>,
    pub delivery_time: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub comment: Option<String>,
    pub bonus_used: Option<i32>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub card_text: Option<String>,
}

/// A requested cart line: either a catalog bouquet or a constructor bouquet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub bouquet_id: Option<i32>,
    pub name: Option<String>,
    pub price: Option<i32>,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub is_constructor: bool,
    pub constructor_data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(telegram: Option<&str>, max: Option<&str>) -> User {
        User {
            id: 1,
            telegram_id: telegram.map(String::from),
            max_id: max.map(String::from),
            first_name: Some("Анна".into()),
            last_name: None,
            username: None,
            phone: None,
            bonus_points: 0,
            created_at: Utc.with_ymd_and_hms(2025, 3, 8, 9, 0, 0).unwrap(),
            addresses: Vec::new(),
        }
    }

    #[test]
    fn test_identities_lists_populated_platforms() {
        assert!(user(None, None).identities().is_empty());
        assert_eq!(
            user(Some("11"), Some("22")).identities(),
            vec![(Platform::Telegram, "11"), (Platform::Max, "22")]
        );
        assert_eq!(user(None, Some("22")).primary_platform(), Platform::Max);
        assert_eq!(user(Some("11"), Some("22")).primary_platform(), Platform::Telegram);
    }

    #[test]
    fn test_display_name_falls_back() {
        let mut u = user(Some("1"), None);
        assert_eq!(u.display_name(), "Анна");
        u.first_name = None;
        assert_eq!(u.display_name(), "Клиент");
    }

    #[test]
    fn test_deserialize_create_order_request() {
        let json = r#"
        {
            "items": [
                {"bouquetId": 5, "name": "Нежность", "price": 1, "quantity": 2},
                {"name": "Свой букет", "price": 2500, "quantity": 1,
                 "isConstructor": true, "constructorData": {"flowers": [3, 4]}}
            ],
            "deliveryType": "pickup",
            "bonusUsed": 100
        }
        "#;
        let req: CreateOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.items.len(), 2);
        assert_eq!(req.items[0].bouquet_id, Some(5));
        assert!(req.items[1].is_constructor);
        assert_eq!(req.delivery_type, "pickup");
        assert_eq!(req.bonus_used, Some(100));
        assert!(!req.is_anonymous);
    }

    #[test]
    fn test_address_one_line() {
        let mut address = Address {
            id: 1,
            user_id: 1,
            title: "Дом".into(),
            street: "ул. Приозёрная".into(),
            house: "58".into(),
            apartment: None,
            entrance: None,
            floor: None,
            comment: None,
            is_default: true,
        };
        assert_eq!(address.one_line(), "ул. Приозёрная, 58");
        address.apartment = Some("12".into());
        assert_eq!(address.one_line(), "ул. Приозёрная, 58, кв. 12");
    }

    #[test]
    fn test_loyalty_entry_serializes_type_field() {
        let entry = LoyaltyEntry {
            id: 1,
            user_id: 2,
            amount: -400,
            kind: LoyaltyKind::Spend,
            description: "Списание за заказ #7".into(),
            order_id: Some(7),
            created_at: Utc.with_ymd_and_hms(2025, 3, 8, 9, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "spend");
        assert_eq!(json["orderId"], 7);
        assert_eq!(LoyaltyKind::for_amount(-1), LoyaltyKind::Spend);
    }
}
