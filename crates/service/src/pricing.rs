//! Order pricing: subtotal, bonus redemption, delivery fee, bonus accrual.
//!
//! Everything here is pure arithmetic on whole rubles in `i64`; the caller
//! resolves catalog prices and the live balance first.

use model::DeliveryType;
use std::collections::HashMap;

pub const DELIVERY_PRICE: &str = "delivery_price";
pub const FREE_DELIVERY_FROM: &str = "free_delivery_from";
pub const BONUS_PERCENT: &str = "bonus_percent";
pub const MAX_BONUS_DISCOUNT: &str = "max_bonus_discount";

/// Shop settings that drive pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingSettings {
    pub delivery_price: i64,
    /// Post-bonus total from which delivery is free.
    pub free_delivery_from: i64,
    /// Share of the subtotal credited after payment, in percent.
    pub bonus_percent: i64,
    /// Largest share of the subtotal payable with bonus points, in percent.
    pub max_bonus_discount: i64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            delivery_price: 300,
            free_delivery_from: 3000,
            bonus_percent: 5,
            max_bonus_discount: 20,
        }
    }
}

impl PricingSettings {
    pub const KEYS: [&'static str; 4] =
        [DELIVERY_PRICE, FREE_DELIVERY_FROM, BONUS_PERCENT, MAX_BONUS_DISCOUNT];

    /// Reads settings from raw key/value pairs. Missing, unparsable or negative
    /// values fall back to the defaults; percentages are capped at 100.
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: i64| {
            values
                .get(key)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|v| *v >= 0)
                .unwrap_or(fallback)
        };
        Self {
            delivery_price: read(DELIVERY_PRICE, defaults.delivery_price),
            free_delivery_from: read(FREE_DELIVERY_FROM, defaults.free_delivery_from),
            bonus_percent: read(BONUS_PERCENT, defaults.bonus_percent).min(100),
            max_bonus_discount: read(MAX_BONUS_DISCOUNT, defaults.max_bonus_discount).min(100),
        }
    }

    /// Maximum bonus points payable on an order with this subtotal.
    pub fn redemption_cap(&self, subtotal: i64) -> i64 {
        subtotal.max(0).saturating_mul(self.max_bonus_discount.clamp(0, 100)) / 100
    }
}

/// Result of pricing an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Sum of `price × quantity`, before any discount or fee.
    pub subtotal: i64,
    pub bonus_used: i64,
    pub delivery_fee: i64,
    pub total_price: i64,
    /// Credited only once the order is paid.
    pub bonus_earned: i64,
}

/// Prices an order.
///
/// Applied bonus is `min(requested, balance, cap)`. The delivery fee is added
/// when the post-bonus total is below the free-delivery threshold. Accrual is
/// computed from the subtotal, never from the charged total.
pub fn quote(
    subtotal: i64,
    delivery_type: DeliveryType,
    requested_bonus: i64,
    balance: i64,
    settings: &PricingSettings,
) -> Quote {
    let bonus_used = requested_bonus
        .min(balance)
        .min(settings.redemption_cap(subtotal))
        .max(0);

    let mut total_price = subtotal - bonus_used;
    let delivery_fee = match delivery_type {
        DeliveryType::Delivery if total_price < settings.free_delivery_from => {
            settings.delivery_price
        }
        _ => 0,
    };
    total_price += delivery_fee;

    Quote {
        subtotal,
        bonus_used,
        delivery_fee,
        total_price,
        bonus_earned: subtotal.max(0).saturating_mul(settings.bonus_percent.clamp(0, 100)) / 100,
    }
}
