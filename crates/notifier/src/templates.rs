//! User-facing copy for every notification, per platform.
//!
//! Telegram messages use legacy Markdown and carry a WebApp button; Max only
//! renders plain text.

use model::{DeliveryType, Order, Platform};

use crate::{AdminAlert, Customer, Message, WebAppButton};

const SHOP_NAME: &str = "Роза цветов";
const SHOP_PHONE: &str = "+7 917 876-59-58";

/// Formats rubles with `ru-RU` digit grouping (`12 300`).
pub fn format_rub(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('\u{a0}');
        }
        out.push(ch);
    }
    out
}

/// Escapes characters that legacy Markdown would treat as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn orders_button(webapp_url: &str) -> Option<WebAppButton> {
    Some(WebAppButton {
        text: "📦 Подробнее".to_string(),
        url: format!("{webapp_url}/orders"),
    })
}

fn delivery_label(delivery_type: DeliveryType) -> &'static str {
    match delivery_type {
        DeliveryType::Delivery => "Доставка",
        DeliveryType::Pickup => "Самовывоз",
    }
}

fn telegram_status_label(status: &str) -> Option<&'static str> {
    Some(match status {
        "new" => "🆕 Новый",
        "confirmed" => "✅ Подтверждён",
        "preparing" => "💐 Готовится",
        "delivering" => "🚗 В доставке",
        "completed" => "🎉 Выполнен",
        "canceled" => "❌ Отменён",
        _ => return None,
    })
}

fn max_status_copy(order_id: i32, status: &str) -> Option<(&'static str, String)> {
    let copy = match status {
        "confirmed" => (
            "Заказ подтверждён!",
            format!("Ваш заказ #{order_id} подтверждён.\nМы уже готовимся к его сборке."),
        ),
        "preparing" => (
            "Собираем ваш букет!",
            format!(
                "Ваш заказ #{order_id} уже в работе!\nНаш флорист с любовью собирает композицию."
            ),
        ),
        "delivering" => (
            "Заказ в пути!",
            format!(
                "Ваш заказ #{order_id} уже едет!\nКурьер выехал и скоро будет по указанному адресу."
            ),
        ),
        "completed" => (
            "Заказ доставлен!",
            format!(
                "Ваш заказ #{order_id} успешно выполнен!\nНадеемся, букет принесёт радость!\nСпасибо, что выбираете {SHOP_NAME}!"
            ),
        ),
        "canceled" => (
            "Заказ отменён",
            format!(
                "Ваш заказ #{order_id} был отменён.\nЕсли это по ошибке -- звоните: {SHOP_PHONE}"
            ),
        ),
        _ => return None,
    };
    Some(copy)
}

/// Status-change copy; unknown states fall back to `Статус: <raw>`.
pub fn status_change(platform: Platform, order_id: i32, status: &str, webapp_url: &str) -> Message {
    match platform {
        Platform::Telegram => {
            let label = telegram_status_label(status)
                .map(String::from)
                .unwrap_or_else(|| escape_markdown(status));
            Message {
                text: format!(
                    "🌹 *{SHOP_NAME}*\n\nЗаказ #{order_id}\nСтатус: {label}\n\nСпасибо, что выбираете нас! 💐"
                ),
                markdown: true,
                button: orders_button(webapp_url),
            }
        }
        Platform::Max => {
            let text = match max_status_copy(order_id, status) {
                Some((title, body)) => format!("{title}\n\n{body}"),
                None => format!("Заказ #{order_id}\nСтатус: {status}"),
            };
            Message::plain(text)
        }
    }
}

pub fn order_created(platform: Platform, order: &Order, webapp_url: &str) -> Message {
    let total = format_rub(i64::from(order.total_price));
    let delivery = delivery_label(order.delivery_type);
    let count = order.items.len();
    match platform {
        Platform::Telegram => {
            let mut text = format!(
                "🌹 *{SHOP_NAME}*\n\n✅ Заказ #{} оформлен!\n\nПозиций: {count}\nСумма: {total} ₽\n{delivery}\n",
                order.id
            );
            if order.bonus_earned > 0 {
                text.push_str(&format!(
                    "\n⭐ После оплаты начислится {} бонусов\n",
                    order.bonus_earned
                ));
            }
            text.push_str("\nОжидайте подтверждения. Мы свяжемся с вами в ближайшее время!");
            Message {
                text,
                markdown: true,
                button: orders_button(webapp_url),
            }
        }
        Platform::Max => {
            let mut text = format!(
                "Заказ оформлен!\n\nЗаказ #{}\nПозиций: {count}\nСумма: {total} руб.\n{delivery}\n",
                order.id
            );
            if order.bonus_earned > 0 {
                text.push_str(&format!(
                    "\nПосле оплаты вам начислится {} бонусов!\n",
                    order.bonus_earned
                ));
            }
            text.push_str("\nОжидайте подтверждения. Мы свяжемся с вами в ближайшее время!");
            Message::plain(text)
        }
    }
}

/// Delivery, date and recipient block shared by payment copy and operator alerts.
fn fulfilment_lines(order: &Order, escape: fn(&str) -> String) -> String {
    let mut text = String::new();
    match order.delivery_type {
        DeliveryType::Delivery => {
            text.push_str("Доставка");
            if let Some(address) = &order.address {
                text.push_str(": ");
                text.push_str(&escape(&address.one_line()));
            }
            text.push('\n');
        }
        DeliveryType::Pickup => text.push_str("Самовывоз\n"),
    }
    if let Some(date) = order.delivery_date.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Дата: {}", escape(date)));
        if let Some(time) = order.delivery_time.as_deref().filter(|s| !s.is_empty()) {
            text.push_str(&format!(", {}", escape(time)));
        }
        text.push('\n');
    }
    if let Some(name) = order.recipient_name.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Получатель: {}", escape(name)));
        if let Some(phone) = order.recipient_phone.as_deref().filter(|s| !s.is_empty()) {
            text.push_str(&format!(", {}", escape(phone)));
        }
        text.push('\n');
    }
    text
}

fn item_lines(order: &Order, currency: &str, escape: fn(&str) -> String) -> String {
    let mut text = String::new();
    for item in &order.items {
        text.push_str(&format!("  - {}", escape(&item.name)));
        if item.quantity > 1 {
            text.push_str(&format!(" x{}", item.quantity));
        }
        text.push_str(&format!(" — {} {currency}\n", format_rub(item.line_total())));
    }
    text
}

fn verbatim(text: &str) -> String {
    text.to_string()
}

pub fn payment_success(platform: Platform, order: &Order, webapp_url: &str) -> Message {
    let (escape, currency, markdown): (fn(&str) -> String, &str, bool) = match platform {
        Platform::Telegram => (escape_markdown as fn(&str) -> String, "₽", true),
        Platform::Max => (verbatim, "руб.", false),
    };

    let mut text = match platform {
        Platform::Telegram => format!("🌹 *{SHOP_NAME}*\n\n💳 Оплата получена!\n\nЗаказ #{}\n", order.id),
        Platform::Max => format!("Оплата получена!\n\nЗаказ #{}\n", order.id),
    };
    if !order.items.is_empty() {
        text.push_str("\nСостав заказа:\n");
        text.push_str(&item_lines(order, currency, escape));
    }
    text.push_str(&format!(
        "\nИтого: {} {currency}\n\n",
        format_rub(i64::from(order.total_price))
    ));
    text.push_str(&fulfilment_lines(order, escape));
    if order.bonus_earned > 0 {
        text.push_str(&format!(
            "\nНачислено {} бонусов на ваш счёт!\n",
            order.bonus_earned
        ));
    }
    text.push_str("\nМы уже начинаем собирать ваш букет!");

    Message {
        text,
        markdown,
        button: if markdown { orders_button(webapp_url) } else { None },
    }
}

pub fn admin_alert(platform: Platform, alert: &AdminAlert<'_>) -> Message {
    let (escape, currency, markdown): (fn(&str) -> String, &str, bool) = match platform {
        Platform::Telegram => (escape_markdown as fn(&str) -> String, "₽", true),
        Platform::Max => (verbatim, "руб.", false),
    };
    let (heading, order, customer): (&str, &Order, &Customer) = match *alert {
        AdminAlert::NewOrder { order, customer } => ("🆕 Новый заказ", order, customer),
        AdminAlert::PaymentReceived { order, customer } => ("💰 Оплата получена", order, customer),
    };

    let mut text = if markdown {
        format!("*{heading} #{}*\n\n", order.id)
    } else {
        format!("{heading} #{}\n\n", order.id)
    };
    text.push_str(&format!(
        "Клиент: {} ({})\n",
        escape(&customer.name),
        customer.platform
    ));
    text.push_str(&item_lines(order, currency, escape));
    text.push_str(&format!(
        "\nИтого: {} {currency}\n",
        format_rub(i64::from(order.total_price))
    ));
    if order.bonus_used > 0 {
        text.push_str(&format!("Оплачено бонусами: {}\n", order.bonus_used));
    }
    text.push('\n');
    text.push_str(&fulfilment_lines(order, escape));
    if order.is_anonymous {
        text.push_str("Анонимно\n");
    }
    if let Some(card) = order.card_text.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Открытка: {}\n", escape(card)));
    }
    if let Some(comment) = order.comment.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("Комментарий: {}\n", escape(comment)));
    }

    Message {
        text: text.trim_end().to_string(),
        markdown,
        button: None,
    }
}
