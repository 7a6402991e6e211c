//! Webhook input normalization.
//!
//! The provider body may reach us as raw bytes, as a JSON document encoded
//! inside a JSON string, or already parsed. [`normalize`] folds all of these
//! into one [`PaymentEvent`] so the settlement code never sees the difference.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("malformed webhook body: {0}")]
    Malformed(String),
}

/// The representations a webhook body can arrive in.
#[derive(Debug, Clone)]
pub enum WebhookBody<'a> {
    Raw(&'a [u8]),
    Text(&'a str),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Canceled,
    Other(String),
}

impl PaymentEventKind {
    fn from_event(event: &str) -> Self {
        match event {
            "payment.succeeded" => PaymentEventKind::Succeeded,
            "payment.canceled" => PaymentEventKind::Canceled,
            other => PaymentEventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentEventKind::Succeeded => "payment.succeeded",
            PaymentEventKind::Canceled => "payment.canceled",
            PaymentEventKind::Other(other) => other,
        }
    }
}

/// Canonical webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub kind: PaymentEventKind,
    /// `object.metadata.orderId`; `None` when absent or not a number.
    pub order_id: Option<i32>,
    pub payment_id: Option<String>,
}

/// Parses any supported body representation into a [`PaymentEvent`].
///
/// # Errors
/// Returns [`WebhookError::Malformed`] when the body is not JSON or not a JSON object.
pub fn normalize(body: WebhookBody<'_>) -> Result<PaymentEvent, WebhookError> {
    let value = match body {
        WebhookBody::Raw(bytes) => serde_json::from_slice::<Value>(bytes)
            .map_err(|e| WebhookError::Malformed(e.to_string()))?,
        WebhookBody::Text(text) => serde_json::from_str::<Value>(text)
            .map_err(|e| WebhookError::Malformed(e.to_string()))?,
        WebhookBody::Json(value) => value,
    };

    // A JSON string holding the document itself.
    let value = match value {
        Value::String(inner) => serde_json::from_str::<Value>(&inner)
            .map_err(|e| WebhookError::Malformed(e.to_string()))?,
        other => other,
    };

    if !value.is_object() {
        return Err(WebhookError::Malformed("expected a JSON object".into()));
    }

    let kind = PaymentEventKind::from_event(value["event"].as_str().unwrap_or_default());
    let object = &value["object"];
    let order_id = order_id_of(&object["metadata"]["orderId"]);
    let payment_id = object["id"].as_str().map(String::from);

    Ok(PaymentEvent {
        kind,
        order_id,
        payment_id,
    })
}

fn order_id_of(value: &Value) -> Option<i32> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUCCEEDED: &str = r#"{
        "type": "notification",
        "event": "payment.succeeded",
        "object": {
            "id": "2d9a6c1e-000f-5000-9000-1b8a5f1a3e43",
            "status": "succeeded",
            "metadata": { "orderId": "17" }
        }
    }"#;

    #[test]
    fn test_raw_bytes() {
        let event = normalize(WebhookBody::Raw(SUCCEEDED.as_bytes())).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.order_id, Some(17));
        assert_eq!(
            event.payment_id.as_deref(),
            Some("2d9a6c1e-000f-5000-9000-1b8a5f1a3e43")
        );
    }

    #[test]
    fn test_all_representations_agree() {
        let from_raw = normalize(WebhookBody::Raw(SUCCEEDED.as_bytes())).unwrap();
        let from_text = normalize(WebhookBody::Text(SUCCEEDED)).unwrap();
        let parsed: Value = serde_json::from_str(SUCCEEDED).unwrap();
        let from_json = normalize(WebhookBody::Json(parsed)).unwrap();
        let encoded = serde_json::to_string(&Value::String(SUCCEEDED.to_string())).unwrap();
        let from_string = normalize(WebhookBody::Raw(encoded.as_bytes())).unwrap();

        assert_eq!(from_raw, from_text);
        assert_eq!(from_raw, from_json);
        assert_eq!(from_raw, from_string);
    }

    #[test]
    fn test_numeric_order_id_and_cancel_event() {
        let body = json!({
            "event": "payment.canceled",
            "object": { "id": "p1", "metadata": { "orderId": 5 } }
        });
        let event = normalize(WebhookBody::Json(body)).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Canceled);
        assert_eq!(event.order_id, Some(5));
    }

    #[test]
    fn test_missing_or_garbage_order_id() {
        let no_metadata = json!({ "event": "payment.succeeded", "object": { "id": "p1" } });
        assert_eq!(normalize(WebhookBody::Json(no_metadata)).unwrap().order_id, None);

        let garbage = json!({
            "event": "payment.succeeded",
            "object": { "metadata": { "orderId": "abc" } }
        });
        assert_eq!(normalize(WebhookBody::Json(garbage)).unwrap().order_id, None);
    }

    #[test]
    fn test_unknown_event_is_kept() {
        let body = json!({ "event": "refund.succeeded", "object": {} });
        let event = normalize(WebhookBody::Json(body)).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Other("refund.succeeded".into()));
        assert_eq!(event.kind.as_str(), "refund.succeeded");
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(normalize(WebhookBody::Raw(b"not json")).is_err());
        assert!(normalize(WebhookBody::Raw(b"")).is_err());
        assert!(normalize(WebhookBody::Text("[1, 2]")).is_err());
        assert!(normalize(WebhookBody::Json(Value::String("{oops".into()))).is_err());
    }
}
