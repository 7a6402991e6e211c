use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::{CreatedPayment, GatewayError, PaymentGateway, PaymentRequest};

const API_BASE: &str = "https://api.yookassa.ru/v3";
const CURRENCY: &str = "RUB";
/// Provider limit on a receipt line description.
const MAX_LINE_NAME: usize = 128;

/// YooKassa REST client (no SDK dependency).
pub struct YooKassaClient {
    http: Client,
    api_base: String,
    shop_id: String,
    secret_key: String,
}

impl YooKassaClient {
    pub fn new(shop_id: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            shop_id: shop_id.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Points the client at another API root (sandbox or a local stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

fn money(value: i64) -> Value {
    json!({ "value": format!("{value}.00"), "currency": CURRENCY })
}

/// JSON body of `POST /payments`.
fn payment_body(request: &PaymentRequest) -> Value {
    let items: Vec<Value> = request
        .lines
        .iter()
        .map(|line| {
            json!({
                "description": line.name.chars().take(MAX_LINE_NAME).collect::<String>(),
                "quantity": line.quantity.to_string(),
                "amount": money(line.price),
                "vat_code": 1,
                "payment_subject": "commodity",
                "payment_mode": "full_payment",
            })
        })
        .collect();

    json!({
        "amount": money(i64::from(request.amount)),
        "confirmation": {
            "type": "redirect",
            "return_url": request.return_url,
        },
        "capture": true,
        "description": request.description,
        "receipt": {
            "customer": { "email": request.customer_email },
            "items": items,
        },
        "metadata": { "orderId": request.order_id.to_string() },
    })
}

#[async_trait]
impl PaymentGateway for YooKassaClient {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CreatedPayment, GatewayError> {
        let response = self
            .http
            .post(format!("{}/payments", self.api_base))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&payment_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(order_id = request.order_id, %status, "YooKassa API error: {}", body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response.json().await?;
        let id = data["id"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("missing payment id: {data}")))?;
        let confirmation_url = data["confirmation"]["confirmation_url"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("missing confirmation url: {data}")))?;

        info!(order_id = request.order_id, payment_id = id, "Payment created");
        Ok(CreatedPayment {
            id: id.to_string(),
            confirmation_url: confirmation_url.to_string(),
        })
    }
}
