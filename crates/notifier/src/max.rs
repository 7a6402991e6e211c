use async_trait::async_trait;
use model::Platform;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::{Message, NotificationChannel, NotifyError};

const API_BASE: &str = "https://platform-api.max.ru";

/// Max messenger bot channel. Plain text only.
pub struct MaxChannel {
    http: Client,
    api_base: String,
    token: String,
    webapp_url: String,
}

impl MaxChannel {
    pub fn new(token: &str, webapp_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            token: token.to_string(),
            webapp_url: webapp_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Validates the token with `GET /me`; returns the bot name.
    pub async fn get_me(&self) -> Result<String, NotifyError> {
        let response = self
            .http
            .get(format!("{}/me", self.api_base))
            .header("Authorization", &self.token)
            .send()
            .await?;
        let me: Value = check(response).await?.json().await?;
        Ok(me["username"]
            .as_str()
            .or_else(|| me["name"].as_str())
            .unwrap_or_default()
            .to_string())
    }
}

async fn check(response: Response) -> Result<Response, NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Api {
        platform: Platform::Max,
        description: format!("{status}: {body}"),
    })
}

#[async_trait]
impl NotificationChannel for MaxChannel {
    fn platform(&self) -> Platform {
        Platform::Max
    }

    fn webapp_url(&self) -> &str {
        &self.webapp_url
    }

    async fn send_message(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(format!("{}/messages", self.api_base))
            .header("Authorization", &self.token)
            .query(&[("user_id", recipient)])
            .json(&json!({ "text": message.text }))
            .send()
            .await?;
        check(response).await?;
        debug!(user_id = recipient, "Max message sent");
        Ok(())
    }
}
