use async_trait::async_trait;
use model::Platform;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::{Message, NotificationChannel, NotifyError};

const API_BASE: &str = "https://api.telegram.org";

/// Envelope of every Bot API reply.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

/// Telegram Bot API channel.
pub struct TelegramChannel {
    http: Client,
    api_base: String,
    token: String,
    webapp_url: String,
}

impl TelegramChannel {
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

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Validates the token with `getMe`; returns the bot username.
    pub async fn get_me(&self) -> Result<String, NotifyError> {
        let response: ApiResponse<BotUser> =
            self.http.get(self.method_url("getMe")).send().await?.json().await?;
        let user = into_result(response)?;
        Ok(user.and_then(|u| u.username).unwrap_or_default())
    }
}

fn into_result<T>(response: ApiResponse<T>) -> Result<Option<T>, NotifyError> {
    if response.ok {
        Ok(response.result)
    } else {
        Err(NotifyError::Api {
            platform: Platform::Telegram,
            description: response.description.unwrap_or_else(|| "unknown error".into()),
        })
    }
}

/// `sendMessage` payload for a rendered message.
fn send_message_body(chat_id: &str, message: &Message) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": message.text,
    });
    if message.markdown {
        body["parse_mode"] = json!("Markdown");
    }
    if let Some(button) = &message.button {
        body["reply_markup"] = json!({
            "inline_keyboard": [[{ "text": button.text, "web_app": { "url": button.url } }]]
        });
    }
    body
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn webapp_url(&self) -> &str {
        &self.webapp_url
    }

    async fn send_message(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
        let response: ApiResponse<Value> = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&send_message_body(recipient, message))
            .send()
            .await?
            .json()
            .await?;
        into_result(response)?;
        debug!(chat_id = recipient, "Telegram message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WebAppButton;

    #[test]
    fn test_send_message_body() {
        let message = Message {
            text: "*hi*".into(),
            markdown: true,
            button: Some(WebAppButton {
                text: "Open".into(),
                url: "https://shop/orders".into(),
            }),
        };
        let body = send_message_body("123", &message);
        assert_eq!(body["chat_id"], "123");
        assert_eq!(body["parse_mode"], "Markdown");
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["web_app"]["url"],
            "https://shop/orders"
        );

        let plain = send_message_body("123", &Message::plain("hello"));
        assert!(plain.get("parse_mode").is_none());
        assert!(plain.get("reply_markup").is_none());
    }

    #[test]
    fn test_api_failure_is_an_error() {
        let response: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#)
                .unwrap();
        let err = into_result(response).unwrap_err();
        assert!(err.to_string().contains("bot was blocked"));
    }

    #[test]
    fn test_webapp_url_is_normalized() {
        let channel = TelegramChannel::new("t", "https://shop/", Duration::from_secs(1)).unwrap();
        assert_eq!(channel.webapp_url(), "https://shop");
        assert_eq!(channel.method_url("getMe"), "https://api.telegram.org/bott/getMe");
    }
}
