use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Secrets (bot tokens, payment
/// credentials, admin token) have no defaults: an absent secret disables the feature
/// that needs it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,
    /// Directory with `.sql` migrations applied at start-up.
    pub migrations_dir: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,
    /// Bearer token accepted on `/admin/*` routes.
    #[serde(default)]
    pub admin_token: Option<String>,

    // --- Messengers ---
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub max_bot_token: Option<String>,
    /// Telegram chat receiving operator alerts.
    #[serde(default)]
    pub operator_telegram_chat_id: Option<String>,
    /// Max user receiving operator alerts.
    #[serde(default)]
    pub operator_max_user_id: Option<String>,
    /// Public URL of the storefront WebApp, used in message buttons.
    pub webapp_url: String,
    /// Maximum age of a WebApp init-data signature ("24h", "30m", ...).
    #[serde(deserialize_with = "deserialize_duration")]
    pub init_data_max_age: Duration,
    /// Messages sent before a broadcast pauses.
    pub broadcast_batch_size: usize,
    /// Pause between broadcast batches.
    #[serde(deserialize_with = "deserialize_duration")]
    pub broadcast_pause: Duration,

    // --- Payment provider (YooKassa) ---
    #[serde(default)]
    pub yookassa_shop_id: Option<String>,
    #[serde(default)]
    pub yookassa_secret_key: Option<String>,
    /// Where the customer lands after paying; defaults to `{webapp_url}/orders`.
    #[serde(default)]
    pub yookassa_return_url: Option<String>,
    /// Email printed on fiscal receipts.
    pub receipt_email: String,

    // --- Outbound HTTP ---
    /// Network timeout for bot and payment API calls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub outbound_timeout: Duration,
}

/// Accepts human-readable durations like "5s", "1m", "24h".
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

/// Treats empty strings and `placeholder...` values as unset.
fn configured(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.starts_with("placeholder"))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "rosa")?
            .set_default("db_password", "rosa")?
            .set_default("db_name", "rosa_flowers")?
            .set_default("db_pool_size", 16)?
            .set_default("migrations_dir", "migrations")?
            // HTTP
            .set_default("http_port", 4000)?
            // Messengers
            .set_default("webapp_url", "http://localhost:5173")?
            .set_default("init_data_max_age", "24h")?
            .set_default("broadcast_batch_size", 25)?
            .set_default("broadcast_pause", "1s")?
            // Payments
            .set_default("receipt_email", "rozacvetov@list.ru")?
            .set_default("outbound_timeout", "10s")?
            .add_source(config::Environment::default())
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// Connection string understood by `tokio_postgres::Config`.
    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name
        )
    }

    pub fn telegram_token(&self) -> Option<&str> {
        configured(&self.telegram_bot_token)
    }

    pub fn max_token(&self) -> Option<&str> {
        configured(&self.max_bot_token)
    }

    pub fn admin_token(&self) -> Option<&str> {
        configured(&self.admin_token)
    }

    pub fn operator_telegram_chat(&self) -> Option<&str> {
        configured(&self.operator_telegram_chat_id)
    }

    pub fn operator_max_user(&self) -> Option<&str> {
        configured(&self.operator_max_user_id)
    }

    /// Shop id and secret key, only when both are present.
    pub fn yookassa_credentials(&self) -> Option<(&str, &str)> {
        Some((
            configured(&self.yookassa_shop_id)?,
            configured(&self.yookassa_secret_key)?,
        ))
    }

    pub fn payment_return_url(&self) -> String {
        configured(&self.yookassa_return_url)
            .map(String::from)
            .unwrap_or_else(|| format!("{}/orders", self.webapp_url.trim_end_matches('/')))
    }
}
