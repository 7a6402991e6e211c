//! Request authentication.
//!
//! Customers authenticate with the WebApp init data their messenger hands to
//! the storefront (`x-telegram-init-data` or `x-max-init-data`). The data is
//! signed with a key derived from the bot token:
//! `HMAC-SHA256(key = HMAC-SHA256("WebAppData", bot_token), data_check_string)`,
//! where the data check string is every field except `hash`, sorted by key and
//! joined as `key=value` lines.
//!
//! Operators authenticate with a fixed bearer token.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use model::{MessengerIdentity, Platform};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::form_urlencoded;

use crate::AppState;
use crate::error::ApiError;

pub const TELEGRAM_INIT_DATA: &str = "x-telegram-init-data";
pub const MAX_INIT_DATA: &str = "x-max-init-data";

/// Secrets used to authenticate requests.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub telegram_bot_token: Option<String>,
    pub max_bot_token: Option<String>,
    pub admin_token: Option<String>,
    pub init_data_max_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitDataError {
    #[error("hash is missing")]
    MissingHash,
    #[error("signature mismatch")]
    BadSignature,
    #[error("auth_date is missing")]
    MissingAuthDate,
    #[error("init data is too old")]
    Expired,
    #[error("user is missing")]
    MissingUser,
    #[error("bad user payload: {0}")]
    BadUser(String),
}

/// `user` field of the init data.
#[derive(Debug, Deserialize)]
struct WebAppUser {
    id: Value,
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
    /// Max sends a single display name instead of first/last.
    name: Option<String>,
}

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<HmacSha256, InitDataError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| InitDataError::BadSignature)?;
    mac.update(data);
    Ok(mac)
}

/// Key derivations accepted for a platform. Max bridges have been seen using
/// the hex form of the derived key.
fn secret_keys(platform: Platform, bot_token: &str) -> Result<Vec<Vec<u8>>, InitDataError> {
    let secret = hmac(b"WebAppData", bot_token.as_bytes())?
        .finalize()
        .into_bytes()
        .to_vec();
    Ok(match platform {
        Platform::Telegram => vec![secret],
        Platform::Max => {
            let hex_key = hex::encode(&secret).into_bytes();
            vec![secret, hex_key]
        }
    })
}

/// Fully percent-decodes a value that was URL-encoded as a whole.
fn decode_whole(raw: &str) -> String {
    form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Splits init data into its sorted data check string and the hex hash.
fn check_string(init_data: &str) -> Option<(String, String, Vec<(String, String)>)> {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(init_data.as_bytes())
        .into_owned()
        .collect();
    let hash_at = pairs.iter().position(|(k, _)| k == "hash")?;
    let (_, hash) = pairs.remove(hash_at);
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let check = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");
    Some((check, hash, pairs))
}

/// Validates init data and extracts the messenger identity.
///
/// `now` is the current Unix time in seconds. `auth_date` may be given in
/// seconds or milliseconds.
pub fn verify_init_data(
    platform: Platform,
    init_data: &str,
    bot_token: &str,
    max_age: Duration,
    now: i64,
) -> Result<MessengerIdentity, InitDataError> {
    let mut candidates = vec![init_data.to_string()];
    if platform == Platform::Max {
        let decoded = decode_whole(init_data);
        if decoded != init_data {
            candidates.insert(0, decoded);
        }
    }

    let keys = secret_keys(platform, bot_token)?;
    let mut saw_hash = false;
    let mut verified = None;
    'outer: for candidate in &candidates {
        let Some((check, hash, pairs)) = check_string(candidate) else {
            continue;
        };
        saw_hash = true;
        let Ok(expected) = hex::decode(&hash) else {
            continue;
        };
        for key in &keys {
            if hmac(key, check.as_bytes())?.verify_slice(&expected).is_ok() {
                verified = Some(pairs);
                break 'outer;
            }
        }
    }
    let pairs = match verified {
        Some(pairs) => pairs,
        None if saw_hash => return Err(InitDataError::BadSignature),
        None => return Err(InitDataError::MissingHash),
    };
    let field = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let auth_date: i64 = field("auth_date")
        .and_then(|v| v.parse().ok())
        .ok_or(InitDataError::MissingAuthDate)?;
    let auth_date = if auth_date > 10_000_000_000 {
        auth_date / 1000
    } else {
        auth_date
    };
    if now - auth_date > max_age.as_secs() as i64 {
        return Err(InitDataError::Expired);
    }

    let user: WebAppUser = serde_json::from_str(field("user").ok_or(InitDataError::MissingUser)?)
        .map_err(|e| InitDataError::BadUser(e.to_string()))?;
    let platform_id = match &user.id {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        other => return Err(InitDataError::BadUser(format!("bad id {other}"))),
    };

    Ok(MessengerIdentity {
        platform,
        platform_id,
        first_name: user
            .first_name
            .or(user.name)
            .unwrap_or_else(|| "User".to_string()),
        last_name: user.last_name,
        username: user.username,
    })
}

/// Verified messenger identity of the caller.
#[derive(Debug, Clone)]
pub struct MessengerUser(pub MessengerIdentity);

impl FromRequestParts<AppState> for MessengerUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        };
        let (platform, init_data, token) = if let Some(data) = header(TELEGRAM_INIT_DATA) {
            (Platform::Telegram, data, state.auth.telegram_bot_token.as_deref())
        } else if let Some(data) = header(MAX_INIT_DATA) {
            (Platform::Max, data, state.auth.max_bot_token.as_deref())
        } else {
            return Err(ApiError::Unauthorized(
                "Messenger auth data required (Telegram or Max)".into(),
            ));
        };

        let Some(token) = token else {
            warn!(%platform, "Init data received but the bot token is not configured");
            return Err(ApiError::Unauthorized(format!("{platform} auth is not configured")));
        };

        let now = chrono::Utc::now().timestamp();
        verify_init_data(platform, init_data, token, state.auth.init_data_max_age, now)
            .map(MessengerUser)
            .map_err(|e| {
                warn!(%platform, "Init data rejected: {}", e);
                ApiError::Unauthorized(format!("Invalid {platform} init data"))
            })
    }
}

/// Marker extractor for operator-only routes.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.auth.admin_token.as_deref() else {
            return Err(ApiError::Unauthorized("Admin access is not configured".into()));
        };
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match token {
            Some(token) if token == expected => Ok(AdminAuth),
            Some(_) => {
                warn!(uri = %parts.uri, "Admin token rejected");
                Err(ApiError::Unauthorized("Invalid admin token".into()))
            }
            None => Err(ApiError::Unauthorized("Admin token required".into())),
        }
    }
}
