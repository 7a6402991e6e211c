//! Flower shop backend.
//!
//! Wires configuration, the Postgres pool, messenger channels, the payment
//! provider and the services into the HTTP server, then serves until
//! Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app_config::AppConfig;
use model::Platform;
use notifier::{BroadcastPolicy, Dispatcher, MaxChannel, Notifier, TelegramChannel};
use payment_gateway::{DisabledGateway, PaymentGateway, YooKassaClient};
use repository::{
    PgCatalogRepository, PgLoyaltyRepository, PgOrdersRepository, PgSettingsRepository,
    PgUsersRepository,
};
use server::{AppState, AuthConfig, Server};
use service::{OrderServiceImpl, PaymentServiceImpl, UserServiceImpl};

/// Initialize the tracing subscriber for logging
fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Builds the notification dispatcher. A channel whose token is missing or
/// rejected by the platform is left out with a warning.
async fn build_dispatcher(
    config: &AppConfig,
    users: Arc<PgUsersRepository>,
) -> Result<Dispatcher<PgUsersRepository>> {
    let policy = BroadcastPolicy {
        batch_size: config.broadcast_batch_size.max(1),
        pause: config.broadcast_pause,
    };
    let mut dispatcher = Dispatcher::new(users, policy);

    match config.telegram_token() {
        Some(token) => {
            let channel = TelegramChannel::new(token, &config.webapp_url, config.outbound_timeout)
                .context("Failed to build Telegram client")?;
            match channel.get_me().await {
                Ok(username) => {
                    info!("Telegram bot @{} connected", username);
                    dispatcher = dispatcher.with_channel(Arc::new(channel));
                }
                Err(e) => warn!("Telegram bot token rejected, channel disabled: {}", e),
            }
        }
        None => warn!("TELEGRAM_BOT_TOKEN is not set, Telegram notifications disabled"),
    }

    match config.max_token() {
        Some(token) => {
            let channel = MaxChannel::new(token, &config.webapp_url, config.outbound_timeout)
                .context("Failed to build Max client")?;
            match channel.get_me().await {
                Ok(name) => {
                    info!("Max bot {} connected", name);
                    dispatcher = dispatcher.with_channel(Arc::new(channel));
                }
                Err(e) => warn!("Max bot token rejected, channel disabled: {}", e),
            }
        }
        None => warn!("MAX_BOT_TOKEN is not set, Max notifications disabled"),
    }

    if let Some(chat) = config.operator_telegram_chat() {
        dispatcher = dispatcher.with_operator(Platform::Telegram, chat);
    }
    if let Some(user) = config.operator_max_user() {
        dispatcher = dispatcher.with_operator(Platform::Max, user);
    }
    Ok(dispatcher)
}

fn build_gateway(config: &AppConfig) -> Result<Arc<dyn PaymentGateway>> {
    match config.yookassa_credentials() {
        Some((shop_id, secret_key)) => {
            let client = YooKassaClient::new(shop_id, secret_key, config.outbound_timeout)
                .context("Failed to build YooKassa client")?;
            info!("YooKassa payments enabled for shop {}", shop_id);
            Ok(Arc::new(client))
        }
        None => {
            warn!("YooKassa credentials are not set, payment creation disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    info!("Flower shop backend starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let pool = db::init_db_pool(&config)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized successfully");

    let users = Arc::new(PgUsersRepository::new(pool.clone()));
    let orders = Arc::new(PgOrdersRepository::new(pool.clone()));
    let catalog = Arc::new(PgCatalogRepository::new(pool.clone()));
    let settings = Arc::new(PgSettingsRepository::new(pool.clone()));
    let loyalty = Arc::new(PgLoyaltyRepository::new(pool));

    let notifier: Arc<dyn Notifier> = Arc::new(build_dispatcher(&config, users.clone()).await?);
    let gateway = build_gateway(&config)?;

    let order_service = OrderServiceImpl::new(
        orders.clone(),
        users.clone(),
        catalog,
        settings,
        notifier.clone(),
    );
    let payment_service = PaymentServiceImpl::new(
        orders,
        gateway,
        notifier.clone(),
        config.receipt_email.clone(),
        config.payment_return_url(),
    );
    let user_service = UserServiceImpl::new(users, loyalty);

    let auth = AuthConfig {
        telegram_bot_token: config.telegram_token().map(String::from),
        max_bot_token: config.max_token().map(String::from),
        admin_token: config.admin_token().map(String::from),
        init_data_max_age: config.init_data_max_age,
    };
    if auth.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set, admin routes are closed");
    }

    let state = AppState::new(
        Arc::new(order_service),
        Arc::new(payment_service),
        Arc::new(user_service),
        notifier,
        auth,
    )?;

    Server::new(config.http_port, state).start().await?;

    info!("Application stopped");
    Ok(())
}
