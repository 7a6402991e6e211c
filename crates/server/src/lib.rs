//! Server crate provides the HTTP surface of the flower shop.
//!
//! Customer routes authenticate with messenger WebApp init data, operator
//! routes with a bearer token, and the payment webhook is open to the
//! provider and always acknowledged.

pub mod auth;
mod error;
mod metrics;
mod routes;

pub use auth::AuthConfig;
pub use error::ApiError;
pub use metrics::Metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post, put};
use notifier::Notifier;
use service::{OrderService, PaymentService, UserService};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Application state shared between request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<dyn PaymentService>,
    pub users: Arc<dyn UserService>,
    pub notifier: Arc<dyn Notifier>,
    pub auth: Arc<AuthConfig>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        orders: Arc<dyn OrderService>,
        payments: Arc<dyn PaymentService>,
        users: Arc<dyn UserService>,
        notifier: Arc<dyn Notifier>,
        auth: AuthConfig,
    ) -> Result<Self> {
        Ok(Self {
            orders,
            payments,
            users,
            notifier,
            auth: Arc::new(auth),
            metrics: Arc::new(Metrics::new().context("Failed to register metrics")?),
        })
    }
}

/// Server represents the HTTP server of the shop.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        info!("Initializing HTTP server on port {}", port);
        Self { port, state }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(self) -> Result<()> {
        let app = create_router(self.state);

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/user/profile", get(routes::profile))
        .route("/user/address", post(routes::add_address))
        .route("/user/loyalty", get(routes::loyalty))
        .route("/orders", get(routes::list_orders).post(routes::create_order))
        .route("/orders/{id}", get(routes::get_order))
        .route("/payment/create", post(routes::create_payment))
        .route("/payment/webhook", post(routes::payment_webhook))
        .route("/admin/orders", get(routes::admin_list_orders))
        .route("/admin/orders/{id}", get(routes::admin_get_order))
        .route("/admin/orders/{id}/status", put(routes::admin_change_status))
        .route("/admin/broadcast", post(routes::admin_broadcast))
        .route("/admin/loyalty/{user_id}/adjust", post(routes::admin_adjust_bonus))
        .layer(axum::middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::metrics_middleware,
        ))
        .with_state(state)
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
