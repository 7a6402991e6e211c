//! HTTP handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use model::{CreateOrderRequest, NewAddress, OrderStatus, User};
use notifier::BroadcastReport;
use payment_gateway::WebhookBody;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::AppState;
use crate::auth::{AdminAuth, MessengerUser};
use crate::error::ApiError;

const BROADCAST_MAX_CHARS: usize = 4000;

type ApiResult<T> = Result<T, ApiError>;

fn parse_status(raw: &str) -> ApiResult<OrderStatus> {
    raw.trim()
        .parse()
        .map_err(|e: model::ParseEnumError| ApiError::BadRequest(e.to_string()))
}

async fn current_user(state: &AppState, user: &MessengerUser) -> ApiResult<User> {
    Ok(state.users.resolve(&user.0).await?)
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

// --- Customer ---

pub async fn profile(State(state): State<AppState>, user: MessengerUser) -> ApiResult<Json<User>> {
    Ok(Json(state.users.profile(&user.0).await?))
}

pub async fn add_address(
    State(state): State<AppState>,
    user: MessengerUser,
    Json(address): Json<NewAddress>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    let created = state.users.add_address(user.id, &address).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn loyalty(State(state): State<AppState>, user: MessengerUser) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    Ok(Json(state.users.loyalty(user.id).await?))
}

pub async fn list_orders(State(state): State<AppState>, user: MessengerUser) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    Ok(Json(state.orders.list_orders_for_user(user.id).await?))
}

pub async fn create_order(
    State(state): State<AppState>,
    user: MessengerUser,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    let order = state.orders.create_order(user.id, &request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: MessengerUser,
    Path(order_id): Path<i32>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    Ok(Json(state.orders.get_order_for_user(user.id, order_id).await?))
}

// --- Payments ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    order_id: i32,
}

pub async fn create_payment(
    State(state): State<AppState>,
    user: MessengerUser,
    Json(body): Json<CreatePaymentBody>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &user).await?;
    Ok(Json(state.payments.create_payment(user.id, body.order_id).await?))
}

/// Provider-facing: always acknowledged, whatever happened inside.
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> Json<serde_json::Value> {
    match state.payments.handle_webhook(WebhookBody::Raw(&body)).await {
        Ok(outcome) => {
            info!(outcome = outcome.as_str(), "Payment webhook processed");
            state.metrics.record_webhook(outcome.as_str());
        }
        Err(e) => {
            error!("Payment webhook processing failed: {}", e);
            state.metrics.record_webhook("error");
        }
    }
    Json(json!({ "success": true }))
}

// --- Admin ---

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    status: Option<String>,
}

pub async fn admin_list_orders(
    _: AdminAuth,
    State(state): State<AppState>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<impl IntoResponse> {
    let status = match filter.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_status(raw)?),
    };
    Ok(Json(state.orders.list_orders(status).await?))
}

pub async fn admin_get_order(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orders.get_order(order_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    status: String,
}

pub async fn admin_change_status(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    Json(body): Json<StatusBody>,
) -> ApiResult<impl IntoResponse> {
    let next = parse_status(&body.status)?;
    Ok(Json(state.orders.change_status(order_id, next).await?))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
    #[serde(default)]
    message: String,
}

pub async fn admin_broadcast(
    _: AdminAuth,
    State(state): State<AppState>,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<BroadcastReport>> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message is required".into()));
    }
    if message.chars().count() > BROADCAST_MAX_CHARS {
        return Err(ApiError::BadRequest(format!(
            "message must not exceed {BROADCAST_MAX_CHARS} characters"
        )));
    }

    let report = state.notifier.broadcast(message).await.map_err(|e| {
        warn!("Broadcast could not load recipients: {}", e);
        ApiError::Service(e.into())
    })?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    amount: i32,
    description: Option<String>,
}

pub async fn admin_adjust_bonus(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Json(body): Json<AdjustBody>,
) -> ApiResult<impl IntoResponse> {
    let entry = state
        .users
        .adjust_bonus(user_id, body.amount, body.description.as_deref())
        .await?;
    Ok(Json(entry))
}
