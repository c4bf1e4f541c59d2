use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::application::services::dispatcher::{DispatchOutcome, TickReport};
use crate::application::services::scheduler::ScheduledJob;
use crate::application::services::tracker_service::{
    PnlSummary, PositionView, TrackerService, TrackingSettingsUpdate, TrackingStatus,
};
use crate::domain::entities::tracking::{StockStopLoss, TrackingConfig, TrailingStopState};
use crate::domain::entities::transaction::{Side, Transaction};
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::entities::UserId;
use crate::domain::errors::TrackerError;
use crate::rate_limit::{rate_limit_middleware, ApiRateLimiter};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(error: &TrackerError) -> StatusCode {
    match error {
        TrackerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::ResetNotPending => StatusCode::CONFLICT,
        TrackerError::ResetExpired { .. } => StatusCode::GONE,
        TrackerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: TrackerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub symbol: String,
    /// BUY or SELL, case-insensitive
    pub side: String,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction: Transaction,
    /// Shares sold beyond the held quantity and ignored.
    pub oversold: f64,
    pub timestamp_clamped: bool,
}

/// Optional settings are applied in the same write as the toggle.
#[derive(Debug, Deserialize)]
pub struct TrackingToggleRequest {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: TrackingSettingsUpdate,
}

#[derive(Debug, Deserialize)]
pub struct StopLossRequest {
    pub stoploss_pct: f64,
}

/// `trailing_pct: null` disables the trailing stop.
#[derive(Debug, Deserialize)]
pub struct TrailingStopRequest {
    pub trailing_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct WatchlistRequest {
    pub symbol: String,
    pub target_price: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub report: TickReport,
    pub delivery: String,
}

#[derive(Debug, Serialize)]
pub struct ResetRequestResponse {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
}

fn delivery_label(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Sent => "sent".to_string(),
        DispatchOutcome::NothingToSend => "nothing_to_send".to_string(),
        DispatchOutcome::NoChannel => "no_channel".to_string(),
        DispatchOutcome::Failed(e) => format!("failed: {}", e),
    }
}

/// Build the JSON API over a shared tracker.
pub fn router(service: Arc<TrackerService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users/:user_id/channel", put(register_channel))
        .route("/users/:user_id/transactions", post(record_transaction))
        .route("/users/:user_id/positions", get(get_positions))
        .route("/users/:user_id/pnl", get(get_pnl))
        .route(
            "/users/:user_id/tracking",
            get(get_tracking_status).put(set_tracking_enabled),
        )
        .route("/users/:user_id/tracking/settings", put(update_settings))
        .route("/users/:user_id/stoploss/:symbol", put(set_symbol_stop_loss))
        .route("/users/:user_id/trailing/:symbol", put(set_trailing_stop))
        .route("/users/:user_id/jobs", get(get_scheduled_jobs))
        .route("/users/:user_id/tick", post(tick))
        .route(
            "/users/:user_id/watchlist",
            get(get_watchlist).post(add_to_watchlist),
        )
        .route(
            "/users/:user_id/watchlist/:symbol",
            delete(remove_from_watchlist),
        )
        .route(
            "/users/:user_id/reset",
            post(request_reset).delete(cancel_reset),
        )
        .route("/users/:user_id/reset/confirm", post(confirm_reset))
        .with_state(service)
}

/// The served application: tracing outermost, then the rate limiter, then
/// the body limit, so every request is counted against the budget.
pub fn app(service: Arc<TrackerService>, limiter: ApiRateLimiter, max_body_bytes: usize) -> Router {
    router(service).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
            .layer(RequestBodyLimitLayer::new(max_body_bytes)),
    )
}

async fn health() -> Json<StatusMessage> {
    Json(StatusMessage { status: "ok" })
}

async fn register_channel(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<StatusMessage> {
    service
        .register_user(user_id, &body.chat_id)
        .await
        .map_err(api_error)?;
    Ok(Json(StatusMessage { status: "registered" }))
}

async fn record_transaction(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<TransactionRequest>,
) -> ApiResult<TransactionResponse> {
    let side: Side = body
        .side
        .parse()
        .map_err(|e| api_error(TrackerError::InvalidInput(e)))?;
    let recorded = service
        .record_transaction(user_id, &body.symbol, side, body.quantity, body.price)
        .await
        .map_err(api_error)?;
    Ok(Json(TransactionResponse {
        transaction: recorded.transaction,
        oversold: recorded.update.oversold,
        timestamp_clamped: recorded.clamped,
    }))
}

async fn get_positions(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<PositionView>> {
    service.get_positions(user_id).await.map(Json).map_err(api_error)
}

async fn get_pnl(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<PnlSummary> {
    service.get_pnl(user_id).await.map(Json).map_err(api_error)
}

async fn get_tracking_status(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<TrackingStatus> {
    service
        .get_tracking_status(user_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn set_tracking_enabled(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<TrackingToggleRequest>,
) -> ApiResult<TrackingStatus> {
    service
        .set_tracking_enabled(user_id, body.enabled, body.settings)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn update_settings(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<TrackingSettingsUpdate>,
) -> ApiResult<TrackingConfig> {
    service
        .update_tracking_settings(user_id, body)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn set_symbol_stop_loss(
    State(service): State<Arc<TrackerService>>,
    Path((user_id, symbol)): Path<(UserId, String)>,
    Json(body): Json<StopLossRequest>,
) -> ApiResult<StockStopLoss> {
    service
        .set_symbol_stop_loss(user_id, &symbol, body.stoploss_pct)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn set_trailing_stop(
    State(service): State<Arc<TrackerService>>,
    Path((user_id, symbol)): Path<(UserId, String)>,
    Json(body): Json<TrailingStopRequest>,
) -> ApiResult<TrailingStopState> {
    service
        .set_trailing_stop(user_id, &symbol, body.trailing_pct)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn get_scheduled_jobs(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> Json<Vec<ScheduledJob>> {
    Json(service.scheduled_jobs(user_id))
}

async fn tick(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<TickResponse> {
    let (report, outcome) = service.tick(user_id).await.map_err(api_error)?;
    Ok(Json(TickResponse {
        report,
        delivery: delivery_label(&outcome),
    }))
}

async fn get_watchlist(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<WatchlistEntry>> {
    service.get_watchlist(user_id).await.map(Json).map_err(api_error)
}

async fn add_to_watchlist(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<WatchlistRequest>,
) -> ApiResult<WatchlistEntry> {
    service
        .add_to_watchlist(user_id, &body.symbol, body.target_price, body.notes)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn remove_from_watchlist(
    State(service): State<Arc<TrackerService>>,
    Path((user_id, symbol)): Path<(UserId, String)>,
) -> ApiResult<StatusMessage> {
    service
        .remove_from_watchlist(user_id, &symbol)
        .await
        .map_err(api_error)?;
    Ok(Json(StatusMessage { status: "removed" }))
}

async fn request_reset(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> Json<ResetRequestResponse> {
    Json(ResetRequestResponse {
        expires_at: service.request_reset(user_id),
    })
}

async fn confirm_reset(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<StatusMessage> {
    service.confirm_reset(user_id).await.map_err(api_error)?;
    Ok(Json(StatusMessage { status: "reset" }))
}

async fn cancel_reset(
    State(service): State<Arc<TrackerService>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<StatusMessage>, (StatusCode, Json<ErrorResponse>)> {
    if service.cancel_reset(user_id) {
        Ok(Json(StatusMessage { status: "cancelled" }))
    } else {
        Err(api_error(TrackerError::ResetNotPending))
    }
}
