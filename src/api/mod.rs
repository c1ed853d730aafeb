//! HTTP API
//!
//! Thin axum layer over [`GoldService`]. Every response uses the
//! `ApiResponse` envelope.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::GoldError;
use crate::history::{MAX_PAGE, MIN_PAGE};
use crate::scheduler::SchedulerStatus;
use crate::service::GoldService;
use crate::settings::{Settings, SettingsPatch};
use crate::types::{PriceChange, PriceRecord, Quote, SourceType};

const DEFAULT_HISTORY_LIMIT: usize = 60;

/// Standard response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// One product's quote out of the current record
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    pub timestamp: DateTime<Utc>,
    pub buy: rust_decimal::Decimal,
    pub sell: rust_decimal::Decimal,
    pub price_change: PriceChange,
    pub today_change: PriceChange,
    pub source_type: SourceType,
    pub update_time: Option<DateTime<Utc>>,
    pub change_count: u32,
    pub is_stale: bool,
}

impl ProductView {
    fn new(record: &PriceRecord, quote: Quote) -> Self {
        Self {
            timestamp: record.timestamp,
            buy: quote.buy,
            sell: quote.sell,
            price_change: record.price_change,
            today_change: record.today_change,
            source_type: record.source_type,
            update_time: record.update_time,
            change_count: record.change_count,
            is_stale: record.is_stale,
        }
    }
}

/// One page of history, newest first
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<PriceRecord>,
    /// Records retained, across all pages
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    #[serde(flatten)]
    pub settings: Settings,
    pub current_interval_secs: Option<i64>,
    pub unchanged_streak: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub has_data: bool,
    pub records_count: usize,
    pub scheduler: SchedulerStatus,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

fn status_for(err: &GoldError) -> StatusCode {
    match err {
        GoldError::NotFound | GoldError::NoData => StatusCode::NOT_FOUND,
        GoldError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GoldError::Validation(_) => StatusCode::BAD_REQUEST,
        GoldError::SourceUnavailable { .. } | GoldError::AllSourcesUnavailable { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GoldError::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, GoldError>) -> Response {
    match result {
        Ok(data) => Json(ApiResponse::success(data)).into_response(),
        Err(err) => (
            status_for(&err),
            Json(ApiResponse::<T>::error(err.to_string())),
        )
            .into_response(),
    }
}

fn api_disabled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error("API_DISABLED")),
    )
        .into_response()
}

/// Create the API router with all endpoints
pub fn create_router(service: Arc<GoldService>) -> Router {
    Router::new()
        .route("/api/gold/current", get(get_current))
        .route("/api/gold/bar", get(get_bar))
        .route("/api/gold/ornament", get(get_ornament))
        .route("/api/gold/history", get(get_history))
        .route("/api/gold/history/today", get(get_history_today))
        .route("/api/gold/summary", get(get_summary))
        .route("/api/gold/refresh", post(post_refresh))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/health", get(get_health))
        .with_state(service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /api/gold/current
async fn get_current(State(service): State<Arc<GoldService>>) -> Response {
    if !service.get_settings().public_api_enabled {
        return api_disabled();
    }
    respond(service.current())
}

/// GET /api/gold/bar
async fn get_bar(State(service): State<Arc<GoldService>>) -> Response {
    respond(service.current().map(|r| ProductView::new(&r, r.bar)))
}

/// GET /api/gold/ornament
async fn get_ornament(State(service): State<Arc<GoldService>>) -> Response {
    respond(service.current().map(|r| ProductView::new(&r, r.ornament)))
}

/// GET /api/gold/history?limit=60&offset=0
async fn get_history(
    Query(query): Query<HistoryQuery>,
    State(service): State<Arc<GoldService>>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(MIN_PAGE, MAX_PAGE);
    let offset = query.offset.unwrap_or(0);
    respond(Ok(HistoryPage {
        records: service.history(limit, offset),
        total: service.records_count(),
        limit,
        offset,
    }))
}

/// GET /api/gold/history/today
async fn get_history_today(State(service): State<Arc<GoldService>>) -> Response {
    respond(Ok(service.history_today()))
}

/// GET /api/gold/summary
async fn get_summary(State(service): State<Arc<GoldService>>) -> Response {
    respond(service.summary())
}

/// POST /api/gold/refresh
async fn post_refresh(State(service): State<Arc<GoldService>>) -> Response {
    respond(service.force_refresh().await)
}

/// GET /api/settings
async fn get_settings(State(service): State<Arc<GoldService>>) -> impl IntoResponse {
    let status = service.status();
    Json(ApiResponse::success(SettingsView {
        settings: service.get_settings(),
        current_interval_secs: status.next_wait_secs,
        unchanged_streak: status.unchanged_streak,
    }))
}

/// POST /api/settings
async fn post_settings(
    State(service): State<Arc<GoldService>>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    respond(service.update_settings(&patch).map_err(GoldError::from))
}

/// GET /api/health
async fn get_health(State(service): State<Arc<GoldService>>) -> impl IntoResponse {
    let records_count = service.records_count();
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        has_data: service.current().is_ok(),
        records_count,
        scheduler: service.status(),
    }))
}
