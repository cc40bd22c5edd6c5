use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::observability::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::storage::{AlertHistoryRepository, ExchangeStatusRepository};
use crate::types::alert::AlertHistory;
use crate::types::status::ExchangeStatus;

/// Read-side surface: health, metrics snapshot, feed statuses and recent
/// alert history. The full query API lives in a separate service.
pub struct ApiState {
    pub metrics: Arc<MetricsRegistry>,
    pub statuses: Arc<dyn ExchangeStatusRepository>,
    pub history: Arc<dyn AlertHistoryRepository>,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_snapshot))
        .route("/status", get(exchange_statuses))
        .route("/alerts/history", get(alert_history))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_snapshot(State(state): State<Arc<ApiState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn exchange_statuses(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ExchangeStatus>>, StatusCode> {
    state
        .statuses
        .get_all()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

#[derive(Deserialize)]
struct HistoryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn alert_history(
    State(state): State<Arc<ApiState>>,
    axum::extract::Query(query): axum::extract::Query<HistoryQuery>,
) -> Result<Json<Vec<AlertHistory>>, StatusCode> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - chrono::Duration::days(1));
    let limit = query.limit.unwrap_or(100).min(1000);

    state
        .history
        .get(from, to, limit)
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
