//! API route definitions.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::analysis::{self, DashboardStats, SiteStatus};
use crate::export::{self, ExportFormat};
use crate::ingest::ExternalReport;
use crate::model::{now_millis, MonitoredSite, SiteUpdate, TestResult};
use crate::scheduler::QueueSnapshot;
use crate::storage::StoreError;
use crate::stream::StreamEvent;

pub const DEFAULT_HISTORY_LIMIT: usize = 30;
pub const MAX_HISTORY_LIMIT: usize = 1000;
pub const DEFAULT_STATS_DAYS: u32 = 7;
pub const DEFAULT_EXPORT_DAYS: u32 = 30;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tunnels", get(list_tunnels))
        .route("/tunnels/{id}", put(update_tunnel))
        .route("/tunnels/{id}/history", get(tunnel_history))
        .route("/tunnels/{id}/test", post(trigger_test))
        .route("/tunnels/{id}/test-stream", get(test_stream))
        .route("/dashboard/current-status", get(current_status))
        .route("/dashboard/stats/{period}", get(dashboard_stats))
        .route("/dashboard/alerts", get(dashboard_alerts))
        .route("/export/csv", get(export_csv))
        .route("/export/json", get(export_json))
        .route("/webhooks/github-test-result", post(ingest_result))
        .route("/queue", get(queue_status))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "store": state.store.backend_name(),
            "environment": state.config.server.environment,
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_tunnels(State(state): State<AppState>) -> Result<Json<Vec<MonitoredSite>>, ApiError> {
    Ok(Json(state.store.list_sites().await?))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Clamp a requested history length to `1..=MAX_HISTORY_LIMIT`.
pub fn history_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

async fn tunnel_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TestResult>>, ApiError> {
    let site = state.store.get_site(&id).await?;
    let history = state
        .store
        .history(&site.id, history_limit(query.limit))
        .await?;
    Ok(Json(history))
}

async fn trigger_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let site = state.store.get_site(&id).await?;
    let handle = state.queue.enqueue(&site.id)?;
    info!(site = %site.id, job = %handle.job_id, "Test requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Test queued",
            "tunnelId": site.id,
        })),
    ))
}

async fn test_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let site = state.store.get_site(&id).await?;

    // Subscribe under the job id before the job exists so no event of this run is missed.
    let job_id = Uuid::new_v4();
    let rx = state.hub.subscribe(job_id);
    let handle = match state.queue.submit(job_id, &site.id) {
        Ok(handle) => handle,
        Err(e) => {
            state.hub.unsubscribe(job_id);
            return Err(e.into());
        }
    };
    info!(site = %site.id, job = %handle.job_id, "Streaming test requested");

    let events = UnboundedReceiverStream::new(rx).map(|event: StreamEvent| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().comment("unserializable event")))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn update_tunnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<SiteUpdate>,
) -> Result<Json<Value>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "No updatable fields (status, checkFrequency, alertEmail, priority)".to_string(),
        ));
    }

    let site = state.store.update_site(&id, &update).await?;
    info!(site = %site.id, "Tunnel updated");
    Ok(Json(json!({
        "message": "Tunnel updated",
        "id": site.id,
    })))
}

async fn current_status(State(state): State<AppState>) -> Result<Json<Vec<SiteStatus>>, ApiError> {
    let sites = state.store.list_sites().await?;

    let latest = futures::future::try_join_all(
        sites.iter().map(|site| state.store.history(&site.id, 1)),
    )
    .await?;

    let statuses = sites
        .iter()
        .zip(latest)
        .map(|(site, history)| analysis::current_status(site, history.first()))
        .collect();
    Ok(Json(statuses))
}

/// `"30"`, `"30d"` and `"30D"` all mean thirty days; anything else falls back to the default.
pub fn parse_period(raw: &str) -> u32 {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_suffix('d')
        .or_else(|| trimmed.strip_suffix('D'))
        .unwrap_or(trimmed);
    match digits.parse::<u32>() {
        Ok(days) if days > 0 => days,
        _ => DEFAULT_STATS_DAYS,
    }
}

async fn dashboard_stats(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> Result<Json<DashboardStats>, ApiError> {
    let days = parse_period(&period);
    let now = now_millis();
    let results = state
        .store
        .results_since(analysis::stats::window_start(days, now), None)
        .await?;
    Ok(Json(analysis::compute_stats(&results, days, now)))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    days: Option<u32>,
}

async fn dashboard_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<TestResult>>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    let now = now_millis();
    let results = state
        .store
        .results_since(analysis::stats::window_start(days, now), None)
        .await?;
    Ok(Json(analysis::alerts(&results, days, now)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    days: Option<u32>,
    tunnel_id: Option<String>,
}

impl ExportQuery {
    fn days(&self) -> u32 {
        self.days.unwrap_or(DEFAULT_EXPORT_DAYS)
    }

    fn site(&self) -> Option<&str> {
        self.tunnel_id.as_deref().filter(|id| !id.is_empty())
    }
}

async fn export_results(state: &AppState, query: &ExportQuery) -> Result<Vec<TestResult>, ApiError> {
    let since = analysis::stats::window_start(query.days(), now_millis());
    Ok(state.store.results_since(since, query.site()).await?)
}

fn attachment(format: ExportFormat, body: String) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        export::file_name(format, now_millis())
    );
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let results = export_results(&state, &query).await?;
    let body = export::to_csv(&results).map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(attachment(ExportFormat::Csv, body))
}

async fn export_json(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let results = export_results(&state, &query).await?;
    let document = export::to_document(results, query.days(), query.site(), now_millis());
    let body = serde_json::to_string_pretty(&document)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(attachment(ExportFormat::Json, body))
}

async fn ingest_result(
    State(state): State<AppState>,
    Json(report): Json<ExternalReport>,
) -> Result<Json<Value>, ApiError> {
    let site = match state.store.get_site(&report.tunnel_id).await {
        Ok(site) => site,
        Err(StoreError::NotFound(_)) => {
            warn!(site = %report.tunnel_id, "External result for an unknown tunnel");
            report.fallback_site()
        }
        Err(e) => return Err(e.into()),
    };

    state
        .runner
        .record_external(&site, &report)
        .await
        .map_err(ApiError::Store)?;
    Ok(Json(json!({ "success": true })))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.queue.snapshot())
}
