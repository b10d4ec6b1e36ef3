//! Thin HTTP layer: webhook intake plus operational ledger routes.
//!
//! The webhook route always answers success-shaped JSON (HTTP 200) so the
//! source system does not endlessly redeliver an already-recorded event;
//! business failures are visible only through the ledger and the operator
//! channel. Only a body that is not JSON at all gets `success: false`.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, instrument, warn};

use crate::db::{self, FiscalStatus, Pool, RecordFilter};
use crate::pipeline::{BatchSummary, Pipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub pool: Pool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhook", post(handle_webhook))
        .route("/api/records", get(list_records))
        .route("/api/records/cleanup", post(cleanup_records))
        .with_state(state)
}

/// Acknowledgment returned for every webhook delivery.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub dropped: usize,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "fiscal-bridge" }))
}

#[instrument(skip_all)]
async fn handle_webhook(State(state): State<AppState>, body: String) -> Json<WebhookAck> {
    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "webhook body is not JSON");
            return Json(WebhookAck {
                success: false,
                message: "body is not valid JSON".into(),
                summary: BatchSummary::default(),
                dropped: 0,
            });
        }
    };

    let (events, dropped) = match crate::model::parse_webhook_body(&value) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, "webhook body has unsupported shape");
            return Json(WebhookAck {
                success: false,
                message: err.to_string(),
                summary: BatchSummary::default(),
                dropped: 0,
            });
        }
    };

    let summary = state.pipeline.process_batch(events).await;
    Json(WebhookAck {
        success: true,
        message: "webhook processed".into(),
        summary,
        dropped,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordQuery {
    pub processed: Option<bool>,
    pub fiscal_status: Option<String>,
    pub resource_id: Option<i64>,
}

#[instrument(skip_all)]
async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> Json<Value> {
    let fiscal_status = match query.fiscal_status.as_deref() {
        Some(raw) => match FiscalStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return Json(json!({
                    "success": false,
                    "message": format!("unknown fiscal_status '{raw}'"),
                }));
            }
        },
        None => None,
    };
    let filter = RecordFilter {
        processed: query.processed,
        fiscal_status,
        resource_id: query.resource_id,
    };
    match db::list_records(&state.pool, &filter).await {
        Ok(records) => Json(json!({ "success": true, "records": records })),
        Err(err) => {
            error!(?err, "record listing failed");
            Json(json!({ "success": false, "message": err.to_string() }))
        }
    }
}

/// Bulk removal of failed ledger rows; the only way a record is ever deleted.
#[instrument(skip_all)]
async fn cleanup_records(State(state): State<AppState>) -> Json<Value> {
    match db::delete_failed_records(&state.pool).await {
        Ok(deleted) => Json(json!({ "success": true, "deleted": deleted })),
        Err(err) => {
            error!(?err, "record cleanup failed");
            Json(json!({ "success": false, "message": err.to_string() }))
        }
    }
}
