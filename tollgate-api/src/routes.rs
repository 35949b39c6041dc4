use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tollgate_core::audit::PaymentAudit;

const MAX_MISMATCH_PAGE: i64 = 500;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.oldest_expired_held(state.clock.now()).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// One reaper pass, for deployments that schedule it externally.
pub async fn sweep(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let started = Instant::now();
    let report = match state.reaper.sweep_once().await {
        Ok(report) => report,
        Err(e) => {
            state.metrics.observe_failure();
            return Err(e.into());
        }
    };
    state.metrics.observe(&report, started.elapsed());

    Ok(Json(json!({
        "expired_held": report.expired_held,
        "timed_out_pending": report.timed_out_pending,
        "stuck_confirmations": report.stuck_confirmations,
        "failures": report.failures,
        "seat_holds_swept": report.seat_holds_swept,
        "orphans_swept": report.orphans_swept,
        "lounge_holds_swept": report.lounge_holds_swept,
        "lag_seconds": report.lag_seconds(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct MismatchQuery {
    pub limit: Option<i64>,
}

pub async fn amount_mismatches(
    State(state): State<AppState>,
    Query(query): Query<MismatchQuery>,
) -> Result<Json<Vec<PaymentAudit>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, MAX_MISMATCH_PAGE);
    let rows = state.audit_log.get_amount_mismatches(limit).await?;
    Ok(Json(rows))
}
