//! HTTP API for the QERS batch evaluation service.
//!
//! Endpoints:
//! - GET  /health                          - liveness and version
//! - GET  /reality-profiles                - profile summaries
//! - GET  /reality-profiles/:id            - one full profile
//! - POST /sim/batch                       - run a batch, return its report
//! - GET  /sim/batch                       - stored batch ids
//! - POST /sim/batch/jobs                  - submit a batch, return 202 + job
//! - GET  /sim/batch/:batch_id             - stored report
//! - GET  /sim/batch/:batch_id/status      - job status
//! - GET  /sim/batch/:batch_id/evaluate    - pairwise gap metrics (`?metric=`)
//! - POST /sim/batch/:batch_id/cancel      - cancel a job
//! - POST /sim/batch/:batch_id/retry       - re-run failed episodes

pub mod error;

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use qers_core::{
    BatchEval, BatchReport, BatchRequest, BatchService, JobStatus, ProfileInfo, RealityProfile,
};

use crate::error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BatchService>,
}

/// Build the router with all endpoints.
pub fn router(service: Arc<BatchService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reality-profiles", get(list_profiles))
        .route("/reality-profiles/:id", get(get_profile))
        .route("/sim/batch", post(run_batch).get(list_batches))
        .route("/sim/batch/jobs", post(submit_batch))
        .route("/sim/batch/:batch_id", get(get_report))
        .route("/sim/batch/:batch_id/status", get(job_status))
        .route("/sim/batch/:batch_id/evaluate", get(evaluate))
        .route("/sim/batch/:batch_id/cancel", post(cancel))
        .route("/sim/batch/:batch_id/retry", post(retry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

/// Serve `service` on `listener` until `shutdown` resolves, then cancel and
/// drain in-flight jobs.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    service: Arc<BatchService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "qersd listening");
    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown)
        .await?;
    service.shutdown().await;
    info!("qersd stopped");
    Ok(())
}

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilesResponse {
    pub profiles: Vec<ProfileInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchesResponse {
    pub batches: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateParams {
    pub metric: Option<String>,
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: qers_core::VERSION.to_string(),
    })
}

async fn list_profiles(State(state): State<AppState>) -> Json<ProfilesResponse> {
    Json(ProfilesResponse {
        profiles: state.service.profiles(),
    })
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RealityProfile>, ApiError> {
    let profile = state.service.profile(&id)?;
    Ok(Json(profile.as_ref().clone()))
}

async fn run_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchReport>, ApiError> {
    let Json(request) = body?;
    let report = state.service.run_batch(request).await?;
    Ok(Json(report))
}

async fn list_batches(State(state): State<AppState>) -> Result<Json<BatchesResponse>, ApiError> {
    Ok(Json(BatchesResponse {
        batches: state.service.list_batches().await?,
    }))
}

async fn submit_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let job = state.service.submit_batch(request).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_report(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.service.report(&batch_id).await?))
}

async fn job_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.service.job_status(&batch_id).await?))
}

async fn evaluate(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(params): Query<EvaluateParams>,
) -> Result<Json<BatchEval>, ApiError> {
    let eval = state
        .service
        .evaluate(&batch_id, params.metric.as_deref())
        .await?;
    Ok(Json(eval))
}

async fn cancel(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.service.cancel(&batch_id).await?))
}

async fn retry(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.service.retry(&batch_id).await?))
}
