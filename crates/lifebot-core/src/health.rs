//! Liveness endpoint: `GET /health`.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{errors::Error, scheduler::Scheduler, Result};

#[derive(Clone)]
pub struct HealthState {
    started: Instant,
    scheduler: Scheduler,
}

impl HealthState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            started: Instant::now(),
            scheduler,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub jobs: usize,
    pub degraded_jobs: Vec<String>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health).head(head_not_allowed))
        .with_state(Arc::new(state))
}

async fn health(State(state): State<Arc<HealthState>>) -> Json<HealthReport> {
    // Status lock is never held across a job run, so this stays fast.
    let degraded_jobs = state.scheduler.degraded_jobs().await;
    Json(HealthReport {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        jobs: state.scheduler.job_count(),
        degraded_jobs,
    })
}

// axum answers HEAD through the GET handler unless HEAD has its own route.
async fn head_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")])
}

pub async fn serve(bind: SocketAddr, state: HealthState, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::External(format!("cannot bind health endpoint on {bind}: {e}")))?;
    serve_on(listener, state, cancel).await
}

/// Serve on an already-bound listener until `cancel` fires.
pub async fn serve_on(
    listener: TcpListener,
    state: HealthState,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("health endpoint listening on http://{addr}/health");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("health endpoint stopped");
    Ok(())
}
