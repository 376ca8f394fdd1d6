//! Thin ops surface for the `serve` sub-command: `/health`
//! and `/metrics`. The API-plane wire surface itself is out of scope — this
//! exists so `serve` has something to bind.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: PgPool,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_seconds: u64,
}

pub async fn check(State(state): State<HealthState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthBody {
                status: "ok",
                uptime_seconds: state.started_at.elapsed().as_secs(),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthBody {
                    status: "database_unreachable",
                    uptime_seconds: state.started_at.elapsed().as_secs(),
                }),
            )
        }
    }
}

/// Text-format counters, not a real Prometheus exposition — `serve` doesn't
/// run the background jobs, so there is nothing job-side to count here
/// beyond process uptime.
pub async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    let body = format!(
        "feedman_uptime_seconds {}\n",
        state.started_at.elapsed().as_secs()
    );
    (StatusCode::OK, body)
}
