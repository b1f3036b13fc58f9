use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::warn;

use super::state::{AgentSnapshot, AgentState};

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(flatten)]
    agent: AgentSnapshot,
}

/// Health check endpoint
///
/// Status plus agent counters. Always 200 while the process serves requests.
#[get("/health")]
async fn health_check(state: web::Data<AgentState>) -> impl Responder {
    let snapshot = state.snapshot();
    let status = if state.is_ready() { "healthy" } else { "degraded" };
    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        agent: snapshot,
    })
}

/// Readiness check endpoint
///
/// Returns 503 while the backend has been unreachable for several polls in a row.
/// Recovers on its own once a poll succeeds again.
#[get("/ready")]
async fn readiness_check(state: web::Data<AgentState>) -> impl Responder {
    let snapshot = state.snapshot();
    if state.is_ready() {
        HttpResponse::Ok().json(HealthResponse {
            status: "ready".to_string(),
            agent: snapshot,
        })
    } else {
        warn!(
            "Readiness check failed: {} consecutive poll failures",
            snapshot.consecutive_poll_failures
        );
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "not_ready".to_string(),
            agent: snapshot,
        })
    }
}

/// Liveness check endpoint
///
/// Simple check that the process is alive. Does not check the backend.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "alive"}))
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
