// HTTP surface for the RSVP backend
//
// Routes:
// - POST /api/rsvp          guest submission (token-gated)
// - POST /api/admin/login   administrative login
// - GET  /api/queue/status  operational queue/backpressure snapshot
// - GET  /health            liveness probe
// - GET  /metrics           Prometheus scrape endpoint

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AdminAuth, AdminLoginError};
use crate::config::ServerConfig;
use crate::domain::{SubmissionReceipt, SubmissionRequest};
use crate::error::ApiError;
use crate::metrics;
use crate::notify::DeliveryEngine;
use crate::rsvp::SubmissionPipeline;

/// Service handles shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SubmissionPipeline,
    pub admin: AdminAuth,
    pub engine: Arc<DeliveryEngine>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rsvp", post(submit_rsvp))
        .route("/api/admin/login", post(admin_login))
        .route("/api/queue/status", get(queue_status))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Starting RSVP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind server address")?;

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

async fn submit_rsvp(
    State(state): State<AppState>,
    Json(payload): Json<SubmissionRequest>,
) -> Result<Json<SubmissionReceipt>, ApiError> {
    let receipt = state.pipeline.submit(&payload).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct AdminLoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct AdminLoginResponse {
    session_token: Uuid,
}

async fn admin_login(
    State(state): State<AppState>,
    Json(payload): Json<AdminLoginRequest>,
) -> Response {
    match state.admin.login(&payload.username, &payload.password).await {
        Ok(session) => Json(AdminLoginResponse {
            session_token: session.session_token,
        })
        .into_response(),
        Err(AdminLoginError::RateLimited { retry_after_secs }) => {
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
        Err(AdminLoginError::BadCredentials) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "code": "INVALID_CREDENTIALS",
                "message": "invalid credentials",
            })),
        )
            .into_response(),
    }
}

async fn queue_status(State(state): State<AppState>) -> Response {
    Json(state.engine.status().await).into_response()
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}
