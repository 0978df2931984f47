//! HTTP surface of the price service.
//!
//! `POST /api/v1/predict/__retrain_models__` overwrites the deployed
//! artifacts with no history or rollback: the last successful retrain wins.

use crate::config::ServerConfig;
use crate::error::{FieldViolation, ServiceError};
use crate::service::PriceService;
use crate::training::RetrainOptions;
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

type SharedService = Arc<PriceService>;

/// Error body: `{"detail": "...", "errors": [{field, message}, ...]}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
    errors: Vec<FieldViolation>,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
            errors: Vec::new(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
            errors: Vec::new(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let errors = match &err {
            ServiceError::Schema(schema) => schema.violations.clone(),
            _ => Vec::new(),
        };
        Self {
            status: err.status_code(),
            detail: err.to_string(),
            errors,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "detail": self.detail,
                "errors": self.errors,
            })),
        )
            .into_response()
    }
}

/// Every route, sharing one service.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/predict/price", post(predict_price))
        .route("/api/v1/predict/label_mappings", get(label_mappings))
        .route("/api/v1/predict/insert_row", post(insert_row))
        .route("/api/v1/predict/__retrain_models__", post(retrain_models))
        .route("/api/v1/predict/stats", get(stats))
        .with_state(service)
}

async fn health(State(service): State<SharedService>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "bundle_version": service.bundle_version(),
    }))
}

async fn predict_price(
    State(service): State<SharedService>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let (_, prediction) = service.predict_raw(&body)?;
    Ok(Json(prediction).into_response())
}

async fn label_mappings(State(service): State<SharedService>) -> Response {
    Json(service.label_mappings().clone()).into_response()
}

async fn insert_row(
    State(service): State<SharedService>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let worker = service.clone();
    tokio::task::spawn_blocking(move || worker.insert_raw(&body))
        .await
        .map_err(|e| ApiError::internal(format!("insert task failed: {}", e)))??;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Row inserted successfully." })),
    )
        .into_response())
}

/// Optional body: any subset of the retrain options. Empty means defaults.
async fn retrain_models(
    State(service): State<SharedService>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        RetrainOptions::default()
    } else {
        serde_json::from_slice::<RetrainOptions>(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid retrain options: {}", e)))?
    };

    let report = service.retrain(options).await?;
    info!(
        version = %report.version,
        swapped = report.swapped,
        saved = report.saved,
        "Retrain served"
    );
    Ok(Json(report.metrics).into_response())
}

async fn stats(State(service): State<SharedService>) -> Json<Value> {
    Json(json!({
        "bundle_version": service.bundle_version(),
        "metrics": service.metrics().snapshot(),
    }))
}

/// Serve until ctrl-c.
pub async fn serve(config: &ServerConfig, service: SharedService) -> Result<()> {
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
