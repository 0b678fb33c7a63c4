//! HTTP surface: prediction routes, health, and static files.
//!
//! Failures are answered with status 500 and `{"ok":false,"code":N}`; the
//! error detail only goes to the log.

use std::path::Path;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::common::error::{FlowCode, FlowError};
use crate::orchestrator::domain::{Predict2dInput, PredictFixedInput, PredictRequest};
use crate::orchestrator::service::Orchestrator;
use crate::transform::domain::PredictionResponse;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Uniform failure body.
#[derive(Debug)]
pub struct ApiFailure(pub FlowCode);

impl From<FlowError> for ApiFailure {
    fn from(err: FlowError) -> Self {
        ApiFailure(err.code())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "code": self.0 as u32})),
        )
            .into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiFailure> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::warn!(detail = %rejection, "rejected request body");
            Err(ApiFailure(FlowCode::InvalidRequest))
        }
    }
}

async fn run(state: &AppState, request: PredictRequest) -> Result<Json<PredictionResponse>, ApiFailure> {
    state
        .orchestrator
        .predict(request)
        .await
        .map(Json)
        .map_err(ApiFailure::from)
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Predict2dInput>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiFailure> {
    let input = body(payload)?;
    run(&state, input.into()).await
}

async fn predict_fixed(
    State(state): State<AppState>,
    payload: Result<Json<PredictFixedInput>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiFailure> {
    let input = body(payload)?;
    run(&state, input.into()).await
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<&str> = state
        .orchestrator
        .loaded_models()
        .iter()
        .map(|sel| sel.as_str())
        .collect();
    Json(json!({"ok": true, "models": models}))
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict_fixed", post(predict_fixed))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
