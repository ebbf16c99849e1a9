//! LogiQ HTTP API
//!
//! Routes (nested under `/api`):
//! - GET /health - Health check with version and uptime
//! - POST /solve - Solve a problem statement
//! - POST /chat - Run a chat body through the activation filter

use crate::artifact::Artifact;
use crate::filter::ChatFilter;
use crate::solver::Solver;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Shared handler state
pub struct AppState {
    pub solver: Arc<Solver>,
    pub filter: ChatFilter,
    pub default_model: String,
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(solver: Arc<Solver>, prefix: impl Into<String>, default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        Self {
            filter: ChatFilter::new(solver.clone(), prefix, default_model.clone()),
            solver,
            default_model,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct SolveRequest {
    pub problem: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub request_id: Uuid,
    pub status: &'static str,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub rendered: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Solve handler
///
/// Returns 400 when the problem is blank. Exhaustion is still a 200; the
/// `status` field tells the outcomes apart.
pub async fn solve(State(state): State<Arc<AppState>>, Json(request): Json<SolveRequest>) -> Response {
    let problem = request.problem.trim();
    if problem.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "problem must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    let model = request
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.default_model);

    let solution = state.solver.solve(problem, model).await;
    let (code, output) = match &solution.artifact {
        Artifact::Disclosure { code, output } => (Some(code.clone()), Some(output.clone())),
        Artifact::Apology => (None, None),
    };

    Json(SolveResponse {
        request_id: solution.request_id,
        status: solution.state.as_str(),
        attempts: solution.attempts.len(),
        code,
        output,
        rendered: solution.rendered(),
    })
    .into_response()
}

pub async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(state.filter.apply(body).await)
}

/// Create the API router
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/solve", post(solve))
        .route("/chat", post(chat))
        .with_state(state)
}
