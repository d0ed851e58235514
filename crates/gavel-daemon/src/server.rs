//! Axum router and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use gavel_core::chain::Orchestrator;
use gavel_core::domain::Domain;
use gavel_core::verify::{list_reports, Verifier};

/// Reports listed by `GET /reports`.
const REPORT_LIST_LIMIT: usize = 30;

/// Shared state for the HTTP surface.
pub struct AppState {
    /// Directory holding `audit.jsonl` and `public.key`.
    pub ledger_dir: PathBuf,
    /// Directory verification reports are written to. The daemon never
    /// writes anywhere else.
    pub reports_dir: PathBuf,
    /// Optional orchestrator backing `POST /run`.
    pub orchestrator: Option<Arc<Orchestrator>>,
}

/// Builds the router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verify", get(verify))
        .route("/reports", get(reports))
        .route("/domains", get(domains))
        .route("/run", post(run_chain))
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "ledger_path": state.ledger_dir.display().to_string(),
        "reports_path": state.reports_dir.display().to_string(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn verify(State(state): State<Arc<AppState>>) -> Response {
    let verifier = Verifier::new(&state.ledger_dir);
    let report = match tokio::task::spawn_blocking(move || verifier.verify()).await {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "verification failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        },
        Err(err) => {
            tracing::error!(error = %err, "verification task panicked");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "verification task failed");
        },
    };

    // A failed report write is logged but does not fail the request.
    if let Err(err) = report.write_to(&state.reports_dir) {
        tracing::error!(error = %err, "failed to write verification report");
    }

    Json(json!({
        "verified": report.verified,
        "entries": report.entries,
        "details": report.details,
    }))
    .into_response()
}

async fn reports(State(state): State<Arc<AppState>>) -> Response {
    match list_reports(&state.reports_dir, REPORT_LIST_LIMIT) {
        Ok(summaries) => Json(summaries).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to list reports");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        },
    }
}

async fn domains() -> Response {
    let labels: Vec<&str> = Domain::ALL.iter().map(|d| d.as_str()).collect();
    Json(labels).into_response()
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    objective: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

async fn run_chain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Response {
    let Some(orchestrator) = state.orchestrator.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no orchestrator configured on this daemon",
        );
    };
    if request.objective.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "objective must be non-empty");
    }

    // Sessions block on the LLM; run each on the blocking pool so many
    // sessions multiplex over the runtime.
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.run_chain(
            &request.objective,
            request.domain.as_deref(),
            request.session_id.as_deref(),
        )
    })
    .await;

    match result {
        Ok(Ok(chain)) => Json(chain).into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "chain run failed");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
        },
        Err(err) => {
            tracing::error!(error = %err, "chain task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "chain task failed")
        },
    }
}
