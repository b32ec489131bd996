// ABOUTME: HTTP request handlers for sandbox lifecycle and command execution
// ABOUTME: Resolves the owner from the bearer token and delegates to the orchestrator

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chainlab_identity::SandboxHandle;
use chainlab_sandbox::{CommandRequest, CommandRoute};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::AuthUser;
use crate::response::{ApiError, ApiResponse};
use crate::AppState;

fn handle_view(handle: &SandboxHandle) -> Value {
    json!({
        "ownerID": handle.owner_id,
        "containerID": handle.container_id,
        "state": handle.state.as_str(),
    })
}

pub async fn get_sandbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.orchestrator.get_sandbox(&user.id).await?;
    Ok(Json(ApiResponse::success(handle_view(&handle))))
}

pub async fn create_sandbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    info!("Ensuring sandbox for user: {}", user.id);

    let handle = state.orchestrator.ensure_sandbox(&user.id).await?;
    Ok(Json(ApiResponse::success(handle_view(&handle))))
}

pub async fn start_sandbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    info!("Starting sandbox for user: {}", user.id);

    let handle = state.orchestrator.start_sandbox(&user.id).await?;
    Ok(Json(ApiResponse::success(handle_view(&handle))))
}

pub async fn stop_sandbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    info!("Stopping sandbox for user: {}", user.id);

    let handle = state.orchestrator.stop_sandbox(&user.id).await?;
    Ok(Json(ApiResponse::success(handle_view(&handle))))
}

pub async fn remove_sandbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    info!("Tearing down sandbox for user: {}", user.id);

    let handle = state.orchestrator.teardown_sandbox(&user.id).await?;
    Ok(Json(ApiResponse::success(handle_view(&handle))))
}

/// Request body for command execution. The `route` tag selects one of the
/// known control-plane endpoints; unknown routes fail deserialization and
/// never reach the sandbox.
#[derive(Deserialize)]
pub struct ExecRequestBody {
    #[serde(flatten)]
    pub route: CommandRoute,
    /// Raw body override for POST routes.
    #[serde(default)]
    pub payload: Option<String>,
}

pub async fn exec_command(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ExecRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Executing command for user {}: {:?}", user.id, body.route);

    let request = CommandRequest {
        route: body.route,
        payload: body.payload.map(String::into_bytes),
    };
    let result = state.orchestrator.run_command(&user.id, &request).await?;

    Ok(Json(ApiResponse::success(json!({
        "succeeded": result.succeeded,
        "stdout": String::from_utf8_lossy(&result.stdout),
        "stderr": String::from_utf8_lossy(&result.stderr),
        "output": result.combined_text(),
    }))))
}
