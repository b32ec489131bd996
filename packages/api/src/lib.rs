// ABOUTME: HTTP API layer and routing for Chainlab
// ABOUTME: Wires the thin router onto the session orchestrator and identity store

pub mod auth;
pub mod response;
pub mod sandbox_handlers;
pub mod users_handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use chainlab_identity::UserStorage;
use chainlab_sandbox::SessionOrchestrator;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_ttl: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<UserStorage>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub auth: AuthConfig,
}

/// The full API surface. `/api/register` and `/api/login` are public; every
/// sandbox route resolves its owner from the bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(users_handlers::register))
        .route("/api/login", post(users_handlers::login))
        .route("/api/user", get(users_handlers::profile))
        .route("/api/user/progress", post(users_handlers::update_progress))
        .route("/api/sandbox", get(sandbox_handlers::get_sandbox))
        .route("/api/sandbox/create", post(sandbox_handlers::create_sandbox))
        .route("/api/sandbox/start", post(sandbox_handlers::start_sandbox))
        .route("/api/sandbox/stop", post(sandbox_handlers::stop_sandbox))
        .route("/api/sandbox/remove", post(sandbox_handlers::remove_sandbox))
        .route("/api/sandbox/exec", post(sandbox_handlers::exec_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
