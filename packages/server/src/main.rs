// ABOUTME: Chainlab server entry point
// ABOUTME: Wires config, identity store, Docker runtime and the HTTP router together

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::Method;
use chainlab_api::{AppState, AuthConfig};
use chainlab_identity::UserStorage;
use chainlab_sandbox::{ContainerRuntime, DockerRuntime, SandboxConfig, SessionOrchestrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Starting chainlab server on port {}", config.port);

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("Invalid DATABASE_URL")?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("Failed to open database")?;
    chainlab_identity::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let storage = Arc::new(UserStorage::new(pool));

    let docker = DockerRuntime::connect().context("Failed to connect to Docker")?;
    if let Err(err) = docker.ping().await {
        warn!("Docker daemon not responding yet: {err}");
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let sandbox_config = SandboxConfig {
        image: config.sandbox_image.clone(),
        exec_timeout: Duration::from_secs(config.exec_timeout_secs),
        ..Default::default()
    };
    let orchestrator = Arc::new(SessionOrchestrator::new(
        storage.clone(),
        runtime,
        sandbox_config,
    ));

    let state = AppState {
        storage,
        orchestrator,
        auth: AuthConfig {
            token_secret: config.token_secret.clone(),
            token_ttl: Duration::from_secs(config.token_ttl_secs),
        },
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<axum::http::HeaderValue>()
                .context("Invalid CORS_ORIGIN")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = chainlab_api::router(state).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
