// ABOUTME: Server configuration loaded from environment variables
// ABOUTME: Ports, database path, sandbox image and token settings with defaults

use std::env;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("TOKEN_SECRET must not be empty")]
    EmptyTokenSecret,
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub sandbox_image: String,
    pub token_secret: String,
    pub token_ttl_secs: u64,
    pub exec_timeout_secs: u64,
    pub cors_origin: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port_str.parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://chainlab.db".to_string());

        let sandbox_image = env::var("SANDBOX_IMAGE")
            .unwrap_or_else(|_| chainlab_sandbox::DEFAULT_SANDBOX_IMAGE.to_string());

        let token_secret = match env::var("TOKEN_SECRET") {
            Ok(secret) if secret.trim().is_empty() => return Err(ConfigError::EmptyTokenSecret),
            Ok(secret) => secret,
            Err(_) => {
                tracing::warn!(
                    "TOKEN_SECRET not set; using an insecure development default. \
                     Set TOKEN_SECRET in production."
                );
                "chainlab-dev-secret".to_string()
            }
        };

        let token_ttl_secs = env::var("TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(86400);

        let exec_timeout_secs = env::var("EXEC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(chainlab_sandbox::DEFAULT_EXEC_TIMEOUT_SECS);

        let cors_origin =
            env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        Ok(Config {
            port,
            database_url,
            sandbox_image,
            token_secret,
            token_ttl_secs,
            exec_timeout_secs,
            cors_origin,
        })
    }
}
