// ABOUTME: Docker implementation of the container runtime trait
// ABOUTME: Uses bollard for container lifecycle and exec-attach with stream demux

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use super::{ContainerRuntime, ExecOutput, Result, RuntimeError};

pub struct DockerRuntime {
    client: Docker,
    label_prefix: String,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Create with a specific Docker connection.
    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            label_prefix: "chainlab.sandbox".to_string(),
        }
    }
}

fn convert_error(err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::UnknownContainer(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Failed(format!("HTTP {status_code}: {message}")),
        // Everything below the HTTP layer means we never reached the daemon.
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

/// The daemon answers 304 when a start/stop is already in the requested
/// state; callers retrying after an ambiguous response rely on that being
/// success.
fn already_in_state(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn create(&self, image: &str, cmd: Option<Vec<String>>) -> Result<String> {
        info!("Creating sandbox container from image: {}", image);

        let mut labels = HashMap::new();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());

        let config = Config {
            image: Some(image.to_string()),
            cmd,
            labels: Some(labels),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(convert_error)?;

        debug!("Created container: {}", container.id);
        Ok(container.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        match self
            .client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if already_in_state(&err) => Ok(()),
            Err(err) => Err(convert_error(err)),
        }
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        info!("Stopping container: {}", container_id);

        match self
            .client
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if already_in_state(&err) => Ok(()),
            Err(err) => Err(convert_error(err)),
        }
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(convert_error)
    }

    async fn exec_attach(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput> {
        debug!("Executing in container {}: {:?}", container_id, argv);

        let exec_config = CreateExecOptions {
            cmd: Some(argv),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(convert_error)?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(convert_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(err) => return Err(convert_error(err)),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Failed(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(convert_error)?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: exec_inspect.exit_code.unwrap_or(0),
        })
    }
}
