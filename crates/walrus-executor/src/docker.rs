//! Local Docker implementation of the container runtime capability.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::debug;

use walrus_core::{ContainerRuntime, ContainerSpec, ContainerState, Error, Result};

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// True when the daemon answers pings.
    pub async fn available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

/// Map daemon responses onto the runtime error kinds: gone and stopped
/// containers are recoverable, everything else keeps the caller's kind.
fn map_container_error(
    name: &str,
    err: bollard::errors::Error,
    kind: impl FnOnce(String) -> Error,
) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => Error::NotFound(name.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => Error::NotRunning(name.to_string()),
        other => kind(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Err(e) => return Err(Error::Image(e.to_string())),
            }
        }
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::Image(e.to_string()))?;

        Ok(images.into_iter().flat_map(|i| i.repo_tags).collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            volumes_from: if spec.volumes_from.is_empty() {
                None
            } else {
                Some(spec.volumes_from.clone())
            },
            port_bindings: if spec.ports.is_empty() {
                None
            } else {
                Some(
                    spec.ports
                        .iter()
                        .map(|p| {
                            (
                                format!("{}/tcp", p.container),
                                Some(vec![PortBinding {
                                    host_ip: Some("0.0.0.0".to_string()),
                                    host_port: Some(p.host.to_string()),
                                }]),
                            )
                        })
                        .collect(),
                )
            },
            ..Default::default()
        };

        let exposed_ports: Option<HashMap<String, HashMap<(), ()>>> = if spec.ports.is_empty() {
            None
        } else {
            Some(
                spec.ports
                    .iter()
                    .map(|p| (format!("{}/tcp", p.container), HashMap::new()))
                    .collect(),
            )
        };

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: if spec.entrypoint.is_empty() {
                None
            } else {
                Some(spec.entrypoint.clone())
            },
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            exposed_ports,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ContainerCreate(e.to_string()))?;

        Ok(container.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                map_container_error(name, e, |m| Error::ContainerStart {
                    attempts: 1,
                    message: m,
                })
            })
    }

    async fn wait_container(&self, name: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A nonzero exit code surfaces as a wait error from the daemon
            // client; the stage failure decision belongs to the scheduler.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_container_error(name, e, Error::ContainerWait)),
            None => Err(Error::ContainerWait(
                "wait stream ended without a response".to_string(),
            )),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(|e| map_container_error(name, e, Error::Internal))?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            error: state.error.unwrap_or_default(),
        })
    }

    async fn read_logs(&self, name: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut logs = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    logs.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => return Err(Error::Log(e.to_string())),
            }
        }
        Ok(logs)
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_container_error(name, e, Error::Internal))
    }

    async fn kill_container(&self, name: &str) -> Result<()> {
        self.docker
            .kill_container(name, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| map_container_error(name, e, Error::Internal))
    }

    async fn container_stats(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.docker.stats(name, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => Ok(Some(
                serde_json::to_value(&stats).map_err(|e| Error::Internal(e.to_string()))?,
            )),
            Some(Err(e)) => Err(map_container_error(name, e, Error::Internal)),
            None => Ok(None),
        }
    }
}


/// Integration tests that require a running Docker daemon.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_runtime_creation() {
        let runtime = DockerRuntime::new();
        assert!(runtime.is_ok(), "Should connect to Docker daemon");
        assert!(runtime.unwrap().available().await);
    }

    #[tokio::test]
    #[ignore]
    async fn test_container_lifecycle() {
        let runtime = DockerRuntime::new().unwrap();
        let name = "walrus_executor_lifecycle_test";

        runtime.pull_image("busybox:latest").await.unwrap();
        let _ = runtime.remove_container(name).await;

        let spec = ContainerSpec {
            name: name.to_string(),
            image: "busybox:latest".to_string(),
            cmd: vec!["echo".to_string(), "hello".to_string()],
            ..Default::default()
        };

        runtime.create_container(&spec).await.unwrap();
        runtime.start_container(name).await.unwrap();
        let exit_code = runtime.wait_container(name).await.unwrap();
        assert_eq!(exit_code, 0);

        let logs = runtime.read_logs(name).await.unwrap();
        assert!(logs.contains("hello"));

        runtime.remove_container(name).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_container_reports_exit_code() {
        let runtime = DockerRuntime::new().unwrap();
        let name = "walrus_executor_failure_test";

        runtime.pull_image("busybox:latest").await.unwrap();
        let _ = runtime.remove_container(name).await;

        let spec = ContainerSpec {
            name: name.to_string(),
            image: "busybox:latest".to_string(),
            cmd: vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()],
            ..Default::default()
        };

        runtime.create_container(&spec).await.unwrap();
        runtime.start_container(name).await.unwrap();
        let exit_code = runtime.wait_container(name).await.unwrap();
        assert_eq!(exit_code, 7);

        let state = runtime.inspect_container(name).await.unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, Some(7));

        runtime.remove_container(name).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_missing_container_is_not_found() {
        let runtime = DockerRuntime::new().unwrap();
        let err = runtime
            .remove_container("walrus_executor_no_such_container")
            .await
            .unwrap_err();
        assert!(err.is_benign_cleanup());
    }
}
