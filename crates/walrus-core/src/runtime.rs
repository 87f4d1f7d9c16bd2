//! Container runtime capability trait.
//!
//! The scheduler drives containers through this trait; the bollard-backed
//! implementation lives in walrus-executor, and tests substitute mocks.

use async_trait::async_trait;

use crate::Result;

/// Everything needed to create one stage container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name; for stages this is the full stage name.
    pub name: String,
    /// Normalized `repo:tag` image reference.
    pub image: String,
    /// Entrypoint override; empty means the image default.
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// Environment assignments, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Bind mounts, `host:client[:propagation]`.
    pub binds: Vec<String>,
    /// Containers whose volumes are shared into this one.
    pub volumes_from: Vec<String>,
    /// Published ports.
    pub ports: Vec<PortMapping>,
}

/// A container-to-host port publication.
#[derive(Debug, Clone, Copy)]
pub struct PortMapping {
    pub container: u16,
    pub host: u16,
}

/// Observed state of a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    pub running: bool,
    /// Exit code once the container has stopped.
    pub exit_code: Option<i64>,
    /// Runtime-reported error string, empty when none.
    pub error: String,
}

/// Image and container lifecycle operations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image by `repo:tag` reference.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// List locally available `repo:tag` references.
    async fn list_images(&self) -> Result<Vec<String>>;

    /// Create a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Block until the container stops, returning its exit code.
    async fn wait_container(&self, name: &str) -> Result<i64>;

    async fn inspect_container(&self, name: &str) -> Result<ContainerState>;

    /// Collected stdout and stderr of a container.
    async fn read_logs(&self, name: &str) -> Result<String>;

    /// Force-remove a container. Fails with [`Error::NotFound`] when it does
    /// not exist.
    ///
    /// [`Error::NotFound`]: crate::Error::NotFound
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Kill a running container. Fails with [`Error::NotFound`] /
    /// [`Error::NotRunning`] when there is nothing to kill.
    ///
    /// [`Error::NotFound`]: crate::Error::NotFound
    /// [`Error::NotRunning`]: crate::Error::NotRunning
    async fn kill_container(&self, name: &str) -> Result<()>;

    /// One resource-usage sample of a running container, or `None` when the
    /// runtime has no sample to give.
    async fn container_stats(&self, name: &str) -> Result<Option<serde_json::Value>>;
}
