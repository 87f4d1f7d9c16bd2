//! git-lfs server bootstrap.
//!
//! Starts a large-file server in a container, binding a host directory at
//! `/lfs` and publishing the server port.

use std::path::Path;
use tracing::info;

use walrus_core::{ContainerRuntime, ContainerSpec, PortMapping, Result};

pub const LFS_SERVER_IMAGE: &str = "walrus/lfs-server:latest";
pub const LFS_SERVER_CONTAINER: &str = "git-lfs-server";
pub const LFS_SERVER_PORT: u16 = 9999;

/// Pull the server image and start the server container with `mount_dir`
/// bound at `/lfs`.
pub async fn start_server(runtime: &dyn ContainerRuntime, mount_dir: &Path) -> Result<()> {
    runtime.pull_image(LFS_SERVER_IMAGE).await?;

    let host_path = std::path::absolute(mount_dir)?;
    let spec = ContainerSpec {
        name: LFS_SERVER_CONTAINER.to_string(),
        image: LFS_SERVER_IMAGE.to_string(),
        binds: vec![format!("{}:/lfs", host_path.display())],
        ports: vec![PortMapping {
            container: LFS_SERVER_PORT,
            host: LFS_SERVER_PORT,
        }],
        ..Default::default()
    };

    runtime.create_container(&spec).await?;
    runtime.start_container(LFS_SERVER_CONTAINER).await?;

    info!(port = LFS_SERVER_PORT, dir = %host_path.display(), "Large-file server started");
    Ok(())
}
