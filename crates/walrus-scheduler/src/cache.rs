//! Stage identity and the cache probe.
//!
//! Every stage owns one output slot keyed by its full (possibly
//! `_parallel_`-suffixed) name: `rootpath/<name>` on the host, mounted at
//! `/walrus/<name>` inside the container. The container is named by the
//! same full stage name.

use std::path::{Path, PathBuf};

use walrus_core::{ContainerRuntime, Stage};

/// Mountpoint root inside stage containers.
pub const MOUNTPOINT_ROOT: &str = "/walrus";

/// Host output directory of a stage.
pub fn host_path(rootpath: &Path, stage: &Stage) -> PathBuf {
    rootpath.join(&stage.name)
}

/// Container mountpoint of a stage's output directory.
pub fn mountpoint(stage: &Stage) -> String {
    format!("{}/{}", MOUNTPOINT_ROOT, stage.name)
}

/// Decide whether a prior run of this stage can be reused.
///
/// The cache flag survives only if a container with the stage's name exists,
/// exited 0, and the output directory is still present. Any inspection
/// failure demotes the cache to off.
pub async fn refresh_cache(
    runtime: &dyn ContainerRuntime,
    stage: &Stage,
    hostpath: &Path,
) -> bool {
    if !stage.cache {
        return false;
    }

    let state = match runtime.inspect_container(&stage.name).await {
        Ok(state) => state,
        Err(_) => return false,
    };

    if state.running || state.exit_code != Some(0) {
        return false;
    }

    hostpath.is_dir()
}
