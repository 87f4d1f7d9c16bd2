//! Pre-run lifecycle: umask adjustment, previous-run cleanup and volume
//! normalization.

use std::path::Path;
use tracing::debug;

use walrus_core::{ContainerRuntime, Pipeline, Result};

/// Sets the process umask to 000 so stage output written through bind
/// mounts stays world-accessible; restores the previous mask on drop.
pub struct UmaskGuard {
    previous: libc::mode_t,
}

impl UmaskGuard {
    pub fn permissive() -> Self {
        let previous = unsafe { libc::umask(0) };
        Self { previous }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.previous);
        }
    }
}

/// Prepare a pipeline for scheduling: relax the umask, normalize volume
/// specs and clear out containers left behind by a previous run. The
/// returned guard must be held for the duration of the run.
pub async fn prepare(
    runtime: &dyn ContainerRuntime,
    pipeline: &mut Pipeline,
) -> Result<UmaskGuard> {
    let guard = UmaskGuard::permissive();
    normalize_volumes(pipeline)?;
    cleanup_previous_run(runtime, pipeline).await?;
    Ok(guard)
}

/// Kill containers named after any stage in the graph and remove the stale
/// containers of non-cached stages. Containers that are already gone or
/// already stopped are not an error.
pub async fn cleanup_previous_run(
    runtime: &dyn ContainerRuntime,
    pipeline: &Pipeline,
) -> Result<()> {
    for stage in &pipeline.stages {
        match runtime.kill_container(&stage.name).await {
            Ok(()) => {}
            Err(e) if e.is_benign_cleanup() => {}
            Err(e) => return Err(e),
        }

        if !stage.cache {
            if let Err(e) = runtime.remove_container(&stage.name).await {
                debug!(stage = %stage.name, error = %e, "Stale container removal failed");
            }
        }
    }
    Ok(())
}

/// Rewrite every volume spec to use an absolute host path. Specs take the
/// form `host[:client[:propagation]]`; a bare `host` mounts at the same
/// path inside the container.
pub fn normalize_volumes(pipeline: &mut Pipeline) -> Result<()> {
    for stage in pipeline.stages.iter_mut() {
        for volume in stage.volumes.iter_mut() {
            *volume = normalize_volume(volume)?;
        }
    }
    Ok(())
}

fn normalize_volume(spec: &str) -> Result<String> {
    let mut parts = spec.splitn(3, ':');
    let host = parts.next().unwrap_or_default();
    let client = parts.next().unwrap_or(host);
    let propagation = parts.next();

    let host = std::path::absolute(Path::new(host))?;

    Ok(match propagation {
        Some(propagation) => format!("{}:{}:{}", host.display(), client, propagation),
        None => format!("{}:{}", host.display(), client),
    })
}
