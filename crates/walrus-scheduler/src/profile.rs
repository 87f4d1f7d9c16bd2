//! Container-stats profiling.
//!
//! While a stage container runs, a profiler task samples its resource
//! usage and keeps rewriting the accumulated samples as a JSON array, so a
//! partial profile survives even if the run is interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use walrus_core::ContainerRuntime;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Sample `container`'s stats until it stops, writing the samples to
/// `path`. The returned handle is aborted by the stage worker once the
/// container has terminated.
pub fn spawn_profiler(
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut samples: Vec<serde_json::Value> = Vec::new();

        loop {
            let sample = match runtime.container_stats(&container).await {
                Ok(Some(sample)) => sample,
                Ok(None) => break,
                Err(e) => {
                    debug!(container = %container, error = %e, "Stats sampling stopped");
                    break;
                }
            };

            // The daemon reports empty samples around container startup and
            // teardown; skip anything without cpu usage.
            let busy = sample
                .pointer("/cpu_stats/cpu_usage/total_usage")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                != 0;

            if busy {
                samples.push(sample);
                let bytes = match serde_json::to_vec(&samples) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(container = %container, error = %e, "Could not encode profile");
                        break;
                    }
                };
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    debug!(container = %container, error = %e, "Could not write profile file");
                    break;
                }
            }

            tokio::time::sleep(SAMPLE_INTERVAL).await;
        }
    })
}
