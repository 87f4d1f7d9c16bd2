//! The post-run provenance pass.

use std::path::Path;
use tracing::info;

use walrus_core::{LargeFileStore, Pipeline, Result};

/// Commit every stage's output directory in stage-list order, recording
/// the returned commit id on the stage, then record the repository head as
/// the pipeline version.
///
/// Runs serially after the scheduler has reported overall success; it is
/// never folded into the per-stage worker path.
pub async fn record(
    store: &dyn LargeFileStore,
    pipeline: &mut Pipeline,
    rootpath: &Path,
) -> Result<()> {
    for stage in pipeline.stages.iter_mut() {
        let hostpath = rootpath.join(&stage.name);
        let message = format!("Add data pipeline stage: {}", stage.name);
        let commit = store.add_and_commit(&hostpath, &message).await?;
        info!(stage = %stage.name, commit = %commit, "Recorded stage output");
        stage.version = commit;
    }

    pipeline.version = store.head().await?;
    Ok(())
}
