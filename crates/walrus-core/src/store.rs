//! Large-file store capability trait.
//!
//! Content-addressed storage for stage outputs. The git + git-lfs backed
//! implementation lives in walrus-provenance.

use async_trait::async_trait;
use std::path::Path;

use crate::Result;

/// Content-addressed versioning of pipeline output directories.
#[async_trait]
pub trait LargeFileStore: Send + Sync {
    /// Mark a path as large-file tracked.
    async fn track(&self, path: &Path) -> Result<()>;

    /// Add and commit everything under `path`, returning the commit id.
    async fn add_and_commit(&self, path: &Path, message: &str) -> Result<String>;

    /// Current repository head.
    async fn head(&self) -> Result<String>;

    /// Roll the repository back to a prior commit.
    async fn reset(&self, commit: &str) -> Result<()>;

    /// Difference between a prior commit and the current state.
    async fn diff(&self, commit: &str) -> Result<String>;
}
