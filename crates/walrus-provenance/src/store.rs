//! Git + git-lfs backed large-file store.
//!
//! The git-lfs developers discourage linking git-lfs into other programs,
//! so large-file tracking shells out to the `git-lfs` CLI; plain git
//! operations shell out to `git`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use walrus_core::{Error, LargeFileStore, Result};

/// A large-file store rooted at a git repository.
pub struct GitLfsStore {
    repository: PathBuf,
}

impl GitLfsStore {
    /// Find the git repository enclosing `path`, walking the directory tree
    /// outwards. When the walk hits the filesystem root without finding
    /// one, a fresh repository is initialized in `path`'s parent directory.
    pub async fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;

        let mut candidate = path.clone();
        loop {
            if candidate.join(".git").is_dir() {
                return Ok(Self {
                    repository: candidate,
                });
            }
            if !candidate.pop() {
                break;
            }
        }

        let repository = path.parent().unwrap_or(&path).to_path_buf();
        info!(
            repository = %repository.display(),
            "Output directory is not in a git repository; initializing one in the parent directory"
        );
        run(&repository, "git", &["init"]).await?;

        Ok(Self { repository })
    }

    /// The repository this store commits into.
    pub fn repository(&self) -> &Path {
        &self.repository
    }

    fn relative<'a>(&self, path: &'a Path) -> Result<&'a str> {
        path.strip_prefix(&self.repository)
            .ok()
            .and_then(|p| p.to_str())
            .ok_or_else(|| {
                Error::Provenance(format!(
                    "'{}' is not inside the repository '{}'",
                    path.display(),
                    self.repository.display()
                ))
            })
    }
}

#[async_trait]
impl LargeFileStore for GitLfsStore {
    async fn track(&self, path: &Path) -> Result<()> {
        let rel = self.relative(path)?;
        run(&self.repository, "git-lfs", &["track", rel]).await?;
        Ok(())
    }

    async fn add_and_commit(&self, path: &Path, message: &str) -> Result<String> {
        let path = std::path::absolute(path)?;
        if !path.exists() {
            // Nothing was produced; nothing to version.
            return Ok(self.head().await.unwrap_or_default());
        }

        self.track(&path).await?;

        let rel = self.relative(&path)?;
        run(&self.repository, "git", &["add", "--all", rel]).await?;
        if self.repository.join(".gitattributes").is_file() {
            run(&self.repository, "git", &["add", ".gitattributes"]).await?;
        }

        // An unchanged tree on a re-run is not an error; the prior commit
        // still addresses the same content.
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=walrus",
                "-c",
                "user.email=walrus@walr.us",
                "commit",
                "-m",
                message,
            ])
            .current_dir(&self.repository)
            .output()
            .await
            .map_err(|e| Error::Provenance(format!("could not run git commit: {}", e)))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.contains("nothing to commit") {
                return Err(Error::Provenance(format!(
                    "git commit failed: {}{}",
                    stdout.trim(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        self.head().await
    }

    async fn head(&self) -> Result<String> {
        run(&self.repository, "git", &["rev-parse", "HEAD"]).await
    }

    async fn reset(&self, commit: &str) -> Result<()> {
        run(&self.repository, "git", &["reset", "--hard", commit]).await?;
        Ok(())
    }

    async fn diff(&self, commit: &str) -> Result<String> {
        run(&self.repository, "git", &["diff", commit]).await
    }
}

async fn run(dir: &Path, program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::Provenance(format!("could not run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::Provenance(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
