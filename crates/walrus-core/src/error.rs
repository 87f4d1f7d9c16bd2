//! Error types for walrus.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("image error: {0}")]
    Image(String),

    #[error("could not create container: {0}")]
    ContainerCreate(String),

    #[error("could not start container after {attempts} attempts: {message}")]
    ContainerStart { attempts: u32, message: String },

    #[error("error waiting for container: {0}")]
    ContainerWait(String),

    #[error("log error: {0}")]
    Log(String),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error(
        "stage '{stage}' failed with exit code {exit_code}: {message}\n{detail}\nlogs:\n{logs}"
    )]
    StageFailure {
        stage: String,
        exit_code: i64,
        detail: String,
        message: String,
        logs: String,
    },

    #[error("provenance error: {0}")]
    Provenance(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that pre-run cleanup and best-effort removal swallow:
    /// the container is already gone or already stopped.
    pub fn is_benign_cleanup(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::NotRunning(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
