//! Description loading errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("name error: '{name}' {explanation}")]
    Name { name: String, explanation: String },

    #[error("unknown description format '{0}': must be .json or .yaml")]
    Format(String),

    #[error("variable '{0}' is referenced but has no values")]
    EmptyVariable(String),

    #[error("stage '{stage}' lists unknown input '{input}'")]
    UnknownInput { stage: String, input: String },

    #[error("duplicate stage name: {0}")]
    Duplicate(String),

    #[error("cycle detected in stage dependencies at '{0}'")]
    CycleDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
