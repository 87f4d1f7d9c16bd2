//! Reading and writing pipeline descriptions.

use std::fs;
use std::path::Path;

use walrus_core::Pipeline;

use crate::{ConfigError, ConfigResult, deps, graph, names, variables};

/// Load and normalize a pipeline description.
///
/// Composes: read → decode by extension → name validation → variable
/// fan-out → dependency fixing → graph validation. The returned pipeline is
/// ready for scheduling.
pub fn parse_config(path: impl AsRef<Path>) -> ConfigResult<Pipeline> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;

    let mut pipeline = read_description(&bytes, path)?;

    names::check_names(&pipeline)?;
    variables::expand_variables(&mut pipeline)?;
    deps::fix_dependencies(&mut pipeline);
    graph::validate(&pipeline)?;

    Ok(pipeline)
}

/// Decode a description, dispatching on the file extension.
pub fn read_description(bytes: &[u8], path: &Path) -> ConfigResult<Pipeline> {
    match extension(path) {
        "json" => Ok(serde_json::from_slice(bytes)?),
        "yaml" => Ok(serde_yaml::from_slice(bytes)?),
        other => Err(ConfigError::Format(other.to_string())),
    }
}

/// Write a description back out, dispatching on the file extension.
pub fn write_description(pipeline: &Pipeline, path: impl AsRef<Path>) -> ConfigResult<()> {
    let path = path.as_ref();
    let bytes = match extension(path) {
        "json" => serde_json::to_vec_pretty(pipeline)?,
        "yaml" => serde_yaml::to_string(pipeline)?.into_bytes(),
        other => return Err(ConfigError::Format(other.to_string())),
    };
    fs::write(path, bytes)?;
    Ok(())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}
