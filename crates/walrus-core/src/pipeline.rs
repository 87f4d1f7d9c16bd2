//! Pipeline, stage and variable definitions.
//!
//! These types mirror the on-disk description format: field names are
//! PascalCase in both JSON and YAML, and every field except the names is
//! optional.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reserved infix used to name stages generated by variable fan-out
/// (`<original>_parallel_<value>`). User-supplied stage names must not
/// contain it.
pub const PARALLEL_IDENTIFIER: &str = "_parallel_";

/// A data pipeline: a named, ordered collection of stages plus the
/// variables that parameterize them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pipeline {
    /// Pipeline name. A single word without special characters.
    pub name: String,
    /// Stages in description order.
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub comment: String,
    /// Variables referenced from stage commands as `{{name}}`.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Record provenance after a successful run.
    #[serde(default)]
    pub commit: bool,
    /// Total run duration, written after a run.
    #[serde(default, with = "duration_nanos")]
    pub runtime: Duration,
    /// Repository head after the provenance pass, written after a run.
    #[serde(default)]
    pub version: String,
}

/// A variable with one or more values. Multi-valued variables fan the
/// referencing stage out into one clone per value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// One node in the pipeline DAG; produces output by running one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stage {
    /// Stage name. A single word without special characters; doubles as the
    /// container name and the output directory name.
    pub name: String,
    /// Container image reference, `repo[:tag]` with tag defaulting to
    /// `latest`.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Environment assignments, `KEY=VALUE`.
    #[serde(default)]
    pub env: Vec<String>,
    /// Names of upstream stages this stage reads from.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Extra mounts, `host[:client[:propagation]]`.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub parallelism: Parallelism,
    /// Reuse a prior successful container run when possible.
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub mount_propagation: String,
    /// Commit id of this stage's output, written after a run.
    #[serde(default)]
    pub version: String,
    /// Stage execution duration, written after a run.
    #[serde(default, with = "duration_nanos")]
    pub runtime: Duration,
    /// Transient marker set on stages superseded by parallel clones during
    /// variable expansion; such stages never reach the scheduler.
    #[serde(skip)]
    pub removed: bool,
}

/// Parallelism policy of a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parallelism {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub constant: i64,
}

/// Split an image reference into repository and tag, defaulting the tag to
/// `latest`.
pub fn repo_and_tag(image: &str) -> (&str, &str) {
    match image.split_once(':') {
        Some((repo, tag)) => (repo, tag),
        None => (image, "latest"),
    }
}

impl Stage {
    /// Normalized `repo:tag` reference with the default tag applied.
    pub fn image_ref(&self) -> String {
        let (repo, tag) = repo_and_tag(&self.image);
        format!("{}:{}", repo, tag)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        if !self.version.is_empty() {
            writeln!(f, "Version: {}", self.version)?;
        }
        writeln!(f, "Stages:")?;
        for stage in &self.stages {
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "\t Image: {}", self.image)?;
        writeln!(f, "\t Entrypoint: {}", self.entrypoint.join(" "))?;
        writeln!(f, "\t Cmd: {}", self.cmd.join(" "))?;
        writeln!(f, "\t Env: {}", self.env.join(" "))?;
        writeln!(f, "\t Inputs: {}", self.inputs.join(" "))?;
        writeln!(f, "\t Volumes: {}", self.volumes.join(" "))?;
        writeln!(f, "\t Comment: {}", self.comment)?;
        writeln!(f, "\t Version: {}", self.version)?;
        Ok(())
    }
}

/// Durations serialize as integer nanoseconds, matching the description
/// format's `Runtime` fields.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }
}
