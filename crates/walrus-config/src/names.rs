//! Pipeline and stage name validation.

use regex::Regex;
use std::sync::LazyLock;

use walrus_core::{PARALLEL_IDENTIFIER, Pipeline};

use crate::{ConfigError, ConfigResult};

static BAD_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\W\s]").unwrap());

/// Verify that the pipeline name and every stage name is a single word
/// without special characters, and that no stage name contains the reserved
/// parallel identifier.
pub fn check_names(pipeline: &Pipeline) -> ConfigResult<()> {
    if bad_name(&pipeline.name) {
        return Err(ConfigError::Name {
            name: pipeline.name.clone(),
            explanation: "should be a single word without any special characters".to_string(),
        });
    }

    for stage in &pipeline.stages {
        if bad_name(&stage.name) {
            return Err(ConfigError::Name {
                name: stage.name.clone(),
                explanation: "should be a single word without any special characters".to_string(),
            });
        }
        if stage.name.contains(PARALLEL_IDENTIFIER) {
            return Err(ConfigError::Name {
                name: stage.name.clone(),
                explanation: format!("should not contain {}", PARALLEL_IDENTIFIER),
            });
        }
    }

    Ok(())
}

fn bad_name(name: &str) -> bool {
    name.is_empty() || BAD_NAME.is_match(name)
}
