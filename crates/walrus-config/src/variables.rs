//! Variable fan-out expansion.
//!
//! Stage commands reference variables as `{{name}}`. Single-valued
//! variables are substituted in place; multi-valued variables fan the
//! referencing stage out into one clone per value, named
//! `<stage>_parallel_<value>`, and the original stage is dropped.

use walrus_core::{PARALLEL_IDENTIFIER, Pipeline, Stage};

use crate::{ConfigError, ConfigResult};

/// Substitute variable references in every stage command, cloning stages
/// referenced by multi-valued variables. Stages superseded by clones are
/// removed from the pipeline.
pub fn expand_variables(pipeline: &mut Pipeline) -> ConfigResult<()> {
    let variables = pipeline.variables.clone();
    let mut clones: Vec<Stage> = Vec::new();

    for stage in pipeline.stages.iter_mut() {
        for variable in &variables {
            let token = format!("{{{{{}}}}}", variable.name);
            if !stage.cmd.iter().any(|c| c.contains(&token)) {
                continue;
            }

            match variable.values.as_slice() {
                [] => return Err(ConfigError::EmptyVariable(variable.name.clone())),
                [value] => {
                    for cmd in stage.cmd.iter_mut() {
                        *cmd = cmd.replace(&token, value);
                    }
                }
                values => {
                    for value in values {
                        let mut clone = stage.clone();
                        clone.name =
                            format!("{}{}{}", stage.name, PARALLEL_IDENTIFIER, value);
                        clone.cmd = stage
                            .cmd
                            .iter()
                            .map(|c| c.replace(&token, value))
                            .collect();
                        clone.removed = false;
                        clones.push(clone);
                    }
                    stage.removed = true;
                }
            }
        }
    }

    pipeline.stages.append(&mut clones);
    pipeline.stages.retain(|s| !s.removed);

    Ok(())
}
