//! Dependency rewriting after variable fan-out.
//!
//! Expansion leaves downstream stages referencing the original stage name.
//! For every parallel clone `<orig>_parallel_<val>`, downstream input lists
//! are rewritten so that parallel peers pair up on the shared value suffix
//! and non-parallel successors fan in across all clones.

use walrus_core::{PARALLEL_IDENTIFIER, Pipeline};

/// Rewrite stage input lists so they reference parallel clones instead of
/// the originals those clones replaced.
pub fn fix_dependencies(pipeline: &mut Pipeline) {
    let names: Vec<String> = pipeline.stages.iter().map(|s| s.name.clone()).collect();

    for name in names {
        let Some((original, value)) = name.split_once(PARALLEL_IDENTIFIER) else {
            continue;
        };
        let peer_suffix = format!("{}{}", PARALLEL_IDENTIFIER, value);

        for dependent in pipeline.stages.iter_mut() {
            if dependent.name == name || !slice_contains(&dependent.inputs, original) {
                continue;
            }

            if dependent.name.ends_with(&peer_suffix) {
                // Parallel peer: pair with the clone sharing our value suffix.
                for input in dependent.inputs.iter_mut() {
                    if input == original {
                        *input = name.clone();
                    }
                }
            } else if !dependent.name.contains(PARALLEL_IDENTIFIER) {
                if slice_contains(&dependent.inputs, PARALLEL_IDENTIFIER) {
                    // Already fanning in across clones; add this one.
                    dependent.inputs.push(name.clone());
                } else {
                    // First clone encountered converts the single reference.
                    for input in dependent.inputs.iter_mut() {
                        *input = input.replace(original, &name);
                    }
                }
            }
        }
    }
}

fn slice_contains(items: &[String], needle: &str) -> bool {
    items.iter().any(|item| item.contains(needle))
}
