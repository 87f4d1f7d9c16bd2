//! Stage graph validation and DOT export.

use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use walrus_core::Pipeline;

use crate::{ConfigError, ConfigResult};

/// Check that the expanded stage graph is well formed: stage names are
/// unique, every input references an existing stage, and there are no
/// cycles. Runs before scheduling so a bad graph never blocks a worker.
pub fn validate(pipeline: &Pipeline) -> ConfigResult<()> {
    let graph = build_graph(pipeline)?;
    toposort(&graph, None)
        .map_err(|cycle| ConfigError::CycleDetected(graph[cycle.node_id()].clone()))?;
    Ok(())
}

/// Write the stage graph as a DOT file.
pub fn write_dot(pipeline: &Pipeline, path: impl AsRef<Path>) -> ConfigResult<()> {
    let graph = build_graph(pipeline)?;
    let dot = Dot::with_config(&graph, &[Config::EdgeNoLabel]);
    fs::write(path, format!("{:?}", dot))?;
    Ok(())
}

fn build_graph(pipeline: &Pipeline) -> ConfigResult<DiGraph<String, ()>> {
    let mut graph = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for stage in &pipeline.stages {
        if index.contains_key(stage.name.as_str()) {
            return Err(ConfigError::Duplicate(stage.name.clone()));
        }
        index.insert(&stage.name, graph.add_node(stage.name.clone()));
    }

    for stage in &pipeline.stages {
        for input in &stage.inputs {
            let from = index
                .get(input.as_str())
                .ok_or_else(|| ConfigError::UnknownInput {
                    stage: stage.name.clone(),
                    input: input.clone(),
                })?;
            graph.add_edge(*from, index[stage.name.as_str()], ());
        }
    }

    Ok(graph)
}
