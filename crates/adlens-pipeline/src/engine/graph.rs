//! Stage dependency graph.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use super::stage::Stage;
use super::state::StateField;
use crate::error::{PipelineError, PipelineResult};

/// Collects stages and edges, then validates them into a [`StageGraph`].
#[derive(Default)]
pub struct StageGraphBuilder {
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<(String, String)>,
}

impl StageGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<S: Stage + 'static>(self, stage: S) -> Self {
        self.shared_stage(Arc::new(stage))
    }

    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// `to` runs only after `from` has completed.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Rejects unknown stage names, duplicate names, cycles (self loops
    /// included), two stages writing one field, and reads of a field that
    /// no ancestor writes.
    pub fn build(self) -> PipelineResult<StageGraph> {
        let mut index = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if index.insert(stage.name(), i).is_some() {
                return Err(PipelineError::DuplicateStage(stage.name().to_string()));
            }
        }

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..self.stages.len() {
            graph.add_node(i);
        }
        for (from, to) in &self.edges {
            let from_idx = *index
                .get(from.as_str())
                .ok_or_else(|| PipelineError::UnknownStage(from.clone()))?;
            let to_idx = *index
                .get(to.as_str())
                .ok_or_else(|| PipelineError::UnknownStage(to.clone()))?;
            if from_idx == to_idx {
                return Err(PipelineError::Cycle(from.clone()));
            }
            graph.add_edge(from_idx, to_idx, ());
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            PipelineError::Cycle(self.stages[cycle.node_id()].name().to_string())
        })?;

        let mut writers: HashMap<StateField, usize> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if let Some(first) = writers.insert(stage.writes(), i) {
                return Err(PipelineError::DuplicateWriter {
                    field: stage.writes(),
                    first: self.stages[first].name().to_string(),
                    second: stage.name().to_string(),
                });
            }
        }

        // Ancestor sets, filled in topological order
        let mut ancestors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.stages.len()];
        let mut level = vec![0usize; self.stages.len()];
        for &node in &order {
            let mut set = BTreeSet::new();
            for pred in graph.neighbors_directed(node, Direction::Incoming) {
                set.insert(pred);
                set.extend(ancestors[pred].iter().copied());
                level[node] = level[node].max(level[pred] + 1);
            }
            ancestors[node] = set;
        }

        for (i, stage) in self.stages.iter().enumerate() {
            for &field in stage.reads() {
                let satisfied = writers
                    .get(&field)
                    .map(|w| ancestors[i].contains(w))
                    .unwrap_or(false);
                if !satisfied {
                    return Err(PipelineError::UnsatisfiedRead {
                        stage: stage.name().to_string(),
                        field,
                    });
                }
            }
        }

        let depth = level.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut waves = vec![Vec::new(); depth];
        for (i, &l) in level.iter().enumerate() {
            waves[l].push(i);
        }

        Ok(StageGraph {
            stages: self.stages,
            waves,
            graph,
        })
    }
}

/// Validated, acyclic stage graph.
pub struct StageGraph {
    stages: Vec<Arc<dyn Stage>>,
    /// Stage indices grouped by depth; registration order within a wave
    waves: Vec<Vec<usize>>,
    graph: DiGraphMap<usize, ()>,
}

impl StageGraph {
    pub fn builder() -> StageGraphBuilder {
        StageGraphBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages grouped into waves: every stage's predecessors sit in earlier waves.
    pub fn waves(&self) -> impl Iterator<Item = Vec<&Arc<dyn Stage>>> + '_ {
        self.waves
            .iter()
            .map(move |wave| wave.iter().map(|&i| &self.stages[i]).collect())
    }

    /// Names of the stages, wave by wave.
    pub fn schedule(&self) -> Vec<Vec<&'static str>> {
        self.waves()
            .map(|wave| wave.iter().map(|s| s.name()).collect())
            .collect()
    }

    /// Direct predecessors of a stage.
    pub fn predecessors(&self, name: &str) -> Vec<&'static str> {
        let Some(idx) = self.stages.iter().position(|s| s.name() == name) else {
            return Vec::new();
        };
        let mut preds: Vec<&'static str> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|i| self.stages[i].name())
            .collect();
        preds.sort_unstable();
        preds
    }

    /// Stages nothing depends on.
    pub fn sinks(&self) -> Vec<&Arc<dyn Stage>> {
        (0..self.stages.len())
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|i| &self.stages[i])
            .collect()
    }
}
