use crate::types::{StageId, StageSpec, WorkflowSpec};
use anyhow::{anyhow, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Stages eligible to run next: not yet completed, with every dependency
/// completed. Pure; safe to call repeatedly as `completed` grows.
pub fn ready_stages<'a>(
    workflow: &'a WorkflowSpec,
    completed: &HashSet<StageId>,
) -> Vec<&'a StageSpec> {
    workflow
        .stages
        .iter()
        .filter(|stage| !completed.contains(&stage.id))
        .filter(|stage| stage.depends_on.iter().all(|dep| completed.contains(dep)))
        .collect()
}

/// DAG view of a workflow used for diagnostics and cascade decisions.
///
/// Construction never fails: dependencies on undefined stages are kept
/// aside as dangling references and cycles are left in the graph, since both
/// surface at run time as an unresolvable graph.
pub struct WorkflowDag {
    graph: DiGraph<StageId, ()>,
    stage_indices: HashMap<StageId, NodeIndex>,
    dangling: Vec<(StageId, StageId)>,
}

impl WorkflowDag {
    /// Build a DAG from a workflow specification
    pub fn from_workflow(workflow: &WorkflowSpec) -> Self {
        let mut graph = DiGraph::new();
        let mut stage_indices = HashMap::new();
        let mut dangling = Vec::new();

        for stage in &workflow.stages {
            stage_indices
                .entry(stage.id.clone())
                .or_insert_with(|| graph.add_node(stage.id.clone()));
        }

        for stage in &workflow.stages {
            let stage_idx = stage_indices[&stage.id];

            for dep_id in &stage.depends_on {
                match stage_indices.get(dep_id) {
                    // Edge from dependency to dependent (dep -> stage)
                    Some(dep_idx) => {
                        graph.update_edge(*dep_idx, stage_idx, ());
                    }
                    None => dangling.push((stage.id.clone(), dep_id.clone())),
                }
            }
        }

        Self {
            graph,
            stage_indices,
            dangling,
        }
    }

    fn index(&self, stage_id: &StageId) -> Result<NodeIndex> {
        self.stage_indices
            .get(stage_id)
            .copied()
            .ok_or_else(|| anyhow!("Stage {} not found", stage_id))
    }

    /// Get dependencies for a stage (defined stages only)
    pub fn dependencies(&self, stage_id: &StageId) -> Result<Vec<StageId>> {
        let node = self.index(stage_id)?;
        Ok(self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect())
    }

    /// Get stages that depend directly on the given stage
    pub fn dependents(&self, stage_id: &StageId) -> Result<Vec<StageId>> {
        let node = self.index(stage_id)?;
        Ok(self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect())
    }

    /// Stages with no dependencies at all (can start immediately)
    pub fn entry_stages(&self) -> Vec<StageId> {
        let blocked: HashSet<&StageId> = self.dangling.iter().map(|(stage, _)| stage).collect();

        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].clone())
            .filter(|id| !blocked.contains(id))
            .collect()
    }

    /// (stage, missing dependency) pairs
    pub fn dangling(&self) -> &[(StageId, StageId)] {
        &self.dangling
    }

    /// Groups of stages that depend on each other in a cycle
    pub fn cycles(&self) -> Vec<Vec<StageId>> {
        let mut cycles: Vec<Vec<StageId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.graph.contains_edge(component[0], component[0])
            })
            .map(|component| {
                let mut ids: Vec<StageId> =
                    component.into_iter().map(|n| self.graph[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Every stage transitively downstream of `roots`, excluding the roots
    /// themselves unless they are reachable from another root.
    pub fn downstream_of(&self, roots: &HashSet<StageId>) -> HashSet<StageId> {
        let mut reached = HashSet::new();

        for root in roots {
            let Some(&start) = self.stage_indices.get(root) else {
                continue;
            };

            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                if node != start || self.graph.contains_edge(start, start) {
                    reached.insert(self.graph[node].clone());
                }
            }
        }

        reached
    }

    /// Length of the longest dependency chain, counted in stages.
    ///
    /// This is the number of rounds a fully successful run needs. `None`
    /// when the graph has a cycle.
    pub fn critical_path_len(&self) -> Option<usize> {
        let order = toposort(&self.graph, None).ok()?;
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();

        for node in order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|n| depth.get(&n))
                .max()
                .map_or(1, |d| d + 1);
            depth.insert(node, level);
        }

        Some(depth.into_values().max().unwrap_or(0))
    }

    /// Human-readable reason why `outstanding` stages can never become ready
    pub fn describe_unresolvable(&self, outstanding: &[StageId]) -> String {
        let mut parts = Vec::new();

        for cycle in self.cycles() {
            let names: Vec<&str> = cycle.iter().map(|id| id.0.as_str()).collect();
            parts.push(format!("cycle between [{}]", names.join(", ")));
        }

        for (stage, missing) in &self.dangling {
            parts.push(format!(
                "stage '{}' depends on undefined stage '{}'",
                stage, missing
            ));
        }

        if parts.is_empty() {
            let names: Vec<&str> = outstanding.iter().map(|id| id.0.as_str()).collect();
            parts.push(format!("stages [{}] never became ready", names.join(", ")));
        }

        parts.join("; ")
    }
}
