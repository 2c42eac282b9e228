//! Dependency resolution for flow graphs
//!
//! Builds forward/reverse adjacency from a flow's edges, rejects cycles,
//! and groups nodes into execution levels: every node in level N depends
//! only on nodes in earlier levels, so all nodes within a level are safe
//! to run concurrently.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{FlowEngineError, Result};
use crate::types::{FlowEdge, FlowNode, NodeId};

/// Parallelism characteristics of a resolved flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelismReport {
    pub total_nodes: usize,
    pub execution_levels: usize,
    pub max_parallel_nodes: usize,
    pub avg_parallel_nodes: f64,
    /// max_parallel_nodes / total_nodes (0.0 for an empty flow)
    pub parallelism_factor: f64,
}

/// Everything the resolver knows about a flow, in one serializable bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySummary {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub has_cycles: bool,
    pub cycle_path: Option<Vec<NodeId>>,
    pub execution_levels: Vec<Vec<NodeId>>,
    pub execution_order: Vec<NodeId>,
    pub critical_path: Vec<NodeId>,
    pub critical_path_length: usize,
    pub parallelism: ParallelismReport,
}

/// Resolves a flow graph into levelled execution order
pub struct DependencyResolver {
    node_ids: Vec<NodeId>,
    /// node -> nodes that consume its output
    dependents: HashMap<NodeId, Vec<NodeId>>,
    /// node -> nodes it needs results from
    dependencies: HashMap<NodeId, Vec<NodeId>>,
    edge_count: usize,
    levels: Option<Vec<Vec<NodeId>>>,
}

impl DependencyResolver {
    pub fn new(nodes: &[FlowNode], edges: &[FlowEdge]) -> Self {
        let mut node_ids = Vec::with_capacity(nodes.len());
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut dependencies: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node in nodes {
            if !node_ids.contains(&node.id) {
                node_ids.push(node.id.clone());
            }
            dependents.entry(node.id.clone()).or_default();
            dependencies.entry(node.id.clone()).or_default();
        }

        let mut edge_count = 0;
        for edge in edges {
            // Edges referencing unknown nodes are ignored rather than
            // invented: resolution only covers declared nodes.
            if !dependents.contains_key(&edge.source) || !dependencies.contains_key(&edge.target)
            {
                log::warn!(
                    "ignoring edge {} -> {}: unknown node",
                    edge.source,
                    edge.target
                );
                continue;
            }
            let downstream = dependents.entry(edge.source.clone()).or_default();
            if !downstream.contains(&edge.target) {
                downstream.push(edge.target.clone());
                dependencies
                    .entry(edge.target.clone())
                    .or_default()
                    .push(edge.source.clone());
                edge_count += 1;
            }
        }

        Self {
            node_ids,
            dependents,
            dependencies,
            edge_count,
            levels: None,
        }
    }

    /// Prerequisites of a node (empty slice for unknown ids)
    pub fn dependencies(&self, node_id: &str) -> &[NodeId] {
        self.dependencies
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Consumers of a node's output
    pub fn dependents(&self, node_id: &str) -> &[NodeId] {
        self.dependents
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The reverse adjacency map (node -> prerequisites)
    pub fn reverse_graph(&self) -> &HashMap<NodeId, Vec<NodeId>> {
        &self.dependencies
    }

    /// Detect a cycle with an iterative three-color depth-first search.
    ///
    /// Returns the cyclic path (closing node repeated at the end), or
    /// `None` for an acyclic graph.
    pub fn detect_cycles(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> = self
            .node_ids
            .iter()
            .map(|id| (id.as_str(), Color::White))
            .collect();

        for start in &self.node_ids {
            if color.get(start.as_str()) != Some(&Color::White) {
                continue;
            }
            // (node, index of the next child to visit)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            color.insert(start.as_str(), Color::Gray);

            loop {
                let (node, child_idx) = match stack.last_mut() {
                    Some(frame) => {
                        let snapshot = (frame.0, frame.1);
                        frame.1 += 1;
                        snapshot
                    }
                    None => break,
                };
                let children = self.dependents(node);
                if child_idx >= children.len() {
                    color.insert(node, Color::Black);
                    stack.pop();
                    continue;
                }
                let child = children[child_idx].as_str();
                match color.get(child) {
                    Some(Color::White) => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Some(Color::Gray) => {
                        // Gray nodes are always on the stack; slice the
                        // path from the revisited node to the top.
                        let from = stack
                            .iter()
                            .position(|(n, _)| *n == child)
                            .unwrap_or_default();
                        let mut cycle: Vec<NodeId> =
                            stack[from..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(child.to_string());
                        return Some(cycle);
                    }
                    _ => {}
                }
            }
        }
        None
    }

    /// Resolve the flow into execution levels (Kahn's algorithm).
    ///
    /// Fails with `CircularDependency` when the graph has a cycle, and
    /// with `InvalidDefinition` if levelling cannot account for every
    /// node. Levels are cached after the first successful call.
    pub fn resolve(&mut self) -> Result<Vec<Vec<NodeId>>> {
        if let Some(levels) = &self.levels {
            return Ok(levels.clone());
        }
        if let Some(cycle) = self.detect_cycles() {
            return Err(FlowEngineError::CircularDependency(cycle));
        }
        let levels = self.level_order().ok_or_else(|| {
            FlowEngineError::InvalidDefinition(
                "unable to resolve execution order for all nodes".to_string(),
            )
        })?;
        self.levels = Some(levels.clone());
        Ok(levels)
    }

    // Priming the Kahn queue in declaration order keeps level contents
    // deterministic for a given definition.
    fn level_order(&self) -> Option<Vec<Vec<NodeId>>> {
        let mut in_degree: HashMap<&str, usize> = self
            .node_ids
            .iter()
            .map(|id| (id.as_str(), self.dependencies(id).len()))
            .collect();

        let mut current: Vec<&str> = self
            .node_ids
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        let mut seen = 0usize;

        while !current.is_empty() {
            seen += current.len();
            let mut next: Vec<&str> = Vec::new();
            for node in &current {
                for dependent in self.dependents(node) {
                    if let Some(remaining) = in_degree.get_mut(dependent.as_str()) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            next.push(dependent.as_str());
                        }
                    }
                }
            }
            levels.push(current.iter().map(|id| id.to_string()).collect());
            current = next;
        }

        if seen == self.node_ids.len() {
            Some(levels)
        } else {
            None
        }
    }

    /// Execution level of a node, if the graph resolves
    pub fn execution_level(&mut self, node_id: &str) -> Option<usize> {
        let levels = self.resolve().ok()?;
        levels.iter().position(|level| level.iter().any(|n| n == node_id))
    }

    /// Longest dependency chain through the flow.
    ///
    /// Empty for cyclic graphs; a single-node flow's critical path is
    /// that one node.
    pub fn critical_path(&mut self) -> Vec<NodeId> {
        let Ok(levels) = self.resolve() else {
            return Vec::new();
        };

        // Longest-path DP over the levelled (topological) order.
        let mut chain_len: HashMap<&str, usize> = HashMap::new();
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let order: Vec<&NodeId> = levels.iter().flatten().collect();

        for node in &order {
            let mut best = 1;
            for dep in self.dependencies(node) {
                let candidate = chain_len.get(dep.as_str()).copied().unwrap_or(1) + 1;
                if candidate > best {
                    best = candidate;
                    previous.insert(node.as_str(), dep.as_str());
                }
            }
            chain_len.insert(node.as_str(), best);
        }

        // Tie-break on the topological order so the result is stable.
        let mut tail: &str = match order.first() {
            Some(first) => first.as_str(),
            None => return Vec::new(),
        };
        let mut longest = 0usize;
        for node in &order {
            let len = chain_len.get(node.as_str()).copied().unwrap_or(1);
            if len > longest {
                longest = len;
                tail = node.as_str();
            }
        }

        let mut path = vec![tail.to_string()];
        while let Some(&prev) = previous.get(tail) {
            path.push(prev.to_string());
            tail = prev;
        }
        path.reverse();
        path
    }

    /// Parallelism metrics for the resolved levels
    pub fn parallelism(&mut self) -> ParallelismReport {
        let levels = self.resolve().unwrap_or_default();
        let total_nodes = self.node_ids.len();
        let max_parallel = levels.iter().map(Vec::len).max().unwrap_or(0);
        let avg_parallel = if levels.is_empty() {
            0.0
        } else {
            total_nodes as f64 / levels.len() as f64
        };
        let factor = if total_nodes == 0 {
            0.0
        } else {
            max_parallel as f64 / total_nodes as f64
        };
        ParallelismReport {
            total_nodes,
            execution_levels: levels.len(),
            max_parallel_nodes: max_parallel,
            avg_parallel_nodes: avg_parallel,
            parallelism_factor: factor,
        }
    }

    /// Full dependency summary, including cycle diagnostics
    pub fn summary(&mut self) -> DependencySummary {
        let cycle = self.detect_cycles();
        let levels = self.resolve().unwrap_or_default();
        let order: Vec<NodeId> = levels.iter().flatten().cloned().collect();
        let critical = self.critical_path();
        DependencySummary {
            total_nodes: self.node_ids.len(),
            total_edges: self.edge_count,
            has_cycles: cycle.is_some(),
            cycle_path: cycle,
            execution_levels: levels,
            execution_order: order,
            critical_path_length: critical.len(),
            critical_path: critical,
            parallelism: self.parallelism(),
        }
    }
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("nodes", &self.node_ids.len())
            .field("edges", &self.edge_count)
            .field("resolved", &self.levels.is_some())
            .finish()
    }
}
