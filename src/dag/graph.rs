// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::{debug, warn};

use crate::errors::GraphFault;
use crate::exec::TaskId;
use crate::types::{DanglingPolicy, DuplicatePolicy};

/// Scheduling-relevant view of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: TaskId,
    /// Direct dependencies: tasks that must complete before this one can run.
    pub dependencies: Vec<TaskId>,
    pub priority: i32,
    /// Already resolved (explicit flag or heuristic).
    pub parallelizable: bool,
}

impl GraphNode {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            priority: 0,
            parallelizable: true,
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallelizable = false;
        self
    }
}

/// In-memory DAG over task ids.
///
/// Nodes live in a `Vec` in insertion order and are addressed by index; a
/// name -> index table and a reverse (dependents) index keyed by dependency
/// id sit next to it. Dependencies may reference ids that are added later, or
/// never: with [`DanglingPolicy::Ignore`] such a dependency counts as satisfied.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<TaskId, usize>,
    dependents: HashMap<TaskId, Vec<usize>>,
    duplicate_policy: DuplicatePolicy,
    dangling_policy: DanglingPolicy,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(duplicate_policy: DuplicatePolicy, dangling_policy: DanglingPolicy) -> Self {
        Self {
            duplicate_policy,
            dangling_policy,
            ..Self::default()
        }
    }

    /// Register a node and its dependency set.
    ///
    /// With [`DuplicatePolicy::Overwrite`] a repeated id replaces the earlier
    /// node but keeps its original position.
    pub fn add(&mut self, node: GraphNode) -> Result<(), GraphFault> {
        match self.index.get(&node.id).copied() {
            Some(idx) => match self.duplicate_policy {
                DuplicatePolicy::Reject => Err(GraphFault::DuplicateTask(node.id)),
                DuplicatePolicy::Overwrite => {
                    warn!(task = %node.id, "duplicate task id; later definition wins");
                    for dep in &self.nodes[idx].dependencies {
                        if let Some(list) = self.dependents.get_mut(dep) {
                            list.retain(|&i| i != idx);
                        }
                    }
                    self.link_dependents(idx, &node.dependencies);
                    self.nodes[idx] = node;
                    Ok(())
                }
            },
            None => {
                let idx = self.nodes.len();
                self.link_dependents(idx, &node.dependencies);
                self.index.insert(node.id.clone(), idx);
                self.nodes.push(node);
                Ok(())
            }
        }
    }

    fn link_dependents(&mut self, idx: usize, deps: &[TaskId]) {
        for dep in deps {
            let list = self.dependents.entry(dep.clone()).or_default();
            if !list.contains(&idx) {
                list.push(idx);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.node(id)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that list `id` as a dependency, in insertion order.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let mut idxs = self.dependents.get(id).cloned().unwrap_or_default();
        idxs.sort_unstable();
        idxs.into_iter().map(|i| self.nodes[i].id.as_str()).collect()
    }

    /// Every task that (transitively) depends on `id`.
    pub fn transitive_dependents_of(&self, id: &str) -> HashSet<TaskId> {
        let mut out = HashSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if out.insert(dependent.to_string()) {
                    stack.push(dependent);
                }
            }
        }
        out
    }

    /// Whether every dependency of `id` is in `completed`.
    ///
    /// Dependencies on ids that are not part of the graph count as satisfied.
    /// Returns `false` for an unknown `id`.
    pub fn can_execute(&self, id: &str, completed: &HashSet<TaskId>) -> bool {
        match self.node(id) {
            Some(node) => node
                .dependencies
                .iter()
                .all(|dep| !self.contains(dep) || completed.contains(dep)),
            None => false,
        }
    }

    /// Check dependency references against the configured [`DanglingPolicy`].
    pub fn validate(&self) -> Result<(), GraphFault> {
        if self.dangling_policy == DanglingPolicy::Ignore {
            return Ok(());
        }
        for node in &self.nodes {
            if let Some(dep) = node.dependencies.iter().find(|d| !self.contains(d)) {
                return Err(GraphFault::UnknownDependency {
                    task: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// Depth-first topological order: every task appears after its dependencies.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphFault> {
        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| n.dependencies.iter().any(|d| *d == n.id))
        {
            return Err(GraphFault::CircularDependency(node.id.clone()));
        }

        // Edge direction: dependency -> dependent.
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let handles: Vec<_> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        for (idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&dep_idx) = self.index.get(dep) {
                    graph.add_edge(handles[dep_idx], handles[idx], ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .map(|h| self.nodes[graph[h]].id.clone())
                .collect()),
            Err(cycle) => {
                let id = self.nodes[graph[cycle.node_id()]].id.clone();
                Err(GraphFault::CircularDependency(id))
            }
        }
    }

    /// Greedy level-by-level decomposition into phases.
    ///
    /// Each round takes every unplaced task whose dependencies are already
    /// placed and that may run in parallel. If only sequential tasks are
    /// ready, the single highest-priority one (earliest on ties) forms a phase
    /// on its own. Placement counts as completion for the following rounds,
    /// so phase `k + 1` assumes phase `k` succeeds.
    pub fn execution_phases(&self) -> Result<Vec<Vec<TaskId>>, GraphFault> {
        self.validate()?;

        let mut placed = vec![false; self.nodes.len()];
        let mut remaining: Vec<usize> = (0..self.nodes.len()).collect();
        let mut phases = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| self.deps_placed(i, &placed))
                .collect();

            let parallel: Vec<usize> = ready
                .iter()
                .copied()
                .filter(|&i| self.nodes[i].parallelizable)
                .collect();

            let phase = if !parallel.is_empty() {
                parallel
            } else if let Some(best) = ready
                .iter()
                .copied()
                .max_by_key(|&i| (self.nodes[i].priority, std::cmp::Reverse(i)))
            {
                vec![best]
            } else {
                return Err(self.stuck_fault(&remaining));
            };

            for &i in &phase {
                placed[i] = true;
            }
            remaining.retain(|&i| !placed[i]);

            let ids: Vec<TaskId> = phase.iter().map(|&i| self.nodes[i].id.clone()).collect();
            debug!(phase = phases.len(), tasks = ?ids, "planned phase");
            phases.push(ids);
        }

        Ok(phases)
    }

    fn deps_placed(&self, idx: usize, placed: &[bool]) -> bool {
        self.nodes[idx]
            .dependencies
            .iter()
            .all(|dep| match self.index.get(dep) {
                Some(&d) => placed[d],
                None => true,
            })
    }

    fn stuck_fault(&self, remaining: &[usize]) -> GraphFault {
        match self.topological_order() {
            Err(fault) => fault,
            Ok(_) => GraphFault::Unresolvable(
                remaining.iter().map(|&i| self.nodes[i].id.clone()).collect(),
            ),
        }
    }
}
