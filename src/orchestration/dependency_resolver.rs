//! # Dependency Resolver
//!
//! Pure decisions over a workflow run's dependency graph. Nothing here reads
//! or writes storage: the workflow orchestrator loads current states, asks
//! the resolver what to do, and commits the answers.
//!
//! ## Rules
//!
//! - A node is eligible once every source node is `COMPLETED`; nodes without
//!   sources are eligible immediately.
//! - When a node is `FAILED` or `CANCELLED`, every pending node reachable over
//!   destination edges is cancelled. Traversal is breadth-first from the
//!   blocking node and visits each node once; it stops at nodes that are
//!   already running or finished.
//! - The graph is assumed acyclic. Visiting each node once keeps traversal
//!   finite on a malformed graph but does not otherwise detect cycles.

use crate::constants::status_groups;
use crate::models::WorkflowPipelineDependency;
use crate::state_machine::RunState;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// Adjacency view of the workflow pipelines taking part in one run
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Uuid>,
    sources: HashMap<Uuid, Vec<Uuid>>,
    destinations: HashMap<Uuid, Vec<Uuid>>,
}

impl DependencyGraph {
    /// Build a graph over `nodes`. Edges touching other nodes are dropped.
    pub fn new(
        nodes: impl IntoIterator<Item = Uuid>,
        edges: &[WorkflowPipelineDependency],
    ) -> Self {
        let mut graph = Self::default();
        let mut seen = HashSet::new();
        for node in nodes {
            if seen.insert(node) {
                graph.nodes.push(node);
            }
        }

        for edge in edges {
            let from = edge.from_workflow_pipeline_uuid;
            let to = edge.to_workflow_pipeline_uuid;
            if from == to || !seen.contains(&from) || !seen.contains(&to) {
                continue;
            }
            let sources = graph.sources.entry(to).or_default();
            if !sources.contains(&from) {
                sources.push(from);
                graph.destinations.entry(from).or_default().push(to);
            }
        }

        graph
    }

    pub fn nodes(&self) -> &[Uuid] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn sources_of(&self, node: Uuid) -> &[Uuid] {
        self.sources.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn destinations_of(&self, node: Uuid) -> &[Uuid] {
        self.destinations.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes without sources, in insertion order
    pub fn roots(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .copied()
            .filter(|node| self.sources_of(*node).is_empty())
            .collect()
    }
}

/// Stateless eligibility, cancellation and aggregation rules
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Whether every source of `node` has completed
    pub fn is_eligible(
        graph: &DependencyGraph,
        node: Uuid,
        states: &HashMap<Uuid, RunState>,
    ) -> bool {
        graph.sources_of(node).iter().all(|source| {
            states
                .get(source)
                .map(RunState::satisfies_dependencies)
                .unwrap_or(false)
        })
    }

    /// `NOT_STARTED` nodes whose sources have all completed, in graph order
    pub fn eligible(graph: &DependencyGraph, states: &HashMap<Uuid, RunState>) -> Vec<Uuid> {
        graph
            .nodes()
            .iter()
            .copied()
            .filter(|node| states.get(node) == Some(&RunState::NotStarted))
            .filter(|node| Self::is_eligible(graph, *node, states))
            .collect()
    }

    /// Pending nodes downstream of `blocked`, in breadth-first order
    pub fn cancellation_targets(
        graph: &DependencyGraph,
        blocked: Uuid,
        states: &HashMap<Uuid, RunState>,
    ) -> Vec<Uuid> {
        let mut visited = HashSet::from([blocked]);
        let mut queue = VecDeque::from([blocked]);
        let mut targets = Vec::new();

        while let Some(node) = queue.pop_front() {
            for &next in graph.destinations_of(node) {
                if !visited.insert(next) {
                    continue;
                }
                match states.get(&next) {
                    Some(state) if status_groups::PENDING_STATES.contains(state) => {
                        targets.push(next);
                        queue.push_back(next);
                    }
                    Some(state) if state.blocks_dependents() => queue.push_back(next),
                    // Running or completed runs are left alone, and so is whatever hangs off them
                    _ => {}
                }
            }
        }

        targets
    }

    /// Every pending node cut off by a failed or cancelled node
    pub fn cancellations(graph: &DependencyGraph, states: &HashMap<Uuid, RunState>) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for &node in graph.nodes() {
            let blocking = states
                .get(&node)
                .map(RunState::blocks_dependents)
                .unwrap_or(false);
            if !blocking {
                continue;
            }
            for target in Self::cancellation_targets(graph, node, states) {
                if seen.insert(target) {
                    targets.push(target);
                }
            }
        }

        if !targets.is_empty() {
            debug!(count = targets.len(), "Downstream runs cut off by upstream failure");
        }
        targets
    }

    /// Workflow run state implied by its constituent pipeline runs
    pub fn aggregate_state(states: impl IntoIterator<Item = RunState>) -> RunState {
        let states: Vec<RunState> = states.into_iter().collect();

        if states.iter().all(|state| *state == RunState::Completed) {
            // Includes the empty workflow
            return RunState::Completed;
        }

        if states.iter().all(RunState::in_final_state) {
            return if states.contains(&RunState::Failed) {
                RunState::Failed
            } else {
                RunState::Cancelled
            };
        }

        let started = states
            .iter()
            .any(|state| state.is_active() || state.in_final_state());
        if started {
            RunState::Running
        } else {
            RunState::NotStarted
        }
    }
}
