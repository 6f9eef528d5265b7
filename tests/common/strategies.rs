use proptest::prelude::*;
use runflow_core::state_machine::RunState;

/// Strategy for any run state
pub fn run_state_strategy() -> impl Strategy<Value = RunState> {
    prop::sample::select(RunState::ALL.to_vec())
}

/// Strategy for sequences of requested transitions
pub fn transition_walk_strategy() -> impl Strategy<Value = Vec<RunState>> {
    prop::collection::vec(run_state_strategy(), 0..24)
}

/// A DAG over `0..node_count`: every edge points from a lower to a higher index
#[derive(Debug, Clone)]
pub struct GeneratedDag {
    pub node_count: usize,
    pub edges: Vec<(usize, usize)>,
}

impl GeneratedDag {
    pub fn is_valid_dag(&self) -> bool {
        self.edges
            .iter()
            .all(|(from, to)| from < to && *to < self.node_count)
    }
}

/// Strategy for DAGs with up to `max_nodes` nodes
pub fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = GeneratedDag> {
    (1..=max_nodes).prop_flat_map(|node_count| {
        let pairs: Vec<(usize, usize)> = (0..node_count)
            .flat_map(|from| ((from + 1)..node_count).map(move |to| (from, to)))
            .collect();
        let max_edges = pairs.len();
        prop::sample::subsequence(pairs, 0..=max_edges)
            .prop_map(move |edges| GeneratedDag { node_count, edges })
    })
}

/// A DAG together with a state for every node
pub fn dag_with_states_strategy(
    max_nodes: usize,
) -> impl Strategy<Value = (GeneratedDag, Vec<RunState>)> {
    dag_strategy(max_nodes).prop_flat_map(|dag| {
        let states = prop::collection::vec(run_state_strategy(), dag.node_count);
        (Just(dag), states)
    })
}
