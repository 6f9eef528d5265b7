mod common;

use common::strategies::*;
use proptest::prelude::*;
use runflow_core::models::{WorkflowPipelineDependency, WorkflowRun};
use runflow_core::orchestration::{DependencyGraph, DependencyResolver};
use runflow_core::state_machine::{in_final_state, is_valid_transition, RunState, TransitionEngine};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const ALLOWED: [(RunState, RunState); 7] = [
    (RunState::NotStarted, RunState::Running),
    (RunState::NotStarted, RunState::Cancelled),
    (RunState::Queued, RunState::NotStarted),
    (RunState::Queued, RunState::Cancelled),
    (RunState::Running, RunState::Failed),
    (RunState::Running, RunState::Completed),
    (RunState::Running, RunState::Cancelled),
];

#[test]
fn test_transition_table_is_exhaustive() {
    let mut checked = 0;
    for from in RunState::ALL {
        for to in RunState::ALL {
            assert_eq!(
                is_valid_transition(from, to),
                ALLOWED.contains(&(from, to)),
                "{from} -> {to}"
            );
            checked += 1;
        }
        assert!(!is_valid_transition(from, from));
    }
    assert_eq!(checked, 36);
}

#[test]
fn test_final_states() {
    let finals: Vec<RunState> = RunState::ALL
        .into_iter()
        .filter(|state| in_final_state(*state))
        .collect();
    assert_eq!(
        finals,
        vec![RunState::Failed, RunState::Completed, RunState::Cancelled]
    );
}

fn build_graph(dag: &GeneratedDag) -> (Vec<Uuid>, DependencyGraph) {
    let nodes: Vec<Uuid> = (0..dag.node_count).map(|_| Uuid::new_v4()).collect();
    let edges: Vec<WorkflowPipelineDependency> = dag
        .edges
        .iter()
        .map(|(from, to)| WorkflowPipelineDependency::new(nodes[*from], nodes[*to]))
        .collect();
    let graph = DependencyGraph::new(nodes.clone(), &edges);
    (nodes, graph)
}

proptest! {
    /// Property: a rejected transition never changes the run
    #[test]
    fn rejected_transitions_leave_run_untouched(walk in transition_walk_strategy()) {
        let mut run = WorkflowRun::new(Uuid::new_v4());
        let mut applied = 0;

        for to in walk {
            let before = run.clone();
            match TransitionEngine::apply(&run, to) {
                Ok(next) => {
                    prop_assert!(is_valid_transition(before.state, to));
                    prop_assert_eq!(next.version, before.version + 1);
                    run = next;
                    applied += 1;
                }
                Err(_) => {
                    prop_assert!(!is_valid_transition(before.state, to));
                    prop_assert_eq!(&run, &before);
                }
            }
        }

        prop_assert_eq!(run.version, 1 + applied);
        prop_assert_eq!(run.completed_at.is_some(), run.state.in_final_state());
    }

    /// Property: terminal states accept nothing
    #[test]
    fn terminal_states_are_absorbing(from in run_state_strategy(), to in run_state_strategy()) {
        if from.in_final_state() {
            prop_assert!(!is_valid_transition(from, to));
        }
    }

    /// Property: generated DAG patterns are acyclic by construction
    #[test]
    fn generated_dags_are_valid(dag in dag_strategy(8)) {
        prop_assert!(dag.is_valid_dag());
    }

    /// Property: cancellation only ever targets pending runs downstream of a blocker
    #[test]
    fn cancellations_only_touch_pending_runs((dag, states) in dag_with_states_strategy(8)) {
        let (nodes, graph) = build_graph(&dag);
        let current: HashMap<Uuid, RunState> =
            nodes.iter().copied().zip(states.iter().copied()).collect();

        let targets = DependencyResolver::cancellations(&graph, &current);
        let mut unique = targets.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), targets.len());

        for target in targets {
            let state = current[&target];
            prop_assert!(state == RunState::NotStarted || state == RunState::Queued);
        }
    }

    /// Property: every pending run with a blocked or cut-off source is cancelled
    #[test]
    fn cancellations_cover_every_cut_off_run((dag, states) in dag_with_states_strategy(8)) {
        let (nodes, graph) = build_graph(&dag);
        let current: HashMap<Uuid, RunState> =
            nodes.iter().copied().zip(states.iter().copied()).collect();

        let pending =
            |index: usize| matches!(states[index], RunState::NotStarted | RunState::Queued);
        let mut cut_off = vec![false; dag.node_count];
        let mut changed = true;
        while changed {
            changed = false;
            for &(from, to) in &dag.edges {
                let upstream_blocked = states[from].blocks_dependents() || cut_off[from];
                if pending(to) && upstream_blocked && !cut_off[to] {
                    cut_off[to] = true;
                    changed = true;
                }
            }
        }

        let targets: HashSet<Uuid> = DependencyResolver::cancellations(&graph, &current)
            .into_iter()
            .collect();
        for (index, node) in nodes.iter().enumerate() {
            prop_assert_eq!(targets.contains(node), cut_off[index]);
        }
    }

    /// Property: eligible runs are not started and every source has completed
    #[test]
    fn eligible_runs_have_completed_sources((dag, states) in dag_with_states_strategy(8)) {
        let (nodes, graph) = build_graph(&dag);
        let current: HashMap<Uuid, RunState> =
            nodes.iter().copied().zip(states.iter().copied()).collect();

        for node in DependencyResolver::eligible(&graph, &current) {
            prop_assert_eq!(current[&node], RunState::NotStarted);
            for source in graph.sources_of(node) {
                prop_assert_eq!(current[source], RunState::Completed);
            }
        }
    }

    /// Property: the aggregate is terminal exactly when every run is terminal
    #[test]
    fn aggregate_is_terminal_iff_all_runs_are(
        states in prop::collection::vec(run_state_strategy(), 1..10)
    ) {
        let aggregate = DependencyResolver::aggregate_state(states.iter().copied());
        let all_final = states.iter().all(RunState::in_final_state);

        prop_assert_eq!(aggregate.in_final_state(), all_final);
        if all_final && states.contains(&RunState::Failed) {
            prop_assert_eq!(aggregate, RunState::Failed);
        }
    }
}
