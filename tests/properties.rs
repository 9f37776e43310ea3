mod common;

use chrono::Utc;
use common::*;
use flowcore::{
    execution::{ExecutionInput, ExecutionStatus, ExecutionStore, InMemoryExecutionStore, NodeStatus},
    runtime::DependencyGraph,
    workflow::{Node, Workflow},
};
use proptest::prelude::*;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Random DAG: node `i` may only point at nodes `j > i`
fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..8).prop_flat_map(|n| {
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let len = pairs.len();
        (
            Just(n),
            proptest::collection::vec(any::<bool>(), len).prop_map(move |mask| {
                pairs
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| *keep)
                    .map(|(p, _)| *p)
                    .collect::<Vec<_>>()
            }),
        )
    })
}

fn nodes(n: usize) -> Vec<Node> {
    (0..n).map(|i| node(&format!("n{}", i), &format!("s{}", i))).collect()
}

fn dag_workflow(n: usize, edges: &[(usize, usize)]) -> Workflow {
    let named: Vec<(String, String)> = edges
        .iter()
        .map(|(a, b)| (format!("n{}", a), format!("n{}", b)))
        .collect();
    let refs: Vec<(&str, &str)> = named.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    workflow("dag", nodes(n), &refs)
}

fn descendants(start: usize, edges: &[(usize, usize)]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for (from, to) in edges {
            if *from == current && seen.insert(*to) {
                stack.push(*to);
            }
        }
    }
    seen
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn initial_counts_equal_in_degree((n, edges) in dag()) {
        let wf = dag_workflow(n, &edges);
        let graph = DependencyGraph::build(&wf.nodes, &wf.edges).unwrap();
        let counts = graph.initial_counts();

        for i in 0..n {
            let expected = edges.iter().filter(|(_, to)| *to == i).count() as u32;
            prop_assert_eq!(counts[&format!("n{}", i)], expected);
        }
    }

    #[test]
    fn nodes_start_only_after_every_predecessor_succeeded((n, edges) in dag()) {
        let wf = dag_workflow(n, &edges);

        let (execution, calls) = runtime().block_on(async {
            let h = harness(vec![wf], FakeExecutor::new(), fast_config());
            let id = h.scheduler.start_execution("dag", json!({}), None).await.unwrap();
            let execution = wait_terminal(&h.scheduler, &id).await;
            (execution, h.executor.calls())
        });

        prop_assert_eq!(execution.status, ExecutionStatus::Completed);
        prop_assert_eq!(execution.results.len(), n);
        prop_assert_eq!(calls.len(), n);

        let position: HashMap<String, usize> =
            calls.iter().enumerate().map(|(i, s)| (s.clone(), i)).collect();
        for (from, to) in &edges {
            let (from_key, to_key) = (format!("s{}", from), format!("s{}", to));
            prop_assert!(position[&from_key] < position[&to_key]);
        }
    }

    #[test]
    fn terminal_failure_skips_every_descendant(
        (n, edges) in dag(),
        pick in any::<prop::sample::Index>(),
    ) {
        let failing = pick.index(n);
        let wf = dag_workflow(n, &edges);
        let executor = FakeExecutor::new().with(&format!("s{}", failing), Behavior::Fail);

        let (execution, calls) = runtime().block_on(async {
            let h = harness(vec![wf], executor, fast_config());
            let id = h.scheduler.start_execution("dag", json!({}), None).await.unwrap();
            let execution = wait_terminal(&h.scheduler, &id).await;
            let rows = working_rows(&*h.store, &id).await;
            assert_eq!(rows, 0);
            (execution, h.executor.calls())
        });

        prop_assert_eq!(execution.status, ExecutionStatus::Failed);
        prop_assert_eq!(execution.results.len(), n);
        prop_assert_eq!(execution.results[&format!("n{}", failing)].status, NodeStatus::Failed);

        for d in descendants(failing, &edges) {
            prop_assert_eq!(execution.results[&format!("n{}", d)].status, NodeStatus::Skipped);
            let step = format!("s{}", d);
            prop_assert!(!calls.contains(&step));
        }
    }

    #[test]
    fn concurrent_claims_hand_out_each_input_once(inputs in 1usize..24, claimers in 2usize..8) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let now = Utc::now();
        let rows: Vec<ExecutionInput> = nodes(inputs)
            .iter()
            .map(|node| ExecutionInput::for_node("e", node, 0, 0, 1.0, now))
            .collect();

        let claimed = runtime().block_on(async {
            store.create_inputs(&rows).await.unwrap();

            let tasks: Vec<_> = (0..claimers)
                .map(|c| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let mut mine = Vec::new();
                        while let Some(input) = store
                            .claim_next_input(&format!("w{}", c), Utc::now())
                            .await
                            .unwrap()
                        {
                            mine.push(input.node_id);
                            tokio::task::yield_now().await;
                        }
                        mine
                    })
                })
                .collect();

            let mut all = Vec::new();
            for task in tasks {
                all.extend(task.await.unwrap());
            }
            all
        });

        let unique: HashSet<&String> = claimed.iter().collect();
        prop_assert_eq!(claimed.len(), inputs);
        prop_assert_eq!(unique.len(), inputs);
    }
}
