//! Shared fixtures: a scripted node executor, workflow builders and a
//! scheduler harness running on the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    errors::NodeError,
    execution::{Execution, ExecutionStore, InMemoryExecutionStore},
    runtime::{
        backoff::RetryBackoff, NodeExecutor, ReferenceResolver, ResourceLookup, Scheduler,
        SchedulerConfig, WorkerPool,
    },
    workflow::{Edge, InputParamDef, Node, ParamType, Workflow, WorkflowSource},
};
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// What a script does when the fake executor runs it
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return the resolved params as an object
    Echo,
    /// Return `{"y": params.text + suffix}`
    Append(&'static str),
    /// Fail the first `n` calls, then echo
    FailTimes(u32),
    /// Always fail
    Fail,
    /// Sleep, then echo
    Sleep(Duration),
}

#[derive(Default)]
pub struct FakeExecutor {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, script_ref: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(script_ref.to_string(), behavior);
        self
    }

    /// Script refs in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn call_count(&self, script_ref: &str) -> usize {
        self.calls().iter().filter(|s| *s == script_ref).count()
    }

    pub fn params_of(&self, script_ref: &str) -> Vec<Map<String, Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == script_ref)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl NodeExecutor for FakeExecutor {
    async fn run(
        &self,
        script_ref: &str,
        params: &Map<String, Value>,
        _timeout: Duration,
    ) -> Result<Value, NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((script_ref.to_string(), params.clone()));

        match self.behaviors.get(script_ref).cloned().unwrap_or(Behavior::Echo) {
            Behavior::Echo => Ok(Value::Object(params.clone())),
            Behavior::Append(suffix) => {
                let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(json!({ "y": format!("{}{}", text, suffix) }))
            }
            Behavior::FailTimes(n) => {
                let mut failures = self.failures.lock().unwrap();
                let seen = failures.entry(script_ref.to_string()).or_insert(0);
                if *seen < n {
                    *seen += 1;
                    Err(NodeError::Execution {
                        message: format!("flaky failure {}", seen),
                        details: Some(json!({ "attempt": *seen })),
                    })
                } else {
                    Ok(Value::Object(params.clone()))
                }
            }
            Behavior::Fail => Err(NodeError::execution("script raised")),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(Value::Object(params.clone()))
            }
        }
    }
}

/// Workflow source that skips registry validation
#[derive(Default)]
pub struct StaticWorkflows(pub HashMap<String, Workflow>);

#[async_trait]
impl WorkflowSource for StaticWorkflows {
    async fn get_workflow(&self, workflow_id: &str) -> anyhow::Result<Option<Workflow>> {
        Ok(self.0.get(workflow_id).cloned())
    }
}

pub fn node(id: &str, script_ref: &str) -> Node {
    Node {
        id: id.to_string(),
        name: id.to_string(),
        script_ref: script_ref.to_string(),
        input_params: Vec::new(),
        params: Map::new(),
        max_retries: 0,
        timeout_seconds: 30,
        priority: None,
    }
}

pub fn with_text(mut node: Node, raw: &str) -> Node {
    node.input_params.push(InputParamDef {
        name: "text".to_string(),
        param_type: ParamType::String,
        required: true,
        default: None,
    });
    node.params.insert("text".to_string(), json!(raw));
    node
}

pub fn workflow(id: &str, nodes: Vec<Node>, edges: &[(&str, &str)]) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        workspace_id: "default".to_string(),
        priority: 0,
        max_retries: 0,
        timeout_seconds: None,
        nodes,
        edges: edges.iter().map(|(f, t)| Edge::new(*f, *t)).collect(),
        triggers: Vec::new(),
    }
}

pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        backoff: RetryBackoff::Fixed { delay_ms: 10 },
        default_wait_factor: 1.0,
        retry_resolution_failures: false,
        poll_interval: Duration::from_millis(10),
    }
}

pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<InMemoryExecutionStore>,
    pub executor: Arc<FakeExecutor>,
    pub workers: WorkerPool,
}

pub fn harness(workflows: Vec<Workflow>, executor: FakeExecutor, config: SchedulerConfig) -> Harness {
    harness_with_workers(workflows, executor, config, 4)
}

pub fn harness_with_workers(
    workflows: Vec<Workflow>,
    executor: FakeExecutor,
    config: SchedulerConfig,
    workers: usize,
) -> Harness {
    build_harness(workflows, executor, config, workers, None)
}

/// Harness whose scheduler resolves external references through `resources`
pub fn harness_with_resources(
    workflows: Vec<Workflow>,
    executor: FakeExecutor,
    config: SchedulerConfig,
    resources: Arc<dyn ResourceLookup>,
) -> Harness {
    build_harness(workflows, executor, config, 4, Some(resources))
}

fn build_harness(
    workflows: Vec<Workflow>,
    executor: FakeExecutor,
    config: SchedulerConfig,
    workers: usize,
    resources: Option<Arc<dyn ResourceLookup>>,
) -> Harness {
    let source = StaticWorkflows(workflows.into_iter().map(|w| (w.id.clone(), w)).collect());
    let store = Arc::new(InMemoryExecutionStore::new());
    let executor = Arc::new(executor);
    let mut scheduler = Scheduler::new(Arc::new(source), store.clone(), executor.clone(), config);
    if let Some(resources) = resources {
        scheduler = scheduler.with_resolver(ReferenceResolver::new(resources));
    }
    let scheduler = Arc::new(scheduler);
    let workers = WorkerPool::spawn(Arc::clone(&scheduler), workers);

    Harness {
        scheduler,
        store,
        executor,
        workers,
    }
}

/// Poll until the execution reaches a terminal status
pub async fn wait_terminal(scheduler: &Scheduler, execution_id: &str) -> Execution {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let execution = scheduler.get_execution(execution_id).await.unwrap();
        if execution.status.is_terminal() {
            return execution;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution {} still {} after 10s",
            execution_id,
            execution.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Working rows left behind for an execution
pub async fn working_rows(store: &dyn ExecutionStore, execution_id: &str) -> usize {
    store.get_inputs(execution_id).await.unwrap().len()
        + store.get_outputs(execution_id).await.unwrap().len()
}
