/// Execution scheduler
///
/// Drives one execution per workflow run through its dependency graph:
/// materializes one ExecutionInput per node, lets workers claim inputs whose
/// dependencies are satisfied, resolves parameters, runs nodes under a hard
/// deadline, applies the retry policy, propagates success (dependency
/// decrement) or failure (SKIPPED descendants), and finalizes the execution
/// exactly once when every input is finished.
///
/// The scheduler holds no per-node state of its own. Everything a worker
/// needs lives in the ExecutionStore; the in-process `active` map only
/// carries the compiled graph and the abort signal of executions in flight.

use crate::{
    errors::{NodeError, ResolveError, Result, SchedulerError},
    execution::{
        store::ExecutionStore,
        types::{
            Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState, NodeOutcome,
            NodeStatus,
        },
    },
    runtime::{
        backoff::RetryBackoff,
        executor::NodeExecutor,
        graph::DependencyGraph,
        resolver::{ReferenceResolver, ResolutionContext},
    },
    workflow::{types::Workflow, WorkflowSource},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::sync::{watch, Notify};

/// Tunables for dispatch and retry
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay strategy for re-queued inputs
    pub backoff: RetryBackoff,
    /// `wait_factor` given to every new input
    pub default_wait_factor: f64,
    /// Re-queue inputs whose params failed to resolve instead of failing them
    pub retry_resolution_failures: bool,
    /// How long an idle worker waits before polling the store again
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backoff: RetryBackoff::default(),
            default_wait_factor: 1.0,
            retry_resolution_failures: false,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// In-process handle of an execution that has not been finalized yet
struct ActiveExecution {
    workflow: Arc<Workflow>,
    graph: Arc<DependencyGraph>,
    trigger_data: Value,
    /// Terminal status requested by cancel or execution timeout
    abort: Mutex<Option<ExecutionStatus>>,
    /// Flips to true once unstarted inputs have been swept
    signal: watch::Sender<bool>,
}

impl ActiveExecution {
    fn abort_status(&self) -> Option<ExecutionStatus> {
        *self.abort.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an abort; false if one was already requested
    fn request_abort(&self, status: ExecutionStatus) -> bool {
        let mut abort = self.abort.lock().unwrap_or_else(|e| e.into_inner());
        if abort.is_some() {
            return false;
        }
        *abort = Some(status);
        true
    }
}

/// Resolves once the execution is aborted; never if it finalizes first
async fn aborted(mut rx: watch::Receiver<bool>) {
    let finalized = rx.wait_for(|aborted| *aborted).await.is_err();
    if finalized {
        std::future::pending::<()>().await;
    }
}

/// Final execution status from the folded node outcomes
pub fn settle_status(
    abort: Option<ExecutionStatus>,
    results: &BTreeMap<String, NodeOutcome>,
) -> ExecutionStatus {
    if let Some(status) = abort {
        return status;
    }
    let failed = results
        .values()
        .any(|o| matches!(o.status, NodeStatus::Failed | NodeStatus::Timeout));
    if failed {
        return ExecutionStatus::Failed;
    }
    if results.values().any(|o| o.status == NodeStatus::Cancelled) {
        return ExecutionStatus::Cancelled;
    }
    ExecutionStatus::Completed
}

fn rejection_details(err: &ResolveError, resource_retry_count: u32) -> Value {
    let mut details = match err {
        ResolveError::Parse { raw, field, reason } => json!({
            "error": "reference_parse",
            "raw": raw,
            "field": field,
            "reason": reason,
        }),
        ResolveError::Resolution {
            path,
            missing_segment,
        } => json!({
            "error": "reference_resolution",
            "path": path,
            "missing_segment": missing_segment,
        }),
        ResolveError::Conversion(e) => json!({
            "error": "type_conversion",
            "field": e.field,
            "expected_type": e.expected_type,
            "actual_value": e.actual_value,
        }),
        ResolveError::MissingParameter { field } => json!({
            "error": "missing_parameter",
            "field": field,
        }),
        ResolveError::Lookup { kind, id, reason } => json!({
            "error": "lookup",
            "kind": kind,
            "id": id,
            "reason": reason,
        }),
    };
    details["resource_retry_count"] = json!(resource_retry_count);
    details
}

fn backoff_until(delay: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Workflow execution scheduler
pub struct Scheduler {
    workflows: Arc<dyn WorkflowSource>,
    store: Arc<dyn ExecutionStore>,
    executor: Arc<dyn NodeExecutor>,
    resolver: ReferenceResolver,
    config: SchedulerConfig,
    active: Mutex<HashMap<String, Arc<ActiveExecution>>>,
    ready: Notify,
    accepting: AtomicBool,
}

impl Scheduler {
    pub fn new(
        workflows: Arc<dyn WorkflowSource>,
        store: Arc<dyn ExecutionStore>,
        executor: Arc<dyn NodeExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            workflows,
            store,
            executor,
            resolver: ReferenceResolver::default(),
            config,
            active: Mutex::new(HashMap::new()),
            ready: Notify::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Use a resolver wired to external variable/credential/database/file stores
    pub fn with_resolver(mut self, resolver: ReferenceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Signalled whenever an input may have become claimable
    pub fn ready_signal(&self) -> &Notify {
        &self.ready
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Refuse new executions; in-flight ones keep running
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    /// Number of executions not yet finalized
    pub fn active_count(&self) -> usize {
        self.active_map().len()
    }

    fn active_map(&self) -> MutexGuard<'_, HashMap<String, Arc<ActiveExecution>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_entry(&self, execution_id: &str) -> Option<Arc<ActiveExecution>> {
        self.active_map().get(execution_id).cloned()
    }

    /// Start a new execution of `workflow_id` and return its id
    pub async fn start_execution(
        self: &Arc<Self>,
        workflow_id: &str,
        trigger_data: Value,
        trigger_id: Option<String>,
    ) -> Result<String> {
        self.launch(workflow_id, trigger_data, trigger_id, 0, None).await
    }

    /// Re-run a FAILED or TIMEOUT execution with the same trigger data
    pub async fn retry_execution(self: &Arc<Self>, execution_id: &str) -> Result<String> {
        let previous = self.get_execution(execution_id).await?;

        if !matches!(
            previous.status,
            ExecutionStatus::Failed | ExecutionStatus::Timeout
        ) {
            return Err(SchedulerError::NotRetryable {
                execution_id: execution_id.to_string(),
                reason: format!("status is {}", previous.status),
            });
        }
        if previous.retry_count >= previous.max_retries {
            return Err(SchedulerError::NotRetryable {
                execution_id: execution_id.to_string(),
                reason: format!(
                    "retry limit reached ({}/{})",
                    previous.retry_count, previous.max_retries
                ),
            });
        }

        tracing::info!(
            "🔁 Retrying execution {} (attempt {}/{})",
            execution_id,
            previous.retry_count + 1,
            previous.max_retries
        );

        self.launch(
            &previous.workflow_id,
            previous.trigger_data,
            previous.trigger_id,
            previous.retry_count + 1,
            Some(previous.max_retries),
        )
        .await
    }

    async fn launch(
        self: &Arc<Self>,
        workflow_id: &str,
        trigger_data: Value,
        trigger_id: Option<String>,
        retry_count: u32,
        max_retries: Option<u32>,
    ) -> Result<String> {
        if !self.is_accepting() {
            return Err(SchedulerError::ShuttingDown);
        }

        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| SchedulerError::WorkflowNotFound(workflow_id.to_string()))?;
        let graph = DependencyGraph::build(&workflow.nodes, &workflow.edges)?;

        let now = Utc::now();
        let execution = Execution {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            workspace_id: workflow.workspace_id.clone(),
            trigger_id,
            status: ExecutionStatus::Pending,
            trigger_data: trigger_data.clone(),
            created_at: now,
            started_at: None,
            ended_at: None,
            results: BTreeMap::new(),
            retry_count,
            max_retries: max_retries.unwrap_or(workflow.max_retries),
            is_retry: retry_count > 0,
        };
        let execution_id = execution.id.clone();

        let inputs: Vec<ExecutionInput> = workflow
            .nodes
            .iter()
            .map(|node| {
                ExecutionInput::for_node(
                    &execution_id,
                    node,
                    graph.in_degree(&node.id),
                    node.priority.unwrap_or(workflow.priority),
                    self.config.default_wait_factor,
                    now,
                )
            })
            .collect();

        self.store.create_execution(&execution).await?;

        let (signal, signal_rx) = watch::channel(false);
        let timeout_seconds = workflow.timeout_seconds;
        let entry = Arc::new(ActiveExecution {
            workflow: Arc::new(workflow),
            graph: Arc::new(graph),
            trigger_data,
            abort: Mutex::new(None),
            signal,
        });
        self.active_map().insert(execution_id.clone(), entry);

        if let Err(e) = self.store.create_inputs(&inputs).await {
            self.active_map().remove(&execution_id);
            return Err(e.into());
        }

        tracing::info!(
            "🚀 Started execution {} of workflow {} ({} nodes)",
            execution_id,
            workflow_id,
            inputs.len()
        );

        if let Some(seconds) = timeout_seconds {
            self.spawn_execution_timeout(&execution_id, Duration::from_secs(seconds), signal_rx);
        }

        self.ready.notify_waiters();

        // A workflow without nodes has nothing to wait for
        self.try_finalize(&execution_id).await?;

        Ok(execution_id)
    }

    fn spawn_execution_timeout(
        self: &Arc<Self>,
        execution_id: &str,
        limit: Duration,
        mut signal_rx: watch::Receiver<bool>,
    ) {
        let scheduler = Arc::clone(self);
        let execution_id = execution_id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("⏱️ Execution {} exceeded {:?}", execution_id, limit);
                    if let Err(e) = scheduler.abort(&execution_id, ExecutionStatus::Timeout).await {
                        tracing::error!("❌ Failed to time out execution {}: {}", execution_id, e);
                    }
                }
                // Finalized (sender dropped) or aborted for another reason
                _ = signal_rx.changed() => {}
            }
        });
    }

    /// Cancel a running execution
    ///
    /// Returns false when the execution had already finished or was already
    /// being aborted.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<bool> {
        if self.active_entry(execution_id).is_some() {
            return self.abort(execution_id, ExecutionStatus::Cancelled).await;
        }

        let execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(false);
        }

        // Not driven by this process (e.g. left over from a restart)
        tracing::warn!(
            "🛑 Cancelling orphaned execution {} ({})",
            execution_id,
            execution.status
        );
        self.sweep_unstarted(execution_id).await?;
        let inputs = self.store.get_inputs(execution_id).await?;
        self.finalize(execution_id, &inputs, Some(ExecutionStatus::Cancelled))
            .await?;
        Ok(true)
    }

    /// Stop dispatching, finish unstarted inputs, interrupt in-flight nodes
    async fn abort(&self, execution_id: &str, status: ExecutionStatus) -> Result<bool> {
        let Some(entry) = self.active_entry(execution_id) else {
            return Ok(false);
        };
        if !entry.request_abort(status) {
            return Ok(false);
        }

        tracing::info!("🛑 Aborting execution {} as {}", execution_id, status);

        self.sweep_unstarted(execution_id).await?;
        entry.signal.send_replace(true);
        self.try_finalize(execution_id).await?;
        Ok(true)
    }

    async fn sweep_unstarted(&self, execution_id: &str) -> Result<()> {
        for input in self.store.get_inputs(execution_id).await? {
            if matches!(input.state, InputState::Waiting | InputState::Ready)
                && self
                    .store
                    .finish_unstarted_input(execution_id, &input.node_id)
                    .await?
            {
                self.cancel_pending_retry(&input).await?;
            }
        }
        Ok(())
    }

    /// A node cut off while waiting out a retry backoff ends CANCELLED,
    /// not with its last failed attempt
    async fn cancel_pending_retry(&self, input: &ExecutionInput) -> Result<()> {
        let Some(previous) = self
            .store
            .get_output(&input.execution_id, &input.node_id)
            .await?
        else {
            return Ok(());
        };

        let mut output = ExecutionOutput::without_attempt(
            &input.execution_id,
            &input.node_id,
            NodeStatus::Cancelled,
            "execution aborted while waiting to retry".to_string(),
            Utc::now(),
        );
        output.retry_count = input.retry_count;
        output.error_details = Some(json!({
            "last_status": previous.status,
            "last_error": previous.error_message,
        }));
        Ok(self.store.upsert_output(&output).await?)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| SchedulerError::ExecutionNotFound(execution_id.to_string()))
    }

    /// In-flight scheduling rows; empty once the execution is finalized
    pub async fn get_execution_inputs(&self, execution_id: &str) -> Result<Vec<ExecutionInput>> {
        self.get_execution(execution_id).await?;
        Ok(self.store.get_inputs(execution_id).await?)
    }

    /// In-flight result rows; empty once the execution is finalized
    pub async fn get_execution_outputs(&self, execution_id: &str) -> Result<Vec<ExecutionOutput>> {
        self.get_execution(execution_id).await?;
        Ok(self.store.get_outputs(execution_id).await?)
    }

    /// Claim and process one input; false if nothing was claimable
    pub async fn run_next(&self, worker_id: &str) -> Result<bool> {
        let Some(input) = self.store.claim_next_input(worker_id, Utc::now()).await? else {
            return Ok(false);
        };

        tracing::debug!(
            "🎯 Worker {} claimed {}/{}",
            worker_id,
            input.execution_id,
            input.node_id
        );
        self.process_input(input).await?;
        Ok(true)
    }

    async fn process_input(&self, mut input: ExecutionInput) -> Result<()> {
        let execution_id = input.execution_id.clone();

        let Some(entry) = self.active_entry(&execution_id) else {
            tracing::warn!(
                "⚠️ Claimed input {}/{} of an execution this scheduler does not drive",
                execution_id,
                input.node_id
            );
            input.state = InputState::Finished;
            self.store.update_input(&input).await?;
            return Ok(());
        };

        if entry.abort_status().is_some() {
            tracing::debug!(
                "⏭️ Not dispatching {}/{}: execution aborted",
                execution_id,
                input.node_id
            );
            input.state = InputState::Finished;
            self.store.update_input(&input).await?;
            self.try_finalize(&execution_id).await?;
            return Ok(());
        }

        let Some(node) = entry.workflow.nodes.iter().find(|n| n.id == input.node_id) else {
            let mut output = ExecutionOutput::running(&input, Utc::now());
            output.error_message = Some(format!("node '{}' is not part of the workflow", input.node_id));
            output.finish(NodeStatus::Failed, Utc::now());
            return self.fail_terminal(&entry, input, output).await;
        };

        self.store
            .mark_execution_running(&execution_id, Utc::now())
            .await?;

        let mut context = ResolutionContext::new(entry.trigger_data.clone());
        for predecessor in entry.graph.predecessors(&node.id) {
            if let Some(output) = self.store.get_output(&execution_id, &predecessor).await? {
                if output.status == NodeStatus::Success {
                    context = context
                        .with_node_output(predecessor, output.result_data.unwrap_or(Value::Null));
                }
            }
        }

        let started = Utc::now();
        let params = match self
            .resolver
            .resolve_params(&node.input_params, &input.params, &context)
            .await
        {
            Ok(params) => params,
            Err(err) => return self.reject(&entry, input, err).await,
        };

        let mut output = ExecutionOutput::running(&input, started);
        self.store.upsert_output(&output).await?;

        tracing::info!(
            "▶️ Running node {}/{} ({}, attempt {})",
            execution_id,
            node.id,
            node.script_ref,
            input.retry_count + 1
        );

        let limit = Duration::from_secs(input.timeout_seconds);
        let result = tokio::select! {
            res = tokio::time::timeout(limit, self.executor.run(&node.script_ref, &params, limit)) => {
                match res {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout { timeout_seconds: input.timeout_seconds }),
                }
            }
            _ = aborted(entry.signal.subscribe()) => Err(NodeError::Cancelled),
        };

        match result {
            Ok(data) => {
                output.result_data = Some(data);
                output.finish(NodeStatus::Success, Utc::now());
                self.store.upsert_output(&output).await?;

                tracing::info!(
                    "✅ Node {}/{} succeeded in {}ms",
                    execution_id,
                    node.id,
                    output.duration_ms.unwrap_or_default()
                );

                let mut released = 0;
                for successor in entry.graph.successors(&node.id) {
                    if self
                        .store
                        .decrement_dependency(&execution_id, &successor)
                        .await?
                        == Some(0)
                    {
                        released += 1;
                    }
                }

                input.state = InputState::Finished;
                self.store.update_input(&input).await?;

                if released > 0 {
                    self.ready.notify_waiters();
                }
                self.try_finalize(&execution_id).await?;
                Ok(())
            }
            Err(NodeError::Cancelled) => {
                output.error_message = Some(NodeError::Cancelled.to_string());
                output.finish(NodeStatus::Cancelled, Utc::now());
                tracing::info!("🛑 Node {}/{} interrupted", execution_id, node.id);
                self.fail_terminal(&entry, input, output).await
            }
            Err(err) => {
                let status = match err {
                    NodeError::Timeout { .. } => NodeStatus::Timeout,
                    _ => NodeStatus::Failed,
                };
                output.error_message = Some(err.to_string());
                output.error_details = match err {
                    NodeError::Execution { details, .. } => details,
                    NodeError::Timeout { timeout_seconds } => {
                        Some(json!({ "timeout_seconds": timeout_seconds }))
                    }
                    NodeError::Cancelled => None,
                };
                output.finish(status, Utc::now());

                if input.retry_count < input.max_retries && entry.abort_status().is_none() {
                    self.store.upsert_output(&output).await?;
                    input.retry_count += 1;
                    let delay = self.config.backoff.delay(input.retry_count, input.wait_factor);
                    tracing::warn!(
                        "🔁 Node {}/{} {} ({}), retry {}/{} in {:?}",
                        execution_id,
                        node.id,
                        status,
                        output.error_message.as_deref().unwrap_or_default(),
                        input.retry_count,
                        input.max_retries,
                        delay
                    );
                    self.requeue(&entry, input, delay).await
                } else {
                    tracing::error!(
                        "❌ Node {}/{} ended {}: {}",
                        execution_id,
                        node.id,
                        status,
                        output.error_message.as_deref().unwrap_or_default()
                    );
                    self.fail_terminal(&entry, input, output).await
                }
            }
        }
    }

    /// Parameter resolution failed: no script attempt is consumed
    async fn reject(
        &self,
        entry: &ActiveExecution,
        mut input: ExecutionInput,
        err: ResolveError,
    ) -> Result<()> {
        input.resource_retry_count += 1;
        input.last_rejection_reason = Some(err.to_string());

        let now = Utc::now();
        let mut output = ExecutionOutput::running(&input, now);
        output.error_message = Some(err.to_string());
        output.error_details = Some(rejection_details(&err, input.resource_retry_count));
        output.finish(NodeStatus::Failed, now);

        if self.config.retry_resolution_failures && input.resource_retry_count <= input.max_retries {
            tracing::warn!(
                "⚠️ Rejected {}/{} ({}), re-queued {}/{}",
                input.execution_id,
                input.node_id,
                err,
                input.resource_retry_count,
                input.max_retries
            );
            self.store.upsert_output(&output).await?;
            let delay = self
                .config
                .backoff
                .delay(input.resource_retry_count, input.wait_factor);
            return self.requeue(entry, input, delay).await;
        }

        tracing::error!(
            "❌ Rejected {}/{}: {}",
            input.execution_id,
            input.node_id,
            err
        );
        self.fail_terminal(entry, input, output).await
    }

    /// Put a failed input back in the queue after `delay`
    ///
    /// The abort flag is checked on both sides of the write: an abort that
    /// lands before it ends the node here, one that lands after it finds the
    /// input `Ready` in its sweep. Either way nothing waits out the backoff.
    async fn requeue(
        &self,
        entry: &ActiveExecution,
        mut input: ExecutionInput,
        delay: Duration,
    ) -> Result<()> {
        if entry.abort_status().is_some() {
            return self.cancel_before_retry(entry, input).await;
        }

        input.state = InputState::Ready;
        input.claimed_by = None;
        input.available_at = backoff_until(delay);
        self.store.update_input(&input).await?;

        if entry.abort_status().is_some()
            && self
                .store
                .finish_unstarted_input(&input.execution_id, &input.node_id)
                .await?
        {
            self.cancel_pending_retry(&input).await?;
            self.try_finalize(&input.execution_id).await?;
        }
        Ok(())
    }

    async fn cancel_before_retry(&self, entry: &ActiveExecution, input: ExecutionInput) -> Result<()> {
        let mut output = ExecutionOutput::without_attempt(
            &input.execution_id,
            &input.node_id,
            NodeStatus::Cancelled,
            "execution aborted before retry".to_string(),
            Utc::now(),
        );
        output.retry_count = input.retry_count;
        tracing::info!(
            "🛑 Dropping retry of {}/{}: execution aborted",
            input.execution_id,
            input.node_id
        );
        self.fail_terminal(entry, input, output).await
    }

    /// Record a terminal non-success outcome and skip every descendant
    async fn fail_terminal(
        &self,
        entry: &ActiveExecution,
        mut input: ExecutionInput,
        output: ExecutionOutput,
    ) -> Result<()> {
        let execution_id = input.execution_id.clone();
        self.store.upsert_output(&output).await?;

        for descendant in entry.graph.descendants(&input.node_id) {
            if self
                .store
                .finish_unstarted_input(&execution_id, &descendant)
                .await?
            {
                tracing::debug!(
                    "⏭️ Skipping {}/{} after {} ended {}",
                    execution_id,
                    descendant,
                    input.node_id,
                    output.status
                );
                let skipped = ExecutionOutput::without_attempt(
                    &execution_id,
                    &descendant,
                    NodeStatus::Skipped,
                    format!("upstream node '{}' ended {}", input.node_id, output.status),
                    Utc::now(),
                );
                self.store.upsert_output(&skipped).await?;
            }
        }

        input.state = InputState::Finished;
        self.store.update_input(&input).await?;
        self.try_finalize(&execution_id).await?;
        Ok(())
    }

    /// Finalize if every input is finished; only one caller ever wins
    async fn try_finalize(&self, execution_id: &str) -> Result<bool> {
        let inputs = self.store.get_inputs(execution_id).await?;
        if inputs.iter().any(|i| i.state != InputState::Finished) {
            return Ok(false);
        }

        let Some(entry) = self.active_map().remove(execution_id) else {
            return Ok(false);
        };

        self.finalize(execution_id, &inputs, entry.abort_status())
            .await?;
        Ok(true)
    }

    /// Fold outputs into `Execution.results` and drop the working rows
    async fn finalize(
        &self,
        execution_id: &str,
        inputs: &[ExecutionInput],
        abort: Option<ExecutionStatus>,
    ) -> Result<()> {
        let mut execution = self.get_execution(execution_id).await?;

        let outputs: HashMap<String, ExecutionOutput> = self
            .store
            .get_outputs(execution_id)
            .await?
            .into_iter()
            .map(|o| (o.node_id.clone(), o))
            .collect();

        let results: BTreeMap<String, NodeOutcome> = inputs
            .iter()
            .map(|input| {
                let outcome = match outputs.get(&input.node_id) {
                    Some(output) => NodeOutcome::from(output),
                    None => NodeOutcome::cancelled(input.retry_count),
                };
                (input.node_id.clone(), outcome)
            })
            .collect();

        execution.status = settle_status(abort, &results);
        execution.results = results;
        execution.ended_at = Some(Utc::now());
        self.store.update_execution(&execution).await?;

        self.store.delete_inputs(execution_id).await?;
        self.store.delete_outputs(execution_id).await?;

        tracing::info!(
            "🏁 Execution {} finalized as {} ({} nodes)",
            execution_id,
            execution.status,
            execution.results.len()
        );
        Ok(())
    }
}
