/// Execution persistence interface and in-memory implementation
///
/// The scheduler owns the business rules; stores only provide CRUD plus two
/// atomic operations the concurrency model depends on:
/// - `claim_next_input`: at most one worker ever holds a given input
/// - `decrement_dependency`: concurrent completions of two predecessors can
///   never both observe the same count

use crate::execution::types::{Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<()>;
    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>>;
    async fn update_execution(&self, execution: &Execution) -> Result<()>;

    /// PENDING → RUNNING with `started_at`; no-op in any other state
    async fn mark_execution_running(&self, execution_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn create_inputs(&self, inputs: &[ExecutionInput]) -> Result<()>;
    async fn get_input(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionInput>>;
    async fn get_inputs(&self, execution_id: &str) -> Result<Vec<ExecutionInput>>;
    async fn update_input(&self, input: &ExecutionInput) -> Result<()>;

    /// Atomically claim the best claimable input across all executions
    ///
    /// Order: higher `priority` first, then larger `wait_score`, then older
    /// `queued_at`. The claimed input comes back in state `Running`.
    async fn claim_next_input(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInput>>;

    /// Decrement `dependency_count` by one (never below zero); a `Waiting`
    /// input reaching zero becomes `Ready`. Returns the new count.
    async fn decrement_dependency(&self, execution_id: &str, node_id: &str) -> Result<Option<u32>>;

    /// Move an unclaimed `Waiting`/`Ready` input to `Finished`; false if it
    /// was already claimed or finished
    async fn finish_unstarted_input(&self, execution_id: &str, node_id: &str) -> Result<bool>;

    async fn delete_inputs(&self, execution_id: &str) -> Result<()>;

    async fn upsert_output(&self, output: &ExecutionOutput) -> Result<()>;
    async fn get_output(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionOutput>>;
    async fn get_outputs(&self, execution_id: &str) -> Result<Vec<ExecutionOutput>>;
    async fn delete_outputs(&self, execution_id: &str) -> Result<()>;
}

/// Claim priority between two claimable inputs; `Greater` wins
pub fn claim_order(a: &ExecutionInput, b: &ExecutionInput, now: DateTime<Utc>) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| {
            a.wait_score(now)
                .partial_cmp(&b.wait_score(now))
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.queued_at.cmp(&a.queued_at))
}

type RowKey = (String, String);

#[derive(Debug, Default)]
struct MemoryState {
    executions: HashMap<String, Execution>,
    inputs: BTreeMap<RowKey, ExecutionInput>,
    outputs: BTreeMap<RowKey, ExecutionOutput>,
}

/// Store holding everything in process memory behind one mutex
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    state: Mutex<MemoryState>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("execution store lock poisoned"))
    }
}

fn key(execution_id: &str, node_id: &str) -> RowKey {
    (execution_id.to_string(), node_id.to_string())
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        let mut state = self.lock()?;
        if state.executions.contains_key(&execution.id) {
            return Err(anyhow::anyhow!("execution already exists: {}", execution.id));
        }
        state.executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.lock()?.executions.get(execution_id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<()> {
        let mut state = self.lock()?;
        match state.executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(anyhow::anyhow!("execution not found: {}", execution.id)),
        }
    }

    async fn mark_execution_running(&self, execution_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(execution) = state.executions.get_mut(execution_id) {
            if execution.status == ExecutionStatus::Pending {
                execution.status = ExecutionStatus::Running;
                execution.started_at = Some(at);
            }
        }
        Ok(())
    }

    async fn create_inputs(&self, inputs: &[ExecutionInput]) -> Result<()> {
        let mut state = self.lock()?;
        for input in inputs {
            let k = key(&input.execution_id, &input.node_id);
            if state.inputs.contains_key(&k) {
                return Err(anyhow::anyhow!(
                    "input already exists: {}/{}",
                    input.execution_id,
                    input.node_id
                ));
            }
            state.inputs.insert(k, input.clone());
        }
        Ok(())
    }

    async fn get_input(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionInput>> {
        Ok(self.lock()?.inputs.get(&key(execution_id, node_id)).cloned())
    }

    async fn get_inputs(&self, execution_id: &str) -> Result<Vec<ExecutionInput>> {
        Ok(self
            .lock()?
            .inputs
            .values()
            .filter(|i| i.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn update_input(&self, input: &ExecutionInput) -> Result<()> {
        let mut state = self.lock()?;
        match state.inputs.get_mut(&key(&input.execution_id, &input.node_id)) {
            Some(existing) => {
                *existing = input.clone();
                Ok(())
            }
            None => Err(anyhow::anyhow!(
                "input not found: {}/{}",
                input.execution_id,
                input.node_id
            )),
        }
    }

    async fn claim_next_input(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInput>> {
        let mut state = self.lock()?;

        let best = state
            .inputs
            .iter()
            .filter(|(_, input)| input.is_claimable(now))
            .max_by(|(_, a), (_, b)| claim_order(a, b, now))
            .map(|(k, _)| k.clone());

        Ok(best.and_then(|k| {
            state.inputs.get_mut(&k).map(|input| {
                input.state = InputState::Running;
                input.claimed_by = Some(worker_id.to_string());
                input.clone()
            })
        }))
    }

    async fn decrement_dependency(&self, execution_id: &str, node_id: &str) -> Result<Option<u32>> {
        let mut state = self.lock()?;
        Ok(state.inputs.get_mut(&key(execution_id, node_id)).map(|input| {
            input.dependency_count = input.dependency_count.saturating_sub(1);
            if input.dependency_count == 0 && input.state == InputState::Waiting {
                input.state = InputState::Ready;
            }
            input.dependency_count
        }))
    }

    async fn finish_unstarted_input(&self, execution_id: &str, node_id: &str) -> Result<bool> {
        let mut state = self.lock()?;
        match state.inputs.get_mut(&key(execution_id, node_id)) {
            Some(input)
                if matches!(input.state, InputState::Waiting | InputState::Ready)
                    && input.claimed_by.is_none() =>
            {
                input.state = InputState::Finished;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_inputs(&self, execution_id: &str) -> Result<()> {
        self.lock()?
            .inputs
            .retain(|(exec, _), _| exec != execution_id);
        Ok(())
    }

    async fn upsert_output(&self, output: &ExecutionOutput) -> Result<()> {
        self.lock()?
            .outputs
            .insert(key(&output.execution_id, &output.node_id), output.clone());
        Ok(())
    }

    async fn get_output(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionOutput>> {
        Ok(self.lock()?.outputs.get(&key(execution_id, node_id)).cloned())
    }

    async fn get_outputs(&self, execution_id: &str) -> Result<Vec<ExecutionOutput>> {
        Ok(self
            .lock()?
            .outputs
            .values()
            .filter(|o| o.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn delete_outputs(&self, execution_id: &str) -> Result<()> {
        self.lock()?
            .outputs
            .retain(|(exec, _), _| exec != execution_id);
        Ok(())
    }
}
