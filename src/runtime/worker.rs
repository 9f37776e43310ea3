/// Fixed-size worker pool
///
/// Workers are plain tokio tasks sharing one scheduler. Each loops
/// claim → resolve → execute → record; when nothing is claimable it parks on
/// the scheduler's ready signal, bounded by the poll interval so backoff
/// deadlines are noticed.

use crate::runtime::scheduler::Scheduler;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};

pub struct WorkerPool {
    scheduler: Arc<Scheduler>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one)
    pub fn spawn(scheduler: Arc<Scheduler>, size: usize) -> Self {
        let size = size.max(1);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handles = (0..size)
            .map(|n| {
                let worker_id = format!("worker-{}", n);
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&scheduler),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        tracing::info!("👷 Started {} scheduler workers", size);

        Self {
            scheduler,
            shutdown,
            handles,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Refuse new executions, let workers finish their current node, and join them
    pub async fn shutdown(self) {
        tracing::info!("⏹️ Stopping scheduler workers");

        self.scheduler.stop_accepting();
        self.shutdown.send_replace(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ Worker task ended abnormally: {}", e);
            }
        }

        tracing::info!("✅ Scheduler workers stopped");
    }
}

async fn run_worker(worker_id: String, scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let poll_interval = scheduler.config().poll_interval;
    tracing::debug!("👷 {} polling every {:?}", worker_id, poll_interval);

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        match scheduler.run_next(&worker_id).await {
            Ok(true) => continue,
            Ok(false) => {
                tokio::select! {
                    _ = scheduler.ready_signal().notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                    // Pool dropped without shutdown
                    changed = shutdown.changed() => if changed.is_err() { break },
                }
            }
            Err(e) => {
                tracing::error!("❌ {} failed to process input: {}", worker_id, e);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    tracing::debug!("👋 {} exiting", worker_id);
}
