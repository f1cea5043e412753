use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use spool_core::ids::{RunId, ThreadId};
use spool_core::message::RunInput;
use spool_engine::{RunError, RunLoop};

/// Tracks an in-flight run.
struct ActiveRun {
    run_id: RunId,
    cancel: CancellationToken,
}

/// Owns run execution per thread: one active run at a time, cancellable
/// on disconnect or explicit abort. Runs execute on spawned tasks; their
/// events reach subscribers through the run loop's broadcast channel.
pub struct RunCoordinator {
    run_loop: Arc<RunLoop>,
    active: Arc<DashMap<ThreadId, ActiveRun>>,
}

impl RunCoordinator {
    pub fn new(run_loop: Arc<RunLoop>) -> Self {
        Self {
            run_loop,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start a run for the thread. Rejects when the thread already has
    /// one in flight.
    pub fn submit(&self, thread_id: ThreadId, input: RunInput) -> Result<RunId, RunError> {
        if self.active.contains_key(&thread_id) {
            return Err(RunError::RunInProgress(thread_id));
        }

        let run_id = RunId::new();
        let cancel = CancellationToken::new();

        self.active.insert(
            thread_id.clone(),
            ActiveRun {
                run_id: run_id.clone(),
                cancel: cancel.clone(),
            },
        );

        let run_loop = Arc::clone(&self.run_loop);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            if let Err(e) = run_loop.run(&thread_id, input, &cancel).await {
                warn!(thread_id = %thread_id, error = %e, "run failed");
            }
            active.remove(&thread_id);
        });

        Ok(run_id)
    }

    /// Cancel the thread's active run. Returns false when idle.
    pub fn abort(&self, thread_id: &ThreadId) -> bool {
        if let Some((_, run)) = self.active.remove(thread_id) {
            run.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_running(&self, thread_id: &ThreadId) -> bool {
        self.active.contains_key(thread_id)
    }

    pub fn running_run_id(&self, thread_id: &ThreadId) -> Option<RunId> {
        self.active.get(thread_id).map(|run| run.run_id.clone())
    }

    /// Cancel everything; returns how many runs were active.
    pub fn abort_all(&self) -> usize {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
        }
        self.active.clear();
        count
    }
}
