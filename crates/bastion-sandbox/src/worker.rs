//! Pool worker thread body.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::context::NetworkBridge;
use crate::job::{run_job, Job};
use crate::types::ExecutionResult;

/// How often an idle worker checks its retire flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// A job queued for the pool.
pub(crate) struct Task {
    pub job: Job,
    pub cancel: Arc<AtomicBool>,
    /// Id of the worker that picked the task up.
    pub claimed_by: Arc<Mutex<Option<usize>>>,
    pub reply: oneshot::Sender<ExecutionResult>,
}

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Retired,
    Disconnected,
    Crashed,
}

pub(crate) struct Worker {
    pub id: usize,
    pub rx: flume::Receiver<Task>,
    pub retire: Arc<AtomicBool>,
    pub busy: Arc<AtomicBool>,
    pub network: Option<Arc<dyn NetworkBridge>>,
}

impl Worker {
    pub(crate) fn run(self) -> WorkerExit {
        debug!(worker = self.id, "pool worker started");
        loop {
            if self.retire.load(Ordering::Acquire) {
                debug!(worker = self.id, "pool worker retired");
                return WorkerExit::Retired;
            }
            let task = match self.rx.recv_timeout(IDLE_POLL) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return WorkerExit::Disconnected,
            };
            // The caller already gave up on this one.
            if task.cancel.load(Ordering::Relaxed) {
                continue;
            }
            *task.claimed_by.lock() = Some(self.id);

            self.busy.store(true, Ordering::Release);
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(&task.job, Arc::clone(&task.cancel), self.network.clone())
            }));
            self.busy.store(false, Ordering::Release);

            match outcome {
                Ok(result) => {
                    let _ = task.reply.send(result);
                }
                Err(_) => {
                    error!(worker = self.id, execution_id = %task.job.id, "pool worker crashed");
                    let _ = task.reply.send(ExecutionResult::crashed(
                        &task.job.id,
                        task.job.strategy,
                        &task.job.code_digest,
                        format!("pool worker {} panicked", self.id),
                        started.elapsed().as_millis() as u64,
                    ));
                    return WorkerExit::Crashed;
                }
            }
        }
    }
}
