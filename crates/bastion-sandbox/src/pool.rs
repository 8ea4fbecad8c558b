//! # Worker Pool
//!
//! OS threads pulling [`Task`]s from a shared `flume` channel.
//!
//! ```text
//!  execute() ──► flume::Sender<Task> ──► worker 0 ─┐
//!     │                              └─► worker 1 ─┼─► oneshot reply
//!     │                                   ...      │
//!     └──── tokio::time::timeout(limit) ◄──────────┘
//!            expiry: cancel flag + retire the claiming worker + spawn a replacement
//! ```
//!
//! The pool starts with one worker and grows one at a time, up to its
//! ceiling, whenever a task arrives and no worker is idle. A worker that
//! timed out or crashed never takes another task.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bastion_audit::{Audit, SecurityEvent};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::context::NetworkBridge;
use crate::error::{Result, SandboxError};
use crate::job::{Job, EVAL_STACK_BYTES};
use crate::types::ExecutionResult;
use crate::worker::{Task, Worker, WorkerExit};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers currently accepting tasks.
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    /// Workers retired after a timeout or crash.
    pub replaced: u64,
    pub completed: u64,
    pub max_size: usize,
}

struct WorkerHandle {
    id: usize,
    retire: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
}

struct Shared {
    rx: flume::Receiver<Task>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
    replaced: AtomicU64,
    completed: AtomicU64,
    shutdown: AtomicBool,
    max_size: usize,
    network: Option<Arc<dyn NetworkBridge>>,
}

impl Shared {
    /// Starts one worker thread and registers it.
    fn spawn_worker(self: &Arc<Self>, workers: &mut Vec<WorkerHandle>) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let retire = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            id,
            rx: self.rx.clone(),
            retire: Arc::clone(&retire),
            busy: Arc::clone(&busy),
            network: self.network.clone(),
        };
        let pool: Weak<Shared> = Arc::downgrade(self);
        std::thread::Builder::new()
            .name(format!("bastion-pool-{}", id))
            .stack_size(EVAL_STACK_BYTES)
            .spawn(move || {
                if worker.run() == WorkerExit::Crashed {
                    if let Some(pool) = pool.upgrade() {
                        pool.replace(id, "crashed");
                    }
                }
            })
            .map_err(|source| SandboxError::Spawn {
                what: "pool worker",
                source,
            })?;
        workers.push(WorkerHandle { id, retire, busy });
        Ok(())
    }

    /// Retires worker `id` and starts a fresh one in its place.
    fn replace(self: &Arc<Self>, id: usize, why: &str) {
        let mut workers = self.workers.lock();
        let Some(pos) = workers.iter().position(|w| w.id == id) else {
            return;
        };
        let retired = workers.swap_remove(pos);
        retired.retire.store(true, Ordering::Release);
        self.replaced.fetch_add(1, Ordering::Relaxed);
        warn!(worker = id, reason = why, "replacing pool worker");

        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.spawn_worker(&mut workers) {
            warn!(error = %e, "failed to start replacement worker");
        }
    }
}

/// A lazily growing pool of evaluator threads.
pub struct WorkerPool {
    tx: flume::Sender<Task>,
    shared: Arc<Shared>,
    audit: Audit,
}

impl WorkerPool {
    /// Starts a pool with one worker and a ceiling of `max_size`
    /// (at least 1).
    pub fn new(max_size: usize, network: Option<Arc<dyn NetworkBridge>>, audit: Audit) -> Result<Self> {
        let max_size = max_size.max(1);
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            rx,
            workers: Mutex::new(Vec::with_capacity(max_size)),
            next_id: AtomicUsize::new(0),
            replaced: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            max_size,
            network,
        });
        {
            let mut workers = shared.workers.lock();
            shared.spawn_worker(&mut workers)?;
        }
        info!(max_size, "worker pool initialized");
        audit.emit(SecurityEvent::PoolInitialized { size: 1, max_size });
        Ok(Self { tx, shared, audit })
    }

    /// Runs `job` on a pool worker, racing it against the job's
    /// wall-clock ceiling.
    pub async fn execute(&self, job: Job) -> ExecutionResult {
        let started = Instant::now();
        let limit_ms = job.limits.execution_time_ms;
        let (id, strategy, digest) = (job.id.clone(), job.strategy, job.code_digest.clone());

        if self.shared.shutdown.load(Ordering::Acquire) {
            return ExecutionResult::rejected(&id, strategy, &digest, SandboxError::PoolClosed.to_string(), Vec::new(), 0);
        }
        self.grow_if_saturated();

        let cancel = Arc::new(AtomicBool::new(false));
        let claimed_by = Arc::new(Mutex::new(None));
        let (reply, rx) = oneshot::channel();
        let task = Task {
            job,
            cancel: Arc::clone(&cancel),
            claimed_by: Arc::clone(&claimed_by),
            reply,
        };
        if self.tx.send(task).is_err() {
            return ExecutionResult::rejected(&id, strategy, &digest, SandboxError::PoolClosed.to_string(), Vec::new(), 0);
        }

        match tokio::time::timeout(Duration::from_millis(limit_ms), rx).await {
            Ok(Ok(result)) => {
                self.shared.completed.fetch_add(1, Ordering::Relaxed);
                result
            }
            // The crashed worker already replied; reaching here means it
            // vanished without doing so.
            Ok(Err(_)) => ExecutionResult::crashed(
                &id,
                strategy,
                &digest,
                "pool worker dropped the task",
                started.elapsed().as_millis() as u64,
            ),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                let worker = *claimed_by.lock();
                if let Some(worker) = worker {
                    self.shared.replace(worker, "timeout");
                }
                let elapsed = (started.elapsed().as_millis() as u64).max(limit_ms);
                debug!(execution_id = %id, elapsed_ms = elapsed, "pooled execution timed out");
                ExecutionResult::timed_out(&id, strategy, &digest, limit_ms, elapsed)
            }
        }
    }

    fn grow_if_saturated(&self) {
        let mut workers = self.shared.workers.lock();
        let idle = workers
            .iter()
            .filter(|w| !w.busy.load(Ordering::Acquire))
            .count();
        if idle > self.shared.rx.len() || workers.len() >= self.shared.max_size {
            return;
        }
        match self.shared.spawn_worker(&mut workers) {
            Ok(()) => debug!(live = workers.len(), "worker pool grew"),
            Err(e) => warn!(error = %e, "worker pool could not grow"),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let workers = self.shared.workers.lock();
        let busy = workers
            .iter()
            .filter(|w| w.busy.load(Ordering::Acquire))
            .count();
        PoolStats {
            live: workers.len(),
            idle: workers.len() - busy,
            busy,
            replaced: self.shared.replaced.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            max_size: self.shared.max_size,
        }
    }

    /// Stops accepting tasks and retires every worker. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in self.shared.workers.lock().drain(..) {
            worker.retire.store(true, Ordering::Release);
        }
        let replaced = self.shared.replaced.load(Ordering::Relaxed);
        info!(replaced, "worker pool shut down");
        self.audit.emit(SecurityEvent::PoolDestroyed { replaced });
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("stats", &self.stats()).finish()
    }
}
