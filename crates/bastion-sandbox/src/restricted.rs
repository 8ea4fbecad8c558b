//! In-process restricted-context strategy.
//!
//! Each call gets its own evaluator thread and a fresh namespace. The
//! caller races the thread's reply against a timer it owns; on expiry the
//! cancel flag is raised and the engine's interrupt handler halts the
//! script at its next poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::context::NetworkBridge;
use crate::job::{run_job, Job, EVAL_STACK_BYTES};
use crate::types::ExecutionResult;

pub async fn run(job: Job, network: Option<Arc<dyn NetworkBridge>>) -> ExecutionResult {
    let started = Instant::now();
    let limit_ms = job.limits.execution_time_ms;
    let (id, strategy, digest) = (job.id.clone(), job.strategy, job.code_digest.clone());
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();

    let thread_cancel = Arc::clone(&cancel);
    let spawned = std::thread::Builder::new()
        .name("bastion-eval".into())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || {
            let result = run_job(&job, thread_cancel, network);
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return ExecutionResult::rejected(
            &id,
            strategy,
            &digest,
            format!("failed to start evaluator thread: {}", e),
            Vec::new(),
            started.elapsed().as_millis() as u64,
        );
    }

    match tokio::time::timeout(Duration::from_millis(limit_ms), rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            warn!(execution_id = %id, "evaluator thread died without a result");
            ExecutionResult::crashed(
                &id,
                strategy,
                &digest,
                "evaluator thread panicked",
                started.elapsed().as_millis() as u64,
            )
        }
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            let elapsed = (started.elapsed().as_millis() as u64).max(limit_ms);
            debug!(execution_id = %id, elapsed_ms = elapsed, "restricted execution timed out");
            ExecutionResult::timed_out(&id, strategy, &digest, limit_ms, elapsed)
        }
    }
}
