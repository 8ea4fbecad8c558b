//! Child-process isolate: reads one job as JSON on stdin and writes one
//! result as JSON on stdout. Logs go to stderr.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bastion_sandbox::process::WORKER_EXIT_OUT_OF_MEMORY;
use bastion_sandbox::{run_job, Job, EVAL_STACK_BYTES};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        if e.kind() == ErrorKind::OutOfMemory {
            tracing::error!(error = %e, "job does not fit in the address space ceiling");
            std::process::exit(WORKER_EXIT_OUT_OF_MEMORY);
        }
        return Err(e).context("reading job from stdin");
    }
    let job: Job = serde_json::from_str(&input).context("decoding job")?;
    drop(input);
    tracing::debug!(execution_id = %job.id, "worker process received job");

    // Nothing but this process observes the flag; the parent kills us instead.
    let cancel = Arc::new(AtomicBool::new(false));
    let result = std::thread::Builder::new()
        .name("bastion-eval".into())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || run_job(&job, cancel, None))
        .context("starting evaluator thread")?
        .join()
        .map_err(|_| anyhow!("evaluator thread panicked"))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &result).context("encoding result")?;
    stdout.flush()?;
    Ok(())
}
