//! Child-process strategy.
//!
//! One `bastion-sandbox-worker` process per call, started with an empty
//! environment. The [`Job`] goes in as JSON on stdin and the
//! [`ExecutionResult`] comes back as JSON on stdout. The child is killed
//! when the caller's timer expires.
//!
//! On unix the child is also bounded by the kernel before it execs:
//! `RLIMIT_AS` (heap ceiling plus [`ADDRESS_SPACE_HEADROOM`]),
//! `RLIMIT_CPU` and `RLIMIT_NOFILE`, and on Linux `PR_SET_PDEATHSIG` so it
//! dies with its parent. A worker killed by one of those limits is
//! reported as the matching violation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::job::Job;
use crate::types::{ExecutionResult, SandboxViolation, SandboxViolationKind};

/// File name of the worker binary.
pub const WORKER_BINARY_NAME: &str = "bastion-sandbox-worker";

/// Address space granted on top of the heap ceiling for the binary, its
/// evaluator stack and the job itself.
pub const ADDRESS_SPACE_HEADROOM: u64 = 64 * 1024 * 1024;

/// Open descriptors a worker may hold.
pub const WORKER_MAX_FILES: u64 = 32;

/// Exit code of a worker that could not allocate.
pub const WORKER_EXIT_OUT_OF_MEMORY: i32 = 3;

/// Kernel ceilings applied to one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub address_space_bytes: u64,
    pub cpu_seconds: u64,
    pub open_files: u64,
}

impl ProcessLimits {
    pub fn for_job(job: &Job) -> Self {
        Self {
            address_space_bytes: job.limits.memory_bytes().saturating_add(ADDRESS_SPACE_HEADROOM),
            // Whole seconds, rounded up, plus one so the in-engine budget trips first.
            cpu_seconds: job.limits.cpu_time_ms.div_ceil(1000).saturating_add(1),
            open_files: WORKER_MAX_FILES,
        }
    }
}

/// Locates the worker binary: the configured path, else a sibling of the
/// current executable (or of its parent directory, for test binaries
/// under `deps/`).
pub fn resolve_worker_binary(config: &SandboxConfig) -> Result<PathBuf> {
    if let Some(path) = &config.worker_binary {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(SandboxError::WorkerBinary(path.display().to_string()))
        };
    }

    let exe = std::env::current_exe()?;
    let file_name = format!("{}{}", WORKER_BINARY_NAME, std::env::consts::EXE_SUFFIX);
    let dir = exe.parent().ok_or_else(|| SandboxError::WorkerBinary(exe.display().to_string()))?;
    let found = [Some(dir), dir.parent()]
        .into_iter()
        .flatten()
        .map(|d| d.join(&file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| SandboxError::WorkerBinary(format!("{} next to {}", file_name, exe.display())));
    found
}

pub async fn run(job: Job, binary: &Path) -> ExecutionResult {
    let started = Instant::now();
    let limit_ms = job.limits.execution_time_ms;
    let elapsed = || started.elapsed().as_millis() as u64;

    match tokio::time::timeout(Duration::from_millis(limit_ms), spawn_and_wait(&job, binary)).await {
        Ok(Ok(result)) => result,
        Ok(Err(SandboxError::WorkerLimit { kind, detail })) => {
            debug!(execution_id = %job.id, kind = kind.as_str(), "worker process hit a kernel limit");
            ExecutionResult::rejected(
                &job.id,
                job.strategy,
                &job.code_digest,
                format!("worker process exceeded a kernel limit: {}", detail),
                vec![SandboxViolation::new(kind, detail)],
                elapsed(),
            )
        }
        Ok(Err(e)) => {
            warn!(execution_id = %job.id, error = %e, "worker process failed");
            ExecutionResult::crashed(&job.id, job.strategy, &job.code_digest, e.to_string(), elapsed())
        }
        Err(_) => {
            // Dropping the future dropped the child, and `kill_on_drop` killed it.
            let elapsed = elapsed().max(limit_ms);
            debug!(execution_id = %job.id, elapsed_ms = elapsed, "worker process killed on timeout");
            ExecutionResult::timed_out(&job.id, job.strategy, &job.code_digest, limit_ms, elapsed)
        }
    }
}

async fn spawn_and_wait(job: &Job, binary: &Path) -> Result<ExecutionResult> {
    let payload = serde_json::to_vec(job)?;
    let limits = ProcessLimits::for_job(job);
    let mut command = Command::new(binary);
    command
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    {
        // SAFETY: the hook only issues setrlimit/prctl syscalls and does not allocate.
        unsafe {
            command.pre_exec(move || confine(limits));
        }
    }
    let mut child = command
        .spawn()
        .map_err(|source| SandboxError::Spawn {
            what: "worker process",
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let written = async {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        }
        .await;
        // A worker that dies mid-read closes the pipe; its exit status says why.
        match written {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = format!("{}: {}", output.status, stderr.trim());
        return Err(match limit_breached(&output.status, &stderr, &limits) {
            Some((kind, what)) => SandboxError::WorkerLimit {
                kind,
                detail: format!("{} ({})", what, detail),
            },
            None => SandboxError::WorkerExit(detail),
        });
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Runs in the forked child before exec.
#[cfg(unix)]
fn confine(limits: ProcessLimits) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(Resource::RLIMIT_AS, limits.address_space_bytes, limits.address_space_bytes)?;
    setrlimit(Resource::RLIMIT_CPU, limits.cpu_seconds, limits.cpu_seconds.saturating_add(1))?;
    setrlimit(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files)?;

    #[cfg(target_os = "linux")]
    {
        use nix::sys::prctl;
        use nix::sys::signal::Signal;

        prctl::set_pdeathsig(Signal::SIGKILL)?;
    }
    Ok(())
}

/// Maps an abnormal worker exit onto the kernel limit that caused it.
#[cfg(unix)]
fn limit_breached(
    status: &std::process::ExitStatus,
    stderr: &str,
    limits: &ProcessLimits,
) -> Option<(SandboxViolationKind, String)> {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    // Infallible allocations abort after printing to stderr.
    if status.code() == Some(WORKER_EXIT_OUT_OF_MEMORY) || stderr.contains("memory allocation of") {
        return Some((
            SandboxViolationKind::MemoryLimit,
            format!("address space ceiling of {} bytes exceeded", limits.address_space_bytes),
        ));
    }
    match status.signal().and_then(|s| Signal::try_from(s).ok()) {
        Some(Signal::SIGXCPU) => Some((
            SandboxViolationKind::CpuLimit,
            format!("kernel cpu ceiling of {}s exceeded", limits.cpu_seconds),
        )),
        _ => None,
    }
}

#[cfg(not(unix))]
fn limit_breached(
    _status: &std::process::ExitStatus,
    _stderr: &str,
    _limits: &ProcessLimits,
) -> Option<(SandboxViolationKind, String)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::types::ExecutionRequest;

    fn job(limits: ResourceLimits) -> Job {
        Job::new(
            "proc".into(),
            ExecutionRequest::new("1").with_limits(limits),
            &SandboxConfig::default(),
        )
    }

    #[test]
    fn test_process_limits_follow_the_job() {
        let limits = ProcessLimits::for_job(&job(ResourceLimits {
            memory_mb: 8,
            cpu_time_ms: 1_500,
            ..ResourceLimits::default()
        }));
        assert_eq!(limits.address_space_bytes, 8 * 1024 * 1024 + ADDRESS_SPACE_HEADROOM);
        assert_eq!(limits.cpu_seconds, 3);
        assert_eq!(limits.open_files, WORKER_MAX_FILES);
    }

    #[test]
    fn test_configured_worker_binary_must_exist() {
        let config = SandboxConfig::new().with_worker_binary("/nonexistent/bastion-sandbox-worker");
        assert!(matches!(
            resolve_worker_binary(&config),
            Err(SandboxError::WorkerBinary(_))
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        let config = SandboxConfig::new().with_worker_binary(file.path());
        assert_eq!(resolve_worker_binary(&config).unwrap(), file.path());
    }

    #[test]
    fn test_sibling_lookup_reports_where_it_looked() {
        // Test binaries live under deps/, one level below the worker.
        match resolve_worker_binary(&SandboxConfig::new()) {
            Ok(path) => assert!(path.ends_with(format!("{}{}", WORKER_BINARY_NAME, std::env::consts::EXE_SUFFIX))),
            Err(e) => assert!(e.to_string().contains(WORKER_BINARY_NAME)),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_classification() {
        use std::os::unix::process::ExitStatusExt;

        let limits = ProcessLimits::for_job(&job(ResourceLimits::default()));
        let aborted = std::process::ExitStatus::from_raw(6);
        let (kind, _) = limit_breached(&aborted, "memory allocation of 1048576 bytes failed", &limits).unwrap();
        assert_eq!(kind, SandboxViolationKind::MemoryLimit);

        let xcpu = std::process::ExitStatus::from_raw(nix::libc::SIGXCPU);
        let (kind, _) = limit_breached(&xcpu, "", &limits).unwrap();
        assert_eq!(kind, SandboxViolationKind::CpuLimit);

        let exited = std::process::ExitStatus::from_raw(WORKER_EXIT_OUT_OF_MEMORY << 8);
        let (kind, _) = limit_breached(&exited, "", &limits).unwrap();
        assert_eq!(kind, SandboxViolationKind::MemoryLimit);

        let plain = std::process::ExitStatus::from_raw(1 << 8);
        assert!(limit_breached(&plain, "decoding job", &limits).is_none());
    }
}
