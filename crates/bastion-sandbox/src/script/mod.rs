//! # Script Evaluator
//!
//! Scripts run in an embedded QuickJS engine through `rquickjs`. Every
//! call gets a fresh runtime and context, so nothing survives between
//! runs.
//!
//! ```text
//! source ──► prelude run() ──► QuickJS ──► JSON report ──► serde_json::Value
//!                 │                 │
//!  console.log / readFile / fetch   │ interrupt handler
//!                 ▼                 ▼
//!          ExecutionContext       Meter
//! ```
//!
//! The heap ceiling maps onto the runtime memory limit and the stack
//! ceiling onto the runtime stack limit. Time, CPU and cancellation are
//! polled by the interrupt handler. The namespace has no module loader
//! and no std/os modules; with the matching restrictions it also loses
//! `eval` and `Function`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::{Context, Ctx, Function, Persistent, Runtime};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use thiserror::Error;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::types::SandboxViolationKind;

/// Native stack the engine may use. Evaluator threads reserve
/// [`EVAL_STACK_BYTES`](crate::EVAL_STACK_BYTES).
pub const MAX_STACK_BYTES: usize = 4 * 1024 * 1024;

/// Installs the host bindings and returns the `run(source)` harness.
const PRELUDE: &str = include_str!("prelude.js");

/// Why a script did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The source does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script threw.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A ceiling or cancellation stopped evaluation.
    #[error("{0}")]
    Halted(String),
}

/// What the harness reports back as JSON.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Report {
    Ok {
        #[serde(default)]
        value: Json,
    },
    Thrown {
        name: String,
        message: String,
    },
}

/// Runs `code` with `bindings` as frozen, read-only globals.
pub fn evaluate(
    code: &str,
    bindings: &Map<String, Json>,
    host: &Rc<RefCell<ExecutionContext>>,
) -> Result<Json, ScriptError> {
    let (meter, memory_limit, config) = {
        let ctx = host.borrow();
        let config = json!({
            "bindings": bindings,
            "evalDisabled": ctx.eval_disabled(),
            "constructionDisabled": ctx.dynamic_construction_disabled(),
        });
        (ctx.meter(), ctx.memory_limit(), config.to_string())
    };

    let runtime = Runtime::new().map_err(|e| setup_failed(e.to_string()))?;
    runtime.set_max_stack_size(MAX_STACK_BYTES);
    let handler_meter = Arc::clone(&meter);
    runtime.set_interrupt_handler(Some(Box::new(move || handler_meter.poll())));
    let context = Context::full(&runtime).map_err(|e| setup_failed(e.to_string()))?;

    let run: Persistent<Function<'static>> = context.with(|ctx| {
        install(&ctx, host, config)
            .map(|run| Persistent::save(&ctx, run))
            .map_err(|e| setup_failed(describe(&ctx, e)))
    })?;

    // Only the script's own allocations count against the ceiling.
    runtime.run_gc();
    let baseline = heap_size(&runtime);
    runtime.set_memory_limit(usize::try_from(baseline.saturating_add(memory_limit)).unwrap_or(usize::MAX));

    meter.arm();
    let raw = context.with(|ctx| {
        run.restore(&ctx)
            .and_then(|run| run.call::<_, String>((code.to_string(),)))
            .map_err(|e| describe(&ctx, e))
    });
    host.borrow_mut()
        .record_memory(heap_size(&runtime).saturating_sub(baseline));

    if let Some(violation) = meter.take_trip() {
        debug!(kind = violation.kind.as_str(), "evaluation interrupted");
        return Err(ScriptError::Halted(host.borrow_mut().push_violation(violation)));
    }

    match raw {
        Ok(text) => match serde_json::from_str::<Report>(&text) {
            Ok(Report::Ok { value }) => Ok(value),
            Ok(Report::Thrown { name, message }) => Err(classify(host, memory_limit, &name, &message)),
            Err(e) => Err(ScriptError::Runtime(format!("malformed evaluation report: {}", e))),
        },
        // Escaped the harness: uncatchable, or the report itself ran out of memory.
        Err(message) => Err(classify(host, memory_limit, "InternalError", &message)),
    }
}

fn install<'js>(
    ctx: &Ctx<'js>,
    host: &Rc<RefCell<ExecutionContext>>,
    config: String,
) -> rquickjs::Result<Function<'js>> {
    let setup: Function = ctx.eval(PRELUDE)?;

    let log_host = Rc::clone(host);
    let log = Function::new(ctx.clone(), move |line: String| log_host.borrow_mut().log(line))?;

    let read_host = Rc::clone(host);
    let read = Function::new(ctx.clone(), move |path: String| {
        reply(read_host.borrow_mut().read_file(&path))
    })?;

    let fetch_host = Rc::clone(host);
    let fetch = Function::new(ctx.clone(), move |url: String| {
        reply(fetch_host.borrow_mut().fetch(&url))
    })?;

    setup.call((log, read, fetch, config))
}

/// Host replies cross into the engine as a JSON envelope; the prelude
/// turns `error` into a thrown `Error`.
fn reply(outcome: Result<String, String>) -> String {
    match outcome {
        Ok(body) => json!({ "ok": body }).to_string(),
        Err(message) => json!({ "error": message }).to_string(),
    }
}

fn describe(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    if let Some(text) = caught.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    // QuickJS throws null when it cannot allocate the error object.
    if caught.is_null() {
        return "out of memory".to_string();
    }
    "uncaught exception".to_string()
}

fn classify(host: &Rc<RefCell<ExecutionContext>>, memory_limit: u64, name: &str, message: &str) -> ScriptError {
    let mut ctx = host.borrow_mut();
    if message.contains("out of memory") {
        ctx.record_memory(memory_limit);
        return ScriptError::Halted(ctx.violate(
            SandboxViolationKind::MemoryLimit,
            format!("heap ceiling of {} bytes exceeded", memory_limit),
        ));
    }
    if message.contains("stack overflow") || message.contains("call stack") {
        return ScriptError::Halted(ctx.violate(
            SandboxViolationKind::StackLimit,
            format!("call stack ceiling of {} bytes exceeded", MAX_STACK_BYTES),
        ));
    }
    if name == "SyntaxError" {
        return ScriptError::Syntax(message.to_string());
    }
    ScriptError::Runtime(format!("{}: {}", name, message))
}

fn setup_failed(detail: String) -> ScriptError {
    ScriptError::Runtime(format!("engine setup failed: {}", detail))
}

fn heap_size(runtime: &Runtime) -> u64 {
    u64::try_from(runtime.memory_usage().malloc_size).unwrap_or(0)
}
