//! The unified security facade.
//!
//! [`SecurityOrchestrator`] owns one detector, one access manager and one
//! sandbox engine, all publishing into the same [`Audit`] sinks, and runs
//! every inbound request through the same pipeline:
//!
//! | # | Check | Kind |
//! |---|-------|------|
//! | 1 | Origin blocklist | hard |
//! | 2 | Rate limit | hard |
//! | 3 | Session timeout | hard |
//! | 4 | Permission | hard |
//! | 5 | Request shape | soft |
//! | 6 | Payload size | soft |
//! | 7 | File-path sanitization | soft |
//! | 8 | Host allow-list | soft |
//! | 9 | Code-injection scan | soft |
//! | 10 | Version/scheme format | soft |
//! | 11 | Threat detection | soft |
//!
//! The first hard failure ends the pipeline. Soft failures are all
//! collected, so a denial lists every problem with the request at once.

use std::sync::Arc;
use std::time::Duration;

use bastion_access::{AccessError, AccessManager, SessionSnapshot};
use bastion_audit::{Audit, SecurityEvent, Severity, Violation, ViolationKind};
use bastion_detect::{ContextTag, Detection, ThreatDetector};
use bastion_sandbox::{
    ExecutionRequest, ExecutionResult, NetworkBridge, PoolStats, SandboxEngine, SandboxViolationKind,
};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SecurityPolicy;
use crate::decision::{Decision, Reason, Stage};
use crate::error::BastionError;
use crate::inspect::{self, Leaf};
use crate::requests::{CallerContext, PromptRequest, ResourceRead, ToolCall};
use crate::Result;

const SOURCE: &str = "orchestrator";

/// Longest excerpt of caller input echoed into a reason.
const EXCERPT_CHARS: usize = 64;

/// Capability names checked at step 4.
pub mod capability {
    pub const TOOLS_CALL: &str = "tools.call";
    pub const RESOURCES_READ: &str = "resources.read";
    pub const PROMPTS_GET: &str = "prompts.get";
    pub const SANDBOX_EXECUTE: &str = "sandbox.execute";
}

/// Outcome of [`SecurityOrchestrator::execute_code`].
#[derive(Debug, Clone)]
pub struct CodeExecution {
    /// Admission decision from the hard checks.
    pub decision: Decision,
    /// Present when the code was admitted and run.
    pub result: Option<ExecutionResult>,
    /// Effective wall-clock ceiling of the request.
    pub limit_ms: u64,
}

impl CodeExecution {
    /// Returns the completion value, or the taxonomy error describing why
    /// there is none.
    pub fn into_result(self) -> Result<Value> {
        if !self.decision.allowed {
            return Err(BastionError::AccessDenied(self.decision.reason_messages().join("; ")));
        }
        let Some(result) = self.result else {
            return Err(BastionError::ExecutionFailure("no execution result".into()));
        };
        if result.success {
            return Ok(result.value.unwrap_or(Value::Null));
        }

        if result.violations.iter().any(|v| v.kind == SandboxViolationKind::Timeout) {
            return Err(BastionError::ExecutionTimeout {
                elapsed_ms: result.metrics.elapsed_ms,
                limit_ms: self.limit_ms,
            });
        }
        if let Some(v) = result.violations.iter().find(|v| v.kind.is_resource_exhaustion()) {
            return Err(BastionError::ResourceExhausted(v.to_string()));
        }
        let policy: Vec<String> = result
            .violations
            .iter()
            .filter(|v| {
                matches!(
                    v.kind,
                    SandboxViolationKind::DeniedPattern
                        | SandboxViolationKind::FileDenied
                        | SandboxViolationKind::NetworkDenied
                )
            })
            .map(|v| v.to_string())
            .collect();
        if !policy.is_empty() {
            return Err(BastionError::PolicyViolation(policy.join("; ")));
        }
        Err(BastionError::ExecutionFailure(
            result.error.unwrap_or_else(|| "execution failed".into()),
        ))
    }
}

/// The Bastion security facade.
///
/// # Example
///
/// ```rust,no_run
/// use bastion_core::{CallerContext, SecurityOrchestrator, SecurityPolicy, ToolCall};
/// use serde_json::json;
///
/// # fn demo() -> bastion_core::Result<()> {
/// let bastion = SecurityOrchestrator::new(SecurityPolicy::default())?;
/// let ctx = CallerContext::new("session-1", "10.0.0.7");
///
/// let decision = bastion.check_tool_call(&ctx, &ToolCall::new("search", json!({"q": "tokio"})));
/// if !decision.is_allowed() {
///     for reason in &decision.reasons {
///         eprintln!("{}", reason);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SecurityOrchestrator {
    policy: SecurityPolicy,
    audit: Audit,
    detector: ThreatDetector,
    access: Arc<AccessManager>,
    sandbox: SandboxEngine,
    name_pattern: Regex,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl SecurityOrchestrator {
    /// Create an orchestrator with its own audit sinks.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Config`] if the policy does not validate;
    /// the system must not serve with a malformed policy.
    pub fn new(policy: SecurityPolicy) -> Result<Self> {
        Self::with_audit(policy, Audit::new())
    }

    /// Create an orchestrator publishing to `audit` and reading its clock.
    pub fn with_audit(policy: SecurityPolicy, audit: Audit) -> Result<Self> {
        policy.validate()?;

        let detector = ThreatDetector::with_audit(policy.detector_config(), audit.clone())?;
        let access = Arc::new(AccessManager::with_audit(policy.access_config(), audit.clone())?);
        let sandbox = SandboxEngine::with_audit(policy.sandbox_config(), audit.clone())?;
        let name_pattern = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:/\-]*$")
            .map_err(|e| BastionError::Config(e.to_string()))?;

        info!(
            requests_per_hour = policy.rate.requests_per_hour,
            require_auth = policy.access.require_auth,
            strategy = %policy.sandbox.default_strategy,
            "security orchestrator initialized"
        );

        Ok(Self {
            policy,
            audit,
            detector,
            access,
            sandbox,
            name_pattern,
            maintenance: Mutex::new(None),
        })
    }

    /// Installs the host-side implementation of permitted sandbox `fetch` calls.
    #[must_use]
    pub fn with_network(mut self, bridge: Arc<dyn NetworkBridge>) -> Self {
        self.sandbox = self.sandbox.with_network(bridge);
        self
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Validates a capability invocation.
    pub fn check_tool_call(&self, ctx: &CallerContext, call: &ToolCall) -> Decision {
        self.evaluate(ctx, capability::TOOLS_CALL, &call.name, |f| {
            self.inspect_arguments(f, &call.name, &call.arguments, ContextTag::ToolArguments, false)
        })
    }

    /// Validates a resource-locator read.
    pub fn check_resource_read(&self, ctx: &CallerContext, read: &ResourceRead) -> Decision {
        self.evaluate(ctx, capability::RESOURCES_READ, &excerpt(&read.uri), |f| {
            self.inspect_locator(f, &read.uri)
        })
    }

    /// Validates a templated-content request.
    pub fn check_prompt(&self, ctx: &CallerContext, request: &PromptRequest) -> Decision {
        self.evaluate(ctx, capability::PROMPTS_GET, &request.name, |f| {
            self.inspect_arguments(f, &request.name, &request.arguments, ContextTag::Template, true)
        })
    }

    /// Admits a code-execution request through the hard checks plus the
    /// `sandbox.execute` permission, then runs it in the sandbox.
    pub async fn execute_code(&self, ctx: &CallerContext, request: ExecutionRequest) -> CodeExecution {
        let configured = self.policy.sandbox.limits.execution_time_ms;
        let limit_ms = request
            .limits
            .map_or(configured, |l| l.execution_time_ms.min(configured));

        if let Some(reason) = self.hard_checks(ctx, capability::SANDBOX_EXECUTE) {
            info!(
                session_id = %ctx.session_id,
                origin = %ctx.origin,
                stage = %reason.stage,
                "execution refused: {}",
                reason.message
            );
            return CodeExecution {
                decision: Decision::hard_deny(reason),
                result: None,
                limit_ms,
            };
        }

        let result = self.sandbox.execute(request).await;
        debug!(
            session_id = %ctx.session_id,
            execution_id = %result.id,
            success = result.success,
            "execution finished"
        );
        CodeExecution {
            decision: Decision::from_reasons(Vec::new(), Severity::Low, None),
            result: Some(result),
            limit_ms,
        }
    }

    /// Runs the detector alone, outside the pipeline.
    pub fn detect(&self, text: &str, context: ContextTag) -> Detection {
        self.detector.detect(text, context)
    }

    fn evaluate<F>(&self, ctx: &CallerContext, capability: &str, target: &str, inspect: F) -> Decision
    where
        F: FnOnce(&mut Findings<'_>),
    {
        if let Some(reason) = self.hard_checks(ctx, capability) {
            info!(
                session_id = %ctx.session_id,
                origin = %ctx.origin,
                capability,
                stage = %reason.stage,
                "request denied: {}",
                reason.message
            );
            return Decision::hard_deny(reason);
        }

        let mut findings = Findings::new(&self.audit, ctx, capability, target);
        inspect(&mut findings);
        let decision = findings.finish();

        if decision.allowed {
            debug!(session_id = %ctx.session_id, capability, target, risk = %decision.risk, "request allowed");
        } else {
            info!(
                session_id = %ctx.session_id,
                origin = %ctx.origin,
                capability,
                target,
                reasons = decision.reasons.len(),
                risk = %decision.risk,
                "request denied"
            );
        }
        decision
    }

    // ------------------------------------------------------------------
    // Hard checks (1-4)
    // ------------------------------------------------------------------

    fn hard_checks(&self, ctx: &CallerContext, capability: &str) -> Option<Reason> {
        // 1. Origin blocklist
        if self.access.is_origin_blocked(&ctx.origin) {
            let message = AccessError::OriginBlocked {
                origin: ctx.origin.clone(),
            }
            .to_string();
            self.record(ctx, Stage::OriginBlocklist, ViolationKind::OriginBlocked, Severity::High, &message);
            return Some(Reason::new(Stage::OriginBlocklist, ViolationKind::OriginBlocked, message));
        }

        // 3. Session timeout. Judged ahead of the rate limit so an expired
        // session's request is never counted.
        if let Err(e) = self.access.check_session_timeout(&ctx.session_id) {
            let message = e.to_string();
            return Some(Reason::new(Stage::SessionTimeout, ViolationKind::SessionExpired, message));
        }

        // 2. Rate limit
        let rate = self.access.check_rate_limit(&ctx.session_id, &ctx.origin);
        if !rate.allowed {
            let kind = if self.access.is_origin_blocked(&ctx.origin) {
                ViolationKind::OriginBlocked
            } else if self.access.session(&ctx.session_id).is_some_and(|s| s.blocked) {
                ViolationKind::SessionBlocked
            } else {
                ViolationKind::RateLimit
            };
            let message = rate.reason.unwrap_or_else(|| "rate limit exceeded".into());
            return Some(Reason::new(Stage::RateLimit, kind, message));
        }

        // 4. Permission
        let permission = self.access.check_permission(&ctx.session_id, capability);
        if !permission.allowed {
            let message = permission
                .reason
                .unwrap_or_else(|| format!("permission denied for {}", capability));
            return Some(Reason::new(Stage::Permission, ViolationKind::PermissionDenied, message));
        }
        None
    }

    fn record(&self, ctx: &CallerContext, stage: Stage, kind: ViolationKind, severity: Severity, message: &str) {
        let violation = Violation::new(kind, severity, message, SOURCE, self.audit.now_ms())
            .with_meta("session_id", ctx.session_id.as_str())
            .with_meta("origin", ctx.origin.as_str())
            .with_meta("stage", stage.as_str());
        self.audit.log().record(violation);
    }

    // ------------------------------------------------------------------
    // Soft checks (5-11)
    // ------------------------------------------------------------------

    fn inspect_arguments(
        &self,
        f: &mut Findings<'_>,
        name: &str,
        arguments: &Value,
        context: ContextTag,
        strings_only: bool,
    ) {
        let limits = &self.policy.limits;
        let empty = Value::Object(Map::new());
        let args = if arguments.is_null() { &empty } else { arguments };

        // 5. Request shape
        self.check_name(f, name);
        match args {
            Value::Object(map) if strings_only => {
                for (key, value) in map.iter().filter(|(_, v)| !v.is_string()) {
                    f.fail(
                        Stage::Schema,
                        ViolationKind::Schema,
                        Severity::Medium,
                        format!("argument '{}' must be a string, got {}", excerpt(key), json_type(value)),
                    );
                }
            }
            Value::Object(_) => {}
            other => f.fail(
                Stage::Schema,
                ViolationKind::Schema,
                Severity::Medium,
                format!("arguments must be an object, got {}", json_type(other)),
            ),
        }
        let depth = inspect::depth(args);
        if depth > limits.max_argument_depth {
            f.fail(
                Stage::Schema,
                ViolationKind::Schema,
                Severity::Medium,
                format!("arguments nest {} levels, limit {}", depth, limits.max_argument_depth),
            );
        }

        // 6. Payload size
        let serialized = args.to_string();
        if serialized.len() > limits.max_payload_bytes {
            f.fail(
                Stage::PayloadSize,
                ViolationKind::PayloadTooLarge,
                Severity::Medium,
                format!("payload is {} bytes, limit {}", serialized.len(), limits.max_payload_bytes),
            );
        }

        let leaves = inspect::string_leaves(args, "arguments");

        // 7. File-like values
        for leaf in leaves.iter().filter(|l| l.is_file_like()) {
            self.check_path(f, &leaf.path, leaf.value);
        }

        // 8. Remote locators
        for leaf in leaves.iter().filter(|l| l.is_remote_locator()) {
            self.check_host(f, &leaf.path, leaf.value.trim());
        }

        // 9. Code injection
        self.check_injection(f, "arguments", &serialized);

        // 10. Formats
        for leaf in leaves.iter().filter(|l| l.is_version()) {
            check_version(f, leaf);
        }

        // 11. Threat detection
        let text = leaves.iter().map(|l| l.value).collect::<Vec<_>>().join("\n");
        self.check_threats(f, &text, context);
    }

    fn inspect_locator(&self, f: &mut Findings<'_>, uri: &str) {
        let limits = &self.policy.limits;

        // 5. Request shape
        let locator = if uri.trim().is_empty() {
            f.fail(Stage::Schema, ViolationKind::Schema, Severity::Medium, "uri is empty".into());
            None
        } else {
            match self.detector.parse_locator(uri) {
                Ok(locator) => Some(locator),
                Err(e) => {
                    f.fail(
                        Stage::Schema,
                        ViolationKind::Internal,
                        Severity::Medium,
                        format!("malformed locator: {}", e),
                    );
                    None
                }
            }
        };

        // 6. Locator length
        if uri.len() > limits.max_uri_length {
            f.fail(
                Stage::PayloadSize,
                ViolationKind::PayloadTooLarge,
                Severity::Medium,
                format!("uri is {} bytes, limit {}", uri.len(), limits.max_uri_length),
            );
        }

        if let Some(locator) = &locator {
            // 7. File locators
            if locator.scheme == "file" {
                self.check_path(f, "uri", &locator.path);
            }
            // 8. Remote host
            if locator.is_remote() && !locator.host_allowed(&self.policy.network.allowed_hosts) {
                f.fail(
                    Stage::HostAllowList,
                    ViolationKind::HostNotAllowed,
                    Severity::Medium,
                    format!("uri: host '{}' is not on the allow-list", excerpt(&locator.host)),
                );
            }
        }

        // 9. Code injection
        self.check_injection(f, "uri", uri);

        // 10. Scheme
        if let Some(locator) = &locator {
            let allowed = self
                .policy
                .network
                .allowed_schemes
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&locator.scheme));
            if !allowed {
                f.fail(
                    Stage::Format,
                    ViolationKind::InvalidFormat,
                    Severity::Low,
                    format!("uri: scheme '{}' is not allowed", excerpt(&locator.scheme)),
                );
            }
        }

        // 11. Threat detection
        self.check_threats(f, uri, ContextTag::ResourceLocator);
    }

    fn check_name(&self, f: &mut Findings<'_>, name: &str) {
        let max = self.policy.limits.max_name_length;
        let problem = if name.trim().is_empty() {
            Some("name is empty".to_string())
        } else if name.len() > max {
            Some(format!("name is {} bytes, limit {}", name.len(), max))
        } else if !self.name_pattern.is_match(name) {
            Some(format!("name '{}' has characters outside [A-Za-z0-9_.:/-]", excerpt(name)))
        } else {
            None
        };
        if let Some(message) = problem {
            f.fail(Stage::Schema, ViolationKind::Schema, Severity::Medium, message);
        }
    }

    fn check_path(&self, f: &mut Findings<'_>, label: &str, path: &str) {
        let problem = inspect::path_problem(path)
            .or_else(|| self.detector.is_system_path(path).then_some("absolute system path"));
        if let Some(problem) = problem {
            f.fail(
                Stage::FilePath,
                ViolationKind::PathTraversal,
                Severity::High,
                format!("{}: {} ('{}')", label, problem, excerpt(path)),
            );
        }
    }

    fn check_host(&self, f: &mut Findings<'_>, label: &str, uri: &str) {
        match self.detector.parse_locator(uri) {
            Ok(locator) if locator.is_remote() && !locator.host_allowed(&self.policy.network.allowed_hosts) => {
                f.fail(
                    Stage::HostAllowList,
                    ViolationKind::HostNotAllowed,
                    Severity::Medium,
                    format!("{}: host '{}' is not on the allow-list", label, excerpt(&locator.host)),
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(label, error = %e, "unparseable locator in arguments");
                f.fail(
                    Stage::HostAllowList,
                    ViolationKind::Internal,
                    Severity::Medium,
                    format!("{}: malformed locator: {}", label, e),
                );
            }
        }
    }

    fn check_injection(&self, f: &mut Findings<'_>, label: &str, text: &str) {
        let matched = self.detector.scan_code_injection(text);
        if !matched.is_empty() {
            f.fail(
                Stage::CodeInjection,
                ViolationKind::CodeInjection,
                Severity::High,
                format!("{}: code injection pattern: {}", label, matched.join("; ")),
            );
        }
    }

    fn check_threats(&self, f: &mut Findings<'_>, text: &str, context: ContextTag) {
        let detection = self.detector.detect(text, context);
        let deny_at = self.policy.detection.deny_severity;

        let denying: Vec<Reason> = detection
            .findings
            .iter()
            .filter(|finding| finding.blocked || finding.severity >= deny_at)
            .map(|finding| {
                Reason::new(
                    Stage::ThreatDetection,
                    finding.kind.violation_kind(),
                    format!(
                        "{} ({:.2}, {}): {}",
                        finding.kind, finding.confidence, finding.severity, finding.description
                    ),
                )
            })
            .collect();

        // The detector records high-risk detections itself.
        if detection.overall_risk < Severity::High {
            for reason in &denying {
                f.record(reason.stage, reason.kind, detection.overall_risk, &reason.message);
            }
        }
        f.reasons.extend(denying);
        f.risk = detection.overall_risk;
        f.sanitized = detection.sanitized;
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    pub fn block_origin(&self, origin: &str) -> bool {
        self.access.block_origin(origin)
    }

    pub fn unblock_origin(&self, origin: &str) -> bool {
        self.access.unblock_origin(origin)
    }

    pub fn block_session(&self, session_id: &str) {
        self.access.block_session(session_id)
    }

    pub fn unblock_session(&self, session_id: &str) -> bool {
        self.access.unblock_session(session_id)
    }

    pub fn grant_role(&self, session_id: &str, role: &str) -> Result<()> {
        Ok(self.access.grant_role(session_id, role)?)
    }

    pub fn revoke_role(&self, session_id: &str, role: &str) -> Result<bool> {
        Ok(self.access.revoke_role(session_id, role)?)
    }

    pub fn evict_session(&self, session_id: &str) -> bool {
        self.access.evict_session(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.access.session(session_id)
    }

    // ------------------------------------------------------------------
    // Observability and lifecycle
    // ------------------------------------------------------------------

    /// Subscribes to the event stream. Slow subscribers lose the oldest
    /// events; emitters never wait.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.audit.bus().subscribe()
    }

    /// Snapshot of the violation log, oldest first.
    pub fn violations(&self) -> Vec<Violation> {
        self.audit.log().snapshot()
    }

    /// The `n` most recent violations, oldest first.
    pub fn recent_violations(&self, n: usize) -> Vec<Violation> {
        self.audit.log().recent(n)
    }

    /// Starts the background session sweep. Returns false if it is
    /// already running. Must be called inside a tokio runtime.
    pub fn start_maintenance(&self) -> bool {
        let mut slot = self.maintenance.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let period = Duration::from_secs(self.policy.rate.sweep_interval_secs);
        *slot = Some(self.access.spawn_sweeper(period));
        info!(period_secs = period.as_secs(), "session sweep started");
        true
    }

    /// Stops the background session sweep. Returns false if it was not running.
    pub fn stop_maintenance(&self) -> bool {
        match self.maintenance.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stops maintenance and shuts the worker pool down.
    pub fn shutdown(&self) {
        self.stop_maintenance();
        self.sandbox.shutdown();
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.sandbox.pool_stats()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    pub fn access(&self) -> &AccessManager {
        &self.access
    }

    pub fn detector(&self) -> &ThreatDetector {
        &self.detector
    }

    pub fn sandbox(&self) -> &SandboxEngine {
        &self.sandbox
    }
}

impl std::fmt::Debug for SecurityOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityOrchestrator")
            .field("access", &self.access)
            .field("sandbox", &self.sandbox)
            .field("audit", &self.audit)
            .finish()
    }
}

/// Soft failures collected for one request.
struct Findings<'a> {
    audit: &'a Audit,
    ctx: &'a CallerContext,
    capability: &'a str,
    target: &'a str,
    reasons: Vec<Reason>,
    risk: Severity,
    sanitized: Option<String>,
}

impl<'a> Findings<'a> {
    fn new(audit: &'a Audit, ctx: &'a CallerContext, capability: &'a str, target: &'a str) -> Self {
        Self {
            audit,
            ctx,
            capability,
            target,
            reasons: Vec::new(),
            risk: Severity::Low,
            sanitized: None,
        }
    }

    /// Records and collects one soft failure.
    fn fail(&mut self, stage: Stage, kind: ViolationKind, severity: Severity, message: String) {
        self.record(stage, kind, severity, &message);
        self.reasons.push(Reason::new(stage, kind, message));
    }

    fn record(&self, stage: Stage, kind: ViolationKind, severity: Severity, message: &str) {
        let violation = Violation::new(kind, severity, message, SOURCE, self.audit.now_ms())
            .with_meta("session_id", self.ctx.session_id.as_str())
            .with_meta("origin", self.ctx.origin.as_str())
            .with_meta("capability", self.capability)
            .with_meta("target", self.target)
            .with_meta("stage", stage.as_str());
        self.audit.log().record(violation);
    }

    fn finish(self) -> Decision {
        Decision::from_reasons(self.reasons, self.risk, self.sanitized)
    }
}

fn check_version(f: &mut Findings<'_>, leaf: &Leaf<'_>) {
    if !inspect::is_valid_version(leaf.value) {
        f.fail(
            Stage::Format,
            ViolationKind::InvalidFormat,
            Severity::Low,
            format!("{}: '{}' is not a valid version", leaf.path, excerpt(leaf.value)),
        );
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truncates caller input before it is echoed into a reason.
fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
