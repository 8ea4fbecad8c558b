//! Bastion CLI - validate policies and run requests through the pipeline

use std::path::PathBuf;

use anyhow::Context;
use bastion_core::{
    CallerContext, ContextTag, ExecutionRequest, IsolationStrategy, ResourceLimits, ResourceRead,
    SecurityOrchestrator, SecurityPolicy, ToolCall,
};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bastion")]
#[command(about = "Bastion - security orchestration for request-serving workloads")]
struct Cli {
    /// Policy file (.toml or .json); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Check policy validity and print the effective policy
    Check,
    /// Score text with the threat detector
    Scan {
        /// Where the text came from: general, tool, uri or template
        #[arg(long, default_value = "general")]
        context: ContextTag,
        text: String,
    },
    /// Run a tool call through the full pipeline
    Tool {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
        #[command(flatten)]
        caller: Caller,
    },
    /// Run a resource read through the full pipeline
    Read {
        uri: String,
        #[command(flatten)]
        caller: Caller,
    },
    /// Execute a script in the sandbox
    Exec {
        code: String,
        /// restricted, worker_pool or process
        #[arg(long)]
        strategy: Option<IsolationStrategy>,
        /// Wall-clock ceiling, tightened against the policy
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[command(flatten)]
        caller: Caller,
    },
}

#[derive(clap::Args)]
struct Caller {
    #[arg(long, default_value = "cli")]
    session: String,
    #[arg(long, default_value = "127.0.0.1")]
    origin: String,
}

impl Caller {
    fn context(&self) -> CallerContext {
        CallerContext::new(&self.session, &self.origin)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let policy = match &cli.config {
        Some(path) => SecurityPolicy::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SecurityPolicy::default(),
    };

    let bastion = SecurityOrchestrator::new(policy.clone()).context("building orchestrator")?;

    let report = match cli.command {
        Commands::Check => {
            info!("policy is valid");
            serde_json::to_value(&policy)?
        }
        Commands::Scan { context, text } => serde_json::to_value(bastion.detect(&text, context))?,
        Commands::Tool {
            name,
            arguments,
            caller,
        } => {
            let arguments: Value = serde_json::from_str(&arguments).context("arguments must be JSON")?;
            let decision = bastion.check_tool_call(&caller.context(), &ToolCall::new(name, arguments));
            serde_json::to_value(decision)?
        }
        Commands::Read { uri, caller } => {
            let decision = bastion.check_resource_read(&caller.context(), &ResourceRead::new(uri));
            serde_json::to_value(decision)?
        }
        Commands::Exec {
            code,
            strategy,
            timeout_ms,
            caller,
        } => {
            let mut request = ExecutionRequest::new(code);
            if let Some(strategy) = strategy {
                request = request.with_strategy(strategy);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_limits(ResourceLimits {
                    execution_time_ms: ms,
                    ..policy.sandbox.limits
                });
            }
            let outcome = bastion.execute_code(&caller.context(), request).await;
            match outcome.result {
                Some(result) => serde_json::to_value(result)?,
                None => json!({ "decision": outcome.decision }),
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    bastion.shutdown();
    Ok(())
}
