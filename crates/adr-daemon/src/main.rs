//! # adr-daemon
//!
//! Hosts the kill switch for an ADR deployment.
//!
//! Arms every channel the active policy configures (OS signals, a GPIO
//! line, a local unix socket, a loopback HTTP endpoint), runs the watchdog
//! and action-log anchor ticks, and optionally executes a graph under
//! supervision with a dry-run handler.
//!
//! ## Usage
//!
//! ```text
//! adr-daemon --project-root . --graph plan.yaml --grant fs:/data/out
//! ```
//!
//! Without `--graph` the daemon runs until the switch is hard-stopped or
//! frozen. A supervised run that waits on an approval picks it up from the
//! HTTP channel (`adr approve <node> --operator <id>`). Logs go to stderr; the run report, if any, is printed to stdout
//! as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adr_audit::{ActionLog, SharedActionLog};
use adr_graph::{validate, GraphSpec};
use adr_killswitch::KillSwitch;
use adr_policy::{Capability, PolicyConstraintSet};
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use adr_daemon::{channels, supervisor, DaemonConfig, RunInbox, Supervised};

/// ADR kill-switch daemon.
#[derive(Parser)]
#[command(name = "adr-daemon", about = "ADR kill-switch channels and supervised runs")]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Validate this graph (JSON or YAML) and run it under supervision.
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Semantic confidence reported for every node.
    #[arg(long, default_value_t = 1.0)]
    semantic_score: f64,

    /// Capability granted to the run at start (repeatable).
    #[arg(long = "grant")]
    grants: Vec<String>,

    /// Node approved at start (repeatable, needs --operator).
    #[arg(long = "approve")]
    approvals: Vec<String>,

    /// Operator identity recorded with --approve.
    #[arg(long)]
    operator: Option<String>,

    /// How long each dry-run node takes, in milliseconds.
    #[arg(long, default_value_t = 0)]
    node_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("adr_daemon=info".parse()?)
                .add_directive("adr_runtime=info".parse()?)
                .add_directive("adr_killswitch=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli
        .project_root
        .canonicalize()
        .with_context(|| format!("project root {}", cli.project_root.display()))?;
    let config = DaemonConfig::load(&project_root)?;
    tracing::info!("Project root: {}", project_root.display());

    let policy = if config.policy.exists() {
        PolicyConstraintSet::load(&config.policy)
            .with_context(|| format!("loading policy {}", config.policy.display()))?
    } else {
        tracing::warn!(path = %config.policy.display(), "no policy file; using defaults");
        PolicyConstraintSet::default()
    };
    let policy = Arc::new(policy);
    tracing::info!(domain = %policy.domain, policy_hash = policy.policy_hash(), "policy loaded");
    tracing::info!(
        log_level = ?policy.audit.log_level,
        time_source = ?policy.audit.time_source,
        merkle_root_holder = ?policy.audit.merkle_root_holder,
        offline_capable = policy.kill_switch.offline_capable,
        "audit and kill-switch settings"
    );

    if let Some(parent) = config.action_log.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut log = ActionLog::open(&config.action_log)?;
    if let Some(ms) = policy.audit.anchor_interval_ms {
        log = log.with_anchor_interval(chrono::Duration::milliseconds(ms as i64));
    }
    let log = SharedActionLog::new(log);

    let switch = KillSwitch::init(policy.kill_switch.clone());
    if switch.config().channels.is_empty() {
        tracing::warn!("policy configures no kill-switch channels; only in-process stops are possible");
    }
    let inbox = RunInbox::new();
    let _channels = channels::arm_channels(&switch, &config, &inbox).await;

    let ticks = spawn_ticks(Arc::clone(&switch), log.clone(), Duration::from_millis(config.tick_ms));

    match &cli.graph {
        Some(path) => {
            let spec = GraphSpec::load(path)
                .with_context(|| format!("loading graph {}", path.display()))?;
            let graph = Arc::new(validate(spec, &policy)?);
            tracing::info!(
                version = graph.version(),
                nodes = graph.len(),
                graph_hash = graph.graph_hash(),
                "graph validated"
            );
            let report = supervisor::spawn(
                Supervised {
                    graph,
                    policy: Arc::clone(&policy),
                    switch: Arc::clone(&switch),
                    log: log.clone(),
                    semantic_score: cli.semantic_score,
                    step: Duration::from_millis(cli.node_ms),
                    grants: cli.grants.iter().map(Capability::new).collect(),
                    approvals: cli.approvals.clone(),
                    operator: cli.operator.clone(),
                },
                inbox.clone(),
            )
            .await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            ticks.abort();
        }
        None => {
            ticks.await?;
        }
    }

    log.flush()?;
    tracing::info!(state = %switch.state(), "daemon shutting down");
    Ok(())
}

/// Watchdog and anchor checks. Ends once the switch leaves the states a
/// run can continue from.
fn spawn_ticks(
    switch: Arc<KillSwitch>,
    log: SharedActionLog,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            switch.check_watchdog();
            if let Err(e) = log.maybe_anchor() {
                tracing::error!(error = %e, "anchor heartbeat failed");
            }
            if switch.state().aborts_in_flight() {
                tracing::warn!(state = %switch.state(), "kill switch engaged; stopping ticks");
                break;
            }
        }
    })
}
