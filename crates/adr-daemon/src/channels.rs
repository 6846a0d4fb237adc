// channels.rs — Kill-switch channel listeners.
//
// Every channel translates its input into the one command vocabulary
// (`soft_stop`, `hard_stop`, `freeze`, `resume`, `heartbeat`) and hands it to
// the shared switch. A listener is armed only once it is actually listening;
// a listener that dies reports `channel_lost`, which escalates the switch.
//
//   unix_signal       SIGTERM soft_stop, SIGINT hard_stop,
//                     SIGUSR1 freeze, SIGUSR2 resume
//   hardware_gpio     sysfs value file polled; assertion issues `on_assert`
//   local_named_pipe  unix domain socket, one command per line
//   local_http        POST /kill/{command} on 127.0.0.1 only
//
// The HTTP channel also carries operator events for the supervised run:
// POST /run/approve/{node} and POST /run/grant, delivered through the
// run inbox.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adr_graph::NodeId;
use adr_killswitch::{ChannelKind, ChannelSpec, KillCommand, KillSwitch};
use adr_policy::Capability;
use adr_runtime::RunEvent;
use anyhow::{bail, Context, Result};
use axum::extract::{ConnectInfo, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::config::DaemonConfig;
use crate::supervisor::{Delivery, RunInbox};

/// Start every configured channel. A channel that cannot be started is
/// reported as lost, which escalates the switch, and the rest still start.
pub async fn arm_channels(
    switch: &Arc<KillSwitch>,
    config: &DaemonConfig,
    inbox: &RunInbox,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for spec in &switch.config().channels {
        let started = match spec {
            ChannelSpec::UnixSignal => listen_signals(Arc::clone(switch)),
            ChannelSpec::HardwareGpio {
                pin,
                active_low,
                on_assert,
            } => {
                watch_gpio(
                    Arc::clone(switch),
                    &config.gpio_root,
                    *pin,
                    *active_low,
                    *on_assert,
                    Duration::from_millis(config.gpio_poll_ms),
                )
                .await
            }
            ChannelSpec::LocalNamedPipe { path } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    config.project_root.join(path)
                };
                listen_named_pipe(Arc::clone(switch), path).await
            }
            ChannelSpec::LocalHttp { port } => {
                serve_http(Arc::clone(switch), *port, inbox.clone()).await
            }
        };
        match started {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                tracing::error!(channel = %spec.kind(), error = %format!("{e:#}"), "channel failed to start");
                switch.channel_lost(spec.kind(), format!("{e:#}"));
            }
        }
    }
    handles
}

// ── OS signals ──────────────────────────────────────────────────────

pub fn listen_signals(switch: Arc<KillSwitch>) -> Result<JoinHandle<()>> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut usr2 = signal(SignalKind::user_defined2()).context("installing SIGUSR2 handler")?;
    switch.arm_channel(ChannelKind::UnixSignal);

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                Some(()) = term.recv() => KillCommand::SoftStop,
                Some(()) = int.recv() => KillCommand::HardStop,
                Some(()) = usr1.recv() => KillCommand::Freeze,
                Some(()) = usr2.recv() => KillCommand::Resume,
                else => break,
            };
            tracing::warn!(%command, "signal received");
            switch.command(command, ChannelKind::UnixSignal);
        }
        switch.channel_lost(ChannelKind::UnixSignal, "signal streams closed");
    }))
}

// ── GPIO line ───────────────────────────────────────────────────────

async fn read_level(path: &Path) -> Result<bool> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    match text.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => bail!("unexpected value '{}' in {}", other, path.display()),
    }
}

/// Poll `<root>/gpio<pin>/value`. The command fires on each transition into
/// the asserted level, including a line that is already asserted at start.
pub async fn watch_gpio(
    switch: Arc<KillSwitch>,
    root: &Path,
    pin: u32,
    active_low: bool,
    on_assert: KillCommand,
    poll: Duration,
) -> Result<JoinHandle<()>> {
    let value_path = root.join(format!("gpio{}", pin)).join("value");
    let mut asserted = read_level(&value_path).await? != active_low;
    switch.arm_channel(ChannelKind::HardwareGpio);
    if asserted {
        tracing::warn!(pin, %on_assert, "gpio line asserted at start");
        switch.command(on_assert, ChannelKind::HardwareGpio);
    }

    Ok(tokio::spawn(async move {
        let mut tick = tokio::time::interval(poll);
        loop {
            tick.tick().await;
            match read_level(&value_path).await {
                Ok(level) => {
                    let now = level != active_low;
                    if now && !asserted {
                        tracing::warn!(pin, %on_assert, "gpio line asserted");
                        switch.command(on_assert, ChannelKind::HardwareGpio);
                    }
                    asserted = now;
                }
                Err(e) => {
                    switch.channel_lost(ChannelKind::HardwareGpio, format!("gpio{}: {:#}", pin, e));
                    break;
                }
            }
        }
    }))
}

// ── Local named pipe (unix socket) ──────────────────────────────────

pub async fn listen_named_pipe(switch: Arc<KillSwitch>, path: PathBuf) -> Result<JoinHandle<()>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    // A socket file left by a previous daemon blocks bind.
    if path.exists() {
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    let listener =
        UnixListener::bind(&path).with_context(|| format!("binding {}", path.display()))?;
    switch.arm_channel(ChannelKind::LocalNamedPipe);
    tracing::info!(path = %path.display(), "named pipe channel listening");

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_pipe_client(Arc::clone(&switch), stream));
                }
                Err(e) => {
                    switch.channel_lost(ChannelKind::LocalNamedPipe, e.to_string());
                    break;
                }
            }
        }
    }))
}

/// One command per line in; one `ok <state> <epoch>` or `fault <reason>` out.
async fn serve_pipe_client(switch: Arc<KillSwitch>, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match switch.submit(&line, ChannelKind::LocalNamedPipe) {
            Ok(_) => {
                let snap = switch.snapshot();
                format!("ok {} {}\n", snap.state, snap.epoch)
            }
            Err(fault) => format!("fault {}\n", fault),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

// ── Loopback HTTP ───────────────────────────────────────────────────

#[derive(Clone)]
struct HttpState {
    switch: Arc<KillSwitch>,
    inbox: RunInbox,
}

#[derive(Deserialize)]
struct ApproveBody {
    operator: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Deserialize)]
struct GrantBody {
    capability: String,
}

type Reply = (StatusCode, Json<Value>);

fn snapshot_json(switch: &KillSwitch) -> Value {
    let snap = switch.snapshot();
    json!({ "state": snap.state, "epoch": snap.epoch })
}

fn refuse_remote(peer: SocketAddr, what: &str) -> Option<Reply> {
    if peer.ip().is_loopback() {
        return None;
    }
    tracing::warn!(%peer, what, "request from non-loopback peer refused");
    Some((
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "loopback only" })),
    ))
}

/// Routes of the HTTP channel. Needs `ConnectInfo<SocketAddr>`.
pub fn http_router(switch: Arc<KillSwitch>, inbox: RunInbox) -> Router {
    Router::new()
        .route("/kill/{command}", post(kill))
        .route("/status", get(status))
        .route("/run/approve/{node}", post(approve))
        .route("/run/grant", post(grant))
        .with_state(HttpState { switch, inbox })
}

async fn kill(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    UrlPath(command): UrlPath<String>,
) -> Reply {
    if let Some(refused) = refuse_remote(peer, "kill") {
        return refused;
    }
    match state.switch.submit(&command, ChannelKind::LocalHttp) {
        Ok(_) => (StatusCode::OK, Json(snapshot_json(&state.switch))),
        Err(fault) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "fault": fault.to_string(), "state": state.switch.state() })),
        ),
    }
}

async fn status(State(state): State<HttpState>) -> Json<Value> {
    let mut body = snapshot_json(&state.switch);
    body["run_attached"] = json!(state.inbox.is_attached());
    Json(body)
}

fn deliver(inbox: &RunInbox, event: RunEvent) -> Reply {
    match inbox.send(event) {
        Delivery::Delivered => (StatusCode::ACCEPTED, Json(json!({ "delivered": true }))),
        Delivery::NoRun => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "no supervised run is waiting for events" })),
        ),
    }
}

async fn approve(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    UrlPath(node): UrlPath<String>,
    Json(body): Json<ApproveBody>,
) -> Reply {
    if let Some(refused) = refuse_remote(peer, "approve") {
        return refused;
    }
    if body.operator.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "approval needs an operator identity" })),
        );
    }
    tracing::info!(node = %node, operator = %body.operator, "approval received over http");
    deliver(
        &state.inbox,
        RunEvent::Approve {
            node: NodeId::new(node),
            operator: body.operator,
            note: body.note,
        },
    )
}

async fn grant(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<GrantBody>,
) -> Reply {
    if let Some(refused) = refuse_remote(peer, "grant") {
        return refused;
    }
    tracing::info!(capability = %body.capability, "grant received over http");
    deliver(&state.inbox, RunEvent::Grant(Capability::new(body.capability)))
}

pub async fn serve_http(
    switch: Arc<KillSwitch>,
    port: u16,
    inbox: RunInbox,
) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    switch.arm_channel(ChannelKind::LocalHttp);
    tracing::info!(%addr, "http channel listening");
    let app = http_router(Arc::clone(&switch), inbox);

    Ok(tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        let detail = match served {
            Ok(()) => "server exited".to_string(),
            Err(e) => e.to_string(),
        };
        switch.channel_lost(ChannelKind::LocalHttp, detail);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adr_audit::{ActionLog, EntryKind, SharedActionLog};
    use adr_graph::{validate, ActionSpec, EdgeSpec, GraphSpec, NodeType};
    use adr_killswitch::{KillSwitchConfig, KillSwitchState};
    use adr_policy::{Effect, PolicyConstraintSet, TrustTier};
    use adr_runtime::{NodeStatus, RunState};

    use crate::supervisor::{self, Supervised};
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn switch() -> Arc<KillSwitch> {
        KillSwitch::init(KillSwitchConfig::default())
    }

    async fn post_from(switch: &Arc<KillSwitch>, peer: [u8; 4], uri: &str) -> StatusCode {
        let app = http_router(Arc::clone(switch), RunInbox::new())
            .layer(MockConnectInfo(SocketAddr::from((peer, 40000))));
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn http_soft_stop_from_loopback() {
        let ks = switch();
        assert_eq!(post_from(&ks, [127, 0, 0, 1], "/kill/soft_stop").await, StatusCode::OK);
        assert_eq!(ks.state(), KillSwitchState::SoftStopping);
    }

    #[tokio::test]
    async fn http_refuses_non_loopback_peer() {
        let ks = switch();
        assert_eq!(
            post_from(&ks, [10, 0, 0, 7], "/kill/hard_stop").await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(ks.state(), KillSwitchState::Running);
    }

    #[tokio::test]
    async fn http_unknown_command_escalates() {
        let ks = switch();
        assert_eq!(
            post_from(&ks, [127, 0, 0, 1], "/kill/pause").await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ks.state(), KillSwitchState::HardStopped);
    }

    async fn post_json(
        switch: &Arc<KillSwitch>,
        inbox: &RunInbox,
        uri: &str,
        body: Value,
    ) -> StatusCode {
        let app = http_router(Arc::clone(switch), inbox.clone())
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn approval_without_a_run_is_a_conflict() {
        let ks = switch();
        let inbox = RunInbox::new();
        assert_eq!(
            post_json(&ks, &inbox, "/run/approve/write", json!({ "operator": "alice" })).await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            post_json(&ks, &inbox, "/run/approve/write", json!({ "operator": " " })).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn approval_posted_after_suspension_lets_the_node_run() {
        let policy = Arc::new(
            PolicyConstraintSet::from_yaml_str(
                "domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: human_required\n",
            )
            .unwrap(),
        );
        let spec = GraphSpec {
            version: 1,
            roots: vec!["intent".into()],
            nodes: vec![
                ActionSpec::new("intent", NodeType::Intent, TrustTier::AiAutonomous),
                ActionSpec::new("write", NodeType::Step, TrustTier::AiAutonomous)
                    .with_effects([Effect::new("fs_write")]),
            ],
            edges: vec![EdgeSpec::new("intent", "write")],
        };
        let graph = Arc::new(validate(spec, &policy).unwrap());
        let ks = KillSwitch::init(policy.kill_switch.clone());
        let log = SharedActionLog::new(ActionLog::in_memory());
        let inbox = RunInbox::new();

        let run = supervisor::spawn(
            Supervised {
                graph,
                policy: Arc::clone(&policy),
                switch: Arc::clone(&ks),
                log: log.clone(),
                semantic_score: 1.0,
                step: Duration::ZERO,
                grants: Vec::new(),
                approvals: Vec::new(),
                operator: None,
            },
            inbox.clone(),
        );

        let waiting = |log: &SharedActionLog| {
            log.entries()
                .unwrap()
                .iter()
                .any(|e| e.kind == EntryKind::AwaitingApproval && e.action == "write")
        };
        for _ in 0..200 {
            if waiting(&log) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(waiting(&log));
        assert!(inbox.is_attached());

        assert_eq!(
            post_json(
                &ks,
                &inbox,
                "/run/approve/write",
                json!({ "operator": "alice", "note": "checked the target" }),
            )
            .await,
            StatusCode::ACCEPTED
        );

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.status("write"), Some(&NodeStatus::Executed));
        assert!(!inbox.is_attached());
    }

    #[tokio::test]
    async fn named_pipe_applies_commands_line_by_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kill.sock");
        let ks = switch();
        let _listener = listen_named_pipe(Arc::clone(&ks), path.clone()).await.unwrap();
        assert!(ks.armed_channels().contains(&ChannelKind::LocalNamedPipe));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut replies = BufReader::new(read).lines();

        write.write_all(b"soft_stop\n").await.unwrap();
        let reply = replies.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "ok soft_stopping 1");

        write.write_all(b"freeze\n").await.unwrap();
        let reply = replies.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "ok emergency_frozen 2");
    }

    #[tokio::test]
    async fn gpio_assertion_issues_configured_command() {
        let dir = tempdir().unwrap();
        let line = dir.path().join("gpio17");
        std::fs::create_dir_all(&line).unwrap();
        std::fs::write(line.join("value"), "0\n").unwrap();

        let ks = switch();
        let _watch = watch_gpio(
            Arc::clone(&ks),
            dir.path(),
            17,
            false,
            KillCommand::HardStop,
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert!(ks.armed_channels().contains(&ChannelKind::HardwareGpio));
        assert_eq!(ks.state(), KillSwitchState::Running);

        std::fs::write(line.join("value"), "1\n").unwrap();
        for _ in 0..200 {
            if ks.state() != KillSwitchState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ks.state(), KillSwitchState::HardStopped);
    }

    #[tokio::test]
    async fn missing_gpio_line_fails_to_arm() {
        let dir = tempdir().unwrap();
        let ks = switch();
        let result = watch_gpio(
            Arc::clone(&ks),
            dir.path(),
            4,
            true,
            KillCommand::Freeze,
            Duration::from_millis(5),
        )
        .await;
        assert!(result.is_err());
        assert!(ks.armed_channels().is_empty());
    }
}
