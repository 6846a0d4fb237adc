// scenarios.rs — End-to-end runs through gate, executor, kill switch and log.
//
// Each test builds a small plan, runs it against a scripted handler, and
// checks both the run report and what landed in the action log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use adr_audit::{ActionLog, EntryKind, SharedActionLog};
use adr_graph::{validate, ActionSpec, EdgeSpec, GraphSpec, NodeId, NodeType, ValidatedGraph, ValidatedNode};
use adr_killswitch::{
    CancelToken, ChannelKind, KillCommand, KillSwitch, KillSwitchConfig, KillSwitchFault,
    KillSwitchState,
};
use adr_policy::{Capability, CapabilityStore, Effect, ExecClass, PolicyConstraintSet, TrustTier};
use adr_runtime::{
    forward_kill_switch, ActionHandler, FixedScore, HandlerError, NodeStatus, Run, RunEvent,
    RunParts, RunState, RuntimeError,
};
use tempfile::tempdir;

type Hook = Box<dyn Fn(&ValidatedNode, &CancelToken) -> Result<(), HandlerError> + Send + Sync>;

/// Records every call; runs a per-node hook when one is registered.
#[derive(Default)]
struct Scripted {
    calls: Mutex<Vec<String>>,
    hooks: BTreeMap<String, Hook>,
}

impl Scripted {
    fn on(mut self, node: &str, hook: Hook) -> Self {
        self.hooks.insert(node.to_string(), hook);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ActionHandler for Scripted {
    fn execute(&self, node: &ValidatedNode, token: &CancelToken) -> Result<(), HandlerError> {
        self.calls.lock().unwrap().push(format!("exec:{}", node.id));
        match self.hooks.get(node.id.as_str()) {
            Some(hook) => hook(node, token),
            None => Ok(()),
        }
    }

    fn compensate(
        &self,
        node: &ValidatedNode,
        compensation: &str,
        _token: &CancelToken,
    ) -> Result<(), HandlerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("comp:{}:{}", node.id, compensation));
        Ok(())
    }
}

/// intent → write → publish, with `write` touching /data/out.
fn pipeline_spec() -> GraphSpec {
    GraphSpec {
        version: 1,
        roots: vec!["intent".into()],
        nodes: vec![
            ActionSpec::new("intent", NodeType::Intent, TrustTier::AiAutonomous),
            ActionSpec::new("write", NodeType::Step, TrustTier::AiAutonomous)
                .with_effects([Effect::new("fs_write")])
                .with_capabilities([Capability::fs("/data/out")])
                .with_compensation("delete_output"),
            ActionSpec::new("publish", NodeType::Step, TrustTier::AiAutonomous),
        ],
        edges: vec![EdgeSpec::new("intent", "write"), EdgeSpec::new("write", "publish")],
    }
}

fn policy(yaml: &str) -> Arc<PolicyConstraintSet> {
    Arc::new(PolicyConstraintSet::from_yaml_str(yaml).unwrap())
}

struct Harness {
    switch: Arc<KillSwitch>,
    log: SharedActionLog,
    graph: Arc<ValidatedGraph>,
    policy: Arc<PolicyConstraintSet>,
}

impl Harness {
    fn new(spec: GraphSpec, policy: Arc<PolicyConstraintSet>) -> Self {
        let graph = Arc::new(validate(spec, &policy).unwrap());
        Self {
            switch: KillSwitch::init(policy.kill_switch.clone()),
            log: SharedActionLog::new(ActionLog::in_memory()),
            graph,
            policy,
        }
    }

    fn run(&self, handler: Arc<dyn ActionHandler>, score: f64) -> Run {
        Run::start(RunParts {
            graph: Arc::clone(&self.graph),
            policy: Arc::clone(&self.policy),
            switch: Arc::clone(&self.switch),
            log: self.log.clone(),
            handler,
            scorer: Arc::new(FixedScore(score)),
        })
        .unwrap()
    }

    fn kinds_for(&self, action: &str) -> Vec<EntryKind> {
        self.log
            .entries()
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.kind)
            .collect()
    }
}

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

// ── Scenario A ──────────────────────────────────────────────────────

#[test]
fn missing_capability_blocks_until_granted() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));

    let mut store = CapabilityStore::new();
    let write = h.graph.node(&id("write")).unwrap();
    assert!(store.check(write, "ctx").is_err());
    store.grant("ctx", Capability::fs("/data/out")).unwrap();
    assert!(store.check(write, "ctx").is_ok());

    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 1.0);
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Suspended);
    assert!(matches!(report.status("write"), Some(NodeStatus::Blocked { .. })));
    assert_eq!(report.status("publish"), Some(&NodeStatus::Pending));
    assert_eq!(h.kinds_for("write"), vec![EntryKind::Blocked]);

    // Nothing changed, so nothing is re-evaluated.
    run.execute().unwrap();
    assert_eq!(h.kinds_for("write"), vec![EntryKind::Blocked]);

    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(handler.calls(), vec!["exec:intent", "exec:write", "exec:publish"]);
    assert_eq!(h.kinds_for("write"), vec![EntryKind::Blocked, EntryKind::Executed]);
    h.log.verify_chain().unwrap();
}

// ── Scenario B ──────────────────────────────────────────────────────

#[test]
fn policy_override_requires_approval() {
    let h = Harness::new(
        pipeline_spec(),
        policy(
            r#"
domain: test
trust_overrides:
  - match: fs_write
    set_tier: human_required
"#,
        ),
    );
    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();

    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Suspended);
    assert_eq!(report.status("write"), Some(&NodeStatus::AwaitingApproval));

    let pending = h
        .log
        .entries()
        .unwrap()
        .into_iter()
        .find(|e| e.kind == EntryKind::AwaitingApproval)
        .unwrap();
    let trust = pending.trust.unwrap();
    assert_eq!(trust.declared, "ai_autonomous");
    assert_eq!(trust.effective, "human_required");
    assert_eq!(trust.approved_by, None);

    run.approve(&id("write"), "alice", None).unwrap();
    let report = run.execute().unwrap();
    // `publish` inherits fs_write from `write`, so the same rule gates it.
    assert_eq!(report.state, RunState::Suspended);
    assert_eq!(report.status("write"), Some(&NodeStatus::Executed));
    assert_eq!(report.status("publish"), Some(&NodeStatus::AwaitingApproval));

    run.approve(&id("publish"), "alice", None).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Completed);

    let executed = h
        .log
        .entries()
        .unwrap()
        .into_iter()
        .find(|e| e.kind == EntryKind::Executed && e.action == "write")
        .unwrap();
    assert_eq!(executed.trust.unwrap().approved_by.as_deref(), Some("alice"));
}

#[test]
fn anonymous_approval_is_rejected() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    assert!(matches!(
        run.approve(&id("write"), "", None),
        Err(RuntimeError::Policy(_))
    ));
    assert!(matches!(
        run.approve(&id("ghost"), "alice", None),
        Err(RuntimeError::UnknownNode(_))
    ));
}

// ── Scenario C ──────────────────────────────────────────────────────

#[test]
fn low_semantic_confidence_blocks_and_is_logged() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 0.42);
    run.grant(Capability::fs("/data/out")).unwrap();

    let report = run.execute().unwrap();
    assert!(matches!(report.status("intent"), Some(NodeStatus::Blocked { .. })));
    assert!(handler.calls().is_empty());

    let blocked = h
        .log
        .entries()
        .unwrap()
        .into_iter()
        .find(|e| e.kind == EntryKind::Blocked)
        .unwrap();
    let decision = blocked.decision.unwrap();
    assert_eq!(decision.confidence_safety, 1.0);
    assert_eq!(decision.confidence_semantic, 0.42);
    assert_eq!(decision.threshold, 0.8);
}

// ── Scenario D ──────────────────────────────────────────────────────

#[test]
fn hard_stop_aborts_in_flight_node_and_revokes_grants() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let handler = Arc::new(Scripted::default().on(
        "write",
        Box::new(move |_: &ValidatedNode, token: &CancelToken| {
            let _ = started_tx.lock().unwrap().send(());
            token.sleep(Duration::from_secs(30))?;
            Ok(())
        }),
    ));
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let context = run.context().to_string();

    let switch = Arc::clone(&h.switch);
    let stopper = thread::spawn(move || {
        started_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        let at = Instant::now();
        switch.request(KillCommand::HardStop, "operator");
        at
    });

    let report = run.execute().unwrap();
    let stopped_at = stopper.join().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_millis(h.switch.config().cancellation_bound_ms));

    assert_eq!(report.state, RunState::Aborted);
    assert!(matches!(report.status("write"), Some(NodeStatus::Aborted { .. })));
    assert_eq!(report.status("publish"), Some(&NodeStatus::Pending));
    assert_eq!(report.revoked, 1);
    assert_eq!(run.capabilities().granted(&context).count(), 0);
    assert!(!handler.calls().contains(&"exec:publish".to_string()));
    // Stopped inside the bound: no fault escalation on top of the stop.
    assert!(h
        .switch
        .history()
        .iter()
        .all(|t| !matches!(t.cause, adr_killswitch::TransitionCause::Fault(_))));

    assert_eq!(h.kinds_for("write"), vec![EntryKind::Executed, EntryKind::Aborted]);
    assert!(h.kinds_for("revoke_all").contains(&EntryKind::KillSwitch));
    h.log.verify_chain().unwrap();

    // Terminal: executing again does nothing.
    assert_eq!(run.execute().unwrap().state, RunState::Aborted);
}

#[test]
fn ignoring_the_token_past_the_bound_is_a_fault() {
    let mut policy = PolicyConstraintSet::default();
    policy.kill_switch.cancellation_bound_ms = 10;
    let h = Harness::new(pipeline_spec(), Arc::new(policy.sealed()));
    let switch = Arc::clone(&h.switch);
    let handler = Arc::new(Scripted::default().on(
        "intent",
        Box::new(move |_: &ValidatedNode, _: &CancelToken| {
            switch.request(KillCommand::HardStop, "operator");
            // Does not look at the token.
            thread::sleep(Duration::from_millis(60));
            Ok(())
        }),
    ));
    let mut run = h.run(handler, 1.0);
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(
        h.kinds_for("intent"),
        vec![EntryKind::Executed, EntryKind::KillSwitch]
    );
    let overrun = h
        .log
        .entries()
        .unwrap()
        .into_iter()
        .find(|e| e.action == "intent" && e.kind == EntryKind::KillSwitch)
        .unwrap();
    assert!(overrun.why.summary.contains("ignored cancellation"));
}

// ── Scenario E (through the runtime crate) ──────────────────────────

#[test]
fn self_modification_needs_approval_to_deploy() {
    use adr_runtime::{PatchContent, ReleaseRegistry, SelfModError, SelfModPipeline};

    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let registry = Arc::new(ReleaseRegistry::new(Arc::clone(&h.graph)));
    let mut pipeline = SelfModPipeline::new(
        Arc::clone(&h.policy),
        Arc::clone(&h.switch),
        h.log.clone(),
        Arc::clone(&registry),
    );
    let mut next = pipeline_spec();
    next.version = 2;
    let patch = pipeline
        .propose("v2", "planner", PatchContent::Graph(next), TrustTier::AiAutonomous)
        .unwrap();
    pipeline.check(patch).unwrap();
    pipeline.submit_for_approval(patch).unwrap();
    assert!(matches!(
        pipeline.deploy(patch),
        Err(SelfModError::ApprovalRequired { .. })
    ));
    assert_eq!(registry.active_graph().version(), 1);
}

// ── Kill switch between nodes ───────────────────────────────────────

#[test]
fn stop_between_nodes_prevents_the_next_one() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let switch = Arc::clone(&h.switch);
    let handler = Arc::new(Scripted::default().on(
        "intent",
        Box::new(move |_: &ValidatedNode, _: &CancelToken| {
            switch.request(KillCommand::HardStop, "between nodes");
            Ok(())
        }),
    ));
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.status("intent"), Some(&NodeStatus::Executed));
    assert_eq!(handler.calls(), vec!["exec:intent"]);
}

#[test]
fn soft_stop_compensates_then_terminates() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let switch = Arc::clone(&h.switch);
    let handler = Arc::new(Scripted::default().on(
        "write",
        Box::new(move |_: &ValidatedNode, _: &CancelToken| {
            switch.request(KillCommand::SoftStop, "drain");
            Ok(())
        }),
    ));
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();

    assert_eq!(report.state, RunState::SoftStopped);
    assert_eq!(report.status("write"), Some(&NodeStatus::Compensated));
    assert_eq!(report.status("publish"), Some(&NodeStatus::Pending));
    assert_eq!(report.executed, vec![id("intent")]);
    assert_eq!(report.compensated, vec![id("write")]);
    assert_eq!(
        handler.calls(),
        vec!["exec:intent", "exec:write", "comp:write:delete_output"]
    );
    assert_eq!(
        h.kinds_for("write"),
        vec![EntryKind::Executed, EntryKind::Compensated]
    );
    // Soft stop does not revoke grants.
    assert_eq!(report.revoked, 0);
}

#[test]
fn soft_stop_resumes_when_cleared_within_grace() {
    let mut policy = PolicyConstraintSet::default();
    policy.kill_switch.soft_stop_grace_ms = 5_000;
    let h = Harness::new(pipeline_spec(), Arc::new(policy.sealed()));

    let once = AtomicBool::new(false);
    let switch = Arc::clone(&h.switch);
    let handler = Arc::new(Scripted::default().on(
        "write",
        Box::new(move |_: &ValidatedNode, _: &CancelToken| {
            if !once.swap(true, Ordering::SeqCst) {
                switch.request(KillCommand::SoftStop, "drain");
            }
            Ok(())
        }),
    ));

    let switch = Arc::clone(&h.switch);
    let resumer = thread::spawn(move || {
        let snap = switch.wait_for_change(0, Duration::from_secs(5));
        assert_eq!(snap.state, KillSwitchState::SoftStopping);
        thread::sleep(Duration::from_millis(20));
        switch.request(KillCommand::Resume, "cleared");
    });

    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();
    resumer.join().unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        handler.calls(),
        vec![
            "exec:intent",
            "exec:write",
            "comp:write:delete_output",
            "exec:write",
            "exec:publish"
        ]
    );
}

// ── Freeze triggers ─────────────────────────────────────────────────

#[test]
fn contract_failure_freezes_and_revokes() {
    let h = Harness::new(
        pipeline_spec(),
        policy("domain: test\nfreeze_triggers: [contract_failure]\n"),
    );
    let handler = Arc::new(Scripted::default().on(
        "write",
        Box::new(|_: &ValidatedNode, _: &CancelToken| {
            Err(HandlerError::Contract("output checksum mismatch".into()))
        }),
    ));
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();

    assert_eq!(h.switch.state(), KillSwitchState::EmergencyFrozen);
    assert_eq!(report.state, RunState::Frozen);
    assert!(matches!(report.status("write"), Some(NodeStatus::Failed { .. })));
    assert_eq!(report.revoked, 1);
    assert!(matches!(
        run.grant(Capability::fs("/data/out")),
        Err(RuntimeError::Operator(_))
    ));
}

#[test]
fn unverified_capability_use_freezes_when_listed() {
    let h = Harness::new(
        pipeline_spec(),
        policy("domain: test\nfreeze_triggers: [unverified_capability_use]\n"),
    );
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Frozen);
    assert_eq!(report.status("intent"), Some(&NodeStatus::Executed));
    assert!(matches!(report.status("write"), Some(NodeStatus::Blocked { .. })));
}

#[test]
fn runtime_downgrade_is_refused_and_freezes_when_listed() {
    let h = Harness::new(
        pipeline_spec(),
        policy("domain: test\nfreeze_triggers: [trust_tier_downgrade_attempt]\n"),
    );
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    assert_eq!(
        run.override_tier(&id("write"), TrustTier::HumanRequired).unwrap(),
        TrustTier::HumanRequired
    );
    assert!(matches!(
        run.override_tier(&id("write"), TrustTier::AiAutonomous),
        Err(RuntimeError::PolicyViolation(_))
    ));
    assert_eq!(h.switch.state(), KillSwitchState::EmergencyFrozen);
}

#[test]
fn downgrade_of_a_locked_tier_freezes_without_the_trigger() {
    let h = Harness::new(
        pipeline_spec(),
        policy(
            r#"
domain: test
trust_overrides:
  - match: { node_type: step, exec_class: synchronous }
    set_tier: ai_proposed
    downgrade_forbidden: true
"#,
        ),
    );
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    assert!(matches!(
        run.override_tier(&id("write"), TrustTier::AiAutonomous),
        Err(RuntimeError::PolicyViolation(_))
    ));
    assert_eq!(h.switch.state(), KillSwitchState::EmergencyFrozen);
}

#[test]
fn immutable_rule_refuses_even_a_raise() {
    let h = Harness::new(
        pipeline_spec(),
        policy(
            r#"
domain: test
trust_overrides:
  - match: fs_write
    set_tier: ai_proposed
    immutable: true
"#,
        ),
    );
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    assert!(matches!(
        run.override_tier(&id("write"), TrustTier::HumanRequired),
        Err(RuntimeError::PolicyViolation(_))
    ));
    // Refusing a raise is not a downgrade attempt.
    assert_eq!(h.switch.state(), KillSwitchState::Running);
    assert_eq!(h.kinds_for("override_tier"), vec![EntryKind::Blocked]);
}

// ── Checkpoints ─────────────────────────────────────────────────────

/// intent → write → audit, where `audit` is a checkpoint declared autonomous.
fn checkpoint_spec() -> GraphSpec {
    let mut spec = pipeline_spec();
    spec.nodes[2] = ActionSpec::new("audit", NodeType::Checkpoint, TrustTier::AiAutonomous);
    spec.edges[1] = EdgeSpec::new("write", "audit");
    spec
}

#[test]
fn checkpoint_never_runs_without_an_approval_record() {
    let h = Harness::new(checkpoint_spec(), Arc::new(PolicyConstraintSet::default()));
    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();

    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Suspended);
    assert_eq!(report.status("audit"), Some(&NodeStatus::AwaitingApproval));
    assert_eq!(handler.calls(), vec!["exec:intent", "exec:write"]);

    let pending = h
        .log
        .entries()
        .unwrap()
        .into_iter()
        .find(|e| e.kind == EntryKind::AwaitingApproval && e.action == "audit")
        .unwrap();
    let trust = pending.trust.unwrap();
    assert_eq!(trust.declared, "ai_autonomous");
    assert_eq!(trust.effective, "human_required");

    run.approve(&id("audit"), "carol", None).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(handler.calls().last().map(String::as_str), Some("exec:audit"));
}

#[test]
fn checkpoint_tier_cannot_be_lowered_by_policy_or_operator() {
    let h = Harness::new(
        checkpoint_spec(),
        policy(
            r#"
domain: test
trust_overrides:
  - match: { node_type: checkpoint }
    set_tier: ai_autonomous
"#,
        ),
    );
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    run.grant(Capability::fs("/data/out")).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.status("audit"), Some(&NodeStatus::AwaitingApproval));

    assert!(matches!(
        run.override_tier(&id("audit"), TrustTier::AiProposed),
        Err(RuntimeError::PolicyViolation(_))
    ));
    assert_eq!(h.switch.state(), KillSwitchState::EmergencyFrozen);
}

// ── Run setup ───────────────────────────────────────────────────────

#[test]
fn graph_from_another_policy_is_refused() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let other = policy("domain: other\n");
    let result = Run::start(RunParts {
        graph: Arc::clone(&h.graph),
        policy: other,
        switch: Arc::clone(&h.switch),
        log: h.log.clone(),
        handler: Arc::new(Scripted::default()),
        scorer: Arc::new(FixedScore(1.0)),
    });
    assert!(matches!(result, Err(RuntimeError::StalePolicy { .. })));
}

#[test]
fn physical_channel_must_be_armed() {
    let p = policy(
        r#"
domain: plant
kill_switch:
  require_physical_channel: true
  channels:
    - kind: hardware_gpio
      pin: 17
"#,
    );
    let h = Harness::new(pipeline_spec(), Arc::clone(&p));
    let parts = || RunParts {
        graph: Arc::clone(&h.graph),
        policy: Arc::clone(&p),
        switch: Arc::clone(&h.switch),
        log: h.log.clone(),
        handler: Arc::new(Scripted::default()),
        scorer: Arc::new(FixedScore(1.0)),
    };
    assert!(matches!(
        Run::start(parts()),
        Err(RuntimeError::KillSwitch(KillSwitchFault::PhysicalChannelMissing))
    ));
    assert_eq!(h.switch.state(), KillSwitchState::HardStopped);

    let fresh = KillSwitch::init(p.kill_switch.clone());
    fresh.arm_channel(ChannelKind::HardwareGpio);
    let run = Run::start(RunParts {
        switch: fresh,
        ..parts()
    });
    assert!(run.is_ok());
}

// ── Concurrency and events ──────────────────────────────────────────

#[test]
fn independent_nodes_run_in_one_wave_and_chain_stays_valid() {
    let spec = GraphSpec {
        version: 1,
        roots: vec!["intent".into()],
        nodes: vec![
            ActionSpec::new("intent", NodeType::Intent, TrustTier::AiAutonomous),
            ActionSpec::new("a", NodeType::Step, TrustTier::AiAutonomous)
                .with_exec_class(ExecClass::Isolated),
            ActionSpec::new("b", NodeType::Step, TrustTier::AiAutonomous)
                .with_exec_class(ExecClass::Isolated),
            ActionSpec::new("join", NodeType::Step, TrustTier::AiAutonomous),
        ],
        edges: vec![
            EdgeSpec::new("intent", "a"),
            EdgeSpec::new("intent", "b"),
            EdgeSpec::new("a", "join"),
            EdgeSpec::new("b", "join"),
        ],
    };
    let dir = tempdir().unwrap();
    let path = dir.path().join("actions.jsonl");
    let policy = Arc::new(PolicyConstraintSet::default());
    let graph = Arc::new(validate(spec, &policy).unwrap());
    let log = SharedActionLog::new(ActionLog::open(&path).unwrap());
    let handler = Arc::new(Scripted::default());
    let mut run = Run::start(RunParts {
        graph,
        policy: Arc::clone(&policy),
        switch: KillSwitch::init(KillSwitchConfig::default()),
        log: log.clone(),
        handler: handler.clone(),
        scorer: Arc::new(FixedScore(0.9)),
    })
    .unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.executed.first(), Some(&id("intent")));
    assert_eq!(report.executed.last(), Some(&id("join")));
    assert_eq!(handler.calls().len(), 4);

    log.flush().unwrap();
    assert_eq!(ActionLog::verify_file(&path).unwrap(), 4);
}

#[test]
fn drive_waits_for_approval_event() {
    let h = Harness::new(
        pipeline_spec(),
        policy("domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: ai_proposed\n"),
    );
    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 1.0);
    let (tx, rx) = mpsc::channel();
    tx.send(RunEvent::Grant(Capability::fs("/data/out"))).unwrap();
    tx.send(RunEvent::Approve {
        node: id("write"),
        operator: "alice".into(),
        note: Some("looks fine".into()),
    })
    .unwrap();
    tx.send(RunEvent::Approve {
        node: id("publish"),
        operator: "alice".into(),
        note: None,
    })
    .unwrap();
    let report = run.drive(&rx).unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(run.approvals().get("write").unwrap().operator, "alice");
}

#[test]
fn forwarded_hard_stop_ends_a_suspended_run() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let mut run = h.run(Arc::new(Scripted::default()), 1.0);
    let (tx, rx) = mpsc::channel();
    let _forwarder = forward_kill_switch(&h.switch, tx);

    let switch = Arc::clone(&h.switch);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        switch.submit("hard_stop", ChannelKind::LocalNamedPipe).unwrap();
    });
    // `write` lacks its grant, so the run suspends until the stop arrives.
    let report = run.drive(&rx).unwrap();
    stopper.join().unwrap();
    assert_eq!(report.state, RunState::Aborted);
}

#[test]
fn replacing_the_graph_keeps_executed_nodes() {
    let h = Harness::new(pipeline_spec(), Arc::new(PolicyConstraintSet::default()));
    let handler = Arc::new(Scripted::default());
    let mut run = h.run(handler.clone(), 1.0);
    run.execute().unwrap();
    assert_eq!(run.status(&id("intent")), Some(&NodeStatus::Executed));

    let mut next = pipeline_spec();
    next.version = 2;
    next.nodes[1] = ActionSpec::new("write", NodeType::Step, TrustTier::AiAutonomous)
        .with_effects([Effect::new("fs_write")])
        .with_compensation("delete_output");
    let next = Arc::new(validate(next, &h.policy).unwrap());
    run.apply(RunEvent::ReplaceGraph(next)).unwrap();
    let report = run.execute().unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        handler.calls(),
        vec!["exec:intent", "exec:write", "exec:publish"]
    );
}
