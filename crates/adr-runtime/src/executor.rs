// executor.rs — Drives one run of a validated graph.
//
// A run owns everything that is per-run: the capability context, the
// approval set, the tier enforcer and node statuses. It shares only the kill
// switch and the action log.
//
// Execution proceeds in waves. Each pass collects the nodes whose
// dependencies have all executed, asks the gate about each one in
// topological order, then runs the approved ones concurrently on scoped
// threads (`synchronous` nodes inline). The kill switch is read again inside
// each worker right before the handler is called, and a verdict from an
// older epoch is never acted on.
//
// Blocked and pending nodes are not retried on their own. They are
// re-evaluated after an event: approval, grant, tier override, graph
// replacement or kill-switch transition. Each event bumps `event_seq`; a
// node is a candidate again only if it was last evaluated before the
// current sequence number.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use adr_audit::{AuditError, EntryDraft, EntryKind, Justification, SharedActionLog};
use adr_graph::{NodeId, ValidatedGraph, ValidatedNode};
use adr_killswitch::{
    Cancelled, CancelToken, KillSwitch, KillSwitchError, KillSwitchFault, KillSwitchState,
    KillSwitchTransition,
};
use adr_policy::{
    ApprovalSet, Capability, CapabilityStore, ExecClass, FreezeTrigger, PolicyConstraintSet,
    TierLock, TrustTier, TrustTierEnforcer,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::gate::{Decision, DecisionGate, ExecutionDecision, GateContext, SemanticScorer};

/// Errors a handler can report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The node stopped at a cancellation point.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// A pre- or post-condition of the node's contract did not hold.
    #[error("contract failure: {0}")]
    Contract(String),

    #[error("{0}")]
    Failed(String),
}

/// Performs the real-world effects of nodes.
pub trait ActionHandler: Send + Sync {
    /// Run the node. Long-running work must call `token.check()` (or sleep
    /// through `token.sleep`) often enough to honour the cancellation bound.
    fn execute(&self, node: &ValidatedNode, token: &CancelToken) -> Result<(), HandlerError>;

    /// Run the node's declared compensation after a soft stop.
    fn compensate(
        &self,
        node: &ValidatedNode,
        compensation: &str,
        token: &CancelToken,
    ) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    AwaitingApproval,
    Blocked { reason: String },
    Executed,
    /// Executed, then rolled back by its compensation during a soft stop.
    /// Runs again if the run resumes.
    Compensated,
    Failed { reason: String },
    Aborted { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Active,
    /// Nothing can progress until an event arrives.
    Suspended,
    Completed,
    SoftStopped,
    Aborted,
    Frozen,
    /// The action log refused an append.
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Active | RunState::Suspended)
    }
}

/// Snapshot of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub statuses: BTreeMap<NodeId, NodeStatus>,
    /// Nodes in the order they finished executing. A node rolled back by
    /// its compensation moves to `compensated`.
    pub executed: Vec<NodeId>,
    pub compensated: Vec<NodeId>,
    /// Grants revoked by a hard stop or freeze.
    pub revoked: usize,
}

impl RunReport {
    pub fn status(&self, id: &str) -> Option<&NodeStatus> {
        self.statuses.get(&NodeId::from(id))
    }
}

/// External events a suspended run reacts to.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Approve {
        node: NodeId,
        operator: String,
        note: Option<String>,
    },
    Grant(Capability),
    OverrideTier {
        node: NodeId,
        tier: TrustTier,
    },
    ReplaceGraph(Arc<ValidatedGraph>),
    KillSwitch(KillSwitchTransition),
}

/// Forward every kill-switch transition into a run's event channel.
pub fn forward_kill_switch(switch: &KillSwitch, events: Sender<RunEvent>) -> thread::JoinHandle<()> {
    let transitions = switch.subscribe();
    thread::spawn(move || {
        for t in transitions {
            if events.send(RunEvent::KillSwitch(t)).is_err() {
                break;
            }
        }
    })
}

/// What a run is built from.
pub struct RunParts {
    pub graph: Arc<ValidatedGraph>,
    pub policy: Arc<PolicyConstraintSet>,
    pub switch: Arc<KillSwitch>,
    pub log: SharedActionLog,
    pub handler: Arc<dyn ActionHandler>,
    pub scorer: Arc<dyn SemanticScorer>,
}

#[derive(Debug, Clone)]
struct NodeSlot {
    status: NodeStatus,
    evaluated_at: Option<u64>,
}

impl NodeSlot {
    fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            evaluated_at: None,
        }
    }
}

enum NodeOutcome {
    NotStarted { reason: String },
    Completed { soft_stopped: bool },
    Failed { reason: String, contract: bool },
    Aborted { reason: String },
    AuditRefused(AuditError),
}

pub struct Run {
    id: Uuid,
    context: String,
    policy: Arc<PolicyConstraintSet>,
    graph: Arc<ValidatedGraph>,
    capabilities: CapabilityStore,
    approvals: ApprovalSet,
    enforcer: TrustTierEnforcer,
    gate: DecisionGate,
    switch: Arc<KillSwitch>,
    log: SharedActionLog,
    handler: Arc<dyn ActionHandler>,
    slots: BTreeMap<NodeId, NodeSlot>,
    event_seq: u64,
    executed: Vec<NodeId>,
    compensated: Vec<NodeId>,
    state: RunState,
    logged_epoch: u64,
    revoked: usize,
}

impl Run {
    /// Set up a run. Refuses a graph validated against another policy and
    /// enforces the physical kill-switch channel mandate.
    pub fn start(parts: RunParts) -> Result<Self, RuntimeError> {
        let RunParts {
            graph,
            policy,
            switch,
            log,
            handler,
            scorer,
        } = parts;
        if !graph.is_valid_for(&policy) {
            return Err(RuntimeError::StalePolicy {
                graph_policy: graph.policy_hash().to_string(),
                active_policy: policy.policy_hash().to_string(),
            });
        }
        switch.verify_channels()?;

        let id = Uuid::new_v4();
        let slots = graph
            .nodes()
            .map(|n| (n.id.clone(), NodeSlot::pending()))
            .collect();
        tracing::info!(run_id = %id, graph_version = graph.version(), nodes = graph.len(), "run started");
        Ok(Self {
            id,
            context: format!("run-{}", id),
            gate: DecisionGate::new(&policy, scorer),
            enforcer: TrustTierEnforcer::new(Arc::clone(&policy)),
            policy,
            graph,
            capabilities: CapabilityStore::new(),
            approvals: ApprovalSet::new(),
            logged_epoch: switch.epoch(),
            switch,
            log,
            handler,
            slots,
            event_seq: 0,
            executed: Vec::new(),
            compensated: Vec::new(),
            state: RunState::Active,
            revoked: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The capability context of this run.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn graph(&self) -> &Arc<ValidatedGraph> {
        &self.graph
    }

    pub fn capabilities(&self) -> &CapabilityStore {
        &self.capabilities
    }

    pub fn approvals(&self) -> &ApprovalSet {
        &self.approvals
    }

    pub fn status(&self, id: &NodeId) -> Option<&NodeStatus> {
        self.slots.get(id).map(|s| &s.status)
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.id,
            state: self.state,
            statuses: self
                .slots
                .iter()
                .map(|(id, slot)| (id.clone(), slot.status.clone()))
                .collect(),
            executed: self.executed.clone(),
            compensated: self.compensated.clone(),
            revoked: self.revoked,
        }
    }

    fn require_node(&self, id: &NodeId) -> Result<&ValidatedNode, RuntimeError> {
        self.graph
            .node(id)
            .ok_or_else(|| RuntimeError::UnknownNode(id.to_string()))
    }

    fn operator_draft(&self, action: &str, why: Justification) -> EntryDraft {
        EntryDraft::new(EntryKind::Operator, action)
            .with_run(self.id)
            .with_why(why)
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Record an approval for a node in this run.
    pub fn approve(
        &mut self,
        node: &NodeId,
        operator: &str,
        note: Option<String>,
    ) -> Result<(), RuntimeError> {
        let intent = self.require_node(node)?.root.to_string();
        self.approvals.approve(node.as_str(), operator, note)?;
        self.log.append(
            self.operator_draft("approve", Justification::new(format!("{} approved by {}", node, operator)))
                .with_intent(intent),
        )?;
        self.event_seq += 1;
        Ok(())
    }

    /// Grant a capability to this run's context. Refused while the kill
    /// switch is hard-stopped or frozen.
    pub fn grant(&mut self, capability: Capability) -> Result<bool, RuntimeError> {
        let state = self.switch.state();
        if state.aborts_in_flight() {
            return Err(KillSwitchError::InvalidOperatorAction {
                action: "grant",
                state,
            }
            .into());
        }
        let added = self.capabilities.grant(&self.context, capability.clone())?;
        if added {
            self.log.append(self.operator_draft(
                "grant",
                Justification::new(format!("{} granted to {}", capability, self.context)),
            ))?;
            self.event_seq += 1;
        }
        Ok(added)
    }

    /// Raise a node's tier. A downgrade is refused, logged, and fires the
    /// downgrade freeze trigger when the policy lists it or a rule locks the
    /// node's tier. Checkpoints and immutable tiers refuse any change.
    pub fn override_tier(&mut self, node: &NodeId, tier: TrustTier) -> Result<TrustTier, RuntimeError> {
        let graph = Arc::clone(&self.graph);
        let target = graph
            .node(node)
            .ok_or_else(|| RuntimeError::UnknownNode(node.to_string()))?;
        match self.enforcer.apply_runtime_override(target, tier) {
            Ok(applied) => {
                self.log.append(self.operator_draft(
                    "override_tier",
                    Justification::new(format!("{} raised to {}", node, applied)),
                ))?;
                self.event_seq += 1;
                Ok(applied)
            }
            Err(violation) => {
                self.log.append(
                    EntryDraft::new(EntryKind::Blocked, "override_tier")
                        .with_run(self.id)
                        .with_intent(target.root.as_str())
                        .with_why(Justification::new(violation.to_string())),
                )?;
                let locked = self.enforcer.tier_lock(target) != TierLock::Open;
                if violation.is_downgrade()
                    && (locked
                        || self
                            .policy
                            .has_freeze_trigger(FreezeTrigger::TrustTierDowngradeAttempt))
                {
                    self.switch
                        .freeze(FreezeTrigger::TrustTierDowngradeAttempt, violation.to_string());
                }
                Err(violation.into())
            }
        }
    }

    /// Swap in a newly compiled graph. Executed nodes that still exist keep
    /// their status; everything else starts over as pending.
    pub fn replace_graph(&mut self, graph: Arc<ValidatedGraph>) -> Result<(), RuntimeError> {
        if !graph.is_valid_for(&self.policy) {
            return Err(RuntimeError::StalePolicy {
                graph_policy: graph.policy_hash().to_string(),
                active_policy: self.policy.policy_hash().to_string(),
            });
        }
        let slots = graph
            .nodes()
            .map(|n| {
                let slot = match self.slots.get(&n.id) {
                    Some(s) if s.status == NodeStatus::Executed => s.clone(),
                    _ => NodeSlot::pending(),
                };
                (n.id.clone(), slot)
            })
            .collect();
        self.log.append(self.operator_draft(
            "replace_graph",
            Justification::new(format!(
                "graph v{} -> v{} ({})",
                self.graph.version(),
                graph.version(),
                graph.graph_hash()
            )),
        ))?;
        self.slots = slots;
        self.graph = graph;
        self.event_seq += 1;
        Ok(())
    }

    pub fn apply(&mut self, event: RunEvent) -> Result<(), RuntimeError> {
        match event {
            RunEvent::Approve {
                node,
                operator,
                note,
            } => self.approve(&node, &operator, note),
            RunEvent::Grant(capability) => self.grant(capability).map(|_| ()),
            RunEvent::OverrideTier { node, tier } => self.override_tier(&node, tier).map(|_| ()),
            RunEvent::ReplaceGraph(graph) => self.replace_graph(graph),
            // Picked up by `log_switch_transitions` on the next pass.
            RunEvent::KillSwitch(_) => Ok(()),
        }
    }

    /// Execute, and while suspended block on `events` until the run reaches
    /// a terminal state or the channel closes.
    pub fn drive(&mut self, events: &Receiver<RunEvent>) -> Result<RunReport, RuntimeError> {
        loop {
            let report = self.execute()?;
            if report.state != RunState::Suspended {
                return Ok(report);
            }
            match events.recv() {
                Ok(event) => {
                    if let Err(e) = self.apply(event) {
                        tracing::warn!(run_id = %self.id, error = %e, "run event rejected");
                    }
                }
                Err(_) => return Ok(report),
            }
        }
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Make as much progress as possible without new events.
    pub fn execute(&mut self) -> Result<RunReport, RuntimeError> {
        if self.state.is_terminal() {
            return Ok(self.report());
        }
        self.state = RunState::Active;
        loop {
            self.log.maybe_anchor()?;
            self.log_switch_transitions()?;

            match self.switch.state() {
                KillSwitchState::EmergencyFrozen => {
                    self.stop(RunState::Frozen)?;
                    return Ok(self.report());
                }
                KillSwitchState::HardStopped => {
                    self.stop(RunState::Aborted)?;
                    return Ok(self.report());
                }
                KillSwitchState::SoftStopping => {
                    if self.await_resume() {
                        continue;
                    }
                    tracing::warn!(run_id = %self.id, "soft stop not cleared; run terminated");
                    self.state = RunState::SoftStopped;
                    return Ok(self.report());
                }
                KillSwitchState::Running => {}
            }

            let ready = self.ready_nodes();
            if ready.is_empty() {
                let done = self
                    .slots
                    .values()
                    .all(|s| s.status == NodeStatus::Executed);
                self.state = if done {
                    RunState::Completed
                } else {
                    RunState::Suspended
                };
                tracing::info!(run_id = %self.id, state = ?self.state, "run pass finished");
                return Ok(self.report());
            }

            let graph = Arc::clone(&self.graph);
            let mut wave = Vec::new();
            let mut froze = false;
            for id in ready {
                let Some(node) = graph.node(&id) else {
                    continue;
                };
                let verdict = self.gate.evaluate(&self.gate_context(), node);
                if let Some(slot) = self.slots.get_mut(&id) {
                    slot.evaluated_at = Some(self.event_seq);
                }
                match verdict.decision {
                    Decision::Execute => wave.push((node, verdict)),
                    Decision::AwaitApproval => {
                        self.set_status(&id, NodeStatus::AwaitingApproval);
                        self.log
                            .append(decision_draft(self.id, EntryKind::AwaitingApproval, node, &verdict))?;
                    }
                    Decision::Block => {
                        let why = verdict.justification();
                        self.set_status(&id, NodeStatus::Blocked { reason: why.summary });
                        self.log
                            .append(decision_draft(self.id, EntryKind::Blocked, node, &verdict))?;
                        if let Some((trigger, detail)) = &verdict.freeze {
                            self.switch.freeze(trigger, detail.clone());
                            froze = true;
                            break;
                        }
                    }
                }
            }
            if froze {
                continue;
            }
            if !wave.is_empty() {
                self.run_wave(wave)?;
            }
        }
    }

    fn gate_context(&self) -> GateContext<'_> {
        GateContext {
            graph: &self.graph,
            policy: &self.policy,
            capabilities: &self.capabilities,
            context: &self.context,
            enforcer: &self.enforcer,
            approvals: &self.approvals,
            switch: &self.switch,
        }
    }

    fn set_status(&mut self, id: &NodeId, status: NodeStatus) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.status = status;
        }
    }

    /// Nodes, in topological order, that may be evaluated now.
    fn ready_nodes(&self) -> Vec<NodeId> {
        self.graph
            .order()
            .filter(|node| {
                let Some(slot) = self.slots.get(&node.id) else {
                    return false;
                };
                let candidate = matches!(
                    slot.status,
                    NodeStatus::Pending
                        | NodeStatus::AwaitingApproval
                        | NodeStatus::Blocked { .. }
                        | NodeStatus::Compensated
                );
                let stale = slot.evaluated_at.map_or(true, |at| at < self.event_seq);
                candidate
                    && stale
                    && self.graph.dependencies(&node.id).iter().all(|dep| {
                        self.slots
                            .get(&dep.id)
                            .is_some_and(|s| s.status == NodeStatus::Executed)
                    })
            })
            .map(|node| node.id.clone())
            .collect()
    }

    fn run_wave(&mut self, wave: Vec<(&ValidatedNode, ExecutionDecision)>) -> Result<(), RuntimeError> {
        let timeout = self.gate.node_timeout();
        let bound = Duration::from_millis(self.switch.config().cancellation_bound_ms);
        let handler: &dyn ActionHandler = self.handler.as_ref();
        let switch = &self.switch;
        let log = &self.log;
        let run_id = self.id;

        let mut outcomes: Vec<(&ValidatedNode, NodeOutcome)> = thread::scope(|s| {
            let mut inline = Vec::new();
            let mut spawned = Vec::new();
            for (node, verdict) in wave {
                if node.exec_class == ExecClass::Synchronous {
                    inline.push((node, verdict));
                    continue;
                }
                let handle = s.spawn(move || {
                    run_node(node, &verdict, handler, switch, log, run_id, timeout, bound)
                });
                spawned.push((node, handle));
            }
            let mut out = Vec::new();
            for (node, verdict) in inline {
                out.push((
                    node,
                    run_node(node, &verdict, handler, switch, log, run_id, timeout, bound),
                ));
            }
            for (node, handle) in spawned {
                let outcome = handle.join().unwrap_or_else(|_| NodeOutcome::Failed {
                    reason: "handler panicked".to_string(),
                    contract: false,
                });
                out.push((node, outcome));
            }
            out
        });
        outcomes.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        let mut refused = None;
        for (node, outcome) in outcomes {
            match outcome {
                NodeOutcome::NotStarted { reason } => {
                    tracing::info!(node = %node.id, %reason, "node not started");
                }
                NodeOutcome::Completed { soft_stopped } => {
                    self.executed.push(node.id.clone());
                    self.set_status(&node.id, NodeStatus::Executed);
                    if soft_stopped {
                        self.compensate(node, timeout)?;
                    }
                }
                NodeOutcome::Failed { reason, contract } => {
                    self.log.append(
                        node_draft(run_id, EntryKind::Failed, node)
                            .with_why(Justification::new(reason.clone())),
                    )?;
                    self.set_status(&node.id, NodeStatus::Failed { reason: reason.clone() });
                    if contract && self.policy.has_freeze_trigger(FreezeTrigger::ContractFailure) {
                        self.switch.freeze(
                            FreezeTrigger::ContractFailure,
                            format!("node {}: {}", node.id, reason),
                        );
                    }
                }
                NodeOutcome::Aborted { reason } => {
                    self.log.append(
                        node_draft(run_id, EntryKind::Aborted, node)
                            .with_why(Justification::new(reason.clone())),
                    )?;
                    self.set_status(&node.id, NodeStatus::Aborted { reason });
                }
                NodeOutcome::AuditRefused(e) => {
                    self.set_status(
                        &node.id,
                        NodeStatus::Blocked {
                            reason: format!("action log refused entry: {}", e),
                        },
                    );
                    refused.get_or_insert(e);
                }
            }
        }
        if let Some(e) = refused {
            tracing::error!(run_id = %self.id, error = %e, "action log refused append; run failed");
            self.state = RunState::Failed;
            return Err(e.into());
        }
        Ok(())
    }

    /// Run a node's declared compensation after it finished during a soft stop.
    fn compensate(&mut self, node: &ValidatedNode, timeout: Option<Duration>) -> Result<(), RuntimeError> {
        let Some(compensation) = &node.compensation else {
            return Ok(());
        };
        let token = self.switch.token(timeout);
        match self.handler.compensate(node, compensation, &token) {
            Ok(()) => {
                self.log.append(
                    node_draft(self.id, EntryKind::Compensated, node).with_why(Justification::new(
                        format!("soft stop: ran compensation '{}'", compensation),
                    )),
                )?;
                self.set_status(&node.id, NodeStatus::Compensated);
                self.executed.retain(|id| id != &node.id);
                self.compensated.push(node.id.clone());
            }
            Err(e) => {
                let reason = format!("compensation '{}' failed: {}", compensation, e);
                self.log.append(
                    node_draft(self.id, EntryKind::Failed, node)
                        .with_why(Justification::new(reason.clone())),
                )?;
                self.set_status(&node.id, NodeStatus::Failed { reason });
            }
        }
        Ok(())
    }

    /// Wait out the soft-stop grace window. True if the switch left
    /// SoftStopping in time.
    fn await_resume(&self) -> bool {
        let grace = Duration::from_millis(self.switch.config().soft_stop_grace_ms);
        let deadline = Instant::now() + grace;
        loop {
            let snap = self.switch.snapshot();
            if snap.state != KillSwitchState::SoftStopping {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.switch.wait_for_change(snap.epoch, deadline - now);
        }
    }

    /// Hard stop and freeze both end the run and revoke every grant.
    fn stop(&mut self, state: RunState) -> Result<(), RuntimeError> {
        let revoked = self.capabilities.revoke_all(&self.context);
        self.revoked += revoked;
        self.state = state;
        self.log.append(
            EntryDraft::new(EntryKind::KillSwitch, "revoke_all")
                .with_run(self.id)
                .with_why(Justification::new(format!(
                    "run {:?}: {} grants revoked from {}",
                    state, revoked, self.context
                ))),
        )?;
        self.log.flush()?;
        tracing::warn!(run_id = %self.id, ?state, revoked, "run stopped");
        Ok(())
    }

    fn log_switch_transitions(&mut self) -> Result<(), RuntimeError> {
        for t in self.switch.transitions_since(self.logged_epoch) {
            self.log.append(
                EntryDraft::new(EntryKind::KillSwitch, format!("{} -> {}", t.from, t.to))
                    .with_run(self.id)
                    .with_why(
                        Justification::new(t.cause.to_string())
                            .with_detail(format!("epoch {}", t.epoch)),
                    ),
            )?;
            self.logged_epoch = t.epoch;
            self.event_seq += 1;
        }
        Ok(())
    }
}

fn node_draft(run_id: Uuid, kind: EntryKind, node: &ValidatedNode) -> EntryDraft {
    EntryDraft::new(kind, node.id.as_str())
        .with_run(run_id)
        .with_intent(node.root.as_str())
        .with_risk(node.risk.to_string())
}

fn decision_draft(
    run_id: Uuid,
    kind: EntryKind,
    node: &ValidatedNode,
    verdict: &ExecutionDecision,
) -> EntryDraft {
    node_draft(run_id, kind, node)
        .with_why(verdict.justification())
        .with_trust(verdict.trust_record())
        .with_decision(verdict.record())
}

/// How long after the first abort transition since `epoch` the node gave
/// control back.
fn abort_latency(switch: &KillSwitch, epoch: u64) -> Option<Duration> {
    switch
        .transitions_since(epoch)
        .into_iter()
        .find(|t| t.to.aborts_in_flight())
        .map(|t| (Utc::now() - t.at).to_std().unwrap_or_default())
}

#[allow(clippy::too_many_arguments)]
fn run_node(
    node: &ValidatedNode,
    verdict: &ExecutionDecision,
    handler: &dyn ActionHandler,
    switch: &Arc<KillSwitch>,
    log: &SharedActionLog,
    run_id: Uuid,
    timeout: Option<Duration>,
    bound: Duration,
) -> NodeOutcome {
    // Last look at the switch before the side effect.
    let snap = switch.snapshot();
    if snap.state != KillSwitchState::Running || snap.epoch != verdict.epoch {
        return NodeOutcome::NotStarted {
            reason: format!(
                "kill switch {} at epoch {} (verdict from epoch {})",
                snap.state, snap.epoch, verdict.epoch
            ),
        };
    }
    if let Err(e) = log.append(decision_draft(run_id, EntryKind::Executed, node, verdict)) {
        return NodeOutcome::AuditRefused(e);
    }

    let token = switch.token(timeout);
    let result = handler.execute(node, &token);

    if let Some(latency) = abort_latency(switch, verdict.epoch) {
        if latency > bound {
            let fault = KillSwitchFault::CancellationBoundExceeded {
                node: node.id.to_string(),
                bound_ms: bound.as_millis() as u64,
                elapsed_ms: latency.as_millis() as u64,
            };
            // Usually already HardStopped, so the escalation is a no-op and
            // the log entry is what records the overrun.
            let draft = node_draft(run_id, EntryKind::KillSwitch, node)
                .with_why(Justification::new(fault.to_string()));
            switch.fault(fault);
            if let Err(e) = log.append(draft) {
                tracing::error!(node = %node.id, error = %e, "could not record cancellation overrun");
            }
        }
    }

    match result {
        Ok(()) => NodeOutcome::Completed {
            soft_stopped: switch
                .transitions_since(verdict.epoch)
                .iter()
                .any(|t| t.to == KillSwitchState::SoftStopping),
        },
        Err(HandlerError::Cancelled(c)) => NodeOutcome::Aborted {
            reason: c.to_string(),
        },
        Err(HandlerError::Contract(reason)) => NodeOutcome::Failed {
            reason: format!("contract failure: {}", reason),
            contract: true,
        },
        Err(HandlerError::Failed(reason)) => NodeOutcome::Failed {
            reason,
            contract: false,
        },
    }
}
