// gate.rs — The Execution Decision Gate.
//
// For a node about to run:
//
//   confidence_safety   = 1.0 iff every safety predicate holds, else 0.0
//   confidence_semantic = opaque score from the external resolver, in [0, 1]
//
//   execute  iff  confidence_safety == 1.0 AND confidence_semantic >= threshold
//
// Safety is evaluated first and the resolver is only consulted for a safe
// node. A node that fails nothing but its approval is AwaitApproval (pending);
// every other failure is Block. A verdict records the kill-switch epoch it
// was computed at and is stale as soon as the epoch moves.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use adr_audit::{DecisionRecord, Justification, TrustRecord};
use adr_graph::{NodeId, ValidatedGraph, ValidatedNode};
use adr_killswitch::{KillSwitch, KillSwitchState};
use adr_policy::{
    check_scope_hash, ApprovalSet, CapabilityStore, ExecClass, FreezeTrigger, LogLevel,
    NodeProfile, PolicyConstraintSet, TrustAssessment, TrustTierEnforcer,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The external resolver could not produce a score. Not a safety failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("semantic resolver unavailable: {0}")]
pub struct ScoreError(pub String);

/// Source of `confidence_semantic`. The gate does not interpret where the
/// number comes from, only its value.
pub trait SemanticScorer: Send + Sync {
    fn score(&self, node: &ValidatedNode, graph: &ValidatedGraph) -> Result<f64, ScoreError>;
}

/// The same score for every node.
#[derive(Debug, Clone, Copy)]
pub struct FixedScore(pub f64);

impl SemanticScorer for FixedScore {
    fn score(&self, _node: &ValidatedNode, _graph: &ValidatedGraph) -> Result<f64, ScoreError> {
        Ok(self.0)
    }
}

impl<F> SemanticScorer for F
where
    F: Fn(&ValidatedNode) -> Result<f64, ScoreError> + Send + Sync,
{
    fn score(&self, node: &ValidatedNode, _graph: &ValidatedGraph) -> Result<f64, ScoreError> {
        self(node)
    }
}

/// Anything outside [0, 1], NaN included, counts as no confidence.
pub fn normalize_semantic(score: f64) -> f64 {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        score
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPredicate {
    KillSwitchRunning,
    CapabilitiesGranted,
    ScopeHashCurrent,
    EffectsDeclaredAndPermitted,
    TrustSatisfied,
    RealtimeSafeNeverGated,
    DeterministicInputs,
    NoActiveFreeze,
}

impl SafetyPredicate {
    /// The policy freeze trigger this predicate's failure corresponds to.
    pub fn freeze_trigger(self) -> Option<FreezeTrigger> {
        match self {
            SafetyPredicate::ScopeHashCurrent => Some(FreezeTrigger::CapScopeHashMismatch),
            SafetyPredicate::CapabilitiesGranted => Some(FreezeTrigger::UnverifiedCapabilityUse),
            SafetyPredicate::DeterministicInputs => {
                Some(FreezeTrigger::DeterministicModeViolation)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SafetyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyPredicate::KillSwitchRunning => "kill_switch_running",
            SafetyPredicate::CapabilitiesGranted => "capabilities_granted",
            SafetyPredicate::ScopeHashCurrent => "scope_hash_current",
            SafetyPredicate::EffectsDeclaredAndPermitted => "effects_declared_and_permitted",
            SafetyPredicate::TrustSatisfied => "trust_satisfied",
            SafetyPredicate::RealtimeSafeNeverGated => "realtime_safe_never_gated",
            SafetyPredicate::DeterministicInputs => "deterministic_inputs",
            SafetyPredicate::NoActiveFreeze => "no_active_freeze",
        };
        f.write_str(s)
    }
}

/// One predicate's result, kept for the log's `why`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateOutcome {
    pub predicate: SafetyPredicate,
    pub holds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PredicateOutcome {
    fn pass(predicate: SafetyPredicate) -> Self {
        Self {
            predicate,
            holds: true,
            detail: None,
        }
    }

    fn fail(predicate: SafetyPredicate, detail: impl Into<String>) -> Self {
        Self {
            predicate,
            holds: false,
            detail: Some(detail.into()),
        }
    }

    fn check(predicate: SafetyPredicate, failure: Option<String>) -> Self {
        match failure {
            None => Self::pass(predicate),
            Some(detail) => Self::fail(predicate, detail),
        }
    }
}

impl fmt::Display for PredicateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.detail, self.holds) {
            (_, true) => write!(f, "{}: holds", self.predicate),
            (Some(d), false) => write!(f, "{}: {}", self.predicate, d),
            (None, false) => write!(f, "{}: fails", self.predicate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Execute,
    /// Safe except for a missing approval. The node stays pending.
    AwaitApproval,
    Block,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Execute => write!(f, "execute"),
            Decision::AwaitApproval => write!(f, "await_approval"),
            Decision::Block => write!(f, "block"),
        }
    }
}

/// The gate's verdict for one node at one kill-switch epoch.
#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub node: NodeId,
    pub confidence_safety: f64,
    pub confidence_semantic: f64,
    pub threshold: f64,
    pub decision: Decision,
    pub predicates: Vec<PredicateOutcome>,
    pub trust: TrustAssessment,
    /// Set when a failed predicate is a freeze trigger in the active policy.
    pub freeze: Option<(FreezeTrigger, String)>,
    /// Set when the resolver never produced a score.
    pub resolver_error: Option<ScoreError>,
    pub attempts: u32,
    pub epoch: u64,
    /// The policy's audit level at evaluation time.
    pub log_level: LogLevel,
}

impl ExecutionDecision {
    pub fn failed(&self) -> impl Iterator<Item = &PredicateOutcome> {
        self.predicates.iter().filter(|p| !p.holds)
    }

    /// A verdict is never reused across a kill-switch transition.
    pub fn is_current(&self, switch: &KillSwitch) -> bool {
        switch.epoch() == self.epoch
    }

    pub fn record(&self) -> DecisionRecord {
        DecisionRecord {
            confidence_safety: self.confidence_safety,
            confidence_semantic: self.confidence_semantic,
            threshold: self.threshold,
        }
    }

    pub fn trust_record(&self) -> TrustRecord {
        TrustRecord {
            declared: self.trust.declared.to_string(),
            effective: self.trust.effective.to_string(),
            approved_by: self.trust.approved_by.clone(),
        }
    }

    pub fn justification(&self) -> Justification {
        let summary = match self.decision {
            Decision::Execute => "all safety predicates hold; semantic score meets threshold".to_string(),
            Decision::AwaitApproval => format!(
                "effective tier {} requires an approval record",
                self.trust.effective
            ),
            Decision::Block if self.confidence_safety < 1.0 => {
                let failed: Vec<String> = self.failed().map(|p| p.predicate.to_string()).collect();
                format!("safety verdict 0.0: {}", failed.join(", "))
            }
            Decision::Block => match &self.resolver_error {
                Some(e) => format!("no semantic score after {} attempts: {}", self.attempts, e),
                None => format!(
                    "semantic confidence {:.2} below threshold {:.2}",
                    self.confidence_semantic, self.threshold
                ),
            },
        };
        let mut why = Justification::new(summary);
        if self.log_level == LogLevel::Minimal {
            return why;
        }
        // Standard keeps the failures, full keeps every predicate.
        for p in &self.predicates {
            if !p.holds || self.log_level == LogLevel::Full {
                why = why.with_detail(p.to_string());
            }
        }
        for downgrade in &self.trust.rejected_downgrades {
            why = why.with_detail(format!("ignored: {}", downgrade));
        }
        why
    }
}

/// Everything the gate reads for one evaluation. All of it is per-run
/// except the kill switch.
pub struct GateContext<'a> {
    pub graph: &'a ValidatedGraph,
    pub policy: &'a PolicyConstraintSet,
    pub capabilities: &'a CapabilityStore,
    pub context: &'a str,
    pub enforcer: &'a TrustTierEnforcer,
    pub approvals: &'a ApprovalSet,
    pub switch: &'a KillSwitch,
}

pub struct DecisionGate {
    scorer: Arc<dyn SemanticScorer>,
    threshold: f64,
    node_timeout: Option<Duration>,
    resolver_retries: u32,
    resolver_backoff: Duration,
}

impl fmt::Debug for DecisionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionGate")
            .field("threshold", &self.threshold)
            .field("node_timeout", &self.node_timeout)
            .field("resolver_retries", &self.resolver_retries)
            .finish()
    }
}

impl DecisionGate {
    pub fn new(policy: &PolicyConstraintSet, scorer: Arc<dyn SemanticScorer>) -> Self {
        Self {
            scorer,
            threshold: policy.semantic_threshold(),
            node_timeout: policy.gate.node_timeout_ms.map(Duration::from_millis),
            resolver_retries: policy.gate.resolver_retries,
            resolver_backoff: Duration::from_millis(policy.gate.resolver_backoff_ms),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Per-node execution timeout, applied through the node's cancellation
    /// token.
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout
    }

    /// Compute the safety predicates from scratch.
    pub fn safety(
        &self,
        ctx: &GateContext<'_>,
        node: &ValidatedNode,
    ) -> (Vec<PredicateOutcome>, TrustAssessment, u64) {
        let snap = ctx.switch.snapshot();
        let trust = ctx.enforcer.assess(node, ctx.approvals);
        let mut out = Vec::with_capacity(8);

        out.push(PredicateOutcome::check(
            SafetyPredicate::KillSwitchRunning,
            (snap.state != KillSwitchState::Running).then(|| format!("kill switch is {}", snap.state)),
        ));

        let scope = check_scope_hash(node);
        out.push(PredicateOutcome::check(
            SafetyPredicate::ScopeHashCurrent,
            scope.as_ref().err().map(|e| e.to_string()),
        ));

        let missing = ctx.capabilities.missing(node, ctx.context);
        out.push(PredicateOutcome::check(
            SafetyPredicate::CapabilitiesGranted,
            (!missing.is_empty()).then(|| {
                let list: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
                format!("not granted: {}", list.join(", "))
            }),
        ));

        let forbidden: Vec<String> = ctx
            .graph
            .propagate_effects(&node.id)
            .into_iter()
            .flatten()
            .filter(|e| ctx.policy.is_effect_forbidden(e))
            .map(|e| e.to_string())
            .collect();
        out.push(PredicateOutcome::check(
            SafetyPredicate::EffectsDeclaredAndPermitted,
            (!forbidden.is_empty()).then(|| format!("forbidden effects: {}", forbidden.join(", "))),
        ));

        out.push(PredicateOutcome::check(
            SafetyPredicate::TrustSatisfied,
            (!trust.satisfied()).then(|| format!("{} without approval", trust.effective)),
        ));

        let gated_realtime =
            node.exec_class() == ExecClass::RealtimeSafe && trust.effective.requires_approval();
        out.push(PredicateOutcome::check(
            SafetyPredicate::RealtimeSafeNeverGated,
            gated_realtime.then(|| format!("realtime_safe node at tier {}", trust.effective)),
        ));

        out.push(PredicateOutcome::check(
            SafetyPredicate::DeterministicInputs,
            (!ctx.graph.deterministic_inputs(&node.id))
                .then(|| "deterministic_mode node depends on non-deterministic input".to_string()),
        ));

        out.push(PredicateOutcome::check(
            SafetyPredicate::NoActiveFreeze,
            (snap.state == KillSwitchState::EmergencyFrozen)
                .then(|| "emergency freeze active".to_string()),
        ));

        (out, trust, snap.epoch)
    }

    /// Full verdict for `node`. Retries the resolver on failure, recomputing
    /// safety before each attempt.
    pub fn evaluate(&self, ctx: &GateContext<'_>, node: &ValidatedNode) -> ExecutionDecision {
        let mut attempts = 0;
        loop {
            let (predicates, trust, epoch) = self.safety(ctx, node);
            let safe = predicates.iter().all(|p| p.holds);
            let confidence_safety = if safe { 1.0 } else { 0.0 };

            if !safe {
                return self.finish(
                    node, ctx, predicates, trust, epoch, confidence_safety, 0.0, None, attempts,
                );
            }

            attempts += 1;
            match self.scorer.score(node, ctx.graph) {
                Ok(score) => {
                    return self.finish(
                        node,
                        ctx,
                        predicates,
                        trust,
                        epoch,
                        confidence_safety,
                        normalize_semantic(score),
                        None,
                        attempts,
                    );
                }
                Err(e) if attempts <= self.resolver_retries => {
                    tracing::debug!(node = %node.id, attempt = attempts, error = %e, "semantic resolver retry");
                    std::thread::sleep(self.resolver_backoff);
                }
                Err(e) => {
                    return self.finish(
                        node,
                        ctx,
                        predicates,
                        trust,
                        epoch,
                        confidence_safety,
                        0.0,
                        Some(e),
                        attempts,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        node: &ValidatedNode,
        ctx: &GateContext<'_>,
        predicates: Vec<PredicateOutcome>,
        trust: TrustAssessment,
        epoch: u64,
        confidence_safety: f64,
        confidence_semantic: f64,
        resolver_error: Option<ScoreError>,
        attempts: u32,
    ) -> ExecutionDecision {
        let only_approval_missing = predicates
            .iter()
            .filter(|p| !p.holds)
            .all(|p| p.predicate == SafetyPredicate::TrustSatisfied);

        let decision = if confidence_safety == 1.0 && confidence_semantic >= self.threshold {
            Decision::Execute
        } else if confidence_safety == 0.0 && only_approval_missing {
            Decision::AwaitApproval
        } else {
            Decision::Block
        };

        let freeze = predicates.iter().filter(|p| !p.holds).find_map(|p| {
            let trigger = p.predicate.freeze_trigger()?;
            ctx.policy
                .has_freeze_trigger(trigger)
                .then(|| (trigger, format!("node {}: {}", node.id, p)))
        });

        let verdict = ExecutionDecision {
            node: node.id.clone(),
            confidence_safety,
            confidence_semantic,
            threshold: self.threshold,
            decision,
            predicates,
            trust,
            freeze,
            resolver_error,
            attempts,
            epoch,
            log_level: ctx.policy.audit.log_level,
        };
        match decision {
            Decision::Execute => tracing::info!(node = %node.id, semantic = confidence_semantic, "gate: execute"),
            Decision::AwaitApproval => tracing::info!(node = %node.id, tier = %verdict.trust.effective, "gate: awaiting approval"),
            Decision::Block => tracing::warn!(node = %node.id, safety = confidence_safety, semantic = confidence_semantic, "gate: blocked"),
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adr_graph::{validate, ActionSpec, EdgeSpec, GraphSpec, NodeType};
    use adr_killswitch::{KillCommand, KillSwitchConfig};
    use adr_policy::{Capability, Effect, TrustTier};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        graph: ValidatedGraph,
        policy: PolicyConstraintSet,
        store: CapabilityStore,
        enforcer: TrustTierEnforcer,
        approvals: ApprovalSet,
        switch: Arc<KillSwitch>,
    }

    impl Fixture {
        fn new(policy_yaml: &str, node: ActionSpec) -> Self {
            let policy = PolicyConstraintSet::from_yaml_str(policy_yaml).unwrap();
            let spec = GraphSpec {
                version: 1,
                roots: vec![NodeId::from("goal")],
                nodes: vec![
                    ActionSpec::new("goal", NodeType::Intent, TrustTier::AiAutonomous),
                    node,
                ],
                edges: vec![EdgeSpec::new("goal", "work")],
            };
            let graph = validate(spec, &policy).unwrap();
            Self {
                graph,
                enforcer: TrustTierEnforcer::new(Arc::new(policy.clone())),
                policy,
                store: CapabilityStore::new(),
                approvals: ApprovalSet::new(),
                switch: KillSwitch::init(KillSwitchConfig::default()),
            }
        }

        fn ctx(&self) -> GateContext<'_> {
            GateContext {
                graph: &self.graph,
                policy: &self.policy,
                capabilities: &self.store,
                context: "run",
                enforcer: &self.enforcer,
                approvals: &self.approvals,
                switch: &self.switch,
            }
        }

        fn work(&self) -> &ValidatedNode {
            self.graph.node(&NodeId::from("work")).unwrap()
        }

        fn evaluate(&self, score: f64) -> ExecutionDecision {
            let gate = DecisionGate::new(&self.policy, Arc::new(FixedScore(score)));
            gate.evaluate(&self.ctx(), self.work())
        }
    }

    fn work() -> ActionSpec {
        ActionSpec::new("work", NodeType::Step, TrustTier::AiAutonomous)
    }

    #[test]
    fn low_semantic_score_blocks_safe_node() {
        let f = Fixture::new("domain: t\n", work());
        let v = f.evaluate(0.42);
        assert_eq!(v.confidence_safety, 1.0);
        assert_eq!(v.decision, Decision::Block);
        assert!(v.justification().summary.contains("below threshold"));
        assert_eq!(f.evaluate(0.8).decision, Decision::Execute);
    }

    #[test]
    fn safety_is_exactly_zero_or_one() {
        let f = Fixture::new(
            "domain: t\n",
            work().with_capabilities([Capability::fs("/data/out")]),
        );
        for score in [0.0, 0.5, 1.0, f64::NAN] {
            let v = f.evaluate(score);
            assert!(v.confidence_safety == 0.0 || v.confidence_safety == 1.0);
            assert_eq!(v.confidence_safety, 0.0);
            assert_eq!(v.decision, Decision::Block);
        }
    }

    #[test]
    fn non_finite_semantic_counts_as_zero() {
        assert_eq!(normalize_semantic(f64::NAN), 0.0);
        assert_eq!(normalize_semantic(f64::INFINITY), 0.0);
        assert_eq!(normalize_semantic(1.2), 0.0);
        assert_eq!(normalize_semantic(-0.1), 0.0);
        assert_eq!(normalize_semantic(0.9), 0.9);
        let f = Fixture::new("domain: t\n", work());
        assert_eq!(f.evaluate(f64::NAN).decision, Decision::Block);
    }

    #[test]
    fn missing_approval_is_pending_not_blocked() {
        let f = Fixture::new(
            "domain: t\ntrust_overrides:\n  - match: fs_write\n    set_tier: human_required\n",
            work().with_effects([Effect::new("fs_write")]),
        );
        let v = f.evaluate(1.0);
        assert_eq!(v.decision, Decision::AwaitApproval);
        assert_eq!(v.confidence_safety, 0.0);
        assert_eq!(v.trust.effective, TrustTier::HumanRequired);
    }

    #[test]
    fn realtime_node_behind_human_gate_is_blocked() {
        let f = Fixture::new(
            "domain: t\n",
            ActionSpec::new("work", NodeType::Step, TrustTier::AiProposed)
                .with_exec_class(ExecClass::RealtimeSafe),
        );
        let v = f.evaluate(1.0);
        assert_eq!(v.decision, Decision::Block);
        assert!(v
            .failed()
            .any(|p| p.predicate == SafetyPredicate::RealtimeSafeNeverGated));
    }

    #[test]
    fn forbidden_effect_blocks() {
        let f = Fixture::new(
            "domain: t\nforbidden_effects: [hw_actuate]\n",
            work().with_effects([Effect::new("hw_actuate:valve")]),
        );
        let v = f.evaluate(1.0);
        assert_eq!(v.decision, Decision::Block);
        assert!(v
            .failed()
            .any(|p| p.predicate == SafetyPredicate::EffectsDeclaredAndPermitted));
    }

    #[test]
    fn audit_level_sets_justification_detail() {
        let details = |level: &str| {
            let yaml = format!(
                "domain: t\nforbidden_effects: [hw_actuate]\naudit:\n  log_level: {}\n",
                level
            );
            let f = Fixture::new(&yaml, work().with_effects([Effect::new("hw_actuate:valve")]));
            let v = f.evaluate(1.0);
            (v.justification().details.len(), v.failed().count(), v.predicates.len())
        };
        assert_eq!(details("minimal").0, 0);
        let (standard, failed, _) = details("standard");
        assert_eq!(standard, failed);
        assert!(failed > 0);
        let (full, _, all) = details("full");
        assert_eq!(full, all);
        assert!(all > failed);
    }

    #[test]
    fn stale_scope_hash_reports_freeze_trigger() {
        let mut node = work().with_capabilities([Capability::fs("/data/out")]);
        node.cap_scope_hash = Some("0".repeat(64));
        let f = Fixture::new("domain: t\nfreeze_triggers: [cap_scope_hash_mismatch]\n", node);
        let v = f.evaluate(1.0);
        assert_eq!(v.decision, Decision::Block);
        assert_eq!(
            v.freeze.as_ref().map(|(t, _)| *t),
            Some(FreezeTrigger::CapScopeHashMismatch)
        );
    }

    #[test]
    fn freeze_trigger_absent_from_policy_only_blocks() {
        let mut node = work();
        node.cap_scope_hash = Some("0".repeat(64));
        let f = Fixture::new("domain: t\n", node);
        let v = f.evaluate(1.0);
        assert_eq!(v.decision, Decision::Block);
        assert!(v.freeze.is_none());
    }

    #[test]
    fn stopped_switch_blocks_and_stales_verdict() {
        let f = Fixture::new("domain: t\n", work());
        let v = f.evaluate(1.0);
        assert!(v.is_current(&f.switch));
        f.switch.request(KillCommand::SoftStop, "test");
        assert!(!v.is_current(&f.switch));
        let again = f.evaluate(1.0);
        assert_eq!(again.decision, Decision::Block);
        assert_eq!(again.epoch, 1);
    }

    #[test]
    fn resolver_retries_then_blocks() {
        let f = Fixture::new(
            "domain: t\ngate:\n  resolver_retries: 2\n  resolver_backoff_ms: 1\n",
            work(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let scorer = move |_: &ValidatedNode| -> Result<f64, ScoreError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ScoreError("timeout".into()))
        };
        let gate = DecisionGate::new(&f.policy, Arc::new(scorer));
        let v = gate.evaluate(&f.ctx(), f.work());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(v.decision, Decision::Block);
        assert_eq!(v.attempts, 3);
        assert!(v.resolver_error.is_some());
    }

    #[test]
    fn retry_recomputes_safety() {
        let f = Fixture::new(
            "domain: t\ngate:\n  resolver_retries: 3\n  resolver_backoff_ms: 1\n",
            work(),
        );
        let switch = Arc::clone(&f.switch);
        let scorer = move |_: &ValidatedNode| -> Result<f64, ScoreError> {
            // The first failure coincides with a hard stop.
            switch.request(KillCommand::HardStop, "test");
            Err(ScoreError("flaky".into()))
        };
        let gate = DecisionGate::new(&f.policy, Arc::new(scorer));
        let v = gate.evaluate(&f.ctx(), f.work());
        assert_eq!(v.confidence_safety, 0.0);
        assert_eq!(v.attempts, 1);
        assert_eq!(v.epoch, 1);
    }
}
