// trust.rs — Trust tiers, approvals and the tier enforcer.
//
// Tiers form a fixed total order:
//   ai_autonomous < ai_proposed < human_required
//
// Effective tier = max(declared, every matching policy override, any runtime
// override). Overrides can only raise a tier. Checkpoint nodes are pinned at
// human_required. A node above ai_autonomous cannot execute until the run's
// ApprovalSet holds a record for it; that is a pending condition, not an
// error.
//
// Rules may also lock the tier of the nodes they match:
//   downgrade_forbidden  a downgrade attempt always freezes the run
//   immutable            no runtime override at all, raise or lower
// Checkpoints are implicitly immutable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OverrideSource, PolicyError, PolicyViolation};
use crate::policy::PolicyConstraintSet;
use crate::profile::{NodeProfile, NodeType};

/// Required level of human involvement before a node may execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    AiAutonomous,
    AiProposed,
    HumanRequired,
}

impl TrustTier {
    /// Whether an approval record is needed before execution.
    pub fn requires_approval(self) -> bool {
        self > TrustTier::AiAutonomous
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustTier::AiAutonomous => write!(f, "ai_autonomous"),
            TrustTier::AiProposed => write!(f, "ai_proposed"),
            TrustTier::HumanRequired => write!(f, "human_required"),
        }
    }
}

/// An approval tied to a specific operator identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub node_id: String,
    pub operator: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Approvals collected during one run. Not shared across runs.
#[derive(Debug, Clone, Default)]
pub struct ApprovalSet {
    records: BTreeMap<String, ApprovalRecord>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an approval. The operator identity must be non-empty.
    pub fn approve(
        &mut self,
        node_id: &str,
        operator: &str,
        note: Option<String>,
    ) -> Result<&ApprovalRecord, PolicyError> {
        if operator.trim().is_empty() {
            return Err(PolicyError::AnonymousApproval {
                node: node_id.to_string(),
            });
        }
        tracing::info!(node = node_id, operator, "approval recorded");
        let record = ApprovalRecord {
            node_id: node_id.to_string(),
            operator: operator.to_string(),
            approved_at: Utc::now(),
            note,
        };
        self.records.insert(node_id.to_string(), record);
        Ok(&self.records[node_id])
    }

    pub fn get(&self, node_id: &str) -> Option<&ApprovalRecord> {
        self.records.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// How firmly policy holds a node's tier. Ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TierLock {
    Open,
    DowngradeForbidden,
    Immutable,
}

/// Outcome of evaluating one node's trust requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAssessment {
    pub declared: TrustTier,
    pub effective: TrustTier,
    pub approved_by: Option<String>,
    pub lock: TierLock,
    /// Matching policy rules that asked for a lower tier. Reported, never applied.
    pub rejected_downgrades: Vec<PolicyViolation>,
}

impl TrustAssessment {
    /// True when the node may proceed as far as trust is concerned.
    pub fn satisfied(&self) -> bool {
        !self.effective.requires_approval() || self.approved_by.is_some()
    }
}

/// Computes effective tiers for one run.
#[derive(Debug, Clone)]
pub struct TrustTierEnforcer {
    policy: Arc<PolicyConstraintSet>,
    runtime_overrides: BTreeMap<String, TrustTier>,
}

impl TrustTierEnforcer {
    pub fn new(policy: Arc<PolicyConstraintSet>) -> Self {
        Self {
            policy,
            runtime_overrides: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &PolicyConstraintSet {
        &self.policy
    }

    /// max(declared, matching policy overrides, runtime override).
    pub fn effective_tier(&self, node: &dyn NodeProfile) -> TrustTier {
        self.evaluate(node).0
    }

    /// The strongest lock any matching rule places on the node.
    pub fn tier_lock(&self, node: &dyn NodeProfile) -> TierLock {
        if node.node_type() == NodeType::Checkpoint {
            return TierLock::Immutable;
        }
        self.policy
            .trust_overrides
            .iter()
            .filter(|rule| rule.match_rule.matches(node))
            .map(|rule| {
                if rule.immutable {
                    TierLock::Immutable
                } else if rule.downgrade_forbidden {
                    TierLock::DowngradeForbidden
                } else {
                    TierLock::Open
                }
            })
            .max()
            .unwrap_or(TierLock::Open)
    }

    fn evaluate(&self, node: &dyn NodeProfile) -> (TrustTier, Vec<PolicyViolation>) {
        let mut tier = node.declared_tier();
        if node.node_type() == NodeType::Checkpoint {
            tier = TrustTier::HumanRequired;
        }
        let mut rejected = Vec::new();
        for rule in &self.policy.trust_overrides {
            if !rule.match_rule.matches(node) {
                continue;
            }
            if rule.set_tier >= tier {
                tier = rule.set_tier;
            } else {
                rejected.push(PolicyViolation::TierDowngrade {
                    node: node.node_id().to_string(),
                    current: tier,
                    requested: rule.set_tier,
                    source_kind: OverrideSource::Policy,
                });
            }
        }
        if let Some(runtime) = self.runtime_overrides.get(node.node_id()) {
            tier = tier.max(*runtime);
        }
        (tier, rejected)
    }

    /// Raise a node's tier at runtime. A request below the current effective
    /// tier, or any change to an immutable tier, fails and leaves the tier
    /// untouched.
    pub fn apply_runtime_override(
        &mut self,
        node: &dyn NodeProfile,
        requested: TrustTier,
    ) -> Result<TrustTier, PolicyViolation> {
        let current = self.effective_tier(node);
        if requested > current && self.tier_lock(node) == TierLock::Immutable {
            tracing::warn!(
                node = node.node_id(),
                %current,
                %requested,
                "immutable tier override rejected"
            );
            return Err(PolicyViolation::ImmutableTier {
                node: node.node_id().to_string(),
                tier: current,
                requested,
            });
        }
        if requested < current {
            tracing::warn!(
                node = node.node_id(),
                %current,
                %requested,
                "runtime tier downgrade rejected"
            );
            return Err(PolicyViolation::TierDowngrade {
                node: node.node_id().to_string(),
                current,
                requested,
                source_kind: OverrideSource::Runtime,
            });
        }
        self.runtime_overrides
            .insert(node.node_id().to_string(), requested);
        Ok(requested)
    }

    /// Full assessment against the run's approvals.
    pub fn assess(&self, node: &dyn NodeProfile, approvals: &ApprovalSet) -> TrustAssessment {
        let (effective, rejected_downgrades) = self.evaluate(node);
        TrustAssessment {
            declared: node.declared_tier(),
            effective,
            approved_by: approvals.get(node.node_id()).map(|r| r.operator.clone()),
            lock: self.tier_lock(node),
            rejected_downgrades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Effect;
    use crate::profile::{ExecClass, NodeType, StaticProfile};

    fn policy(yaml: &str) -> Arc<PolicyConstraintSet> {
        Arc::new(PolicyConstraintSet::from_yaml_str(yaml).unwrap())
    }

    fn writer(tier: TrustTier) -> StaticProfile {
        StaticProfile::new("write-out", tier, ExecClass::Synchronous)
            .with_effects([Effect::new("fs_write")])
    }

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(TrustTier::AiAutonomous < TrustTier::AiProposed);
        assert!(TrustTier::AiProposed < TrustTier::HumanRequired);
        assert!(!TrustTier::AiAutonomous.requires_approval());
        assert!(TrustTier::AiProposed.requires_approval());
    }

    #[test]
    fn policy_override_raises_tier() {
        let enforcer = TrustTierEnforcer::new(policy(
            "domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: human_required\n",
        ));
        let node = writer(TrustTier::AiAutonomous);
        assert_eq!(enforcer.effective_tier(&node), TrustTier::HumanRequired);

        let assessment = enforcer.assess(&node, &ApprovalSet::new());
        assert!(!assessment.satisfied());
    }

    #[test]
    fn approval_satisfies_gated_tier() {
        let enforcer = TrustTierEnforcer::new(policy(
            "domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: human_required\n",
        ));
        let node = writer(TrustTier::AiAutonomous);
        let mut approvals = ApprovalSet::new();
        approvals.approve("write-out", "alice", None).unwrap();
        let assessment = enforcer.assess(&node, &approvals);
        assert!(assessment.satisfied());
        assert_eq!(assessment.approved_by.as_deref(), Some("alice"));
    }

    #[test]
    fn anonymous_approval_is_rejected() {
        let mut approvals = ApprovalSet::new();
        assert!(matches!(
            approvals.approve("n", "  ", None),
            Err(PolicyError::AnonymousApproval { .. })
        ));
        assert!(approvals.is_empty());
    }

    #[test]
    fn policy_downgrade_is_reported_not_applied() {
        let enforcer = TrustTierEnforcer::new(policy(
            "domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: ai_autonomous\n",
        ));
        let node = writer(TrustTier::HumanRequired);
        let assessment = enforcer.assess(&node, &ApprovalSet::new());
        assert_eq!(assessment.effective, TrustTier::HumanRequired);
        assert_eq!(assessment.rejected_downgrades.len(), 1);
    }

    #[test]
    fn runtime_downgrade_fails_and_keeps_tier() {
        let mut enforcer = TrustTierEnforcer::new(Arc::new(PolicyConstraintSet::default()));
        let node = writer(TrustTier::AiProposed);
        let err = enforcer
            .apply_runtime_override(&node, TrustTier::AiAutonomous)
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyViolation::TierDowngrade {
                source_kind: OverrideSource::Runtime,
                ..
            }
        ));
        assert_eq!(enforcer.effective_tier(&node), TrustTier::AiProposed);
    }

    #[test]
    fn checkpoint_is_pinned_at_human_required() {
        let mut enforcer = TrustTierEnforcer::new(policy(
            "domain: test\ntrust_overrides:\n  - match: { node_type: checkpoint }\n    set_tier: ai_autonomous\n",
        ));
        let node = StaticProfile::new("audit", TrustTier::AiAutonomous, ExecClass::Synchronous)
            .with_node_type(NodeType::Checkpoint);

        let assessment = enforcer.assess(&node, &ApprovalSet::new());
        assert_eq!(assessment.effective, TrustTier::HumanRequired);
        assert_eq!(assessment.lock, TierLock::Immutable);
        assert_eq!(assessment.rejected_downgrades.len(), 1);
        assert!(!assessment.satisfied());

        assert!(enforcer
            .apply_runtime_override(&node, TrustTier::AiProposed)
            .unwrap_err()
            .is_downgrade());
        assert_eq!(enforcer.effective_tier(&node), TrustTier::HumanRequired);
    }

    #[test]
    fn immutable_rule_refuses_raise() {
        let mut enforcer = TrustTierEnforcer::new(policy(
            "domain: test\ntrust_overrides:\n  - match: fs_write\n    set_tier: ai_proposed\n    immutable: true\n",
        ));
        let node = writer(TrustTier::AiAutonomous);
        assert_eq!(enforcer.tier_lock(&node), TierLock::Immutable);
        assert!(matches!(
            enforcer.apply_runtime_override(&node, TrustTier::HumanRequired),
            Err(PolicyViolation::ImmutableTier {
                tier: TrustTier::AiProposed,
                ..
            })
        ));
        // Re-asserting the current tier is not a change.
        assert_eq!(
            enforcer.apply_runtime_override(&node, TrustTier::AiProposed),
            Ok(TrustTier::AiProposed)
        );
        assert_eq!(enforcer.effective_tier(&node), TrustTier::AiProposed);
    }

    #[test]
    fn strongest_matching_lock_wins() {
        let enforcer = TrustTierEnforcer::new(policy(
            r#"
domain: test
trust_overrides:
  - match: fs_write
    set_tier: ai_proposed
  - match: { exec_class: synchronous }
    set_tier: ai_proposed
    downgrade_forbidden: true
"#,
        ));
        assert_eq!(
            enforcer.tier_lock(&writer(TrustTier::AiAutonomous)),
            TierLock::DowngradeForbidden
        );
        let isolated = StaticProfile::new("other", TrustTier::AiAutonomous, ExecClass::Isolated);
        assert_eq!(enforcer.tier_lock(&isolated), TierLock::Open);
    }

    #[test]
    fn no_override_sequence_lowers_tier() {
        let tiers = [
            TrustTier::AiAutonomous,
            TrustTier::AiProposed,
            TrustTier::HumanRequired,
        ];
        // Every sequence of three runtime overrides, from every declared tier.
        for declared in tiers {
            for a in tiers {
                for b in tiers {
                    for c in tiers {
                        let mut enforcer =
                            TrustTierEnforcer::new(Arc::new(PolicyConstraintSet::default()));
                        let node = writer(declared);
                        let mut last = enforcer.effective_tier(&node);
                        for requested in [a, b, c] {
                            let _ = enforcer.apply_runtime_override(&node, requested);
                            let now = enforcer.effective_tier(&node);
                            assert!(now >= last);
                            assert!(now >= declared);
                            last = now;
                        }
                    }
                }
            }
        }
    }
}
