// selfmod.rs — The self-modification pipeline.
//
// A patch changes either the graph structure or a piece of agent code. It
// moves through a fixed lifecycle:
//
//   Proposed → Checked → HumanGated → Deployed → RolledBack
//   Proposed | Checked → Rejected (verification failed)
//
// Every forward transition requires the kill switch to be Running at the
// moment it is taken. Rollback stays available under soft and hard stop and
// is refused only while EmergencyFrozen. Every transition (or refusal) is
// written to the action log before it takes effect.
// Deployment needs an approval record whatever tier the patch declared, and
// publishes through the release registry in one atomic swap.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use adr_audit::{EntryDraft, EntryKind, Justification, SharedActionLog, TrustRecord};
use adr_graph::{validate, GraphSpec, ValidatedGraph};
use adr_killswitch::{KillSwitch, KillSwitchState};
use adr_policy::{check_scope_hash, ApprovalRecord, ApprovalSet, PolicyConstraintSet, TrustTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SelfModError;
use crate::registry::{CodeArtifact, Release, ReleaseRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PatchState {
    Proposed,
    Checked,
    HumanGated,
    Deployed { version: u64 },
    RolledBack,
    Rejected { reason: String },
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchState::Proposed => write!(f, "proposed"),
            PatchState::Checked => write!(f, "checked"),
            PatchState::HumanGated => write!(f, "human_gated"),
            PatchState::Deployed { .. } => write!(f, "deployed"),
            PatchState::RolledBack => write!(f, "rolled_back"),
            PatchState::Rejected { .. } => write!(f, "rejected"),
        }
    }
}

impl PatchState {
    pub fn can_transition_to(&self, next: &PatchState) -> bool {
        matches!(
            (self, next),
            (PatchState::Proposed, PatchState::Checked)
                | (PatchState::Checked, PatchState::HumanGated)
                | (PatchState::HumanGated, PatchState::Deployed { .. })
                | (PatchState::Deployed { .. }, PatchState::RolledBack)
                | (PatchState::Proposed, PatchState::Rejected { .. })
                | (PatchState::Checked, PatchState::Rejected { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "patch", rename_all = "snake_case")]
pub enum PatchContent {
    Graph(GraphSpec),
    Code(CodeArtifact),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Structural,
    Contract,
    Property,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStage::Structural => write!(f, "structural"),
            VerificationStage::Contract => write!(f, "contract"),
            VerificationStage::Property => write!(f, "property"),
        }
    }
}

/// Checks a code artifact at each verification stage. Graph patches are
/// verified by the graph engine instead.
pub trait CodeVerifier: Send + Sync {
    fn verify(&self, stage: VerificationStage, artifact: &CodeArtifact) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct Patch {
    pub id: Uuid,
    pub description: String,
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    pub content: PatchContent,
    pub declared_tier: TrustTier,
    pub state: PatchState,
    validated: Option<Arc<ValidatedGraph>>,
}

impl Patch {
    /// Self-modification never runs below `ai_proposed`.
    pub fn effective_tier(&self) -> TrustTier {
        self.declared_tier.max(TrustTier::AiProposed)
    }
}

pub struct SelfModPipeline {
    policy: Arc<PolicyConstraintSet>,
    switch: Arc<KillSwitch>,
    log: SharedActionLog,
    registry: Arc<ReleaseRegistry>,
    verifier: Option<Arc<dyn CodeVerifier>>,
    approvals: ApprovalSet,
    patches: BTreeMap<Uuid, Patch>,
}

impl SelfModPipeline {
    pub fn new(
        policy: Arc<PolicyConstraintSet>,
        switch: Arc<KillSwitch>,
        log: SharedActionLog,
        registry: Arc<ReleaseRegistry>,
    ) -> Self {
        Self {
            policy,
            switch,
            log,
            registry,
            verifier: None,
            approvals: ApprovalSet::new(),
            patches: BTreeMap::new(),
        }
    }

    /// Without a verifier every code patch is rejected at the contract stage.
    pub fn with_code_verifier(mut self, verifier: Arc<dyn CodeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn registry(&self) -> &Arc<ReleaseRegistry> {
        &self.registry
    }

    pub fn patch(&self, id: Uuid) -> Option<&Patch> {
        self.patches.get(&id)
    }

    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn approval(&self, id: Uuid) -> Option<&ApprovalRecord> {
        self.approvals.get(&id.to_string())
    }

    fn require_running(&self) -> Result<(), SelfModError> {
        let state = self.switch.state();
        if state != KillSwitchState::Running {
            tracing::warn!(%state, "self-modification refused while kill switch engaged");
            return Err(SelfModError::KillSwitchEngaged { state });
        }
        Ok(())
    }

    fn patch_mut(&mut self, id: Uuid) -> Result<&mut Patch, SelfModError> {
        self.patches.get_mut(&id).ok_or(SelfModError::NotFound(id))
    }

    fn draft(&self, kind: EntryKind, patch: &Patch, why: Justification) -> EntryDraft {
        EntryDraft::new(kind, format!("patch {}", patch.id))
            .with_intent(patch.description.clone())
            .with_why(why)
            .with_trust(TrustRecord {
                declared: patch.declared_tier.to_string(),
                effective: patch.effective_tier().to_string(),
                approved_by: self.approval(patch.id).map(|a| a.operator.clone()),
            })
    }

    /// Log the move to `next`, then make it. A refused append leaves the
    /// patch where it was.
    fn transition(&mut self, id: Uuid, next: PatchState, detail: String) -> Result<(), SelfModError> {
        let patch = self.patches.get(&id).ok_or(SelfModError::NotFound(id))?;
        if !patch.state.can_transition_to(&next) {
            return Err(SelfModError::InvalidTransition {
                patch_id: id,
                from: patch.state.to_string(),
                to: next.to_string(),
            });
        }
        let why = Justification::new(format!("{} -> {}", patch.state, next)).with_detail(detail);
        self.log
            .append(self.draft(EntryKind::SelfModification, patch, why))?;
        let patch = self.patch_mut(id)?;
        let from = std::mem::replace(&mut patch.state, next.clone());
        tracing::info!(patch_id = %id, %from, to = %next, "patch transition");
        Ok(())
    }

    /// Log a refused request without changing the patch.
    fn refuse(&self, id: Uuid, error: SelfModError) -> SelfModError {
        if let Some(patch) = self.patches.get(&id) {
            let draft = self.draft(EntryKind::Blocked, patch, Justification::new(error.to_string()));
            if let Err(e) = self.log.append(draft) {
                return e.into();
            }
        }
        error
    }

    pub fn propose(
        &mut self,
        description: impl Into<String>,
        proposed_by: impl Into<String>,
        content: PatchContent,
        declared_tier: TrustTier,
    ) -> Result<Uuid, SelfModError> {
        self.require_running()?;
        let patch = Patch {
            id: Uuid::new_v4(),
            description: description.into(),
            proposed_by: proposed_by.into(),
            proposed_at: Utc::now(),
            content,
            declared_tier,
            state: PatchState::Proposed,
            validated: None,
        };
        let id = patch.id;
        let why = Justification::new(format!("proposed by {}", patch.proposed_by));
        self.log
            .append(self.draft(EntryKind::SelfModification, &patch, why))?;
        tracing::info!(patch_id = %id, proposed_by = %patch.proposed_by, "patch proposed");
        self.patches.insert(id, patch);
        Ok(id)
    }

    /// Run the structural, contract and property stages. A failure moves the
    /// patch to Rejected.
    pub fn check(&mut self, id: Uuid) -> Result<(), SelfModError> {
        self.require_running()?;
        let patch = self.patches.get(&id).ok_or(SelfModError::NotFound(id))?;
        if patch.state != PatchState::Proposed {
            return Err(SelfModError::InvalidTransition {
                patch_id: id,
                from: patch.state.to_string(),
                to: PatchState::Checked.to_string(),
            });
        }
        let verified = match &patch.content {
            PatchContent::Graph(spec) => self.verify_graph(spec.clone()).map(Some),
            PatchContent::Code(artifact) => self.verify_code(artifact).map(|()| None),
        };
        match verified {
            Ok(graph) => {
                self.patch_mut(id)?.validated = graph;
                self.transition(id, PatchState::Checked, "all verification stages passed".into())
            }
            Err((stage, reason)) => {
                self.transition(
                    id,
                    PatchState::Rejected {
                        reason: format!("{}: {}", stage, reason),
                    },
                    reason.clone(),
                )?;
                Err(SelfModError::VerificationFailed {
                    patch_id: id,
                    stage: stage.to_string(),
                    reason,
                })
            }
        }
    }

    fn verify_graph(
        &self,
        spec: GraphSpec,
    ) -> Result<Arc<ValidatedGraph>, (VerificationStage, String)> {
        let active = self.registry.active_graph();
        let graph = validate(spec, &self.policy)
            .map_err(|e| (VerificationStage::Structural, e.to_string()))?;

        for node in graph.nodes() {
            check_scope_hash(node).map_err(|e| (VerificationStage::Contract, e.to_string()))?;
            if let Some(effect) = graph
                .propagate_effects(&node.id)
                .into_iter()
                .flatten()
                .find(|e| self.policy.is_effect_forbidden(e))
            {
                return Err((
                    VerificationStage::Contract,
                    format!("node {} reaches forbidden effect {}", node.id, effect),
                ));
            }
        }

        if graph.version() <= active.version() {
            return Err((
                VerificationStage::Property,
                format!(
                    "version {} does not supersede active version {}",
                    graph.version(),
                    active.version()
                ),
            ));
        }
        let again = graph
            .revalidate(&self.policy)
            .map_err(|e| (VerificationStage::Property, e.to_string()))?;
        if again.order_ids() != graph.order_ids() || again.graph_hash() != graph.graph_hash() {
            return Err((
                VerificationStage::Property,
                "re-validation produced a different order".to_string(),
            ));
        }
        Ok(Arc::new(graph))
    }

    fn verify_code(&self, artifact: &CodeArtifact) -> Result<(), (VerificationStage, String)> {
        if !artifact.is_intact() {
            return Err((
                VerificationStage::Structural,
                format!("digest mismatch for {}", artifact.name),
            ));
        }
        let Some(verifier) = &self.verifier else {
            return Err((
                VerificationStage::Contract,
                "no code verifier configured".to_string(),
            ));
        };
        for stage in [
            VerificationStage::Structural,
            VerificationStage::Contract,
            VerificationStage::Property,
        ] {
            verifier.verify(stage, artifact).map_err(|reason| (stage, reason))?;
        }
        Ok(())
    }

    pub fn submit_for_approval(&mut self, id: Uuid) -> Result<(), SelfModError> {
        self.require_running()?;
        self.transition(id, PatchState::HumanGated, "awaiting approval".into())
    }

    /// Attach an approval record to a gated patch.
    pub fn approve(
        &mut self,
        id: Uuid,
        operator: &str,
        note: Option<String>,
    ) -> Result<(), SelfModError> {
        self.require_running()?;
        let patch = self.patches.get(&id).ok_or(SelfModError::NotFound(id))?;
        if patch.state != PatchState::HumanGated {
            return Err(SelfModError::InvalidTransition {
                patch_id: id,
                from: patch.state.to_string(),
                to: "approved".to_string(),
            });
        }
        self.approvals.approve(&id.to_string(), operator, note)?;
        let patch = &self.patches[&id];
        let why = Justification::new(format!("approved by {}", operator));
        self.log.append(self.draft(EntryKind::Operator, patch, why))?;
        Ok(())
    }

    /// Publish the patch as the active release.
    pub fn deploy(&mut self, id: Uuid) -> Result<Arc<Release>, SelfModError> {
        self.require_running()?;
        let patch = self.patches.get(&id).ok_or(SelfModError::NotFound(id))?;
        if patch.state != PatchState::HumanGated {
            let err = SelfModError::InvalidTransition {
                patch_id: id,
                from: patch.state.to_string(),
                to: "deployed".to_string(),
            };
            return Err(self.refuse(id, err));
        }
        if self.approval(id).is_none() {
            return Err(self.refuse(id, SelfModError::ApprovalRequired { patch_id: id }));
        }

        let (graph, code) = match &patch.content {
            PatchContent::Graph(_) => (patch.validated.clone(), Vec::new()),
            PatchContent::Code(artifact) => (None, vec![artifact.clone()]),
        };
        if let Some(graph) = &graph {
            if !graph.is_valid_for(&self.policy) {
                let err = SelfModError::VerificationFailed {
                    patch_id: id,
                    stage: VerificationStage::Contract.to_string(),
                    reason: "policy changed since the patch was checked".to_string(),
                };
                return Err(self.refuse(id, err));
            }
        }

        // The switch may have moved while we were preparing.
        self.require_running()?;
        let release = self.registry.publish(id, graph, code);
        self.transition(
            id,
            PatchState::Deployed {
                version: release.version,
            },
            format!("release {}", release.version),
        )?;
        Ok(release)
    }

    /// Restore the release that preceded this patch's deployment. Allowed
    /// under soft and hard stop; only EmergencyFrozen refuses it.
    pub fn rollback(&mut self, id: Uuid) -> Result<Arc<Release>, SelfModError> {
        let state = self.switch.state();
        if state == KillSwitchState::EmergencyFrozen {
            tracing::warn!(patch_id = %id, %state, "rollback refused while frozen");
            return Err(SelfModError::KillSwitchEngaged { state });
        }
        let patch = self.patches.get(&id).ok_or(SelfModError::NotFound(id))?;
        if !matches!(patch.state, PatchState::Deployed { .. }) {
            return Err(SelfModError::InvalidTransition {
                patch_id: id,
                from: patch.state.to_string(),
                to: PatchState::RolledBack.to_string(),
            });
        }
        if self.registry.active().patch_id != Some(id) {
            return Err(SelfModError::NotActive { patch_id: id });
        }
        let restored = self.registry.rollback()?;
        tracing::info!(patch_id = %id, %state, release = restored.version, "rolled back");
        self.transition(
            id,
            PatchState::RolledBack,
            format!("restored release {} (kill switch {})", restored.version, state),
        )?;
        Ok(restored)
    }
}
