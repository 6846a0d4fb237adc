// error.rs — Error types for the runtime.

use adr_audit::AuditError;
use adr_graph::StructuralError;
use adr_killswitch::{KillSwitchError, KillSwitchFault, KillSwitchState};
use adr_policy::{PolicyError, PolicyViolation};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while driving a run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The graph was validated against a different policy and must be
    /// validated again.
    #[error("graph validated against policy {graph_policy}, active policy is {active_policy}")]
    StalePolicy {
        graph_policy: String,
        active_policy: String,
    },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),

    /// The action log refused an append. Fatal to the run.
    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    KillSwitch(#[from] KillSwitchFault),

    #[error(transparent)]
    Operator(#[from] KillSwitchError),
}

/// Errors raised by the self-modification pipeline.
#[derive(Debug, Error)]
pub enum SelfModError {
    #[error("patch {0} not found")]
    NotFound(Uuid),

    #[error("invalid transition from {from} to {to} for patch {patch_id}")]
    InvalidTransition {
        patch_id: Uuid,
        from: String,
        to: String,
    },

    /// Every pipeline transition requires a running kill switch.
    #[error("kill switch is {state}; self-modification suspended")]
    KillSwitchEngaged { state: KillSwitchState },

    #[error("patch {patch_id} failed {stage} verification: {reason}")]
    VerificationFailed {
        patch_id: Uuid,
        stage: String,
        reason: String,
    },

    /// Deployment without an approval record is always refused.
    #[error("patch {patch_id} has no approval record; deployment refused")]
    ApprovalRequired { patch_id: Uuid },

    #[error("no earlier release retained; cannot roll back")]
    NothingToRollBack,

    #[error("patch {patch_id} is not the active release")]
    NotActive { patch_id: Uuid },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}
