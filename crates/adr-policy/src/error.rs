// error.rs — Error types for the policy subsystem.

use std::path::PathBuf;

use thiserror::Error;

use crate::trust::TrustTier;

/// Errors raised while loading or mutating policy state.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("failed to read policy at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The policy document is not valid YAML for a constraint set.
    #[error("policy parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document parsed but violates a structural rule.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// A capability pattern is malformed and cannot be parsed as a glob.
    #[error("invalid capability pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A capability scope contains path traversal sequences.
    #[error("path traversal detected in capability '{capability}'")]
    PathTraversal { capability: String },

    /// An approval record was submitted without an operator identity.
    #[error("approval for node '{node}' has no operator identity")]
    AnonymousApproval { node: String },
}

/// A node is not allowed to use what it declared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityViolation {
    /// A required capability is absent from the context's grants.
    #[error("node '{node}' requires '{capability}', not granted in context '{context}'")]
    Missing {
        node: String,
        context: String,
        capability: String,
    },

    /// The node was compiled against a different capability scope.
    #[error("node '{node}' cap_scope_hash {found} does not match compiled scope {expected}")]
    ScopeHashMismatch {
        node: String,
        expected: String,
        found: String,
    },
}

impl CapabilityViolation {
    pub fn is_scope_mismatch(&self) -> bool {
        matches!(self, CapabilityViolation::ScopeHashMismatch { .. })
    }
}

impl PolicyViolation {
    pub fn is_downgrade(&self) -> bool {
        matches!(self, PolicyViolation::TierDowngrade { .. })
    }
}

/// Where a tier override came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSource {
    Policy,
    Runtime,
}

impl std::fmt::Display for OverrideSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideSource::Policy => write!(f, "policy"),
            OverrideSource::Runtime => write!(f, "runtime"),
        }
    }
}

/// An override that would weaken safety. Rejected, never applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("{source_kind} override would lower '{node}' from {current} to {requested}")]
    TierDowngrade {
        node: String,
        current: TrustTier,
        requested: TrustTier,
        source_kind: OverrideSource,
    },

    /// The node's tier is fixed by an immutable rule or by being a checkpoint.
    #[error("tier of '{node}' is immutable at {tier}, override to {requested} refused")]
    ImmutableTier {
        node: String,
        tier: TrustTier,
        requested: TrustTier,
    },

    #[error("effect '{effect}' of node '{node}' is forbidden by policy")]
    ForbiddenEffect { node: String, effect: String },
}
