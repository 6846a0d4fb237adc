//! # adr-policy
//!
//! Capability store, trust tiers and the compiled policy constraint set.
//!
//! Implements the "default deny" boundary for graph nodes: a node may only
//! run when every capability it declares has been granted to its execution
//! context, its stamped `cap_scope_hash` still matches its declared scope,
//! and its effective trust tier is satisfied by an approval on record.
//!
//! ## Key invariants
//!
//! - **Default deny**: a fresh context holds no grants, and nothing is inherited.
//! - **Tiers only go up**: effective tier = max(declared, overrides). A
//!   downgrade request is a [`PolicyViolation`], never applied.
//! - **Path traversal blocked**: capabilities containing ".." are never granted.

pub mod capability;
pub mod error;
pub mod policy;
pub mod profile;
pub mod trust;

pub use capability::{check_scope_hash, scope_hash, Capability, CapabilityStore, Effect};
pub use error::{CapabilityViolation, OverrideSource, PolicyError, PolicyViolation};
pub use policy::{
    AuditConfig, FreezeTrigger, GateConfig, LogLevel, MatchRule, MatchSpec, MerkleRootHolder,
    MerkleSigner, PolicyConstraintSet, TimeSource, TrustOverride,
};
pub use profile::{ExecClass, NodeProfile, NodeType, StaticProfile};
pub use trust::{
    ApprovalRecord, ApprovalSet, TierLock, TrustAssessment, TrustTier, TrustTierEnforcer,
};
