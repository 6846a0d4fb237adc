//! # adr-runtime
//!
//! Puts the ADR safety core together:
//!
//! - [`DecisionGate`] computes the binary safety verdict and combines it with
//!   the external semantic score.
//! - [`Run`] executes a [`adr_graph::ValidatedGraph`] wave by wave, checking
//!   the kill switch immediately before every node and logging every
//!   decision to the shared action log.
//! - [`SelfModPipeline`] moves graph and code patches through
//!   `Proposed → Checked → HumanGated → Deployed → RolledBack`, publishing
//!   through the [`ReleaseRegistry`].
//!
//! The library is synchronous. Concurrency inside a run uses scoped threads;
//! the kill switch and the action log are the only shared state.

pub mod error;
pub mod executor;
pub mod gate;
pub mod registry;
pub mod selfmod;

pub use error::{RuntimeError, SelfModError};
pub use executor::{
    forward_kill_switch, ActionHandler, HandlerError, NodeStatus, Run, RunEvent, RunParts,
    RunReport, RunState,
};
pub use gate::{
    normalize_semantic, Decision, DecisionGate, ExecutionDecision, FixedScore, GateContext,
    PredicateOutcome, SafetyPredicate, ScoreError, SemanticScorer,
};
pub use registry::{CodeArtifact, Release, ReleaseRegistry};
pub use selfmod::{
    CodeVerifier, Patch, PatchContent, PatchState, SelfModPipeline, VerificationStage,
};
