//! # adr-graph
//!
//! The Graph Engine of the ADR safety core.
//!
//! A compiled plan arrives as an untrusted [`GraphSpec`]. [`validate`]
//! checks it (acyclic, no dangling edges, required annotations present,
//! every node reachable from exactly one root intent) and returns an
//! immutable [`ValidatedGraph`] with:
//!
//! - a topological order with ties broken by node id,
//! - concurrency levels for the scheduler,
//! - the transitive effect set of every node,
//! - the hash of the policy it was validated against.
//!
//! A changed policy means the graph must be validated again; the runtime
//! refuses a handle whose policy hash does not match.

pub mod error;
pub mod graph;
pub mod spec;
pub mod validate;

pub use error::StructuralError;
pub use graph::{ValidatedGraph, ValidatedNode};
pub use spec::{ActionSpec, EdgeKind, EdgeSpec, GraphSpec, NodeId, NodeType, RiskLevel};
pub use validate::validate;
