//! # adr-audit
//!
//! Append-only, hash-chained action log for the ADR safety core.
//!
//! Every gate decision (executed *and* blocked), kill-switch transition and
//! self-modification step is recorded as an [`ActionLogEntry`]. Each entry's
//! `merkle_hash` is `SHA-256(payload || previous_hash)`; [`ActionLog::verify_chain`]
//! recomputes the chain and halts further appends on any break.
//!
//! ## Quick Example
//!
//! ```rust
//! use adr_audit::{ActionLog, EntryDraft, EntryKind, Justification};
//!
//! let mut log = ActionLog::in_memory();
//! log.append(
//!     EntryDraft::new(EntryKind::Blocked, "write-report")
//!         .with_why(Justification::new("semantic confidence below threshold")),
//! )
//! .unwrap();
//! log.verify_chain().unwrap();
//! ```

pub mod attestation;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod log;
pub mod shared;

pub use attestation::{Attestation, ChainAttestor};
pub use entry::{
    ActionLogEntry, AuditRecord, DecisionRecord, EntryDraft, EntryKind, Justification,
    TrustRecord,
};
pub use error::AuditError;
pub use log::ActionLog;
pub use shared::SharedActionLog;
