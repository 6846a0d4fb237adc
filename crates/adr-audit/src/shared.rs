// shared.rs — The process-wide handle to the action log.
//
// Node execution is concurrent, but the chain is not: every append must see
// the latest head. A single mutex around the log is the linearization point.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::entry::{ActionLogEntry, AuditRecord, EntryDraft};
use crate::error::AuditError;
use crate::log::ActionLog;

/// Cloneable, thread-safe handle to one [`ActionLog`].
#[derive(Clone)]
pub struct SharedActionLog {
    inner: Arc<Mutex<ActionLog>>,
}

impl SharedActionLog {
    pub fn new(log: ActionLog) -> Self {
        Self {
            inner: Arc::new(Mutex::new(log)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ActionLog>, AuditError> {
        self.inner.lock().map_err(|_| AuditError::Poisoned)
    }

    pub fn append(&self, draft: EntryDraft) -> Result<ActionLogEntry, AuditError> {
        self.lock()?.append(draft)
    }

    pub fn anchor_heartbeat(&self) -> Result<ActionLogEntry, AuditError> {
        self.lock()?.anchor_heartbeat()
    }

    pub fn maybe_anchor(&self) -> Result<Option<ActionLogEntry>, AuditError> {
        self.lock()?.maybe_anchor(Utc::now())
    }

    pub fn verify_chain(&self) -> Result<(), AuditError> {
        self.lock()?.verify_chain()
    }

    pub fn flush(&self) -> Result<(), AuditError> {
        self.lock()?.flush()
    }

    pub fn is_halted(&self) -> bool {
        self.lock().map(|log| log.is_halted()).unwrap_or(true)
    }

    pub fn resume_after_intervention(
        &self,
        operator: &str,
        note: &str,
    ) -> Result<ActionLogEntry, AuditError> {
        self.lock()?.resume_after_intervention(operator, note)
    }

    /// Snapshot of every entry appended so far.
    pub fn entries(&self) -> Result<Vec<ActionLogEntry>, AuditError> {
        Ok(self.lock()?.entries().to_vec())
    }

    pub fn export_records(&self) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self.lock()?.export_records())
    }

    /// Run `f` with exclusive access, e.g. to attest the head.
    pub fn with_log<T>(&self, f: impl FnOnce(&ActionLog) -> T) -> Result<T, AuditError> {
        Ok(f(&*self.lock()?))
    }
}
