// registry.rs — Versioned releases of the active graph and agent code.
//
// A release is immutable once published. The registry holds an ordered
// history; the last entry is active. Publishing pushes a fully built release
// under a single write lock, so readers see either the old release or the new
// one and never a mix. The oldest releases are dropped past `retain`, and a
// rollback is possible only while the previous release is still held.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use adr_graph::ValidatedGraph;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SelfModError;

/// A piece of agent code carried by a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    /// Logical module name, e.g. `planner/rank.wasm`.
    pub name: String,
    pub content: Vec<u8>,
    /// SHA-256 of `content`, hex.
    pub digest: String,
}

impl CodeArtifact {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let digest = format!("{:x}", Sha256::digest(&content));
        Self {
            name: name.into(),
            content,
            digest,
        }
    }

    /// Digest still matches the bytes.
    pub fn is_intact(&self) -> bool {
        format!("{:x}", Sha256::digest(&self.content)) == self.digest
    }
}

#[derive(Debug, Clone)]
pub struct Release {
    pub version: u64,
    /// The patch that produced this release; `None` for the initial one.
    pub patch_id: Option<Uuid>,
    pub graph: Arc<ValidatedGraph>,
    pub code: BTreeMap<String, CodeArtifact>,
}

pub struct ReleaseRegistry {
    history: RwLock<Vec<Arc<Release>>>,
    retain: usize,
}

impl ReleaseRegistry {
    pub const DEFAULT_RETAIN: usize = 8;

    /// Start with `graph` as release 1.
    pub fn new(graph: Arc<ValidatedGraph>) -> Self {
        Self::with_retention(graph, Self::DEFAULT_RETAIN)
    }

    /// `retain` is clamped to at least 2 so one rollback target is kept.
    pub fn with_retention(graph: Arc<ValidatedGraph>, retain: usize) -> Self {
        let initial = Release {
            version: 1,
            patch_id: None,
            graph,
            code: BTreeMap::new(),
        };
        Self {
            history: RwLock::new(vec![Arc::new(initial)]),
            retain: retain.max(2),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Release>>> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Release>>> {
        self.history.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active(&self) -> Arc<Release> {
        let history = self.read();
        // History is never empty: rollback refuses to pop the last release.
        Arc::clone(&history[history.len() - 1])
    }

    pub fn active_graph(&self) -> Arc<ValidatedGraph> {
        Arc::clone(&self.active().graph)
    }

    /// Versions currently held, oldest first.
    pub fn retained(&self) -> Vec<u64> {
        self.read().iter().map(|r| r.version).collect()
    }

    pub fn can_roll_back(&self) -> bool {
        self.read().len() > 1
    }

    /// Make a new release active. The graph and code of the new release are
    /// `graph` (or the active graph) with `code` merged over the active code.
    pub fn publish(
        &self,
        patch_id: Uuid,
        graph: Option<Arc<ValidatedGraph>>,
        code: Vec<CodeArtifact>,
    ) -> Arc<Release> {
        let mut history = self.write();
        let current = Arc::clone(&history[history.len() - 1]);
        let mut merged = current.code.clone();
        for artifact in code {
            merged.insert(artifact.name.clone(), artifact);
        }
        let release = Arc::new(Release {
            version: current.version + 1,
            patch_id: Some(patch_id),
            graph: graph.unwrap_or_else(|| Arc::clone(&current.graph)),
            code: merged,
        });
        history.push(Arc::clone(&release));
        let excess = history.len().saturating_sub(self.retain);
        history.drain(..excess);
        tracing::info!(version = release.version, %patch_id, "release published");
        release
    }

    /// Drop the active release and reactivate the one before it.
    pub fn rollback(&self) -> Result<Arc<Release>, SelfModError> {
        let mut history = self.write();
        if history.len() < 2 {
            return Err(SelfModError::NothingToRollBack);
        }
        let dropped = history.pop();
        let restored = Arc::clone(&history[history.len() - 1]);
        tracing::warn!(
            from = dropped.map(|r| r.version),
            to = restored.version,
            "release rolled back"
        );
        Ok(restored)
    }
}
