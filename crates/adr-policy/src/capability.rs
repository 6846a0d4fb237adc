// capability.rs — Capabilities, effects and the per-run capability store.
//
// A capability is a `kind:scope` string ("fs:/data/out", "net:api.example.com").
// The empty set is the default for every context: nothing is inherited and
// nothing is granted implicitly. Grants may use glob scopes ("fs:/data/**")
// that cover concrete requirements of the same kind.
//
// Grants are append-only within a run. The only retraction is `revoke_all`,
// which the runtime calls on Hard Stop and Emergency Freeze.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CapabilityViolation, PolicyError};
use crate::profile::NodeProfile;

/// A scoped permission, e.g. `fs:/data/out`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Filesystem capability for a path or glob.
    pub fn fs(path: impl AsRef<str>) -> Self {
        Self(format!("fs:{}", path.as_ref()))
    }

    /// Network capability for a host or glob.
    pub fn net(host: impl AsRef<str>) -> Self {
        Self(format!("net:{}", host.as_ref()))
    }

    /// Process execution capability for a command.
    pub fn exec(command: impl AsRef<str>) -> Self {
        Self(format!("exec:{}", command.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first ':'.
    pub fn kind(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(k, _)| k)
    }

    /// The part after the first ':' (empty for bare kinds).
    pub fn scope(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, s)| s)
    }

    pub fn has_traversal(&self) -> bool {
        let s = self.0.as_str();
        s.contains("..") || s.contains("%2e%2e") || s.contains("%2E%2E")
    }

    /// Does this grant cover `required`? Exact match, or a glob scope of the
    /// same kind. Invalid patterns and traversal never match (fail-closed).
    pub fn covers(&self, required: &Capability) -> bool {
        if self.has_traversal() || required.has_traversal() {
            return false;
        }
        if self == required {
            return true;
        }
        if self.kind() != required.kind() {
            return false;
        }
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        match Pattern::new(self.scope()) {
            Ok(p) => p.matches_with(required.scope(), options),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declared side-effect class, e.g. `fs_write` or `fs_write:/data`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Effect(String);

impl Effect {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `fs_write` matches `fs_write` and `fs_write:/data`, not `fs_write_all`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        match self.0.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a capability scope: SHA-256 over the sorted, deduplicated
/// capability strings joined by newlines. Compilers stamp this onto each
/// node as `cap_scope_hash`.
pub fn scope_hash<'a>(capabilities: impl IntoIterator<Item = &'a Capability>) -> String {
    let sorted: BTreeSet<&str> = capabilities.into_iter().map(Capability::as_str).collect();
    let mut hasher = Sha256::new();
    for (i, cap) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(cap.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Per-run store of granted capabilities, keyed by execution context.
#[derive(Debug, Clone, Default)]
pub struct CapabilityStore {
    scopes: BTreeMap<String, BTreeSet<Capability>>,
}

impl CapabilityStore {
    /// A store where every context starts with nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability to a context's scope. Returns `false` if it was
    /// already granted.
    pub fn grant(&mut self, context: &str, capability: Capability) -> Result<bool, PolicyError> {
        if capability.has_traversal() {
            return Err(PolicyError::PathTraversal {
                capability: capability.to_string(),
            });
        }
        if let Err(e) = Pattern::new(capability.scope()) {
            return Err(PolicyError::InvalidPattern {
                pattern: capability.to_string(),
                reason: e.to_string(),
            });
        }
        tracing::info!(context, capability = %capability, "capability granted");
        Ok(self
            .scopes
            .entry(context.to_string())
            .or_default()
            .insert(capability))
    }

    /// Explicitly copy every grant of `from` into `to`. Contexts never
    /// inherit implicitly; this is the only way grants cross contexts.
    pub fn propagate(&mut self, from: &str, to: &str) -> usize {
        let Some(source) = self.scopes.get(from).cloned() else {
            return 0;
        };
        let target = self.scopes.entry(to.to_string()).or_default();
        let before = target.len();
        target.extend(source);
        target.len() - before
    }

    /// Drop every grant of a context. Returns how many were revoked.
    pub fn revoke_all(&mut self, context: &str) -> usize {
        let revoked = self.scopes.remove(context).map_or(0, |s| s.len());
        if revoked > 0 {
            tracing::warn!(context, revoked, "all capability grants revoked");
        }
        revoked
    }

    pub fn granted(&self, context: &str) -> impl Iterator<Item = &Capability> {
        self.scopes.get(context).into_iter().flatten()
    }

    pub fn is_granted(&self, context: &str, required: &Capability) -> bool {
        self.granted(context).any(|g| g.covers(required))
    }

    /// Required capabilities of `node` not covered in `context`.
    pub fn missing(&self, node: &dyn NodeProfile, context: &str) -> Vec<Capability> {
        node.capabilities()
            .iter()
            .filter(|c| !self.is_granted(context, c))
            .cloned()
            .collect()
    }

    /// Fail if the node's scope hash is stale or any requirement is ungranted.
    /// The scope-hash check comes first: it is the more severe condition.
    pub fn check(&self, node: &dyn NodeProfile, context: &str) -> Result<(), CapabilityViolation> {
        check_scope_hash(node)?;
        if let Some(cap) = self.missing(node, context).into_iter().next() {
            return Err(CapabilityViolation::Missing {
                node: node.node_id().to_string(),
                context: context.to_string(),
                capability: cap.to_string(),
            });
        }
        Ok(())
    }
}

/// Compare the node's stamped scope hash against its declared capabilities.
pub fn check_scope_hash(node: &dyn NodeProfile) -> Result<(), CapabilityViolation> {
    let expected = scope_hash(node.capabilities());
    if node.cap_scope_hash() != expected {
        return Err(CapabilityViolation::ScopeHashMismatch {
            node: node.node_id().to_string(),
            expected,
            found: node.cap_scope_hash().to_string(),
        });
    }
    Ok(())
}
