// policy.rs — The compiled Policy Constraint Set.
//
// Produced by an external policy compiler and treated as opaque input: the
// core only applies it. Loaded from YAML:
//
// ```yaml
// domain: data-pipeline
// version: "3"
// trust_overrides:
//   - match: fs_write                     # effect prefix
//     set_tier: human_required
//   - match: { capability: "net:*" }      # structured rule
//     set_tier: ai_proposed
//   - match: { node_type: gate }
//     set_tier: human_required
//     immutable: true                     # no runtime override at all
// freeze_triggers: [cap_scope_hash_mismatch, contract_failure]
// forbidden_effects: [hw_actuate]
// gate:
//   semantic_threshold: 0.8
//   node_timeout_ms: 30000
// kill_switch:
//   require_physical_channel: true
//   channels:
//     - kind: hardware_gpio
//       pin: 17
// audit:
//   anchor_interval_ms: 60000
//   log_level: full
//   time_source: secure_ntp
//   merkle_root_holder:
//     kind: multi_party
//     signers: [{ role: operator }, { role: regulator, id: reg-7 }]
// ```
//
// `policy_hash` is the SHA-256 of the source document. Validated graphs
// record it, so a changed policy forces re-validation.

use std::path::Path;

use adr_killswitch::KillSwitchConfig;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capability::Capability;
use crate::error::PolicyError;
use crate::profile::{ExecClass, NodeProfile, NodeType};
use crate::trust::TrustTier;

/// Conditions that force the kill switch into EmergencyFrozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeTrigger {
    /// A node's handler reported a broken pre/post-condition.
    ContractFailure,
    /// A node tried to run without a required grant.
    UnverifiedCapabilityUse,
    /// Something tried to lower a trust tier.
    TrustTierDowngradeAttempt,
    /// A node's cap_scope_hash no longer matches its capability scope.
    CapScopeHashMismatch,
    /// A deterministic_mode node depends on a non-deterministic one.
    DeterministicModeViolation,
}

impl std::fmt::Display for FreezeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FreezeTrigger::ContractFailure => "contract_failure",
            FreezeTrigger::UnverifiedCapabilityUse => "unverified_capability_use",
            FreezeTrigger::TrustTierDowngradeAttempt => "trust_tier_downgrade_attempt",
            FreezeTrigger::CapScopeHashMismatch => "cap_scope_hash_mismatch",
            FreezeTrigger::DeterministicModeViolation => "deterministic_mode_violation",
        };
        write!(f, "{}", s)
    }
}

/// Structured match rule. Every present field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchRule {
    /// Effect prefix, e.g. "fs_write" matches "fs_write:/data". Compared
    /// against the node's effective effects, inherited ones included.
    #[serde(default)]
    pub effect: Option<String>,
    #[serde(default)]
    pub node_type: Option<NodeType>,
    /// Glob over capability strings, e.g. "net:*".
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub exec_class: Option<ExecClass>,
}

/// A `match:` clause: a bare effect prefix or a structured rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchSpec {
    Effect(String),
    Rule(MatchRule),
}

impl MatchSpec {
    pub fn matches(&self, node: &dyn NodeProfile) -> bool {
        match self {
            MatchSpec::Effect(prefix) => effect_matches(node, prefix),
            MatchSpec::Rule(rule) => {
                if let Some(prefix) = &rule.effect {
                    if !effect_matches(node, prefix) {
                        return false;
                    }
                }
                if let Some(pattern) = &rule.capability {
                    let Ok(p) = Pattern::new(pattern) else {
                        return false;
                    };
                    if !node
                        .capabilities()
                        .iter()
                        .any(|c| p.matches(c.as_str()))
                    {
                        return false;
                    }
                }
                if let Some(kind) = rule.node_type {
                    if node.node_type() != kind {
                        return false;
                    }
                }
                if let Some(class) = rule.exec_class {
                    if node.exec_class() != class {
                        return false;
                    }
                }
                true
            }
        }
    }

    fn validate(&self) -> Result<(), PolicyError> {
        match self {
            MatchSpec::Effect(prefix) if prefix.trim().is_empty() => {
                Err(PolicyError::Invalid("empty effect match".to_string()))
            }
            MatchSpec::Effect(_) => Ok(()),
            MatchSpec::Rule(rule) => {
                if rule.effect.is_none()
                    && rule.node_type.is_none()
                    && rule.capability.is_none()
                    && rule.exec_class.is_none()
                {
                    return Err(PolicyError::Invalid(
                        "match rule must constrain at least one field".to_string(),
                    ));
                }
                if let Some(pattern) = &rule.capability {
                    Pattern::new(pattern).map_err(|e| PolicyError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                }
                Ok(())
            }
        }
    }
}

fn effect_matches(node: &dyn NodeProfile, prefix: &str) -> bool {
    node.effective_effects()
        .iter()
        .any(|e| e.matches_prefix(prefix))
}

/// A trust override: raise matching nodes to `set_tier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustOverride {
    #[serde(rename = "match")]
    pub match_rule: MatchSpec,
    pub set_tier: TrustTier,
    /// Any attempt to lower a matched node's tier freezes the run.
    #[serde(default)]
    pub downgrade_forbidden: bool,
    /// Matched nodes accept no runtime override.
    #[serde(default)]
    pub immutable: bool,
}

/// Execution decision gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum `confidence_semantic` for execution.
    #[serde(default = "default_threshold")]
    pub semantic_threshold: f64,
    /// Per-node execution timeout, enforced through the cancellation token.
    #[serde(default)]
    pub node_timeout_ms: Option<u64>,
    /// Retries of a failed semantic-score lookup.
    #[serde(default)]
    pub resolver_retries: u32,
    #[serde(default)]
    pub resolver_backoff_ms: u64,
}

fn default_threshold() -> f64 {
    0.80
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: default_threshold(),
            node_timeout_ms: None,
            resolver_retries: 0,
            resolver_backoff_ms: 0,
        }
    }
}

/// How much of each decision goes into the justification detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Reason only.
    Minimal,
    #[default]
    Standard,
    /// Reason plus the full evidence payload.
    Full,
}

/// Who holds the Merkle roots that anchor the action log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MerkleRootHolder {
    #[default]
    Local,
    /// An external certifier, e.g. a regulator.
    Certifier { id: String },
    MultiParty { signers: Vec<MerkleSigner> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleSigner {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Clock the log timestamps are taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    #[default]
    LocalClock,
    SecureNtp,
    HardwareRtc,
}

/// Action log settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Heartbeat anchor interval.
    #[serde(default)]
    pub anchor_interval_ms: Option<u64>,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub merkle_root_holder: MerkleRootHolder,
    #[serde(default)]
    pub time_source: TimeSource,
}

impl AuditConfig {
    fn validate(&self) -> Result<(), PolicyError> {
        match &self.merkle_root_holder {
            MerkleRootHolder::Local => {}
            MerkleRootHolder::Certifier { id } if id.trim().is_empty() => {
                return Err(PolicyError::Invalid(
                    "merkle_root_holder certifier needs an id".to_string(),
                ))
            }
            MerkleRootHolder::Certifier { .. } => {}
            MerkleRootHolder::MultiParty { signers } => {
                if signers.len() < 2 {
                    return Err(PolicyError::Invalid(
                        "multi_party merkle_root_holder needs at least two signers".to_string(),
                    ));
                }
                if signers.iter().any(|s| s.role.trim().is_empty()) {
                    return Err(PolicyError::Invalid(
                        "every merkle signer needs a role".to_string(),
                    ));
                }
            }
        }
        if self.anchor_interval_ms == Some(0) {
            return Err(PolicyError::Invalid(
                "anchor_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The compiled policy constraint set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConstraintSet {
    pub domain: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub trust_overrides: Vec<TrustOverride>,
    #[serde(default)]
    pub freeze_triggers: Vec<FreezeTrigger>,
    /// Effect prefixes no node may carry, directly or transitively.
    #[serde(default)]
    pub forbidden_effects: Vec<String>,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(skip)]
    policy_hash: String,
}

impl Default for PolicyConstraintSet {
    /// No overrides, no freeze triggers, default gate threshold.
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            version: String::new(),
            trust_overrides: Vec::new(),
            freeze_triggers: Vec::new(),
            forbidden_effects: Vec::new(),
            gate: GateConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            audit: AuditConfig::default(),
            policy_hash: String::new(),
        }
        .sealed()
    }
}

impl PolicyConstraintSet {
    /// Parse and validate a YAML policy. The hash covers the source text.
    pub fn from_yaml_str(source: &str) -> Result<Self, PolicyError> {
        let mut policy: PolicyConstraintSet = serde_yaml::from_str(source)?;
        policy.validate()?;
        policy.policy_hash = sha256_hex(source.as_bytes());
        tracing::debug!(domain = %policy.domain, hash = %policy.policy_hash, "policy loaded");
        Ok(policy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let source =
            std::fs::read_to_string(path.as_ref()).map_err(|source| PolicyError::ReadFailed {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&source)
    }

    /// Recompute the hash after building or editing a policy in code.
    /// The hash then covers the JSON encoding of the set.
    pub fn sealed(mut self) -> Self {
        let encoded = serde_json::to_vec(&self).unwrap_or_default();
        self.policy_hash = sha256_hex(&encoded);
        self
    }

    pub fn policy_hash(&self) -> &str {
        &self.policy_hash
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.domain.trim().is_empty() {
            return Err(PolicyError::Invalid("domain must not be empty".to_string()));
        }
        let threshold = self.gate.semantic_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(PolicyError::Invalid(format!(
                "semantic_threshold {} outside [0, 1]",
                threshold
            )));
        }
        for rule in &self.trust_overrides {
            rule.match_rule.validate()?;
        }
        self.kill_switch
            .validate()
            .map_err(|e| PolicyError::Invalid(e.to_string()))?;
        self.audit.validate()?;
        Ok(())
    }

    pub fn has_freeze_trigger(&self, trigger: FreezeTrigger) -> bool {
        self.freeze_triggers.contains(&trigger)
    }

    pub fn semantic_threshold(&self) -> f64 {
        self.gate.semantic_threshold
    }

    /// Is this effect forbidden by any prefix in `forbidden_effects`?
    pub fn is_effect_forbidden(&self, effect: &crate::capability::Effect) -> bool {
        self.forbidden_effects
            .iter()
            .any(|prefix| effect.matches_prefix(prefix))
    }

    /// Whether the active policy mandates a physical kill-switch channel.
    pub fn requires_physical_kill_switch(&self) -> bool {
        self.kill_switch.require_physical_channel
    }

    /// Capabilities referenced by structured override rules. Used by the
    /// CLI to explain which grants will raise tiers.
    pub fn capability_patterns(&self) -> Vec<Capability> {
        self.trust_overrides
            .iter()
            .filter_map(|o| match &o.match_rule {
                MatchSpec::Rule(MatchRule {
                    capability: Some(c),
                    ..
                }) => Some(Capability::new(c.clone())),
                _ => None,
            })
            .collect()
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
