// spec.rs — Wire format of a compiled plan graph.
//
// This is untrusted input. Annotations the validator requires are
// `Option`s here so that an absent field is reported as a StructuralError
// rather than silently defaulted.

use std::fmt;
use std::path::Path;

pub use adr_policy::NodeType;
use adr_policy::{Capability, Effect, ExecClass, TrustTier};
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

/// Node identifier. Ordered lexicographically for tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// One action in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    pub id: NodeId,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<Vec<Effect>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_tier: Option<TrustTier>,
    #[serde(default = "default_exec_class")]
    pub exec_class: ExecClass,
    #[serde(default)]
    pub deterministic_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_scope_hash: Option<String>,
    #[serde(default = "default_true")]
    pub cancellable: bool,
    /// Name of the rollback action run on soft stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub description: String,
}

fn default_exec_class() -> ExecClass {
    ExecClass::Synchronous
}

fn default_true() -> bool {
    true
}

impl ActionSpec {
    /// A fully annotated node with no effects or capabilities, its scope hash
    /// stamped. Builders below keep the hash in step.
    pub fn new(id: impl Into<String>, node_type: NodeType, tier: TrustTier) -> Self {
        Self {
            id: NodeId::new(id),
            node_type,
            effects: Some(Vec::new()),
            capabilities: Some(Vec::new()),
            trust_tier: Some(tier),
            exec_class: ExecClass::Synchronous,
            deterministic_mode: false,
            cap_scope_hash: Some(adr_policy::scope_hash(std::iter::empty::<&Capability>())),
            cancellable: true,
            compensation: None,
            risk: RiskLevel::Low,
            description: String::new(),
        }
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.get_or_insert_with(Vec::new).extend(effects);
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        let list = self.capabilities.get_or_insert_with(Vec::new);
        list.extend(caps);
        self.cap_scope_hash = Some(adr_policy::scope_hash(list.iter()));
        self
    }

    pub fn with_exec_class(mut self, exec_class: ExecClass) -> Self {
        self.exec_class = exec_class;
        self
    }

    pub fn deterministic(mut self) -> Self {
        self.deterministic_mode = true;
        self
    }

    pub fn with_compensation(mut self, compensation: impl Into<String>) -> Self {
        self.compensation = Some(compensation.into());
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `from` produces input for `to`.
    #[default]
    ProducesInput,
    /// `from` must complete before `to` starts.
    CompletesBefore,
}

/// `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl EdgeSpec {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: NodeId::new(from),
            to: NodeId::new(to),
            kind: EdgeKind::ProducesInput,
        }
    }
}

/// A compiled plan as submitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub roots: Vec<NodeId>,
    #[serde(default)]
    pub nodes: Vec<ActionSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl GraphSpec {
    pub fn from_json_str(s: &str) -> Result<Self, StructuralError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, StructuralError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load by extension: `.yaml`/`.yml` as YAML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StructuralError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StructuralError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, StructuralError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
