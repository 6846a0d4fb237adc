// profile.rs — The view of a node that policy evaluation needs.
//
// Policy never sees the graph. It sees a `NodeProfile`: identity, node type,
// declared and effective effects, capabilities, exec class, scope hash and
// declared tier. The graph engine implements this for validated nodes;
// `StaticProfile` covers everything that is not a graph node
// (self-modification patches, tests).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::capability::{scope_hash, Capability, Effect};
use crate::trust::TrustTier;

/// Role of a node in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A root: the intent the rest of the plan serves.
    Intent,
    #[default]
    Step,
    /// A decision point with no effects of its own.
    Gate,
    /// A mandatory audit point. Always human_required, whatever it declares.
    Checkpoint,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Intent => write!(f, "intent"),
            NodeType::Step => write!(f, "step"),
            NodeType::Gate => write!(f, "gate"),
            NodeType::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

/// How a node may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecClass {
    /// Runs inline on the executor thread.
    Synchronous,
    /// Runs on its own thread, concurrently with independent nodes.
    Isolated,
    /// May wait on external systems (HTTP, DB, human approval).
    Orchestrated,
    /// Must never block: may not sit behind a human gate.
    RealtimeSafe,
}

impl std::fmt::Display for ExecClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecClass::Synchronous => write!(f, "synchronous"),
            ExecClass::Isolated => write!(f, "isolated"),
            ExecClass::Orchestrated => write!(f, "orchestrated"),
            ExecClass::RealtimeSafe => write!(f, "realtime_safe"),
        }
    }
}

/// Read-only view of a node for capability and trust checks.
pub trait NodeProfile {
    fn node_id(&self) -> &str;
    fn node_type(&self) -> NodeType {
        NodeType::Step
    }
    fn declared_effects(&self) -> &BTreeSet<Effect>;
    /// Own effects plus everything inherited through the graph. Override
    /// rules match against this set.
    fn effective_effects(&self) -> &BTreeSet<Effect> {
        self.declared_effects()
    }
    fn capabilities(&self) -> &BTreeSet<Capability>;
    fn exec_class(&self) -> ExecClass;
    fn cap_scope_hash(&self) -> &str;
    fn declared_tier(&self) -> TrustTier;
}

/// A free-standing profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProfile {
    pub id: String,
    pub node_type: NodeType,
    pub effects: BTreeSet<Effect>,
    pub capabilities: BTreeSet<Capability>,
    pub exec_class: ExecClass,
    pub cap_scope_hash: String,
    pub tier: TrustTier,
}

impl StaticProfile {
    pub fn new(id: impl Into<String>, tier: TrustTier, exec_class: ExecClass) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Step,
            effects: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            exec_class,
            cap_scope_hash: scope_hash(std::iter::empty::<&Capability>()),
            tier,
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Add capabilities and re-stamp the scope hash to match them.
    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self.cap_scope_hash = scope_hash(&self.capabilities);
        self
    }
}

impl NodeProfile for StaticProfile {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn declared_effects(&self) -> &BTreeSet<Effect> {
        &self.effects
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    fn exec_class(&self) -> ExecClass {
        self.exec_class
    }

    fn cap_scope_hash(&self) -> &str {
        &self.cap_scope_hash
    }

    fn declared_tier(&self) -> TrustTier {
        self.tier
    }
}
