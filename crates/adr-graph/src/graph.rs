// graph.rs — The immutable, validated graph handle.
//
// Nodes live in an arena sorted by id, so an arena index order is also the
// id order and Kahn's algorithm can break ties by taking the smallest ready
// index. Everything derived from the structure (order, levels, effective
// effects, deterministic closure) is computed once in `validate` and never
// changes; a new graph or a new policy means a new handle.

use std::collections::{BTreeMap, BTreeSet};

use adr_policy::{Capability, Effect, ExecClass, NodeProfile, PolicyConstraintSet, TrustTier};

use crate::error::StructuralError;
use crate::spec::{GraphSpec, NodeId, NodeType, RiskLevel};

/// A node whose required annotations are all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub effects: BTreeSet<Effect>,
    /// `effects` plus the effects of every upstream node.
    pub effective_effects: BTreeSet<Effect>,
    pub capabilities: BTreeSet<Capability>,
    pub trust_tier: TrustTier,
    pub exec_class: ExecClass,
    pub deterministic_mode: bool,
    pub cap_scope_hash: String,
    pub cancellable: bool,
    pub compensation: Option<String>,
    pub risk: RiskLevel,
    pub description: String,
    /// The root intent this node serves.
    pub root: NodeId,
}

impl NodeProfile for ValidatedNode {
    fn node_id(&self) -> &str {
        self.id.as_str()
    }

    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn declared_effects(&self) -> &BTreeSet<Effect> {
        &self.effects
    }

    fn effective_effects(&self) -> &BTreeSet<Effect> {
        &self.effective_effects
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
        self.trust_tier
    }
}

/// Immutable handle returned by [`crate::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    pub(crate) version: u64,
    pub(crate) source: GraphSpec,
    pub(crate) nodes: Vec<ValidatedNode>,
    pub(crate) index: BTreeMap<NodeId, usize>,
    pub(crate) deps: Vec<Vec<usize>>,
    pub(crate) dependents: Vec<Vec<usize>>,
    pub(crate) order: Vec<usize>,
    pub(crate) levels: Vec<Vec<usize>>,
    pub(crate) deterministic_closure: Vec<bool>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) policy_hash: String,
    pub(crate) graph_hash: String,
}

impl ValidatedGraph {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The submitted document this handle was built from.
    pub fn source(&self) -> &GraphSpec {
        &self.source
    }

    /// Hash of the policy this graph was validated against.
    pub fn policy_hash(&self) -> &str {
        &self.policy_hash
    }

    /// SHA-256 of the canonical JSON encoding of the source document.
    pub fn graph_hash(&self) -> &str {
        &self.graph_hash
    }

    pub fn is_valid_for(&self, policy: &PolicyConstraintSet) -> bool {
        self.policy_hash == policy.policy_hash()
    }

    /// Validate the same document again, against `policy`.
    pub fn revalidate(&self, policy: &PolicyConstraintSet) -> Result<ValidatedGraph, StructuralError> {
        crate::validate::validate(self.source.clone(), policy)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: &NodeId) -> Option<&ValidatedNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ValidatedNode> {
        self.nodes.iter()
    }

    /// Topological execution order, ties broken by node id.
    pub fn order(&self) -> impl Iterator<Item = &ValidatedNode> + '_ {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    pub fn order_ids(&self) -> Vec<NodeId> {
        self.order().map(|n| n.id.clone()).collect()
    }

    /// Groups of nodes with no dependency between them, in execution order.
    /// Level k holds the nodes whose longest dependency chain has length k.
    pub fn levels(&self) -> Vec<Vec<&ValidatedNode>> {
        self.levels
            .iter()
            .map(|lvl| lvl.iter().map(|&i| &self.nodes[i]).collect())
            .collect()
    }

    /// Direct dependencies of `id`, in id order.
    pub fn dependencies(&self, id: &NodeId) -> Vec<&ValidatedNode> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `id`, in id order.
    pub fn dependents(&self, id: &NodeId) -> Vec<&ValidatedNode> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Transitive union of the node's own effects and those of everything it
    /// depends on. Served from the table built at validation.
    pub fn propagate_effects(&self, id: &NodeId) -> Option<&BTreeSet<Effect>> {
        self.node(id).map(|n| &n.effective_effects)
    }

    /// For a deterministic_mode node: whether every upstream node is also
    /// deterministic. Always true for other nodes.
    pub fn deterministic_inputs(&self, id: &NodeId) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        !self.nodes[i].deterministic_mode || self.deps[i].iter().all(|&d| self.deterministic_closure[d])
    }

    /// Every node transitively downstream of `id`, excluding `id`.
    pub fn downstream(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &d in &self.dependents[i] {
                if out.insert(self.nodes[d].id.clone()) {
                    stack.push(d);
                }
            }
        }
        out
    }
}
