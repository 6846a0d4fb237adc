// validate.rs — Turn an untrusted GraphSpec into a ValidatedGraph.
//
// Passes, in order:
//   1. annotations and duplicate ids (arena sorted by id)
//   2. edges: dangling references, dedup, adjacency
//   3. topological order (Kahn, smallest ready id first) and cycle report
//   4. roots and single-root reachability
//   5. compensation for non-cancellable nodes
//   6. derived tables in one bottom-up pass over the order: levels,
//      effective effects, deterministic closure
//
// No pass recurses, so graph depth is bounded only by memory.

use std::collections::{BTreeMap, BTreeSet};

use adr_policy::PolicyConstraintSet;
use sha2::{Digest, Sha256};

use crate::error::StructuralError;
use crate::graph::{ValidatedGraph, ValidatedNode};
use crate::spec::{ActionSpec, GraphSpec, NodeId, NodeType};

/// Validate `spec` and bind the result to `policy`.
pub fn validate(
    spec: GraphSpec,
    policy: &PolicyConstraintSet,
) -> Result<ValidatedGraph, StructuralError> {
    if spec.nodes.is_empty() {
        return Err(StructuralError::Empty);
    }

    let mut sorted: Vec<&ActionSpec> = spec.nodes.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut index = BTreeMap::new();
    for (i, node) in sorted.iter().enumerate() {
        if index.insert(node.id.clone(), i).is_some() {
            return Err(StructuralError::DuplicateNode {
                node: node.id.to_string(),
            });
        }
    }

    // Pass 2: edges.
    let n = sorted.len();
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for edge in &spec.edges {
        let lookup = |id: &NodeId| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| StructuralError::DanglingEdge {
                    from: edge.from.to_string(),
                    to: edge.to.to_string(),
                    missing: id.to_string(),
                })
        };
        let from = lookup(&edge.from)?;
        let to = lookup(&edge.to)?;
        deps[to].insert(from);
        dependents[from].insert(to);
    }

    // Pass 3: Kahn's algorithm. The ready set is ordered, so the smallest id
    // always goes first.
    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }
    if order.len() < n {
        let nodes = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| sorted[i].id.to_string())
            .collect();
        return Err(StructuralError::Cycle { nodes });
    }

    // Pass 1 (deferred so cycle and edge errors surface first for a broken
    // document): required annotations.
    let mut nodes = Vec::with_capacity(n);
    for spec_node in &sorted {
        nodes.push(annotate(spec_node)?);
    }

    // Pass 4: roots.
    if spec.roots.is_empty() {
        return Err(StructuralError::NoRoots);
    }
    let mut reached_by: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for root in &spec.roots {
        let Some(&r) = index.get(root) else {
            return Err(StructuralError::InvalidRoot {
                node: root.to_string(),
                reason: "not a node of this graph".to_string(),
            });
        };
        if nodes[r].node_type != NodeType::Intent {
            return Err(StructuralError::InvalidRoot {
                node: root.to_string(),
                reason: format!("node type is {}, expected intent", nodes[r].node_type),
            });
        }
        if !deps[r].is_empty() {
            return Err(StructuralError::InvalidRoot {
                node: root.to_string(),
                reason: "root has incoming edges".to_string(),
            });
        }
        let mut stack = vec![r];
        while let Some(i) = stack.pop() {
            if reached_by[i].insert(r) {
                stack.extend(dependents[i].iter().copied());
            }
        }
    }
    for (i, roots) in reached_by.iter().enumerate() {
        match roots.len() {
            0 => {
                return Err(StructuralError::Unreachable {
                    node: nodes[i].id.to_string(),
                })
            }
            1 => {
                if let Some(&r) = roots.first() {
                    nodes[i].root = nodes[r].id.clone();
                }
            }
            _ => {
                return Err(StructuralError::MultipleRoots {
                    node: nodes[i].id.to_string(),
                    roots: roots.iter().map(|&r| nodes[r].id.to_string()).collect(),
                })
            }
        }
    }

    // Pass 5.
    if let Some(node) = nodes
        .iter()
        .find(|n| !n.cancellable && n.compensation.is_none())
    {
        return Err(StructuralError::MissingCompensation {
            node: node.id.to_string(),
        });
    }

    // Pass 6: every dependency precedes its dependents in `order`.
    let mut level = vec![0usize; n];
    let mut deterministic_closure = vec![false; n];
    for &i in &order {
        let mut effects = nodes[i].effects.clone();
        let mut deterministic = nodes[i].deterministic_mode;
        for &d in &deps[i] {
            level[i] = level[i].max(level[d] + 1);
            effects.extend(nodes[d].effective_effects.iter().cloned());
            deterministic &= deterministic_closure[d];
        }
        nodes[i].effective_effects = effects;
        deterministic_closure[i] = deterministic;
    }
    let depth = level.iter().copied().max().map_or(0, |m| m + 1);
    let mut levels = vec![Vec::new(); depth];
    for &i in &order {
        levels[level[i]].push(i);
    }
    for lvl in &mut levels {
        lvl.sort_unstable();
    }

    let graph_hash = {
        let encoded = serde_json::to_vec(&spec)?;
        format!("{:x}", Sha256::digest(&encoded))
    };

    tracing::info!(
        version = spec.version,
        nodes = n,
        levels = depth,
        graph_hash = %graph_hash,
        "graph validated"
    );

    Ok(ValidatedGraph {
        version: spec.version,
        roots: spec.roots.clone(),
        source: spec,
        nodes,
        index,
        deps: deps.into_iter().map(|s| s.into_iter().collect()).collect(),
        dependents: dependents.into_iter().map(|s| s.into_iter().collect()).collect(),
        order,
        levels,
        deterministic_closure,
        policy_hash: policy.policy_hash().to_string(),
        graph_hash,
    })
}

fn annotate(spec: &ActionSpec) -> Result<ValidatedNode, StructuralError> {
    let missing = |field| StructuralError::MissingAnnotation {
        node: spec.id.to_string(),
        field,
    };
    let effects = spec.effects.as_ref().ok_or_else(|| missing("effects"))?;
    let capabilities = spec
        .capabilities
        .as_ref()
        .ok_or_else(|| missing("capabilities"))?;
    let trust_tier = spec.trust_tier.ok_or_else(|| missing("trust_tier"))?;
    let cap_scope_hash = spec
        .cap_scope_hash
        .as_ref()
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| missing("cap_scope_hash"))?;

    Ok(ValidatedNode {
        id: spec.id.clone(),
        node_type: spec.node_type,
        effects: effects.iter().cloned().collect(),
        effective_effects: effects.iter().cloned().collect(),
        capabilities: capabilities.iter().cloned().collect(),
        trust_tier,
        exec_class: spec.exec_class,
        deterministic_mode: spec.deterministic_mode,
        cap_scope_hash: cap_scope_hash.clone(),
        cancellable: spec.cancellable,
        compensation: spec.compensation.clone(),
        risk: spec.risk,
        description: spec.description.clone(),
        root: spec.id.clone(),
    })
}
