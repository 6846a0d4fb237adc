// graph.rs — Graph subcommands: validate, order, effects.
//
// Every subcommand validates the graph against the project's policy first;
// a graph that fails structural validation is reported and nothing else
// is printed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adr_daemon::DaemonConfig;
use adr_graph::{validate, GraphSpec, NodeId, ValidatedGraph};
use adr_policy::{ApprovalSet, PolicyConstraintSet, TrustTierEnforcer};
use anyhow::Context;
use clap::Subcommand;

use super::load_policy;

#[derive(Subcommand)]
pub enum GraphCommands {
    /// Validate a graph (JSON or YAML) against the active policy.
    Validate {
        /// Path to the graph document.
        path: PathBuf,
    },
    /// Print the deterministic execution order, one wave per line.
    Order {
        path: PathBuf,
    },
    /// Print the propagated effects of each node (or of one node).
    Effects {
        path: PathBuf,
        /// Only this node.
        #[arg(long)]
        node: Option<String>,
    },
}

pub fn execute(cmd: &GraphCommands, config: &DaemonConfig) -> anyhow::Result<()> {
    let policy = Arc::new(load_policy(config)?);
    match cmd {
        GraphCommands::Validate { path } => {
            let graph = load_validated(path, &policy)?;
            println!(
                "Graph valid: version {}, {} node(s), graph hash {}",
                graph.version(),
                graph.len(),
                graph.graph_hash()
            );
            println!("Policy: {} ({})", policy.domain, policy.policy_hash());
            println!();
            println!("{:<24} {:<12} {:<16} {:<16} RISK", "NODE", "TYPE", "DECLARED", "EFFECTIVE");
            println!("{}", "-".repeat(80));

            let enforcer = TrustTierEnforcer::new(Arc::clone(&policy));
            let approvals = ApprovalSet::new();
            let mut warnings = Vec::new();
            for node in graph.order() {
                let assessment = enforcer.assess(node, &approvals);
                println!(
                    "{:<24} {:<12} {:<16} {:<16} {}",
                    node.id, node.node_type, assessment.declared, assessment.effective, node.risk
                );
                warnings.extend(assessment.rejected_downgrades.iter().map(|v| v.to_string()));
                for effect in graph.propagate_effects(&node.id).into_iter().flatten() {
                    if policy.is_effect_forbidden(effect) {
                        warnings.push(format!(
                            "node '{}' carries forbidden effect '{}' and will be blocked",
                            node.id,
                            effect.as_str()
                        ));
                    }
                }
                if !graph.deterministic_inputs(&node.id) {
                    warnings.push(format!(
                        "deterministic node '{}' depends on non-deterministic input",
                        node.id
                    ));
                }
            }
            if !warnings.is_empty() {
                println!();
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
            }
        }

        GraphCommands::Order { path } => {
            let graph = load_validated(path, &policy)?;
            for (wave, nodes) in graph.levels().iter().enumerate() {
                let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
                println!("{}: {}", wave, ids.join(" "));
            }
        }

        GraphCommands::Effects { path, node } => {
            let graph = load_validated(path, &policy)?;
            let ids = match node {
                Some(id) => {
                    let id = NodeId::new(id.as_str());
                    if graph.node(&id).is_none() {
                        anyhow::bail!("no node '{}' in {}", id, path.display());
                    }
                    vec![id]
                }
                None => graph.order_ids(),
            };
            for id in ids {
                let effects: Vec<&str> = graph
                    .propagate_effects(&id)
                    .into_iter()
                    .flatten()
                    .map(|e| e.as_str())
                    .collect();
                let shown = if effects.is_empty() {
                    "-".to_string()
                } else {
                    effects.join(", ")
                };
                println!("{:<24} {}", id, shown);
            }
        }
    }
    Ok(())
}

fn load_validated(path: &Path, policy: &PolicyConstraintSet) -> anyhow::Result<ValidatedGraph> {
    let spec = GraphSpec::load(path).with_context(|| format!("loading {}", path.display()))?;
    validate(spec, policy).with_context(|| format!("{} failed validation", path.display()))
}
