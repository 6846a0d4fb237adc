// error.rs — Structural errors for submitted graphs.
//
// A StructuralError is fatal to the submission, never to the process.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("failed to read graph at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("graph JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("graph YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("graph has no nodes")]
    Empty,

    #[error("duplicate node id '{node}'")]
    DuplicateNode { node: String },

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    /// Nodes that sit on, or depend on, a cycle.
    #[error("dependency cycle through {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("node '{node}' is missing required annotation '{field}'")]
    MissingAnnotation { node: String, field: &'static str },

    #[error("graph declares no root intents")]
    NoRoots,

    #[error("root '{node}' is invalid: {reason}")]
    InvalidRoot { node: String, reason: String },

    #[error("node '{node}' is not reachable from any root")]
    Unreachable { node: String },

    #[error("node '{node}' is reachable from several roots: {}", roots.join(", "))]
    MultipleRoots { node: String, roots: Vec<String> },

    #[error("node '{node}' is not cancellable and declares no compensation")]
    MissingCompensation { node: String },
}
