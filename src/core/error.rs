//! TC-000: Compile errors.
//!
//! Every variant is fatal to the compilation pass and carries enough structure
//! (node ids, cycle paths) to pinpoint the defect in the declared topology.

use thiserror::Error;

/// Result alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while compiling a topology into a provisioning plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown resource kind '{kind}' for node '{node}'")]
    UnknownKind { node: String, kind: String },

    #[error("node '{node}': invalid property '{property}': {reason}")]
    InvalidProperty {
        node: String,
        property: String,
        reason: String,
    },

    #[error("node '{node}' is declared more than once")]
    DuplicateNode { node: String },

    #[error("node '{from}' references unknown node '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("reference resolution cannot converge, cycle through: {}", .nodes.join(" -> "))]
    CyclicReference { nodes: Vec<String> },

    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("cannot tear down '{node}': still required by {}", .dependents.join(", "))]
    DependentsStillPresent {
        node: String,
        dependents: Vec<String>,
    },

    #[error("output '{name}' has no resolvable source '{source_ref}'")]
    UnknownOutput { name: String, source_ref: String },

    #[error("node '{node}': reference to {reference} was never resolved")]
    UnresolvedReference { node: String, reference: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CompileError {
    /// Shorthand for an [`CompileError::InvalidProperty`].
    pub fn invalid(node: &str, property: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            node: node.to_string(),
            property: property.to_string(),
            reason: reason.into(),
        }
    }

    /// Node ids named by this error, in report order.
    pub fn offending_nodes(&self) -> Vec<&str> {
        match self {
            Self::UnknownKind { node, .. }
            | Self::InvalidProperty { node, .. }
            | Self::DuplicateNode { node }
            | Self::UnresolvedReference { node, .. } => vec![node.as_str()],
            Self::DanglingReference { from, to } => vec![from.as_str(), to.as_str()],
            Self::CyclicReference { nodes } => nodes.iter().map(String::as_str).collect(),
            Self::CycleDetected { cycle } => cycle.iter().map(String::as_str).collect(),
            Self::DependentsStillPresent { node, dependents } => std::iter::once(node.as_str())
                .chain(dependents.iter().map(String::as_str))
                .collect(),
            Self::UnknownOutput { .. } | Self::Parse(_) | Self::Io(_) => Vec::new(),
        }
    }
}
