//! Error types for the threat model
//!
//! Raised by catalog edits, attack tree validation and wire decoding.

/// Errors from model mutation and validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Threat name is empty or whitespace
    #[error("threat name must not be blank")]
    BlankThreatName,

    /// Threat with this name already exists
    #[error("threat already exists: {0}")]
    DuplicateThreat(String),

    /// Threat with this name does not exist
    #[error("threat not found: {0}")]
    UnknownThreat(String),

    /// Attack tree has no nodes
    #[error("attack tree must contain at least one node")]
    EmptyTree,

    /// Two nodes share an id
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge references a node that is not in the tree
    #[error("edge {edge} references missing node {node}")]
    DanglingEdge {
        /// Edge id
        edge: String,
        /// Missing node id
        node: String,
    },

    /// An edge leaves a node that cannot have children
    #[error("edge {edge} leaves {node}, which cannot have children")]
    InvalidEdge {
        /// Edge id
        edge: String,
        /// Source node id
        node: String,
    },

    /// Renderer node type is not one of the known kinds
    #[error("unknown node kind: {0}")]
    UnknownNodeKind(String),

    /// Node carries no label in any of the accepted places
    #[error("node {0} has no label")]
    MissingLabel(String),
}

impl ModelError {
    /// Whether the error is a structural validation failure the user can fix
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyTree
                | Self::DuplicateNode(_)
                | Self::DanglingEdge { .. }
                | Self::InvalidEdge { .. }
        )
    }
}
