//! Attack trees
//!
//! An attack tree is a node/edge graph whose nodes are one of a closed set of
//! kinds. Nodes and edges carry view-only state (position, selection, drag
//! state, renderer measurements) that is never persisted.
//!
//! Renderer payloads are decoded once at the boundary: a [`WireNode`] may carry
//! its label either under `data.label` or at the top level; [`AttackNode`] has
//! exactly one.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackNodeKind {
    /// The attacker's objective
    #[serde(rename = "root")]
    RootGoal,
    /// All children required
    #[serde(rename = "and-gate")]
    AndGate,
    /// Any child suffices
    #[serde(rename = "or-gate")]
    OrGate,
    /// Concrete attack step
    #[serde(rename = "leaf-attack")]
    AttackVector,
    /// Defensive control
    #[serde(rename = "countermeasure")]
    Countermeasure,
}

impl AttackNodeKind {
    /// Renderer type string
    #[must_use]
    pub fn renderer_type(self) -> &'static str {
        match self {
            Self::RootGoal => "root",
            Self::AndGate => "and-gate",
            Self::OrGate => "or-gate",
            Self::AttackVector => "leaf-attack",
            Self::Countermeasure => "countermeasure",
        }
    }

    /// Resolve a renderer type string
    ///
    /// # Errors
    /// [`ModelError::UnknownNodeKind`] for anything outside the closed set.
    pub fn from_renderer_type(raw: &str) -> Result<Self, ModelError> {
        match raw {
            "root" => Ok(Self::RootGoal),
            "and-gate" => Ok(Self::AndGate),
            "or-gate" => Ok(Self::OrGate),
            "leaf-attack" => Ok(Self::AttackVector),
            "countermeasure" => Ok(Self::Countermeasure),
            other => Err(ModelError::UnknownNodeKind(other.to_string())),
        }
    }

    /// Whether the node combines children (root or gate)
    #[inline]
    #[must_use]
    pub fn is_capability(self) -> bool {
        matches!(self, Self::RootGoal | Self::AndGate | Self::OrGate)
    }
}

/// Canvas position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal offset
    pub x: f64,
    /// Vertical offset
    pub y: f64,
}

/// Renderer-measured size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels
    pub width: f64,
    /// Height in pixels
    pub height: f64,
}

/// View-only node state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeView {
    /// Canvas position
    pub position: Position,
    /// Selected in the editor
    pub selected: bool,
    /// Being dragged
    pub dragging: bool,
    /// Size reported by the renderer
    pub measured: Option<Dimensions>,
}

/// View-only edge state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeView {
    /// Selected in the editor
    pub selected: bool,
    /// Rendered with animation
    pub animated: bool,
}

/// A normalized attack tree node
#[derive(Debug, Clone, PartialEq)]
pub struct AttackNode {
    /// Node id
    pub id: String,
    /// Node kind
    pub kind: AttackNodeKind,
    /// Display label
    pub label: String,
    /// Optional description
    pub description: Option<String>,
    /// View-only state
    pub view: NodeView,
}

impl AttackNode {
    /// Create node with default view state
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, kind: AttackNodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            description: None,
            view: NodeView::default(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With canvas position
    #[inline]
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.view.position = Position { x, y };
        self
    }
}

/// A parent → child edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackEdge {
    /// Edge id
    pub id: String,
    /// Parent node id
    pub source: String,
    /// Child node id
    pub target: String,
    /// View-only state
    pub view: EdgeView,
}

impl AttackEdge {
    /// Create edge with default view state
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            view: EdgeView::default(),
        }
    }
}

/// Attack tree graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttackTree {
    /// Nodes in insertion order
    pub nodes: Vec<AttackNode>,
    /// Edges in insertion order
    pub edges: Vec<AttackEdge>,
}

impl AttackTree {
    /// Empty tree
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    #[must_use]
    pub fn with_node(mut self, node: AttackNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge
    #[must_use]
    pub fn with_edge(mut self, edge: AttackEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Look up a node by id
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&AttackNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check structural invariants
    ///
    /// # Errors
    /// - [`ModelError::EmptyTree`] when there are no nodes
    /// - [`ModelError::DuplicateNode`] when two nodes share an id
    /// - [`ModelError::DanglingEdge`] when an edge points at a missing node
    /// - [`ModelError::InvalidEdge`] when an edge leaves a node that cannot
    ///   have children; only roots and gates combine children, and an attack
    ///   vector may carry countermeasures
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::EmptyTree);
        }

        let mut kinds = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if kinds.insert(node.id.as_str(), node.kind).is_some() {
                return Err(ModelError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &self.edges {
            let kind_of = |end: &String| {
                kinds
                    .get(end.as_str())
                    .copied()
                    .ok_or_else(|| ModelError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: end.clone(),
                    })
            };
            let source = kind_of(&edge.source)?;
            let target = kind_of(&edge.target)?;
            let allowed = source.is_capability()
                || (source == AttackNodeKind::AttackVector
                    && target == AttackNodeKind::Countermeasure);
            if !allowed {
                return Err(ModelError::InvalidEdge {
                    edge: edge.id.clone(),
                    node: edge.source.clone(),
                });
            }
        }

        Ok(())
    }

    /// Semantic structure only, ready to persist
    #[must_use]
    pub fn to_persisted(&self) -> PersistedTree {
        PersistedTree {
            nodes: self
                .nodes
                .iter()
                .map(|n| PersistedNode {
                    id: n.id.clone(),
                    kind: n.kind,
                    label: n.label.clone(),
                    description: n.description.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| PersistedEdge {
                    id: e.id.clone(),
                    source: e.source.clone(),
                    target: e.target.clone(),
                })
                .collect(),
        }
    }
}

/// Persisted node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedNode {
    /// Node id
    pub id: String,
    /// Node kind
    pub kind: AttackNodeKind,
    /// Display label
    pub label: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Persisted edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEdge {
    /// Edge id
    pub id: String,
    /// Parent node id
    pub source: String,
    /// Child node id
    pub target: String,
}

/// Persisted attack tree: `{nodes, edges}` with no view state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTree {
    /// Nodes
    pub nodes: Vec<PersistedNode>,
    /// Edges
    pub edges: Vec<PersistedEdge>,
}

impl From<PersistedTree> for AttackTree {
    fn from(tree: PersistedTree) -> Self {
        Self {
            nodes: tree
                .nodes
                .into_iter()
                .map(|n| AttackNode {
                    id: n.id,
                    kind: n.kind,
                    label: n.label,
                    description: n.description,
                    view: NodeView::default(),
                })
                .collect(),
            edges: tree
                .edges
                .into_iter()
                .map(|e| AttackEdge::new(e.id, e.source, e.target))
                .collect(),
        }
    }
}

/// Renderer node payload as emitted by the diagram editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    /// Node id
    pub id: String,
    /// Renderer type string
    #[serde(rename = "type")]
    pub node_type: String,
    /// Nested node data
    #[serde(default)]
    pub data: WireNodeData,
    /// Top-level label (older editor versions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Canvas position
    #[serde(default)]
    pub position: Position,
    /// Selected flag
    #[serde(default)]
    pub selected: bool,
    /// Drag flag
    #[serde(default)]
    pub dragging: bool,
    /// Renderer measurement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Dimensions>,
}

/// Nested `data` object of a renderer node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNodeData {
    /// Label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Renderer edge payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEdge {
    /// Edge id
    pub id: String,
    /// Parent node id
    pub source: String,
    /// Child node id
    pub target: String,
    /// Selected flag
    #[serde(default)]
    pub selected: bool,
    /// Animated flag
    #[serde(default)]
    pub animated: bool,
}

/// Renderer graph payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireTree {
    /// Nodes
    #[serde(default)]
    pub nodes: Vec<WireNode>,
    /// Edges
    #[serde(default)]
    pub edges: Vec<WireEdge>,
}

impl TryFrom<WireNode> for AttackNode {
    type Error = ModelError;

    fn try_from(wire: WireNode) -> Result<Self, Self::Error> {
        let kind = AttackNodeKind::from_renderer_type(&wire.node_type)?;
        let label = wire
            .data
            .label
            .filter(|l| !l.trim().is_empty())
            .or(wire.label.filter(|l| !l.trim().is_empty()))
            .ok_or_else(|| ModelError::MissingLabel(wire.id.clone()))?;

        Ok(Self {
            id: wire.id,
            kind,
            label,
            description: wire.data.description,
            view: NodeView {
                position: wire.position,
                selected: wire.selected,
                dragging: wire.dragging,
                measured: wire.measured,
            },
        })
    }
}

impl From<WireEdge> for AttackEdge {
    fn from(wire: WireEdge) -> Self {
        Self {
            id: wire.id,
            source: wire.source,
            target: wire.target,
            view: EdgeView {
                selected: wire.selected,
                animated: wire.animated,
            },
        }
    }
}

impl TryFrom<WireTree> for AttackTree {
    type Error = ModelError;

    fn try_from(wire: WireTree) -> Result<Self, Self::Error> {
        let nodes = wire
            .nodes
            .into_iter()
            .map(AttackNode::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let edges = wire.edges.into_iter().map(AttackEdge::from).collect();
        Ok(Self { nodes, edges })
    }
}
