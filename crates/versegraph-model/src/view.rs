//! Ephemeral view model handed to renderers. Never persisted.

use crate::types::{Edge, EdgeType, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub payload: Value,
}

impl GraphNode {
    /// Tags and topics have no stored record; their node is derived from the id.
    pub fn synthetic(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            payload: Value::Null,
        }
    }
}

/// What a view edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "type", rename_all = "snake_case")]
pub enum GraphEdgeKind {
    /// An elementary edge from the store.
    Connection(EdgeType),
    /// Hyperedge source member → group node.
    GroupSource,
    /// Group node → hyperedge target member.
    GroupTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: GraphEdgeKind,
    pub payload: Value,
}

impl GraphEdge {
    pub fn from_edge(edge: &Edge) -> Self {
        Self {
            id: edge.id.clone(),
            source: edge.source_id.clone(),
            target: edge.target_id.clone(),
            kind: GraphEdgeKind::Connection(edge.edge_type),
            payload: json!({ "description": edge.description }),
        }
    }

    /// Membership edge from a hyperedge source member into its group node.
    pub fn group_source(group_id: &str, member_id: &str) -> Self {
        Self {
            id: format!("{group_id}:source:{member_id}"),
            source: member_id.to_string(),
            target: group_id.to_string(),
            kind: GraphEdgeKind::GroupSource,
            payload: Value::Null,
        }
    }

    /// Membership edge from a group node out to a hyperedge target member.
    pub fn group_target(group_id: &str, member_id: &str) -> Self {
        Self {
            id: format!("{group_id}:target:{member_id}"),
            source: group_id.to_string(),
            target: member_id.to_string(),
            kind: GraphEdgeKind::GroupTarget,
            payload: Value::Null,
        }
    }
}

/// Committed snapshot of an expanded graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub focus: Option<String>,
}

impl GraphView {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.source == source && edge.target == target)
    }
}
