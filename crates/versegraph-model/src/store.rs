//! Boundary to the authoritative remote graph store.
//!
//! The query-execution layer behind this trait is external. Implementations
//! must honour the optional [`CancellationToken`] on reads and return
//! [`GraphError::Aborted`](crate::GraphError::Aborted) when it fires mid-flight.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::{Edge, EdgeType, GroupConnection, MemberRef, Node, NodeKind, Note, VerseNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Fields for a node created through [`RemoteGraphStore::create_node`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NewNode {
    Verse {
        book: String,
        chapter: u32,
        verse_number: u32,
        text: String,
        translation: String,
    },
    Note {
        verse_id: String,
        content: String,
        tags: BTreeSet<String>,
        user_id: Option<String>,
    },
}

impl NewNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            NewNode::Verse { .. } => NodeKind::Verse,
            NewNode::Note { .. } => NodeKind::Note,
        }
    }
}

/// Partial update applied by [`RemoteGraphStore::update_edge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgePatch {
    pub edge_type: Option<EdgeType>,
    pub description: Option<String>,
}

/// Extra settings for [`RemoteGraphStore::create_hyperedge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperedgeOptions {
    pub connection_ids: BTreeSet<String>,
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait RemoteGraphStore: Send + Sync {
    // ========== Nodes ==========

    async fn get_node_by_id(
        &self,
        kind: NodeKind,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Node>>;

    /// Look a verse up by (book, chapter, verse).
    async fn get_node_by_natural_key(
        &self,
        book: &str,
        chapter: u32,
        verse: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<VerseNode>>;

    async fn create_node(&self, fields: NewNode) -> Result<Node>;

    // ========== Elementary edges ==========

    /// Edges touching `id` in either direction.
    async fn get_edges_for_node(
        &self,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Edge>>;

    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        description: Option<&str>,
    ) -> Result<Edge>;

    async fn update_edge(&self, id: &str, patch: EdgePatch) -> Result<Edge>;

    async fn delete_edge(&self, id: &str) -> Result<()>;

    // ========== Hyperedges ==========

    async fn get_hyperedges_for_node(
        &self,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<GroupConnection>>;

    async fn create_hyperedge(
        &self,
        sources: Vec<MemberRef>,
        targets: Vec<MemberRef>,
        connection_type: EdgeType,
        options: HyperedgeOptions,
    ) -> Result<GroupConnection>;

    // ========== Collections used by background sync ==========

    async fn list_notes(&self, cancel: Option<&CancellationToken>) -> Result<Vec<Note>>;

    async fn list_edges(&self, cancel: Option<&CancellationToken>) -> Result<Vec<Edge>>;

    /// Create or replace a note, keeping its client-assigned id.
    async fn push_note(&self, note: &Note) -> Result<Note>;

    /// Create or replace an edge, keeping its client-assigned id.
    async fn push_edge(&self, edge: &Edge) -> Result<Edge>;
}
