//! Versioned entities stored in the remote graph and mirrored in the local cache.

use crate::reference::VerseRef;
use crate::timestamp::Timestamp;
use crate::view::GraphNode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// An entity that takes part in last-writer-wins reconciliation.
pub trait Versioned {
    /// Storage identity used to pair local and remote copies.
    fn identity(&self) -> &str;

    /// Modification time compared during reconciliation.
    fn updated_at(&self) -> Timestamp;
}

/// Kind of a node in the graph, also used to type hyperedge members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Verse,
    Note,
    Tag,
    Group,
    Topic,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Verse => "verse",
            NodeKind::Note => "note",
            NodeKind::Tag => "tag",
            NodeKind::Group => "group",
            NodeKind::Topic => "topic",
        }
    }

    /// Whether nodes of this kind are fetched from the remote store rather
    /// than synthesised from their identifier.
    pub fn is_stored(&self) -> bool {
        matches!(self, NodeKind::Verse | NodeKind::Note | NodeKind::Group)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a directed connection between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Default,
    CrossReference,
    Parallel,
    Thematic,
    Prophecy,
    NoteDerived,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Default => "default",
            EdgeType::CrossReference => "cross_reference",
            EdgeType::Parallel => "parallel",
            EdgeType::Thematic => "thematic",
            EdgeType::Prophecy => "prophecy",
            EdgeType::NoteDerived => "note_derived",
        }
    }
}

impl Default for EdgeType {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single verse. Immutable apart from text/translation backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseNode {
    pub id: String,
    pub book: String,
    pub chapter: u32,
    pub verse_number: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl VerseNode {
    pub fn new(reference: &VerseRef, text: impl Into<String>, translation: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: reference.canonical_id(),
            book: reference.book.clone(),
            chapter: reference.chapter,
            verse_number: reference.verse,
            text: text.into(),
            translation: translation.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reference(&self) -> VerseRef {
        VerseRef {
            book: self.book.clone(),
            chapter: self.chapter,
            verse: self.verse_number,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}:{}", self.book, self.chapter, self.verse_number)
    }

    pub fn to_graph_node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            kind: NodeKind::Verse,
            label: self.label(),
            payload: json!({
                "book": self.book,
                "chapter": self.chapter,
                "verse": self.verse_number,
                "text": self.text,
                "translation": self.translation,
            }),
        }
    }
}

impl Versioned for VerseNode {
    fn identity(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

/// A user note attached to a verse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub verse_id: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl Note {
    pub fn new(verse_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            verse_id: verse_id.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// A note whose whole content is one http(s) URL renders as a link.
    pub fn is_link(&self) -> bool {
        let content = self.content.trim();
        (content.starts_with("http://") || content.starts_with("https://"))
            && !content.contains(char::is_whitespace)
    }

    pub fn preview(&self, max_chars: usize) -> String {
        let content = self.content.trim();
        if content.chars().count() <= max_chars {
            return content.to_string();
        }
        let mut preview: String = content.chars().take(max_chars).collect();
        preview.push('…');
        preview
    }

    pub fn to_graph_node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            kind: NodeKind::Note,
            label: self.preview(40),
            payload: json!({
                "verse_id": self.verse_id,
                "content": self.content,
                "tags": self.tags,
                "is_link": self.is_link(),
            }),
        }
    }
}

impl Versioned for Note {
    fn identity(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

/// Trim, drop empties and de-duplicate tag strings.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter()
        .map(|tag| {
            let tag: String = tag.into();
            tag.trim().to_string()
        })
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Canonical identity of an edge: two edges with the same key are the same fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
}

/// A typed directed connection between exactly two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, edge_type: EdgeType) -> Self {
        let now = Timestamp::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn canonical_key(&self) -> EdgeKey {
        EdgeKey {
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            edge_type: self.edge_type,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    /// The endpoint opposite `node_id`, if the edge touches it.
    pub fn other_endpoint(&self, node_id: &str) -> Option<&str> {
        if self.source_id == node_id {
            Some(&self.target_id)
        } else if self.target_id == node_id {
            Some(&self.source_id)
        } else {
            None
        }
    }

    /// Node kind stored at `endpoint`. Note-derived edges run note → verse;
    /// every other edge type connects verses.
    pub fn endpoint_kind(&self, endpoint: &str) -> NodeKind {
        if self.edge_type == EdgeType::NoteDerived && endpoint == self.source_id {
            NodeKind::Note
        } else {
            NodeKind::Verse
        }
    }
}

impl Versioned for Edge {
    fn identity(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

/// A typed member of a hyperedge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: String,
    pub kind: NodeKind,
}

impl MemberRef {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn verse(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Verse)
    }
}

/// A hyperedge connecting a set of source members to a set of target members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConnection {
    pub id: String,
    #[serde(default)]
    pub sources: Vec<MemberRef>,
    #[serde(default)]
    pub targets: Vec<MemberRef>,
    #[serde(rename = "type", default)]
    pub connection_type: EdgeType,
    #[serde(default)]
    pub connection_ids: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl GroupConnection {
    pub fn new(sources: Vec<MemberRef>, targets: Vec<MemberRef>, connection_type: EdgeType) -> Self {
        let now = Timestamp::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sources: dedup_members(sources),
            targets: dedup_members(targets),
            connection_type,
            connection_ids: BTreeSet::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.metadata
            .insert("label".to_string(), Value::String(label.into()));
        self
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberRef> {
        self.sources.iter().chain(self.targets.iter())
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.members().any(|member| member.id == node_id)
    }

    pub fn label(&self) -> String {
        self.metadata
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} group", self.connection_type))
    }

    /// Drop connection ids that no longer name a materialised elementary edge.
    /// Returns how many were removed.
    pub fn retain_connections(&mut self, live_edge_ids: &HashSet<&str>) -> usize {
        let before = self.connection_ids.len();
        self.connection_ids
            .retain(|id| live_edge_ids.contains(id.as_str()));
        before - self.connection_ids.len()
    }

    pub fn to_graph_node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            kind: NodeKind::Group,
            label: self.label(),
            payload: json!({
                "type": self.connection_type,
                "sources": self.sources,
                "targets": self.targets,
                "metadata": self.metadata,
            }),
        }
    }
}

impl Versioned for GroupConnection {
    fn identity(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

fn dedup_members(members: Vec<MemberRef>) -> Vec<MemberRef> {
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter(|member| seen.insert(member.id.clone()))
        .collect()
}

/// A node as stored in the remote graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Verse(VerseNode),
    Note(Note),
    Group(GroupConnection),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Verse(verse) => &verse.id,
            Node::Note(note) => &note.id,
            Node::Group(group) => &group.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Verse(_) => NodeKind::Verse,
            Node::Note(_) => NodeKind::Note,
            Node::Group(_) => NodeKind::Group,
        }
    }

    pub fn to_graph_node(&self) -> GraphNode {
        match self {
            Node::Verse(verse) => verse.to_graph_node(),
            Node::Note(note) => note.to_graph_node(),
            Node::Group(group) => group.to_graph_node(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_tags_are_trimmed_and_deduplicated() {
        let note = Note::new("John-3-16", "love").with_tags(["grace", " grace ", "", "faith"]);
        let tags: Vec<_> = note.tags.iter().cloned().collect();
        assert_eq!(tags, vec!["faith".to_string(), "grace".to_string()]);
    }

    #[test]
    fn link_notes_are_detected() {
        assert!(Note::new("v", " https://example.org/commentary ").is_link());
        assert!(!Note::new("v", "see https://example.org for more").is_link());
        assert!(!Note::new("v", "plain text").is_link());
    }

    #[test]
    fn canonical_key_ignores_storage_id() {
        let a = Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference);
        let b = Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference);
        assert_ne!(a.id, b.id);
        assert_eq!(a.canonical_key(), b.canonical_key());

        let reversed = Edge::new("Romans-8-28", "John-3-16", EdgeType::CrossReference);
        assert_ne!(a.canonical_key(), reversed.canonical_key());
    }

    #[test]
    fn note_derived_edges_have_note_sources() {
        let edge = Edge::new("note-1", "John-3-16", EdgeType::NoteDerived);
        assert_eq!(edge.endpoint_kind("note-1"), NodeKind::Note);
        assert_eq!(edge.endpoint_kind("John-3-16"), NodeKind::Verse);
        assert_eq!(edge.other_endpoint("John-3-16"), Some("note-1"));
        assert_eq!(edge.other_endpoint("elsewhere"), None);
    }

    #[test]
    fn group_members_are_deduplicated() {
        let group = GroupConnection::new(
            vec![MemberRef::verse("A"), MemberRef::verse("A"), MemberRef::verse("B")],
            vec![MemberRef::new("grace", NodeKind::Tag)],
            EdgeType::Thematic,
        );
        assert_eq!(group.sources.len(), 2);
        assert!(group.touches("grace"));
        assert_eq!(group.label(), "thematic group");
    }

    #[test]
    fn retain_connections_drops_unmaterialized_ids() {
        let mut group = GroupConnection::new(vec![], vec![], EdgeType::Thematic);
        group.connection_ids = ["e1", "e2", "e3"].iter().map(|s| s.to_string()).collect();
        let live: HashSet<&str> = ["e1", "e3"].into_iter().collect();
        assert_eq!(group.retain_connections(&live), 1);
        assert!(!group.connection_ids.contains("e2"));
    }

    #[test]
    fn nodes_round_trip_with_kind_tag() {
        let node = Node::Note(Note::new("John-3-16", "text"));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["kind"], "note");
        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), NodeKind::Note);
    }
}
