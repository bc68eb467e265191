//! In-process [`RemoteGraphStore`] with fault injection.
//!
//! Backs the test suites and offline demos: outages, per-node failures, latency
//! and hung calls can be switched on at runtime, and every call is counted.

use crate::cancel::CancellationToken;
use crate::error::{GraphError, Result};
use crate::reference::VerseRef;
use crate::store::{EdgePatch, HyperedgeOptions, NewNode, RemoteGraphStore};
use crate::timestamp::Timestamp;
use crate::types::{Edge, EdgeType, GroupConnection, MemberRef, Node, NodeKind, Note, VerseNode};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct StoreData {
    verses: HashMap<String, VerseNode>,
    notes: HashMap<String, Note>,
    edges: Vec<Edge>,
    groups: HashMap<String, GroupConnection>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    hanging: bool,
    latency: Option<Duration>,
    failing_nodes: HashSet<String>,
    failing_pushes: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    data: Mutex<StoreData>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<&'static str, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct FlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> FlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn poisoned() -> GraphError {
    GraphError::Internal(anyhow::anyhow!("in-memory store lock poisoned"))
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Seeding ==========

    pub fn insert_verse(&self, verse: VerseNode) {
        if let Ok(mut data) = self.data.lock() {
            data.verses.insert(verse.id.clone(), verse);
        }
    }

    pub fn insert_note(&self, note: Note) {
        if let Ok(mut data) = self.data.lock() {
            data.notes.insert(note.id.clone(), note);
        }
    }

    pub fn insert_edge(&self, edge: Edge) {
        if let Ok(mut data) = self.data.lock() {
            data.edges.retain(|existing| existing.id != edge.id);
            data.edges.push(edge);
        }
    }

    pub fn insert_group(&self, group: GroupConnection) {
        if let Ok(mut data) = self.data.lock() {
            data.groups.insert(group.id.clone(), group);
        }
    }

    /// Seed a verse from a reference string such as `"John 3:16"`.
    pub fn seed_verse(&self, reference: &str, text: &str) -> Result<VerseNode> {
        let reference: VerseRef = reference.parse()?;
        let verse = VerseNode::new(&reference, text, "KJV");
        self.insert_verse(verse.clone());
        Ok(verse)
    }

    // ========== Fault injection ==========

    /// Every call fails with `RemoteUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.with_faults(|faults| faults.unavailable = unavailable);
    }

    /// Reads never resolve while set (they still honour cancellation).
    pub fn set_hanging(&self, hanging: bool) {
        self.with_faults(|faults| faults.hanging = hanging);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.with_faults(|faults| faults.latency = latency);
    }

    /// `get_node_by_id` fails for this id.
    pub fn fail_node(&self, id: impl Into<String>) {
        let id = id.into();
        self.with_faults(|faults| {
            faults.failing_nodes.insert(id);
        });
    }

    /// `push_note` / `push_edge` fail for this id.
    pub fn fail_push(&self, id: impl Into<String>) {
        let id = id.into();
        self.with_faults(|faults| {
            faults.failing_pushes.insert(id);
        });
    }

    fn with_faults(&self, apply: impl FnOnce(&mut Faults)) {
        if let Ok(mut faults) = self.faults.lock() {
            apply(&mut faults);
        }
    }

    // ========== Inspection ==========

    pub fn call_count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn notes(&self) -> Vec<Note> {
        self.data
            .lock()
            .map(|data| data.notes.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.data
            .lock()
            .map(|data| data.edges.clone())
            .unwrap_or_default()
    }

    // ========== Call plumbing ==========

    fn record(&self, op: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
    }

    fn snapshot_faults(&self) -> Result<(bool, bool, Option<Duration>)> {
        let faults = self.faults.lock().map_err(|_| poisoned())?;
        Ok((faults.unavailable, faults.hanging, faults.latency))
    }

    async fn simulate_wire(&self, op: &'static str, hang: bool, cancel: Option<&CancellationToken>) -> Result<()> {
        let (unavailable, hanging, latency) = self.snapshot_faults()?;
        let wait = async move {
            if hang && hanging {
                std::future::pending::<()>().await;
            }
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            Ok(())
        };
        match cancel {
            Some(token) => token.run_until_cancelled(wait).await?,
            None => wait.await?,
        }
        if unavailable {
            return Err(GraphError::RemoteUnavailable(format!("{op}: store offline")));
        }
        Ok(())
    }

    async fn read<T>(
        &self,
        op: &'static str,
        cancel: Option<&CancellationToken>,
        query: impl FnOnce(&StoreData) -> Result<T>,
    ) -> Result<T> {
        self.record(op);
        let _flight = FlightGuard::enter(&self.in_flight, &self.max_in_flight);
        if let Some(token) = cancel {
            token.check()?;
        }
        self.simulate_wire(op, true, cancel).await?;
        let data = self.data.lock().map_err(|_| poisoned())?;
        query(&data)
    }

    async fn write<T>(&self, op: &'static str, mutate: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        self.record(op);
        let _flight = FlightGuard::enter(&self.in_flight, &self.max_in_flight);
        self.simulate_wire(op, false, None).await?;
        let mut data = self.data.lock().map_err(|_| poisoned())?;
        mutate(&mut data)
    }

    fn push_blocked(&self, id: &str) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.failing_pushes.contains(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RemoteGraphStore for InMemoryGraphStore {
    async fn get_node_by_id(
        &self,
        kind: NodeKind,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Node>> {
        let failing = self
            .faults
            .lock()
            .map(|faults| faults.failing_nodes.contains(id))
            .unwrap_or(false);
        self.read("get_node_by_id", cancel, |data| {
            if failing {
                return Err(GraphError::RemoteUnavailable(format!("lookup of {id} failed")));
            }
            Ok(match kind {
                NodeKind::Verse => data.verses.get(id).cloned().map(Node::Verse),
                NodeKind::Note => data.notes.get(id).cloned().map(Node::Note),
                NodeKind::Group => data.groups.get(id).cloned().map(Node::Group),
                NodeKind::Tag | NodeKind::Topic => None,
            })
        })
        .await
    }

    async fn get_node_by_natural_key(
        &self,
        book: &str,
        chapter: u32,
        verse: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<VerseNode>> {
        self.read("get_node_by_natural_key", cancel, |data| {
            let mut matches: Vec<&VerseNode> = data
                .verses
                .values()
                .filter(|node| node.book == book && node.chapter == chapter && node.verse_number == verse)
                .collect();
            matches.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(matches.first().map(|node| (*node).clone()))
        })
        .await
    }

    async fn create_node(&self, fields: NewNode) -> Result<Node> {
        self.write("create_node", |data| match fields {
            NewNode::Verse {
                book,
                chapter,
                verse_number,
                text,
                translation,
            } => {
                let reference = VerseRef::new(book, chapter, verse_number)?;
                if let Some(existing) = data.verses.values().find(|node| {
                    node.reference() == reference && node.translation == translation
                }) {
                    return Ok(Node::Verse(existing.clone()));
                }
                let mut node = VerseNode::new(&reference, text, translation);
                if data.verses.contains_key(&node.id) {
                    node.id = format!("{}-{}", node.id, node.translation);
                }
                data.verses.insert(node.id.clone(), node.clone());
                Ok(Node::Verse(node))
            }
            NewNode::Note {
                verse_id,
                content,
                tags,
                user_id,
            } => {
                let mut note = Note::new(verse_id, content).with_tags(tags);
                note.user_id = user_id;
                data.notes.insert(note.id.clone(), note.clone());
                Ok(Node::Note(note))
            }
        })
        .await
    }

    async fn get_edges_for_node(
        &self,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Edge>> {
        self.read("get_edges_for_node", cancel, |data| {
            Ok(data.edges.iter().filter(|edge| edge.touches(id)).cloned().collect())
        })
        .await
    }

    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        description: Option<&str>,
    ) -> Result<Edge> {
        self.write("create_edge", |data| {
            let mut edge = Edge::new(source_id, target_id, edge_type);
            edge.description = description.map(str::to_string);
            data.edges.push(edge.clone());
            Ok(edge)
        })
        .await
    }

    async fn update_edge(&self, id: &str, patch: EdgePatch) -> Result<Edge> {
        self.write("update_edge", |data| {
            let edge = data
                .edges
                .iter_mut()
                .find(|edge| edge.id == id)
                .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
            if let Some(edge_type) = patch.edge_type {
                edge.edge_type = edge_type;
            }
            if let Some(description) = patch.description {
                edge.description = Some(description);
            }
            edge.updated_at = Timestamp::now();
            Ok(edge.clone())
        })
        .await
    }

    async fn delete_edge(&self, id: &str) -> Result<()> {
        self.write("delete_edge", |data| {
            let before = data.edges.len();
            data.edges.retain(|edge| edge.id != id);
            if data.edges.len() == before {
                return Err(GraphError::NotFound(id.to_string()));
            }
            for group in data.groups.values_mut() {
                group.connection_ids.remove(id);
            }
            Ok(())
        })
        .await
    }

    async fn get_hyperedges_for_node(
        &self,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<GroupConnection>> {
        self.read("get_hyperedges_for_node", cancel, |data| {
            let mut groups: Vec<GroupConnection> = data
                .groups
                .values()
                .filter(|group| group.touches(id))
                .cloned()
                .collect();
            groups.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(groups)
        })
        .await
    }

    async fn create_hyperedge(
        &self,
        sources: Vec<MemberRef>,
        targets: Vec<MemberRef>,
        connection_type: EdgeType,
        options: HyperedgeOptions,
    ) -> Result<GroupConnection> {
        self.write("create_hyperedge", |data| {
            let mut group = GroupConnection::new(sources, targets, connection_type);
            group.metadata = options.metadata;
            group.connection_ids = options
                .connection_ids
                .into_iter()
                .filter(|id| data.edges.iter().any(|edge| &edge.id == id))
                .collect();
            data.groups.insert(group.id.clone(), group.clone());
            Ok(group)
        })
        .await
    }

    async fn list_notes(&self, cancel: Option<&CancellationToken>) -> Result<Vec<Note>> {
        self.read("list_notes", cancel, |data| Ok(data.notes.values().cloned().collect()))
            .await
    }

    async fn list_edges(&self, cancel: Option<&CancellationToken>) -> Result<Vec<Edge>> {
        self.read("list_edges", cancel, |data| Ok(data.edges.clone()))
            .await
    }

    async fn push_note(&self, note: &Note) -> Result<Note> {
        let blocked = self.push_blocked(&note.id);
        self.write("push_note", |data| {
            if blocked {
                return Err(GraphError::RemoteUnavailable(format!("push of note {} rejected", note.id)));
            }
            data.notes.insert(note.id.clone(), note.clone());
            Ok(note.clone())
        })
        .await
    }

    async fn push_edge(&self, edge: &Edge) -> Result<Edge> {
        let blocked = self.push_blocked(&edge.id);
        self.write("push_edge", |data| {
            if blocked {
                return Err(GraphError::RemoteUnavailable(format!("push of edge {} rejected", edge.id)));
            }
            data.edges.retain(|existing| existing.id != edge.id);
            data.edges.push(edge.clone());
            Ok(edge.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn natural_key_lookup_finds_seeded_verse() {
        let store = InMemoryGraphStore::new();
        store.seed_verse("John 3:16", "For God so loved the world").unwrap();

        let found = store
            .get_node_by_natural_key("John", 3, 16, None)
            .await
            .unwrap()
            .expect("verse");
        assert_eq!(found.id, "John-3-16");
        assert!(store
            .get_node_by_natural_key("John", 3, 17, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn create_verse_respects_translation_uniqueness() {
        let store = InMemoryGraphStore::new();
        let fields = NewNode::Verse {
            book: "John".to_string(),
            chapter: 3,
            verse_number: 16,
            text: String::new(),
            translation: "KJV".to_string(),
        };
        let first = store.create_node(fields.clone()).await.unwrap();
        let again = store.create_node(fields).await.unwrap();
        assert_eq!(first.id(), again.id());

        let other = store
            .create_node(NewNode::Verse {
                book: "John".to_string(),
                chapter: 3,
                verse_number: 16,
                text: String::new(),
                translation: "ESV".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(other.id(), "John-3-16-ESV");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryGraphStore::new();
        store.set_unavailable(true);
        let err = store.list_notes(None).await.unwrap_err();
        assert!(matches!(err, GraphError::RemoteUnavailable(_)));
        assert_eq!(store.call_count("list_notes"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_reads_abort_on_cancel() {
        let store = InMemoryGraphStore::new();
        store.set_hanging(true);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = store
            .get_edges_for_node("John-3-16", Some(&token))
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(store.in_flight(), 0);
    }

    #[tokio::test]
    async fn deleting_an_edge_prunes_group_connections() {
        let store = InMemoryGraphStore::new();
        let edge = store
            .create_edge("A", "B", EdgeType::Thematic, None)
            .await
            .unwrap();
        let group = store
            .create_hyperedge(
                vec![MemberRef::verse("A")],
                vec![MemberRef::verse("B")],
                EdgeType::Thematic,
                HyperedgeOptions {
                    connection_ids: [edge.id.clone(), "ghost".to_string()].into_iter().collect(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(group.connection_ids.len(), 1);

        store.delete_edge(&edge.id).await.unwrap();
        let groups = store.get_hyperedges_for_node("A", None).await.unwrap();
        assert!(groups[0].connection_ids.is_empty());
    }
}
