//! Stateful, one-hop-per-call expansion of the verse graph.
//!
//! Every operation first plans a delta against the committed state, issuing
//! remote reads concurrently, and only then commits it in one synchronous step.
//! Dropping an operation future (timeout, cancellation) therefore leaves the
//! committed graph untouched.

use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use versegraph_model::{
    CancellationToken, Edge, GraphEdge, GraphError, GraphNode, GraphView, GroupConnection, NewNode,
    Node, NodeKind, RemoteGraphStore, Result, VerseNode, VerseRef,
};
use versegraph_sync::{retain_materialized, DedupOutcome, EdgeDeduplicator};

/// What a load or expansion changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionSummary {
    /// Seeds that resolved to a node, including ones already in the graph.
    pub seeds_resolved: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    /// Items dropped after a per-item fetch failure.
    pub skipped: usize,
    pub total_nodes: usize,
    pub total_edges: usize,
}

#[derive(Debug, Default)]
struct GraphState {
    /// Only grows until `reset`.
    visited: HashSet<String>,
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: EdgeDeduplicator,
    membership: Vec<GraphEdge>,
    membership_ids: HashSet<String>,
    /// Hyperedges as fetched.
    group_records: HashMap<String, GroupConnection>,
    /// `group_records` with connection ids limited to edges in `edges`.
    groups: HashMap<String, GroupConnection>,
    focus: Option<String>,
}

/// Changes staged by one operation.
#[derive(Debug, Default)]
struct Delta {
    nodes: Vec<GraphNode>,
    groups: Vec<GroupConnection>,
    edges: Vec<Edge>,
    membership: Vec<GraphEdge>,
    focus: Option<String>,
    seeds_resolved: usize,
    skipped: usize,
}

struct Staging<'a> {
    state: &'a GraphState,
    staged: HashSet<String>,
    delta: Delta,
}

impl<'a> Staging<'a> {
    fn new(state: &'a GraphState) -> Self {
        Self {
            state,
            staged: HashSet::new(),
            delta: Delta::default(),
        }
    }

    fn knows(&self, id: &str) -> bool {
        self.state.visited.contains(id) || self.staged.contains(id)
    }

    fn stage_node(&mut self, node: Node) {
        if self.knows(node.id()) {
            return;
        }
        if let Node::Group(group) = &node {
            self.delta.groups.push(group.clone());
        }
        self.stage_graph_node(node.to_graph_node());
    }

    fn stage_graph_node(&mut self, node: GraphNode) {
        if self.knows(&node.id) {
            return;
        }
        self.staged.insert(node.id.clone());
        self.delta.nodes.push(node);
    }

    /// Membership edges for every member of `group` present in the graph.
    fn stage_membership(&mut self, group: &GroupConnection) {
        for member in &group.sources {
            if self.knows(&member.id) {
                self.delta
                    .membership
                    .push(GraphEdge::group_source(&group.id, &member.id));
            }
        }
        for member in &group.targets {
            if self.knows(&member.id) {
                self.delta
                    .membership
                    .push(GraphEdge::group_target(&group.id, &member.id));
            }
        }
    }

    fn finish(self) -> Delta {
        self.delta
    }
}

/// Grows a graph view from seed verses, one hop per call.
pub struct GraphExpansionEngine {
    remote: Arc<dyn RemoteGraphStore>,
    state: GraphState,
}

impl GraphExpansionEngine {
    pub fn new(remote: Arc<dyn RemoteGraphStore>) -> Self {
        Self {
            remote,
            state: GraphState::default(),
        }
    }

    /// Fetch unvisited seeds, their elementary edges and the far endpoints of
    /// those edges.
    ///
    /// Seeds that do not exist are skipped. Fails with `RemoteUnavailable` only
    /// when nothing resolved and every seed fetch failed.
    pub async fn load_seeds(
        &mut self,
        seeds: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExpansionSummary> {
        let delta = self.plan_load(seeds, cancel).await?;
        cancel.check()?;
        Ok(self.commit(delta))
    }

    /// Expand one node already in the graph. Tags, topics and unknown ids are
    /// left alone.
    pub async fn expand_node(
        &mut self,
        node_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ExpansionSummary> {
        let delta = match self.node_kind(node_id) {
            Some(NodeKind::Verse) | Some(NodeKind::Note) => {
                self.plan_entity_expansion(node_id, cancel).await?
            }
            Some(NodeKind::Group) => self.plan_group_expansion(node_id, cancel).await?,
            Some(kind) => {
                debug!(node_id, kind = %kind, "Node kind has no expansion");
                return Ok(self.unchanged());
            }
            None => {
                debug!(node_id, "Node is not in the graph; nothing to expand");
                return Ok(self.unchanged());
            }
        };
        cancel.check()?;
        Ok(self.commit(delta))
    }

    /// Look a verse up by reference, creating it in the store when absent.
    pub async fn resolve_verse(
        &self,
        reference: &VerseRef,
        translation: &str,
        cancel: &CancellationToken,
    ) -> Result<VerseNode> {
        cancel.check()?;
        if let Some(verse) = self
            .remote
            .get_node_by_natural_key(&reference.book, reference.chapter, reference.verse, Some(cancel))
            .await?
        {
            return Ok(verse);
        }
        cancel.check()?;

        info!(reference = %reference, translation, "Creating verse on first reference");
        let created = self
            .remote
            .create_node(NewNode::Verse {
                book: reference.book.clone(),
                chapter: reference.chapter,
                verse_number: reference.verse,
                text: String::new(),
                translation: translation.to_string(),
            })
            .await?;
        match created {
            Node::Verse(verse) => Ok(verse),
            other => Err(GraphError::Internal(anyhow::anyhow!(
                "expected a verse node, store returned a {} node",
                other.kind()
            ))),
        }
    }

    /// Discard the view, including the visited set.
    pub fn reset(&mut self) {
        self.state = GraphState::default();
    }

    pub fn view(&self) -> GraphView {
        GraphView {
            nodes: self.state.nodes.clone(),
            edges: self
                .state
                .edges
                .iter()
                .map(GraphEdge::from_edge)
                .chain(self.state.membership.iter().cloned())
                .collect(),
            focus: self.state.focus.clone(),
        }
    }

    pub fn is_visited(&self, id: &str) -> bool {
        self.state.visited.contains(id)
    }

    pub fn visited_count(&self) -> usize {
        self.state.visited.len()
    }

    pub fn node_kind(&self, id: &str) -> Option<NodeKind> {
        self.state
            .node_index
            .get(id)
            .map(|&slot| self.state.nodes[slot].kind)
    }

    pub fn focus(&self) -> Option<&str> {
        self.state.focus.as_deref()
    }

    /// A materialised hyperedge. Its connection ids only name edges in the view.
    pub fn group(&self, id: &str) -> Option<&GroupConnection> {
        self.state.groups.get(id)
    }

    // ========== Planning ==========

    async fn plan_load(&self, seeds: &[String], cancel: &CancellationToken) -> Result<Delta> {
        cancel.check()?;
        let mut staging = Staging::new(&self.state);

        let mut seen = HashSet::new();
        let seeds: Vec<&str> = seeds
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();
        let unvisited: Vec<&str> = seeds
            .iter()
            .copied()
            .filter(|id| !self.state.visited.contains(*id))
            .collect();

        let fetched = join_all(
            unvisited
                .iter()
                .map(|id| self.remote.get_node_by_id(NodeKind::Verse, id, Some(cancel))),
        )
        .await;

        let mut failures = 0;
        for (id, result) in unvisited.iter().zip(fetched) {
            match result {
                Ok(Some(node)) => staging.stage_node(node),
                Ok(None) => debug!(seed = id, "Seed not found; skipping"),
                Err(err) if err.is_aborted() => return Err(err),
                Err(err) if err.is_not_found() => debug!(seed = id, "Seed not found; skipping"),
                Err(err) => {
                    warn!(seed = id, error = %err, "Failed to fetch seed; skipping");
                    failures += 1;
                }
            }
        }
        cancel.check()?;

        let anchors: Vec<&str> = seeds.iter().copied().filter(|id| staging.knows(id)).collect();
        if anchors.is_empty() && failures > 0 && failures == unvisited.len() {
            return Err(GraphError::RemoteUnavailable(format!(
                "all {failures} seed fetches failed"
            )));
        }
        staging.delta.seeds_resolved = anchors.len();
        staging.delta.skipped += failures;

        let edge_lists = join_all(
            anchors
                .iter()
                .map(|id| self.remote.get_edges_for_node(id, Some(cancel))),
        )
        .await;

        let mut discovered = Vec::new();
        for (id, result) in anchors.iter().zip(edge_lists) {
            match result {
                Ok(edges) => discovered.extend(edges),
                Err(err) if err.is_aborted() => return Err(err),
                Err(err) => {
                    warn!(node_id = id, error = %err, "Failed to fetch edges; skipping");
                    staging.delta.skipped += 1;
                }
            }
        }
        cancel.check()?;

        self.attach_edges(&mut staging, discovered, cancel).await?;
        Ok(staging.finish())
    }

    async fn plan_entity_expansion(&self, node_id: &str, cancel: &CancellationToken) -> Result<Delta> {
        cancel.check()?;
        let mut staging = Staging::new(&self.state);

        let (edges, groups) = tokio::join!(
            self.remote.get_edges_for_node(node_id, Some(cancel)),
            self.remote.get_hyperedges_for_node(node_id, Some(cancel))
        );
        let edges = edges?;
        let groups = groups?;
        cancel.check()?;

        self.attach_edges(&mut staging, edges, cancel).await?;

        let mut wanted = Vec::new();
        for group in &groups {
            staging.stage_node(Node::Group(group.clone()));
            wanted.extend(group.members().map(|member| (member.id.clone(), member.kind)));
        }
        self.resolve_members(&mut staging, wanted, cancel).await?;
        for group in &groups {
            staging.stage_membership(group);
        }
        staging.delta.focus = Some(node_id.to_string());
        Ok(staging.finish())
    }

    async fn plan_group_expansion(&self, group_id: &str, cancel: &CancellationToken) -> Result<Delta> {
        cancel.check()?;
        let mut staging = Staging::new(&self.state);

        let group = match self.state.groups.get(group_id) {
            Some(group) => group.clone(),
            None => match self
                .remote
                .get_node_by_id(NodeKind::Group, group_id, Some(cancel))
                .await?
            {
                Some(Node::Group(group)) => {
                    staging.delta.groups.push(group.clone());
                    group
                }
                _ => {
                    debug!(group_id, "Group no longer exists; nothing to expand");
                    staging.delta.focus = Some(group_id.to_string());
                    return Ok(staging.finish());
                }
            },
        };

        let wanted = group
            .members()
            .map(|member| (member.id.clone(), member.kind))
            .collect();
        self.resolve_members(&mut staging, wanted, cancel).await?;
        staging.stage_membership(&group);
        staging.delta.focus = Some(group_id.to_string());
        Ok(staging.finish())
    }

    /// Resolve the unknown endpoints of `edges`, then stage every edge whose
    /// endpoints are both known. The rest are dropped.
    async fn attach_edges(
        &self,
        staging: &mut Staging<'_>,
        edges: Vec<Edge>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut wanted: Vec<(String, NodeKind)> = Vec::new();
        let mut wanted_ids: HashSet<String> = HashSet::new();
        for edge in &edges {
            for endpoint in [&edge.source_id, &edge.target_id] {
                if !staging.knows(endpoint) && wanted_ids.insert(endpoint.clone()) {
                    wanted.push((endpoint.clone(), edge.endpoint_kind(endpoint)));
                }
            }
        }
        self.resolve_members(staging, wanted, cancel).await?;

        let mut accepted = EdgeDeduplicator::new();
        for edge in edges {
            if staging.knows(&edge.source_id) && staging.knows(&edge.target_id) {
                accepted.insert(edge);
            } else {
                debug!(edge_id = %edge.id, "Dropping edge with an unresolvable endpoint");
            }
        }
        staging.delta.edges.extend(accepted.into_vec());
        Ok(())
    }

    /// Fetch stored nodes concurrently and synthesise tag and topic nodes.
    async fn resolve_members(
        &self,
        staging: &mut Staging<'_>,
        wanted: Vec<(String, NodeKind)>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut stored = Vec::new();
        let mut requested = HashSet::new();
        for (id, kind) in wanted {
            if staging.knows(&id) || !requested.insert(id.clone()) {
                continue;
            }
            if kind.is_stored() {
                stored.push((id, kind));
            } else {
                staging.stage_graph_node(GraphNode::synthetic(id, kind));
            }
        }

        let results = join_all(
            stored
                .iter()
                .map(|(id, kind)| self.remote.get_node_by_id(*kind, id, Some(cancel))),
        )
        .await;

        for ((id, kind), result) in stored.iter().zip(results) {
            match result {
                Ok(Some(node)) => staging.stage_node(node),
                Ok(None) => debug!(node_id = %id, kind = %kind, "Node not found; skipping"),
                Err(err) if err.is_aborted() => return Err(err),
                Err(err) if err.is_not_found() => {
                    debug!(node_id = %id, kind = %kind, "Node not found; skipping")
                }
                Err(err) => {
                    warn!(node_id = %id, kind = %kind, error = %err, "Failed to fetch node; skipping");
                    staging.delta.skipped += 1;
                }
            }
        }
        cancel.check()
    }

    // ========== Commit ==========

    fn commit(&mut self, delta: Delta) -> ExpansionSummary {
        let state = &mut self.state;
        let mut summary = ExpansionSummary {
            seeds_resolved: delta.seeds_resolved,
            skipped: delta.skipped,
            ..Default::default()
        };

        for node in delta.nodes {
            if state.visited.insert(node.id.clone()) {
                state.node_index.insert(node.id.clone(), state.nodes.len());
                state.nodes.push(node);
                summary.nodes_added += 1;
            }
        }
        for group in delta.groups {
            state.group_records.insert(group.id.clone(), group);
        }
        for edge in delta.edges {
            if state.edges.insert(edge) == DedupOutcome::Inserted {
                summary.edges_added += 1;
            }
        }

        // A replaced edge can orphan connection ids, so every group is re-pruned.
        let mut groups: Vec<GroupConnection> = state.group_records.values().cloned().collect();
        let pruned = retain_materialized(&mut groups, state.edges.iter());
        if pruned > 0 {
            debug!(pruned, "Dropped connection ids without a materialised edge");
        }
        state.groups = groups
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        for edge in delta.membership {
            if state.membership_ids.insert(edge.id.clone()) {
                state.membership.push(edge);
                summary.edges_added += 1;
            }
        }
        if delta.focus.is_some() {
            state.focus = delta.focus;
        }

        summary.total_nodes = state.nodes.len();
        summary.total_edges = state.edges.len() + state.membership.len();
        debug!(
            nodes_added = summary.nodes_added,
            edges_added = summary.edges_added,
            total_nodes = summary.total_nodes,
            total_edges = summary.total_edges,
            "Committed graph delta"
        );
        summary
    }

    fn unchanged(&self) -> ExpansionSummary {
        ExpansionSummary {
            total_nodes: self.state.nodes.len(),
            total_edges: self.state.edges.len() + self.state.membership.len(),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for GraphExpansionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExpansionEngine")
            .field("visited", &self.state.visited.len())
            .field("edges", &self.state.edges.len())
            .field("focus", &self.state.focus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use versegraph_model::{EdgeType, GraphEdgeKind, InMemoryGraphStore, MemberRef, Note};

    fn seeds(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn cross_reference_store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store.seed_verse("John 3:16", "For God so loved the world").unwrap();
        store.seed_verse("Romans 8:28", "And we know that all things work together").unwrap();
        store.insert_edge(Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference));
        store
    }

    #[tokio::test]
    async fn seed_with_cross_reference_yields_two_nodes_and_one_edge() {
        let store = cross_reference_store();
        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();

        let summary = engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();
        assert_eq!(summary.seeds_resolved, 1);
        assert_eq!(summary.nodes_added, 2);
        assert_eq!(summary.edges_added, 1);

        let view = engine.view();
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.edges.len(), 1);
        assert!(view.has_edge("John-3-16", "Romans-8-28"));
        assert_eq!(
            view.edges[0].kind,
            GraphEdgeKind::Connection(EdgeType::CrossReference)
        );
    }

    #[tokio::test]
    async fn visited_nodes_are_never_refetched() {
        let store = cross_reference_store();
        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();

        engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();
        let lookups = store.call_count("get_node_by_id");
        assert_eq!(lookups, 2);

        let summary = engine
            .load_seeds(&seeds(&["John-3-16", "Romans-8-28"]), &token)
            .await
            .unwrap();
        assert_eq!(store.call_count("get_node_by_id"), lookups);
        assert_eq!(summary.nodes_added, 0);
        assert_eq!(summary.seeds_resolved, 2);
        assert_eq!(engine.visited_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_edges_collapse_by_canonical_key() {
        let store = cross_reference_store();
        store.insert_edge(Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference));
        store.insert_edge(Edge::new("John-3-16", "Romans-8-28", EdgeType::Thematic));
        let mut engine = GraphExpansionEngine::new(store);

        engine
            .load_seeds(&seeds(&["John-3-16"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.view().edges.len(), 2);
    }

    #[tokio::test]
    async fn edges_to_unresolvable_endpoints_are_dropped() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.seed_verse("John 3:16", "For God so loved the world").unwrap();
        store.insert_edge(Edge::new("John-3-16", "Lost-1-1", EdgeType::Parallel));
        let mut engine = GraphExpansionEngine::new(store);

        let summary = engine
            .load_seeds(&seeds(&["John-3-16"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.nodes_added, 1);
        assert!(engine.view().edges.is_empty());
    }

    #[tokio::test]
    async fn note_derived_edges_pull_in_notes() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.seed_verse("John 3:16", "For God so loved the world").unwrap();
        let note = Note::new("John-3-16", "https://example.org/commentary");
        store.insert_note(note.clone());
        store.insert_edge(Edge::new(&note.id, "John-3-16", EdgeType::NoteDerived));
        let mut engine = GraphExpansionEngine::new(store);

        engine
            .load_seeds(&seeds(&["John-3-16"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.node_kind(&note.id), Some(NodeKind::Note));
        let view = engine.view();
        assert_eq!(
            view.node(&note.id).and_then(|n| n.payload["is_link"].as_bool()),
            Some(true)
        );
    }

    #[tokio::test]
    async fn missing_seeds_give_an_empty_summary() {
        let store = Arc::new(InMemoryGraphStore::new());
        let mut engine = GraphExpansionEngine::new(store);

        let summary = engine
            .load_seeds(&seeds(&["Nowhere-1-1"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.seeds_resolved, 0);
        assert!(engine.view().is_empty());
    }

    #[tokio::test]
    async fn all_seed_fetches_failing_is_an_error() {
        let store = cross_reference_store();
        store.set_unavailable(true);
        let mut engine = GraphExpansionEngine::new(store.clone());

        let err = engine
            .load_seeds(&seeds(&["John-3-16"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::RemoteUnavailable(_)));

        store.set_unavailable(false);
        store.fail_node("Romans-8-28");
        let summary = engine
            .load_seeds(&seeds(&["John-3-16", "Romans-8-28"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.seeds_resolved, 1);
        assert!(summary.skipped >= 1);
    }

    #[tokio::test]
    async fn group_expansion_materialises_membership_edges() {
        let store = Arc::new(InMemoryGraphStore::new());
        let a = store.seed_verse("Genesis 1:1", "In the beginning").unwrap();
        let b = store.seed_verse("John 1:1", "In the beginning was the Word").unwrap();
        let c = store.seed_verse("Hebrews 11:3", "Through faith we understand").unwrap();
        let group = GroupConnection::new(
            vec![MemberRef::verse(&a.id), MemberRef::verse(&b.id)],
            vec![MemberRef::verse(&c.id)],
            EdgeType::Thematic,
        )
        .with_label("Creation");
        store.insert_group(group.clone());

        let mut engine = GraphExpansionEngine::new(store);
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&[a.id.as_str()]), &token).await.unwrap();

        engine.expand_node(&a.id, &token).await.unwrap();
        let view = engine.view();
        assert_eq!(engine.node_kind(&group.id), Some(NodeKind::Group));
        assert_eq!(view.node(&group.id).map(|n| n.label.as_str()), Some("Creation"));
        assert!(view.has_edge(&a.id, &group.id));
        assert!(view.has_edge(&b.id, &group.id));
        assert!(view.has_edge(&group.id, &c.id));
        assert!(view.node(&c.id).is_some());
        assert_eq!(view.edges.len(), 3);
        assert_eq!(engine.focus(), Some(a.id.as_str()));
    }

    #[tokio::test]
    async fn group_expansion_after_verse_expansion_adds_nothing() {
        let store = Arc::new(InMemoryGraphStore::new());
        let a = store.seed_verse("Genesis 1:1", "In the beginning").unwrap();
        let b = store.seed_verse("John 1:1", "In the beginning was the Word").unwrap();
        let c = store.seed_verse("Hebrews 11:3", "Through faith we understand").unwrap();
        let group = GroupConnection::new(
            vec![MemberRef::verse(&a.id), MemberRef::verse(&b.id)],
            vec![MemberRef::verse(&c.id)],
            EdgeType::Thematic,
        );
        store.insert_group(group.clone());

        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&[a.id.as_str()]), &token).await.unwrap();
        engine.expand_node(&a.id, &token).await.unwrap();
        let lookups = store.call_count("get_node_by_id");

        let summary = engine.expand_node(&group.id, &token).await.unwrap();
        assert_eq!(store.call_count("get_node_by_id"), lookups);
        assert_eq!(summary.nodes_added, 0);
        assert_eq!(summary.edges_added, 0);
        assert_eq!(engine.focus(), Some(group.id.as_str()));
    }

    #[tokio::test]
    async fn connection_ids_only_name_edges_in_the_view() {
        let store = cross_reference_store();
        let live = store
            .edges()
            .into_iter()
            .next()
            .expect("cross reference");
        let mut group = GroupConnection::new(
            vec![MemberRef::verse("John-3-16")],
            vec![MemberRef::verse("Romans-8-28")],
            EdgeType::CrossReference,
        );
        group.connection_ids = [live.id.clone(), "deleted-edge".to_string()]
            .into_iter()
            .collect();
        store.insert_group(group.clone());

        let mut engine = GraphExpansionEngine::new(store);
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();
        engine.expand_node("John-3-16", &token).await.unwrap();

        let materialised = engine.group(&group.id).expect("group in view");
        assert_eq!(materialised.connection_ids.len(), 1);
        assert!(materialised.connection_ids.contains(&live.id));
    }

    #[tokio::test]
    async fn tag_members_are_synthesised_locally() {
        let store = Arc::new(InMemoryGraphStore::new());
        let a = store.seed_verse("Ephesians 2:8", "For by grace are ye saved").unwrap();
        let group = GroupConnection::new(
            vec![MemberRef::verse(&a.id)],
            vec![MemberRef::new("grace", NodeKind::Tag)],
            EdgeType::Thematic,
        );
        store.insert_group(group.clone());

        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&[a.id.as_str()]), &token).await.unwrap();
        engine.expand_node(&a.id, &token).await.unwrap();
        let lookups = store.call_count("get_node_by_id");

        engine.expand_node(&group.id, &token).await.unwrap();
        assert_eq!(store.call_count("get_node_by_id"), lookups);
        assert_eq!(engine.node_kind("grace"), Some(NodeKind::Tag));
        assert!(engine.view().has_edge(&group.id, "grace"));

        let calls = store.total_calls();
        let summary = engine.expand_node("grace", &token).await.unwrap();
        assert_eq!(summary.nodes_added, 0);
        assert_eq!(store.total_calls(), calls);
    }

    #[tokio::test]
    async fn unknown_nodes_are_a_no_op() {
        let store = cross_reference_store();
        let mut engine = GraphExpansionEngine::new(store.clone());
        let summary = engine
            .expand_node("John-3-16", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, ExpansionSummary::default());
        assert_eq!(store.total_calls(), 0);
        assert!(engine.focus().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_operations_commit_nothing() {
        let store = cross_reference_store();
        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();
        let before = engine.view();

        store.set_hanging(true);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            trigger.cancel();
        });
        let err = engine.expand_node("John-3-16", &token).await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(engine.view(), before);
        assert!(engine.focus().is_none());
    }

    #[tokio::test]
    async fn resolve_verse_creates_once() {
        let store = Arc::new(InMemoryGraphStore::new());
        let engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();
        let reference: VerseRef = "1 John 4:8".parse().unwrap();

        let created = engine.resolve_verse(&reference, "KJV", &token).await.unwrap();
        assert_eq!(created.id, "1_John-4-8");
        let found = engine.resolve_verse(&reference, "KJV", &token).await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(store.call_count("create_node"), 1);
    }

    #[tokio::test]
    async fn reset_discards_the_view() {
        let store = cross_reference_store();
        let mut engine = GraphExpansionEngine::new(store.clone());
        let token = CancellationToken::new();
        engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();

        engine.reset();
        assert!(engine.view().is_empty());
        assert!(!engine.is_visited("John-3-16"));

        engine.load_seeds(&seeds(&["John-3-16"]), &token).await.unwrap();
        assert_eq!(store.call_count("get_node_by_id"), 4);
    }
}
