use std::sync::Arc;
use versegraph_explorer::{FetchOrchestrator, FetchOutcome, FetchStatus, OrchestratorConfig};
use versegraph_model::{
    Edge, EdgeType, GraphEdgeKind, GroupConnection, InMemoryGraphStore, MemberRef, NodeKind, Note,
};

struct Library {
    store: Arc<InMemoryGraphStore>,
    group: GroupConnection,
    note: Note,
}

fn library() -> Library {
    let store = Arc::new(InMemoryGraphStore::new());
    for (reference, text) in [
        ("John 3:16", "For God so loved the world"),
        ("Romans 8:28", "And we know that all things work together for good"),
        ("Romans 5:8", "But God commendeth his love toward us"),
        ("1 John 4:9", "In this was manifested the love of God"),
    ] {
        store.seed_verse(reference, text).unwrap();
    }
    store.insert_edge(Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference));

    let group = GroupConnection::new(
        vec![MemberRef::verse("John-3-16"), MemberRef::verse("Romans-5-8")],
        vec![MemberRef::verse("1_John-4-9"), MemberRef::new("love", NodeKind::Topic)],
        EdgeType::Thematic,
    )
    .with_label("God's love");
    store.insert_group(group.clone());

    let note = Note::new("John-3-16", "The gospel in one sentence").with_tags(["gospel"]);
    store.insert_note(note.clone());
    store.insert_edge(Edge::new(&note.id, "John-3-16", EdgeType::NoteDerived));

    Library { store, group, note }
}

#[tokio::test]
async fn exploring_outward_from_a_single_verse() {
    let Library { store, group, note } = library();
    let orchestrator = FetchOrchestrator::new(store.clone(), OrchestratorConfig::default());
    let mut updates = orchestrator.subscribe();

    let outcome = orchestrator
        .load_seeds(vec!["John-3-16".to_string()])
        .await
        .unwrap();
    let FetchOutcome::Completed(summary) = outcome else {
        panic!("load was not completed: {outcome:?}");
    };
    assert_eq!(summary.nodes_added, 3);

    assert!(updates.has_changed().unwrap());
    let state = updates.borrow_and_update().clone();
    assert_eq!(state.status, FetchStatus::Ready);
    assert!(state.view.has_edge("John-3-16", "Romans-8-28"));
    assert!(state.view.has_edge(&note.id, "John-3-16"));
    assert!(state.view.node(&group.id).is_none());

    orchestrator.expand_node("John-3-16").await.unwrap();
    let state = orchestrator.current();
    assert_eq!(state.view.focus.as_deref(), Some("John-3-16"));
    assert!(state.view.has_edge("John-3-16", &group.id));
    // Every member is resolved with the group: two stored verses fetched, the
    // topic synthesised.
    assert!(state.view.has_edge("Romans-5-8", &group.id));

    let lookups = store.call_count("get_node_by_id");
    orchestrator.expand_node(&group.id).await.unwrap();
    assert_eq!(store.call_count("get_node_by_id"), lookups);
    assert_eq!(orchestrator.current().view.focus.as_deref(), Some(group.id.as_str()));

    let state = orchestrator.current();
    assert!(state.view.has_edge("Romans-5-8", &group.id));
    assert!(state.view.has_edge(&group.id, "1_John-4-9"));
    assert!(state.view.has_edge(&group.id, "love"));
    assert_eq!(state.view.node("love").map(|n| n.kind), Some(NodeKind::Topic));

    let membership = state
        .view
        .edges
        .iter()
        .filter(|edge| matches!(edge.kind, GraphEdgeKind::GroupSource | GraphEdgeKind::GroupTarget))
        .count();
    assert_eq!(membership, 4);

    // Re-expanding visits nothing new.
    let node_count = state.view.nodes.len();
    let lookups = store.call_count("get_node_by_id");
    orchestrator.expand_node("John-3-16").await.unwrap();
    assert_eq!(store.call_count("get_node_by_id"), lookups);
    assert_eq!(orchestrator.current().view.nodes.len(), node_count);
}

#[tokio::test]
async fn a_reference_string_becomes_a_seed() {
    let Library { store, .. } = library();
    let orchestrator = FetchOrchestrator::new(store.clone(), OrchestratorConfig::default());

    let reference = "Romans 8:28".parse().unwrap();
    orchestrator.load_reference(&reference, None).await.unwrap();

    let state = orchestrator.current();
    assert!(state.view.node("Romans-8-28").is_some());
    assert!(state.view.node("John-3-16").is_some());
    assert_eq!(store.call_count("create_node"), 0);
}
