//! Local-first note and edge edits.
//!
//! Writes land in the local cache only. They carry fresh ids and timestamps, so
//! the next sync pass sees them as pending and pushes them upstream.

use tracing::debug;
use versegraph_model::cache::collections;
use versegraph_model::{
    normalize_tags, Edge, EdgeType, GraphError, LocalCache, Note, Result, Timestamp,
};

/// Records note and edge mutations in the local cache.
#[derive(Debug, Clone)]
pub struct OfflineWriter {
    cache: LocalCache,
}

impl OfflineWriter {
    pub fn new(cache: LocalCache) -> Self {
        Self { cache }
    }

    pub async fn create_note<I, S>(&self, verse_id: &str, content: &str, tags: I) -> Result<Note>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if verse_id.trim().is_empty() {
            return Err(GraphError::InvalidReference(
                "a note must reference a verse".to_string(),
            ));
        }
        let note = Note::new(verse_id, content).with_tags(tags);
        let stored = note.clone();
        self.cache
            .update_collection(collections::NOTES, move |notes: &mut Vec<Note>| {
                notes.push(stored);
                Ok(())
            })
            .await?;
        debug!(note_id = %note.id, verse_id, "Recorded note locally");
        Ok(note)
    }

    /// Replace the content and/or tags of a cached note.
    pub async fn edit_note(
        &self,
        id: &str,
        content: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Note> {
        let note = self
            .cache
            .update_collection(collections::NOTES, |notes: &mut Vec<Note>| {
                let note = notes
                    .iter_mut()
                    .find(|note| note.id == id)
                    .ok_or_else(|| GraphError::NotFound(format!("note {id}")))?;
                if let Some(content) = content {
                    note.content = content;
                }
                if let Some(tags) = tags {
                    note.tags = normalize_tags(tags);
                }
                note.updated_at = advance(note.updated_at);
                Ok(note.clone())
            })
            .await?;
        debug!(note_id = id, "Edited note locally");
        Ok(note)
    }

    /// Create an edge, or refresh the description of the edge that already
    /// connects the same endpoints with the same type.
    pub async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        description: Option<String>,
    ) -> Result<Edge> {
        let mut fresh = Edge::new(source_id, target_id, edge_type);
        fresh.description = description.clone();
        let key = fresh.canonical_key();

        self.cache
            .update_collection(collections::EDGES, move |edges: &mut Vec<Edge>| {
                if let Some(existing) = edges.iter_mut().find(|edge| edge.canonical_key() == key) {
                    if description.is_some() && existing.description != description {
                        existing.description = description;
                        existing.updated_at = advance(existing.updated_at);
                    }
                    return Ok(existing.clone());
                }
                edges.push(fresh.clone());
                Ok(fresh)
            })
            .await
    }

    pub async fn edit_edge(&self, id: &str, description: Option<String>) -> Result<Edge> {
        self.cache
            .update_collection(collections::EDGES, |edges: &mut Vec<Edge>| {
                let edge = edges
                    .iter_mut()
                    .find(|edge| edge.id == id)
                    .ok_or_else(|| GraphError::NotFound(format!("edge {id}")))?;
                edge.description = description;
                edge.updated_at = advance(edge.updated_at);
                Ok(edge.clone())
            })
            .await
    }

    pub async fn notes(&self) -> Result<Vec<Note>> {
        self.cache.get_collection(collections::NOTES).await
    }

    pub async fn edges(&self) -> Result<Vec<Edge>> {
        self.cache.get_collection(collections::EDGES).await
    }
}

/// A timestamp strictly after `previous`, normally the current time.
fn advance(previous: Timestamp) -> Timestamp {
    let now = Timestamp::now();
    if now > previous {
        now
    } else {
        Timestamp::from_millis(previous.as_millis() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_notes_are_cached() {
        let writer = OfflineWriter::new(LocalCache::in_memory());
        let note = writer
            .create_note("John-3-16", "God so loved", ["love", " love "])
            .await
            .unwrap();

        let notes = writer.notes().await.unwrap();
        assert_eq!(notes, vec![note.clone()]);
        assert_eq!(note.tags.len(), 1);
    }

    #[tokio::test]
    async fn notes_need_a_verse() {
        let writer = OfflineWriter::new(LocalCache::in_memory());
        let err = writer
            .create_note("  ", "orphan", Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn edits_move_updated_at_forward() {
        let writer = OfflineWriter::new(LocalCache::in_memory());
        let note = writer
            .create_note("John-3-16", "draft", Vec::<String>::new())
            .await
            .unwrap();

        let edited = writer
            .edit_note(&note.id, Some("final".to_string()), Some(vec!["grace".to_string()]))
            .await
            .unwrap();
        assert_eq!(edited.content, "final");
        assert!(edited.updated_at > note.updated_at);
        assert_eq!(edited.created_at, note.created_at);

        let err = writer.edit_note("missing", None, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_edges_reuse_the_existing_record() {
        let writer = OfflineWriter::new(LocalCache::in_memory());
        let first = writer
            .create_edge("John-3-16", "Romans-8-28", EdgeType::CrossReference, None)
            .await
            .unwrap();
        let second = writer
            .create_edge(
                "John-3-16",
                "Romans-8-28",
                EdgeType::CrossReference,
                Some("love and purpose".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.description.as_deref(), Some("love and purpose"));
        assert_eq!(writer.edges().await.unwrap().len(), 1);

        let cleared = writer.edit_edge(&first.id, None).await.unwrap();
        assert!(cleared.description.is_none());
        assert!(cleared.updated_at > second.updated_at);
    }
}
