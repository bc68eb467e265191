//! Last-writer-wins reconciliation of versioned entities.

use std::collections::{HashMap, HashSet};
use versegraph_model::{Edge, EdgeType, GroupConnection, Note, Versioned};

/// Counters describing what a merge did, used for pass summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Remote copies that replaced a local entity.
    pub replaced: usize,
    /// Remote entities with no local counterpart.
    pub added: usize,
    /// Local entities that survived because they were strictly newer.
    pub kept_local: usize,
}

/// Merge two collections by identity, keeping the most recently updated copy.
///
/// Remote wins ties. Output order is local insertion order followed by
/// remote-only entities.
pub fn merge<E, L, R>(local: L, remote: R) -> Vec<E>
where
    E: Versioned,
    L: IntoIterator<Item = E>,
    R: IntoIterator<Item = E>,
{
    merge_with_stats(local, remote).0
}

pub fn merge_with_stats<E, L, R>(local: L, remote: R) -> (Vec<E>, MergeStats)
where
    E: Versioned,
    L: IntoIterator<Item = E>,
    R: IntoIterator<Item = E>,
{
    let mut stats = MergeStats::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<E> = Vec::new();

    for entity in local {
        let slot = index.get(entity.identity()).copied();
        match slot {
            Some(slot) => {
                if entity.updated_at() > merged[slot].updated_at() {
                    merged[slot] = entity;
                }
            }
            None => {
                index.insert(entity.identity().to_string(), merged.len());
                merged.push(entity);
            }
        }
    }

    for entity in remote {
        let slot = index.get(entity.identity()).copied();
        match slot {
            Some(slot) if entity.updated_at() >= merged[slot].updated_at() => {
                merged[slot] = entity;
                stats.replaced += 1;
            }
            Some(_) => stats.kept_local += 1,
            None => {
                index.insert(entity.identity().to_string(), merged.len());
                merged.push(entity);
                stats.added += 1;
            }
        }
    }

    (merged, stats)
}

/// One `NoteDerived` edge per note, running from the note to its verse.
///
/// Ids are derived from the note id so repeated derivation yields the same
/// edge rather than a fresh one.
pub fn derive_note_edges(notes: &[Note]) -> Vec<Edge> {
    notes
        .iter()
        .filter(|note| !note.verse_id.is_empty())
        .map(|note| Edge {
            id: format!("note-edge-{}", note.id),
            source_id: note.id.clone(),
            target_id: note.verse_id.clone(),
            edge_type: EdgeType::NoteDerived,
            description: None,
            created_at: note.created_at,
            updated_at: note.updated_at,
        })
        .collect()
}

/// Drop hyperedge connection ids that do not name one of `edges`.
/// Returns the total number of ids removed.
pub fn retain_materialized<'a, I>(groups: &mut [GroupConnection], edges: I) -> usize
where
    I: IntoIterator<Item = &'a Edge>,
{
    let live: HashSet<&str> = edges.into_iter().map(|edge| edge.id.as_str()).collect();
    groups
        .iter_mut()
        .map(|group| group.retain_connections(&live))
        .sum()
}
