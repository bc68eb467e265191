//! Canonical-key edge deduplication.

use std::collections::HashMap;
use versegraph_model::{Edge, EdgeKey};

/// What [`EdgeDeduplicator::insert`] did with an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First edge seen for its canonical key.
    Inserted,
    /// Replaced an older edge with the same key.
    Replaced,
    /// An equal or newer edge with the same key was already present.
    Kept,
}

/// Accumulates edges, keeping one per `(source, target, type)` triple.
///
/// On collision the later `updated_at` wins; ties keep the first edge seen.
#[derive(Debug, Clone, Default)]
pub struct EdgeDeduplicator {
    index: HashMap<EdgeKey, usize>,
    edges: Vec<Edge>,
}

impl EdgeDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, edge: Edge) -> DedupOutcome {
        let key = edge.canonical_key();
        match self.index.get(&key) {
            Some(&slot) => {
                if edge.updated_at > self.edges[slot].updated_at {
                    self.edges[slot] = edge;
                    DedupOutcome::Replaced
                } else {
                    DedupOutcome::Kept
                }
            }
            None => {
                self.index.insert(key, self.edges.len());
                self.edges.push(edge);
                DedupOutcome::Inserted
            }
        }
    }

    /// Insert every edge; returns how many were new or replaced an older copy.
    pub fn extend<I: IntoIterator<Item = Edge>>(&mut self, edges: I) -> usize {
        edges
            .into_iter()
            .map(|edge| self.insert(edge))
            .filter(|outcome| *outcome != DedupOutcome::Kept)
            .count()
    }

    pub fn get(&self, key: &EdgeKey) -> Option<&Edge> {
        self.index.get(key).map(|&slot| &self.edges[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn into_vec(self) -> Vec<Edge> {
        self.edges
    }
}

impl FromIterator<Edge> for EdgeDeduplicator {
    fn from_iter<I: IntoIterator<Item = Edge>>(iter: I) -> Self {
        let mut dedup = Self::new();
        dedup.extend(iter);
        dedup
    }
}

/// One edge per canonical key, in first-seen order.
pub fn dedup_edges<I: IntoIterator<Item = Edge>>(edges: I) -> Vec<Edge> {
    edges.into_iter().collect::<EdgeDeduplicator>().into_vec()
}
