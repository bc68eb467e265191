//! Entity model and collaborator boundaries for versegraph.
//!
//! This crate holds everything the reconciliation, expansion and sync layers
//! agree on:
//!
//! - **Entities**: verses, notes, typed edges and group hyperedges, all
//!   versioned by an `updated_at` [`Timestamp`].
//! - **View model**: the ephemeral [`GraphNode`] / [`GraphEdge`] projection
//!   rebuilt on every expansion.
//! - **Collaborators**: the [`RemoteGraphStore`] trait for the authoritative
//!   store and the [`KeyValueStore`] primitive behind [`LocalCache`].
//! - **Cancellation**: a cloneable [`CancellationToken`] passed to every
//!   remote read.
//!
//! In-memory implementations of both collaborators live in [`memory`] and
//! [`cache`]; they back the test suites of the downstream crates.

pub mod cache;
pub mod cancel;
pub mod error;
pub mod memory;
pub mod reference;
pub mod store;
pub mod timestamp;
pub mod types;
pub mod view;

pub use cache::{collections, FileKvStore, KeyValueStore, LocalCache, MemoryKvStore};
pub use cancel::CancellationToken;
pub use error::{GraphError, Result};
pub use memory::InMemoryGraphStore;
pub use reference::VerseRef;
pub use store::{EdgePatch, HyperedgeOptions, NewNode, RemoteGraphStore};
pub use timestamp::Timestamp;
pub use types::{
    normalize_tags, Edge, EdgeKey, EdgeType, GroupConnection, MemberRef, Node, NodeKind, Note,
    VerseNode, Versioned,
};
pub use view::{GraphEdge, GraphEdgeKind, GraphNode, GraphView};
