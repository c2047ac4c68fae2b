//! The keyed-collection seam the engine filters over
//!
//! The engine does not own entity storage; it consumes any store exposing
//! CRUD plus a reactive snapshot stream through [`EntityCollection`]. A
//! reference in-memory implementation lives in `storage::in_memory`.

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::watch;

/// An entity with a stable key.
pub trait Keyed: Clone + Send + Sync + 'static {
    fn key(&self) -> String;
}

/// Cheaply cloneable snapshot of a collection's contents.
///
/// Entries preserve insertion order, so the sequence and mapping views of
/// one snapshot always agree.
#[derive(Clone, Debug)]
pub struct CollectionState<E> {
    entries: Arc<IndexMap<String, E>>,
}

impl<E> Default for CollectionState<E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(IndexMap::new()),
        }
    }
}

impl<E: Keyed> CollectionState<E> {
    pub fn from_entities(entities: Vec<E>) -> Self {
        Self {
            entries: Arc::new(entities.into_iter().map(|e| (e.key(), e)).collect()),
        }
    }

    pub fn entries(&self) -> &IndexMap<String, E> {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut IndexMap<String, E> {
        Arc::make_mut(&mut self.entries)
    }

    pub fn to_vec(&self) -> Vec<E> {
        self.entries.values().cloned().collect()
    }

    pub fn to_map(&self) -> IndexMap<String, E> {
        self.entries.as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reactive keyed entity store.
///
/// CRUD mirrors the usual service seam; `subscribe` is the reactive read
/// primitive every recompute join hangs off.
#[async_trait]
pub trait EntityCollection<E: Keyed>: Send + Sync {
    /// Stable identifier for this collection (used to derive the name of an
    /// internally created filter registry).
    fn collection_id(&self) -> &str;

    /// Subscribe to content changes. The receiver starts with the current
    /// snapshot already marked as seen.
    fn subscribe(&self) -> watch::Receiver<CollectionState<E>>;

    /// Replace the entire collection content.
    async fn set(&self, entities: Vec<E>) -> Result<()>;

    /// Insert an entity (or overwrite one with the same key).
    async fn add(&self, entity: E) -> Result<()>;

    /// Update an existing entity by key.
    async fn update(&self, key: &str, entity: E) -> Result<()>;

    /// Remove an entity by key. Unknown keys are ignored.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Get an entity by key.
    async fn get(&self, key: &str) -> Result<Option<E>>;

    /// Snapshot of the ordered sequence.
    async fn get_all(&self) -> Result<Vec<E>>;

    /// Snapshot of the keyed mapping.
    async fn get_map(&self) -> Result<IndexMap<String, E>>;
}
