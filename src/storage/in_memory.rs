//! In-memory implementation of EntityCollection for testing and development

use crate::core::collection::{CollectionState, EntityCollection, Keyed};
use crate::core::error::CollectionError;
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::watch;

/// In-memory entity collection
///
/// Useful for testing and development. Contents live inside a watch channel,
/// so every mutation is one snapshot emission and subscribers always read
/// the latest state.
pub struct InMemoryCollection<E> {
    id: String,
    state: watch::Sender<CollectionState<E>>,
}

impl<E: Keyed> InMemoryCollection<E> {
    /// Create an empty collection with the given stable identifier.
    pub fn new(id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            id: id.into(),
            state,
        }
    }

    /// Create a collection pre-populated with entities.
    pub fn with_entities(id: impl Into<String>, entities: Vec<E>) -> Self {
        let (state, _) = watch::channel(CollectionState::from_entities(entities));
        Self {
            id: id.into(),
            state,
        }
    }
}

#[async_trait]
impl<E: Keyed> EntityCollection<E> for InMemoryCollection<E> {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> watch::Receiver<CollectionState<E>> {
        self.state.subscribe()
    }

    async fn set(&self, entities: Vec<E>) -> Result<()> {
        self.state
            .send_replace(CollectionState::from_entities(entities));
        Ok(())
    }

    async fn add(&self, entity: E) -> Result<()> {
        self.state.send_modify(|state| {
            state.entries_mut().insert(entity.key(), entity);
        });
        Ok(())
    }

    async fn update(&self, key: &str, entity: E) -> Result<()> {
        if !self.state.borrow().entries().contains_key(key) {
            return Err(CollectionError::NotFound {
                collection: self.id.clone(),
                key: key.to_string(),
            }
            .into());
        }
        self.state.send_modify(|state| {
            state.entries_mut().insert(key.to_string(), entity);
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.state.send_if_modified(|state| {
            state.entries_mut().shift_remove(key).is_some()
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<E>> {
        Ok(self.state.borrow().entries().get(key).cloned())
    }

    async fn get_all(&self) -> Result<Vec<E>> {
        Ok(self.state.borrow().to_vec())
    }

    async fn get_map(&self) -> Result<IndexMap<String, E>> {
        Ok(self.state.borrow().to_map())
    }
}
