//! Keyed store of filters and the active sort specification
//!
//! The registry is the single source of truth consumed by the engine. State
//! lives inside a `tokio::sync::watch` channel so every projection over it
//! is a last-value-wins stream: readers always observe the most recent
//! snapshot, never a queue of intermediate ones.
//!
//! A registry is exclusively owned by the engine that created it unless it
//! was injected, in which case teardown responsibility stays with the
//! injecting caller (see [`RegistryOwnership`]).

use crate::core::filter::{Filter, SortSpec};
use indexmap::IndexMap;
use tokio::sync::watch;

/// Full registry snapshot: the filter map plus the sort specification.
#[derive(Clone, Debug)]
pub struct RegistryState<E> {
    /// Filters keyed by id. Upserting an existing id keeps its position;
    /// new ids append, so normalization preserves insertion order.
    pub filters: IndexMap<String, Filter<E>>,
    pub sort: Option<SortSpec<E>>,
}

impl<E> Default for RegistryState<E> {
    fn default() -> Self {
        Self {
            filters: IndexMap::new(),
            sort: None,
        }
    }
}

/// Who tears a registry down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryOwnership {
    /// Created by the engine; cleared on destroy.
    Owned,
    /// Injected by the caller; the caller manages its lifecycle.
    Borrowed,
}

/// The filter store.
pub struct FilterRegistry<E> {
    name: String,
    state: watch::Sender<RegistryState<E>>,
}

impl<E: Clone + Send + Sync + 'static> FilterRegistry<E> {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(RegistryState::default());
        Self {
            name: name.into(),
            state,
        }
    }

    /// Store name, used for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create or update a filter. Last write wins on id collisions.
    pub fn upsert(&self, filter: Filter<E>) {
        self.state.send_modify(|state| {
            state.filters.insert(filter.id.clone(), filter);
        });
    }

    /// Create or update several filters in one emission.
    pub fn upsert_many(&self, filters: Vec<Filter<E>>) {
        if filters.is_empty() {
            return;
        }
        self.state.send_modify(|state| {
            for filter in filters {
                state.filters.insert(filter.id.clone(), filter);
            }
        });
    }

    /// Remove the filters with the given ids. Unknown ids are ignored and
    /// removing nothing emits nothing.
    pub fn remove(&self, ids: &[&str]) {
        if ids.is_empty() {
            return;
        }
        self.state.send_if_modified(|state| {
            let before = state.filters.len();
            for id in ids {
                state.filters.shift_remove(*id);
            }
            state.filters.len() != before
        });
    }

    /// Wipe every filter. The sort specification is left in place.
    pub fn clear(&self) {
        self.state.send_if_modified(|state| {
            if state.filters.is_empty() {
                return false;
            }
            state.filters.clear();
            true
        });
    }

    /// Replace the sort specification wholesale.
    pub fn set_sort(&self, sort: Option<SortSpec<E>>) {
        self.state.send_modify(|state| {
            state.sort = sort;
        });
    }

    /// Subscribe to state changes. The receiver starts with the current
    /// snapshot already marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<RegistryState<E>> {
        self.state.subscribe()
    }

    /// Current full snapshot.
    pub fn get_value(&self) -> RegistryState<E> {
        self.state.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{FilterSpec, SortOrder};
    use serde_json::json;

    #[derive(Clone, Debug)]
    struct Row;

    fn filter(id: &str, value: serde_json::Value) -> Filter<Row> {
        FilterSpec::new(id).value(value).into_filter(false)
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let registry: FilterRegistry<Row> = FilterRegistry::new("test-filters");
        registry.upsert(filter("a", json!(1)));
        registry.upsert(filter("a", json!(2)));

        let state = registry.get_value();
        assert_eq!(state.filters.len(), 1);
        assert_eq!(state.filters["a"].value, json!(2));
    }

    #[test]
    fn test_upsert_keeps_insertion_order() {
        let registry: FilterRegistry<Row> = FilterRegistry::new("test-filters");
        registry.upsert(filter("a", json!(1)));
        registry.upsert(filter("b", json!(2)));
        registry.upsert(filter("a", json!(3)));

        let ids: Vec<_> = registry.get_value().filters.keys().cloned().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry: FilterRegistry<Row> = FilterRegistry::new("test-filters");
        registry.upsert_many(vec![
            filter("a", json!(1)),
            filter("b", json!(2)),
            filter("c", json!(3)),
        ]);

        registry.remove(&["a", "missing"]);
        assert_eq!(registry.get_value().filters.len(), 2);

        registry.clear();
        assert!(registry.get_value().filters.is_empty());
    }

    #[test]
    fn test_set_sort_replaces_wholesale() {
        let registry: FilterRegistry<Row> = FilterRegistry::new("test-filters");
        registry.set_sort(Some(SortSpec::field("title", SortOrder::Ascending)));
        registry.set_sort(Some(SortSpec::field("year", SortOrder::Descending)));

        let sort = registry.get_value().sort.unwrap();
        assert_eq!(sort, SortSpec::field("year", SortOrder::Descending));
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let registry: FilterRegistry<Row> = FilterRegistry::new("test-filters");
        let mut rx = registry.subscribe();
        assert!(rx.borrow().filters.is_empty());

        registry.upsert(filter("a", json!(1)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().filters.len(), 1);
    }
}
