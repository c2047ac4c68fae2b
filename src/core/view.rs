//! Read-only reactive projections over a [`FilterRegistry`]
//!
//! The view never mutates the registry; it turns the registry's watch
//! channel into ordered filter listings and scalar slices, both as
//! snapshots and as live streams.

use crate::core::filter::Filter;
use crate::core::registry::{FilterRegistry, RegistryState};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type FilterBy<E> = Arc<dyn Fn(&Filter<E>) -> bool + Send + Sync>;

/// Options for [`FilterRegistryView::select_all`] / [`FilterRegistryView::get_all`].
pub struct SelectOptions<E> {
    sort_by_order: bool,
    filter_by: Option<FilterBy<E>>,
}

impl<E> Default for SelectOptions<E> {
    fn default() -> Self {
        Self {
            sort_by_order: false,
            filter_by: None,
        }
    }
}

impl<E> Clone for SelectOptions<E> {
    fn clone(&self) -> Self {
        Self {
            sort_by_order: self.sort_by_order,
            filter_by: self.filter_by.as_ref().map(Arc::clone),
        }
    }
}

impl<E> SelectOptions<E> {
    /// Order the listing ascending by the filters' `order` field. The sort
    /// is stable, so filters sharing an order keep their insertion order.
    pub fn sort_by_order(mut self) -> Self {
        self.sort_by_order = true;
        self
    }

    pub fn filter_by<F>(mut self, filter_by: F) -> Self
    where
        F: Fn(&Filter<E>) -> bool + Send + Sync + 'static,
    {
        self.filter_by = Some(Arc::new(filter_by));
        self
    }

    fn project(&self, state: &RegistryState<E>) -> Vec<Filter<E>>
    where
        E: Clone,
    {
        let mut filters: Vec<Filter<E>> = state
            .filters
            .values()
            .filter(|f| self.filter_by.as_ref().is_none_or(|keep| keep(f)))
            .cloned()
            .collect();
        if self.sort_by_order {
            filters.sort_by_key(|f| f.order);
        }
        filters
    }
}

/// Reactive read side of a [`FilterRegistry`].
#[derive(Clone)]
pub struct FilterRegistryView<E> {
    rx: watch::Receiver<RegistryState<E>>,
}

impl<E: Clone + Send + Sync + 'static> FilterRegistryView<E> {
    pub fn new(registry: &FilterRegistry<E>) -> Self {
        Self {
            rx: registry.subscribe(),
        }
    }

    /// Live ordered filter listing. Emits the current projection
    /// immediately, then once per registry change.
    pub fn select_all(&self, options: SelectOptions<E>) -> BoxStream<'static, Vec<Filter<E>>> {
        let stream = WatchStream::new(self.rx.clone());
        stream.map(move |state| options.project(&state)).boxed()
    }

    /// Live scalar slice with distinct-until-changed semantics.
    pub fn select<T, F>(&self, projector: F) -> BoxStream<'static, T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&RegistryState<E>) -> T + Send + 'static,
    {
        let stream = WatchStream::new(self.rx.clone());
        let mut last: Option<T> = None;
        stream
            .filter_map(move |state| {
                let slice = projector(&state);
                let changed = last.as_ref() != Some(&slice);
                if changed {
                    last = Some(slice.clone());
                }
                futures::future::ready(changed.then_some(slice))
            })
            .boxed()
    }

    /// Snapshot listing.
    pub fn get_all(&self, options: SelectOptions<E>) -> Vec<Filter<E>> {
        options.project(&self.rx.borrow())
    }

    pub fn get_entity(&self, id: &str) -> Option<Filter<E>> {
        self.rx.borrow().filters.get(id).cloned()
    }

    pub fn has_entity(&self, id: &str) -> bool {
        self.rx.borrow().filters.contains_key(id)
    }

    /// Current full snapshot.
    pub fn get_value(&self) -> RegistryState<E> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{FilterSpec, SortOrder, SortSpec};
    use serde_json::json;

    #[derive(Clone, Debug)]
    struct Row;

    fn registry_with(filters: Vec<(&str, i32, bool)>) -> FilterRegistry<Row> {
        let registry = FilterRegistry::new("view-test-filters");
        registry.upsert_many(
            filters
                .into_iter()
                .map(|(id, order, hide)| {
                    FilterSpec::new(id)
                        .value(json!(id))
                        .order(order)
                        .hide(hide)
                        .into_filter(false)
                })
                .collect(),
        );
        registry
    }

    #[test]
    fn test_get_all_sorted_by_order() {
        let registry = registry_with(vec![("b", 20, false), ("a", 10, false), ("c", 15, false)]);
        let view = FilterRegistryView::new(&registry);

        let ids: Vec<_> = view
            .get_all(SelectOptions::default().sort_by_order())
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_get_all_filter_by() {
        let registry = registry_with(vec![("a", 10, false), ("b", 10, true)]);
        let view = FilterRegistryView::new(&registry);

        let visible = view.get_all(SelectOptions::default().filter_by(|f| !f.hide));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "a");
    }

    #[test]
    fn test_entity_lookups() {
        let registry = registry_with(vec![("a", 10, false)]);
        let view = FilterRegistryView::new(&registry);

        assert!(view.has_entity("a"));
        assert!(!view.has_entity("zz"));
        assert_eq!(view.get_entity("a").unwrap().value, json!("a"));
        assert!(view.get_entity("zz").is_none());
    }

    #[tokio::test]
    async fn test_select_all_emits_initial_then_changes() {
        let registry = registry_with(vec![("a", 10, false)]);
        let view = FilterRegistryView::new(&registry);
        let mut stream = view.select_all(SelectOptions::default().sort_by_order());

        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);

        registry.upsert(FilterSpec::new("b").value(json!(2)).into_filter(false));
        let second = stream.next().await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_select_is_distinct_until_changed() {
        let registry = registry_with(vec![("a", 10, false)]);
        let view = FilterRegistryView::new(&registry);
        let mut sorts = view.select(|state| state.sort.clone());

        // Initial slice.
        assert_eq!(sorts.next().await.unwrap(), None);

        // A filter change does not touch the sort slice, so nothing emits
        // until the sort actually changes.
        registry.upsert(FilterSpec::new("b").value(json!(2)).into_filter(false));
        registry.set_sort(Some(SortSpec::field("title", SortOrder::Ascending)));

        let next = sorts.next().await.unwrap().unwrap();
        assert_eq!(next, SortSpec::field("title", SortOrder::Ascending));
    }
}
