//! Integration tests for the grid data source
//!
//! These tests verify:
//! - Client-side paging of the filtered output
//! - Deterministic page-index clamping when the filtered count shrinks
//! - The filtered-count stream
//! - Sort-control wiring (default sort, comparator sort, remote pass-through)
//! - The search sugar over the reserved filter id
//! - Server pagination filter derivation and page reset on filter changes
//! - Teardown behavior for owned and injected engines

use sift::prelude::*;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Film {
    id: String,
    title: String,
    year: u32,
}

impl Keyed for Film {
    fn key(&self) -> String {
        self.id.clone()
    }
}

fn film(id: &str, title: &str, year: u32) -> Film {
    Film {
        id: id.to_string(),
        title: title.to_string(),
        year,
    }
}

/// `n` films with ids `f0..fn`, years increasing from 1970.
fn films(n: usize) -> Vec<Film> {
    (0..n)
        .map(|i| film(&format!("f{}", i), &format!("Film {:02}", i), 1970 + i as u32))
        .collect()
}

fn source_over(entities: Vec<Film>) -> GridDataSource<Film> {
    GridDataSource::new(Arc::new(InMemoryCollection::with_entities(
        "films", entities,
    )))
}

/// Wait until the watched value satisfies the predicate.
async fn wait_until<T: Clone>(
    rx: &mut watch::Receiver<T>,
    mut pred: impl FnMut(&T) -> bool,
) -> T {
    timeout(Duration::from_secs(1), async {
        loop {
            if pred(&rx.borrow()) {
                break;
            }
            rx.changed().await.expect("watch sender dropped");
        }
    })
    .await
    .expect("condition not reached in time");
    let value = rx.borrow().clone();
    value
}

// =============================================================================
// Client-side pagination
// =============================================================================

mod pagination {
    use super::*;

    #[tokio::test]
    async fn test_renders_current_page() {
        let source = source_over(films(25));
        let paginator = Arc::new(Paginator::new(10));
        source.set_paginator(paginator.clone());

        let mut rows = source.connect();
        wait_until(&mut rows, |page| page.len() == 10).await;

        paginator.set_page_index(2);
        let last_page = wait_until(&mut rows, |page| page.len() == 5).await;
        assert_eq!(last_page[0].id, "f20");
        assert_eq!(paginator.length(), 25);
    }

    #[tokio::test]
    async fn test_count_shrink_clamps_page_index() {
        let source = source_over(films(25));
        let paginator = Arc::new(Paginator::new(10));
        source.set_paginator(paginator.clone());

        let mut rows = source.connect();
        wait_until(&mut rows, |page| page.len() == 10).await;

        // Last valid page for 25 rows of 10.
        paginator.set_page_index(2);
        wait_until(&mut rows, |page| page.len() == 5).await;

        // Shrink the filtered set to 5: the page index must clamp to 0 and
        // the first page must render.
        source.set_filter(
            FilterSpec::new("year")
                .value(json!(1975))
                .predicate(|f: &Film, _, _, _| f.year < 1975),
        );
        let page = wait_until(&mut rows, |page| {
            page.len() == 5 && page.first().is_some_and(|f| f.id == "f0")
        })
        .await;
        assert_eq!(paginator.page_index(), 0);
        assert_eq!(page.len(), 5);
        assert_eq!(paginator.length(), 5);
    }

    #[tokio::test]
    async fn test_count_stream_follows_filtering() {
        let source = source_over(films(12));
        let mut count = source.select_count();
        wait_until(&mut count, |c| *c == 12).await;

        source.set_filter(
            FilterSpec::new("year")
                .value(json!(1974))
                .predicate(|f: &Film, _, _, _| f.year < 1974),
        );
        wait_until(&mut count, |c| *c == 4).await;
        assert_eq!(source.count(), 4);

        source.clear_filters();
        wait_until(&mut count, |c| *c == 12).await;
    }

    #[tokio::test]
    async fn test_without_paginator_all_rows_render() {
        let source = source_over(films(25));
        let mut rows = source.connect();
        wait_until(&mut rows, |page| page.len() == 25).await;
    }
}

// =============================================================================
// Sort wiring
// =============================================================================

mod sorting {
    use super::*;

    #[tokio::test]
    async fn test_initial_sort_state_becomes_default_field_sort() {
        let source = source_over(films(5));
        let control = Arc::new(SortControl::with_active("year", SortOrder::Descending));
        source.set_sort_control(control);

        let mut rows = source.connect();
        let page = wait_until(&mut rows, |page| {
            page.first().is_some_and(|f| f.id == "f4")
        })
        .await;
        assert_eq!(page.last().unwrap().id, "f0");
    }

    #[tokio::test]
    async fn test_sort_change_wires_an_accessor_comparator() {
        let source = source_over(films(5));
        let control = Arc::new(SortControl::new());
        source.set_sort_control(control.clone());

        let mut rows = source.connect();
        wait_until(&mut rows, |page| page.len() == 5).await;

        control.sort("year", SortOrder::Descending);
        wait_until(&mut rows, |page| {
            page.first().is_some_and(|f| f.id == "f4")
        })
        .await;

        control.sort("title", SortOrder::Ascending);
        wait_until(&mut rows, |page| {
            page.first().is_some_and(|f| f.id == "f0")
        })
        .await;

        let sort = source.engine().get_sort_by().unwrap();
        assert!(matches!(sort.sort_by, SortBy::Comparator(_)));
    }

    #[tokio::test]
    async fn test_sort_passes_through_under_remote_delegation() {
        let source = source_over(films(5));
        source.with_server(
            |_| ServerReply::Ignore,
            NormalizeOptions::default().with_sort(),
        );
        let control = Arc::new(SortControl::new());
        source.set_sort_control(control.clone());

        control.sort("year", SortOrder::Descending);
        // The engine sort must become a plain field/direction pass-through.
        timeout(Duration::from_secs(1), async {
            loop {
                if let Some(sort) = source.engine().get_sort_by() {
                    if matches!(&sort.sort_by, SortBy::Field(f) if f == "year") {
                        assert_eq!(sort.order, SortOrder::Descending);
                        break;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}

// =============================================================================
// Search sugar
// =============================================================================

mod search {
    use super::*;

    #[tokio::test]
    async fn test_search_sets_a_server_filter_on_the_reserved_id() {
        let source = source_over(films(5));
        source.set_search("alien");

        assert_eq!(source.search(), "alien");
        let filter = source
            .engine()
            .registry()
            .get_value()
            .filters
            .get("search")
            .cloned()
            .expect("search filter registered");
        assert!(filter.is_server());
        assert_eq!(filter.value, json!("alien"));

        source.set_search("");
        assert_eq!(source.search(), "");
        assert!(source.engine().registry().get_value().filters.is_empty());
    }

    #[tokio::test]
    async fn test_search_value_reads_through_get_filter_value() {
        let source = source_over(films(5));
        assert_eq!(source.get_filter_value("search"), ValueLookup::Missing);

        source.set_search("blade");
        assert_eq!(
            source.get_filter_value("search"),
            ValueLookup::Set(json!("blade"))
        );
    }
}

// =============================================================================
// Server pagination
// =============================================================================

mod server_pagination {
    use super::*;

    fn options() -> GridSourceOptions {
        GridSourceOptions {
            server_pagination: true,
            ..GridSourceOptions::default()
        }
    }

    #[tokio::test]
    async fn test_page_events_derive_reserved_server_filters() {
        let source = source_over(films(0));
        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
        source.with_server(
            move |normalized| {
                calls_tx.send(normalized).unwrap();
                ServerReply::Ignore
            },
            NormalizeOptions::default(),
        );
        source.set_options(options());

        let paginator = Arc::new(Paginator::new(10));
        source.set_paginator(paginator.clone());

        // Initial derivation: page 0, size 10.
        let called = timeout(Duration::from_secs(2), async {
            loop {
                let normalized = calls_rx.recv().await.unwrap();
                if let Some(map) = normalized.as_map() {
                    if map.contains_key("page") {
                        break normalized;
                    }
                }
            }
        })
        .await
        .unwrap();
        let map = called.as_map().unwrap();
        assert_eq!(map["page"], json!(0));
        assert_eq!(map["size"], json!(10));

        // Pagination filters are derived hidden.
        let page_filter = source
            .engine()
            .registry()
            .get_value()
            .filters
            .get("page")
            .cloned()
            .unwrap();
        assert!(page_filter.hide);
        assert!(page_filter.is_server());

        // A page change re-derives and notifies the server again.
        paginator.set_page_index(3);
        let called = timeout(Duration::from_secs(2), async {
            loop {
                let normalized = calls_rx.recv().await.unwrap();
                if normalized
                    .as_map()
                    .is_some_and(|m| m.get("page") == Some(&json!(3)))
                {
                    break normalized;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(called.as_map().unwrap()["size"], json!(10));
    }

    #[tokio::test]
    async fn test_filter_changes_reset_the_page_index() {
        let source = source_over(films(0));
        source.with_server(|_| ServerReply::Ignore, NormalizeOptions::default());
        source.set_options(options());

        let paginator = Arc::new(Paginator::new(10));
        source.set_paginator(paginator.clone());

        let mut pages = paginator.subscribe();
        paginator.set_page_index(4);
        wait_until(&mut pages, |p| p.page_index == 4).await;

        // A non-pagination filter change jumps back to the first page.
        source.set_filter(FilterSpec::new("genre").value(json!("sci-fi")));
        wait_until(&mut pages, |p| p.page_index == 0).await;
    }
}

// =============================================================================
// Teardown
// =============================================================================

mod teardown {
    use super::*;

    #[tokio::test]
    async fn test_disconnect_destroys_an_owned_engine() {
        let source = source_over(films(5));
        source.set_filter(FilterSpec::new("a").value(json!(1)));

        source.disconnect();
        assert!(source.engine().registry().get_value().filters.is_empty());

        // Disconnect is idempotent.
        source.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_leaves_an_injected_engine_alone() {
        let collection: Arc<dyn EntityCollection<Film>> =
            Arc::new(InMemoryCollection::with_entities("films", films(5)));
        let engine = Arc::new(FilterEngine::new(collection));
        engine.set_filter(FilterSpec::new("a").value(json!(1)));

        let source = GridDataSource::with_engine(engine.clone());
        source.disconnect();

        assert_eq!(engine.registry().get_value().filters.len(), 1);
    }

    #[tokio::test]
    async fn test_rendering_stops_after_disconnect() {
        let source = source_over(films(5));
        let mut rows = source.connect();
        wait_until(&mut rows, |page| page.len() == 5).await;

        source.disconnect();
        source.set_filter(
            FilterSpec::new("none")
                .value(json!(0))
                .predicate(|_: &Film, _, _, _| false),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rows.borrow().len(), 5);
    }
}
