//! # Sift
//!
//! A reactive filter/sort/pagination engine sitting between a keyed entity
//! collection and a presentational grid.
//!
//! ## Features
//!
//! - **Filter registry**: named, orderable filters upserted by id, with a
//!   wholesale-replaceable sort specification
//! - **Local and server filters**: client-applied predicates and
//!   server-delegated filters, partitioned by an exhaustive filter kind
//! - **Live recomputation**: last-value-wins joins over the collection, the
//!   filter set, the sort slice and a manual refresh tick
//! - **Server delegation**: normalized id→value filter views (or query
//!   strings) pushed to a remote callback, with at most one in-flight
//!   collection-replacement subscription
//! - **Grid binding**: a paged, sortable data source with deterministic
//!   page-index clamping and pluggable row value access
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sift::prelude::*;
//!
//! #[derive(Clone, Debug, Serialize)]
//! struct Film {
//!     id: String,
//!     title: String,
//!     year: u32,
//! }
//!
//! impl Keyed for Film {
//!     fn key(&self) -> String {
//!         self.id.clone()
//!     }
//! }
//!
//! let films = Arc::new(InMemoryCollection::with_entities("films", catalogue));
//! let engine = FilterEngine::new(films);
//!
//! engine.set_filter(
//!     FilterSpec::new("year")
//!         .value(json!(1980))
//!         .predicate(|film: &Film, _, _, _| film.year >= 1980),
//! );
//! engine.set_sort_by(SortSpec::field("title", SortOrder::Ascending));
//!
//! let mut results = engine.select_all_by_filters();
//! while let Some(films) = results.next().await {
//!     // filtered then sorted, re-emitted on every change
//! }
//! ```

pub mod core;
pub mod grid;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        collection::{CollectionState, EntityCollection, Keyed},
        engine::{EntityStream, FilterEngine, ServerReply},
        error::CollectionError,
        filter::{
            Filter, FilterKind, FilterSpec, FilterTarget, SortBy, SortOrder, SortSpec, ValueLookup,
        },
        normalize::{NormalizeOptions, NormalizedFilters},
        predicates,
        registry::{FilterRegistry, RegistryOwnership, RegistryState},
        view::{FilterRegistryView, SelectOptions},
    };

    // === Grid ===
    pub use crate::grid::{
        GridDataSource, GridSourceOptions, PageState, Paginator, SortControl, SortState, SortValue,
    };

    // === Storage ===
    pub use crate::storage::InMemoryCollection;

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use futures::StreamExt;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
}
