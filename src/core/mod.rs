//! Core module containing the filter model, registry and engine

pub mod collection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod normalize;
pub mod predicates;
pub mod registry;
pub mod view;

pub use collection::{CollectionState, EntityCollection, Keyed};
pub use engine::{EntityStream, FilterEngine, ServerReply};
pub use error::CollectionError;
pub use filter::{
    Filter, FilterKind, FilterSpec, FilterTarget, Predicate, SortBy, SortOrder, SortSpec,
    ValueLookup,
};
pub use normalize::{NormalizeOptions, NormalizedFilters};
pub use registry::{FilterRegistry, RegistryOwnership, RegistryState};
pub use view::{FilterRegistryView, SelectOptions};
