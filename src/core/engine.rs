//! The filter engine: filter/sort CRUD, local/server partitioning and the
//! recompute pipeline
//!
//! Every reactive output is a last-value-wins join over the engine's input
//! streams:
//!
//! ```text
//! registry (filters + sort) ──┐
//! collection contents ────────┼──▶ recompute ──▶ filtered (+ sorted) output
//! refresh counter ────────────┘
//! ```
//!
//! The join caches the latest value of each input and re-evaluates once per
//! emission of whichever input fired, reading the most recent value of the
//! others. There is no buffering: a burst of changes collapses into the
//! newest state.
//!
//! In server mode (`with_server`) filters carrying a `Server` kind are
//! excluded from local application and instead feed the normalized view
//! handed to the remote collaborator. At most one collection-replacement
//! subscription is alive at any time; establishing a new one aborts the
//! previous one first.

use crate::core::collection::{CollectionState, EntityCollection, Keyed};
use crate::core::filter::{
    Filter, FilterSpec, FilterTarget, SortBy, SortSpec, ValueLookup,
};
use crate::core::normalize::{normalized_filters, NormalizeOptions, NormalizedFilters};
use crate::core::registry::{FilterRegistry, RegistryOwnership, RegistryState};
use crate::core::view::{FilterRegistryView, SelectOptions};
use anyhow::Result;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Stream of full collection contents returned by a remote-fetch callback.
pub type EntityStream<E> = BoxStream<'static, Vec<E>>;

/// What a `with_server` callback decided to do.
pub enum ServerReply<E> {
    /// No replacement; the caller manages the collection itself.
    Ignore,
    /// Subscribe to the stream and replace the entire collection with each
    /// emission.
    Replace(EntityStream<E>),
}

/// Cached receivers for the recompute join. Each receiver holds the last
/// value of its input; [`RecomputeInputs::changed`] resolves once any input
/// emits.
struct RecomputeInputs<E: Keyed> {
    filters: watch::Receiver<RegistryState<E>>,
    collection: watch::Receiver<CollectionState<E>>,
    refresh: watch::Receiver<u64>,
}

impl<E: Keyed> RecomputeInputs<E> {
    /// Wait until any input changes. Returns `false` once an input's sender
    /// is gone, which ends the downstream output stream.
    async fn changed(&mut self) -> bool {
        tokio::select! {
            res = self.filters.changed() => res.is_ok(),
            res = self.collection.changed() => res.is_ok(),
            res = self.refresh.changed() => res.is_ok(),
        }
    }
}

/// Reactive filter/sort engine over an [`EntityCollection`].
pub struct FilterEngine<E: Keyed + Serialize> {
    registry: Arc<FilterRegistry<E>>,
    view: FilterRegistryView<E>,
    ownership: RegistryOwnership,
    collection: Arc<dyn EntityCollection<E>>,
    refresh: watch::Sender<u64>,
    server: AtomicBool,
    server_options: RwLock<Option<NormalizeOptions>>,
    server_driver: Mutex<Option<JoinHandle<()>>>,
    server_feed: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<E: Keyed + Serialize> FilterEngine<E> {
    /// Create an engine with its own filter registry, named after the
    /// collection. The registry is owned and torn down on destroy.
    pub fn new(collection: Arc<dyn EntityCollection<E>>) -> Self {
        let registry = Arc::new(FilterRegistry::new(format!(
            "{}Filters",
            collection.collection_id()
        )));
        Self::build(collection, registry, RegistryOwnership::Owned)
    }

    /// Create an engine over an injected registry. The registry is borrowed:
    /// several engines may share it and the injecting caller keeps teardown
    /// responsibility.
    pub fn with_registry(
        collection: Arc<dyn EntityCollection<E>>,
        registry: Arc<FilterRegistry<E>>,
    ) -> Self {
        Self::build(collection, registry, RegistryOwnership::Borrowed)
    }

    fn build(
        collection: Arc<dyn EntityCollection<E>>,
        registry: Arc<FilterRegistry<E>>,
        ownership: RegistryOwnership,
    ) -> Self {
        let (refresh, _) = watch::channel(0);
        let view = FilterRegistryView::new(&registry);
        Self {
            registry,
            view,
            ownership,
            collection,
            refresh,
            server: AtomicBool::new(false),
            server_options: RwLock::new(None),
            server_driver: Mutex::new(None),
            server_feed: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<FilterRegistry<E>> {
        &self.registry
    }

    pub fn view(&self) -> &FilterRegistryView<E> {
        &self.view
    }

    pub fn collection(&self) -> &Arc<dyn EntityCollection<E>> {
        &self.collection
    }

    pub fn ownership(&self) -> RegistryOwnership {
        self.ownership
    }

    /// Whether server mode is active.
    pub fn is_server(&self) -> bool {
        self.server.load(AtomicOrdering::SeqCst)
    }

    /// True when a `with_server` callback has been configured.
    pub fn has_server(&self) -> bool {
        self.is_server()
    }

    pub fn set_server(&self, server: bool) {
        self.server.store(server, AtomicOrdering::SeqCst);
    }

    /// Whether sorting is delegated to the remote collaborator (server mode
    /// entered with `with_sort`).
    pub fn sort_delegated(&self) -> bool {
        read(&self.server_options)
            .as_ref()
            .is_some_and(|options| options.with_sort)
    }

    /// Create or update a filter. In server mode a spec without an explicit
    /// `server` flag is placed server-side.
    pub fn set_filter(&self, spec: FilterSpec<E>) {
        self.registry.upsert(spec.into_filter(self.is_server()));
    }

    /// Create or update several filters in one registry emission.
    pub fn set_filters(&self, specs: Vec<FilterSpec<E>>) {
        if specs.is_empty() {
            return;
        }
        let server_default = self.is_server();
        self.registry.upsert_many(
            specs
                .into_iter()
                .map(|spec| spec.into_filter(server_default))
                .collect(),
        );
    }

    pub fn remove_filters(&self, ids: &[&str]) {
        self.registry.remove(ids);
    }

    pub fn clear_filters(&self) {
        self.registry.clear();
    }

    /// Atomically replace the sort specification.
    pub fn set_sort_by(&self, sort: SortSpec<E>) {
        self.registry.set_sort(Some(sort));
    }

    pub fn clear_sort_by(&self) {
        self.registry.set_sort(None);
    }

    pub fn get_sort_by(&self) -> Option<SortSpec<E>> {
        self.registry.get_value().sort
    }

    /// Live sort slice, distinct until changed.
    pub fn select_sort_by(&self) -> BoxStream<'static, Option<SortSpec<E>>> {
        self.view.select(|state| state.sort.clone())
    }

    /// Look up a filter's value, distinguishing a missing filter from one
    /// registered without a value.
    pub fn get_filter_value(&self, id: &str) -> ValueLookup {
        match self.view.get_entity(id) {
            None => ValueLookup::Missing,
            Some(filter) if filter.value == Value::Null => ValueLookup::Unset,
            Some(filter) => ValueLookup::Set(filter.value),
        }
    }

    fn visible_options(&self) -> SelectOptions<E> {
        let server_mode = self.is_server();
        SelectOptions::default()
            .sort_by_order()
            .filter_by(move |f| !f.hide && !(server_mode && f.is_server()))
    }

    /// Snapshot of the visible filters (`hide = false`), ordered by `order`.
    /// In server mode, server-delegated filters are excluded as well.
    pub fn get_filters(&self) -> Vec<Filter<E>> {
        self.view.get_all(self.visible_options())
    }

    /// Reactive counterpart of [`FilterEngine::get_filters`].
    pub fn select_filters(&self) -> BoxStream<'static, Vec<Filter<E>>> {
        self.view.select_all(self.visible_options())
    }

    /// Snapshot of the server-delegated filters, ordered by `order`. Outside
    /// server mode this is identical to [`FilterEngine::get_filters`].
    pub fn get_server_filters(&self) -> Vec<Filter<E>> {
        if self.is_server() {
            self.view.get_all(
                SelectOptions::default()
                    .sort_by_order()
                    .filter_by(|f| f.is_server()),
            )
        } else {
            self.get_filters()
        }
    }

    /// Build the flat id→value view of the server filters.
    pub fn get_normalized_filters(&self, options: &NormalizeOptions) -> NormalizedFilters {
        normalized_filters(
            &self.get_server_filters(),
            self.get_sort_by().as_ref(),
            options,
        )
    }

    /// Force a recompute without any structural change. Returns the new
    /// value of the monotonically increasing counter.
    pub fn refresh(&self) -> u64 {
        let mut next = 0;
        self.refresh.send_modify(|counter| {
            *counter += 1;
            next = *counter;
        });
        next
    }

    fn recompute_inputs(&self) -> RecomputeInputs<E> {
        RecomputeInputs {
            filters: self.registry.subscribe(),
            collection: self.collection.subscribe(),
            refresh: self.refresh.subscribe(),
        }
    }

    /// Live filtered-then-sorted sequence. Emits the current result
    /// immediately, then once per input emission (filters, collection
    /// contents, refresh ticks).
    ///
    /// In server mode, server-delegated filters do not apply locally, and
    /// sorting is skipped entirely when sort delegation (`with_sort`) is on.
    pub fn select_all_by_filters(&self) -> BoxStream<'static, Vec<E>> {
        let inputs = self.recompute_inputs();
        let server_mode = self.is_server();
        let skip_sort = server_mode && self.sort_delegated();
        stream::unfold((inputs, true), move |(mut inputs, first)| async move {
            if !first && !inputs.changed().await {
                return None;
            }
            let state = inputs.filters.borrow().clone();
            let snapshot = inputs.collection.borrow().clone();
            let filters = active_filters(&state, server_mode);
            let sort = if skip_sort { None } else { state.sort.clone() };
            let result = apply_to_sequence(snapshot.to_vec(), &filters, sort.as_ref());
            Some((result, (inputs, false)))
        })
        .boxed()
    }

    /// Live filtered keyed mapping. A mapping has no inherent order, so sort
    /// is intentionally never applied to this shape.
    pub fn select_map_by_filters(&self) -> BoxStream<'static, IndexMap<String, E>> {
        let inputs = self.recompute_inputs();
        let server_mode = self.is_server();
        stream::unfold((inputs, true), move |(mut inputs, first)| async move {
            if !first && !inputs.changed().await {
                return None;
            }
            let state = inputs.filters.borrow().clone();
            let snapshot = inputs.collection.borrow().clone();
            let filters = active_filters(&state, server_mode);
            let result = apply_to_mapping(snapshot.to_map(), &filters);
            Some((result, (inputs, false)))
        })
        .boxed()
    }

    /// Snapshot of the filtered-then-sorted sequence. The snapshot path
    /// applies every registered filter's predicate, hidden and server
    /// filters included.
    pub async fn get_all_by_filters(&self) -> Result<Vec<E>> {
        let entities = self.collection.get_all().await?;
        let state = self.registry.get_value();
        let filters = all_filters_ordered(&state);
        Ok(apply_to_sequence(entities, &filters, state.sort.as_ref()))
    }

    /// Snapshot of the filtered keyed mapping (never sorted).
    pub async fn get_map_by_filters(&self) -> Result<IndexMap<String, E>> {
        let entries = self.collection.get_map().await?;
        let state = self.registry.get_value();
        let filters = all_filters_ordered(&state);
        Ok(apply_to_mapping(entries, &filters))
    }

    /// Enter server mode.
    ///
    /// `on_change` is invoked once with the current normalized filters, then
    /// again whenever the server-filter subset changes, the sort slice
    /// changes (if `options.with_sort`), or [`FilterEngine::refresh`] fires.
    /// A [`ServerReply::Replace`] return subscribes to the stream and
    /// replaces the whole collection per emission, aborting any previous
    /// replacement subscription first.
    pub fn with_server<F>(&self, on_change: F, options: NormalizeOptions) -> &Self
    where
        F: Fn(NormalizedFilters) -> ServerReply<E> + Send + Sync + 'static,
    {
        self.set_server(true);
        *write(&self.server_options) = Some(options.clone());

        let mut filters_rx = self.registry.subscribe();
        let mut refresh_rx = self.refresh.subscribe();
        let collection = Arc::clone(&self.collection);
        let feed = Arc::clone(&self.server_feed);

        let driver = tokio::spawn(async move {
            let state = filters_rx.borrow().clone();
            let mut last_signature = server_signature(&state);
            let mut last_sort = state.sort.clone();
            let mut last_refresh = *refresh_rx.borrow();
            invoke_server_callback(&on_change, &state, &options, &collection, &feed);

            loop {
                let alive = tokio::select! {
                    res = filters_rx.changed() => res.is_ok(),
                    res = refresh_rx.changed() => res.is_ok(),
                };
                if !alive {
                    break;
                }
                let state = filters_rx.borrow().clone();
                let refresh_now = *refresh_rx.borrow();
                let signature = server_signature(&state);
                let sort_now = state.sort.clone();
                let fire = refresh_now != last_refresh
                    || signature != last_signature
                    || (options.with_sort && sort_now != last_sort);
                last_refresh = refresh_now;
                last_signature = signature;
                last_sort = sort_now;
                if fire {
                    invoke_server_callback(&on_change, &state, &options, &collection, &feed);
                }
            }
            tracing::debug!("server delegation driver stopped");
        });

        if let Some(previous) = lock(&self.server_driver).replace(driver) {
            previous.abort();
        }
        self
    }

    /// Tear the engine down: abort the server driver and any replacement
    /// subscription, and clear an owned registry. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(driver) = lock(&self.server_driver).take() {
            driver.abort();
        }
        if let Some(feed) = lock(&self.server_feed).take() {
            feed.abort();
        }
        if self.ownership == RegistryOwnership::Owned {
            self.registry.clear();
        }
    }
}

impl<E: Keyed + Serialize> Drop for FilterEngine<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

/// Filters that apply locally, ordered by `order`. Hidden filters still
/// apply; in server mode, server-delegated filters do not.
fn active_filters<E: Clone>(state: &RegistryState<E>, server_mode: bool) -> Vec<Filter<E>> {
    let mut filters: Vec<Filter<E>> = state
        .filters
        .values()
        .filter(|f| !(server_mode && f.is_server()))
        .cloned()
        .collect();
    filters.sort_by_key(|f| f.order);
    filters
}

fn all_filters_ordered<E: Clone>(state: &RegistryState<E>) -> Vec<Filter<E>> {
    let mut filters: Vec<Filter<E>> = state.filters.values().cloned().collect();
    filters.sort_by_key(|f| f.order);
    filters
}

/// `(id, value)` pairs of the server filters, used for distinct-until-
/// changed detection in the delegation driver.
fn server_signature<E: Clone>(state: &RegistryState<E>) -> Vec<(String, Value)> {
    let mut filters: Vec<&Filter<E>> = state.filters.values().filter(|f| f.is_server()).collect();
    filters.sort_by_key(|f| f.order);
    filters
        .into_iter()
        .map(|f| (f.id.clone(), f.value.clone()))
        .collect()
}

fn invoke_server_callback<E, F>(
    on_change: &F,
    state: &RegistryState<E>,
    options: &NormalizeOptions,
    collection: &Arc<dyn EntityCollection<E>>,
    feed: &Arc<Mutex<Option<JoinHandle<()>>>>,
) where
    E: Keyed + Serialize,
    F: Fn(NormalizedFilters) -> ServerReply<E>,
{
    let mut server: Vec<Filter<E>> = state
        .filters
        .values()
        .filter(|f| f.is_server())
        .cloned()
        .collect();
    server.sort_by_key(|f| f.order);

    let normalized = normalized_filters(&server, state.sort.as_ref(), options);
    if options.as_query_params && normalized.is_empty() {
        return;
    }

    tracing::debug!(
        filters = server.len(),
        "notifying remote collaborator of filter change"
    );
    match on_change(normalized) {
        ServerReply::Replace(mut entities) => {
            // At most one replacement subscription: cancel the previous one
            // before the new stream can deliver anything.
            if let Some(previous) = lock(feed).take() {
                tracing::debug!("cancelling previous server replacement subscription");
                previous.abort();
            }
            let collection = Arc::clone(collection);
            let handle = tokio::spawn(async move {
                while let Some(batch) = entities.next().await {
                    if let Err(error) = collection.set(batch).await {
                        tracing::warn!(error = %error, "failed to replace collection from remote stream");
                        break;
                    }
                }
            });
            *lock(feed) = Some(handle);
        }
        ServerReply::Ignore => {}
    }
}

fn retains<E>(filters: &[Filter<E>], entity: &E, index: usize, target: &FilterTarget<E>) -> bool {
    filters.iter().all(|filter| match filter.predicate() {
        Some(predicate) => predicate(entity, index, target, filter),
        None => true,
    })
}

/// Filter then sort a sequence. Filtering is a logical AND across every
/// predicate-bearing filter; sorting runs strictly afterwards. Comparator
/// sorts receive the full unfiltered input as their third argument and own
/// their direction.
pub(crate) fn apply_to_sequence<E: Clone + Serialize>(
    entities: Vec<E>,
    filters: &[Filter<E>],
    sort: Option<&SortSpec<E>>,
) -> Vec<E> {
    let mut filtered = if filters.iter().any(|f| f.predicate().is_some()) {
        let target = FilterTarget::Sequence(Arc::from(entities.clone()));
        entities
            .iter()
            .enumerate()
            .filter(|(index, entity)| retains(filters, entity, *index, &target))
            .map(|(_, entity)| entity.clone())
            .collect()
    } else {
        entities.clone()
    };

    if let Some(spec) = sort {
        match &spec.sort_by {
            SortBy::Field(field) => {
                let mut keyed: Vec<(Value, E)> = filtered
                    .into_iter()
                    .map(|entity| (field_of(&entity, field), entity))
                    .collect();
                if spec.order.is_descending() {
                    keyed.sort_by(|a, b| compare_field_values(&b.0, &a.0));
                } else {
                    keyed.sort_by(|a, b| compare_field_values(&a.0, &b.0));
                }
                filtered = keyed.into_iter().map(|(_, entity)| entity).collect();
            }
            SortBy::Comparator(comparator) => {
                filtered.sort_by(|a, b| comparator(a, b, &entities));
            }
        }
    }
    filtered
}

/// Filter a keyed mapping with the same AND-across-predicates test. A
/// mapping has no inherent order, so sort never applies here.
pub(crate) fn apply_to_mapping<E: Clone>(
    entries: IndexMap<String, E>,
    filters: &[Filter<E>],
) -> IndexMap<String, E> {
    if filters.iter().all(|f| f.predicate().is_none()) {
        return entries;
    }
    let target = FilterTarget::Mapping(Arc::new(entries.clone()));
    entries
        .iter()
        .enumerate()
        .filter(|(index, (_, entity))| retains(filters, entity, *index, &target))
        .map(|(_, (key, entity))| (key.clone(), entity.clone()))
        .collect()
}

fn field_of<E: Serialize>(entity: &E, field: &str) -> Value {
    serde_json::to_value(entity)
        .ok()
        .and_then(|value| value.get(field).cloned())
        .unwrap_or(Value::Null)
}

/// Generic ascending comparison between two serialized field values.
/// Missing values compare equal, so they keep their relative position.
pub(crate) fn compare_field_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .map(|(x, y)| x.partial_cmp(&y).unwrap_or(Ordering::Equal))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.to_uppercase().cmp(&y.to_uppercase()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, _) | (_, Value::Null) => Ordering::Equal,
        (x, y) => text_of(x).cmp(&text_of(y)),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
