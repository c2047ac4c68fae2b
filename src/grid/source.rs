//! Grid-binding data source
//!
//! [`GridDataSource`] binds a [`FilterEngine`]'s filtered/sorted output to a
//! paged, sortable grid:
//!
//! ```text
//! engine.select_all_by_filters() ──┐
//! paginator events ────────────────┼──▶ render loop ──▶ current page of rows
//! sort-control events ─▶ engine sort ┘                ──▶ filtered count
//! ```
//!
//! The render loop recomputes the visible page per filtered emission and per
//! paging event. When the filtered count changes under client-side
//! pagination, the paginator length is refreshed and an out-of-range page
//! index is clamped back to the last page — deferred to its own task so
//! paging state is never mutated in the middle of a recompute pass.

use crate::core::collection::{EntityCollection, Keyed};
use crate::core::engine::{FilterEngine, ServerReply};
use crate::core::filter::{Filter, FilterSpec, SortOrder, SortSpec, ValueLookup};
use crate::core::normalize::{NormalizeOptions, NormalizedFilters};
use crate::core::predicates::filters_changed;
use crate::core::view::SelectOptions;
use crate::grid::paginator::{PageState, Paginator};
use crate::grid::sort::{
    compare_rows, default_sorting_data_accessor, SortControl, SortState, SortValue,
    SortingDataAccessor,
};
use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Behavior knobs for a [`GridDataSource`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSourceOptions {
    /// Reserved filter id used by the search sugar.
    pub search_filter_id: String,
    /// Derive pagination filters from the paginator instead of slicing
    /// locally.
    pub server_pagination: bool,
    pub page_index_id: String,
    pub page_index_name: String,
    pub page_index_display: bool,
    pub page_size_id: String,
    pub page_size_name: String,
    pub page_size_display: bool,
    /// Coalesce render passes that land within this window.
    pub debounce_between_changes: Option<Duration>,
    /// Jump back to the first page when any non-pagination filter changes.
    pub reset_page_index_on_filters_change: bool,
}

impl Default for GridSourceOptions {
    fn default() -> Self {
        Self {
            search_filter_id: "search".to_string(),
            server_pagination: false,
            page_index_id: "page".to_string(),
            page_index_name: "Page".to_string(),
            page_index_display: false,
            page_size_id: "size".to_string(),
            page_size_name: "Size".to_string(),
            page_size_display: false,
            debounce_between_changes: None,
            reset_page_index_on_filters_change: true,
        }
    }
}

/// Reactive data source binding a [`FilterEngine`] to a grid.
///
/// Must be created inside a tokio runtime: the render pipeline and the
/// collaborator wirings run as background tasks.
pub struct GridDataSource<E: Keyed + Serialize> {
    engine: Arc<FilterEngine<E>>,
    /// An internally created engine is cleared and destroyed on disconnect;
    /// an injected one is left to its owner.
    owned_engine: bool,
    options: RwLock<GridSourceOptions>,
    render: watch::Sender<Vec<E>>,
    count: watch::Sender<usize>,
    paginator: RwLock<Option<Arc<Paginator>>>,
    sort_control: RwLock<Option<Arc<SortControl>>>,
    accessor: Arc<RwLock<SortingDataAccessor<E>>>,
    render_task: Mutex<Option<JoinHandle<()>>>,
    pagination_task: Mutex<Option<JoinHandle<()>>>,
    reset_task: Mutex<Option<JoinHandle<()>>>,
    sort_task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Keyed + Serialize> GridDataSource<E> {
    /// Create a data source with its own engine over `collection`.
    pub fn new(collection: Arc<dyn EntityCollection<E>>) -> Self {
        Self::build(Arc::new(FilterEngine::new(collection)), true)
    }

    /// Create a data source over an externally owned engine, e.g. one shared
    /// with other consumers. The engine survives disconnect.
    pub fn with_engine(engine: Arc<FilterEngine<E>>) -> Self {
        Self::build(engine, false)
    }

    fn build(engine: Arc<FilterEngine<E>>, owned_engine: bool) -> Self {
        let (render, _) = watch::channel(Vec::new());
        let (count, _) = watch::channel(0);
        let default_accessor: SortingDataAccessor<E> =
            Arc::new(|row, field| default_sorting_data_accessor(row, field));
        let source = Self {
            engine,
            owned_engine,
            options: RwLock::new(GridSourceOptions::default()),
            render,
            count,
            paginator: RwLock::new(None),
            sort_control: RwLock::new(None),
            accessor: Arc::new(RwLock::new(default_accessor)),
            render_task: Mutex::new(None),
            pagination_task: Mutex::new(None),
            reset_task: Mutex::new(None),
            sort_task: Mutex::new(None),
        };
        source.update_change_subscription();
        source
    }

    /// Builder-style options override.
    pub fn with_options(self, options: GridSourceOptions) -> Self {
        self.set_options(options);
        self
    }

    pub fn options(&self) -> GridSourceOptions {
        read(&self.options).clone()
    }

    pub fn set_options(&self, options: GridSourceOptions) {
        *write(&self.options) = options;
        self.update_subscriptions();
    }

    /// The underlying filter engine, for direct filter interaction.
    pub fn engine(&self) -> &Arc<FilterEngine<E>> {
        &self.engine
    }

    /// The stream the grid renders from: the current page of rows.
    pub fn connect(&self) -> watch::Receiver<Vec<E>> {
        self.render.subscribe()
    }

    /// Tear down every wiring. An internally created engine is cleared and
    /// destroyed as well. Safe to call repeatedly.
    pub fn disconnect(&self) {
        for slot in [
            &self.render_task,
            &self.pagination_task,
            &self.reset_task,
            &self.sort_task,
        ] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
        if self.owned_engine {
            self.engine.clear_filters();
            self.engine.destroy();
        }
        tracing::debug!("grid data source disconnected");
    }

    // ------------------------------------------------------------------
    // Collaborators
    // ------------------------------------------------------------------

    pub fn paginator(&self) -> Option<Arc<Paginator>> {
        read(&self.paginator).clone()
    }

    /// Attach the paging widget and rewire the render pipeline around it.
    pub fn set_paginator(&self, paginator: Arc<Paginator>) {
        *write(&self.paginator) = Some(paginator);
        self.update_subscriptions();
    }

    pub fn sort_control(&self) -> Option<Arc<SortControl>> {
        read(&self.sort_control).clone()
    }

    /// Attach the sort header. Its current state (if any) becomes the
    /// default field sort; subsequent changes wire either a remote
    /// pass-through or an accessor-backed comparator.
    pub fn set_sort_control(&self, control: Arc<SortControl>) {
        *write(&self.sort_control) = Some(Arc::clone(&control));
        let engine = Arc::clone(&self.engine);
        let accessor = Arc::clone(&self.accessor);
        let task = tokio::spawn(async move {
            let mut rx = control.subscribe();
            let mut first = true;
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    Some(sort) if first => {
                        engine.set_sort_by(SortSpec::field(sort.active, sort.direction));
                    }
                    Some(sort) => apply_sort_change(&engine, &accessor, sort),
                    None if !first => engine.clear_sort_by(),
                    None => {}
                }
                first = false;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.sort_task).replace(task) {
            previous.abort();
        }
    }

    /// Replace the row value accessor used by accessor-backed comparators.
    pub fn set_sorting_data_accessor<F>(&self, accessor: F)
    where
        F: Fn(&E, &str) -> Option<SortValue> + Send + Sync + 'static,
    {
        *write(&self.accessor) = Arc::new(accessor);
    }

    /// Set a field sort directly, bypassing the sort control.
    pub fn set_default_sort(&self, column: impl Into<String>, direction: SortOrder) {
        self.engine.set_sort_by(SortSpec::field(column, direction));
    }

    // ------------------------------------------------------------------
    // Filter passthroughs
    // ------------------------------------------------------------------

    pub fn set_filter(&self, spec: FilterSpec<E>) {
        self.engine.set_filter(spec);
    }

    pub fn add_filter(&self, spec: FilterSpec<E>) {
        self.engine.set_filter(spec);
    }

    pub fn set_filters(&self, specs: Vec<FilterSpec<E>>) {
        self.engine.set_filters(specs);
    }

    pub fn remove_filters(&self, ids: &[&str]) {
        self.engine.remove_filters(ids);
    }

    pub fn remove_filter(&self, id: &str) {
        self.engine.remove_filters(&[id]);
    }

    pub fn clear_filters(&self) {
        self.engine.clear_filters();
    }

    pub fn get_filter_value(&self, id: &str) -> ValueLookup {
        self.engine.get_filter_value(id)
    }

    /// Force a recompute of every reactive output.
    pub fn refresh(&self) -> u64 {
        self.engine.refresh()
    }

    /// Enter server mode on the underlying engine and rewire the pipeline.
    pub fn with_server<F>(&self, on_change: F, options: NormalizeOptions) -> &Self
    where
        F: Fn(NormalizedFilters) -> ServerReply<E> + Send + Sync + 'static,
    {
        self.engine.with_server(on_change, options);
        self.update_subscriptions();
        self
    }

    pub fn has_server(&self) -> bool {
        self.engine.has_server()
    }

    // ------------------------------------------------------------------
    // Search sugar
    // ------------------------------------------------------------------

    /// Current search term ("" when no search filter is active).
    pub fn search(&self) -> String {
        let id = read(&self.options).search_filter_id.clone();
        self.engine.get_filter_value(&id).as_str_or_empty()
    }

    /// Filter the whole list by a search term on the reserved search filter.
    ///
    /// The filter is always server-delegated and carries an always-false
    /// local predicate: actual matching happens remotely, or through a
    /// caller-supplied filter on the same id.
    pub fn set_search(&self, query: &str) {
        let id = read(&self.options).search_filter_id.clone();
        if query.is_empty() {
            self.engine.remove_filters(&[id.as_str()]);
        } else {
            self.engine.set_filter(
                FilterSpec::new(id)
                    .name(query)
                    .value(json!(query))
                    .server(true)
                    .predicate(|_, _, _, _| false),
            );
        }
    }

    // ------------------------------------------------------------------
    // Data and counters
    // ------------------------------------------------------------------

    /// Unfiltered collection snapshot.
    pub async fn data(&self) -> Result<Vec<E>> {
        self.engine.collection().get_all().await
    }

    /// Replace the collection content.
    pub async fn set_data(&self, entities: Vec<E>) -> Result<()> {
        self.engine.collection().set(entities).await
    }

    /// Snapshot of the filtered (and sorted) data, ignoring pagination.
    pub async fn filtered_data(&self) -> Result<Vec<E>> {
        self.engine.get_all_by_filters().await
    }

    /// Live total of filtered rows.
    pub fn select_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Paginator length, for server pagination where the remote collaborator
    /// knows the real total.
    pub fn total(&self) -> usize {
        read(&self.paginator).as_ref().map_or(0, |p| p.length())
    }

    pub fn set_total(&self, total: usize) {
        if let Some(paginator) = read(&self.paginator).as_ref() {
            paginator.set_length(total);
        }
    }

    /// Ordered filter listing excluding the reserved pagination filters,
    /// emitting only on structural change.
    pub fn on_filters_changes(&self) -> BoxStream<'static, Vec<Filter<E>>> {
        let options = read(&self.options);
        let page_id = options.page_index_id.clone();
        let size_id = options.page_size_id.clone();
        drop(options);

        let select = self.engine.view().select_all(
            SelectOptions::default()
                .sort_by_order()
                .filter_by(move |f| f.id != page_id && f.id != size_id),
        );
        let mut previous: Vec<Filter<E>> = Vec::new();
        select
            .filter_map(move |current| {
                let changed = filters_changed(&previous, &current);
                if changed {
                    previous = current.clone();
                }
                futures::future::ready(changed.then_some(current))
            })
            .boxed()
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    fn update_subscriptions(&self) {
        self.subscribe_server_pagination();
        self.update_change_subscription();
    }

    /// (Re)start the render pipeline: join the filtered stream with paging
    /// events and publish the current page of rows.
    fn update_change_subscription(&self) {
        let mut stream = self.engine.select_all_by_filters();
        let paginator = read(&self.paginator).clone();
        let options = read(&self.options).clone();
        let render = self.render.clone();
        let count = self.count.clone();

        let task = tokio::spawn(async move {
            let mut page_rx = paginator.as_ref().map(|p| p.subscribe());
            let mut filtered: Vec<E> = Vec::new();
            let mut last_count: Option<usize> = None;
            loop {
                tokio::select! {
                    item = stream.next() => {
                        let Some(entities) = item else { break };
                        filtered = entities;
                        if let Some(debounce) = options.debounce_between_changes {
                            tokio::time::sleep(debounce).await;
                        }
                        let total = filtered.len();
                        if last_count != Some(total) {
                            last_count = Some(total);
                            count.send_replace(total);
                            if let Some(p) = &paginator {
                                if !options.server_pagination {
                                    update_paginator(Arc::clone(p), total);
                                }
                            }
                        }
                    }
                    res = page_changed(&mut page_rx) => {
                        if res.is_err() {
                            page_rx = None;
                        }
                    }
                }
                let rows = page_rows(&filtered, paginator.as_deref(), &options);
                render.send_replace(rows);
            }
            tracing::debug!("render pipeline stopped");
        });
        if let Some(previous) = lock(&self.render_task).replace(task) {
            previous.abort();
        }
    }

    /// Wire (or unwire) server pagination: paginator events re-derive the
    /// reserved page-index/page-size server filters.
    fn subscribe_server_pagination(&self) {
        if let Some(previous) = lock(&self.pagination_task).take() {
            previous.abort();
        }
        if let Some(previous) = lock(&self.reset_task).take() {
            previous.abort();
        }

        let options = read(&self.options).clone();
        let Some(paginator) = read(&self.paginator).clone() else {
            return;
        };

        if self.engine.is_server() && options.server_pagination {
            let engine = Arc::clone(&self.engine);
            let page = Arc::clone(&paginator);
            let opts = options.clone();
            let task = tokio::spawn(async move {
                let mut rx = page.subscribe();
                loop {
                    let state = *rx.borrow_and_update();
                    derive_pagination_filters(&engine, &opts, state);
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            });
            *lock(&self.pagination_task) = Some(task);

            if options.reset_page_index_on_filters_change {
                let page = Arc::clone(&paginator);
                let mut changes = self.on_filters_changes();
                let task = tokio::spawn(async move {
                    while let Some(filters) = changes.next().await {
                        if page.page_index() > 0 && !filters.is_empty() {
                            page.first_page();
                        }
                    }
                });
                *lock(&self.reset_task) = Some(task);
            }
        } else {
            self.engine.remove_filters(&[
                options.page_index_id.as_str(),
                options.page_size_id.as_str(),
            ]);
        }
    }
}

impl<E: Keyed + Serialize> Drop for GridDataSource<E> {
    fn drop(&mut self) {
        self.disconnect();
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

async fn page_changed(
    rx: &mut Option<watch::Receiver<PageState>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        // No paginator attached: never resolves, the render loop only
        // follows the filtered stream.
        None => futures::future::pending().await,
    }
}

/// Refresh the paginator length and clamp an out-of-range page index to the
/// last page, `max(0, ceil(count / page_size) - 1)`. Runs on its own task so
/// paging state is never mutated mid-recompute; an actual index move emits a
/// page event which re-renders.
fn update_paginator(paginator: Arc<Paginator>, total: usize) {
    tokio::spawn(async move {
        paginator.set_length(total);
        let index = paginator.page_index();
        if index > 0 {
            let last = paginator.last_page_index();
            if index > last {
                tracing::debug!(from = index, to = last, "clamping page index");
                paginator.set_page_index(last);
            }
        }
    });
}

fn page_rows<E: Clone>(
    filtered: &[E],
    paginator: Option<&Paginator>,
    options: &GridSourceOptions,
) -> Vec<E> {
    match paginator {
        Some(p) if !options.server_pagination => {
            let size = p.page_size();
            let start = p.page_index().saturating_mul(size).min(filtered.len());
            let end = (start + size).min(filtered.len());
            filtered[start..end].to_vec()
        }
        _ => filtered.to_vec(),
    }
}

fn derive_pagination_filters<E: Keyed + Serialize>(
    engine: &FilterEngine<E>,
    options: &GridSourceOptions,
    page: PageState,
) {
    engine.set_filters(vec![
        FilterSpec::new(options.page_index_id.clone())
            .value(json!(page.page_index))
            .hide(!options.page_index_display)
            .name(format!("{}: {}", options.page_index_name, page.page_index))
            .server(true),
        FilterSpec::new(options.page_size_id.clone())
            .value(json!(page.page_size))
            .hide(!options.page_size_display)
            .name(format!("{}: {}", options.page_size_name, page.page_size))
            .server(true),
    ]);
}

fn apply_sort_change<E: Keyed + Serialize>(
    engine: &FilterEngine<E>,
    accessor: &Arc<RwLock<SortingDataAccessor<E>>>,
    sort: SortState,
) {
    if engine.is_server() && engine.sort_delegated() {
        // Sorting happens remotely: pass the field and direction through.
        engine.set_sort_by(SortSpec::field(sort.active, sort.direction));
    } else {
        let accessor = read(accessor).clone();
        let field = sort.active.clone();
        let direction = sort.direction;
        engine.set_sort_by(SortSpec::comparator(
            move |a: &E, b: &E, _full: &[E]| compare_rows(&accessor, &field, direction, a, b),
            direction,
        ));
    }
}
