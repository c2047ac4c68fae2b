//! Filter and sort model
//!
//! A [`Filter`] is a named, orderable predicate+value registered by id. The
//! placement of a filter (client-side or delegated to a remote collaborator)
//! is captured by [`FilterKind`], an exhaustive tagged union, so every code
//! path that partitions local and server filters is checked by the compiler.
//!
//! Callers build filters through [`FilterSpec`], the partial input accepted
//! by the engine's upsert operations. A `FilterSpec` carries an *optional*
//! server flag; resolving it against the engine's server mode happens at
//! insert time, producing a fresh [`Filter`] instead of mutating the
//! caller's input.

use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The sequence or keyed mapping currently being filtered, handed to
/// predicates so they can inspect the whole data set.
#[derive(Clone)]
pub enum FilterTarget<E> {
    /// Ordered sequence filtering (the default output shape).
    Sequence(Arc<[E]>),
    /// Keyed mapping filtering (`get_map_by_filters` and friends).
    Mapping(Arc<IndexMap<String, E>>),
}

impl<E> FilterTarget<E> {
    /// Number of entities under consideration.
    pub fn len(&self) -> usize {
        match self {
            FilterTarget::Sequence(items) => items.len(),
            FilterTarget::Mapping(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Predicate applied to one entity: `(entity, index, target, filter)`.
///
/// Returning `true` keeps the entity. The registered [`Filter`] is passed
/// back in so shared predicates can read the filter's own value.
pub type Predicate<E> = Arc<dyn Fn(&E, usize, &FilterTarget<E>, &Filter<E>) -> bool + Send + Sync>;

/// Comparator for comparator-function sorts: `(a, b, full_original_list)`.
///
/// The third argument is the *unfiltered* input sequence, mirroring the
/// engine's contract of sorting strictly after filtering.
pub type Comparator<E> = Arc<dyn Fn(&E, &E, &[E]) -> Ordering + Send + Sync>;

/// Where and how a filter participates in filtering.
pub enum FilterKind<E> {
    /// Value-only filter. Never excludes entities on its own; it exists to
    /// carry a value (e.g. for normalization or display).
    Base,
    /// Applied client-side against the collection view.
    Local { predicate: Predicate<E> },
    /// Excluded from local application and forwarded to the remote
    /// collaborator. May still carry a client predicate (the search filter
    /// does, for example).
    Server { predicate: Option<Predicate<E>> },
}

impl<E> Clone for FilterKind<E> {
    fn clone(&self) -> Self {
        match self {
            FilterKind::Base => FilterKind::Base,
            FilterKind::Local { predicate } => FilterKind::Local {
                predicate: Arc::clone(predicate),
            },
            FilterKind::Server { predicate } => FilterKind::Server {
                predicate: predicate.as_ref().map(Arc::clone),
            },
        }
    }
}

impl<E> fmt::Debug for FilterKind<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterKind::Base => write!(f, "Base"),
            FilterKind::Local { .. } => write!(f, "Local"),
            FilterKind::Server { predicate } => f
                .debug_struct("Server")
                .field("predicate", &predicate.is_some())
                .finish(),
        }
    }
}

/// A registered filter.
#[derive(Clone, Debug)]
pub struct Filter<E> {
    /// Unique key within the registry. Upserts are last-write-wins by id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Arbitrary value, forwarded as-is during normalization.
    pub value: Value,
    /// Hidden filters still apply; they are only excluded from the visible
    /// filter listings.
    pub hide: bool,
    /// Ascending position in ordered listings.
    pub order: i32,
    pub kind: FilterKind<E>,
}

impl<E> Filter<E> {
    /// Whether this filter is delegated to the remote collaborator.
    pub fn is_server(&self) -> bool {
        matches!(self.kind, FilterKind::Server { .. })
    }

    /// The client-side predicate, if any. Absent predicate means the filter
    /// never excludes entities from a sequence.
    pub fn predicate(&self) -> Option<&Predicate<E>> {
        match &self.kind {
            FilterKind::Base => None,
            FilterKind::Local { predicate } => Some(predicate),
            FilterKind::Server { predicate } => predicate.as_ref(),
        }
    }
}

/// Partial filter input for upserts.
///
/// `server` is tri-state: `None` lets the engine decide (server mode upserts
/// default to a server placement), `Some(true)`/`Some(false)` pin it.
pub struct FilterSpec<E> {
    pub id: String,
    pub name: Option<String>,
    pub value: Option<Value>,
    pub hide: bool,
    pub order: Option<i32>,
    pub server: Option<bool>,
    pub predicate: Option<Predicate<E>>,
}

impl<E> FilterSpec<E> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            value: None,
            hide: false,
            order: None,
            server: None,
            predicate: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn hide(mut self, hide: bool) -> Self {
        self.hide = hide;
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn server(mut self, server: bool) -> Self {
        self.server = Some(server);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, usize, &FilterTarget<E>, &Filter<E>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Resolve the partial input into a stored [`Filter`].
    ///
    /// `server_default` is the engine's server mode: a spec without an
    /// explicit `server` flag picks it up. Defaults: `hide = false`,
    /// `order = 10`, name derived from the id and value.
    pub fn into_filter(self, server_default: bool) -> Filter<E> {
        let server = self.server.unwrap_or(server_default);
        let kind = match (server, self.predicate) {
            (true, predicate) => FilterKind::Server { predicate },
            (false, Some(predicate)) => FilterKind::Local { predicate },
            (false, None) => FilterKind::Base,
        };
        let value = self.value.unwrap_or(Value::Null);
        let name = self
            .name
            .unwrap_or_else(|| default_name(&self.id, &value));
        Filter {
            id: self.id,
            name,
            value,
            hide: self.hide,
            order: self.order.unwrap_or(10),
            kind,
        }
    }
}

fn default_name(id: &str, value: &Value) -> String {
    let label = capitalize(id);
    match value {
        Value::Null => label,
        Value::String(s) => format!("{}: {}", label, s),
        other => format!("{}: {}", label, other),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Sort direction, with the `asc`/`desc` wire forms used during
/// normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, SortOrder::Descending)
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to sort by: a field of the serialized entity, or a caller-supplied
/// comparator invoked with `(a, b, full_original_list)`.
///
/// Field sorts honor the [`SortSpec`] direction through a generic value
/// comparator; a comparator owns its direction and is invoked as-is.
pub enum SortBy<E> {
    Field(String),
    Comparator(Comparator<E>),
}

impl<E> Clone for SortBy<E> {
    fn clone(&self) -> Self {
        match self {
            SortBy::Field(field) => SortBy::Field(field.clone()),
            SortBy::Comparator(cmp) => SortBy::Comparator(Arc::clone(cmp)),
        }
    }
}

impl<E> fmt::Debug for SortBy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::Field(field) => f.debug_tuple("Field").field(field).finish(),
            SortBy::Comparator(_) => write!(f, "Comparator"),
        }
    }
}

/// The sort specification, replaced wholesale by `set_sort_by`.
#[derive(Clone, Debug)]
pub struct SortSpec<E> {
    pub sort_by: SortBy<E>,
    pub order: SortOrder,
}

impl<E> SortSpec<E> {
    pub fn field(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort_by: SortBy::Field(field.into()),
            order,
        }
    }

    pub fn comparator<F>(cmp: F, order: SortOrder) -> Self
    where
        F: Fn(&E, &E, &[E]) -> Ordering + Send + Sync + 'static,
    {
        Self {
            sort_by: SortBy::Comparator(Arc::new(cmp)),
            order,
        }
    }
}

// Comparators compare equal only when they are literally the same closure;
// there is no structural equality for function values.
impl<E> PartialEq for SortSpec<E> {
    fn eq(&self, other: &Self) -> bool {
        if self.order != other.order {
            return false;
        }
        match (&self.sort_by, &other.sort_by) {
            (SortBy::Field(a), SortBy::Field(b)) => a == b,
            (SortBy::Comparator(a), SortBy::Comparator(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Result of a filter value lookup.
///
/// The lookup distinguishes a missing filter from a registered filter that
/// carries no value; callers that only want display text can collapse both
/// with [`ValueLookup::as_str_or_empty`].
#[derive(Clone, Debug, PartialEq)]
pub enum ValueLookup {
    /// No filter registered under the id.
    Missing,
    /// The filter exists but has no value.
    Unset,
    /// The stored value.
    Set(Value),
}

impl ValueLookup {
    pub fn value(self) -> Option<Value> {
        match self {
            ValueLookup::Set(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str_or_empty(&self) -> String {
        match self {
            ValueLookup::Set(Value::String(s)) => s.clone(),
            ValueLookup::Set(Value::Null) | ValueLookup::Missing | ValueLookup::Unset => {
                String::new()
            }
            ValueLookup::Set(other) => other.to_string(),
        }
    }
}
