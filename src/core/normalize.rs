//! Flat id→value view of the active server filters
//!
//! Normalization is what crosses the wire to the remote collaborator:
//! either a keyed mapping or its query-string encoding. Both preserve the
//! registry's insertion order, with the optional sort keys appended last.

use crate::core::filter::{Filter, SortBy, SortSpec};
use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

/// Characters escaped in query-string components. Alphanumerics and the
/// unreserved marks pass through untouched.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Options for building normalized filters.
#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    /// Append the sort field and direction after the filter entries.
    pub with_sort: bool,
    /// Encode the result as `key=value&key=value...`.
    pub as_query_params: bool,
    /// Key under which the sort field is emitted.
    pub sort_by_key: String,
    /// Key under which the sort direction is emitted.
    pub sort_by_order_key: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            with_sort: false,
            as_query_params: false,
            sort_by_key: "sortBy".to_string(),
            sort_by_order_key: "sortByOrder".to_string(),
        }
    }
}

impl NormalizeOptions {
    pub fn with_sort(mut self) -> Self {
        self.with_sort = true;
        self
    }

    pub fn as_query_params(mut self) -> Self {
        self.as_query_params = true;
        self
    }

    pub fn sort_keys(mut self, sort_by: impl Into<String>, order: impl Into<String>) -> Self {
        self.sort_by_key = sort_by.into();
        self.sort_by_order_key = order.into();
        self
    }
}

/// The normalized server-filter view, in the shape the options asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedFilters {
    Map(IndexMap<String, Value>),
    QueryString(String),
}

impl NormalizedFilters {
    pub fn is_empty(&self) -> bool {
        match self {
            NormalizedFilters::Map(map) => map.is_empty(),
            NormalizedFilters::QueryString(query) => query.is_empty(),
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            NormalizedFilters::Map(map) => Some(map),
            NormalizedFilters::QueryString(_) => None,
        }
    }

    pub fn as_query(&self) -> Option<&str> {
        match self {
            NormalizedFilters::QueryString(query) => Some(query),
            NormalizedFilters::Map(_) => None,
        }
    }
}

/// Build the id→value view of `server_filters`, optionally appending the
/// sort keys and encoding as query parameters.
///
/// Comparator sorts have no wire form and contribute no keys.
pub fn normalized_filters<E>(
    server_filters: &[Filter<E>],
    sort: Option<&SortSpec<E>>,
    options: &NormalizeOptions,
) -> NormalizedFilters {
    let mut result: IndexMap<String, Value> = IndexMap::new();
    for filter in server_filters {
        result.insert(filter.id.clone(), filter.value.clone());
    }

    if options.with_sort {
        if let Some(SortSpec {
            sort_by: SortBy::Field(field),
            order,
        }) = sort
        {
            result.insert(options.sort_by_key.clone(), Value::String(field.clone()));
            result.insert(
                options.sort_by_order_key.clone(),
                Value::String(order.as_str().to_string()),
            );
        }
    }

    if options.as_query_params {
        NormalizedFilters::QueryString(to_query_string(&result))
    } else {
        NormalizedFilters::Map(result)
    }
}

/// Percent-encode a mapping into `key=value&key=value...`, preserving
/// insertion order. Keys and values are encoded independently; arrays and
/// nested objects are carried as their JSON text.
pub fn to_query_string(map: &IndexMap<String, Value>) -> String {
    map.iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY_COMPONENT),
                utf8_percent_encode(&param_string(value), QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
