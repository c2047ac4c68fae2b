//! Sort-control collaborator handle and row value access for sorting
//!
//! [`SortControl`] stands in for the grid's sort header: toggling a column
//! emits a [`SortState`] the data source turns into an engine sort. The
//! first observed state acts as the default sort; later changes wire either
//! a remote pass-through or a comparator over [`SortValue`]s produced by a
//! sorting data accessor.

use crate::core::filter::SortOrder;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;

/// Largest integer exactly representable in an f64 (2^53 - 1). Numeric
/// strings above this lose precision as floats, so they are compared as
/// text instead.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// An active sort column and direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortState {
    /// Field id of the sorted column.
    pub active: String,
    pub direction: SortOrder,
}

/// Shared sort-header state, usually held as `Arc<SortControl>` by both the
/// UI widget and the data source.
pub struct SortControl {
    state: watch::Sender<Option<SortState>>,
}

impl Default for SortControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SortControl {
    /// Create a control with no active sort.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Create a control with a sort already active; the data source treats
    /// it as the default sort.
    pub fn with_active(active: impl Into<String>, direction: SortOrder) -> Self {
        let (state, _) = watch::channel(Some(SortState {
            active: active.into(),
            direction,
        }));
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SortState>> {
        self.state.subscribe()
    }

    /// Activate a sort column.
    pub fn sort(&self, active: impl Into<String>, direction: SortOrder) {
        self.state.send_replace(Some(SortState {
            active: active.into(),
            direction,
        }));
    }

    /// Deactivate sorting.
    pub fn clear(&self) {
        self.state.send_replace(None);
    }

    pub fn active(&self) -> Option<SortState> {
        self.state.borrow().clone()
    }
}

/// A row value extracted for sorting: either a number or text.
#[derive(Clone, Debug, PartialEq)]
pub enum SortValue {
    Number(f64),
    Text(String),
}

/// Pluggable row value accessor: `(row, field_id)` to a sortable value.
/// `None` opts the row out of comparison for that column.
pub type SortingDataAccessor<E> = Arc<dyn Fn(&E, &str) -> Option<SortValue> + Send + Sync>;

/// Default accessor: reads the named field off the serialized row. Numeric
/// strings become numbers when they fit into safe float range, everything
/// else compares as text.
pub fn default_sorting_data_accessor<E: Serialize>(row: &E, field: &str) -> Option<SortValue> {
    let value = serde_json::to_value(row).ok()?;
    match value.get(field)? {
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f.abs() < MAX_SAFE_INTEGER {
                Some(SortValue::Number(f))
            } else {
                Some(SortValue::Text(n.to_string()))
            }
        }
        Value::String(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() && f.abs() < MAX_SAFE_INTEGER => Some(SortValue::Number(f)),
            _ => Some(SortValue::Text(s.clone())),
        },
        Value::Bool(b) => Some(SortValue::Text(b.to_string())),
        Value::Null => None,
        other => Some(SortValue::Text(other.to_string())),
    }
}

/// Compare two rows on a column through an accessor. Rows without a value
/// (or with empty text) compare equal; text comparison is case-insensitive.
pub fn compare_rows<E>(
    accessor: &SortingDataAccessor<E>,
    field: &str,
    direction: SortOrder,
    a: &E,
    b: &E,
) -> Ordering {
    let ordering = match (accessor(a, field), accessor(b, field)) {
        (Some(SortValue::Number(x)), Some(SortValue::Number(y))) => {
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(SortValue::Text(x)), Some(SortValue::Text(y))) => {
            if x.is_empty() || y.is_empty() {
                Ordering::Equal
            } else {
                x.to_uppercase().cmp(&y.to_uppercase())
            }
        }
        _ => Ordering::Equal,
    };
    if direction.is_descending() {
        ordering.reverse()
    } else {
        ordering
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Clone, Debug, Serialize)]
    struct Row {
        title: String,
        year: u32,
        code: String,
        big: String,
    }

    fn row(title: &str, year: u32, code: &str, big: &str) -> Row {
        Row {
            title: title.to_string(),
            year,
            code: code.to_string(),
            big: big.to_string(),
        }
    }

    fn accessor() -> SortingDataAccessor<Row> {
        Arc::new(|row, field| default_sorting_data_accessor(row, field))
    }

    #[test]
    fn test_accessor_reads_numbers_and_numeric_strings() {
        let r = row("Alien", 1979, "42", "9007199254740993");
        assert_eq!(
            default_sorting_data_accessor(&r, "year"),
            Some(SortValue::Number(1979.0))
        );
        assert_eq!(
            default_sorting_data_accessor(&r, "code"),
            Some(SortValue::Number(42.0))
        );
        // Beyond safe-integer precision: falls back to text.
        assert_eq!(
            default_sorting_data_accessor(&r, "big"),
            Some(SortValue::Text("9007199254740993".to_string()))
        );
        assert_eq!(default_sorting_data_accessor(&r, "missing"), None);
    }

    #[test]
    fn test_compare_rows_text_is_case_insensitive() {
        let acc = accessor();
        let a = row("alien", 1979, "", "");
        let b = row("Brazil", 1985, "", "");
        assert_eq!(
            compare_rows(&acc, "title", SortOrder::Ascending, &a, &b),
            Ordering::Less
        );
        assert_eq!(
            compare_rows(&acc, "title", SortOrder::Descending, &a, &b),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_rows_missing_values_are_equal() {
        let acc = accessor();
        let a = row("Alien", 1979, "", "");
        let b = row("Brazil", 1985, "", "");
        assert_eq!(
            compare_rows(&acc, "missing", SortOrder::Ascending, &a, &b),
            Ordering::Equal
        );
        // Empty strings behave like missing values.
        assert_eq!(
            compare_rows(&acc, "big", SortOrder::Ascending, &a, &b),
            Ordering::Equal
        );
    }

    #[tokio::test]
    async fn test_sort_control_emits_changes() {
        let control = SortControl::new();
        let mut rx = control.subscribe();
        assert!(rx.borrow().is_none());

        control.sort("title", SortOrder::Descending);
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow(),
            Some(SortState {
                active: "title".to_string(),
                direction: SortOrder::Descending,
            })
        );
    }
}
