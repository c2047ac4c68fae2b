//! Stateless default and search predicates
//!
//! These helpers cover the common filtering cases so callers only write a
//! predicate by hand for domain-specific logic. They inspect entities
//! through their serde representation, which keeps them generic over any
//! `Serialize` entity type.

use crate::core::filter::{Filter, FilterTarget};
use serde::Serialize;
use serde_json::Value;

/// Default filter behavior driven by the filter's own value.
///
/// An object entity matched against a string value is searched across all
/// of its string fields; otherwise a set value must equal the entity's
/// serialized form, and an unset value keeps truthy entities only.
pub fn default_predicate<E: Serialize>(
    entity: &E,
    _index: usize,
    _target: &FilterTarget<E>,
    filter: &Filter<E>,
) -> bool {
    let entity_value = serde_json::to_value(entity).unwrap_or(Value::Null);

    if let (Value::Object(_), Value::String(term)) = (&entity_value, &filter.value) {
        return matches_search(term, &entity_value);
    }

    match &filter.value {
        Value::Null => is_truthy(&entity_value),
        set => *set == entity_value,
    }
}

/// Case-insensitive containment over every string field of the entity.
pub fn search_predicate<E: Serialize>(
    entity: &E,
    _index: usize,
    _target: &FilterTarget<E>,
    filter: &Filter<E>,
) -> bool {
    let Value::String(term) = &filter.value else {
        return true;
    };
    let entity_value = serde_json::to_value(entity).unwrap_or(Value::Null);
    matches_search(term, &entity_value)
}

/// Like [`search_predicate`], restricted to a single field.
pub fn search_predicate_in<E: Serialize>(
    field: impl Into<String>,
) -> impl Fn(&E, usize, &FilterTarget<E>, &Filter<E>) -> bool {
    let field = field.into();
    move |entity, _index, _target, filter| {
        let Value::String(term) = &filter.value else {
            return true;
        };
        let entity_value = serde_json::to_value(entity).unwrap_or(Value::Null);
        match entity_value.get(&field) {
            Some(Value::String(s)) => contains_ignore_case(s, term),
            _ => false,
        }
    }
}

/// Whether any string field of `value` contains `term`, case-insensitively.
pub fn matches_search(term: &str, value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .values()
            .any(|v| matches!(v, Value::String(s) if contains_ignore_case(s, term))),
        Value::String(s) => contains_ignore_case(s, term),
        _ => false,
    }
}

/// Structural change detection over two filter listings, comparing
/// `(id, value)` pairs. Returns `true` when the listings differ.
pub fn filters_changed<E>(previous: &[Filter<E>], current: &[Filter<E>]) -> bool {
    if previous.len() != current.len() {
        return true;
    }
    previous.iter().any(|prev| {
        !current
            .iter()
            .any(|cur| cur.id == prev.id && cur.value == prev.value)
    })
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::FilterSpec;
    use serde::Serialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Debug, Serialize)]
    struct Film {
        id: String,
        title: String,
        director: String,
        year: u32,
    }

    fn film(id: &str, title: &str, director: &str, year: u32) -> Film {
        Film {
            id: id.to_string(),
            title: title.to_string(),
            director: director.to_string(),
            year,
        }
    }

    fn target() -> FilterTarget<Film> {
        FilterTarget::Sequence(Arc::from(Vec::<Film>::new()))
    }

    #[test]
    fn test_default_predicate_searches_objects_with_string_values() {
        let filter = FilterSpec::new("search").value(json!("ALIEN")).into_filter(false);
        assert!(default_predicate(
            &film("1", "Alien", "Ridley Scott", 1979),
            0,
            &target(),
            &filter
        ));
        assert!(!default_predicate(
            &film("2", "Brazil", "Terry Gilliam", 1985),
            0,
            &target(),
            &filter
        ));
    }

    #[test]
    fn test_search_predicate_is_case_insensitive() {
        let filter = FilterSpec::new("search").value(json!("scott")).into_filter(false);
        assert!(search_predicate(
            &film("1", "Alien", "Ridley Scott", 1979),
            0,
            &target(),
            &filter
        ));
    }

    #[test]
    fn test_search_predicate_in_single_field() {
        let by_title = search_predicate_in::<Film>("title");
        let filter = FilterSpec::new("search").value(json!("ali")).into_filter(false);

        assert!(by_title(&film("1", "Alien", "Ridley Scott", 1979), 0, &target(), &filter));
        // "scott" only appears in the director field.
        let filter = FilterSpec::new("search").value(json!("scott")).into_filter(false);
        assert!(!by_title(&film("1", "Alien", "Ridley Scott", 1979), 0, &target(), &filter));
    }

    #[test]
    fn test_filters_changed() {
        let a: Vec<crate::core::filter::Filter<Film>> = vec![
            FilterSpec::new("a").value(json!(1)).into_filter(false),
            FilterSpec::new("b").value(json!(2)).into_filter(false),
        ];
        let same = vec![
            FilterSpec::new("b").value(json!(2)).into_filter(false),
            FilterSpec::new("a").value(json!(1)).into_filter(false),
        ];
        let different = vec![
            FilterSpec::new("a").value(json!(1)).into_filter(false),
            FilterSpec::new("b").value(json!(3)).into_filter(false),
        ];

        assert!(!filters_changed(&a, &same));
        assert!(filters_changed(&a, &different));
        assert!(filters_changed(&a, &a[..1].to_vec()));
        assert!(!filters_changed::<Film>(&[], &[]));
    }
}
