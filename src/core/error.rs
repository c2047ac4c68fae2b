//! Typed errors for the sift crate
//!
//! Expected conditions never error: absent lookups return value-typed
//! sentinels (`ValueLookup::Missing`, empty listings) and malformed remote
//! replies are unrepresentable by construction. What remains is the storage
//! seam, which surfaces [`CollectionError`] through `anyhow::Result`.

use std::fmt;

/// Errors raised by collection backends.
#[derive(Debug)]
pub enum CollectionError {
    /// No entity stored under the key.
    NotFound { collection: String, key: String },
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::NotFound { collection, key } => {
                write!(f, "entity '{}' not found in collection '{}'", key, collection)
            }
        }
    }
}

impl std::error::Error for CollectionError {}
