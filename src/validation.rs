//! Input validation for vectors, IDs, and metadata.
//!
//! All limits are defined as constants here. Validation happens at the
//! facade boundary before any write reaches storage or an index.
//!
//! # Validation Layers
//!
//! ```text
//! VectorDb::insert()
//!     ├── validate_batch_len()    ← batch size
//!     ├── validate_vector()       ← per vector: dimension, finiteness
//!     └── validate_metadata()     ← per map: size, entry count, key/value limits
//! ```

use crate::error::ValidationError;
use crate::types::{Metadata, VectorId};

/// Maximum vector dimension a database may be configured with.
pub const MAX_DIMENSION: usize = 10_000;

/// Maximum number of vectors per insert/delete/batch call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Maximum `k` for a single search.
pub const MAX_SEARCH_K: usize = 1000;

/// Maximum serialized metadata size per record (1 MiB).
pub const MAX_METADATA_BYTES: usize = 1024 * 1024;

/// Maximum number of top-level metadata entries per record.
pub const MAX_METADATA_ENTRIES: usize = 100;

/// Maximum metadata key length in characters.
pub const MAX_METADATA_KEY_LEN: usize = 256;

/// Maximum metadata value length in characters (string scalars and the
/// JSON rendering of non-string values).
pub const MAX_METADATA_VALUE_LEN: usize = 10_000;

/// Maximum ID length in characters.
pub const MAX_ID_LEN: usize = 256;

/// Validates a vector against the configured dimension.
///
/// Rejects a length mismatch and any NaN or infinite component.
pub(crate) fn validate_vector(dimension: usize, vector: &[f64]) -> Result<(), ValidationError> {
    if vector.len() != dimension {
        return Err(ValidationError::dimension_mismatch(dimension, vector.len()));
    }
    for (i, v) in vector.iter().enumerate() {
        if !v.is_finite() {
            return Err(ValidationError::non_finite(i));
        }
    }
    Ok(())
}

/// Validates a vector ID: non-empty and at most [`MAX_ID_LEN`] characters.
pub(crate) fn validate_id(id: &VectorId) -> Result<(), ValidationError> {
    if id.as_str().is_empty() {
        return Err(ValidationError::required_field("id"));
    }
    if id.as_str().chars().count() > MAX_ID_LEN {
        return Err(ValidationError::invalid_field(
            "id",
            format!("exceeds max length of {} chars", MAX_ID_LEN),
        ));
    }
    Ok(())
}

/// Validates a metadata map against all size limits.
pub(crate) fn validate_metadata(metadata: &Metadata) -> Result<(), ValidationError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::too_many_items(
            "metadata",
            metadata.len(),
            MAX_METADATA_ENTRIES,
        ));
    }

    for (key, value) in metadata {
        if key.chars().count() > MAX_METADATA_KEY_LEN {
            return Err(ValidationError::invalid_field(
                "metadata",
                format!(
                    "key '{}…' exceeds max length of {} chars",
                    truncate(key, 16),
                    MAX_METADATA_KEY_LEN
                ),
            ));
        }

        // String scalars are measured in characters; other values by the
        // length of their JSON rendering.
        let value_len = match value {
            serde_json::Value::String(s) => s.chars().count(),
            other => other.to_string().chars().count(),
        };
        if value_len > MAX_METADATA_VALUE_LEN {
            return Err(ValidationError::invalid_field(
                "metadata",
                format!(
                    "value for key '{}' exceeds max length of {} chars (got {})",
                    truncate(key, 16),
                    MAX_METADATA_VALUE_LEN,
                    value_len
                ),
            ));
        }
    }

    // Total serialized size limit last, since it is the most expensive check
    let serialized = serde_json::to_vec(metadata).map_err(|e| {
        ValidationError::invalid_field("metadata", format!("not JSON-serializable: {e}"))
    })?;
    if serialized.len() > MAX_METADATA_BYTES {
        return Err(ValidationError::metadata_too_large(
            serialized.len(),
            MAX_METADATA_BYTES,
        ));
    }

    Ok(())
}

/// Validates a search `k`: at least 1, at most [`MAX_SEARCH_K`].
pub(crate) fn validate_k(k: usize) -> Result<(), ValidationError> {
    if k == 0 {
        return Err(ValidationError::invalid_field("k", "must be at least 1"));
    }
    if k > MAX_SEARCH_K {
        return Err(ValidationError::invalid_field(
            "k",
            format!("must not exceed {}", MAX_SEARCH_K),
        ));
    }
    Ok(())
}

/// Validates a batch length against [`MAX_BATCH_SIZE`].
pub(crate) fn validate_batch_len(field: &str, len: usize) -> Result<(), ValidationError> {
    if len > MAX_BATCH_SIZE {
        return Err(ValidationError::too_many_items(field, len, MAX_BATCH_SIZE));
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
