//! Error types for Proxima.
//!
//! Proxima uses a hierarchical error system:
//! - `ProximaError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`, `IndexError`)
//!   provide detail
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use proxima::{VectorDb, DbConfig, Result};
//!
//! fn example(config: DbConfig) -> Result<()> {
//!     let db = VectorDb::new(config)?;
//!     db.initialize()?;
//!     // ... operations that may fail ...
//!     db.close()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for Proxima operations.
pub type Result<T> = std::result::Result<T, ProximaError>;

/// Top-level error enum for all Proxima operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum ProximaError {
    /// Configuration error (parameter outside its valid range).
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// Operation attempted before `initialize()`.
    #[error("Database is not initialized")]
    NotInitialized,

    /// `initialize()` called on a database that is already ready.
    #[error("Database is already initialized")]
    AlreadyInitialized,

    /// Operation attempted after `close()`.
    #[error("Database is closed")]
    AlreadyClosed,

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Requested vector ID not found.
    #[error("Vector not found: {id}")]
    NotFound {
        /// The ID that was looked up.
        id: String,
    },

    /// Storage layer error (I/O, corruption, serialization).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Index error (invariant broken or algorithmic failure).
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Quantizer error (untrained codebook, bad code length).
    #[error("Quantization error: {0}")]
    Quantization(String),

    /// Persistence error (snapshot format, file layout).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProximaError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a not-found error for the given ID.
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound {
            id: id.to_string(),
        }
    }

    /// Creates a quantization error with the given message.
    pub fn quantization(msg: impl Into<String>) -> Self {
        Self::Quantization(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Error used when a poisoned lock is encountered.
    ///
    /// A poisoned facade lock means a writer panicked mid-operation; the
    /// database state can no longer be trusted.
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        Self::Index(IndexError::invariant(format!("{what} lock poisoned")))
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an index error.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// Returns true if this is a lifecycle error
    /// (`NotInitialized`, `AlreadyInitialized`, or `AlreadyClosed`).
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::AlreadyInitialized | Self::AlreadyClosed
        )
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the underlying storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Log file or record framing is corrupted.
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O failure in the storage layer.
    #[error("Storage I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates an I/O error from any displayable source.
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}

// Convert bincode errors to StorageError
impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to ProximaError for convenience
impl From<bincode::Error> for ProximaError {
    fn from(err: bincode::Error) -> Self {
        ProximaError::Storage(StorageError::from(err))
    }
}

/// Index-related errors.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A structural invariant was violated.
    #[error("Index invariant violated: {0}")]
    Invariant(String),

    /// Snapshot kind tag doesn't match the index being restored.
    #[error("Snapshot kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        /// Kind tag the index expects.
        expected: String,
        /// Kind tag found in the snapshot.
        found: String,
    },

    /// Snapshot version doesn't match the supported version.
    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the index supports.
        expected: u32,
        /// Version found in the snapshot.
        found: u32,
    },

    /// Snapshot document is structurally invalid.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

impl IndexError {
    /// Creates an invariant-violation error with the given message.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Creates a kind-mismatch error.
    pub fn kind_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::KindMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a malformed-snapshot error with the given message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSnapshot(msg.into())
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector dimension doesn't match the database's configured dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from database configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A vector component is NaN or infinite.
    #[error("Vector contains a non-finite value at component {index}")]
    NonFiniteValue {
        /// Index of the offending component.
        index: usize,
    },

    /// Metadata exceeds maximum allowed serialized size.
    #[error("Metadata too large: {size} bytes (max: {max} bytes)")]
    MetadataTooLarge {
        /// Actual serialized size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Too many items in a collection field.
    #[error("Too many items in '{field}': {count} (max: {max})")]
    TooManyItems {
        /// Name of the field.
        field: String,
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a non-finite value error.
    pub fn non_finite(index: usize) -> Self {
        Self::NonFiniteValue { index }
    }

    /// Creates a metadata-too-large error.
    pub fn metadata_too_large(size: usize, max: usize) -> Self {
        Self::MetadataTooLarge { size, max }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a too many items error.
    pub fn too_many_items(field: impl Into<String>, count: usize, max: usize) -> Self {
        Self::TooManyItems {
            field: field.into(),
            count,
            max,
        }
    }
}
