//! Error types and result types for store and executor operations.
//!
//! This module provides error handling for the two layers of the crate: raw
//! document store access ([`DocumentStoreError`]) and two-phase command
//! execution ([`ExecuteError`]). Use [`DocumentStoreResult<T>`] as the return
//! type for fallible store operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::validate::ValidationErrors;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// This enum covers serialization errors, document lifecycle issues, collection management,
/// and backend-specific errors.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given unique key already exists in the collection.
    /// The first argument is the offending key value, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document violates structural constraints (e.g. a filter or
    /// modification that the backend cannot interpret).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend, carrying the
    /// native diagnostic.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
///
/// This type alias is used throughout the crate to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// Failure modes of the two-phase command executor.
///
/// The variants split along one operationally important line: `Policy` and
/// `Validation` mean nothing happened to the base store or the audit sink,
/// while `Backup` and `StoreCommand` mean something may have partially
/// happened and the operator should look. Use [`ExecuteError::has_side_effects`]
/// to tell the two apart without matching on variants.
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// The command targets a collection the schema does not govern.
    /// Rejected before any store access.
    #[error("Collection '{0}' is not governed by the schema")]
    Policy(String),
    /// The previewed post-mutation state failed shape or referential
    /// validation. The base store is untouched.
    #[error("Documents would be invalid after the proposed mutation: {0}")]
    Validation(ValidationErrors),
    /// Pre-image backup recorded fewer documents than were matched, or the
    /// audit sink failed outright. The operation aborts without touching the
    /// base store; the sink may hold a partial backup.
    #[error("Failed to back up matched documents for collection '{collection}': {detail}; operation aborted")]
    Backup {
        /// Collection whose pre-images were being backed up.
        collection: String,
        /// What went wrong: a recorded/matched count mismatch or the sink's
        /// native diagnostic.
        detail: String,
    },
    /// A store operation failed during the preview phase (session
    /// provisioning, staging, or matching). The base store and the audit
    /// sink are untouched.
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    /// The native apply-phase command failed. The base store's own
    /// partial-failure semantics for that command apply.
    #[error("Apply-phase store command failed: {0}")]
    StoreCommand(#[source] DocumentStoreError),
}

impl ExecuteError {
    /// Whether the failure may have left observable side effects (partial
    /// audit entries or partial native writes) behind.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            ExecuteError::Backup { .. } | ExecuteError::StoreCommand(_)
        )
    }
}
