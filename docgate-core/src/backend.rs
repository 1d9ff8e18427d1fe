//! Storage backend abstraction for the mutation gateway.
//!
//! This module defines the core traits that abstract over different storage implementations,
//! allowing the gateway to preview and apply mutations against various backends
//! (in-memory, MongoDB, etc.).
//!
//! # Overview
//!
//! A [`StoreBackend`] is a handle to a single named database of some deployment. It
//! provides a unified async interface for the operations the gateway needs: filtered
//! reads, batched inserts, native update/delete command execution, and uniqueness-index
//! provisioning. Because overlay sessions and audit sinks live in sibling databases of
//! the base store, a backend can also mint handles to siblings of itself and drop its
//! own database.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docgate::backend::StoreBackend;
//! use bson::doc;
//!
//! // Use a concrete backend implementation
//! let backend = MyBackendImpl::new();
//!
//! // Insert documents into a collection
//! backend
//!     .insert_documents("users", vec![doc! { "id": "u-1", "name": "Alice" }])
//!     .await?;
//!
//! // Read them back with a native filter
//! let found = backend
//!     .find_documents("users", &doc! { "name": "Alice" }, None, 0)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    command::{DeleteStatement, UpdateStatement},
    error::DocumentStoreResult,
};

/// Aggregate counts reported by a native write command.
///
/// Mirrors the totals a document store reports for batched update/delete
/// commands: how many documents the statements matched, how many were
/// actually modified, how many were deleted, and how many were inserted via
/// upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Documents matched by update statements.
    pub matched: u64,
    /// Documents actually modified by update statements.
    pub modified: u64,
    /// Documents removed by delete statements.
    pub deleted: u64,
    /// Documents inserted because an upsert statement matched nothing.
    pub upserted: u64,
}

impl WriteSummary {
    /// Total number of documents the command had any effect on.
    ///
    /// This is the `n` total a native command reply reports: matched plus
    /// upserted for updates, deleted for deletes. A zero here is what the
    /// executor surfaces as a zero-effect outcome.
    pub fn affected(&self) -> u64 {
        self.matched + self.upserted + self.deleted
    }

    /// Folds another summary into this one. Backends use this to aggregate
    /// per-statement results into a single command reply.
    pub fn absorb(&mut self, other: WriteSummary) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
    }
}

/// Abstract interface for document storage backends.
///
/// Implementers of this trait provide concrete storage strategies for schema-governed
/// documents. A backend instance is scoped to one database; the overlay store obtains
/// uniquely-named shadow databases and the audit sink obtains its append-only databases
/// through [`sibling_database`](StoreBackend::sibling_database).
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model (e.g., lock-free, mutex-based, read-write locks)
/// is implementation-specific but should be documented by the implementer.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult),
/// which is a specialized `Result` type. Implementers should document which error
/// variants may be returned by each operation.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the name of the database this handle is scoped to.
    fn database_name(&self) -> &str;

    /// Mints a handle to another database of the same deployment.
    ///
    /// The returned handle shares the deployment's connection/state with `self` but
    /// addresses a different database. The database itself is created lazily on first
    /// write, so this call performs no I/O.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the sibling database
    ///
    /// # Returns
    ///
    /// Returns a backend handle scoped to `name`, or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) if the name is not
    /// addressable by this deployment.
    fn sibling_database(&self, name: &str) -> DocumentStoreResult<Self>
    where
        Self: Sized;

    /// Drops this handle's entire database, including all collections and indexes.
    ///
    /// Dropping a database that was never written to is not an error.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or a [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    ///
    /// # Warning
    ///
    /// This operation is irreversible. The overlay store relies on it to reclaim
    /// shadow databases.
    async fn drop_database(&self) -> DocumentStoreResult<()>;

    /// Inserts new documents into a collection.
    ///
    /// This method batches the insertion of multiple documents into a single collection,
    /// which is created automatically if it does not exist. Documents without an `_id`
    /// field are assigned one by the backend.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to insert into
    /// * `documents` - The documents to insert
    ///
    /// # Returns
    ///
    /// Returns the number of documents inserted, or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    /// An empty batch is a no-op reporting zero. Violating a unique index yields
    /// [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists).
    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<u64>;

    /// Retrieves documents matching a native filter.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to query
    /// * `filter` - A native filter document; `{}` matches everything
    /// * `projection` - Optional inclusion-style projection. `_id` is included
    ///   implicitly unless the projection maps it to `0`.
    /// * `limit` - Maximum number of documents to return; `0` means unbounded
    ///
    /// # Returns
    ///
    /// Returns the matching documents, or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) on failure. Querying a
    /// collection that does not exist returns an empty vector.
    async fn find_documents(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
        limit: u64,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Executes a batch of update statements with the store's native command semantics.
    ///
    /// Each statement applies its modification to the documents matching its filter:
    /// at most one match unless `multi` is set, and an insert on zero matches when
    /// `upsert` is set. Statements execute in order against the same collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to update
    /// * `statements` - The update statements to execute
    ///
    /// # Returns
    ///
    /// Returns the aggregated [`WriteSummary`], or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    async fn execute_updates(
        &self,
        collection: &str,
        statements: &[UpdateStatement],
    ) -> DocumentStoreResult<WriteSummary>;

    /// Executes a batch of delete statements with the store's native command semantics.
    ///
    /// Each statement removes the documents matching its filter, bounded to one
    /// document when its `limit` is `1`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to delete from
    /// * `statements` - The delete statements to execute
    ///
    /// # Returns
    ///
    /// Returns the aggregated [`WriteSummary`], or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    async fn execute_deletes(
        &self,
        collection: &str,
        statements: &[DeleteStatement],
    ) -> DocumentStoreResult<WriteSummary>;

    /// Provisions a unique index on a field of a collection.
    ///
    /// Creating an index that already exists is a no-op. The collection is created
    /// if it does not exist, so indexes can be provisioned ahead of first write.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `field` - The name of the field to constrain
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or a [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    ///
    /// # Note
    ///
    /// If existing documents already violate the uniqueness constraint, the backend
    /// returns an error.
    async fn create_unique_index(&self, collection: &str, field: &str)
    -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// Implementers should use this to close connections and perform other cleanup.
    /// The default implementation is a no-op, but backends with external connections
    /// should override it.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or a [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
