//! Append-only audit trail of document pre-images.
//!
//! Before a mutation is applied, the matched documents are copied verbatim
//! into an audit store together with the operation timestamp. Entries are
//! never read back, updated, or deleted by this crate; restoring from them is
//! an operator task.

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tracing::debug;

use crate::{backend::StoreBackend, command::MutationKind, error::DocumentStoreResult};

/// Default sibling database receiving pre-images of deleted documents.
pub const DEFAULT_DELETED_DATABASE: &str = "docgate_deleted";

/// Default sibling database receiving pre-images of updated documents.
pub const DEFAULT_UPDATED_DATABASE: &str = "docgate_updated";

/// Destination for pre-image backups.
///
/// Implementations must be append-only and must report how many entries they
/// actually recorded; the executor aborts the mutation when that count falls
/// short of the matched count.
#[async_trait]
pub trait AuditSink: Send + Sync + Debug {
    /// Records the pre-images of documents about to be mutated.
    ///
    /// `collection` is the collection the documents live in; the entry keeps
    /// that name so restores land in the right place. Returns the number of
    /// entries recorded.
    async fn record(
        &self,
        collection: &str,
        kind: MutationKind,
        pre_images: Vec<Document>,
        at: DateTime<Utc>,
    ) -> DocumentStoreResult<u64>;
}

/// [`AuditSink`] writing into two sibling databases of the governed store,
/// one for deletes and one for updates, mirroring collection names.
///
/// Each entry wraps the pre-image as `{"doc": <pre-image>, "deleted_at": ts}`
/// (or `"updated_at"` for updates), so the original document survives intact
/// including its storage identity.
#[derive(Debug)]
pub struct StoreAuditSink<B: StoreBackend> {
    deleted: B,
    updated: B,
}

impl<B: StoreBackend> StoreAuditSink<B> {
    /// Builds a sink over the default sibling database names.
    pub fn new(base: &B) -> DocumentStoreResult<Self> {
        Self::with_database_names(base, DEFAULT_DELETED_DATABASE, DEFAULT_UPDATED_DATABASE)
    }

    /// Builds a sink over custom sibling database names.
    pub fn with_database_names(
        base: &B,
        deleted_database: &str,
        updated_database: &str,
    ) -> DocumentStoreResult<Self> {
        Ok(StoreAuditSink {
            deleted: base.sibling_database(deleted_database)?,
            updated: base.sibling_database(updated_database)?,
        })
    }
}

#[async_trait]
impl<B: StoreBackend> AuditSink for StoreAuditSink<B> {
    async fn record(
        &self,
        collection: &str,
        kind: MutationKind,
        pre_images: Vec<Document>,
        at: DateTime<Utc>,
    ) -> DocumentStoreResult<u64> {
        if pre_images.is_empty() {
            return Ok(0);
        }
        let (store, timestamp_field) = match kind {
            MutationKind::Delete => (&self.deleted, "deleted_at"),
            MutationKind::Update => (&self.updated, "updated_at"),
        };
        let stamp = bson::DateTime::from_chrono(at);
        let entries = pre_images
            .into_iter()
            .map(|pre_image| {
                let mut entry = Document::new();
                entry.insert("doc", pre_image);
                entry.insert(timestamp_field, stamp);
                entry
            })
            .collect::<Vec<_>>();
        let recorded = store.insert_documents(collection, entries).await?;
        debug!(
            "Recorded {} {} pre-image(s) for collection {} in {}",
            recorded,
            kind,
            collection,
            store.database_name()
        );
        Ok(recorded)
    }
}
