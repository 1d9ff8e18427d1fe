//! Ephemeral overlay store for staging mutations without committing them.
//!
//! An [`OverlaySession`] pairs a base database with a uniquely-named shadow
//! database (`overlay-{uuid}`) in the same deployment. Proposed mutations are
//! staged against the shadow: updates copy the affected base documents into
//! the shadow and modify the copies, deletes copy them and flag them with a
//! `_deleted` tombstone. A [`merge_find`](OverlaySession::merge_find) read
//! then behaves *as if* the mutation had been applied: shadow documents
//! shadow their base counterparts by schema `id`, and tombstoned documents
//! disappear from results while also suppressing the base copy.
//!
//! Sessions are request-scoped. Every caller of [`OverlaySession::open`] must
//! guarantee [`close`](OverlaySession::close) on every exit path, because the
//! base store never reclaims abandoned shadow databases on its own. A session
//! dropped without `close` logs a warning naming the leaked shadow database;
//! that can only happen on cancellation or a bug in the caller.

use bson::{Bson, Document, Uuid};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use crate::{
    backend::{StoreBackend, WriteSummary},
    command::{DeleteStatement, UpdateStatement},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Schema identity field. Distinct from the storage-internal `_id`.
pub const ID_FIELD: &str = "id";

/// Tombstone flag set on shadow copies of to-be-deleted documents.
pub const TOMBSTONE_FIELD: &str = "_deleted";

/// Storage-internal identity field.
pub const INTERNAL_ID_FIELD: &str = "_id";

/// Removes the storage-internal identity from a document, e.g. before
/// handing it to the validator, which knows nothing about storage identity.
pub fn strip_internal_id(doc: &mut Document) {
    doc.remove(INTERNAL_ID_FIELD);
}

/// An open overlay session: a base database overlaid with an ephemeral
/// shadow database.
///
/// Concurrent sessions never interfere: each allocates its own
/// uniquely-named shadow. All staging writes go to the shadow only; the base
/// is read but never written through a session.
#[derive(Debug)]
pub struct OverlaySession<'a, B: StoreBackend> {
    base: &'a B,
    shadow: B,
    closed: bool,
}

impl<'a, B: StoreBackend> OverlaySession<'a, B> {
    /// Opens a session over `base`.
    ///
    /// Allocates the shadow database under a fresh unique name and provisions
    /// the same `id` uniqueness indexes the base enforces for the given
    /// governed collections, so staging trips over duplicate ids exactly like
    /// the real store would.
    ///
    /// # Errors
    ///
    /// Returns a store error when shadow provisioning fails. Nothing is
    /// leaked in that case: index provisioning happens on an empty database,
    /// and the partially-provisioned shadow is dropped before returning.
    pub async fn open(
        base: &'a B,
        governed_collections: &[String],
    ) -> DocumentStoreResult<OverlaySession<'a, B>> {
        let shadow_name = format!("overlay-{}", Uuid::new());
        let shadow = base.sibling_database(&shadow_name)?;
        for collection in governed_collections {
            if let Err(err) = shadow.create_unique_index(collection, ID_FIELD).await {
                let _ = shadow.drop_database().await;
                return Err(err);
            }
        }
        debug!("Opened overlay session with shadow database {}", shadow_name);
        Ok(OverlaySession {
            base,
            shadow,
            closed: false,
        })
    }

    /// Destroys the shadow database. Must be invoked on every exit path by
    /// every caller of [`open`](OverlaySession::open).
    pub async fn close(mut self) -> DocumentStoreResult<()> {
        self.closed = true;
        debug!(
            "Closing overlay session, dropping shadow database {}",
            self.shadow.database_name()
        );
        self.shadow.drop_database().await
    }

    /// Scoped acquisition: runs `f` with an open session and closes it on
    /// every exit path, whether `f` succeeds or fails.
    ///
    /// This is the intended entry point for session users. A close failure
    /// after a successful `f` is surfaced; after a failed `f` the original
    /// error wins and the close failure is only logged.
    pub async fn scoped<T, E, F>(
        base: &'a B,
        governed_collections: &[String],
        f: F,
    ) -> Result<T, E>
    where
        E: From<DocumentStoreError>,
        F: AsyncFnOnce(&OverlaySession<'a, B>) -> Result<T, E>,
    {
        let session = OverlaySession::open(base, governed_collections).await?;
        let shadow_name = session.shadow.database_name().to_string();
        let result = f(&session).await;
        match session.close().await {
            Ok(()) => result,
            Err(close_err) => match result {
                Ok(_) => Err(close_err.into()),
                Err(err) => {
                    warn!("Failed to drop shadow database {}: {}", shadow_name, close_err);
                    Err(err)
                }
            },
        }
    }

    /// The base database this session overlays.
    pub fn base(&self) -> &B {
        self.base
    }

    /// The shadow database holding staged writes.
    pub fn shadow(&self) -> &B {
        &self.shadow
    }

    /// Writes documents into the shadow collection only (insert semantics).
    ///
    /// Used when validating brand-new or wholesale-replacement document sets:
    /// a staged document shadows any base document with the same `id` in
    /// merged reads.
    ///
    /// # Errors
    ///
    /// Returns a store error on a uniqueness violation or any other native
    /// failure.
    pub async fn stage_insert_or_replace(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<u64> {
        let staged = self.shadow.insert_documents(collection, documents).await?;
        debug!("Staged {} documents into shadow collection {}", staged, collection);
        Ok(staged)
    }

    /// Stages an update command: copies every base document matching each
    /// statement's filter into the shadow (preserving `_id`), then executes
    /// the statement batch against the shadow with native semantics.
    ///
    /// Only the copies are ever mutated. The full matching set is copied
    /// regardless of `multi`; the native execution enforces per-statement
    /// match bounds. A document matched by more than one statement is copied
    /// once.
    pub async fn stage_updates(
        &self,
        collection: &str,
        statements: &[UpdateStatement],
    ) -> DocumentStoreResult<WriteSummary> {
        let mut copied: Vec<Bson> = Vec::new();
        for statement in statements {
            let matched = self
                .base
                .find_documents(collection, &statement.q, None, 0)
                .await?;
            let fresh: Vec<Document> = matched
                .into_iter()
                .filter(|doc| remember_copy(&mut copied, doc))
                .collect();
            if !fresh.is_empty() {
                self.shadow.insert_documents(collection, fresh).await?;
            }
        }
        let summary = self.shadow.execute_updates(collection, statements).await?;
        debug!(
            "Staged update of collection {}: matched {}, modified {}, upserted {}",
            collection, summary.matched, summary.modified, summary.upserted
        );
        Ok(summary)
    }

    /// Stages a delete command: copies the base documents matching each
    /// statement (bounded by its `limit`) into the shadow and tombstones the
    /// copies instead of removing anything. A document matched by more than
    /// one statement is tombstoned once.
    ///
    /// Returns the number of documents tombstoned.
    pub async fn stage_deletes(
        &self,
        collection: &str,
        statements: &[DeleteStatement],
    ) -> DocumentStoreResult<u64> {
        let mut staged = 0;
        let mut copied: Vec<Bson> = Vec::new();
        for statement in statements {
            let matched = self
                .base
                .find_documents(collection, &statement.q, None, statement.limit.as_find_limit())
                .await?;
            let tombstoned: Vec<Document> = matched
                .into_iter()
                .filter(|doc| remember_copy(&mut copied, doc))
                .map(|mut doc| {
                    doc.insert(TOMBSTONE_FIELD, true);
                    doc
                })
                .collect();
            if tombstoned.is_empty() {
                continue;
            }
            staged += self.shadow.insert_documents(collection, tombstoned).await?;
        }
        debug!("Staged {} tombstones in shadow collection {}", staged, collection);
        Ok(staged)
    }

    /// Merged read over shadow and base.
    ///
    /// Returns a lazy, single-pass cursor: shadow-resident, non-tombstoned
    /// matches come first, each recording its `id`; base-resident matches
    /// follow, skipping every recorded `id`. Tombstoned shadow documents are
    /// recorded without being yielded, so they also suppress their base
    /// counterpart. The base store is not queried until the shadow side is
    /// exhausted, so a caller that stops at the first hit may never touch
    /// the base.
    ///
    /// The effective projection always includes `id` and the tombstone flag
    /// for bookkeeping; whichever of those the caller did not ask for is
    /// stripped from yielded documents.
    pub fn merge_find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> MergeFind<'_, B> {
        let (effective, strip_id, strip_tombstone) = match projection {
            Some(mut proj) => {
                let strip_id = !proj.contains_key(ID_FIELD);
                let strip_tombstone = !proj.contains_key(TOMBSTONE_FIELD);
                proj.insert(ID_FIELD, 1);
                proj.insert(TOMBSTONE_FIELD, 1);
                (Some(proj), strip_id, strip_tombstone)
            }
            // A full read still hides the tombstone flag: it is overlay
            // bookkeeping, not document data.
            None => (None, false, true),
        };
        MergeFind {
            base: self.base,
            shadow: &self.shadow,
            collection: collection.to_string(),
            filter,
            projection: effective,
            strip_id,
            strip_tombstone,
            seen: HashSet::new(),
            state: MergeState::Start,
        }
    }
}

impl<B: StoreBackend> Drop for OverlaySession<'_, B> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Overlay session dropped without close; shadow database {} leaked",
                self.shadow.database_name()
            );
        }
    }
}

/// Lazy cursor over a merged shadow+base read. Finite, single-pass, not
/// restartable.
#[derive(Debug)]
pub struct MergeFind<'s, B: StoreBackend> {
    base: &'s B,
    shadow: &'s B,
    collection: String,
    filter: Document,
    projection: Option<Document>,
    strip_id: bool,
    strip_tombstone: bool,
    seen: HashSet<String>,
    state: MergeState,
}

#[derive(Debug)]
enum MergeState {
    Start,
    Shadow(VecDeque<Document>),
    Base(VecDeque<Document>),
    Done,
}

impl<B: StoreBackend> MergeFind<'_, B> {
    /// Advances the cursor, returning the next merged document or `None`
    /// when both sides are exhausted.
    pub async fn try_next(&mut self) -> DocumentStoreResult<Option<Document>> {
        loop {
            match &mut self.state {
                MergeState::Start => {
                    let docs = self
                        .shadow
                        .find_documents(
                            &self.collection,
                            &self.filter,
                            self.projection.as_ref(),
                            0,
                        )
                        .await?;
                    self.state = MergeState::Shadow(docs.into());
                }
                MergeState::Shadow(queue) => match queue.pop_front() {
                    Some(doc) => {
                        if let Some(key) = id_key(&doc) {
                            self.seen.insert(key);
                        }
                        if is_tombstoned(&doc) {
                            continue;
                        }
                        return Ok(Some(self.strip_bookkeeping(doc)));
                    }
                    None => {
                        let docs = self
                            .base
                            .find_documents(
                                &self.collection,
                                &self.filter,
                                self.projection.as_ref(),
                                0,
                            )
                            .await?;
                        self.state = MergeState::Base(docs.into());
                    }
                },
                MergeState::Base(queue) => match queue.pop_front() {
                    Some(doc) => {
                        if let Some(key) = id_key(&doc) {
                            if self.seen.contains(&key) {
                                continue;
                            }
                        }
                        return Ok(Some(self.strip_bookkeeping(doc)));
                    }
                    None => {
                        self.state = MergeState::Done;
                    }
                },
                MergeState::Done => return Ok(None),
            }
        }
    }

    /// Drains the remainder of the cursor into a vector.
    pub async fn try_collect(mut self) -> DocumentStoreResult<Vec<Document>> {
        let mut out = Vec::new();
        while let Some(doc) = self.try_next().await? {
            out.push(doc);
        }
        Ok(out)
    }

    fn strip_bookkeeping(&self, mut doc: Document) -> Document {
        if self.strip_id {
            doc.remove(ID_FIELD);
        }
        if self.strip_tombstone {
            doc.remove(TOMBSTONE_FIELD);
        }
        doc
    }
}

fn is_tombstoned(doc: &Document) -> bool {
    matches!(doc.get(TOMBSTONE_FIELD), Some(Bson::Boolean(true)))
}

/// Records a base document's storage identity in `copied`, returning whether
/// it was fresh. Staging copies each base document into the shadow at most
/// once even when several statements match it.
fn remember_copy(copied: &mut Vec<Bson>, doc: &Document) -> bool {
    match doc.get(INTERNAL_ID_FIELD) {
        Some(id) => {
            if copied.contains(id) {
                false
            } else {
                copied.push(id.clone());
                true
            }
        }
        None => true,
    }
}

/// Dedup key for a document's schema id. Ids are strings in practice; any
/// other scalar still gets a stable key via its debug rendering.
fn id_key(doc: &Document) -> Option<String> {
    match doc.get(ID_FIELD) {
        None | Some(Bson::Null) => None,
        Some(Bson::String(id)) => Some(id.clone()),
        Some(other) => Some(format!("{other:?}")),
    }
}
