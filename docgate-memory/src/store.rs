//! In-memory storage implementation for the mutation gateway.
//!
//! This module provides a simple but complete in-memory backend: a deployment
//! of named databases, each holding collections of BSON documents behind an
//! async-aware read-write lock. Handles to sibling databases share the same
//! deployment, so overlay shadows and audit trails work exactly as they do
//! against a real server.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::debug;

use docgate_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteSummary},
    command::{DeleteLimit, DeleteStatement, UpdateStatement},
    error::{DocumentStoreError, DocumentStoreResult},
    overlay::INTERNAL_ID_FIELD,
};

use crate::{evaluator, update};

const DEFAULT_DATABASE: &str = "docgate";

/// One named database: collections in insertion order plus the unique
/// indexes registered against them. Insertion order keeps scans and
/// previews deterministic.
#[derive(Default, Debug)]
struct DatabaseState {
    collections: HashMap<String, Vec<Document>>,
    unique_indexes: HashMap<String, BTreeSet<String>>,
}

impl DatabaseState {
    /// Fields of `collection` that must stay unique. The storage identity
    /// is always constrained, like a store's implicit `_id` index.
    fn unique_fields(&self, collection: &str) -> BTreeSet<String> {
        let mut fields = self
            .unique_indexes
            .get(collection)
            .cloned()
            .unwrap_or_default();
        fields.insert(INTERNAL_ID_FIELD.to_string());
        fields
    }
}

type Deployment = HashMap<String, DatabaseState>;

/// Thread-safe in-memory storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully
/// functional document store that operates entirely in memory using
/// async-aware read-write locks. A backend value is a handle to one named
/// database; [`sibling_database`](StoreBackend::sibling_database) mints
/// handles to other databases of the same deployment.
///
/// # Thread Safety
///
/// `InMemoryBackend` is cloneable and uses an `Arc`-wrapped deployment,
/// allowing it to be safely shared across async tasks. Clones and siblings
/// of the same instance share the same underlying data.
///
/// # Performance
///
/// Filters scan all documents in a collection; unique indexes are enforced
/// but not used for lookup. For small to medium datasets this is typically
/// acceptable. For larger datasets, use a persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use docgate_memory::InMemoryBackend;
/// use docgate::backend::StoreBackend;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryBackend::new();
///
///     store
///         .insert_documents("biosample_set", vec![doc! { "id": "bsm-1" }])
///         .await?;
///
///     let found = store
///         .find_documents("biosample_set", &doc! { "id": "bsm-1" }, None, 0)
///         .await?;
///     assert_eq!(found.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryBackend {
    /// The deployment shared by this handle and all of its siblings.
    deployment: Arc<RwLock<Deployment>>,
    /// The database this handle is scoped to.
    database: String,
}

impl InMemoryBackend {
    /// Creates a new empty deployment with a handle to its default database.
    pub fn new() -> Self {
        Self {
            deployment: Arc::new(RwLock::new(Deployment::new())),
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    /// Creates a builder for constructing an `InMemoryBackend` with a custom
    /// database name.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docgate_memory::InMemoryBackend;
    /// use docgate_core::backend::StoreBackendBuilder;
    ///
    /// let store = InMemoryBackend::builder()
    ///     .database("gateway_test")
    ///     .build()
    ///     .await
    ///     .unwrap();
    /// ```
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder::default()
    }

    /// Names of all databases that currently exist in the deployment, in
    /// sorted order. Useful for asserting that ephemeral databases were
    /// reclaimed.
    pub async fn database_names(&self) -> Vec<String> {
        let deployment = self.deployment.read().await;
        let mut names: Vec<String> = deployment.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn sibling_database(&self, name: &str) -> DocumentStoreResult<Self> {
        Ok(Self {
            deployment: Arc::clone(&self.deployment),
            database: name.to_string(),
        })
    }

    async fn drop_database(&self) -> DocumentStoreResult<()> {
        self.deployment.write().await.remove(&self.database);
        debug!("Dropped in-memory database {}", self.database);
        Ok(())
    }

    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<u64> {
        let mut deployment = self.deployment.write().await;
        let state = deployment.entry(self.database.clone()).or_default();
        let fields = state.unique_fields(collection);
        let docs = state.collections.entry(collection.to_string()).or_default();

        let mut inserted = 0;
        for mut doc in documents {
            if !doc.contains_key(INTERNAL_ID_FIELD) {
                doc.insert(INTERNAL_ID_FIELD, ObjectId::new());
            }
            assert_unique(docs, None, &fields, &doc, collection)?;
            docs.push(doc);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find_documents(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
        limit: u64,
    ) -> DocumentStoreResult<Vec<Document>> {
        let deployment = self.deployment.read().await;
        let docs = deployment
            .get(&self.database)
            .and_then(|state| state.collections.get(collection));
        let Some(docs) = docs else {
            return Ok(vec![]);
        };

        let cap = if limit == 0 { usize::MAX } else { limit as usize };
        let mut found = Vec::new();
        for doc in docs {
            if found.len() == cap {
                break;
            }
            if evaluator::matches(doc, filter)? {
                found.push(match projection {
                    Some(projection) => project(doc, projection),
                    None => doc.clone(),
                });
            }
        }
        Ok(found)
    }

    async fn execute_updates(
        &self,
        collection: &str,
        statements: &[UpdateStatement],
    ) -> DocumentStoreResult<WriteSummary> {
        let mut deployment = self.deployment.write().await;
        let state = deployment.entry(self.database.clone()).or_default();
        let fields = state.unique_fields(collection);
        let docs = state.collections.entry(collection.to_string()).or_default();

        let mut summary = WriteSummary::default();
        for statement in statements {
            let mut part = WriteSummary::default();
            let mut matched_indices = Vec::new();
            for (i, doc) in docs.iter().enumerate() {
                if evaluator::matches(doc, &statement.q)? {
                    matched_indices.push(i);
                    if !statement.multi {
                        break;
                    }
                }
            }
            if matched_indices.is_empty() {
                if statement.upsert {
                    let mut fresh = update::synthesize_upsert(&statement.q, &statement.u)?;
                    if !fresh.contains_key(INTERNAL_ID_FIELD) {
                        fresh.insert(INTERNAL_ID_FIELD, ObjectId::new());
                    }
                    assert_unique(docs, None, &fields, &fresh, collection)?;
                    docs.push(fresh);
                    part.upserted += 1;
                }
            } else {
                for i in matched_indices {
                    let mut updated = docs[i].clone();
                    update::apply_modification(&mut updated, &statement.u)?;
                    if updated != docs[i] {
                        assert_unique(docs, Some(i), &fields, &updated, collection)?;
                        docs[i] = updated;
                        part.modified += 1;
                    }
                    part.matched += 1;
                }
            }
            summary.absorb(part);
        }
        debug!(
            "Executed {} update statements against {}.{}: matched {}, modified {}, upserted {}",
            statements.len(),
            self.database,
            collection,
            summary.matched,
            summary.modified,
            summary.upserted
        );
        Ok(summary)
    }

    async fn execute_deletes(
        &self,
        collection: &str,
        statements: &[DeleteStatement],
    ) -> DocumentStoreResult<WriteSummary> {
        let mut deployment = self.deployment.write().await;
        let mut summary = WriteSummary::default();
        let Some(docs) = deployment
            .get_mut(&self.database)
            .and_then(|state| state.collections.get_mut(collection))
        else {
            return Ok(summary);
        };

        for statement in statements {
            let mut matched_indices = Vec::new();
            for (i, doc) in docs.iter().enumerate() {
                if evaluator::matches(doc, &statement.q)? {
                    matched_indices.push(i);
                    if matches!(statement.limit, DeleteLimit::One) {
                        break;
                    }
                }
            }
            // Remove back to front so earlier indices stay valid.
            for i in matched_indices.into_iter().rev() {
                docs.remove(i);
                summary.deleted += 1;
            }
        }
        debug!(
            "Executed {} delete statements against {}.{}: deleted {}",
            statements.len(),
            self.database,
            collection,
            summary.deleted
        );
        Ok(summary)
    }

    async fn create_unique_index(
        &self,
        collection: &str,
        field: &str,
    ) -> DocumentStoreResult<()> {
        let mut deployment = self.deployment.write().await;
        let state = deployment.entry(self.database.clone()).or_default();
        let docs = state.collections.entry(collection.to_string()).or_default();

        let mut seen: Vec<&Bson> = Vec::new();
        for doc in docs.iter() {
            if let Some(value) = doc.get(field) {
                if seen.contains(&value) {
                    return Err(DocumentStoreError::DocumentAlreadyExists(
                        display_value(value),
                        collection.to_string(),
                    ));
                }
                seen.push(value);
            }
        }
        state
            .unique_indexes
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string());
        Ok(())
    }
}

/// Checks `candidate` against every other document for collisions on the
/// uniquely-indexed `fields`. `skip` names the index of the document being
/// replaced, if any. Documents lacking an indexed field are exempt.
fn assert_unique(
    docs: &[Document],
    skip: Option<usize>,
    fields: &BTreeSet<String>,
    candidate: &Document,
    collection: &str,
) -> DocumentStoreResult<()> {
    for field in fields {
        let Some(value) = candidate.get(field) else {
            continue;
        };
        for (i, existing) in docs.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            if existing.get(field) == Some(value) {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    display_value(value),
                    collection.to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn display_value(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shapes a document through an inclusion-style projection. The storage
/// identity is kept implicitly unless the projection maps it to `0`.
fn project(doc: &Document, projection: &Document) -> Document {
    let mut shaped = Document::new();
    let include_id = projection
        .get(INTERNAL_ID_FIELD)
        .map(included)
        .unwrap_or(true);
    if include_id {
        if let Some(id) = doc.get(INTERNAL_ID_FIELD) {
            shaped.insert(INTERNAL_ID_FIELD, id.clone());
        }
    }
    for (field, spec) in projection {
        if field.as_str() == INTERNAL_ID_FIELD || !included(spec) {
            continue;
        }
        if let Some(value) = doc.get(field) {
            shaped.insert(field.clone(), value.clone());
        }
    }
    shaped
}

fn included(spec: &Bson) -> bool {
    match spec {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Builder for constructing [`InMemoryBackend`] instances.
///
/// # Example
///
/// ```ignore
/// use docgate_memory::InMemoryBackend;
/// use docgate_core::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryBackend::builder()
///         .database("gateway_test")
///         .build()
///         .await
///         .unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryBackendBuilder {
    database: Option<String>,
}

impl InMemoryBackendBuilder {
    /// Sets the name of the database the built handle is scoped to.
    /// Defaults to `docgate`.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryBackendBuilder {
    type Backend = InMemoryBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut backend = InMemoryBackend::new();
        if let Some(database) = self.database {
            backend.database = database;
        }
        Ok(backend)
    }
}
