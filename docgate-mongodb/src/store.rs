use async_trait::async_trait;
use bson::{Bson, Document, doc, ser::serialize_to_bson};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    options::{ClientOptions, FindOptions, IndexOptions},
};
use tracing::debug;

use docgate_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteSummary},
    command::{DeleteStatement, UpdateStatement},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// MongoDB-backed storage handle, scoped to one database of a deployment.
///
/// Update and delete batches are submitted as native `update`/`delete`
/// commands so that the server's own statement semantics (`multi`, `upsert`,
/// per-statement delete limits) apply unchanged, and the command reply
/// totals feed the [`WriteSummary`] directly.
#[derive(Debug, Clone)]
pub struct MongoBackend {
    client: Client,
    database: String,
}

impl MongoBackend {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoBackendBuilder {
        MongoBackendBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn run_write_command(
        &self,
        collection: &str,
        command: Document,
    ) -> DocumentStoreResult<Document> {
        let reply = self
            .client
            .database(&self.database)
            .run_command(command)
            .await
            .map_err(|e| classify_failure(&e.to_string(), collection))?;
        check_write_errors(&reply, collection)?;
        Ok(reply)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoBackend {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn sibling_database(&self, name: &str) -> DocumentStoreResult<Self> {
        Ok(Self {
            client: self.client.clone(),
            database: name.to_string(),
        })
    }

    async fn drop_database(&self) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .drop()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;
        debug!("Dropped database {}", self.database);

        Ok(())
    }

    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<u64> {
        // The driver rejects empty batches; the contract reports zero.
        if documents.is_empty() {
            return Ok(0);
        }
        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| classify_failure(&e.to_string(), collection))?;

        Ok(result.inserted_ids.len() as u64)
    }

    async fn find_documents(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
        limit: u64,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.projection = projection.cloned();
        if limit > 0 {
            options.limit = Some(limit as i64);
        }

        self.get_collection(collection)
            .find(filter.clone())
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn execute_updates(
        &self,
        collection: &str,
        statements: &[UpdateStatement],
    ) -> DocumentStoreResult<WriteSummary> {
        let updates = serialize_to_bson(&statements)?;
        let reply = self
            .run_write_command(collection, doc! { "update": collection, "updates": updates })
            .await?;

        let upserted = match reply.get("upserted") {
            Some(Bson::Array(entries)) => entries.len() as u64,
            _ => 0,
        };
        let summary = WriteSummary {
            matched: count_field(&reply, "n").saturating_sub(upserted),
            modified: count_field(&reply, "nModified"),
            deleted: 0,
            upserted,
        };
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
        let deletes = serialize_to_bson(&statements)?;
        let reply = self
            .run_write_command(collection, doc! { "delete": collection, "deletes": deletes })
            .await?;

        let summary = WriteSummary {
            deleted: count_field(&reply, "n"),
            ..WriteSummary::default()
        };
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
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { field: 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| classify_failure(&e.to_string(), collection))?;

        Ok(())
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

/// Surfaces server-side write errors carried in an otherwise-OK command
/// reply. Duplicate key violations (code 11000) become
/// [`DocumentStoreError::DocumentAlreadyExists`].
fn check_write_errors(reply: &Document, collection: &str) -> DocumentStoreResult<()> {
    let Some(Bson::Array(errors)) = reply.get("writeErrors") else {
        return Ok(());
    };
    let Some(Bson::Document(first)) = errors.first() else {
        return Ok(());
    };
    let code = match first.get("code") {
        Some(Bson::Int32(code)) => i64::from(*code),
        Some(Bson::Int64(code)) => *code,
        _ => 0,
    };
    let message = match first.get("errmsg") {
        Some(Bson::String(msg)) => msg.clone(),
        _ => format!("write error code {code}"),
    };
    if code == 11000 {
        return Err(DocumentStoreError::DocumentAlreadyExists(
            duplicate_key_detail(&message),
            collection.to_string(),
        ));
    }

    Err(DocumentStoreError::Backend(message))
}

/// Maps a driver error to the store error space, recognizing duplicate key
/// diagnostics by their E11000 marker.
fn classify_failure(message: &str, collection: &str) -> DocumentStoreError {
    if message.contains("E11000") {
        DocumentStoreError::DocumentAlreadyExists(
            duplicate_key_detail(message),
            collection.to_string(),
        )
    } else {
        DocumentStoreError::Backend(message.to_string())
    }
}

/// The `dup key: { ... }` tail of an E11000 diagnostic, or the whole
/// message when the tail is absent.
fn duplicate_key_detail(message: &str) -> String {
    match message.split_once("dup key: ") {
        Some((_, detail)) => detail.trim().to_string(),
        None => message.to_string(),
    }
}

fn count_field(reply: &Document, field: &str) -> u64 {
    match reply.get(field) {
        Some(Bson::Int32(n)) => *n as u64,
        Some(Bson::Int64(n)) => *n as u64,
        Some(Bson::Double(n)) => *n as u64,
        _ => 0,
    }
}

pub struct MongoBackendBuilder {
    dsn: String,
    database: String,
}

impl MongoBackendBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoBackendBuilder {
    type Backend = MongoBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoBackend::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
