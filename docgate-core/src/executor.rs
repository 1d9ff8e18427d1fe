//! Two-phase execution of mutation commands: preview, back up, apply.
//!
//! A command moves through a strict state sequence. It is first checked
//! against policy (the target collection must be schema-governed), then
//! *previewed*: the mutation is staged into an overlay session and the
//! resulting state is validated without touching the base store. Only a
//! valid preview proceeds. Before the native command runs, every matched
//! document's pre-image is copied into the audit sink; a backup that records
//! fewer documents than were matched aborts the command. Finally the command
//! is applied natively, and a command that affected nothing is reported as a
//! distinct zero-effect outcome rather than a success.
//!
//! The preview holds no lock and the apply re-runs the original filters, so
//! a concurrent writer can change the matched set between the two phases.
//! The preview verdict is advisory under concurrency; the backup is taken
//! from the same snapshot the apply sees immediately afterwards.

use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::{
    audit::{AuditSink, StoreAuditSink, DEFAULT_DELETED_DATABASE, DEFAULT_UPDATED_DATABASE},
    backend::{StoreBackend, WriteSummary},
    command::{DeleteCommand, MutationCommand, MutationKind, UpdateCommand},
    error::{DocumentStoreResult, ExecuteError},
    overlay::{strip_internal_id, OverlaySession, ID_FIELD, INTERNAL_ID_FIELD},
    refindex::ReferenceIndex,
    schema::SchemaView,
    validate::{reference_ids, target_exists, SchemaValidator, ValidationErrors, ValidationOutcome, Violation},
};

/// What a successfully executed command did.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// The command was applied and affected at least one document.
    Applied(ApplyReceipt),
    /// The command passed preview and was applied, but matched nothing and
    /// changed nothing. Callers typically surface this distinctly.
    ZeroEffect(ApplyReceipt),
}

impl ExecuteOutcome {
    pub fn receipt(&self) -> &ApplyReceipt {
        match self {
            ExecuteOutcome::Applied(receipt) | ExecuteOutcome::ZeroEffect(receipt) => receipt,
        }
    }

    pub fn is_zero_effect(&self) -> bool {
        matches!(self, ExecuteOutcome::ZeroEffect(_))
    }
}

/// Record of one applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReceipt {
    /// Collection the command ran against.
    pub collection: String,
    pub kind: MutationKind,
    /// Native write counts reported by the apply phase.
    pub summary: WriteSummary,
    /// Pre-images recorded by the audit sink before the apply.
    pub backed_up: u64,
    /// Single timestamp shared by the audit entries and this receipt.
    pub ran_at: DateTime<Utc>,
}

/// Executes mutation commands against a base store under schema governance.
///
/// One executor serves many commands concurrently; it holds only shared
/// immutable state besides the store handles.
#[derive(Debug)]
pub struct CommandExecutor<B: StoreBackend, A: AuditSink> {
    base: B,
    schema: Arc<SchemaView>,
    refs: Arc<ReferenceIndex>,
    validator: SchemaValidator,
    audit: A,
    indexed_collections: Vec<String>,
}

impl<B: StoreBackend> CommandExecutor<B, StoreAuditSink<B>> {
    /// Starts building an executor whose audit sink writes to sibling
    /// databases of `base`.
    pub fn builder(base: B, schema: Arc<SchemaView>) -> CommandExecutorBuilder<B> {
        CommandExecutorBuilder {
            base,
            schema,
            deleted_database: DEFAULT_DELETED_DATABASE.to_string(),
            updated_database: DEFAULT_UPDATED_DATABASE.to_string(),
        }
    }
}

impl<B: StoreBackend, A: AuditSink> CommandExecutor<B, A> {
    /// Builds an executor over an arbitrary audit sink.
    pub fn with_audit_sink(base: B, schema: Arc<SchemaView>, audit: A) -> Self {
        let refs = Arc::new(ReferenceIndex::build(&schema));
        let validator = SchemaValidator::new(schema.clone(), refs.clone());
        let indexed_collections = schema.collections_with_identifier();
        CommandExecutor { base, schema, refs, validator, audit, indexed_collections }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn schema(&self) -> &Arc<SchemaView> {
        &self.schema
    }

    /// Runs one command through the full preview-then-apply sequence.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::Policy`] when the target collection is not governed;
    ///   nothing was read or written.
    /// - [`ExecuteError::Validation`] when the previewed post-mutation state
    ///   is invalid; the base store and audit sink are untouched.
    /// - [`ExecuteError::Backup`] when pre-image backup fell short; the base
    ///   store is untouched, the sink may hold a partial backup.
    /// - [`ExecuteError::Store`] / [`ExecuteError::StoreCommand`] for store
    ///   failures during preview and apply respectively.
    pub async fn execute(&self, command: &MutationCommand) -> Result<ExecuteOutcome, ExecuteError> {
        let collection = command.collection();
        let kind = command.kind();
        if !self.schema.contains_collection(collection) {
            return Err(ExecuteError::Policy(collection.to_string()));
        }
        debug!("Executing {} command on collection {}", kind, collection);
        let ran_at = Utc::now();

        match command {
            MutationCommand::Update(cmd) => self.preview_update(cmd).await?,
            MutationCommand::Delete(cmd) => self.preview_delete(cmd).await?,
        }

        let backed_up = self.back_up_matches(command, ran_at).await?;

        let summary = match command {
            MutationCommand::Update(cmd) => {
                self.base.execute_updates(&cmd.update, &cmd.updates).await
            }
            MutationCommand::Delete(cmd) => {
                self.base.execute_deletes(&cmd.delete, &cmd.deletes).await
            }
        }
        .map_err(ExecuteError::StoreCommand)?;

        let receipt = ApplyReceipt {
            collection: collection.to_string(),
            kind,
            summary,
            backed_up,
            ran_at,
        };
        if summary.affected() == 0 {
            warn!("{} command on collection {} affected no documents", kind, collection);
            return Ok(ExecuteOutcome::ZeroEffect(receipt));
        }
        debug!(
            "Applied {} command on collection {}: matched {}, modified {}, deleted {}, upserted {}",
            kind, collection, summary.matched, summary.modified, summary.deleted, summary.upserted
        );
        Ok(ExecuteOutcome::Applied(receipt))
    }

    /// Previews an update: stages it, then validates the post-update shape
    /// and references of exactly the documents the command would touch.
    ///
    /// Matched documents are identified by storage `_id` (a schema `id` is
    /// not guaranteed on every governed collection). Upsert statements that
    /// matched nothing synthesize documents with no base identity; those fall
    /// outside this restricted preview set.
    async fn preview_update(&self, command: &UpdateCommand) -> Result<(), ExecuteError> {
        let collection = command.update.as_str();
        OverlaySession::scoped(&self.base, &self.indexed_collections, async |session| {
            session.stage_updates(collection, &command.updates).await?;

            let mut matched_ids: Vec<Bson> = Vec::new();
            for statement in &command.updates {
                let matched = self
                    .base
                    .find_documents(
                        collection,
                        &statement.q,
                        Some(&doc! { INTERNAL_ID_FIELD: 1 }),
                        statement.find_limit(),
                    )
                    .await?;
                for doc in matched {
                    if let Some(id) = doc.get(INTERNAL_ID_FIELD) {
                        if !matched_ids.contains(id) {
                            matched_ids.push(id.clone());
                        }
                    }
                }
            }

            let mut resulting = session
                .shadow()
                .find_documents(
                    collection,
                    &doc! { INTERNAL_ID_FIELD: { "$in": matched_ids } },
                    None,
                    0,
                )
                .await?;
            for doc in &mut resulting {
                strip_internal_id(doc);
            }

            let candidate = doc! { collection: resulting };
            match self.validator.validate_database(&self.base, &candidate).await? {
                ValidationOutcome::Ok => Ok(()),
                ValidationOutcome::Errors { detail } => Err(ExecuteError::Validation(detail)),
            }
        })
        .await
    }

    /// Previews a delete: tombstones the matched documents in an overlay
    /// session, then re-resolves every reference that points at a deleted id
    /// from within the merged view.
    ///
    /// A referrer that is itself deleted by the same command is tombstoned
    /// too and raises no violation; a deleted id that still resolves through
    /// another allowed target collection is fine.
    async fn preview_delete(&self, command: &DeleteCommand) -> Result<(), ExecuteError> {
        let collection = command.delete.as_str();
        OverlaySession::scoped(&self.base, &self.indexed_collections, async |session| {
            let staged = session.stage_deletes(collection, &command.deletes).await?;
            if staged == 0 {
                return Ok(());
            }

            let mut deleted_ids: BTreeSet<String> = BTreeSet::new();
            for statement in &command.deletes {
                let matched = self
                    .base
                    .find_documents(
                        collection,
                        &statement.q,
                        Some(&doc! { ID_FIELD: 1 }),
                        statement.limit.as_find_limit(),
                    )
                    .await?;
                for doc in matched {
                    if let Some(Bson::String(id)) = doc.get(ID_FIELD) {
                        deleted_ids.insert(id.clone());
                    }
                }
            }
            // Documents without a schema id cannot be referenced.
            if deleted_ids.is_empty() {
                return Ok(());
            }

            // Which (collection, field) pairs can point into the target
            // collection at all, per the schema.
            let mut probes: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
            for (class_name, field_name) in self.refs.referring_fields(collection) {
                if let Some(holders) = self.schema.collections_for_class(class_name) {
                    for holder in holders {
                        probes.entry(holder.as_str()).or_default().insert(field_name);
                    }
                }
            }

            let id_values: Vec<Bson> =
                deleted_ids.iter().map(|id| Bson::String(id.clone())).collect();
            let mut violations: BTreeSet<Violation> = BTreeSet::new();
            for (referrer_collection, fields) in &probes {
                for field_name in fields {
                    let referrers = session
                        .merge_find(
                            referrer_collection,
                            doc! { *field_name: { "$in": id_values.clone() } },
                            None,
                        )
                        .try_collect()
                        .await?;
                    for referrer in &referrers {
                        let Ok(class_name) =
                            self.schema.concrete_class_of(referrer_collection, referrer)
                        else {
                            continue;
                        };
                        let Some(targets) = self.refs.target_collections(class_name, field_name)
                        else {
                            continue;
                        };
                        let source_id = match referrer.get(ID_FIELD) {
                            Some(Bson::String(id)) => Some(id.clone()),
                            _ => None,
                        };
                        let Some(value) = referrer.get(field_name) else { continue };
                        for target_id in reference_ids(value).into_iter().collect::<BTreeSet<_>>() {
                            if !deleted_ids.contains(target_id) {
                                continue;
                            }
                            if !target_exists(session, targets, target_id).await? {
                                violations.insert(Violation::dangling(
                                    referrer_collection,
                                    field_name,
                                    source_id.clone(),
                                    target_id,
                                    targets,
                                ));
                            }
                        }
                    }
                }
            }

            if violations.is_empty() {
                Ok(())
            } else {
                Err(ExecuteError::Validation(ValidationErrors::from_violations(&violations)))
            }
        })
        .await
    }

    /// Copies every matched pre-image into the audit sink, statement by
    /// statement, and insists each batch is recorded in full.
    async fn back_up_matches(
        &self,
        command: &MutationCommand,
        ran_at: DateTime<Utc>,
    ) -> Result<u64, ExecuteError> {
        let collection = command.collection();
        let kind = command.kind();
        let specs: Vec<(&Document, u64)> = match command {
            MutationCommand::Update(cmd) => cmd
                .updates
                .iter()
                .map(|statement| (&statement.q, statement.find_limit()))
                .collect(),
            MutationCommand::Delete(cmd) => cmd
                .deletes
                .iter()
                .map(|statement| (&statement.q, statement.limit.as_find_limit()))
                .collect(),
        };

        let mut total = 0;
        for (filter, limit) in specs {
            let matched = self
                .base
                .find_documents(collection, filter, None, limit)
                .await
                .map_err(|err| ExecuteError::Backup {
                    collection: collection.to_string(),
                    detail: format!("could not re-query matched documents: {err}"),
                })?;
            if matched.is_empty() {
                continue;
            }
            let expected = matched.len() as u64;
            let recorded = self
                .audit
                .record(collection, kind, matched, ran_at)
                .await
                .map_err(|err| {
                    error!("Pre-image backup failed for collection {}: {}", collection, err);
                    ExecuteError::Backup {
                        collection: collection.to_string(),
                        detail: err.to_string(),
                    }
                })?;
            if recorded != expected {
                error!(
                    "Pre-image backup for collection {} recorded {} of {} matched documents",
                    collection, recorded, expected
                );
                return Err(ExecuteError::Backup {
                    collection: collection.to_string(),
                    detail: format!("backed up {recorded} of {expected} matched documents"),
                });
            }
            total += recorded;
        }
        Ok(total)
    }

    /// Shuts down the underlying base store.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.base.shutdown().await
    }
}

/// Builder for a [`CommandExecutor`] with a [`StoreAuditSink`].
#[derive(Debug)]
pub struct CommandExecutorBuilder<B: StoreBackend> {
    base: B,
    schema: Arc<SchemaView>,
    deleted_database: String,
    updated_database: String,
}

impl<B: StoreBackend> CommandExecutorBuilder<B> {
    /// Overrides the sibling database receiving delete pre-images.
    pub fn deleted_database(mut self, name: impl Into<String>) -> Self {
        self.deleted_database = name.into();
        self
    }

    /// Overrides the sibling database receiving update pre-images.
    pub fn updated_database(mut self, name: impl Into<String>) -> Self {
        self.updated_database = name.into();
        self
    }

    pub fn build(self) -> DocumentStoreResult<CommandExecutor<B, StoreAuditSink<B>>> {
        let audit = StoreAuditSink::with_database_names(
            &self.base,
            &self.deleted_database,
            &self.updated_database,
        )?;
        Ok(CommandExecutor::with_audit_sink(self.base, self.schema, audit))
    }
}
