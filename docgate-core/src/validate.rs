//! Shape and referential-integrity validation of candidate document sets.
//!
//! The validator answers one question: *if these documents existed, would the
//! store still satisfy the schema?* A candidate set maps collection names to
//! lists of documents. Validation runs in four steps, accumulating errors per
//! collection rather than failing fast:
//!
//! 1. every key must name a governed collection (the reserved `@type`
//!    discriminator is accepted when it names the root aggregate class);
//! 2. every document must shape-check against its class definition;
//! 3. for shape-valid collections, candidates are staged into an overlay
//!    session and every reference field is resolved against the *merged*
//!    view, so same-batch documents and tombstone suppression both count;
//! 4. as a last defense the whole set is checked as one root-aggregate
//!    instance, with failures reported under the reserved `@aggregate` key.
//!
//! The verdict is deterministic for a fixed base snapshot: collections are
//! visited in document key order and all accumulators are ordered maps.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::DocumentStoreResult,
    overlay::{OverlaySession, ID_FIELD},
    refindex::ReferenceIndex,
    schema::{SchemaView, TYPE_DISCRIMINATOR_KEY},
};

/// Reserved key under which failures of the final whole-set check are
/// reported. Never a collection name.
pub const AGGREGATE_ERROR_KEY: &str = "@aggregate";

/// One unresolved cross-document reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    /// Collection holding the referring document.
    pub source_collection: String,
    /// The reference field on the referring document.
    pub source_field: String,
    /// Schema `id` of the referring document, when it has one.
    pub source_document_id: Option<String>,
    /// The `id` the field points at.
    pub target_id: String,
    /// Why the reference does not resolve.
    pub reason: String,
}

impl Violation {
    /// A reference whose target exists in none of the collections the schema
    /// allows it to live in.
    pub fn dangling(
        source_collection: &str,
        source_field: &str,
        source_document_id: Option<String>,
        target_id: &str,
        allowed_collections: &BTreeSet<String>,
    ) -> Self {
        let allowed = allowed_collections
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Violation {
            source_collection: source_collection.to_string(),
            source_field: source_field.to_string(),
            source_document_id,
            target_id: target_id.to_string(),
            reason: format!(
                "no document with this id exists in any of the collections \
                 the schema allows it to exist in ({allowed})"
            ),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Document '{}' in collection '{}' has a field '{}' that references \
             a document having id '{}', but {}",
            self.source_document_id.as_deref().unwrap_or("<no id>"),
            self.source_collection,
            self.source_field,
            self.target_id,
            self.reason
        )
    }
}

/// Validation messages grouped per collection, in collection order.
///
/// Only collections that actually failed appear; an empty map means the
/// candidate set passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends one message to a collection's list.
    pub fn push(&mut self, collection: &str, message: impl Into<String>) {
        self.0.entry(collection.to_string()).or_default().push(message.into());
    }

    /// Appends several messages to a collection's list.
    pub fn extend(&mut self, collection: &str, messages: impl IntoIterator<Item = String>) {
        self.0.entry(collection.to_string()).or_default().extend(messages);
    }

    /// The messages recorded for one collection.
    pub fn messages(&self, collection: &str) -> Option<&[String]> {
        self.0.get(collection).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Groups violations under their source collections.
    pub fn from_violations<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        let mut errors = ValidationErrors::default();
        for violation in violations {
            errors.push(&violation.source_collection, violation.to_string());
        }
        errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (collection, messages) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{collection}: {}", messages.join(" | "))?;
        }
        Ok(())
    }
}

/// Wire-shaped validation verdict.
///
/// Serializes to `{"result": "All Okay!"}` on success and to
/// `{"result": "errors", "detail": {collection: [message, ..]}}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum ValidationOutcome {
    #[serde(rename = "All Okay!")]
    Ok,
    #[serde(rename = "errors")]
    Errors { detail: ValidationErrors },
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationOutcome::Ok)
    }

    /// The per-collection errors, if any.
    pub fn errors(&self) -> Option<&ValidationErrors> {
        match self {
            ValidationOutcome::Ok => None,
            ValidationOutcome::Errors { detail } => Some(detail),
        }
    }
}

/// Validates candidate document sets against a schema and a base store.
///
/// Holds only shared immutable state and is cheap to clone; the base store is
/// passed per call so one validator serves any number of stores.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Arc<SchemaView>,
    refs: Arc<ReferenceIndex>,
    /// Collections provisioned with unique `id` indexes in overlay shadows.
    indexed_collections: Vec<String>,
}

impl SchemaValidator {
    pub fn new(schema: Arc<SchemaView>, refs: Arc<ReferenceIndex>) -> Self {
        let indexed_collections = schema.collections_with_identifier();
        SchemaValidator { schema, refs, indexed_collections }
    }

    pub fn schema(&self) -> &Arc<SchemaView> {
        &self.schema
    }

    /// Validates a whole candidate set against the schema and `base`.
    ///
    /// Collections are validated independently: shape failures in one do not
    /// stop shape or referential checking of another. Referential checking is
    /// skipped for collections that failed shape checking and for empty
    /// candidate lists.
    ///
    /// # Errors
    ///
    /// A returned error is an infrastructure failure (the base store could
    /// not be read or a shadow could not be provisioned). Verdicts on the
    /// candidate documents themselves are always `Ok(ValidationOutcome)`.
    pub async fn validate_database<B: StoreBackend>(
        &self,
        base: &B,
        candidate: &Document,
    ) -> DocumentStoreResult<ValidationOutcome> {
        let mut errors = ValidationErrors::default();

        for (key, value) in candidate {
            if key == TYPE_DISCRIMINATOR_KEY {
                match value {
                    Bson::String(name) if self.schema.is_root_type_name(name) => {}
                    _ => errors.push(
                        key,
                        format!(
                            "'{TYPE_DISCRIMINATOR_KEY}' must name the root class '{}'",
                            self.schema.root_class_name()
                        ),
                    ),
                }
                continue;
            }
            if !self.schema.contains_collection(key) {
                errors.push(key, format!("'{key}' is not a known schema collection name"));
                continue;
            }
            let Bson::Array(entries) = value else {
                errors.push(key, "value must be an array of documents".to_string());
                continue;
            };

            let mut docs = Vec::with_capacity(entries.len());
            let mut shape_messages = Vec::new();
            for (position, entry) in entries.iter().enumerate() {
                let Bson::Document(doc) = entry else {
                    shape_messages.push(format!("[{position}] is not a document"));
                    continue;
                };
                let label = document_label(doc, position);
                for message in self.schema.shape_errors(key, doc) {
                    shape_messages.push(format!("{label}: {message}"));
                }
                docs.push(doc.clone());
            }
            if !shape_messages.is_empty() {
                errors.extend(key, shape_messages);
                continue;
            }
            if docs.is_empty() {
                continue;
            }

            let referential = self.check_collection(base, key, docs).await?;
            if !referential.is_empty() {
                errors.extend(key, referential);
            }
        }

        if !errors.is_empty() {
            debug!("Candidate set failed validation: {}", errors);
            return Ok(ValidationOutcome::Errors { detail: errors });
        }

        // Last defense: the set as one instance of the root aggregate class.
        let aggregate = self.schema.aggregate_errors(candidate);
        if !aggregate.is_empty() {
            let mut errors = ValidationErrors::default();
            errors.push(
                AGGREGATE_ERROR_KEY,
                format!(
                    "candidate set is not a valid '{}' instance: {}",
                    self.schema.root_class_name(),
                    aggregate.join("; ")
                ),
            );
            return Ok(ValidationOutcome::Errors { detail: errors });
        }
        Ok(ValidationOutcome::Ok)
    }

    /// Stages one collection's candidates into a fresh overlay session and
    /// resolves their references against the merged view.
    ///
    /// Staging failures (duplicate `id`s within the candidate list) are
    /// verdicts on the candidates, not infrastructure faults, and come back
    /// as messages.
    async fn check_collection<B: StoreBackend>(
        &self,
        base: &B,
        collection: &str,
        docs: Vec<Document>,
    ) -> DocumentStoreResult<Vec<String>> {
        OverlaySession::scoped(base, &self.indexed_collections, async |session| {
            if let Err(err) = session.stage_insert_or_replace(collection, docs.clone()).await {
                return Ok(vec![format!("could not stage candidate documents: {err}")]);
            }
            let violations = self.resolve_references(session, collection, &docs).await?;
            Ok(violations.iter().map(Violation::to_string).collect())
        })
        .await
    }

    /// Resolves every reference field of shape-valid documents, first hit
    /// wins across the allowed target collections.
    async fn resolve_references<B: StoreBackend>(
        &self,
        session: &OverlaySession<'_, B>,
        collection: &str,
        docs: &[Document],
    ) -> DocumentStoreResult<Vec<Violation>> {
        let mut violations = Vec::new();
        for doc in docs {
            // Shape checking already pinned the class; only shape-valid
            // documents reach this point.
            let Ok(class_name) = self.schema.concrete_class_of(collection, doc) else {
                continue;
            };
            let source_id = schema_id_of(doc);
            for field_name in self.refs.fields_with_references(class_name) {
                let Some(value) = doc.get(field_name) else { continue };
                let Some(targets) = self.refs.target_collections(class_name, field_name) else {
                    continue;
                };
                for target_id in reference_ids(value).into_iter().collect::<BTreeSet<_>>() {
                    if !target_exists(session, targets, target_id).await? {
                        violations.push(Violation::dangling(
                            collection,
                            field_name,
                            source_id.clone(),
                            target_id,
                            targets,
                        ));
                    }
                }
            }
        }
        Ok(violations)
    }
}

/// Resolves one target id against the merged session view of every allowed
/// target collection. Stops at the first hit.
pub(crate) async fn target_exists<B: StoreBackend>(
    session: &OverlaySession<'_, B>,
    target_collections: &BTreeSet<String>,
    target_id: &str,
) -> DocumentStoreResult<bool> {
    for target_collection in target_collections {
        let mut found = session.merge_find(
            target_collection,
            doc! { ID_FIELD: target_id },
            Some(doc! { ID_FIELD: 1 }),
        );
        if found.try_next().await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The target ids carried by a reference field value: the string itself for
/// single-valued fields, the string elements for multivalued ones.
pub(crate) fn reference_ids(value: &Bson) -> Vec<&str> {
    match value {
        Bson::String(id) => vec![id.as_str()],
        Bson::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Bson::String(id) => Some(id.as_str()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn schema_id_of(doc: &Document) -> Option<String> {
    match doc.get(ID_FIELD) {
        Some(Bson::String(id)) => Some(id.clone()),
        _ => None,
    }
}

fn document_label(doc: &Document, position: usize) -> String {
    match doc.get(ID_FIELD) {
        Some(Bson::String(id)) => format!("'{id}'"),
        _ => format!("[{position}]"),
    }
}
