//! Wire model for update and delete commands.
//!
//! Commands arrive in the document store's native command shape: an update
//! command names its target collection under `update` and carries a batch of
//! [`UpdateStatement`]s, a delete command names it under `delete` and carries
//! [`DeleteStatement`]s. The same shapes are sent back out verbatim as native
//! commands during the apply phase, so these types round-trip through serde
//! without renaming.
//!
//! ```ignore
//! use docgate::command::MutationCommand;
//!
//! let cmd: MutationCommand = serde_json::from_value(serde_json::json!({
//!     "update": "biosample_set",
//!     "updates": [{"q": {"id": "bsm-11-abc123"}, "u": {"$set": {"name": "new"}}}]
//! }))?;
//! # Ok::<(), serde_json::Error>(())
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// The modification part of an update statement: either a modification
/// document (`$set`-style operators or a full replacement) or an aggregation
/// pipeline (a list of stages).
///
/// Pipelines are carried opaquely for backends that support them natively;
/// backends that do not reject them at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateModification {
    /// Operator document or full-document replacement.
    Document(Document),
    /// Aggregation pipeline form.
    Pipeline(Vec<Document>),
}

impl UpdateModification {
    /// Whether this is the document form with every top-level key an operator
    /// (`$set`, `$unset`, ...). A document with no operator keys is a full
    /// replacement.
    pub fn is_operator_form(&self) -> bool {
        match self {
            UpdateModification::Document(doc) => {
                !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
            }
            UpdateModification::Pipeline(_) => false,
        }
    }

    /// The modification as a BSON value, as it appears under `u` in the
    /// native command.
    pub fn to_bson(&self) -> Bson {
        match self {
            UpdateModification::Document(doc) => Bson::Document(doc.clone()),
            UpdateModification::Pipeline(stages) => {
                Bson::Array(stages.iter().cloned().map(Bson::Document).collect())
            }
        }
    }
}

/// A single statement of an update command: `{q, u, upsert, multi}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatement {
    /// Native filter selecting the documents to modify.
    pub q: Document,
    /// The modification to apply.
    pub u: UpdateModification,
    /// Insert a new document when the filter matches nothing.
    #[serde(default)]
    pub upsert: bool,
    /// Modify every match instead of at most one.
    #[serde(default)]
    pub multi: bool,
}

impl UpdateStatement {
    /// The find limit equivalent to this statement's match bound: unbounded
    /// for `multi`, one otherwise.
    pub fn find_limit(&self) -> u64 {
        if self.multi { 0 } else { 1 }
    }
}

/// Match bound of a delete statement: `0` removes every match, `1` removes
/// at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DeleteLimit {
    /// Remove every matching document.
    All,
    /// Remove at most one matching document.
    One,
}

impl Default for DeleteLimit {
    fn default() -> Self {
        DeleteLimit::One
    }
}

impl TryFrom<i64> for DeleteLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeleteLimit::All),
            1 => Ok(DeleteLimit::One),
            other => Err(format!("delete limit must be 0 or 1, got {other}")),
        }
    }
}

impl From<DeleteLimit> for i64 {
    fn from(value: DeleteLimit) -> Self {
        match value {
            DeleteLimit::All => 0,
            DeleteLimit::One => 1,
        }
    }
}

impl DeleteLimit {
    /// The find limit equivalent to this bound.
    pub fn as_find_limit(self) -> u64 {
        match self {
            DeleteLimit::All => 0,
            DeleteLimit::One => 1,
        }
    }
}

/// A single statement of a delete command: `{q, limit}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStatement {
    /// Native filter selecting the documents to remove.
    pub q: Document,
    /// Match bound; defaults to removing at most one document.
    #[serde(default)]
    pub limit: DeleteLimit,
}

/// A batched update command against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommand {
    /// Target collection name.
    pub update: String,
    /// Statements to execute in order.
    pub updates: Vec<UpdateStatement>,
}

/// A batched delete command against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCommand {
    /// Target collection name.
    pub delete: String,
    /// Statements to execute in order.
    pub deletes: Vec<DeleteStatement>,
}

/// Either mutation command, as dispatched by a caller that has already
/// parsed and authorized the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MutationCommand {
    Update(UpdateCommand),
    Delete(DeleteCommand),
}

impl MutationCommand {
    /// The single collection this command targets.
    pub fn collection(&self) -> &str {
        match self {
            MutationCommand::Update(cmd) => &cmd.update,
            MutationCommand::Delete(cmd) => &cmd.delete,
        }
    }

    /// Which kind of mutation this is.
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationCommand::Update(_) => MutationKind::Update,
            MutationCommand::Delete(_) => MutationKind::Delete,
        }
    }
}

impl From<UpdateCommand> for MutationCommand {
    fn from(cmd: UpdateCommand) -> Self {
        MutationCommand::Update(cmd)
    }
}

impl From<DeleteCommand> for MutationCommand {
    fn from(cmd: DeleteCommand) -> Self {
        MutationCommand::Delete(cmd)
    }
}

/// The two mutation kinds, used to key audit sinks and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_update_command() {
        let cmd: MutationCommand = serde_json::from_value(json!({
            "update": "biosample_set",
            "updates": [
                {"q": {"id": "bsm-11-abc123"}, "u": {"$set": {"name": "A_NEW_NAME"}}}
            ]
        }))
        .unwrap();

        let MutationCommand::Update(update) = cmd else {
            panic!("expected update command");
        };
        assert_eq!(update.update, "biosample_set");
        assert_eq!(update.updates.len(), 1);
        let stmt = &update.updates[0];
        assert!(!stmt.upsert);
        assert!(!stmt.multi);
        assert_eq!(stmt.find_limit(), 1);
        assert!(stmt.u.is_operator_form());
    }

    #[test]
    fn test_parse_delete_command_with_default_limit() {
        let cmd: DeleteCommand = serde_json::from_value(json!({
            "delete": "biosample_set",
            "deletes": [{"q": {"id": "NOT_A_REAL_ID"}}]
        }))
        .unwrap();

        assert_eq!(cmd.deletes[0].limit, DeleteLimit::One);
        assert_eq!(cmd.deletes[0].limit.as_find_limit(), 1);
    }

    #[test]
    fn test_delete_limit_rejects_out_of_range() {
        let result = serde_json::from_value::<DeleteStatement>(json!({
            "q": {},
            "limit": 2
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_untagged_dispatch_picks_delete() {
        let cmd: MutationCommand = serde_json::from_value(json!({
            "delete": "study_set",
            "deletes": [{"q": {"id": "sty-11-x"}, "limit": 0}]
        }))
        .unwrap();

        assert_eq!(cmd.kind(), MutationKind::Delete);
        assert_eq!(cmd.collection(), "study_set");
    }

    #[test]
    fn test_pipeline_modification_parses_from_array() {
        let stmt: UpdateStatement = serde_json::from_value(json!({
            "q": {"id": "x"},
            "u": [{"$set": {"name": "staged"}}, {"$unset": "old_field"}]
        }))
        .unwrap();

        assert!(matches!(stmt.u, UpdateModification::Pipeline(ref stages) if stages.len() == 2));
        assert!(!stmt.u.is_operator_form());
    }

    #[test]
    fn test_replacement_document_is_not_operator_form() {
        let modification = UpdateModification::Document(bson::doc! { "name": "whole new doc" });
        assert!(!modification.is_operator_form());
    }

    #[test]
    fn test_command_serializes_back_to_wire_shape() {
        let cmd = UpdateCommand {
            update: "sample".to_string(),
            updates: vec![UpdateStatement {
                q: bson::doc! { "id": "Y" },
                u: UpdateModification::Document(bson::doc! { "$set": { "name": "new" } }),
                upsert: false,
                multi: false,
            }],
        };

        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["update"], "sample");
        assert_eq!(value["updates"][0]["q"]["id"], "Y");
        assert_eq!(value["updates"][0]["u"]["$set"]["name"], "new");
    }
}
