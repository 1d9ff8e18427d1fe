//! Main docgate crate providing a unified interface to the mutation gateway.
//!
//! This crate is the primary entry point for users of the docgate framework.
//! It re-exports the core types and functionality from various sub-crates and provides
//! convenient access to different storage backends.
//!
//! # Features
//!
//! - **Schema-governed mutations** - Update and delete commands are admitted only for
//!   collections the schema governs
//! - **Preview before apply** - Every command is rehearsed against an ephemeral overlay
//!   of the base store; the post-mutation state is validated for document shape and
//!   referential integrity before anything is written
//! - **Pre-image audit trail** - Matched documents are backed up to sibling databases
//!   before the native command runs, and the operation aborts if the backup falls short
//! - **Multiple backends** - Support for in-memory and MongoDB storage with an
//!   extensible trait system
//!
//! # Quick Start
//!
//! ```ignore
//! use docgate::{prelude::*, memory::InMemoryBackend};
//! use bson::doc;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Describe the root aggregate class, the governed collections, and
//!     // their classes.
//!     let schema = Arc::new(SchemaView::from_json(json!({
//!         "name": "Database",
//!         "prefix": "nmdc",
//!         "collections": { /* ... */ },
//!         "classes": { /* ... */ },
//!     }))?);
//!
//!     let store = InMemoryBackend::builder().build().await?;
//!     store
//!         .insert_documents("biosample_set", vec![doc! { "id": "bsm-1", "type": "nmdc:Biosample" }])
//!         .await?;
//!
//!     let executor = CommandExecutor::builder(store, schema).build()?;
//!
//!     // A two-phase update: previewed, validated, backed up, then applied.
//!     let command = MutationCommand::from(UpdateCommand {
//!         update: "biosample_set".to_string(),
//!         updates: vec![UpdateStatement {
//!             q: doc! { "id": "bsm-1" },
//!             u: UpdateModification::Document(doc! { "$set": { "depth": 2.5 } }),
//!             upsert: false,
//!             multi: false,
//!         }],
//!     });
//!
//!     match executor.execute(&command).await? {
//!         ExecuteOutcome::Applied(receipt) => {
//!             println!("updated {} documents", receipt.summary.matched);
//!         }
//!         ExecuteOutcome::ZeroEffect(_) => println!("nothing matched"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Referential protection
//!
//! A delete is rejected when it would strand references. The executor re-resolves
//! every inbound reference to the to-be-deleted documents inside the overlay, where
//! the deletion has already "happened", so a command that removes a referenced
//! document fails validation and leaves the base store untouched:
//!
//! ```ignore
//! use docgate::{prelude::*, error::ExecuteError};
//! use bson::doc;
//!
//! let command = MutationCommand::from(DeleteCommand {
//!     delete: "study_set".to_string(),
//!     deletes: vec![DeleteStatement {
//!         q: doc! { "id": "sty-1" },
//!         limit: DeleteLimit::One,
//!     }],
//! });
//!
//! match executor.execute(&command).await {
//!     Err(ExecuteError::Validation(errors)) => {
//!         // e.g. biosample_set: Document 'bsm-1' ... references ... 'sty-1' ...
//!         println!("{errors}");
//!     }
//!     other => println!("{other:?}"),
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docgate_core::{
    audit, backend, command, error, executor, overlay, refindex, schema, validate,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docgate_memory::{InMemoryBackend, InMemoryBackendBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docgate_mongodb::{MongoBackend, MongoBackendBuilder};
}
