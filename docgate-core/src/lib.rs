//! A schema-governed mutation gateway for JSON document stores.
//!
//! This crate is the core of the docgate project and provides:
//!
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Command wire model** ([`command`]) - Native-shaped update and delete commands
//! - **Schema description** ([`schema`]) - Compiled schema view with shape checking and class resolution
//! - **Reference index** ([`refindex`]) - Pre-resolved map of reference fields to target collections
//! - **Overlay sessions** ([`overlay`]) - Ephemeral shadow databases for staging mutations
//! - **Validation** ([`validate`]) - Shape and referential checks over candidate document sets
//! - **Audit sink** ([`audit`]) - Append-only pre-image backups ahead of every mutation
//! - **Two-phase executor** ([`executor`]) - Preview-then-apply command execution
//! - **Error handling** ([`error`]) - Comprehensive error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docgate_core::{executor::CommandExecutor, command::MutationCommand, schema::SchemaView};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(SchemaView::from_json(schema_json)?);
//! let executor = CommandExecutor::builder(backend, schema).build()?;
//!
//! let command: MutationCommand = serde_json::from_value(serde_json::json!({
//!     "update": "biosample_set",
//!     "updates": [{"q": {"id": "nmdc:bsm-11-abc123"}, "u": {"$set": {"name": "soil core"}}}]
//! }))?;
//! let outcome = executor.execute(&command).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_core;

pub mod audit;
pub mod backend;
pub mod command;
pub mod error;
pub mod executor;
pub mod overlay;
pub mod refindex;
pub mod schema;
pub mod validate;
