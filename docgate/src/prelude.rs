//! Convenient re-exports of commonly used types from docgate.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docgate::prelude::*;
//! ```
//!
//! This provides access to:
//! - Store backends and builders
//! - Mutation command and statement types
//! - The two-phase command executor and its outcomes
//! - Schema views, reference indexes, and validation types
//! - Overlay sessions and audit sinks
//! - Error types

pub use docgate_core::{
    audit::{AuditSink, StoreAuditSink},
    backend::{StoreBackend, StoreBackendBuilder, WriteSummary},
    command::{
        DeleteCommand, DeleteLimit, DeleteStatement, MutationCommand, MutationKind,
        UpdateCommand, UpdateModification, UpdateStatement,
    },
    error::{DocumentStoreError, DocumentStoreResult, ExecuteError},
    executor::{ApplyReceipt, CommandExecutor, CommandExecutorBuilder, ExecuteOutcome},
    overlay::{MergeFind, OverlaySession},
    refindex::ReferenceIndex,
    schema::{SchemaDescription, SchemaView},
    validate::{SchemaValidator, ValidationErrors, ValidationOutcome, Violation},
};
