//! In-memory document storage backend for docgate.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and exercising the gateway's preview machinery without a running server.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Sibling databases** - One shared deployment, so overlay shadows and audit
//!   trails behave like they do against a real store
//! - **Native command subset** - Filtered finds, batched update/delete statements
//!   with upsert, and unique index enforcement
//!
//! # Quick Start
//!
//! ```ignore
//! use docgate::{executor::CommandExecutor, schema::SchemaView, memory::InMemoryBackend};
//! use docgate::backend::StoreBackendBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryBackend::builder()
//!         .database("gateway")
//!         .build()
//!         .await?;
//!     let schema = Arc::new(SchemaView::from_json(schema_json)?);
//!     let executor = CommandExecutor::builder(backend, schema).build()?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_memory;

pub mod evaluator;
pub mod store;
pub mod update;

pub use store::{InMemoryBackend, InMemoryBackendBuilder};
