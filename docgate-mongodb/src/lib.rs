//! MongoDB backend implementation for docgate.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait,
//! giving the gateway persistent storage with the server's native write semantics.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docgate = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Native command execution** - Update and delete batches run as raw `update`/`delete`
//!   commands, so `multi`, `upsert` and per-statement delete limits behave exactly as
//!   the server defines them
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//! - **Sibling databases** - Overlay shadows and audit trails live in databases of the
//!   same deployment, addressed through the shared client
//!
//! # Connection
//!
//! To use this backend, you need a MongoDB connection string. This can be provided
//! through the builder pattern.
//!
//! # Example
//!
//! ```ignore
//! use docgate::{backend::StoreBackendBuilder, mongodb::MongoBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoBackend::builder("mongodb://localhost:27017", "docgate")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_mongodb;

pub mod store;

pub use store::{MongoBackend, MongoBackendBuilder};
