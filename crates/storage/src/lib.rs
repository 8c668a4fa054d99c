//! Storage layer for the Becayiş exchange
//!
//! This crate provides the document store abstraction the exchange core
//! persists through, with an in-memory backend and a sled-backed backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod kv;
pub mod memory;

pub use document::{Collection, Document, DocumentStore, Filter, Result, StoreError};
pub use kv::{KvConfig, KvStore};
pub use memory::MemoryStore;
