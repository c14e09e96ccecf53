//! Materialization store contract and reference adapters.
//!
//! The trait defines the abstract persistence interface; the in-memory and
//! file-backed implementations are reference adapters. Production backends
//! plug in behind the same trait.

mod codec;
mod file;
mod file_lock;
mod memory;
mod traits;

pub use file::FileMaterializationStore;
pub use memory::InMemoryMaterializationStore;
pub use traits::{MaterializationStore, StoreError};
