//! # Infrastructure Adapters
//!
//! Concrete implementations of the abstract collaborators:
//!
//! - [`MemoryObjectStore`]: in-memory object store with fault injection,
//!   used by tests and local development
//! - [`FilesystemObjectStore`]: object store backed by a local directory,
//!   for single-node deployments and durable local testing
//! - [`MemoryResilienceStore`]: in-memory resilience store, the reference
//!   implementation of the persistence contract
//!
//! Production deployments supply their own [`crate::ObjectStore`] and
//! [`crate::ResilienceStore`] implementations for the real backends.

mod filesystem_object_store;
mod memory_object_store;
mod memory_store;

pub use filesystem_object_store::FilesystemObjectStore;
pub use memory_object_store::MemoryObjectStore;
pub use memory_store::MemoryResilienceStore;
