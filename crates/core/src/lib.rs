//! # Taskweave Core
//!
//! Domain types, traits, and error definitions for the Taskweave task
//! partitioner. This crate has **no framework dependencies**: it defines the
//! model the engine, store, and CLI crates build against.
//!
//! ## Design Philosophy
//!
//! The engine only ever sees [`Task`] values and produces a [`Partition`].
//! Persistence is a trait here ([`PartitionStore`]) with implementations in
//! `taskweave-store`, so the engine stays free of I/O and tests can swap in
//! an in-memory store.

pub mod error;
pub mod partition;
pub mod retry;
pub mod store;
pub mod task;

// Re-export key types at crate root for ergonomics
pub use error::{CoverageError, EngineError, Error, Result, StoreError, TaskError};
pub use partition::{ClusterMode, Group, HierarchicalTuning, Partition, PartitionParams};
pub use retry::{RetryPolicy, Retryable};
pub use store::PartitionStore;
pub use task::{OrderKey, Task, TaskId, chronological_order};
