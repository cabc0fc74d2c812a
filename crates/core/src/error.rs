//! Error types for the Taskweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use crate::task::TaskId;
use thiserror::Error;

/// The top-level error type for all Taskweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Task construction errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Clustering engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Partition invariant violations ---
    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A task record that cannot be clustered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Task {0} has an empty embedding")]
    EmptyEmbedding(TaskId),

    #[error("Task {id} has a non-finite embedding component at index {index}")]
    NonFiniteEmbedding { id: TaskId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Task {task} has embedding dimension {found}, expected {expected}")]
    DimensionMismatch {
        task: TaskId,
        expected: usize,
        found: usize,
    },

    #[error("Task {0} appears more than once in the input")]
    DuplicateTask(TaskId),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Clustering produced an invalid partition: {0}")]
    InvalidPartition(#[from] CoverageError),
}

/// A violation of the partition coverage / non-emptiness invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverageError {
    #[error("Task {0} is not assigned to any group")]
    Missing(TaskId),

    #[error("Task {0} is assigned to more than one group")]
    Duplicate(TaskId),

    #[error("Group references unknown task {0}")]
    Unknown(TaskId),

    #[error("Group {0} is empty")]
    EmptyGroup(usize),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    /// Whether the operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}
