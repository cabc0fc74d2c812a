//! PartitionStore trait: persistence of tasks and computed partitions.
//!
//! The store is the clustering engine's external collaborator. It serves
//! the task snapshot the engine reads and keeps one partition per run id.
//! Replacing a partition must be atomic: readers never observe a mix of
//! old and new group rows under the same run id.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::partition::Partition;
use crate::task::{Task, TaskId};

/// The core PartitionStore trait.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert or update tasks by id.
    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<usize, StoreError>;

    /// All tasks in chronological order.
    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Ids of all tasks currently available.
    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError>;

    /// Remove tasks. Partition rows referencing them become orphans.
    async fn delete_tasks(&self, ids: &[TaskId]) -> Result<usize, StoreError>;

    /// The stored partition for a run, if any.
    async fn load_partition(&self, run_id: &str) -> Result<Option<Partition>, StoreError>;

    /// Atomically replace the partition stored under `run_id`.
    async fn replace_partition(&self, run_id: &str, partition: &Partition)
    -> Result<(), StoreError>;

    /// Delete partition rows that reference tasks no longer present.
    ///
    /// Returns the number of purged rows.
    async fn purge_orphans(&self, run_id: &str) -> Result<usize, StoreError>;

    /// Remove the partition stored under `run_id`.
    async fn clear_partition(&self, run_id: &str) -> Result<(), StoreError>;
}
