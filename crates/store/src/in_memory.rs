//! In-memory store for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use taskweave_core::{Partition, PartitionStore, StoreError, Task, TaskId, chronological_order};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, Task>,
    partitions: HashMap<String, Partition>,
}

/// Holds everything behind one lock, so replacing a partition is atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartitionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        for task in tasks {
            state.tasks.insert(task.id(), task.clone());
        }
        Ok(tasks.len())
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read().await;
        let tasks: Vec<Task> = state.tasks.values().cloned().collect();
        Ok(chronological_order(&tasks)
            .into_iter()
            .map(|i| tasks[i].clone())
            .collect())
    }

    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        Ok(self.load_tasks().await?.iter().map(Task::id).collect())
    }

    async fn delete_tasks(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        Ok(ids.iter().filter(|id| state.tasks.remove(*id).is_some()).count())
    }

    async fn load_partition(&self, run_id: &str) -> Result<Option<Partition>, StoreError> {
        Ok(self.state.read().await.partitions.get(run_id).cloned())
    }

    async fn replace_partition(&self, run_id: &str, partition: &Partition) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .partitions
            .insert(run_id.to_string(), partition.clone());
        Ok(())
    }

    async fn purge_orphans(&self, run_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.partitions.get(run_id) else {
            return Ok(0);
        };

        let orphans: HashSet<TaskId> = stored
            .task_ids()
            .filter(|id| !state.tasks.contains_key(id))
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        let purged = stored.without(&orphans, |id| state.tasks.get(&id).map(Task::size));
        state.partitions.insert(run_id.to_string(), purged);
        Ok(orphans.len())
    }

    async fn clear_partition(&self, run_id: &str) -> Result<(), StoreError> {
        self.state.write().await.partitions.remove(run_id);
        Ok(())
    }
}
