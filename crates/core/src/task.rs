//! Task: the immutable unit of clusterable work.
//!
//! A task carries a semantic embedding, the rendered size it will occupy in
//! the downstream consumer (characters), and a chronological order key.
//! Tasks are produced upstream and never mutated by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;

/// Stable identifier of a task (the upstream row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Chronological position: timestamp first, then a tie-break sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub seq: i64,
}

impl OrderKey {
    pub fn new(timestamp: DateTime<Utc>, seq: i64) -> Self {
        Self { timestamp, seq }
    }
}

/// A single clusterable task.
///
/// Construct through [`Task::new`], which rejects embeddings the distance
/// function could not order (empty or containing NaN/infinity).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    id: TaskId,
    embedding: Vec<f32>,
    size: u64,
    order_key: OrderKey,
}

impl Task {
    pub fn new(
        id: TaskId,
        embedding: Vec<f32>,
        size: u64,
        order_key: OrderKey,
    ) -> Result<Self, TaskError> {
        if embedding.is_empty() {
            return Err(TaskError::EmptyEmbedding(id));
        }
        if let Some(index) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(TaskError::NonFiniteEmbedding { id, index });
        }
        Ok(Self {
            id,
            embedding,
            size,
            order_key,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    /// Rendered size in characters.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn order_key(&self) -> OrderKey {
        self.order_key
    }

    /// Embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Wire shape used for deserialization; validated into a [`Task`].
#[derive(Deserialize)]
struct RawTask {
    id: TaskId,
    embedding: Vec<f32>,
    size: u64,
    order_key: OrderKey,
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTask::deserialize(deserializer)?;
        Task::new(raw.id, raw.embedding, raw.size, raw.order_key).map_err(serde::de::Error::custom)
    }
}

/// Return indices of `tasks` in chronological order.
///
/// The sort is stable, so tasks with equal order keys keep their input order.
pub fn chronological_order(tasks: &[Task]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by_key(|&i| tasks[i].order_key);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(secs: i64, seq: i64) -> OrderKey {
        OrderKey::new(Utc.timestamp_opt(secs, 0).unwrap(), seq)
    }

    #[test]
    fn rejects_empty_embedding() {
        let err = Task::new(TaskId(1), vec![], 10, key(0, 0)).unwrap_err();
        assert_eq!(err, TaskError::EmptyEmbedding(TaskId(1)));
    }

    #[test]
    fn rejects_nan_embedding() {
        let err = Task::new(TaskId(2), vec![0.1, f32::NAN], 10, key(0, 0)).unwrap_err();
        assert_eq!(
            err,
            TaskError::NonFiniteEmbedding {
                id: TaskId(2),
                index: 1
            }
        );
    }

    #[test]
    fn order_key_compares_timestamp_then_seq() {
        assert!(key(10, 5) < key(11, 0));
        assert!(key(10, 1) < key(10, 2));
    }

    #[test]
    fn chronological_order_sorts_by_key() {
        let tasks = vec![
            Task::new(TaskId(1), vec![1.0], 1, key(30, 0)).unwrap(),
            Task::new(TaskId(2), vec![1.0], 1, key(10, 1)).unwrap(),
            Task::new(TaskId(3), vec![1.0], 1, key(10, 0)).unwrap(),
        ];
        assert_eq!(chronological_order(&tasks), vec![2, 1, 0]);
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"id":5,"embedding":[],"size":3,"order_key":{"timestamp":"2025-01-01T00:00:00Z","seq":0}}"#;
        assert!(serde_json::from_str::<Task>(json).is_err());

        let json = r#"{"id":5,"embedding":[0.5,0.5],"size":3,"order_key":{"timestamp":"2025-01-01T00:00:00Z"}}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id(), TaskId(5));
        assert_eq!(task.dimension(), 2);
        assert_eq!(task.order_key().seq, 0);
    }
}
