//! SQLite store.
//!
//! Three tables:
//! - `tasks`: one row per task, embedding as a little-endian `f32` blob
//! - `partitions`: one row per run id with the parameters as JSON
//! - `partition_members`: `(run_id, group_id, position, task_id)` rows
//!
//! `partition_members.task_id` is not a foreign key into
//! `tasks`: deleting a task leaves orphan rows for `purge_orphans` to find.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use taskweave_core::{
    Group, OrderKey, Partition, PartitionParams, PartitionStore, StoreError, Task, TaskId,
};
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is served by a
    /// single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Wrap an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id         INTEGER PRIMARY KEY,
                embedding  BLOB NOT NULL,
                size       INTEGER NOT NULL,
                ts         TEXT NOT NULL,
                seq        INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("tasks table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_order ON tasks(ts, seq, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("tasks order index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                run_id      TEXT PRIMARY KEY,
                params      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("partitions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partition_members (
                run_id    TEXT NOT NULL REFERENCES partitions(run_id) ON DELETE CASCADE,
                group_id  INTEGER NOT NULL,
                position  INTEGER NOT NULL,
                task_id   INTEGER NOT NULL,
                PRIMARY KEY (run_id, task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("partition_members table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_members_group ON partition_members(run_id, group_id, position)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("members group index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let blob: Vec<u8> = row
            .try_get("embedding")
            .map_err(|e| StoreError::QueryFailed(format!("embedding column: {e}")))?;
        let size: i64 = row
            .try_get("size")
            .map_err(|e| StoreError::QueryFailed(format!("size column: {e}")))?;
        let ts: String = row
            .try_get("ts")
            .map_err(|e| StoreError::QueryFailed(format!("ts column: {e}")))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StoreError::QueryFailed(format!("seq column: {e}")))?;

        let timestamp = DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("task {id} timestamp '{ts}': {e}")))?;
        let size = u64::try_from(size)
            .map_err(|_| StoreError::Corrupt(format!("task {id} has negative size {size}")))?;
        if blob.len() % 4 != 0 {
            return Err(StoreError::Corrupt(format!(
                "task {id} embedding blob has {} bytes",
                blob.len()
            )));
        }

        Task::new(
            TaskId(id),
            Self::blob_to_embedding(&blob),
            size,
            OrderKey::new(timestamp, seq),
        )
        .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Fixed-width RFC 3339 so text order matches chronological order.
    fn format_timestamp(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

/// Map a sqlx error, classifying lock contention as retryable.
fn query_error(context: &str, e: sqlx::Error) -> StoreError {
    let busy = match &e {
        sqlx::Error::Database(db) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
            let code = db.code().and_then(|c| c.parse::<i64>().ok()).unwrap_or(0);
            matches!(code & 0xff, 5 | 6) || db.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    };
    let msg = format!("{context}: {e}");
    if busy {
        StoreError::Busy(msg)
    } else {
        StoreError::QueryFailed(msg)
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Storage(format!("{what} {value} does not fit in INTEGER")))
}

#[async_trait]
impl PartitionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<usize, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("BEGIN upsert", e))?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, embedding, size, ts, seq)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    embedding = excluded.embedding,
                    size = excluded.size,
                    ts = excluded.ts,
                    seq = excluded.seq
                "#,
            )
            .bind(task.id().0)
            .bind(Self::embedding_to_blob(task.embedding()))
            .bind(to_i64(task.size(), "task size")?)
            .bind(Self::format_timestamp(task.order_key().timestamp))
            .bind(task.order_key().seq)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("INSERT task", e))?;
        }

        tx.commit().await.map_err(|e| query_error("COMMIT upsert", e))?;
        debug!(count = tasks.len(), "Upserted tasks");
        Ok(tasks.len())
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query("SELECT id, embedding, size, ts, seq FROM tasks ORDER BY ts, seq, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("SELECT tasks", e))?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM tasks ORDER BY ts, seq, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("SELECT task ids", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map(TaskId)
                    .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))
            })
            .collect()
    }

    async fn delete_tasks(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("BEGIN delete", e))?;
        let mut deleted = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("DELETE task", e))?;
            deleted += result.rows_affected();
        }
        tx.commit().await.map_err(|e| query_error("COMMIT delete", e))?;
        Ok(deleted as usize)
    }

    async fn load_partition(&self, run_id: &str) -> Result<Option<Partition>, StoreError> {
        let Some(row) = sqlx::query("SELECT params FROM partitions WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("SELECT partition", e))?
        else {
            return Ok(None);
        };

        let params_json: String = row
            .try_get("params")
            .map_err(|e| StoreError::QueryFailed(format!("params column: {e}")))?;
        let params: PartitionParams = serde_json::from_str(&params_json)
            .map_err(|e| StoreError::Corrupt(format!("partition '{run_id}' params: {e}")))?;

        // Orphaned members have no task row and contribute size 0.
        let rows = sqlx::query(
            r#"
            SELECT m.group_id, m.task_id, COALESCE(t.size, 0) AS size
            FROM partition_members m
            LEFT JOIN tasks t ON t.id = m.task_id
            WHERE m.run_id = ?1
            ORDER BY m.group_id, m.position
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("SELECT partition members", e))?;

        let mut groups: BTreeMap<i64, (Vec<TaskId>, u64)> = BTreeMap::new();
        for row in &rows {
            let group_id: i64 = row
                .try_get("group_id")
                .map_err(|e| StoreError::QueryFailed(format!("group_id column: {e}")))?;
            let task_id: i64 = row
                .try_get("task_id")
                .map_err(|e| StoreError::QueryFailed(format!("task_id column: {e}")))?;
            let size: i64 = row
                .try_get("size")
                .map_err(|e| StoreError::QueryFailed(format!("size column: {e}")))?;
            let entry = groups.entry(group_id).or_default();
            entry.0.push(TaskId(task_id));
            entry.1 = entry.1.saturating_add(size.max(0) as u64);
        }

        let groups = groups
            .into_iter()
            .map(|(id, (task_ids, size))| {
                usize::try_from(id)
                    .map(|id| Group::new(id, task_ids, size))
                    .map_err(|_| StoreError::Corrupt(format!("negative group id {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Partition::new(params, groups)))
    }

    async fn replace_partition(&self, run_id: &str, partition: &Partition) -> Result<(), StoreError> {
        let params = serde_json::to_string(&partition.params)
            .map_err(|e| StoreError::Storage(format!("Params serialization: {e}")))?;

        // A dropped transaction rolls back, so any early return below leaves
        // the previous partition in place.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("BEGIN replace", e))?;

        sqlx::query("DELETE FROM partition_members WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("DELETE old members", e))?;
        sqlx::query("DELETE FROM partitions WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("DELETE old partition", e))?;

        sqlx::query("INSERT INTO partitions (run_id, params, created_at) VALUES (?1, ?2, ?3)")
            .bind(run_id)
            .bind(&params)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("INSERT partition", e))?;

        for group in &partition.groups {
            for (position, task_id) in group.task_ids.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO partition_members (run_id, group_id, position, task_id) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(run_id)
                .bind(to_i64(group.id as u64, "group id")?)
                .bind(to_i64(position as u64, "position")?)
                .bind(task_id.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("INSERT member", e))?;
            }
        }

        tx.commit().await.map_err(|e| query_error("COMMIT replace", e))?;
        info!(
            run_id,
            groups = partition.len(),
            tasks = partition.task_count(),
            "Stored partition"
        );
        Ok(())
    }

    async fn purge_orphans(&self, run_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM partition_members
            WHERE run_id = ?1 AND task_id NOT IN (SELECT id FROM tasks)
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("DELETE orphans", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear_partition(&self, run_id: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("BEGIN clear", e))?;
        sqlx::query("DELETE FROM partition_members WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("DELETE members", e))?;
        sqlx::query("DELETE FROM partitions WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("DELETE partition", e))?;
        tx.commit().await.map_err(|e| query_error("COMMIT clear", e))?;
        Ok(())
    }
}
