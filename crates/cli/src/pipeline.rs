//! The clustering pipeline over a [`PartitionStore`].
//!
//! `cluster` purges orphaned members, validates what is stored, then either
//! reuses it or recomputes and atomically replaces it. Store writes go
//! through the configured [`RetryPolicy`].

use serde::Serialize;
use taskweave_core::{Partition, PartitionParams, PartitionStore, Result, RetryPolicy, TaskId};
use taskweave_engine::{
    ClusterEngine, ContinuityReport, DEFAULT_THRESHOLD, Diagnostics, PartitionStats,
    RecomputeReason, ThresholdSummary, ValidationReport, Verdict, validate_stored,
};
use tracing::{info, warn};

/// What `cluster` did with the stored partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "reason")]
pub enum Action {
    Reused,
    Recomputed(RecomputeReason),
    /// Recomputed on request although the stored partition was usable.
    Forced,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterRun {
    pub run_id: String,
    pub action: Action,
    /// Orphaned member rows removed before validation.
    pub purged: usize,
    pub validation: Option<ValidationReport>,
    pub partition: Partition,
    /// Present only when the engine ran.
    pub threshold: Option<ThresholdSummary>,
    pub diagnostics: Diagnostics,
    pub stats: PartitionStats,
    pub continuity: ContinuityReport,
}

/// Read-only validation result for the `validate` command.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub run_id: String,
    pub report: Option<ValidationReport>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredReport {
    pub run_id: String,
    pub partition: Partition,
    pub stats: PartitionStats,
    pub continuity: ContinuityReport,
}

/// Parameters a fresh run would record, for comparison with `stored`.
fn expected_params(engine: &ClusterEngine, stored: Option<&Partition>) -> PartitionParams {
    let threshold = stored.map_or(DEFAULT_THRESHOLD, |p| p.params.threshold);
    engine.config().partition_params(threshold)
}

/// Purge, validate, then reuse or recompute the partition under `run_id`.
pub async fn cluster(
    store: &dyn PartitionStore,
    engine: &ClusterEngine,
    retry: &RetryPolicy,
    run_id: &str,
    force: bool,
) -> Result<ClusterRun> {
    let purged = retry
        .run("purge_orphans", || store.purge_orphans(run_id))
        .await?;
    if purged > 0 {
        warn!(run_id, purged, "Purged orphaned partition members");
    }

    let tasks = store.load_tasks().await?;
    let order: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();
    let stored = store.load_partition(run_id).await?;

    let expected = expected_params(engine, stored.as_ref());
    let (validation, verdict) = validate_stored(stored.as_ref(), &order, &expected);

    let action = match (force, verdict, &stored) {
        (false, Verdict::Reuse, Some(_)) => Action::Reused,
        (false, Verdict::Recompute(reason), _) => Action::Recomputed(reason),
        (false, Verdict::Reuse, None) => Action::Recomputed(RecomputeReason::Empty),
        (true, _, _) => Action::Forced,
    };

    if let (Action::Reused, Some(partition)) = (action, stored) {
        info!(run_id, groups = partition.len(), "Reusing stored partition");
        let under_clustered = partition.params.under_clustered;
        let stats =
            PartitionStats::compute(&partition, engine.config().max_cluster_size, under_clustered);
        let continuity = ContinuityReport::analyze(&partition, &order);
        return Ok(ClusterRun {
            run_id: run_id.to_string(),
            action,
            purged,
            validation,
            partition,
            threshold: None,
            diagnostics: Diagnostics {
                under_clustered,
                ..Diagnostics::default()
            },
            stats,
            continuity,
        });
    }

    match action {
        Action::Recomputed(reason) => info!(run_id, %reason, "Recomputing partition"),
        _ => info!(run_id, "Recomputing partition on request"),
    }

    let outcome = engine.cluster(&tasks)?;
    retry
        .run("replace_partition", || {
            store.replace_partition(run_id, &outcome.partition)
        })
        .await?;

    let stats = PartitionStats::compute(
        &outcome.partition,
        engine.config().max_cluster_size,
        outcome.diagnostics.under_clustered,
    );
    let continuity = ContinuityReport::analyze(&outcome.partition, &order);
    Ok(ClusterRun {
        run_id: run_id.to_string(),
        action,
        purged,
        validation,
        partition: outcome.partition,
        threshold: Some(outcome.threshold),
        diagnostics: outcome.diagnostics,
        stats,
        continuity,
    })
}

/// Validate without touching the store.
pub async fn validate(
    store: &dyn PartitionStore,
    engine: &ClusterEngine,
    run_id: &str,
) -> Result<Validation> {
    let present = store.task_ids().await?;
    let stored = store.load_partition(run_id).await?;
    let expected = expected_params(engine, stored.as_ref());
    let (report, verdict) = validate_stored(stored.as_ref(), &present, &expected);
    Ok(Validation {
        run_id: run_id.to_string(),
        report,
        verdict,
    })
}

/// Statistics and continuity of the stored partition, measured against the
/// budget it was computed with.
pub async fn report(store: &dyn PartitionStore, run_id: &str) -> Result<Option<StoredReport>> {
    let Some(partition) = store.load_partition(run_id).await? else {
        return Ok(None);
    };
    let order = store.task_ids().await?;
    let stats = PartitionStats::compute(
        &partition,
        partition.params.max_cluster_size,
        partition.params.under_clustered,
    );
    let continuity = ContinuityReport::analyze(&partition, &order);
    Ok(Some(StoredReport {
        run_id: run_id.to_string(),
        partition,
        stats,
        continuity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use taskweave_core::{ClusterMode, OrderKey, Task};
    use taskweave_engine::EngineConfig;
    use taskweave_store::InMemoryStore;

    fn task(id: i64, embedding: Vec<f32>, size: u64) -> Task {
        let ts = Utc.timestamp_opt(1_700_000_000 + id * 60, 0).unwrap();
        Task::new(TaskId(id), embedding, size, OrderKey::new(ts, 0)).unwrap()
    }

    fn engine(max_cluster_size: u64) -> ClusterEngine {
        ClusterEngine::new(EngineConfig {
            mode: ClusterMode::Sequential,
            max_cluster_size,
            threshold: Some(0.5),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert_tasks(&[
                task(1, vec![1.0, 0.0], 100),
                task(2, vec![1.0, 0.0], 100),
                task(3, vec![0.0, 1.0], 100),
                task(4, vec![0.0, 1.0], 100),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn first_run_recomputes_then_reuses() {
        let store = seeded_store().await;
        let engine = engine(1000);
        let retry = RetryPolicy::none();

        let first = cluster(&store, &engine, &retry, "run", false).await.unwrap();
        assert_eq!(first.action, Action::Recomputed(RecomputeReason::Empty));
        assert_eq!(first.partition.len(), 2);
        assert!(first.threshold.is_some());

        let second = cluster(&store, &engine, &retry, "run", false).await.unwrap();
        assert_eq!(second.action, Action::Reused);
        assert_eq!(second.partition.contents(), first.partition.contents());
        assert!(second.threshold.is_none());
    }

    #[tokio::test]
    async fn force_recomputes_usable_partition() {
        let store = seeded_store().await;
        let engine = engine(1000);
        let retry = RetryPolicy::none();
        cluster(&store, &engine, &retry, "run", false).await.unwrap();

        let forced = cluster(&store, &engine, &retry, "run", true).await.unwrap();
        assert_eq!(forced.action, Action::Forced);
    }

    #[tokio::test]
    async fn new_task_triggers_recompute() {
        let store = seeded_store().await;
        let engine = engine(1000);
        let retry = RetryPolicy::none();
        cluster(&store, &engine, &retry, "run", false).await.unwrap();

        store.upsert_tasks(&[task(5, vec![0.0, 1.0], 100)]).await.unwrap();
        let run = cluster(&store, &engine, &retry, "run", false).await.unwrap();
        assert_eq!(run.action, Action::Recomputed(RecomputeReason::NewTasks(1)));
        assert_eq!(run.partition.task_count(), 5);
    }

    #[tokio::test]
    async fn orphans_are_purged_then_reused() {
        let store = seeded_store().await;
        let engine = engine(1000);
        let retry = RetryPolicy::none();
        cluster(&store, &engine, &retry, "run", false).await.unwrap();

        store.delete_tasks(&[TaskId(4)]).await.unwrap();
        let run = cluster(&store, &engine, &retry, "run", false).await.unwrap();
        assert_eq!(run.purged, 1);
        assert_eq!(run.action, Action::Reused);
        assert_eq!(run.partition.task_count(), 3);
    }

    #[tokio::test]
    async fn budget_change_triggers_recompute() {
        let store = seeded_store().await;
        let retry = RetryPolicy::none();
        cluster(&store, &engine(1000), &retry, "run", false).await.unwrap();

        let run = cluster(&store, &engine(150), &retry, "run", false).await.unwrap();
        assert_eq!(run.action, Action::Recomputed(RecomputeReason::ParametersChanged));
        assert_eq!(run.partition.len(), 4);
    }

    #[tokio::test]
    async fn pinned_threshold_change_triggers_recompute() {
        let store = seeded_store().await;
        let retry = RetryPolicy::none();
        let pinned = |threshold| {
            ClusterEngine::new(EngineConfig {
                threshold: Some(threshold),
                ..engine(1000).config().clone()
            })
            .unwrap()
        };

        let tight = cluster(&store, &pinned(0.01), &retry, "run", false).await.unwrap();
        assert_eq!(tight.partition.len(), 2);

        let loose = cluster(&store, &pinned(1.9), &retry, "run", false).await.unwrap();
        assert_eq!(loose.action, Action::Recomputed(RecomputeReason::ParametersChanged));
        assert_eq!(loose.partition.len(), 1);
        assert_eq!(loose.partition.params.pinned_threshold, Some(1.9));

        let again = cluster(&store, &pinned(1.9), &retry, "run", false).await.unwrap();
        assert_eq!(again.action, Action::Reused);
    }

    #[tokio::test]
    async fn reuse_keeps_under_clustered_flag() {
        let store = seeded_store().await;
        let retry = RetryPolicy::none();
        let engine = engine(1000);
        let mut partition = cluster(&store, &engine, &retry, "run", false)
            .await
            .unwrap()
            .partition;
        partition.params.under_clustered = true;
        store.replace_partition("run", &partition).await.unwrap();

        let run = cluster(&store, &engine, &retry, "run", false).await.unwrap();
        assert_eq!(run.action, Action::Reused);
        assert!(run.stats.under_clustered);
        assert!(run.diagnostics.under_clustered);

        let r = report(&store, "run").await.unwrap().unwrap();
        assert!(r.stats.under_clustered);
    }

    #[tokio::test]
    async fn validate_is_read_only() {
        let store = seeded_store().await;
        let engine = engine(1000);

        let v = validate(&store, &engine, "run").await.unwrap();
        assert_eq!(v.verdict, Verdict::Recompute(RecomputeReason::Empty));
        assert!(v.report.is_none());
        assert!(store.load_partition("run").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn report_uses_stored_budget() {
        let store = seeded_store().await;
        assert!(report(&store, "run").await.unwrap().is_none());

        cluster(&store, &engine(150), &RetryPolicy::none(), "run", false)
            .await
            .unwrap();
        let r = report(&store, "run").await.unwrap().unwrap();
        assert_eq!(r.stats.max_cluster_size, 150);
        assert_eq!(r.stats.group_count, 4);
        assert!(r.stats.oversized.is_empty());
    }

    #[tokio::test]
    async fn empty_store_yields_empty_partition() {
        let store = InMemoryStore::new();
        let run = cluster(&store, &engine(1000), &RetryPolicy::none(), "run", false)
            .await
            .unwrap();
        assert!(run.partition.is_empty());
        assert_eq!(run.action, Action::Recomputed(RecomputeReason::Empty));
    }
}
