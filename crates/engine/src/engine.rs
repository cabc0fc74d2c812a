//! The clustering engine entry point.
//!
//! [`ClusterEngine`] owns a validated [`EngineConfig`] and turns a task
//! snapshot into a [`ClusterOutcome`]: the partition plus the threshold that
//! produced it and run diagnostics. The engine is synchronous and performs
//! no I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use taskweave_core::{
    ClusterMode, EngineError, Group, HierarchicalTuning, Partition, PartitionParams, Task,
    chronological_order,
};
use tracing::{debug, info, warn};

use crate::hierarchical::{HierarchicalParams, hierarchical_cluster};
use crate::sequential::{SizeLimits, sequential_cluster};
use crate::split::SplitParams;
use crate::threshold::{
    DEFAULT_THRESHOLD, DistanceSummary, KDistanceThreshold, ThresholdSource,
    consecutive_distances, percentile_threshold,
};

/// Budget for a 32k-token consumer at 80% utilization and 3.6 chars/token,
/// minus 1000 chars of prompt overhead.
pub const DEFAULT_MAX_CLUSTER_SIZE: u64 = 91_160;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ClusterMode,
    /// Size budget per group, in characters.
    pub max_cluster_size: u64,
    /// Groups below this size may overflow the budget (sequential mode).
    pub min_cluster_size: Option<u64>,
    /// Pinned distance threshold. Skips discovery and tightening.
    pub threshold: Option<f64>,
    /// Percentile of consecutive distances used by sequential mode.
    pub percentile: f64,
    /// Weight of the chronological-position penalty (hierarchical mode).
    pub sequence_weight: f64,
    pub max_tightening_iterations: usize,
    pub tightening_step: f64,
    pub min_clusters: usize,
    pub max_split_depth: usize,
    pub kmeans_seed: u64,
    pub kmeans_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Sequential,
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE,
            min_cluster_size: None,
            threshold: None,
            percentile: 0.85,
            sequence_weight: 1.0,
            max_tightening_iterations: 5,
            tightening_step: 0.3,
            min_clusters: 4,
            max_split_depth: 10,
            kmeans_seed: 42,
            kmeans_iterations: 100,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| -> Result<(), EngineError> { Err(EngineError::InvalidConfig(msg)) };

        if !(self.percentile > 0.0 && self.percentile <= 1.0) {
            return invalid(format!("percentile must be in (0, 1], got {}", self.percentile));
        }
        if !self.sequence_weight.is_finite() || self.sequence_weight < 0.0 {
            return invalid(format!(
                "sequence_weight must be finite and non-negative, got {}",
                self.sequence_weight
            ));
        }
        if !(self.tightening_step > 0.0 && self.tightening_step < 1.0) {
            return invalid(format!(
                "tightening_step must be in (0, 1), got {}",
                self.tightening_step
            ));
        }
        if let Some(t) = self.threshold
            && (!t.is_finite() || t < 0.0)
        {
            return invalid(format!("threshold must be finite and non-negative, got {t}"));
        }
        if let Some(min) = self.min_cluster_size
            && min > self.max_cluster_size
        {
            return invalid(format!(
                "min_cluster_size ({min}) exceeds max_cluster_size ({})",
                self.max_cluster_size
            ));
        }
        if self.kmeans_iterations == 0 {
            return invalid("kmeans_iterations must be at least 1".into());
        }
        Ok(())
    }

    /// Parameters recorded on a partition produced with `threshold`.
    pub fn partition_params(&self, threshold: f64) -> PartitionParams {
        PartitionParams {
            mode: self.mode,
            max_cluster_size: self.max_cluster_size,
            min_cluster_size: self.min_cluster_size,
            threshold,
            pinned_threshold: self.threshold,
            percentile: self.percentile,
            sequence_weight: self.sequence_weight,
            tuning: self.tuning(),
            under_clustered: false,
        }
    }

    pub fn tuning(&self) -> HierarchicalTuning {
        HierarchicalTuning {
            max_tightening_iterations: self.max_tightening_iterations,
            tightening_step: self.tightening_step,
            min_clusters: self.min_clusters,
            max_split_depth: self.max_split_depth,
            kmeans_seed: self.kmeans_seed,
            kmeans_iterations: self.kmeans_iterations,
        }
    }

    fn hierarchical_params(&self) -> HierarchicalParams {
        HierarchicalParams {
            sequence_weight: self.sequence_weight,
            threshold: self.threshold,
            max_tightening_iterations: self.max_tightening_iterations,
            tightening_step: self.tightening_step,
            min_clusters: self.min_clusters,
            split: SplitParams {
                max_cluster_size: self.max_cluster_size,
                max_depth: self.max_split_depth,
                seed: self.kmeans_seed,
                kmeans_iterations: self.kmeans_iterations,
            },
        }
    }
}

/// The threshold a run used and the distance distribution around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSummary {
    pub threshold: f64,
    pub source: ThresholdSource,
    /// Present when the k-distance graph was consulted.
    pub k_distance: Option<KDistanceThreshold>,
    /// Consecutive distances (sequential) or all pairs (hierarchical).
    pub distances: DistanceSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub tightening_iterations: usize,
    pub under_clustered: bool,
    pub deepest_split_level: usize,
    pub forced_fallbacks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutcome {
    pub partition: Partition,
    pub threshold: ThresholdSummary,
    pub diagnostics: Diagnostics,
}

/// Groups of chronological positions plus what produced them.
struct RawRun {
    groups: Vec<Vec<usize>>,
    threshold: ThresholdSummary,
    diagnostics: Diagnostics,
}

pub struct ClusterEngine {
    config: EngineConfig,
}

impl ClusterEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Partition `tasks`. Input order does not matter; tasks are sorted by
    /// order key first.
    pub fn cluster(&self, tasks: &[Task]) -> Result<ClusterOutcome, EngineError> {
        check_input(tasks)?;

        let order = chronological_order(tasks);
        let chrono: Vec<&Task> = order.iter().map(|&i| &tasks[i]).collect();

        let run = if chrono.is_empty() {
            self.empty_run()
        } else {
            match self.config.mode {
                ClusterMode::Sequential => self.run_sequential(&chrono),
                ClusterMode::Hierarchical => self.run_hierarchical(&chrono),
            }
        };

        let params = PartitionParams {
            under_clustered: run.diagnostics.under_clustered,
            ..self.config.partition_params(run.threshold.threshold)
        };
        let partition = build_partition(&chrono, run.groups, params);
        partition.check_coverage(tasks)?;

        let oversized = partition
            .groups
            .iter()
            .filter(|g| g.is_oversized(self.config.max_cluster_size))
            .count();
        if oversized > 0 {
            warn!(
                oversized,
                max_cluster_size = self.config.max_cluster_size,
                "Groups exceed the size budget"
            );
        }
        info!(
            mode = %self.config.mode,
            tasks = tasks.len(),
            groups = partition.len(),
            threshold = run.threshold.threshold,
            source = %run.threshold.source,
            "Clustering complete"
        );

        Ok(ClusterOutcome {
            partition,
            threshold: run.threshold,
            diagnostics: run.diagnostics,
        })
    }

    fn empty_run(&self) -> RawRun {
        let (threshold, source) = match self.config.threshold {
            Some(t) => (t, ThresholdSource::Fixed),
            None => (DEFAULT_THRESHOLD, ThresholdSource::Default),
        };
        RawRun {
            groups: Vec::new(),
            threshold: ThresholdSummary {
                threshold,
                source,
                k_distance: None,
                distances: DistanceSummary::default(),
            },
            diagnostics: Diagnostics::default(),
        }
    }

    fn run_sequential(&self, chrono: &[&Task]) -> RawRun {
        let distances = consecutive_distances(chrono);
        let (threshold, source) = match self.config.threshold {
            Some(t) => (t, ThresholdSource::Fixed),
            None => match percentile_threshold(&distances, self.config.percentile) {
                Some(t) => (t, ThresholdSource::ConsecutivePercentile),
                None => (DEFAULT_THRESHOLD, ThresholdSource::Default),
            },
        };
        let summary = DistanceSummary::compute(&distances, threshold);
        debug!(
            threshold,
            merge_candidates = summary.at_or_below,
            boundaries = summary.above,
            "Sequential threshold selected"
        );

        let groups = sequential_cluster(
            chrono,
            threshold,
            SizeLimits {
                max_cluster_size: self.config.max_cluster_size,
                min_cluster_size: self.config.min_cluster_size,
            },
        );

        RawRun {
            groups,
            threshold: ThresholdSummary {
                threshold,
                source,
                k_distance: None,
                distances: summary,
            },
            diagnostics: Diagnostics::default(),
        }
    }

    fn run_hierarchical(&self, chrono: &[&Task]) -> RawRun {
        let run = hierarchical_cluster(chrono, &self.config.hierarchical_params());
        RawRun {
            groups: run.groups,
            threshold: ThresholdSummary {
                threshold: run.threshold,
                source: run.source,
                k_distance: run.k_distance,
                distances: run.distances,
            },
            diagnostics: Diagnostics {
                tightening_iterations: run.tightening.iterations,
                under_clustered: run.tightening.exhausted,
                deepest_split_level: run.split.deepest_level,
                forced_fallbacks: run.split.forced_fallbacks,
            },
        }
    }
}

/// Reject duplicate ids and inconsistent embedding dimensions.
fn check_input(tasks: &[Task]) -> Result<(), EngineError> {
    let Some(first) = tasks.first() else {
        return Ok(());
    };
    let expected = first.dimension();
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if task.dimension() != expected {
            return Err(EngineError::DimensionMismatch {
                task: task.id(),
                expected,
                found: task.dimension(),
            });
        }
        if !seen.insert(task.id()) {
            return Err(EngineError::DuplicateTask(task.id()));
        }
    }
    Ok(())
}

/// Turn position groups into a partition with dense ids ordered by each
/// group's earliest task.
fn build_partition(chrono: &[&Task], mut groups: Vec<Vec<usize>>, params: PartitionParams) -> Partition {
    for g in &mut groups {
        g.sort_unstable();
    }
    groups.retain(|g| !g.is_empty());
    groups.sort_by_key(|g| g[0]);

    let groups = groups
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            let size = members
                .iter()
                .fold(0u64, |acc, &i| acc.saturating_add(chrono[i].size()));
            let ids = members.iter().map(|&i| chrono[i].id()).collect();
            Group::new(id, ids, size)
        })
        .collect();

    Partition::new(params, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;
    use taskweave_core::{OrderKey, TaskId};

    fn task(id: i64, emb: Vec<f32>, size: u64) -> Task {
        let ts = Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap();
        Task::new(TaskId(id), emb, size, OrderKey::new(ts, 0)).unwrap()
    }

    fn one_hot(i: usize, dim: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i % dim] = 1.0;
        v
    }

    fn engine(config: EngineConfig) -> ClusterEngine {
        ClusterEngine::new(config).unwrap()
    }

    fn sequential(max: u64) -> EngineConfig {
        EngineConfig {
            mode: ClusterMode::Sequential,
            max_cluster_size: max,
            ..EngineConfig::default()
        }
    }

    fn hierarchical(max: u64) -> EngineConfig {
        EngineConfig {
            mode: ClusterMode::Hierarchical,
            max_cluster_size: max,
            ..EngineConfig::default()
        }
    }

    /// Topic drift: tasks walk through a few topics with noise.
    fn random_tasks(n: usize, seed: u64) -> Vec<Task> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let dim = 8;
        let topics: Vec<Vec<f32>> = (0..4)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        (0..n)
            .map(|i| {
                let topic = &topics[(i / 7) % topics.len()];
                let emb = topic.iter().map(|x| *x + rng.random_range(-0.3f32..0.3)).collect();
                task(i as i64, emb, rng.random_range(50..500))
            })
            .collect()
    }

    fn positions(outcome: &ClusterOutcome, tasks: &[Task]) -> Vec<Vec<usize>> {
        let order = chronological_order(tasks);
        let chrono_ids: Vec<TaskId> = order.iter().map(|&i| tasks[i].id()).collect();
        outcome
            .partition
            .groups
            .iter()
            .map(|g| {
                g.task_ids
                    .iter()
                    .map(|id| chrono_ids.iter().position(|c| c == id).unwrap())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn scenario_orthogonal_tasks_stay_apart() {
        let tasks: Vec<Task> = (0..5).map(|i| task(i, one_hot(i as usize, 5), 100)).collect();
        for mode in [ClusterMode::Sequential, ClusterMode::Hierarchical] {
            let config = EngineConfig {
                mode,
                max_cluster_size: 250,
                threshold: Some(0.5),
                ..EngineConfig::default()
            };
            let outcome = engine(config).cluster(&tasks).unwrap();
            assert_eq!(outcome.partition.len(), 5, "mode {mode}");
            assert!(outcome.partition.groups.iter().all(|g| g.len() == 1));
            assert_eq!(outcome.threshold.source, ThresholdSource::Fixed);
        }
    }

    #[test]
    fn scenario_identical_tasks_form_one_group() {
        let tasks: Vec<Task> = (0..5).map(|i| task(i, vec![0.3, 0.4, 0.5], 50)).collect();
        let outcome = engine(sequential(1000)).cluster(&tasks).unwrap();
        assert_eq!(outcome.partition.len(), 1);
        assert_eq!(outcome.partition.groups[0].aggregate_size, 250);
        assert_eq!(outcome.threshold.source, ThresholdSource::ConsecutivePercentile);

        let config = EngineConfig {
            sequence_weight: 0.0,
            threshold: Some(0.1),
            ..hierarchical(1000)
        };
        let outcome = engine(config).cluster(&tasks).unwrap();
        assert_eq!(outcome.partition.len(), 1);
        assert_eq!(outcome.partition.groups[0].aggregate_size, 250);
    }

    #[test]
    fn scenario_single_oversized_task() {
        let tasks = vec![task(1, vec![1.0, 0.0], 5000)];
        for config in [sequential(1000), hierarchical(1000)] {
            let outcome = engine(config).cluster(&tasks).unwrap();
            assert_eq!(outcome.partition.len(), 1);
            let g = &outcome.partition.groups[0];
            assert_eq!(g.aggregate_size, 5000);
            assert!(g.is_unsplittable(1000));
        }
    }

    #[test]
    fn empty_input_is_empty_partition() {
        for config in [sequential(1000), hierarchical(1000)] {
            let outcome = engine(config).cluster(&[]).unwrap();
            assert!(outcome.partition.is_empty());
            assert_eq!(outcome.threshold.source, ThresholdSource::Default);
        }
    }

    #[test]
    fn rejects_dimension_mismatch_and_duplicates() {
        let mixed = vec![task(1, vec![1.0, 0.0], 1), task(2, vec![1.0, 0.0, 0.0], 1)];
        assert_eq!(
            engine(sequential(100)).cluster(&mixed).unwrap_err(),
            EngineError::DimensionMismatch {
                task: TaskId(2),
                expected: 2,
                found: 3
            }
        );
        let dup = vec![task(1, vec![1.0], 1), task(1, vec![1.0], 1)];
        assert_eq!(
            engine(sequential(100)).cluster(&dup).unwrap_err(),
            EngineError::DuplicateTask(TaskId(1))
        );
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = EngineConfig {
            percentile: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(ClusterEngine::new(bad), Err(EngineError::InvalidConfig(_))));
        let bad = EngineConfig {
            max_cluster_size: 10,
            min_cluster_size: Some(20),
            ..EngineConfig::default()
        };
        assert!(ClusterEngine::new(bad).is_err());
    }

    #[test]
    fn coverage_holds_in_both_modes() {
        let tasks = random_tasks(60, 7);
        for config in [sequential(1000), hierarchical(1000)] {
            let outcome = engine(config).cluster(&tasks).unwrap();
            assert_eq!(outcome.partition.check_coverage(&tasks), Ok(()));
            assert_eq!(outcome.partition.task_count(), tasks.len());
        }
    }

    #[test]
    fn hierarchical_groups_respect_budget() {
        let tasks = random_tasks(80, 11);
        let outcome = engine(hierarchical(800)).cluster(&tasks).unwrap();
        for g in &outcome.partition.groups {
            assert!(g.aggregate_size <= 800 || g.len() == 1, "group {} is {}", g.id, g.aggregate_size);
        }
    }

    #[test]
    fn sequential_groups_are_contiguous() {
        let mut tasks = random_tasks(60, 3);
        tasks.reverse();
        let outcome = engine(sequential(900)).cluster(&tasks).unwrap();
        let mut next = 0;
        for group in positions(&outcome, &tasks) {
            for pos in group {
                assert_eq!(pos, next);
                next += 1;
            }
        }
        assert_eq!(next, tasks.len());
    }

    #[test]
    fn rerun_is_idempotent() {
        let tasks = random_tasks(50, 5);
        for config in [sequential(700), hierarchical(700)] {
            let e = engine(config);
            let a = e.cluster(&tasks).unwrap().partition.contents();
            let b = e.cluster(&tasks).unwrap().partition.contents();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn group_ids_dense_and_ordered_by_earliest_task() {
        let tasks = random_tasks(40, 9);
        let outcome = engine(hierarchical(600)).cluster(&tasks).unwrap();
        let firsts: Vec<usize> = positions(&outcome, &tasks).iter().map(|g| g[0]).collect();
        let mut sorted = firsts.clone();
        sorted.sort_unstable();
        assert_eq!(firsts, sorted);
        for (i, g) in outcome.partition.groups.iter().enumerate() {
            assert_eq!(g.id, i);
        }
    }

    #[test]
    fn deep_split_when_far_over_budget() {
        // One topic block of eight, then another; everything merges at the
        // pinned threshold, and 1600 chars is more than 4x a 300 budget.
        let tasks: Vec<Task> = (0..16)
            .map(|i| {
                let emb = if i < 8 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                task(i, emb, 100)
            })
            .collect();
        let config = EngineConfig {
            sequence_weight: 0.0,
            threshold: Some(5.0),
            ..hierarchical(300)
        };
        let outcome = engine(config).cluster(&tasks).unwrap();
        assert!(outcome.diagnostics.deepest_split_level >= 2);
        assert!(outcome.partition.groups.iter().all(|g| g.aggregate_size <= 300));
        assert_eq!(outcome.partition.check_coverage(&tasks), Ok(()));
        let members: BTreeSet<TaskId> = outcome.partition.task_ids().collect();
        assert_eq!(members.len(), 16);
    }

    #[test]
    fn soft_overflow_applies_in_sequential_mode() {
        let tasks = vec![
            task(0, vec![1.0, 0.0], 100),
            task(1, vec![1.0, 0.0], 900),
            task(2, vec![0.0, 1.0], 100),
        ];
        let config = EngineConfig {
            max_cluster_size: 500,
            min_cluster_size: Some(200),
            threshold: Some(0.5),
            ..sequential(500)
        };
        let outcome = engine(config).cluster(&tasks).unwrap();
        assert_eq!(outcome.partition.groups[0].aggregate_size, 1000);
        assert_eq!(outcome.partition.len(), 2);
    }

    #[test]
    fn partition_records_parameters() {
        let tasks = random_tasks(20, 1);
        let outcome = engine(hierarchical(2000)).cluster(&tasks).unwrap();
        let params = &outcome.partition.params;
        assert_eq!(params.mode, ClusterMode::Hierarchical);
        assert_eq!(params.max_cluster_size, 2000);
        assert_eq!(params.threshold, outcome.threshold.threshold);
        assert!(outcome.threshold.k_distance.is_some());
        assert_eq!(params.pinned_threshold, None);
        assert_eq!(params.tuning, HierarchicalTuning::default());
    }

    #[test]
    fn pinned_threshold_is_recorded() {
        let tasks = random_tasks(10, 2);
        let config = EngineConfig {
            threshold: Some(0.7),
            kmeans_seed: 7,
            ..hierarchical(2000)
        };
        let outcome = engine(config).cluster(&tasks).unwrap();
        let params = &outcome.partition.params;
        assert_eq!(params.pinned_threshold, Some(0.7));
        assert_eq!(params.threshold, 0.7);
        assert_eq!(params.tuning.kmeans_seed, 7);
    }

    #[test]
    fn exhausted_tightening_marks_partition_under_clustered() {
        let tasks: Vec<Task> = (0..4).map(|i| task(i, vec![1.0, 0.0], 10)).collect();
        let config = EngineConfig {
            sequence_weight: 0.0,
            ..hierarchical(10_000)
        };
        let outcome = engine(config).cluster(&tasks).unwrap();
        assert_eq!(outcome.partition.len(), 1);
        assert!(outcome.diagnostics.under_clustered);
        assert!(outcome.partition.params.under_clustered);
    }
}
