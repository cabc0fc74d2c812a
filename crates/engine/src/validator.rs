//! Partition validator: decides whether a stored partition can be reused.
//!
//! Orphans (stored ids no longer present upstream) are a cleanup concern,
//! never fatal: the verdict is computed as if they had already been purged.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use taskweave_core::{Partition, PartitionParams, TaskId};

/// Why a stored partition cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "count")]
pub enum RecomputeReason {
    /// Upstream has tasks the stored partition does not cover.
    NewTasks(usize),
    /// Clustering configuration differs from the stored run.
    ParametersChanged,
    /// Nothing usable is stored.
    Empty,
}

impl fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewTasks(n) => write!(f, "{n} new task(s) not covered"),
            Self::ParametersChanged => write!(f, "clustering parameters changed"),
            Self::Empty => write!(f, "no stored partition"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Reuse,
    Recompute(RecomputeReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Stored ids no longer present upstream, ascending.
    pub orphaned: Vec<TaskId>,
    /// Present ids missing from the stored partition, ascending.
    pub new_tasks: Vec<TaskId>,
    pub stored_count: usize,
    pub present_count: usize,
    pub params_match: bool,
}

impl ValidationReport {
    pub fn verdict(&self) -> Verdict {
        let surviving = self.stored_count - self.orphaned.len();
        if surviving == 0 && self.present_count > 0 {
            Verdict::Recompute(RecomputeReason::Empty)
        } else if !self.new_tasks.is_empty() {
            Verdict::Recompute(RecomputeReason::NewTasks(self.new_tasks.len()))
        } else if !self.params_match {
            Verdict::Recompute(RecomputeReason::ParametersChanged)
        } else {
            Verdict::Reuse
        }
    }

    pub fn has_orphans(&self) -> bool {
        !self.orphaned.is_empty()
    }
}

/// Compare a stored partition against the ids present upstream.
pub fn validate(stored: &Partition, present: &[TaskId], params: &PartitionParams) -> ValidationReport {
    let stored_ids: HashSet<TaskId> = stored.task_ids().collect();
    let present_ids: HashSet<TaskId> = present.iter().copied().collect();

    let mut orphaned: Vec<TaskId> = stored_ids.difference(&present_ids).copied().collect();
    orphaned.sort();
    let mut new_tasks: Vec<TaskId> = present_ids.difference(&stored_ids).copied().collect();
    new_tasks.sort();

    ValidationReport {
        orphaned,
        new_tasks,
        stored_count: stored_ids.len(),
        present_count: present_ids.len(),
        params_match: stored.params.same_inputs(params),
    }
}

/// Verdict for a possibly missing stored partition.
pub fn validate_stored(
    stored: Option<&Partition>,
    present: &[TaskId],
    params: &PartitionParams,
) -> (Option<ValidationReport>, Verdict) {
    match stored {
        Some(partition) => {
            let report = validate(partition, present, params);
            let verdict = report.verdict();
            (Some(report), verdict)
        }
        None if present.is_empty() => (None, Verdict::Reuse),
        None => (None, Verdict::Recompute(RecomputeReason::Empty)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskweave_core::{ClusterMode, Group, HierarchicalTuning};

    fn params() -> PartitionParams {
        PartitionParams {
            mode: ClusterMode::Hierarchical,
            max_cluster_size: 1000,
            min_cluster_size: None,
            threshold: 0.4,
            percentile: 0.85,
            sequence_weight: 1.0,
            pinned_threshold: None,
            tuning: HierarchicalTuning::default(),
            under_clustered: false,
        }
    }

    fn ids(v: &[i64]) -> Vec<TaskId> {
        v.iter().copied().map(TaskId).collect()
    }

    fn stored(groups: &[&[i64]]) -> Partition {
        Partition::new(
            params(),
            groups
                .iter()
                .enumerate()
                .map(|(i, g)| Group::new(i, ids(g), 10 * g.len() as u64))
                .collect(),
        )
    }

    #[test]
    fn identical_sets_reuse() {
        let report = validate(&stored(&[&[1, 2], &[3]]), &ids(&[3, 2, 1]), &params());
        assert_eq!(report.verdict(), Verdict::Reuse);
        assert!(!report.has_orphans());
    }

    #[test]
    fn new_tasks_make_it_stale() {
        let report = validate(&stored(&[&[1, 2]]), &ids(&[1, 2, 3, 4]), &params());
        assert_eq!(report.new_tasks, ids(&[3, 4]));
        assert_eq!(report.verdict(), Verdict::Recompute(RecomputeReason::NewTasks(2)));
    }

    #[test]
    fn orphans_are_purged_then_reused() {
        let report = validate(&stored(&[&[1, 2], &[3, 9]]), &ids(&[1, 2, 3]), &params());
        assert_eq!(report.orphaned, ids(&[9]));
        assert_eq!(report.verdict(), Verdict::Reuse);
    }

    #[test]
    fn orphans_and_new_tasks_recompute() {
        let report = validate(&stored(&[&[1, 9]]), &ids(&[1, 2]), &params());
        assert_eq!(report.orphaned, ids(&[9]));
        assert_eq!(report.verdict(), Verdict::Recompute(RecomputeReason::NewTasks(1)));
    }

    #[test]
    fn parameter_change_recomputes() {
        let changed = PartitionParams {
            max_cluster_size: 500,
            ..params()
        };
        let report = validate(&stored(&[&[1]]), &ids(&[1]), &changed);
        assert_eq!(report.verdict(), Verdict::Recompute(RecomputeReason::ParametersChanged));
    }

    #[test]
    fn discovered_threshold_does_not_count_as_change() {
        let rerun = PartitionParams {
            threshold: 0.2,
            ..params()
        };
        let report = validate(&stored(&[&[1]]), &ids(&[1]), &rerun);
        assert_eq!(report.verdict(), Verdict::Reuse);
    }

    #[test]
    fn fully_orphaned_partition_is_empty() {
        let report = validate(&stored(&[&[7, 8]]), &ids(&[1]), &params());
        assert_eq!(report.verdict(), Verdict::Recompute(RecomputeReason::Empty));
    }

    #[test]
    fn missing_partition() {
        let (report, verdict) = validate_stored(None, &ids(&[1]), &params());
        assert!(report.is_none());
        assert_eq!(verdict, Verdict::Recompute(RecomputeReason::Empty));
        assert_eq!(validate_stored(None, &[], &params()).1, Verdict::Reuse);
    }
}
