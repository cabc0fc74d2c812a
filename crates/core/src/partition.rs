//! Groups and partitions: the output of one clustering run.
//!
//! A [`Partition`] assigns every input task to exactly one non-empty
//! [`Group`]. Group ids are small dense integers with no meaning beyond
//! identity inside one partition.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::CoverageError;
use crate::task::{Task, TaskId};

/// Which clusterer produced a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// One linear pass merging chronologically adjacent tasks.
    #[default]
    Sequential,
    /// Full-matrix average-linkage clustering with size-based splitting.
    Hierarchical,
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

impl FromStr for ClusterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "hierarchical" | "hier" => Ok(Self::Hierarchical),
            other => Err(format!(
                "unknown cluster mode '{other}' (expected 'sequential' or 'hierarchical')"
            )),
        }
    }
}

/// The parameters a partition was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionParams {
    pub mode: ClusterMode,
    pub max_cluster_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cluster_size: Option<u64>,
    /// Distance threshold the run actually used (discovered or pinned).
    pub threshold: f64,
    /// Threshold fixed by configuration; `None` when it was discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_threshold: Option<f64>,
    pub percentile: f64,
    pub sequence_weight: f64,
    #[serde(default)]
    pub tuning: HierarchicalTuning,
    /// Tightening ended with too few clusters. An outcome, not compared.
    #[serde(default)]
    pub under_clustered: bool,
}

impl PartitionParams {
    /// Whether two runs were configured identically.
    ///
    /// The used threshold and the under-clustered flag are outputs, so they
    /// are not compared. A pinned threshold is an input and is. Tuning only
    /// counts for hierarchical runs.
    pub fn same_inputs(&self, other: &PartitionParams) -> bool {
        let pinned_match = match (self.pinned_threshold, other.pinned_threshold) {
            (None, None) => true,
            (Some(a), Some(b)) => close(a, b),
            _ => false,
        };
        self.mode == other.mode
            && self.max_cluster_size == other.max_cluster_size
            && self.min_cluster_size == other.min_cluster_size
            && pinned_match
            && close(self.percentile, other.percentile)
            && close(self.sequence_weight, other.sequence_weight)
            && (self.mode == ClusterMode::Sequential || self.tuning.same_as(&other.tuning))
    }
}

/// Knobs of the hierarchical clusterer that shape its output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchicalTuning {
    pub max_tightening_iterations: usize,
    pub tightening_step: f64,
    pub min_clusters: usize,
    pub max_split_depth: usize,
    pub kmeans_seed: u64,
    pub kmeans_iterations: usize,
}

impl Default for HierarchicalTuning {
    fn default() -> Self {
        Self {
            max_tightening_iterations: 5,
            tightening_step: 0.3,
            min_clusters: 4,
            max_split_depth: 10,
            kmeans_seed: 42,
            kmeans_iterations: 100,
        }
    }
}

impl HierarchicalTuning {
    fn same_as(&self, other: &HierarchicalTuning) -> bool {
        self.max_tightening_iterations == other.max_tightening_iterations
            && close(self.tightening_step, other.tightening_step)
            && self.min_clusters == other.min_clusters
            && self.max_split_depth == other.max_split_depth
            && self.kmeans_seed == other.kmeans_seed
            && self.kmeans_iterations == other.kmeans_iterations
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

/// A non-empty set of tasks assigned together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: usize,
    /// Members in chronological order.
    pub task_ids: Vec<TaskId>,
    /// Sum of member sizes (characters).
    pub aggregate_size: u64,
}

impl Group {
    pub fn new(id: usize, task_ids: Vec<TaskId>, aggregate_size: u64) -> Self {
        Self {
            id,
            task_ids,
            aggregate_size,
        }
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    /// Whether the group exceeds the budget.
    pub fn is_oversized(&self, max_cluster_size: u64) -> bool {
        self.aggregate_size > max_cluster_size
    }

    /// An oversized group holding a single task that alone exceeds the budget.
    pub fn is_unsplittable(&self, max_cluster_size: u64) -> bool {
        self.len() == 1 && self.is_oversized(max_cluster_size)
    }
}

/// The complete assignment of tasks into groups for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub params: PartitionParams,
    pub groups: Vec<Group>,
}

impl Partition {
    pub fn new(params: PartitionParams, groups: Vec<Group>) -> Self {
        Self { params, groups }
    }

    pub fn empty(params: PartitionParams) -> Self {
        Self {
            params,
            groups: Vec::new(),
        }
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of assigned tasks.
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    /// Every assigned task id, group by group.
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.groups.iter().flat_map(|g| g.task_ids.iter().copied())
    }

    /// The id of the group holding `task`, if any.
    pub fn group_of(&self, task: TaskId) -> Option<usize> {
        self.groups
            .iter()
            .find(|g| g.task_ids.contains(&task))
            .map(|g| g.id)
    }

    /// Set-of-sets view, independent of group ids and member order.
    pub fn contents(&self) -> BTreeSet<BTreeSet<TaskId>> {
        self.groups
            .iter()
            .map(|g| g.task_ids.iter().copied().collect())
            .collect()
    }

    /// Verify coverage and non-emptiness against the input task set.
    pub fn check_coverage(&self, tasks: &[Task]) -> Result<(), CoverageError> {
        let expected: HashSet<TaskId> = tasks.iter().map(Task::id).collect();
        let mut seen: HashSet<TaskId> = HashSet::with_capacity(expected.len());

        for group in &self.groups {
            if group.is_empty() {
                return Err(CoverageError::EmptyGroup(group.id));
            }
            for id in &group.task_ids {
                if !expected.contains(id) {
                    return Err(CoverageError::Unknown(*id));
                }
                if !seen.insert(*id) {
                    return Err(CoverageError::Duplicate(*id));
                }
            }
        }

        // Report the earliest missing task for a stable message.
        let mut missing: Vec<TaskId> = expected.difference(&seen).copied().collect();
        missing.sort();
        match missing.first() {
            Some(id) => Err(CoverageError::Missing(*id)),
            None => Ok(()),
        }
    }

    /// Drop `removed` ids, discard groups left empty, and recompute sizes.
    ///
    /// `size_of` returns the size of a surviving task; unknown ids count as 0.
    pub fn without<F>(&self, removed: &HashSet<TaskId>, size_of: F) -> Partition
    where
        F: Fn(TaskId) -> Option<u64>,
    {
        let groups = self
            .groups
            .iter()
            .filter_map(|g| {
                let task_ids: Vec<TaskId> = g
                    .task_ids
                    .iter()
                    .copied()
                    .filter(|id| !removed.contains(id))
                    .collect();
                if task_ids.is_empty() {
                    return None;
                }
                let aggregate_size = task_ids.iter().map(|id| size_of(*id).unwrap_or(0)).sum();
                Some(Group::new(g.id, task_ids, aggregate_size))
            })
            .collect();
        Partition::new(self.params.clone(), groups)
    }

    /// Reassign group ids densely as `0..len`, preserving group order.
    pub fn renumber(&mut self) {
        for (id, group) in self.groups.iter_mut().enumerate() {
            group.id = id;
        }
    }

    /// Map of `group_id -> ordered task ids` for persistence collaborators.
    pub fn assignments(&self) -> HashMap<usize, Vec<TaskId>> {
        self.groups
            .iter()
            .map(|g| (g.id, g.task_ids.clone()))
            .collect()
    }
}
