//! Threshold selection from the empirical distance distribution.
//!
//! Two strategies:
//! - **Consecutive percentile**: distances between chronologically adjacent
//!   tasks only (O(n)); the value at index `floor(len * p)` of the sorted
//!   list becomes the cutoff. Used by the sequential clusterer.
//! - **k-distance graph**: every point's distance to its k-th nearest
//!   neighbour; the 20th percentile of those, clamped into `[P5, P50]` of all
//!   pairwise distances. Used by the hierarchical clusterer.

use serde::{Deserialize, Serialize};
use taskweave_core::Task;

use crate::distance::cosine_distance;
use crate::matrix::DistanceMatrix;

/// Threshold returned when there are too few points to measure anything.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Percentile of the k-distances taken as the candidate threshold.
pub const K_DISTANCE_PERCENTILE: f64 = 0.20;
/// Lower clamp bound, also the floor of the tightening loop.
pub const FLOOR_PERCENTILE: f64 = 0.05;
/// Upper clamp bound.
pub const CEILING_PERCENTILE: f64 = 0.50;

/// Where a run's threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    /// Pinned by configuration.
    Fixed,
    /// Percentile of consecutive distances.
    ConsecutivePercentile,
    /// k-distance graph, clamped to `[P5, P50]`.
    KDistance,
    /// k-distance threshold lowered by the tightening loop.
    Tightened,
    /// Too few tasks to measure; [`DEFAULT_THRESHOLD`].
    Default,
}

impl std::fmt::Display for ThresholdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Fixed => "fixed",
            Self::ConsecutivePercentile => "consecutive percentile",
            Self::KDistance => "k-distance graph",
            Self::Tightened => "k-distance graph (tightened)",
            Self::Default => "default",
        };
        f.write_str(label)
    }
}

/// Distances between each task and the next one (tasks in chronological order).
pub fn consecutive_distances(tasks: &[&Task]) -> Vec<f64> {
    tasks
        .windows(2)
        .map(|pair| cosine_distance(pair[0].embedding(), pair[1].embedding()))
        .collect()
}

/// Value at index `floor(len * p)` of an already sorted slice.
///
/// The index is clamped to the last element, so `p = 1.0` is the maximum.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64) * p).floor().max(0.0) as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Consecutive-percentile threshold. `None` when there are no distances.
pub fn percentile_threshold(distances: &[f64], percentile: f64) -> Option<f64> {
    percentile_of_sorted(&sorted_copy(distances), percentile)
}

/// Neighbour rank used by the k-distance graph: `clamp(n / 20, 3, 10)`,
/// never more than `n - 1`.
pub fn neighbour_rank(n: usize) -> usize {
    (n / 20).clamp(3, 10).min(n.saturating_sub(1)).max(1)
}

/// Clamp a candidate threshold into `[floor, ceiling]`.
pub fn clamp_to_bounds(candidate: f64, floor: f64, ceiling: f64) -> f64 {
    if candidate < floor {
        floor
    } else if candidate > ceiling {
        ceiling
    } else {
        candidate
    }
}

/// Result of k-distance-graph analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KDistanceThreshold {
    /// The clamped threshold.
    pub threshold: f64,
    /// Unclamped 20th percentile of the k-distances.
    pub candidate: f64,
    /// 5th percentile of all pairwise distances.
    pub floor: f64,
    /// 50th percentile of all pairwise distances.
    pub ceiling: f64,
    pub k: usize,
}

impl KDistanceThreshold {
    fn degenerate() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            candidate: DEFAULT_THRESHOLD,
            floor: DEFAULT_THRESHOLD,
            ceiling: DEFAULT_THRESHOLD,
            k: 0,
        }
    }
}

/// k-distance-graph threshold over a precomputed matrix.
pub fn k_distance_threshold(matrix: &DistanceMatrix) -> KDistanceThreshold {
    let n = matrix.len();
    if n < 2 {
        return KDistanceThreshold::degenerate();
    }

    let k = neighbour_rank(n);
    let mut k_distances: Vec<f64> = (0..n)
        .map(|i| {
            let mut others: Vec<f64> = matrix
                .row(i)
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, d)| *d)
                .collect();
            others.sort_by(f64::total_cmp);
            others[k - 1]
        })
        .collect();
    k_distances.sort_by(f64::total_cmp);

    let all = sorted_copy(&matrix.pairwise_values());
    // n >= 2 guarantees both lists are non-empty.
    let candidate =
        percentile_of_sorted(&k_distances, K_DISTANCE_PERCENTILE).unwrap_or(DEFAULT_THRESHOLD);
    let floor = percentile_of_sorted(&all, FLOOR_PERCENTILE).unwrap_or(DEFAULT_THRESHOLD);
    let ceiling = percentile_of_sorted(&all, CEILING_PERCENTILE).unwrap_or(DEFAULT_THRESHOLD);

    KDistanceThreshold {
        threshold: clamp_to_bounds(candidate, floor, ceiling),
        candidate,
        floor,
        ceiling,
        k,
    }
}

/// Shape of a distance list relative to the chosen threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DistanceSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Pairs at or below the threshold (merge candidates).
    pub at_or_below: usize,
    /// Pairs above the threshold (group boundaries).
    pub above: usize,
}

impl DistanceSummary {
    pub fn compute(distances: &[f64], threshold: f64) -> Self {
        if distances.is_empty() {
            return Self::default();
        }
        let sorted = sorted_copy(distances);
        let count = sorted.len();
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        let at_or_below = sorted.iter().filter(|d| **d <= threshold).count();
        Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            median,
            at_or_below,
            above: count - at_or_below,
        }
    }
}
