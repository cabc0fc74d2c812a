//! Hierarchical clustering: sequence-adjusted distance matrix, k-distance
//! threshold, average-linkage cut, threshold tightening, and size splitting.

use taskweave_core::Task;
use tracing::{debug, info, warn};

use crate::dendrogram::Dendrogram;
use crate::matrix::DistanceMatrix;
use crate::split::{SplitParams, SplitStats, split_cluster};
use crate::threshold::{DistanceSummary, KDistanceThreshold, ThresholdSource, k_distance_threshold};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HierarchicalParams {
    pub sequence_weight: f64,
    /// Pinned threshold; skips discovery and tightening.
    pub threshold: Option<f64>,
    pub max_tightening_iterations: usize,
    /// Fraction of the gap to the floor removed per tightening iteration.
    pub tightening_step: f64,
    /// Tightening continues while the cut yields fewer clusters than this.
    pub min_clusters: usize,
    pub split: SplitParams,
}

/// Everything one hierarchical run produced.
#[derive(Debug, Clone)]
pub struct HierarchicalRun {
    /// Groups of chronological positions, ordered by first member.
    pub groups: Vec<Vec<usize>>,
    pub threshold: f64,
    pub source: ThresholdSource,
    pub k_distance: Option<KDistanceThreshold>,
    pub distances: DistanceSummary,
    pub tightening: Tightening,
    pub split: SplitStats,
}

/// Outcome of the tightening loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tightening {
    pub threshold: f64,
    pub iterations: usize,
    pub clusters: usize,
    /// The loop ended with fewer than `min_clusters` clusters.
    pub exhausted: bool,
}

/// Lower `start` toward `floor` until the cut yields at least `min_clusters`
/// clusters, the floor is reached, or the iteration budget runs out.
pub fn tighten(
    dendrogram: &Dendrogram,
    start: f64,
    floor: f64,
    params: &HierarchicalParams,
) -> Tightening {
    let mut threshold = start;
    let mut clusters = dendrogram.cluster_count(threshold);
    let mut iterations = 0;

    while clusters < params.min_clusters && iterations < params.max_tightening_iterations {
        if threshold <= floor {
            break;
        }
        threshold -= params.tightening_step * (threshold - floor);
        iterations += 1;
        clusters = dendrogram.cluster_count(threshold);
        debug!(iteration = iterations, threshold, clusters, "Tightened threshold");
    }

    // Fewer tasks than `min_clusters` can never satisfy the loop.
    let exhausted = clusters < params.min_clusters && dendrogram.len() >= params.min_clusters;
    Tightening {
        threshold,
        iterations,
        clusters,
        exhausted,
    }
}

/// Cluster chronologically sorted tasks. Requires at least one task.
pub fn hierarchical_cluster(tasks: &[&Task], params: &HierarchicalParams) -> HierarchicalRun {
    let matrix = DistanceMatrix::from_tasks(tasks, params.sequence_weight);
    cluster_matrix(tasks, &matrix, params)
}

pub(crate) fn cluster_matrix(
    tasks: &[&Task],
    matrix: &DistanceMatrix,
    params: &HierarchicalParams,
) -> HierarchicalRun {
    let dendrogram = Dendrogram::build(matrix);
    let pairwise = matrix.pairwise_values();

    let (k_distance, start, source) = match params.threshold {
        Some(fixed) => (None, fixed, ThresholdSource::Fixed),
        None if tasks.len() < 2 => (
            None,
            crate::threshold::DEFAULT_THRESHOLD,
            ThresholdSource::Default,
        ),
        None => {
            let kd = k_distance_threshold(matrix);
            info!(
                k = kd.k,
                candidate = kd.candidate,
                floor = kd.floor,
                ceiling = kd.ceiling,
                threshold = kd.threshold,
                "Selected k-distance threshold"
            );
            (Some(kd), kd.threshold, ThresholdSource::KDistance)
        }
    };

    let tightening = match k_distance {
        Some(kd) => tighten(&dendrogram, start, kd.floor, params),
        None => Tightening {
            threshold: start,
            iterations: 0,
            clusters: dendrogram.cluster_count(start),
            exhausted: false,
        },
    };
    if tightening.exhausted {
        warn!(
            clusters = tightening.clusters,
            iterations = tightening.iterations,
            threshold = tightening.threshold,
            "Threshold tightening exhausted, proceeding under-clustered"
        );
    }
    let source = if tightening.iterations > 0 {
        ThresholdSource::Tightened
    } else {
        source
    };

    let threshold = tightening.threshold;
    let mut split = SplitStats::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for cluster in dendrogram.cut(threshold) {
        let total: u64 = cluster.iter().map(|&i| tasks[i].size()).sum();
        if total > params.split.max_cluster_size && cluster.len() > 1 {
            debug!(tasks = cluster.len(), size = total, "Splitting oversized cluster");
            groups.extend(split_cluster(cluster, tasks, matrix, &params.split, &mut split));
        } else {
            groups.push(cluster);
        }
    }
    groups.sort_by_key(|g| g.first().copied());

    HierarchicalRun {
        groups,
        threshold,
        source,
        k_distance,
        distances: DistanceSummary::compute(&pairwise, threshold),
        tightening,
        split,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use taskweave_core::{OrderKey, TaskId};

    fn task(id: i64, emb: Vec<f32>, size: u64) -> Task {
        Task::new(TaskId(id), emb, size, OrderKey::new(Utc.timestamp_opt(id, 0).unwrap(), 0)).unwrap()
    }

    fn params(max: u64) -> HierarchicalParams {
        HierarchicalParams {
            sequence_weight: 1.0,
            threshold: None,
            max_tightening_iterations: 5,
            tightening_step: 0.3,
            min_clusters: 4,
            split: SplitParams {
                max_cluster_size: max,
                max_depth: 10,
                seed: 42,
                kmeans_iterations: 100,
            },
        }
    }

    /// Pairs at `pair_distance[p]`, everything else 0.6.
    fn paired(pair_distances: &[f64]) -> DistanceMatrix {
        let n = pair_distances.len() * 2;
        let mut data = vec![0.6; n * n];
        for i in 0..n {
            data[i * n + i] = 0.0;
        }
        for (p, d) in pair_distances.iter().enumerate() {
            let (a, b) = (2 * p, 2 * p + 1);
            data[a * n + b] = *d;
            data[b * n + a] = *d;
        }
        DistanceMatrix::from_raw(n, data)
    }

    #[test]
    fn tightening_stops_once_enough_clusters() {
        let d = Dendrogram::build(&paired(&[0.1, 0.1, 0.1, 0.4]));
        let t = tighten(&d, 0.7, 0.05, &params(1000));
        assert_eq!(t.iterations, 1);
        assert_eq!(t.clusters, 4);
        assert!(!t.exhausted);
        assert!((t.threshold - 0.505).abs() < 1e-12);
    }

    #[test]
    fn tightening_exhaustion_is_flagged() {
        // Three tight pairs can never make four clusters above 0.1.
        let d = Dendrogram::build(&paired(&[0.1, 0.1, 0.1]));
        let t = tighten(&d, 0.7, 0.05, &params(1000));
        assert_eq!(t.iterations, 5);
        assert_eq!(t.clusters, 3);
        assert!(t.exhausted);
        assert!(t.threshold > 0.1);
    }

    #[test]
    fn tightening_stops_at_floor() {
        let d = Dendrogram::build(&paired(&[0.1, 0.1, 0.1]));
        let t = tighten(&d, 0.2, 0.2, &params(1000));
        assert_eq!(t.iterations, 0);
        assert!(t.exhausted);
    }

    #[test]
    fn small_inputs_are_never_under_clustered() {
        let d = Dendrogram::build(&paired(&[0.1]));
        let t = tighten(&d, 0.7, 0.05, &params(1000));
        assert!(!t.exhausted);
    }

    #[test]
    fn fixed_threshold_skips_discovery() {
        let tasks: Vec<Task> = (0..5)
            .map(|i| {
                let mut e = vec![0.0; 5];
                e[i as usize] = 1.0;
                task(i, e, 100)
            })
            .collect();
        let refs: Vec<&Task> = tasks.iter().collect();
        let p = HierarchicalParams {
            threshold: Some(0.5),
            ..params(250)
        };
        let run = hierarchical_cluster(&refs, &p);
        assert_eq!(run.source, ThresholdSource::Fixed);
        assert!(run.k_distance.is_none());
        assert_eq!(run.groups.len(), 5);
        assert_eq!(run.tightening.iterations, 0);
    }

    #[test]
    fn oversized_clusters_are_split() {
        // Two topics of four tasks; everything merges at threshold 10.
        let tasks: Vec<Task> = (0..8)
            .map(|i| {
                let e = if i < 4 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                task(i, e, 100)
            })
            .collect();
        let refs: Vec<&Task> = tasks.iter().collect();
        let p = HierarchicalParams {
            sequence_weight: 0.0,
            threshold: Some(10.0),
            ..params(400)
        };
        let run = hierarchical_cluster(&refs, &p);
        assert_eq!(run.groups, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
        assert_eq!(run.split.deepest_level, 1);
    }

    #[test]
    fn discovered_threshold_reports_distribution() {
        let tasks: Vec<Task> = (0..12)
            .map(|i| {
                let angle = i as f32 * 0.25;
                task(i, vec![angle.cos(), angle.sin()], 10)
            })
            .collect();
        let refs: Vec<&Task> = tasks.iter().collect();
        let run = hierarchical_cluster(&refs, &params(10_000));
        let kd = run.k_distance.unwrap();
        assert!(kd.threshold >= kd.floor && kd.threshold <= kd.ceiling);
        assert!(run.threshold <= kd.threshold);
        assert_eq!(run.distances.count, 12 * 11 / 2);
        let covered: usize = run.groups.iter().map(Vec::len).sum();
        assert_eq!(covered, 12);
    }
}
