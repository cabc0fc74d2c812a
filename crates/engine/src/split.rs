//! Size-based splitting of over-budget clusters.
//!
//! A cluster over budget is cut with seeded k-means, using its rows of the
//! distance matrix as feature vectors, for a few candidate counts starting
//! at `max(2, ceil(aggregate / (max / 2)))`. The candidate whose largest
//! sub-cluster is smallest wins, and the search stops as soon as one fits.
//! Sub-clusters still over budget recurse with `depth + 1`.
//!
//! Termination: when k-means cannot produce two non-empty sub-clusters the
//! cluster is bisected chronologically at its size midpoint, so every level
//! shrinks membership; at `max_depth` the rest is packed greedily.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use taskweave_core::Task;
use tracing::debug;

use crate::matrix::DistanceMatrix;

/// Number of k values tried per split, starting at the estimate.
pub const SPLIT_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitParams {
    pub max_cluster_size: u64,
    pub max_depth: usize,
    pub seed: u64,
    pub kmeans_iterations: usize,
}

/// Counters collected while splitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Deepest split level reached (1 = the first split of a cluster).
    pub deepest_level: usize,
    /// Chronological bisections and depth-limit packings.
    pub forced_fallbacks: usize,
}

/// Split one cluster until every piece fits or is a single task.
///
/// `members` are positions in chronological order (indices into `tasks`
/// and `matrix`). Pieces are sorted ascending and ordered by first member.
pub fn split_cluster(
    members: Vec<usize>,
    tasks: &[&Task],
    matrix: &DistanceMatrix,
    params: &SplitParams,
    stats: &mut SplitStats,
) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    split_recursive(members, 0, tasks, matrix, params, stats, &mut out);
    out.sort_by_key(|piece| piece.first().copied());
    out
}

fn aggregate(members: &[usize], tasks: &[&Task]) -> u64 {
    members.iter().map(|&i| tasks[i].size()).sum()
}

fn split_recursive(
    mut members: Vec<usize>,
    depth: usize,
    tasks: &[&Task],
    matrix: &DistanceMatrix,
    params: &SplitParams,
    stats: &mut SplitStats,
    out: &mut Vec<Vec<usize>>,
) {
    members.sort_unstable();
    let total = aggregate(&members, tasks);
    if total <= params.max_cluster_size || members.len() <= 1 {
        out.push(members);
        return;
    }

    stats.deepest_level = stats.deepest_level.max(depth + 1);

    if depth >= params.max_depth {
        debug!(depth, tasks = members.len(), size = total, "Split depth limit, packing greedily");
        stats.forced_fallbacks += 1;
        out.extend(greedy_pack(&members, tasks, params.max_cluster_size));
        return;
    }

    let pieces = match best_kmeans_split(&members, tasks, matrix, params, total) {
        Some(pieces) => pieces,
        None => {
            debug!(depth, tasks = members.len(), "k-means degenerate, bisecting chronologically");
            stats.forced_fallbacks += 1;
            chronological_bisect(&members, tasks, total)
        }
    };

    for piece in pieces {
        split_recursive(piece, depth + 1, tasks, matrix, params, stats, out);
    }
}

/// Estimated sub-cluster count: `max(2, ceil(total / (max / 2)))`, capped at
/// the member count.
pub fn target_split_count(total: u64, max_cluster_size: u64, members: usize) -> usize {
    if max_cluster_size == 0 {
        return members;
    }
    let half = max_cluster_size as f64 * 0.5;
    let estimate = (total as f64 / half).ceil() as usize;
    estimate.max(2).min(members)
}

fn best_kmeans_split(
    members: &[usize],
    tasks: &[&Task],
    matrix: &DistanceMatrix,
    params: &SplitParams,
    total: u64,
) -> Option<Vec<Vec<usize>>> {
    let sub = matrix.submatrix(members);
    let target = target_split_count(total, params.max_cluster_size, members.len());
    let mut best: Option<(u64, Vec<Vec<usize>>)> = None;

    for k in target..(target + SPLIT_CANDIDATES).min(members.len() + 1) {
        let labels = kmeans(&sub, k, params.seed, params.kmeans_iterations);
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (local, label) in labels.into_iter().enumerate() {
            buckets[label].push(members[local]);
        }
        buckets.retain(|b| !b.is_empty());
        if buckets.len() < 2 {
            continue;
        }

        let worst = buckets.iter().map(|b| aggregate(b, tasks)).max().unwrap_or(0);
        debug!(k, pieces = buckets.len(), worst, "k-means candidate");
        if best.as_ref().is_none_or(|(w, _)| worst < *w) {
            best = Some((worst, buckets));
        }
        if worst <= params.max_cluster_size {
            break;
        }
    }

    best.map(|(_, pieces)| pieces)
}

/// Cut at the first position where the running size reaches half the total.
fn chronological_bisect(members: &[usize], tasks: &[&Task], total: u64) -> Vec<Vec<usize>> {
    let half = total.div_ceil(2);
    let mut running = 0u64;
    let mut cut = members.len() - 1;
    for (pos, &i) in members.iter().enumerate() {
        running += tasks[i].size();
        if running >= half {
            cut = pos + 1;
            break;
        }
    }
    let cut = cut.clamp(1, members.len() - 1);
    vec![members[..cut].to_vec(), members[cut..].to_vec()]
}

/// Chronological runs no larger than the budget; oversize tasks stand alone.
pub fn greedy_pack(members: &[usize], tasks: &[&Task], max_cluster_size: u64) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = 0u64;

    for &i in members {
        let size = tasks[i].size();
        if !current.is_empty() && current_size.saturating_add(size) > max_cluster_size {
            runs.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(i);
        current_size = current_size.saturating_add(size);
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Seeded k-means over the rows of `matrix`. Returns one label per row in
/// `0..k`; some labels may be unused.
pub fn kmeans(matrix: &DistanceMatrix, k: usize, seed: u64, iterations: usize) -> Vec<usize> {
    let n = matrix.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let k = k.min(n);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // k-means++ seeding.
    let mut centers: Vec<Vec<f64>> = Vec::with_capacity(k);
    centers.push(matrix.row(rng.random_range(0..n)).to_vec());
    while centers.len() < k {
        let weights: Vec<f64> = (0..n)
            .map(|i| {
                centers
                    .iter()
                    .map(|c| squared_euclidean(matrix.row(i), c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // Every row coincides with a center already.
            break;
        }
        let mut target = rng.random::<f64>() * total;
        let mut chosen = n - 1;
        for (i, w) in weights.iter().enumerate() {
            if target < *w {
                chosen = i;
                break;
            }
            target -= w;
        }
        centers.push(matrix.row(chosen).to_vec());
    }

    let mut labels = vec![0usize; n];
    for iteration in 0..iterations.max(1) {
        let mut changed = false;
        for (i, label) in labels.iter_mut().enumerate() {
            let row = matrix.row(i);
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let d = squared_euclidean(row, center);
                if d < best_d {
                    best = c;
                    best_d = d;
                }
            }
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed && iteration > 0 {
            break;
        }

        // Recompute centroids; an empty cluster keeps its previous center.
        let mut sums = vec![vec![0.0; n]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for (i, &label) in labels.iter().enumerate() {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(matrix.row(i)) {
                *s += v;
            }
        }
        for (c, center) in centers.iter_mut().enumerate() {
            if counts[c] > 0 {
                let count = counts[c] as f64;
                for (x, s) in center.iter_mut().zip(&sums[c]) {
                    *x = s / count;
                }
            }
        }
    }

    labels
}
