//! Average-linkage dendrogram over a precomputed distance matrix.
//!
//! Built once with the nearest-neighbour-chain algorithm and Lance–Williams
//! updates, then cut at any threshold with a union-find over the merges whose
//! height is at or below it. Average linkage is reducible, so the chain finds
//! the same merges as greedy closest-pair merging (in a different order), and
//! the merges below a threshold are closed under "child of". Merges at exactly
//! equal heights may pair up differently than greedy closest-pair merging
//! would, so a cut through tied heights can group those points differently.

use crate::matrix::DistanceMatrix;

/// One merge: clusters represented by points `a` and `b` joined at `height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub a: usize,
    pub b: usize,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct Dendrogram {
    n: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn build(matrix: &DistanceMatrix) -> Self {
        let n = matrix.len();
        if n < 2 {
            return Self {
                n,
                merges: Vec::new(),
            };
        }

        // Working copy updated in place; row/column of a retired cluster is dead.
        let mut dist: Vec<f64> = (0..n).flat_map(|i| matrix.row(i).to_vec()).collect();
        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut remaining = n;
        let mut chain: Vec<usize> = Vec::with_capacity(n);
        let mut merges = Vec::with_capacity(n - 1);

        while remaining > 1 {
            if chain.is_empty() {
                // Lowest active index keeps the walk deterministic.
                if let Some(start) = active.iter().position(|a| *a) {
                    chain.push(start);
                }
            }
            let Some(&top) = chain.last() else { break };
            let prev = chain.len().checked_sub(2).map(|i| chain[i]);

            // Nearest active neighbour; ties go to the previous chain element
            // so the chain cannot cycle, then to the lower index.
            let mut best: Option<(usize, f64)> = None;
            for other in 0..n {
                if other == top || !active[other] {
                    continue;
                }
                let d = dist[top * n + other];
                let better = match best {
                    None => true,
                    Some((_, bd)) => d < bd || (d == bd && Some(other) == prev),
                };
                if better {
                    best = Some((other, d));
                }
            }
            let Some((nearest, height)) = best else { break };

            if Some(nearest) == prev {
                chain.pop();
                chain.pop();

                // `nearest` survives and represents the union.
                let (retired, kept) = (top, nearest);
                let (sr, sk) = (size[retired] as f64, size[kept] as f64);
                for k in 0..n {
                    if !active[k] || k == retired || k == kept {
                        continue;
                    }
                    let d = (sr * dist[k * n + retired] + sk * dist[k * n + kept]) / (sr + sk);
                    dist[k * n + kept] = d;
                    dist[kept * n + k] = d;
                }
                size[kept] += size[retired];
                active[retired] = false;
                remaining -= 1;

                merges.push(Merge {
                    a: retired,
                    b: kept,
                    height,
                });
            } else {
                chain.push(nearest);
            }
        }

        Self { n, merges }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Flat clusters from every merge with `height <= threshold`.
    ///
    /// Members ascend within a cluster; clusters are ordered by their
    /// smallest member.
    pub fn cut(&self, threshold: f64) -> Vec<Vec<usize>> {
        let mut sets = DisjointSet::new(self.n);
        for merge in &self.merges {
            if merge.height <= threshold {
                sets.union(merge.a, merge.b);
            }
        }

        let mut slot_of_root = vec![usize::MAX; self.n];
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for i in 0..self.n {
            let root = sets.find(i);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = clusters.len();
                clusters.push(Vec::new());
            }
            clusters[slot_of_root[root]].push(i);
        }
        clusters
    }

    pub fn cluster_count(&self, threshold: f64) -> usize {
        let merged = self.merges.iter().filter(|m| m.height <= threshold).count();
        self.n - merged
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n: usize, pairs: &[(usize, usize, f64)]) -> DistanceMatrix {
        let mut data = vec![0.0; n * n];
        for &(i, j, d) in pairs {
            data[i * n + j] = d;
            data[j * n + i] = d;
        }
        DistanceMatrix::from_raw(n, data)
    }

    /// Two tight pairs far from each other.
    fn two_pairs() -> DistanceMatrix {
        matrix(
            4,
            &[
                (0, 1, 0.1),
                (2, 3, 0.2),
                (0, 2, 0.9),
                (0, 3, 0.8),
                (1, 2, 0.7),
                (1, 3, 0.6),
            ],
        )
    }

    #[test]
    fn builds_n_minus_one_merges() {
        let d = Dendrogram::build(&two_pairs());
        assert_eq!(d.merges().len(), 3);
    }

    #[test]
    fn merge_heights_use_average_linkage() {
        let d = Dendrogram::build(&two_pairs());
        let mut heights: Vec<f64> = d.merges().iter().map(|m| m.height).collect();
        heights.sort_by(f64::total_cmp);
        assert!((heights[0] - 0.1).abs() < 1e-12);
        assert!((heights[1] - 0.2).abs() < 1e-12);
        // Mean of the four cross distances.
        assert!((heights[2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn cut_between_levels() {
        let d = Dendrogram::build(&two_pairs());
        assert_eq!(d.cut(0.0), vec![vec![0], vec![1], vec![2], vec![3]]);
        assert_eq!(d.cut(0.15), vec![vec![0, 1], vec![2], vec![3]]);
        assert_eq!(d.cut(0.5), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(d.cut(0.75), vec![vec![0, 1, 2, 3]]);
        assert_eq!(d.cluster_count(0.5), 2);
    }

    #[test]
    fn average_not_single_linkage() {
        // Point 2 is close to 1 but far from 0: single linkage would join at
        // 0.3, average linkage only at (0.9 + 0.3) / 2.
        let m = matrix(3, &[(0, 1, 0.1), (1, 2, 0.3), (0, 2, 0.9)]);
        let d = Dendrogram::build(&m);
        assert_eq!(d.cut(0.4), vec![vec![0, 1], vec![2]]);
        assert_eq!(d.cut(0.6), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn equal_distances_terminate() {
        let n = 6;
        let mut data = vec![0.5; n * n];
        for i in 0..n {
            data[i * n + i] = 0.0;
        }
        let d = Dendrogram::build(&DistanceMatrix::from_raw(n, data));
        assert_eq!(d.merges().len(), n - 1);
        assert_eq!(d.cut(0.5).len(), 1);
        assert_eq!(d.cut(0.4).len(), n);
    }

    #[test]
    fn trivial_sizes() {
        let d = Dendrogram::build(&DistanceMatrix::from_raw(0, vec![]));
        assert!(d.cut(1.0).is_empty());
        let d = Dendrogram::build(&DistanceMatrix::from_raw(1, vec![0.0]));
        assert_eq!(d.cut(1.0), vec![vec![0]]);
    }
}
