//! Dense pairwise distance matrix with a sequence-position penalty.
//!
//! Row/column `i` is the `i`-th task in chronological order. Entries are
//! `cosine_distance(i, j) + sequence_weight * |i - j| / (n - 1)`, so tasks
//! far apart in time look further apart than their embeddings alone say.
//! Storage is a full `n * n` buffer: O(n²) memory.

use taskweave_core::Task;

use crate::distance::cosine_distance;

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Build from tasks already sorted chronologically.
    pub fn from_tasks(tasks: &[&Task], sequence_weight: f64) -> Self {
        let n = tasks.len();
        let mut data = vec![0.0; n * n];
        let span = n.saturating_sub(1).max(1) as f64;

        for i in 0..n {
            for j in (i + 1)..n {
                let penalty = sequence_weight * ((j - i) as f64 / span);
                let d = cosine_distance(tasks[i].embedding(), tasks[j].embedding()) + penalty;
                data[i * n + j] = d;
                data[j * n + i] = d;
            }
        }

        Self { n, data }
    }

    /// Build directly from a symmetric row-major buffer.
    pub fn from_raw(n: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), n * n);
        Self { n, data }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// Upper-triangle values: every unordered pair once.
    pub fn pairwise_values(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.n * self.n.saturating_sub(1) / 2);
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                values.push(self.get(i, j));
            }
        }
        values
    }

    /// The matrix restricted to `indices` (in the given order).
    pub fn submatrix(&self, indices: &[usize]) -> DistanceMatrix {
        let m = indices.len();
        let mut data = Vec::with_capacity(m * m);
        for &i in indices {
            for &j in indices {
                data.push(self.get(i, j));
            }
        }
        DistanceMatrix { n: m, data }
    }
}
