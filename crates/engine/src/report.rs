//! Summary statistics over a partition and their markdown rendering.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use taskweave_core::Partition;

/// How many oversized groups the markdown report lists.
const OVERSIZED_SHOWN: usize = 5;

/// A group over budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversizedGroup {
    pub group_id: usize,
    pub task_count: usize,
    pub size: u64,
    /// Characters over `max_cluster_size`.
    pub overage: u64,
}

impl OversizedGroup {
    /// A single task that alone exceeds the budget.
    pub fn is_unsplittable(&self) -> bool {
        self.task_count == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub group_count: usize,
    pub task_count: usize,
    pub max_cluster_size: u64,
    /// Group sizes in characters; groups of size zero are left out.
    pub min_size: u64,
    pub avg_size: f64,
    pub max_size: u64,
    pub min_tasks: usize,
    pub avg_tasks: f64,
    pub max_tasks: usize,
    /// Largest over smallest group size, when the smallest is non-zero.
    pub size_ratio: Option<f64>,
    /// Sorted by size, largest first.
    pub oversized: Vec<OversizedGroup>,
    pub under_clustered: bool,
}

impl PartitionStats {
    pub fn compute(partition: &Partition, max_cluster_size: u64, under_clustered: bool) -> Self {
        let sizes: Vec<u64> = partition
            .groups
            .iter()
            .map(|g| g.aggregate_size)
            .filter(|s| *s > 0)
            .collect();
        let counts: Vec<u64> = partition.groups.iter().map(|g| g.len() as u64).collect();

        let (min_size, avg_size, max_size) = min_avg_max(&sizes);
        let (min_tasks, avg_tasks, max_tasks) = min_avg_max(&counts);

        let mut oversized: Vec<OversizedGroup> = partition
            .groups
            .iter()
            .filter(|g| g.is_oversized(max_cluster_size))
            .map(|g| OversizedGroup {
                group_id: g.id,
                task_count: g.len(),
                size: g.aggregate_size,
                overage: g.aggregate_size - max_cluster_size,
            })
            .collect();
        oversized.sort_by(|a, b| b.size.cmp(&a.size).then(a.group_id.cmp(&b.group_id)));

        Self {
            group_count: partition.len(),
            task_count: partition.task_count(),
            max_cluster_size,
            min_size,
            avg_size,
            max_size,
            min_tasks: min_tasks as usize,
            avg_tasks,
            max_tasks: max_tasks as usize,
            size_ratio: (min_size > 0).then(|| max_size as f64 / min_size as f64),
            oversized,
            under_clustered,
        }
    }

    /// Oversized groups with more than one task. Splitting should leave none.
    pub fn splittable_oversized(&self) -> impl Iterator<Item = &OversizedGroup> {
        self.oversized.iter().filter(|g| !g.is_unsplittable())
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Task Clustering Report\n");
        let _ = writeln!(out, "**Total Tasks:** {}", self.task_count);
        let _ = writeln!(
            out,
            "**Effective Cluster Size Limit:** {} characters\n",
            with_commas(self.max_cluster_size)
        );

        let _ = writeln!(out, "### Clustering Statistics\n");
        let _ = writeln!(out, "| Metric | Value |");
        let _ = writeln!(out, "|--------|-------|");
        let _ = writeln!(out, "| Total Groups | {} |", self.group_count);
        let _ = writeln!(out, "| Min Tasks per Group | {} |", self.min_tasks);
        let _ = writeln!(out, "| Avg Tasks per Group | {:.1} |", self.avg_tasks);
        let _ = writeln!(out, "| Max Tasks per Group | {} |", self.max_tasks);
        let _ = writeln!(out, "| Min Group Size (chars) | {} |", with_commas(self.min_size));
        let _ = writeln!(
            out,
            "| Avg Group Size (chars) | {} |",
            with_commas(self.avg_size.round() as u64)
        );
        let _ = writeln!(out, "| Max Group Size (chars) | {} |", with_commas(self.max_size));
        if let Some(ratio) = self.size_ratio {
            let _ = writeln!(out, "| Size Ratio (max/min) | {ratio:.1}x |");
        }

        if self.under_clustered {
            let _ = writeln!(
                out,
                "\n**Note:** threshold tightening was exhausted; the partition may be under-clustered."
            );
        }

        if !self.oversized.is_empty() {
            let _ = writeln!(
                out,
                "\n**WARNING:** {} group(s) exceed the effective limit ({} chars):",
                self.oversized.len(),
                with_commas(self.max_cluster_size)
            );
            for g in self.oversized.iter().take(OVERSIZED_SHOWN) {
                let _ = writeln!(
                    out,
                    "- Group {}: {} tasks, {} chars (exceeds by {} chars)",
                    g.group_id,
                    g.task_count,
                    with_commas(g.size),
                    with_commas(g.overage)
                );
            }
            if self.oversized.len() > OVERSIZED_SHOWN {
                let _ = writeln!(
                    out,
                    "- ... and {} more oversized groups",
                    self.oversized.len() - OVERSIZED_SHOWN
                );
            }
        }
        out
    }
}

fn min_avg_max(values: &[u64]) -> (u64, f64, u64) {
    match (values.iter().min(), values.iter().max()) {
        (Some(&min), Some(&max)) => {
            let sum: f64 = values.iter().map(|v| *v as f64).sum();
            (min, sum / values.len() as f64, max)
        }
        _ => (0, 0.0, 0),
    }
}

/// `1234567` -> `"1,234,567"`.
pub fn with_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
