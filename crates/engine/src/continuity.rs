//! How chronologically contiguous each group is.
//!
//! Members are placed at their positions in the global chronological order.
//! A run is a maximal stretch of members at consecutive positions (gap 1);
//! the continuity ratio is the share of members that sit inside a run of two
//! or more. Sequential partitions score 1.0 everywhere.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskweave_core::{Partition, TaskId};

pub const HIGH_CONTINUITY: f64 = 0.8;
pub const MODERATE_CONTINUITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupContinuity {
    pub group_id: usize,
    pub task_count: usize,
    pub min_gap: usize,
    pub avg_gap: f64,
    pub max_gap: usize,
    /// Lengths of runs with at least two members.
    pub runs: Vec<usize>,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContinuityReport {
    /// Groups with two or more placed members, least continuous first.
    pub groups: Vec<GroupContinuity>,
    pub avg_ratio: f64,
    pub avg_gap: f64,
    pub high: usize,
    pub moderate: usize,
    pub low: usize,
}

impl ContinuityReport {
    /// `order` is every task id in global chronological order. Members not
    /// found in it are ignored.
    pub fn analyze(partition: &Partition, order: &[TaskId]) -> Self {
        let position: HashMap<TaskId, usize> =
            order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();

        let mut groups: Vec<GroupContinuity> = partition
            .groups
            .iter()
            .filter_map(|g| {
                let mut positions: Vec<usize> =
                    g.task_ids.iter().filter_map(|id| position.get(id).copied()).collect();
                if positions.len() < 2 {
                    return None;
                }
                positions.sort_unstable();
                Some(group_continuity(g.id, &positions))
            })
            .collect();
        groups.sort_by(|a, b| a.ratio.total_cmp(&b.ratio).then(a.group_id.cmp(&b.group_id)));

        if groups.is_empty() {
            return Self::default();
        }

        let count = groups.len() as f64;
        let avg_ratio = groups.iter().map(|g| g.ratio).sum::<f64>() / count;
        let avg_gap = groups.iter().map(|g| g.avg_gap).sum::<f64>() / count;
        let high = groups.iter().filter(|g| g.ratio >= HIGH_CONTINUITY).count();
        let moderate = groups
            .iter()
            .filter(|g| g.ratio >= MODERATE_CONTINUITY && g.ratio < HIGH_CONTINUITY)
            .count();
        let low = groups.iter().filter(|g| g.ratio < MODERATE_CONTINUITY).count();

        Self {
            groups,
            avg_ratio,
            avg_gap,
            high,
            moderate,
            low,
        }
    }
}

fn group_continuity(group_id: usize, positions: &[usize]) -> GroupContinuity {
    let gaps: Vec<usize> = positions.windows(2).map(|w| w[1] - w[0]).collect();

    let mut runs = Vec::new();
    let mut current = 1;
    for gap in &gaps {
        if *gap == 1 {
            current += 1;
        } else {
            if current > 1 {
                runs.push(current);
            }
            current = 1;
        }
    }
    if current > 1 {
        runs.push(current);
    }

    let in_runs: usize = runs.iter().sum();
    GroupContinuity {
        group_id,
        task_count: positions.len(),
        min_gap: gaps.iter().copied().min().unwrap_or(0),
        avg_gap: gaps.iter().sum::<usize>() as f64 / gaps.len().max(1) as f64,
        max_gap: gaps.iter().copied().max().unwrap_or(0),
        runs,
        ratio: in_runs as f64 / positions.len() as f64,
    }
}
