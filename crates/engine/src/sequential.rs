//! Sequential clustering: one left-to-right pass over chronological tasks.
//!
//! The open group absorbs the next task when its distance to the group's
//! last member is within the threshold and the budget still has room. The
//! soft-overflow rule lets a group that is still below `min_cluster_size`
//! take a task past the budget. Nothing bounds that overage: one large task
//! can push a small group arbitrarily far over `max_cluster_size`. The
//! overage shows up in the oversized report.

use taskweave_core::Task;
use tracing::debug;

use crate::distance::cosine_distance;

/// Size limits for the sequential pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_cluster_size: u64,
    pub min_cluster_size: Option<u64>,
}

/// Group chronologically sorted tasks. Returns runs of positions into `tasks`.
pub fn sequential_cluster(tasks: &[&Task], threshold: f64, limits: SizeLimits) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size: u64 = 0;

    for (pos, task) in tasks.iter().enumerate() {
        let size = task.size();

        let merge = match current.last() {
            None => true,
            Some(&last) => {
                let distance = cosine_distance(task.embedding(), tasks[last].embedding());
                if distance > threshold {
                    false
                } else if current_size.saturating_add(size) <= limits.max_cluster_size {
                    true
                } else {
                    limits.min_cluster_size.is_some_and(|min| current_size < min)
                }
            }
        };

        if merge {
            current.push(pos);
            current_size = current_size.saturating_add(size);
        } else {
            debug!(
                group = groups.len(),
                tasks = current.len(),
                size = current_size,
                "Closing sequential group"
            );
            groups.push(std::mem::take(&mut current));
            current.push(pos);
            current_size = size;
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }

    groups
}
