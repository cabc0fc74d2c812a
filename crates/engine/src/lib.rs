//! # Taskweave Engine
//!
//! Partitions chronologically ordered, embedded tasks into groups that fit a
//! size budget while keeping related work together.
//!
//! Two strategies:
//! - **Sequential**: one O(n) pass merging chronologically adjacent tasks
//!   while they are within a percentile-derived distance threshold and the
//!   budget has room.
//! - **Hierarchical**: average-linkage clustering over a sequence-adjusted
//!   distance matrix, cut at a k-distance-graph threshold (tightened if it
//!   yields too few clusters), then recursive k-means splitting of any group
//!   over budget.
//!
//! The crate is synchronous and does no I/O. Persistence goes through
//! [`taskweave_core::PartitionStore`].

pub mod continuity;
pub mod dendrogram;
pub mod distance;
pub mod engine;
pub mod hierarchical;
pub mod matrix;
pub mod report;
pub mod sequential;
pub mod split;
pub mod threshold;
pub mod validator;

pub use continuity::{ContinuityReport, GroupContinuity};
pub use distance::{MAX_DISTANCE, cosine_distance, cosine_similarity};
pub use engine::{
    ClusterEngine, ClusterOutcome, DEFAULT_MAX_CLUSTER_SIZE, Diagnostics, EngineConfig,
    ThresholdSummary,
};
pub use report::{OversizedGroup, PartitionStats};
pub use threshold::{DEFAULT_THRESHOLD, DistanceSummary, ThresholdSource};
pub use validator::{RecomputeReason, ValidationReport, Verdict, validate, validate_stored};
