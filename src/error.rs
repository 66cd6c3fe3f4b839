use std::sync::Arc;

use petgraph::graph::NodeIndex;
use thiserror::Error;

use crate::fragment::FragmentId;

/// A failure reported by whatever ran a job. Shared, because one worker
/// failure is reported against every fragment it transitively poisons.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct JobError(#[from] pub(crate) Arc<anyhow::Error>);

impl JobError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError(Arc::new(e))
    }
}

#[derive(Debug, Error, Clone)]
pub enum ExecutionError {
    #[error("Fragment {fragment} ({} nodes) failed, {} nodes not executed:\n{cause}", .nodes.len(), .failed.len())]
    Fragment {
        fragment: FragmentId,
        /// Nodes of the fragment the failure was reported for.
        nodes: Vec<NodeIndex>,
        /// Every node that will not be executed because of this failure,
        /// including `nodes`.
        failed: Vec<NodeIndex>,
        cause: JobError,
    },

    #[error("Execution was dropped before the graph completed")]
    Abandoned,

    #[error("Cycle detected in dependency graph at node {0:?}")]
    Cycle(NodeIndex),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_job_items ({min}) exceeds max_job_items ({max})")]
    JobItems { min: usize, max: usize },

    #[error("min_job_cost ({min}) exceeds max_job_cost ({max})")]
    JobCost { min: u64, max: u64 },

    #[error("max_concurrency must be at least 1")]
    Concurrency,
}
