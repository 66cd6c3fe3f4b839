use serde::Deserialize;

use crate::error::ConfigError;

/// Sizing policy used when splitting a dependency graph into jobs.
///
/// Fragments below both minimums are candidates for merging, and no merge may
/// produce a fragment above either maximum. `max_concurrency` bounds how many
/// fragments of one colour (tail chain) may be active at the same simulated
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub min_job_items: usize,
    pub max_job_items: usize,
    pub min_job_cost: u64,
    pub max_job_cost: u64,
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_job_items: 1,
            max_job_items: usize::MAX,
            min_job_cost: 1,
            max_job_cost: u64::MAX,
            max_concurrency: usize::MAX,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_items(mut self, min: usize, max: usize) -> Self {
        self.min_job_items = min;
        self.max_job_items = max;
        self
    }

    pub fn with_job_cost(mut self, min: u64, max: u64) -> Self {
        self.min_job_cost = min;
        self.max_job_cost = max;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_job_items > self.max_job_items {
            return Err(ConfigError::JobItems {
                min: self.min_job_items,
                max: self.max_job_items,
            });
        }

        if self.min_job_cost > self.max_job_cost {
            return Err(ConfigError::JobCost {
                min: self.min_job_cost,
                max: self.max_job_cost,
            });
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }

        Ok(())
    }

    /// Whether a fragment of this size already meets the minimum job size.
    pub(crate) fn is_big_enough(&self, items: usize, cost: u64) -> bool {
        cost >= self.min_job_cost && items >= self.min_job_items
    }

    /// Whether a fragment of this size is allowed to exist as a merge result.
    pub(crate) fn fits(&self, items: usize, cost: u64) -> bool {
        items <= self.max_job_items && cost <= self.max_job_cost
    }
}
