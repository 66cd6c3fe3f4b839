use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::fragment::FragmentId;
use crate::utils::lock;

/// Receives figures about every graph the executor runs.
pub trait StatisticsGatherer: Send + Sync {
    /// Called once per execution, after partitioning.
    fn graph_processed(&self, calc_config: &str, fragments: usize, mean_size: f64, mean_cost: f64);

    /// Called when a graph completes successfully.
    fn graph_executed(&self, calc_config: &str, nodes: usize, elapsed: Duration) {
        let _ = (calc_config, nodes, elapsed);
    }
}

/// Logs the figures.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatistics;

impl StatisticsGatherer for TracingStatistics {
    fn graph_processed(&self, calc_config: &str, fragments: usize, mean_size: f64, mean_cost: f64) {
        tracing::info!(
            calc_config,
            fragments,
            "partitioned into {} fragments, {:.1} nodes and cost {:.1} on average",
            fragments,
            mean_size,
            mean_cost
        );
    }

    fn graph_executed(&self, calc_config: &str, nodes: usize, elapsed: Duration) {
        tracing::info!(calc_config, nodes, "executed {} nodes in {:?}", nodes, elapsed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphProcessed {
    pub calc_config: String,
    pub fragments: usize,
    pub mean_size: f64,
    pub mean_cost: f64,
}

/// Keeps the figures in memory.
#[derive(Debug, Default)]
pub struct RecordingStatistics {
    processed: Mutex<Vec<GraphProcessed>>,
    executed: Mutex<Vec<(String, usize)>>,
}

impl RecordingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> Vec<GraphProcessed> {
        lock(&self.processed).clone()
    }

    /// Configuration and node count of every graph that completed.
    pub fn executed(&self) -> Vec<(String, usize)> {
        lock(&self.executed).clone()
    }
}

impl StatisticsGatherer for RecordingStatistics {
    fn graph_processed(&self, calc_config: &str, fragments: usize, mean_size: f64, mean_cost: f64) {
        lock(&self.processed).push(GraphProcessed {
            calc_config: calc_config.to_string(),
            fragments,
            mean_size,
            mean_cost,
        });
    }

    fn graph_executed(&self, calc_config: &str, nodes: usize, _: Duration) {
        lock(&self.executed).push((calc_config.to_string(), nodes));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Wall clock timings of the jobs of one execution.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub execution_times: HashMap<FragmentId, JobExecution>,
}

impl Diagnostics {
    /// Plain text waterfall, one row per job in dispatch order.
    pub fn render_waterfall(&self) -> String {
        const WIDTH: f64 = 40.0;

        let mut jobs = self.execution_times.iter().collect::<Vec<_>>();
        let Some(first) = jobs.iter().map(|(_, job)| job.start).min() else {
            return String::from("No jobs ran\n");
        };
        jobs.sort_by_key(|(id, job)| (job.start, **id));

        let end = jobs
            .iter()
            .map(|(_, job)| job.start + job.duration)
            .max()
            .unwrap_or(first);
        let total = end.duration_since(first).as_micros().max(1) as f64;

        let mut output = String::new();
        for (id, job) in jobs {
            let offset = job.start.duration_since(first).as_micros() as f64 / total;
            let length = job.duration.as_micros() as f64 / total;

            let lead = (offset * WIDTH).round() as usize;
            let bar = ((length * WIDTH).round() as usize).max(1);

            let _ = writeln!(
                output,
                "{:>6} |{}{}| {:?}",
                id.to_string(),
                " ".repeat(lead),
                "=".repeat(bar),
                job.duration
            );
        }

        output
    }
}
