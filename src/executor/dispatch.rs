use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context as _, anyhow};
use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, Dynamic};
use crate::error::JobError;
use crate::executor::Execution;
use crate::fragment::FragmentId;
use crate::graph::{DependencyGraph, DependencyNode};

static JOB_IDS: AtomicU64 = AtomicU64::new(1);

/// Identifies one dispatched job. Ids are unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobSpecification {
    pub calc_config: ArcStr,
    pub job_id: u64,
}

impl JobSpecification {
    pub(crate) fn next(calc_config: ArcStr) -> Self {
        Self {
            calc_config,
            job_id: JOB_IDS.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for JobSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} ({})", self.job_id, self.calc_config)
    }
}

/// Everything a worker needs to run one fragment.
#[derive(Debug)]
pub struct CalculationJob {
    pub spec: JobSpecification,
    pub fragment: FragmentId,
    pub graph: Arc<DependencyGraph>,
    /// Nodes to invoke, in order.
    pub nodes: Vec<NodeIndex>,
    /// Outputs of nodes outside the fragment that its nodes consume.
    pub inputs: Vec<(NodeIndex, Dynamic)>,
    /// Fragments expected to follow this one on the same worker. Only a
    /// hint: each of them is still dispatched on its own once ready.
    pub tails: Vec<FragmentId>,
    pub colour: usize,
    pub cost: u64,
}

/// Values produced by a successful job, keyed by the node producing them.
#[derive(Debug, Default)]
pub struct JobResult {
    outputs: Vec<(NodeIndex, Dynamic)>,
}

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: NodeIndex, value: Dynamic) {
        self.outputs.push((node, value));
    }

    pub fn with(mut self, node: NodeIndex, value: Dynamic) -> Self {
        self.push(node, value);
        self
    }

    pub fn outputs(&self) -> &[(NodeIndex, Dynamic)] {
        &self.outputs
    }

    pub(crate) fn into_outputs(self) -> Vec<(NodeIndex, Dynamic)> {
        self.outputs
    }
}

/// Runs jobs somewhere and reports back through the receiver.
pub trait Dispatcher: Send + Sync {
    /// Must not block on the job. `receiver` is consumed by reporting the
    /// outcome; dropping it unused counts as a failure.
    fn dispatch(&self, job: CalculationJob, receiver: JobResultReceiver);
}

/// Reports the outcome of exactly one job.
pub struct JobResultReceiver {
    execution: Option<Arc<Execution>>,
    fragment: FragmentId,
}

impl JobResultReceiver {
    pub(crate) fn new(execution: Arc<Execution>, fragment: FragmentId) -> Self {
        Self {
            execution: Some(execution),
            fragment,
        }
    }

    pub fn fragment(&self) -> FragmentId {
        self.fragment
    }

    pub fn succeeded(mut self, result: JobResult) {
        if let Some(execution) = self.execution.take() {
            execution.fragment_completed(self.fragment, result);
        }
    }

    pub fn failed(mut self, error: impl Into<JobError>) {
        if let Some(execution) = self.execution.take() {
            execution.fragment_failed(self.fragment, error.into());
        }
    }
}

impl Drop for JobResultReceiver {
    fn drop(&mut self) {
        if let Some(execution) = self.execution.take() {
            let error = anyhow!("job for fragment {} dropped without a result", self.fragment);
            execution.fragment_failed(self.fragment, error.into());
        }
    }
}

impl fmt::Debug for JobResultReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobResultReceiver")
            .field("fragment", &self.fragment)
            .field("pending", &self.execution.is_some())
            .finish()
    }
}

/// Computes the value of a single node.
pub trait NodeInvoker: Send + Sync {
    /// `inputs` holds the outputs of the node's inputs, ordered by node index.
    fn invoke(&self, node: &DependencyNode, inputs: &[Dynamic]) -> anyhow::Result<Dynamic>;
}

impl<F> NodeInvoker for F
where
    F: Fn(&DependencyNode, &[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync,
{
    fn invoke(&self, node: &DependencyNode, inputs: &[Dynamic]) -> anyhow::Result<Dynamic> {
        self(node, inputs)
    }
}

/// Runs jobs in process on a rayon thread pool.
pub struct LocalDispatcher {
    invoker: Arc<dyn NodeInvoker>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl LocalDispatcher {
    /// Uses the global rayon pool.
    pub fn new(invoker: impl NodeInvoker + 'static) -> Self {
        Self {
            invoker: Arc::new(invoker),
            pool: None,
        }
    }

    pub fn with_threads(
        invoker: impl NodeInvoker + 'static,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("calcgraph-worker-{i}"))
            .build()?;

        Ok(Self {
            invoker: Arc::new(invoker),
            pool: Some(Arc::new(pool)),
        })
    }
}

impl Dispatcher for LocalDispatcher {
    fn dispatch(&self, job: CalculationJob, receiver: JobResultReceiver) {
        let invoker = self.invoker.clone();
        let work = move || run_job(invoker.as_ref(), job, receiver);

        match &self.pool {
            Some(pool) => pool.spawn(work),
            None => rayon::spawn(work),
        }
    }
}

fn run_job(invoker: &dyn NodeInvoker, job: CalculationJob, receiver: JobResultReceiver) {
    let span = tracing::debug_span!("job", id = job.spec.job_id, fragment = %job.fragment);
    let _enter = span.enter();

    // Invokers only see shared references to the job, a panic cannot leave
    // anything half-updated.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        invoke_nodes(invoker, &job)
    }));

    match result {
        Ok(Ok(result)) => receiver.succeeded(result),
        Ok(Err(error)) => receiver.failed(error),
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Job panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Job panicked: {s}")
            } else {
                String::from("Job panicked with unknown payload")
            };

            receiver.failed(anyhow!(msg));
        }
    }
}

fn invoke_nodes(invoker: &dyn NodeInvoker, job: &CalculationJob) -> anyhow::Result<JobResult> {
    let mut values: HashMap<NodeIndex, Dynamic> = job.inputs.iter().cloned().collect();
    let mut result = JobResult::new();

    for &index in &job.nodes {
        let node = job.graph.node(index);

        let mut input_nodes = job.graph.input_nodes(index).collect::<Vec<_>>();
        input_nodes.sort();

        let inputs = input_nodes
            .into_iter()
            .map(|input| {
                values
                    .get(&input)
                    .cloned()
                    .ok_or_else(|| anyhow!("Missing value of {} for {}", job.graph.node(input), node))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let output = invoker
            .invoke(node, &inputs)
            .with_context(|| format!("Failed to execute {node}"))?;

        values.insert(index, output.clone());
        result.push(index, output);
    }

    Ok(result)
}
