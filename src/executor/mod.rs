//! Runs a partitioned dependency graph through a [`Dispatcher`].
//!
//! The graph is split into fragments, every fragment without inputs is
//! dispatched straight away and the rest are dispatched as their inputs
//! complete. Completions arrive on whatever thread the dispatcher reports
//! from, so the bookkeeping is per-fragment atomics rather than a central
//! loop. The returned [`ExecutionFuture`] resolves once the root fragment
//! unblocks or any fragment fails.

mod dispatch;
mod stats;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tokio::sync::oneshot;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::ExecutorConfig;
use crate::core::{ArcStr, Dynamic};
use crate::error::{ConfigError, ExecutionError, JobError};
use crate::fragment::{FragmentId, Partition};
use crate::graph::{DependencyGraph, FunctionCost};
use crate::utils::lock;

pub use crate::executor::dispatch::{
    CalculationJob, Dispatcher, JobResult, JobResultReceiver, JobSpecification, LocalDispatcher,
    NodeInvoker,
};
pub use crate::executor::stats::{
    Diagnostics, GraphProcessed, JobExecution, RecordingStatistics, StatisticsGatherer,
    TracingStatistics,
};

type Outcome = Result<GraphResult, ExecutionError>;

/// Outputs of a successfully executed graph.
#[derive(Debug)]
pub struct GraphResult {
    pub calc_config: ArcStr,
    pub outputs: HashMap<NodeIndex, Dynamic>,
    pub diagnostics: Diagnostics,
    pub elapsed: Duration,
}

impl GraphResult {
    pub fn get<T: 'static>(&self, node: NodeIndex) -> Option<&T> {
        self.outputs.get(&node)?.downcast_ref()
    }
}

/// Resolves to the outcome of one [`GraphExecutor::execute`] call.
#[derive(Debug)]
pub struct ExecutionFuture {
    receiver: oneshot::Receiver<Outcome>,
}

impl ExecutionFuture {
    /// Blocks the current thread until the graph completes. Must not be
    /// called from within an async runtime.
    pub fn wait(mut self) -> Outcome {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ExecutionError::Abandoned))
    }

    /// The outcome, if the graph has completed.
    pub fn try_result(&mut self) -> Option<Outcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ExecutionError::Abandoned)),
        }
    }
}

impl Future for ExecutionFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(ExecutionError::Abandoned)))
    }
}

pub struct GraphExecutor {
    config: ExecutorConfig,
    costs: Arc<dyn FunctionCost>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl GraphExecutor {
    pub fn new(
        config: ExecutorConfig,
        costs: Arc<dyn FunctionCost>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            costs,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn partition(&self, graph: &DependencyGraph) -> Result<Partition, ExecutionError> {
        Partition::build(graph, self.costs.as_ref(), &self.config)
    }

    /// Partitions `graph` and starts dispatching its fragments. Returns
    /// without waiting for any job.
    pub fn execute(
        &self,
        graph: Arc<DependencyGraph>,
        statistics: Arc<dyn StatisticsGatherer>,
    ) -> ExecutionFuture {
        let (sender, receiver) = oneshot::channel();
        let future = ExecutionFuture { receiver };

        let partition = match self.partition(&graph) {
            Ok(partition) => partition,
            Err(error) => {
                tracing::error!("Cannot execute {:?}: {}", graph, error);
                let _ = sender.send(Err(error));
                return future;
            }
        };

        statistics.graph_processed(
            graph.calc_config(),
            partition.len(),
            partition.mean_size(),
            partition.mean_cost(),
        );
        tracing::debug!("Fragments of {:?}:\n{}", graph, partition);

        let execution = Arc::new(Execution::new(
            graph,
            &partition,
            self.dispatcher.clone(),
            statistics,
            sender,
        ));
        execution.start(&partition);

        future
    }
}

impl fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Completion state of one fragment.
struct FragmentState {
    nodes: Vec<NodeIndex>,
    dependents: Vec<FragmentId>,
    tails: Vec<FragmentId>,
    colour: usize,
    cost: u64,
    /// Inputs not yet completed.
    blocked: AtomicUsize,
    dispatched: AtomicBool,
    failed: AtomicBool,
}

/// One running graph. Shared by every outstanding [`JobResultReceiver`].
pub(crate) struct Execution {
    graph: Arc<DependencyGraph>,
    dispatcher: Arc<dyn Dispatcher>,
    statistics: Arc<dyn StatisticsGatherer>,
    fragments: Vec<Option<FragmentState>>,
    outputs: Mutex<HashMap<NodeIndex, Dynamic>>,
    /// Dispatch time of jobs still running.
    running: Mutex<HashMap<FragmentId, Instant>>,
    /// Timings of completed jobs.
    timings: Mutex<HashMap<FragmentId, JobExecution>>,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
    started: Instant,
    span: tracing::Span,
}

impl Execution {
    fn new(
        graph: Arc<DependencyGraph>,
        partition: &Partition,
        dispatcher: Arc<dyn Dispatcher>,
        statistics: Arc<dyn StatisticsGatherer>,
        sender: oneshot::Sender<Outcome>,
    ) -> Self {
        let mut fragments = (0..partition.capacity()).map(|_| None).collect::<Vec<_>>();
        for fragment in std::iter::once(partition.root()).chain(partition.fragments()) {
            fragments[fragment.id().index()] = Some(FragmentState {
                nodes: fragment.nodes().to_vec(),
                dependents: fragment.dependents().iter().copied().collect(),
                tails: fragment.tails().to_vec(),
                colour: fragment.colour(),
                cost: fragment.job_cost(),
                blocked: AtomicUsize::new(fragment.inputs().len()),
                dispatched: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            });
        }

        let span = tracing::info_span!("execute", calc_config = graph.calc_config());
        span.pb_set_length(partition.len() as u64);
        match crate::utils::get_style_fragments() {
            Ok(style) => span.pb_set_style(&style),
            Err(e) => tracing::warn!("Invalid progress style: {}", e),
        }
        span.pb_set_message(&format!("Executing {} fragments", partition.len()));

        Self {
            graph,
            dispatcher,
            statistics,
            fragments,
            outputs: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            timings: Mutex::new(HashMap::new()),
            sender: Mutex::new(Some(sender)),
            started: Instant::now(),
            span,
        }
    }

    fn state(&self, id: FragmentId) -> &FragmentState {
        match self.fragments.get(id.index()).and_then(Option::as_ref) {
            Some(state) => state,
            None => panic!("fragment {id} is not part of this execution"),
        }
    }

    fn start(self: &Arc<Self>, partition: &Partition) {
        let _enter = self.span.enter();

        if partition.root().inputs().is_empty() {
            self.complete();
            return;
        }

        for leaf in partition.leaves() {
            self.dispatch(leaf.id());
        }
    }

    fn dispatch(self: &Arc<Self>, id: FragmentId) {
        let state = self.state(id);
        assert!(
            !state.dispatched.swap(true, Ordering::AcqRel),
            "fragment {id} dispatched twice"
        );

        let own = state.nodes.iter().copied().collect::<HashSet<_>>();
        let inputs = {
            let outputs = lock(&self.outputs);
            let mut external = state
                .nodes
                .iter()
                .flat_map(|&node| self.graph.input_nodes(node))
                .filter(|input| !own.contains(input))
                .collect::<Vec<_>>();
            external.sort();
            external.dedup();
            external
                .into_iter()
                .filter_map(|input| outputs.get(&input).map(|value| (input, value.clone())))
                .collect()
        };

        let job = CalculationJob {
            spec: JobSpecification::next(self.graph.calc_config().into()),
            fragment: id,
            graph: self.graph.clone(),
            nodes: state.nodes.clone(),
            inputs,
            tails: state.tails.clone(),
            colour: state.colour,
            cost: state.cost,
        };

        tracing::trace!("dispatching {} for fragment {}", job.spec, id);
        lock(&self.running).insert(id, Instant::now());

        self.dispatcher
            .dispatch(job, JobResultReceiver::new(self.clone(), id));
    }

    pub(crate) fn fragment_completed(self: &Arc<Self>, id: FragmentId, result: JobResult) {
        let state = self.state(id);
        tracing::trace!("fragment {} completed", id);

        lock(&self.outputs).extend(result.into_outputs());
        if let Some(start) = lock(&self.running).remove(&id) {
            let duration = start.elapsed();
            lock(&self.timings).insert(id, JobExecution { start, duration });
        }
        self.span.pb_inc(1);

        for &dependent in &state.dependents {
            self.input_completed(dependent);
        }
    }

    fn input_completed(self: &Arc<Self>, id: FragmentId) {
        let previous = self.state(id).blocked.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "fragment {id} unblocked twice");

        if previous != 1 {
            return;
        }

        if id.is_root() {
            self.complete();
        } else if !self.state(id).failed.load(Ordering::Acquire) {
            self.dispatch(id);
        }
    }

    /// Marks `id` and everything downstream of it as failed. Whichever
    /// failure reaches the root first settles the future.
    pub(crate) fn fragment_failed(&self, id: FragmentId, cause: JobError) {
        tracing::warn!("Fragment {} failed: {}", id, cause);

        let mut failed = Vec::new();
        let mut reached_root = false;
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            let state = self.state(current);
            if state.failed.swap(true, Ordering::AcqRel) {
                continue;
            }
            reached_root |= current.is_root();
            failed.extend_from_slice(&state.nodes);
            stack.extend_from_slice(&state.dependents);
        }

        if !reached_root {
            return;
        }

        let error = ExecutionError::Fragment {
            fragment: id,
            nodes: self.state(id).nodes.clone(),
            failed,
            cause,
        };

        self.span.pb_set_message("Failed");
        if let Some(sender) = lock(&self.sender).take()
            && sender.send(Err(error)).is_err()
        {
            tracing::debug!("Nobody waiting on {:?}", self.graph);
        }
    }

    fn complete(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };

        let outputs = std::mem::take(&mut *lock(&self.outputs));
        let execution_times = std::mem::take(&mut *lock(&self.timings));
        let elapsed = self.started.elapsed();

        self.statistics
            .graph_executed(self.graph.calc_config(), self.graph.size(), elapsed);
        self.span.pb_set_message("Done");

        let result = GraphResult {
            calc_config: self.graph.calc_config().into(),
            outputs,
            diagnostics: Diagnostics { execution_times },
            elapsed,
        };

        if sender.send(Ok(result)).is_err() {
            tracing::debug!("Nobody waiting on {:?}", self.graph);
        }
    }
}
