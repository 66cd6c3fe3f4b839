use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use petgraph::graph::NodeIndex;

use crate::config::ExecutorConfig;
use crate::error::ExecutionError;
use crate::fragment::{FragmentId, FragmentSet, GraphFragment, colour, write_tree};
use crate::graph::{DependencyGraph, FunctionCost};

/// Consecutive merge passes without any change after which merging stops.
const MAX_IDLE_PASSES: usize = 2;

/// A dependency graph split into jobs.
///
/// Every graph node belongs to exactly one fragment, fragments form a DAG
/// whose only sink is the root, and each fragment carries the colour and
/// tail hints computed by simulating its execution.
#[derive(Debug, Clone)]
pub struct Partition {
    set: FragmentSet,
}

impl Partition {
    pub fn build(
        graph: &DependencyGraph,
        costs: &dyn FunctionCost,
        config: &ExecutorConfig,
    ) -> Result<Self, ExecutionError> {
        let order = graph.execution_order()?;

        let mut set = if order.is_empty() {
            FragmentSet::new()
        } else if graph.size() <= config.min_job_items {
            seed(graph, costs, order)
        } else {
            let mut set = fragmentize(graph, costs, &order);
            let created = set.len();
            merge(&mut set, config);
            tracing::debug!(
                "merged {} fragments into {} for {} nodes",
                created,
                set.len(),
                graph.size()
            );
            set
        };

        colour::assign(&mut set, config.max_concurrency);

        Ok(Self { set })
    }

    pub fn root(&self) -> &GraphFragment {
        self.set.root()
    }

    pub fn get(&self, id: FragmentId) -> Option<&GraphFragment> {
        self.set.get(id)
    }

    /// All fragments except the root, in id order.
    pub fn fragments(&self) -> impl Iterator<Item = &GraphFragment> {
        self.set.iter()
    }

    /// Fragments with no inputs, which can start straight away.
    pub fn leaves(&self) -> impl Iterator<Item = &GraphFragment> {
        self.set.iter().filter(|fragment| fragment.inputs().is_empty())
    }

    /// Number of fragments, not counting the root.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.len() == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.set.capacity()
    }

    /// Mean number of nodes per fragment.
    pub fn mean_size(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let items: usize = self.fragments().map(GraphFragment::job_items).sum();
        items as f64 / self.len() as f64
    }

    /// Mean estimated cost per fragment.
    pub fn mean_cost(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let cost: f64 = self.fragments().map(|f| f.job_cost() as f64).sum();
        cost / self.len() as f64
    }

    /// Number of distinct colours in use.
    pub fn colours(&self) -> usize {
        self.fragments()
            .map(GraphFragment::colour)
            .collect::<HashSet<_>>()
            .len()
    }

    #[cfg(test)]
    fn remerge(&mut self, config: &ExecutorConfig) -> bool {
        let shared = merge_shared_inputs(&mut self.set, config);
        let single = merge_single_dependencies(&mut self.set, config);
        shared || single
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tree(f, &self.set, FragmentId::ROOT, 0, &mut HashSet::new())
    }
}

fn cost_of(graph: &DependencyGraph, costs: &dyn FunctionCost, node: NodeIndex) -> u64 {
    costs.invocation_cost(graph.node(node))
}

/// Small graphs go out as one job, nodes in execution order.
fn seed(graph: &DependencyGraph, costs: &dyn FunctionCost, order: Vec<NodeIndex>) -> FragmentSet {
    let cost = order
        .iter()
        .map(|&node| cost_of(graph, costs, node))
        .fold(0, u64::saturating_add);

    let mut set = FragmentSet::new();
    let fragment = set.insert(order, cost);
    set.link(fragment, FragmentId::ROOT);
    set
}

/// One fragment per node, wired the way the nodes are. Fragments are
/// created in execution order so inputs get lower ids than their dependents.
fn fragmentize(
    graph: &DependencyGraph,
    costs: &dyn FunctionCost,
    order: &[NodeIndex],
) -> FragmentSet {
    let mut set = FragmentSet::new();
    let mut fragment_of = HashMap::with_capacity(order.len());

    for &node in order {
        let fragment = set.insert(vec![node], cost_of(graph, costs, node));
        fragment_of.insert(node, fragment);

        for input in graph.input_nodes(node) {
            set.link(fragment_of[&input], fragment);
        }
    }

    for node in graph.root_nodes() {
        set.link(fragment_of[&node], FragmentId::ROOT);
    }

    set
}

/// Alternates both merge passes until neither has changed anything for
/// [`MAX_IDLE_PASSES`] passes in a row.
fn merge(set: &mut FragmentSet, config: &ExecutorConfig) {
    let mut idle = 0;

    loop {
        if merge_shared_inputs(set, config) {
            idle = 0;
        } else {
            idle += 1;
            if idle >= MAX_IDLE_PASSES {
                break;
            }
        }

        if merge_single_dependencies(set, config) {
            idle = 0;
        } else {
            idle += 1;
            if idle >= MAX_IDLE_PASSES {
                break;
            }
        }
    }
}

/// Merges undersized fragments that consume exactly the same inputs, as long
/// as the result stays within the maximum job size. Repeats until a pass
/// finds nothing to merge. Returns whether anything was merged.
fn merge_shared_inputs(set: &mut FragmentSet, config: &ExecutorConfig) -> bool {
    let mut changed = false;

    loop {
        let mut candidates: HashMap<BTreeSet<FragmentId>, FragmentId> = HashMap::new();
        let mut pairs = Vec::new();

        for fragment in set.iter() {
            if fragment.inputs().is_empty()
                || config.is_big_enough(fragment.job_items(), fragment.job_cost())
            {
                continue;
            }

            if let Some(&candidate) = candidates.get(fragment.inputs()) {
                let other = set.fragment(candidate);
                if config.fits(
                    fragment.job_items() + other.job_items(),
                    fragment.job_cost().saturating_add(other.job_cost()),
                ) {
                    candidates.remove(fragment.inputs());
                    pairs.push((candidate, fragment.id()));
                    continue;
                }

                // Cheaper one stays the candidate.
                if fragment.job_cost() >= other.job_cost() {
                    continue;
                }
            }

            candidates.insert(fragment.inputs().clone(), fragment.id());
        }

        if pairs.is_empty() {
            return changed;
        }

        for (first, second) in pairs {
            let (into, from) = if set.fragment(second).job_cost() > set.fragment(first).job_cost() {
                (second, first)
            } else {
                (first, second)
            };
            set.append(into, from);
        }

        // A fragment feeding another fragment no longer needs to be waited
        // on by the root directly.
        let terminal = set.root().inputs().iter().copied().collect::<Vec<_>>();
        for fragment in terminal {
            if set.fragment(fragment).dependents().len() > 1 {
                set.unlink(fragment, FragmentId::ROOT);
            }
        }

        changed = true;
    }
}

/// Folds a fragment into its only dependent when the result stays within the
/// maximum job size. Returns whether anything was merged.
fn merge_single_dependencies(set: &mut FragmentSet, config: &ExecutorConfig) -> bool {
    let mut merged = 0;

    for id in set.ids() {
        let fragment = set.fragment(id);
        if fragment.dependents().len() != 1 {
            continue;
        }

        let Some(&dependent) = fragment.dependents().first() else {
            continue;
        };
        if dependent.is_root() {
            continue;
        }

        let other = set.fragment(dependent);
        if !config.fits(
            fragment.job_items() + other.job_items(),
            fragment.job_cost().saturating_add(other.job_cost()),
        ) {
            continue;
        }

        set.prepend(dependent, id);
        merged += 1;
    }

    merged > 0
}
