//! The dependency graph handed to the executor.
//!
//! Each node is one function application on one target. An edge runs from
//! the node producing a value to the node consuming it, so the edges point in
//! execution order. The executor never modifies the graph, it only groups its
//! nodes into jobs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, ComputationTarget, ParameterizedFunction, ValueSpecification};
use crate::error::ExecutionError;

/// A single function application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyNode {
    pub function: ParameterizedFunction,
    pub target: ComputationTarget,
    pub inputs: BTreeSet<ValueSpecification>,
    pub outputs: BTreeSet<ValueSpecification>,
}

impl DependencyNode {
    pub fn new(function: ParameterizedFunction, target: ComputationTarget) -> Self {
        Self {
            function,
            target,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = ValueSpecification>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = ValueSpecification>) -> Self {
        self.inputs.extend(inputs);
        self
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.function, self.target)
    }
}

pub struct DependencyGraph {
    calc_config: ArcStr,
    graph: Graph<DependencyNode, ()>,
}

impl DependencyGraph {
    pub fn new(calc_config: impl Into<ArcStr>) -> Self {
        Self {
            calc_config: calc_config.into(),
            graph: Graph::new(),
        }
    }

    /// Name of the calculation configuration this graph was built for.
    pub fn calc_config(&self) -> &str {
        &self.calc_config
    }

    pub fn add_node(&mut self, node: DependencyNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Declares that `dependent` consumes an output of `input`.
    pub fn add_input(&mut self, dependent: NodeIndex, input: NodeIndex) {
        self.graph.update_edge(input, dependent, ());
    }

    pub fn size(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, index: NodeIndex) -> bool {
        self.graph.node_weight(index).is_some()
    }

    pub fn node(&self, index: NodeIndex) -> &DependencyNode {
        &self.graph[index]
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Nodes whose outputs `index` consumes.
    pub fn input_nodes(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Incoming)
    }

    /// Nodes consuming the outputs of `index`.
    pub fn dependent_nodes(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Outgoing)
    }

    /// Nodes nothing else depends on: the terminal outputs of the graph.
    pub fn root_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .externals(Direction::Outgoing)
            .collect()
    }

    /// All nodes, inputs before the nodes that consume them.
    pub fn execution_order(&self) -> Result<Vec<NodeIndex>, ExecutionError> {
        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| ExecutionError::Cycle(cycle.node_id()))
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("calc_config", &self.calc_config)
            .field("size", &self.size())
            .finish()
    }
}

/// Estimates how expensive invoking a node is, in arbitrary but consistent
/// units. Used to size jobs and to simulate when they start.
pub trait FunctionCost: Send + Sync {
    fn invocation_cost(&self, node: &DependencyNode) -> u64;
}

/// Fixed per-function costs with a fallback for unknown functions.
#[derive(Debug, Clone)]
pub struct FunctionCosts {
    default_cost: u64,
    costs: HashMap<ArcStr, u64>,
}

impl FunctionCosts {
    pub fn new(default_cost: u64) -> Self {
        Self {
            default_cost,
            costs: HashMap::new(),
        }
    }

    pub fn with(mut self, function_id: impl Into<ArcStr>, cost: u64) -> Self {
        self.costs.insert(function_id.into(), cost);
        self
    }

    pub fn set(&mut self, function_id: impl Into<ArcStr>, cost: u64) {
        self.costs.insert(function_id.into(), cost);
    }
}

impl Default for FunctionCosts {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FunctionCost for FunctionCosts {
    fn invocation_cost(&self, node: &DependencyNode) -> u64 {
        self.costs
            .get(&node.function.function_id)
            .copied()
            .unwrap_or(self.default_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> DependencyNode {
        DependencyNode::new(ParameterizedFunction::new(name), ComputationTarget::new("T"))
    }

    #[test]
    fn test_roots_and_order() {
        let mut graph = DependencyGraph::new("Default");
        let a = graph.add_node(node("a"));
        let b = graph.add_node(node("b"));
        let c = graph.add_node(node("c"));
        graph.add_input(c, a);
        graph.add_input(c, b);
        graph.add_input(c, b);

        assert_eq!(graph.root_nodes(), vec![c]);
        assert_eq!(graph.input_nodes(c).count(), 2);

        let order = graph.execution_order().unwrap();
        let pos = |n| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn test_cycle() {
        let mut graph = DependencyGraph::new("Default");
        let a = graph.add_node(node("a"));
        let b = graph.add_node(node("b"));
        graph.add_input(a, b);
        graph.add_input(b, a);

        assert!(matches!(
            graph.execution_order(),
            Err(ExecutionError::Cycle(_))
        ));
    }

    #[test]
    fn test_costs() {
        let costs = FunctionCosts::new(3).with("slow", 100);
        assert_eq!(costs.invocation_cost(&node("slow")), 100);
        assert_eq!(costs.invocation_cost(&node("fast")), 3);
    }
}
