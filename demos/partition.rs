use std::sync::Arc;
use std::time::Duration;

use calcgraph::executor::{LocalDispatcher, TracingStatistics};
use calcgraph::logging::init_logging;
use calcgraph::{
    ComputationTarget, DependencyGraph, DependencyNode, Dynamic, ExecutorConfig, FunctionCosts,
    GraphExecutor, ParameterizedFunction,
};

/// Market data at the bottom, curves on top of it, trades on top of the
/// curves and one portfolio aggregate.
fn portfolio(trades: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new("Default");

    let quotes = (0..8)
        .map(|i| {
            graph.add_node(DependencyNode::new(
                ParameterizedFunction::new("market-data"),
                ComputationTarget::new(format!("Quote-{i}")),
            ))
        })
        .collect::<Vec<_>>();

    let curves = (0..4)
        .map(|i| {
            let curve = graph.add_node(DependencyNode::new(
                ParameterizedFunction::new("curve"),
                ComputationTarget::new(format!("Curve-{i}")),
            ));
            graph.add_input(curve, quotes[2 * i]);
            graph.add_input(curve, quotes[2 * i + 1]);
            curve
        })
        .collect::<Vec<_>>();

    let aggregate = graph.add_node(DependencyNode::new(
        ParameterizedFunction::new("sum"),
        ComputationTarget::new("Portfolio"),
    ));

    for i in 0..trades {
        let pv = graph.add_node(DependencyNode::new(
            ParameterizedFunction::new("present-value"),
            ComputationTarget::new(format!("Trade-{i}")),
        ));
        graph.add_input(pv, curves[i % curves.len()]);
        graph.add_input(aggregate, pv);
    }

    graph
}

fn invoke(node: &DependencyNode, inputs: &[Dynamic]) -> anyhow::Result<Dynamic> {
    std::thread::sleep(Duration::from_millis(20));

    let total = inputs
        .iter()
        .filter_map(|input| input.downcast_ref::<f64>())
        .sum::<f64>();

    let value = match &*node.function.function_id {
        "market-data" => 1.0,
        _ => total + 1.0,
    };

    Ok(Arc::new(value))
}

fn main() -> anyhow::Result<()> {
    init_logging(1)?;

    let config = ExecutorConfig::new()
        .with_job_items(4, 12)
        .with_job_cost(20, 200)
        .with_max_concurrency(2);
    let costs = FunctionCosts::new(10).with("market-data", 1).with("sum", 40);
    let dispatcher = LocalDispatcher::with_threads(invoke, 4)?;

    let executor = GraphExecutor::new(config, Arc::new(costs), Arc::new(dispatcher))?;

    let graph = Arc::new(portfolio(24));
    let partition = executor.partition(&graph)?;
    println!("{partition}");
    println!(
        "{} fragments, {} colours, {:.1} nodes per fragment",
        partition.len(),
        partition.colours(),
        partition.mean_size()
    );

    let result = executor
        .execute(graph.clone(), Arc::new(TracingStatistics))
        .wait()?;

    let root = graph.root_nodes()[0];
    if let Some(total) = result.get::<f64>(root) {
        println!("portfolio value {total}");
    }
    print!("{}", result.diagnostics.render_waterfall());

    Ok(())
}
