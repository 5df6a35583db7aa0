//! Push-out: hoists loop-invariant simple nodes out of thetas. A node whose
//! inputs all originate from invariant loop variables (or from values
//! already hoisted) moves to the parent region, and its results are routed
//! back in through new pass-through loop variables.

use rustc_hash::FxHashMap;

use rvopt_ir::{
    Operation, RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, TopDownTraverser},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::Pass;

pub struct PushOut;

impl Pass for PushOut {
    fn name(&self) -> &'static str {
        "psh"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let hoisted = push_out(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::PushNodes);
        record.add("nhoisted", hoisted).add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Movable operations: pure value computations whose position relative to
/// memory and loop iteration does not matter.
pub(crate) fn is_movable(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::Binary(..)
            | Operation::Unary(..)
            | Operation::Copy(_)
            | Operation::Constant(_)
            | Operation::Match { .. }
            | Operation::Undef(_)
    )
}

/// Hoist loop-invariant nodes out of every theta; returns how many moved.
pub fn push_out(graph: &mut Graph) -> usize {
    let mut hoisted = 0;
    for region in graph.all_regions() {
        for node in graph.region(region).nodes.clone() {
            if graph.is_live(node) && matches!(graph.node(node).kind, NodeKind::Theta { .. }) {
                hoisted += push_theta(graph, node);
            }
        }
    }
    hoisted
}

fn push_theta(graph: &mut Graph, theta: Node) -> usize {
    let subregion = graph.theta_subregion(theta);
    let parent = graph.node(theta).region;

    // Invariant arguments map to the theta input's origin outside.
    let mut outside: FxHashMap<Origin, Origin> = FxHashMap::default();
    for index in 0..graph.region(subregion).arguments.len() {
        let argument = Origin::argument(subregion, index);
        if graph.result_origin(subregion, index + 1) == argument {
            outside.insert(argument, graph.input_origin(theta, index));
        }
    }

    let mut hoisted = 0;
    let mut traverser = TopDownTraverser::new(graph, subregion);
    while let Some(node) = traverser.next(graph) {
        let NodeKind::Simple(operation) = graph.node(node).kind.clone() else {
            continue;
        };
        if !is_movable(&operation) {
            continue;
        }
        let Some(origins) = graph
            .node(node)
            .inputs
            .iter()
            .map(|input| outside.get(&input.origin).copied())
            .collect::<Option<Vec<Origin>>>()
        else {
            continue;
        };

        // Recreate the node outside and route each output back in as an
        // invariant pass-through.
        let moved = graph.add_node(parent, operation, &origins);
        for index in 0..graph.node(node).outputs.len() {
            let outer = Origin::output(moved, index);
            let var = graph.theta_extend_loop_var(theta, outer);
            let argument = graph.argument(subregion, var);
            graph.divert_users(Origin::output(node, index), argument);
            outside.insert(argument, outer);
        }
        graph.remove_node(node);
        hoisted += 1;
    }
    hoisted
}
