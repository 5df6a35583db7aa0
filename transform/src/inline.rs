//! Function inlining: replaces a direct call to a lambda by a substitution
//! of the lambda body, mapping parameters to arguments and results to the
//! call's outputs. Context variables of the callee are routed into the
//! hosting region.

use rvopt_ir::{
    Operation, RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Substitution, copy_region_contents},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::Pass;

/// Callees with bodies up to this many nodes inline even with several call
/// sites; single-call-site callees always inline.
const TINY_BODY_BUDGET: usize = 16;

pub struct FunctionInlining;

impl Pass for FunctionInlining {
    fn name(&self) -> &'static str {
        "iln"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let inlined = inline_functions(module);
        let mut record = Statistics::new(StatisticsId::FunctionInlining);
        record.add("ninlined", inlined).add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Inline every eligible direct call once; returns the number of inlined
/// call sites. Calls copied into the graph by this very pass are picked up
/// by the next invocation.
pub fn inline_functions(module: &mut RvsdgModule) -> usize {
    let graph = &mut module.graph;
    let mut calls = Vec::new();
    for region in graph.all_regions() {
        for &node in &graph.region(region).nodes {
            if matches!(
                graph.node(node).operation(),
                Some(Operation::Call(_))
            ) {
                calls.push(node);
            }
        }
    }

    let mut inlined = 0;
    for call in calls {
        if !graph.is_live(call) {
            continue;
        }
        let Some(lambda) = trace_lambda(graph, graph.input_origin(call, 0)) else {
            continue;
        };
        if !should_inline(graph, lambda) {
            continue;
        }
        log::debug!(
            target: "pass:iln",
            "inlining call to '{}'", graph.lambda_data(lambda).name
        );
        inline_call(graph, call, lambda);
        inlined += 1;
    }
    inlined
}

/// Trace an origin through invariant structure to a defining lambda. Phi
/// recursion variables are left alone: recursive calls never inline.
fn trace_lambda(graph: &Graph, origin: Origin) -> Option<Node> {
    match origin {
        Origin::Output { node, .. } => match &graph.node(node).kind {
            NodeKind::Lambda(_) => Some(node),
            _ => None,
        },
        Origin::Argument { region, index } => {
            let input = graph.argument_input(region, index)?;
            let owner = graph.region(region).owner?;
            match &graph.node(owner).kind {
                NodeKind::Theta { subregion } => {
                    if graph.result_origin(*subregion, index + 1) != origin {
                        return None;
                    }
                    trace_lambda(graph, graph.input_origin(owner, input))
                }
                NodeKind::Phi { .. } => None,
                _ => trace_lambda(graph, graph.input_origin(owner, input)),
            }
        }
    }
}

fn should_inline(graph: &Graph, lambda: Node) -> bool {
    let output = Origin::output(lambda, 0);
    let exported = graph
        .users(output)
        .iter()
        .any(|user| matches!(user, rvopt_ir::rvsdg::User::Result { region, .. } if *region == graph.root()));
    if graph.nusers(output) == 1 && !exported {
        return true;
    }
    let body = graph.lambda_subregion(lambda);
    graph.region(body).nodes.len() <= TINY_BODY_BUDGET
}

fn inline_call(graph: &mut Graph, call: Node, lambda: Node) {
    let data = graph.lambda_data(lambda).clone();
    let body = data.subregion;
    let target = graph.node(call).region;

    let mut subst = Substitution::default();
    for index in 0..data.ncontext {
        let origin = graph.input_origin(lambda, index);
        let routed = graph.route_origin(origin, target);
        subst.insert(Origin::argument(body, index), routed);
    }
    for index in 0..data.signature.params().len() {
        subst.insert(
            Origin::argument(body, data.ncontext + index),
            graph.input_origin(call, index + 1),
        );
    }
    copy_region_contents(graph, body, target, &mut subst);
    for index in 0..data.signature.results().len() {
        let replacement = subst.resolve(graph.result_origin(body, index));
        graph.divert_users(Origin::output(call, index), replacement);
    }
    graph.remove_node(call);
}
