//! Invariant-value redirection: rewires users of gamma/theta outputs whose
//! every subregion result traces back to the same enclosing input, then
//! leaves the dead structural ports for DNE.

use rvopt_ir::{
    RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, TopDownTraverser},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::Pass;

pub struct InvariantValueRedirection;

impl Pass for InvariantValueRedirection {
    fn name(&self) -> &'static str {
        "ivr"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let redirected = redirect_invariant_values(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::InvariantValueRedirection);
        record
            .add("nredirected", redirected)
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Redirect all invariant gamma/theta outputs in the graph; returns how many
/// outputs were rewired.
pub fn redirect_invariant_values(graph: &mut Graph) -> usize {
    let root = graph.root();
    redirect_region(graph, root)
}

fn redirect_region(graph: &mut Graph, region: Region) -> usize {
    let mut redirected = 0;
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        // Inner regions first, so nested redirections expose outer ones.
        for subregion in graph.node(node).kind.subregions().to_vec() {
            redirected += redirect_region(graph, subregion);
        }
        match &graph.node(node).kind {
            NodeKind::Gamma { .. } => redirected += redirect_gamma(graph, node),
            NodeKind::Theta { .. } => redirected += redirect_theta(graph, node),
            _ => {}
        }
    }
    redirected
}

fn redirect_gamma(graph: &mut Graph, node: Node) -> usize {
    let subregions = graph.gamma_subregions(node).to_vec();
    let mut redirected = 0;
    for index in 0..graph.node(node).outputs.len() {
        if graph.nusers(Origin::output(node, index)) == 0 {
            continue;
        }
        // Every subregion must return an entry-variable argument fed by one
        // common input.
        let mut common = None;
        let invariant = subregions.iter().all(|subregion| {
            let Origin::Argument {
                region,
                index: argument,
            } = graph.result_origin(*subregion, index)
            else {
                return false;
            };
            if region != *subregion {
                return false;
            }
            let origin = graph.input_origin(node, argument + 1);
            match common {
                None => {
                    common = Some(origin);
                    true
                }
                Some(existing) => existing == origin,
            }
        });
        if invariant && let Some(origin) = common {
            graph.divert_users(Origin::output(node, index), origin);
            redirected += 1;
        }
    }
    redirected
}

fn redirect_theta(graph: &mut Graph, node: Node) -> usize {
    let subregion = graph.theta_subregion(node);
    let mut redirected = 0;
    for index in 0..graph.node(node).outputs.len() {
        if graph.nusers(Origin::output(node, index)) == 0 {
            continue;
        }
        // The feedback must be the argument itself: the value never changes.
        if graph.result_origin(subregion, index + 1) == Origin::argument(subregion, index) {
            let origin = graph.input_origin(node, index);
            graph.divert_users(Origin::output(node, index), origin);
            redirected += 1;
        }
    }
    redirected
}
