//! Theta-gamma inversion: a loop whose body branches on a loop-invariant
//! predicate becomes a branch over per-case loops, exposing case-specific
//! loop optimization. `theta(gamma(p, ...))` with invariant `p` rewrites to
//! `gamma(p, theta(...), theta(...))`.

use rvopt_ir::{
    RvsdgModule,
    rvsdg::{
        Graph, Node, NodeKind, Origin, Substitution, TopDownTraverser, copy_node,
        copy_region_contents,
    },
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::Pass;

pub struct ThetaGammaInversion;

impl Pass for ThetaGammaInversion {
    fn name(&self) -> &'static str {
        "ivt"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let inverted = invert_thetas(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::ThetaGammaInversion);
        record.add("ninverted", inverted).add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Invert every eligible theta; returns how many loops were rewritten.
pub fn invert_thetas(graph: &mut Graph) -> usize {
    let mut inverted = 0;
    for region in graph.all_regions() {
        for node in graph.region(region).nodes.clone() {
            if graph.is_live(node)
                && matches!(graph.node(node).kind, NodeKind::Theta { .. })
                && invert_theta(graph, node)
            {
                inverted += 1;
            }
        }
    }
    inverted
}

/// The gamma inside the theta body whose predicate is a loop-invariant
/// argument, along with that argument's index.
fn find_invertible_gamma(graph: &Graph, theta: Node) -> Option<(Node, usize)> {
    let subregion = graph.theta_subregion(theta);
    for &node in &graph.region(subregion).nodes {
        if !matches!(graph.node(node).kind, NodeKind::Gamma { .. }) {
            continue;
        }
        let Origin::Argument { region, index } = graph.input_origin(node, 0) else {
            continue;
        };
        if region != subregion {
            continue;
        }
        // Invariant: the argument feeds itself back.
        if graph.result_origin(subregion, index + 1) == Origin::argument(subregion, index) {
            return Some((node, index));
        }
    }
    None
}

fn invert_theta(graph: &mut Graph, theta: Node) -> bool {
    let Some((gamma, predicate_var)) = find_invertible_gamma(graph, theta) else {
        return false;
    };
    let body = graph.theta_subregion(theta);
    let parent = graph.node(theta).region;
    let ninputs = graph.node(theta).inputs.len();
    let cases = graph.gamma_subregions(gamma).len();

    let outer_predicate = graph.input_origin(theta, predicate_var);
    let outer_gamma = graph.add_gamma(parent, outer_predicate, cases);
    let mut entry_args: Vec<Vec<Origin>> = vec![Vec::new(); cases];
    for index in 0..ninputs {
        let origin = graph.input_origin(theta, index);
        for (case, argument) in graph
            .gamma_add_entry_var(outer_gamma, origin)
            .into_iter()
            .enumerate()
        {
            entry_args[case].push(argument);
        }
    }
    let outer_subregions = graph.gamma_subregions(outer_gamma).to_vec();

    let mut case_outputs: Vec<Vec<Origin>> = Vec::with_capacity(cases);
    for case in 0..cases {
        let target = outer_subregions[case];
        let inner_theta = graph.add_theta(target);
        for index in 0..ninputs {
            graph.theta_add_loop_var(inner_theta, entry_args[case][index]);
        }
        let inner_body = graph.theta_subregion(inner_theta);

        // Replay the loop body, splicing the chosen gamma case in place of
        // the gamma itself.
        let mut subst = Substitution::default();
        for index in 0..ninputs {
            subst.insert(
                Origin::argument(body, index),
                Origin::argument(inner_body, index),
            );
        }
        let mut traverser = TopDownTraverser::new(graph, body);
        while let Some(node) = traverser.next(graph) {
            if node != gamma {
                copy_node(graph, node, inner_body, &mut subst);
                continue;
            }
            let case_region = graph.gamma_subregions(gamma)[case];
            for input in 1..graph.node(gamma).inputs.len() {
                let origin = subst.resolve(graph.input_origin(gamma, input));
                subst.insert(Origin::argument(case_region, input - 1), origin);
            }
            copy_region_contents(graph, case_region, inner_body, &mut subst);
            for output in 0..graph.node(gamma).outputs.len() {
                let replacement = subst.resolve(graph.result_origin(case_region, output));
                subst.insert(Origin::output(gamma, output), replacement);
            }
        }

        let predicate = subst.resolve(graph.result_origin(body, 0));
        let results: Vec<Origin> = (0..ninputs)
            .map(|index| subst.resolve(graph.result_origin(body, index + 1)))
            .collect();
        graph.theta_finish(inner_theta, predicate, &results);
        case_outputs.push((0..ninputs).map(|i| Origin::output(inner_theta, i)).collect());
    }

    for index in 0..ninputs {
        let per_case: Vec<Origin> = case_outputs.iter().map(|outputs| outputs[index]).collect();
        let output = graph.gamma_add_exit_var(outer_gamma, &per_case);
        graph.divert_users(Origin::output(theta, index), output);
    }
    graph.remove_node(theta);
    true
}
