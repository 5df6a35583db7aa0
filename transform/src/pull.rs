//! Pull-in: sinks nodes that are used only as entry variables of a single
//! gamma into the subregions that actually use them, shrinking the parent
//! region and exposing case-local optimization.

use rustc_hash::FxHashMap;

use rvopt_ir::{
    RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, User},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::{Pass, push::is_movable};

pub struct PullIn;

impl Pass for PullIn {
    fn name(&self) -> &'static str {
        "pll"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let pulled = pull_in(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::PullNodes);
        record.add("npulled", pulled).add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Sink gamma-only nodes into the subregions using them; returns how many
/// nodes moved.
pub fn pull_in(graph: &mut Graph) -> usize {
    let mut pulled = 0;
    for region in graph.all_regions() {
        loop {
            let moved = pull_region_once(graph, region);
            pulled += moved;
            if moved == 0 {
                break;
            }
        }
    }
    pulled
}

fn pull_region_once(graph: &mut Graph, region: Region) -> usize {
    let mut pulled = 0;
    for node in graph.region(region).nodes.clone() {
        if !graph.is_live(node) {
            continue;
        }
        let NodeKind::Simple(operation) = graph.node(node).kind.clone() else {
            continue;
        };
        if !is_movable(&operation) {
            continue;
        }
        let Some(gamma) = single_consuming_gamma(graph, node) else {
            continue;
        };
        pull_node(graph, node, gamma);
        pulled += 1;
    }
    pulled
}

/// The gamma consuming every output of `node` through entry variables, if
/// there is exactly one such consumer.
fn single_consuming_gamma(graph: &Graph, node: Node) -> Option<Node> {
    let mut consumer = None;
    let mut any = false;
    for index in 0..graph.node(node).outputs.len() {
        for user in graph.users(Origin::output(node, index)) {
            any = true;
            let User::Input {
                node: user_node,
                index: input,
            } = user
            else {
                return None;
            };
            if *input == 0 || !matches!(graph.node(*user_node).kind, NodeKind::Gamma { .. }) {
                return None;
            }
            match consumer {
                None => consumer = Some(*user_node),
                Some(existing) if existing == *user_node => {}
                Some(_) => return None,
            }
        }
    }
    if any { consumer } else { None }
}

fn pull_node(graph: &mut Graph, node: Node, gamma: Node) {
    let subregions = graph.gamma_subregions(gamma).to_vec();
    let operation = match &graph.node(node).kind {
        NodeKind::Simple(operation) => operation.clone(),
        _ => unreachable!(),
    };

    // Entry-variable indices carrying each output of `node`.
    let mut carried: Vec<(usize, usize)> = Vec::new(); // (gamma input, node output)
    for input in 1..graph.node(gamma).inputs.len() {
        if let Origin::Output {
            node: producer,
            index,
        } = graph.input_origin(gamma, input)
            && producer == node
        {
            carried.push((input, index));
        }
    }

    // Route the node's operands in as entry variables (reusing existing ones
    // with the same origin), then copy the node into each subregion where
    // one of its carried arguments has users.
    let operand_origins: Vec<Origin> = graph
        .node(node)
        .inputs
        .iter()
        .map(|input| input.origin)
        .collect();
    let mut operand_args: Vec<Vec<Origin>> = Vec::with_capacity(operand_origins.len());
    for origin in &operand_origins {
        let existing = (1..graph.node(gamma).inputs.len())
            .find(|input| graph.input_origin(gamma, *input) == *origin)
            .filter(|input| {
                // Entry vars feeding the node being pulled cannot be reused.
                !carried.iter().any(|(carried_input, _)| carried_input == input)
            });
        let arguments = match existing {
            Some(input) => subregions
                .iter()
                .map(|subregion| Origin::argument(*subregion, input - 1))
                .collect(),
            None => graph.gamma_add_entry_var(gamma, *origin),
        };
        operand_args.push(arguments);
    }

    for (position, subregion) in subregions.iter().enumerate() {
        let used = carried.iter().any(|(input, _)| {
            !graph
                .users(Origin::argument(*subregion, input - 1))
                .is_empty()
        });
        if !used {
            continue;
        }
        let origins: Vec<Origin> = operand_args.iter().map(|args| args[position]).collect();
        let copy = graph.add_node(*subregion, operation.clone(), &origins);
        for (input, output) in &carried {
            graph.divert_users(
                Origin::argument(*subregion, input - 1),
                Origin::output(copy, *output),
            );
        }
    }

    // The carried entry variables are now dead; drop them (and the node),
    // highest input index first so positions stay valid.
    let mut inputs: Vec<usize> = carried.iter().map(|(input, _)| *input).collect();
    inputs.sort_unstable();
    for input in inputs.into_iter().rev() {
        for subregion in &subregions {
            graph.remove_argument(*subregion, input - 1);
        }
        graph.remove_input(gamma, input);
    }
    graph.remove_node(node);
}
