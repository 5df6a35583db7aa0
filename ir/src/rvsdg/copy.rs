use rustc_hash::FxHashMap;

use crate::rvsdg::{
    graph::Graph,
    node::{Node, NodeKind, Origin, Region},
    traverser::TopDownTraverser,
};

/// An origin-to-origin mapping used when copying nodes between regions.
///
/// Callers seed the substitution with the external origins of the code being
/// copied (typically region arguments); the copy machinery extends it with
/// the outputs of every copied node.
#[derive(Default)]
pub struct Substitution {
    map: FxHashMap<Origin, Origin>,
}

impl Substitution {
    pub fn insert(&mut self, from: Origin, to: Origin) {
        self.map.insert(from, to);
    }

    pub fn resolve(&self, origin: Origin) -> Origin {
        *self
            .map
            .get(&origin)
            .unwrap_or_else(|| panic!("unmapped origin {origin:?} during region copy"))
    }

    pub fn try_resolve(&self, origin: Origin) -> Option<Origin> {
        self.map.get(&origin).copied()
    }
}

/// Copy every node of `src` into `dst` in topological order, extending
/// `subst` with the mapping from old outputs to new outputs.
pub fn copy_region_contents(graph: &mut Graph, src: Region, dst: Region, subst: &mut Substitution) {
    let mut traverser = TopDownTraverser::new(graph, src);
    while let Some(node) = traverser.next(graph) {
        copy_node(graph, node, dst, subst);
    }
}

/// Copy a single node (deeply, for structural nodes) into `dst`. Inputs are
/// resolved through `subst`; outputs of the copy are recorded in it.
pub fn copy_node(graph: &mut Graph, node: Node, dst: Region, subst: &mut Substitution) -> Node {
    let kind = graph.node(node).kind.clone();
    match kind {
        NodeKind::Simple(operation) => {
            let origins: Vec<Origin> = graph
                .node(node)
                .inputs
                .iter()
                .map(|input| subst.resolve(input.origin))
                .collect();
            let copy = graph.add_node(dst, operation, &origins);
            for index in 0..graph.node(node).outputs.len() {
                subst.insert(Origin::output(node, index), Origin::output(copy, index));
            }
            copy
        }
        NodeKind::Gamma { subregions } => {
            let predicate = subst.resolve(graph.input_origin(node, 0));
            let copy = graph.add_gamma(dst, predicate, subregions.len());
            let new_subregions = graph.gamma_subregions(copy).to_vec();
            for index in 1..graph.node(node).inputs.len() {
                let origin = subst.resolve(graph.input_origin(node, index));
                let arguments = graph.gamma_add_entry_var(copy, origin);
                for (old, argument) in subregions.iter().zip(arguments) {
                    subst.insert(Origin::argument(*old, index - 1), argument);
                }
            }
            for (old, new) in subregions.iter().zip(new_subregions.iter()) {
                copy_region_contents(graph, *old, *new, subst);
            }
            for index in 0..graph.node(node).outputs.len() {
                let results: Vec<Origin> = subregions
                    .iter()
                    .map(|old| subst.resolve(graph.result_origin(*old, index)))
                    .collect();
                let output = graph.gamma_add_exit_var(copy, &results);
                subst.insert(Origin::output(node, index), output);
            }
            copy
        }
        NodeKind::Theta { subregion } => {
            let copy = graph.add_theta(dst);
            let new_subregion = graph.theta_subregion(copy);
            for index in 0..graph.node(node).inputs.len() {
                let init = subst.resolve(graph.input_origin(node, index));
                graph.theta_add_loop_var(copy, init);
                subst.insert(
                    Origin::argument(subregion, index),
                    Origin::argument(new_subregion, index),
                );
            }
            copy_region_contents(graph, subregion, new_subregion, subst);
            let predicate = subst.resolve(graph.result_origin(subregion, 0));
            let results: Vec<Origin> = (0..graph.node(node).inputs.len())
                .map(|index| subst.resolve(graph.result_origin(subregion, index + 1)))
                .collect();
            graph.theta_finish(copy, predicate, &results);
            for index in 0..graph.node(node).outputs.len() {
                subst.insert(Origin::output(node, index), Origin::output(copy, index));
            }
            copy
        }
        NodeKind::Lambda(data) => {
            let context: Vec<Origin> = graph
                .node(node)
                .inputs
                .iter()
                .map(|input| subst.resolve(input.origin))
                .collect();
            let copy = graph.add_lambda(
                dst,
                data.name.clone(),
                data.linkage,
                data.signature.clone(),
                &context,
            );
            let new_subregion = graph.lambda_subregion(copy);
            for index in 0..graph.region(data.subregion).arguments.len() {
                subst.insert(
                    Origin::argument(data.subregion, index),
                    Origin::argument(new_subregion, index),
                );
            }
            copy_region_contents(graph, data.subregion, new_subregion, subst);
            let results: Vec<Origin> = (0..graph.region(data.subregion).results.len())
                .map(|index| subst.resolve(graph.result_origin(data.subregion, index)))
                .collect();
            graph.lambda_finish(copy, &results);
            subst.insert(Origin::output(node, 0), Origin::output(copy, 0));
            copy
        }
        NodeKind::Phi { subregion, nrec } => {
            let copy = graph.add_phi(dst);
            let new_subregion = graph.phi_subregion(copy);
            for index in 0..nrec {
                let ty = graph.region(subregion).arguments[index].ty.clone();
                let argument = graph.phi_add_rec_var(copy, ty);
                subst.insert(Origin::argument(subregion, index), argument);
            }
            for index in 0..graph.node(node).inputs.len() {
                let origin = subst.resolve(graph.input_origin(node, index));
                let argument = graph.phi_add_context_var(copy, origin);
                subst.insert(Origin::argument(subregion, nrec + index), argument);
            }
            copy_region_contents(graph, subregion, new_subregion, subst);
            let definitions: Vec<Origin> = (0..nrec)
                .map(|index| subst.resolve(graph.result_origin(subregion, index)))
                .collect();
            graph.phi_finish(copy, &definitions);
            for index in 0..nrec {
                subst.insert(Origin::output(node, index), Origin::output(copy, index));
            }
            copy
        }
        NodeKind::Delta(data) => {
            let copy = graph.add_delta(
                dst,
                data.name.clone(),
                data.ty.clone(),
                data.linkage,
                data.constant,
            );
            let new_subregion = graph.delta_subregion(copy);
            for index in 0..graph.node(node).inputs.len() {
                let origin = subst.resolve(graph.input_origin(node, index));
                let argument = graph.delta_add_dependency(copy, origin);
                subst.insert(Origin::argument(data.subregion, index), argument);
            }
            copy_region_contents(graph, data.subregion, new_subregion, subst);
            let initializer = subst.resolve(graph.result_origin(data.subregion, 0));
            graph.delta_finish(copy, initializer);
            subst.insert(Origin::output(node, 0), Origin::output(copy, 0));
            copy
        }
    }
}
