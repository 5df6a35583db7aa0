use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::{
    ops::{ConstantValue, Operation},
    rvsdg::{
        copy::{Substitution, copy_region_contents},
        graph::Graph,
        node::{Node, NodeKind, Origin, Region},
        traverser::BottomUpTraverser,
    },
};

bitflags! {
    #[derive(Debug, Copy, Clone, Default)]
    pub struct AllocaReductions: u8 {
        /// Adjacent independent allocas commute into canonical order.
        const ALLOCA_ALLOCA = 1;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct MuxReductions: u8 {
        /// `mux(mux(a, b), c)` flattens to `mux(a, b, c)`.
        const MUX_MUX = 1;
        /// Duplicate origins among the operands collapse to one.
        const MULTIPLE_ORIGIN = 2;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct StoreReductions: u8 {
        /// A store through a single-user mux distributes over its strands.
        const STORE_MUX = 1;
        /// A store whose state comes from an overwritten single-user store
        /// elides the earlier store.
        const STORE_STORE = 2;
        /// A store on a state strand of a provably disjoint alloca skips it.
        const STORE_ALLOCA = 4;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct LoadReductions: u8 {
        /// A load through a single-user mux reads the strands directly.
        const LOAD_MUX = 1;
        /// `load(p, store(p, v, s))` forwards `v`.
        const LOAD_STORE = 2;
        /// A load on a state strand of a provably disjoint alloca skips it.
        const LOAD_ALLOCA = 4;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct GammaReductions: u8 {
        /// A constant predicate collapses the gamma to one subregion.
        const PREDICATE = 1;
        /// An output returning the same control constant from every
        /// subregion lifts the constant into the parent.
        const CONTROL_CONSTANT = 2;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct UnaryReductions: u8 {
        /// Constant folding; also elides value copies.
        const FOLD = 1;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct BinaryReductions: u8 {
        /// Constant folding and commutative operand canonicalization.
        const FOLD = 1;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct MatchReductions: u8 {
        /// A match on a constant folds to a control constant.
        const FOLD = 1;
    }
}

/// The per-family rewrite configuration of one operation family.
#[derive(Debug, Copy, Clone, Default)]
pub struct NormalForm<F> {
    /// When false, the rules are registered but never applied.
    pub mutable: bool,
    pub flags: F,
}

/// The per-graph normal-form registry: one flag set per operation family.
///
/// The registry is an attribute of the graph value and dies with it. Newly
/// created nodes are offered to their family on creation when `mutable` is
/// set; [normalize] re-offers every existing node until fixpoint.
#[derive(Debug, Default)]
pub struct NormalForms {
    pub alloca: NormalForm<AllocaReductions>,
    pub mux: NormalForm<MuxReductions>,
    pub store: NormalForm<StoreReductions>,
    pub load: NormalForm<LoadReductions>,
    pub gamma: NormalForm<GammaReductions>,
    pub unary: NormalForm<UnaryReductions>,
    pub binary: NormalForm<BinaryReductions>,
    pub match_: NormalForm<MatchReductions>,
}

impl NormalForms {
    /// Enable every family and every rule.
    pub fn enable_all(&mut self) {
        self.alloca = NormalForm {
            mutable: true,
            flags: AllocaReductions::all(),
        };
        self.mux = NormalForm {
            mutable: true,
            flags: MuxReductions::all(),
        };
        self.store = NormalForm {
            mutable: true,
            flags: StoreReductions::all(),
        };
        self.load = NormalForm {
            mutable: true,
            flags: LoadReductions::all(),
        };
        self.gamma = NormalForm {
            mutable: true,
            flags: GammaReductions::all(),
        };
        self.unary = NormalForm {
            mutable: true,
            flags: UnaryReductions::all(),
        };
        self.binary = NormalForm {
            mutable: true,
            flags: BinaryReductions::all(),
        };
        self.match_ = NormalForm {
            mutable: true,
            flags: MatchReductions::all(),
        };
    }
}

/// The constant produced at `origin`, if its producer is a constant node.
fn constant_at(graph: &Graph, origin: Origin) -> Option<ConstantValue> {
    let (node, index) = producer(origin)?;
    if index != 0 {
        return None;
    }
    match graph.node(node).operation()? {
        Operation::Constant(value) => Some(value.clone()),
        _ => None,
    }
}

fn int_at(graph: &Graph, origin: Origin) -> Option<u64> {
    match constant_at(graph, origin)? {
        ConstantValue::Int { value, .. } => Some(value),
        ConstantValue::Control { .. } => None,
    }
}

fn producer(origin: Origin) -> Option<(Node, usize)> {
    match origin {
        Origin::Output { node, index } => Some((node, index)),
        Origin::Argument { .. } => None,
    }
}

fn producer_op<'a>(graph: &'a Graph, origin: Origin) -> Option<(Node, usize, &'a Operation)> {
    let (node, index) = producer(origin)?;
    let op = graph.node(node).operation()?;
    Some((node, index, op))
}

/// Offer a new simple node to its family before it is created.
///
/// Returns pre-existing (or newly folded) origins when the family's normal
/// form can satisfy the request without the node; `None` creates the node as
/// requested. Only rules that are cheap to decide from the operands run here;
/// the remaining rules fire during [normalize] sweeps.
pub fn on_create(
    graph: &mut Graph,
    region: Region,
    operation: &Operation,
    origins: &[Origin],
) -> Option<SmallVec<[Origin; 2]>> {
    match operation {
        Operation::Binary(kind, ty)
            if graph.normal_forms.binary.mutable
                && graph
                    .normal_forms
                    .binary
                    .flags
                    .contains(BinaryReductions::FOLD) =>
        {
            let crate::types::Type::Int { bits } = ty else {
                return None;
            };
            let lhs = int_at(graph, origins[0])?;
            let rhs = int_at(graph, origins[1])?;
            let value = kind.apply(*bits, lhs, rhs)?;
            let bits = if kind.is_comparison() { 1 } else { *bits };
            let constant = graph.add_node(
                region,
                Operation::Constant(ConstantValue::Int { bits, value }),
                &[],
            );
            Some(SmallVec::from_slice(&[Origin::output(constant, 0)]))
        }
        Operation::Unary(kind, ty)
            if graph.normal_forms.unary.mutable
                && graph.normal_forms.unary.flags.contains(UnaryReductions::FOLD) =>
        {
            let crate::types::Type::Int { bits } = ty else {
                return None;
            };
            let value = kind.apply(*bits, int_at(graph, origins[0])?);
            let constant = graph.add_node(
                region,
                Operation::Constant(ConstantValue::Int { bits: *bits, value }),
                &[],
            );
            Some(SmallVec::from_slice(&[Origin::output(constant, 0)]))
        }
        Operation::Copy(_)
            if graph.normal_forms.unary.mutable
                && graph.normal_forms.unary.flags.contains(UnaryReductions::FOLD) =>
        {
            Some(SmallVec::from_slice(&[origins[0]]))
        }
        Operation::Match { mapping, .. }
            if graph.normal_forms.match_.mutable
                && graph.normal_forms.match_.flags.contains(MatchReductions::FOLD) =>
        {
            let value = int_at(graph, origins[0])?;
            let constant = graph.add_node(
                region,
                Operation::Constant(ConstantValue::Control {
                    alternatives: mapping.alternatives,
                    value: mapping.select(value),
                }),
                &[],
            );
            Some(SmallVec::from_slice(&[Origin::output(constant, 0)]))
        }
        Operation::Load { ty, nstates: 1 }
            if graph.normal_forms.load.mutable
                && graph.normal_forms.load.flags.contains(LoadReductions::LOAD_STORE) =>
        {
            let (store, 0, Operation::Store { ty: stored, nstates: 1 }) =
                producer_op(graph, origins[1])?
            else {
                return None;
            };
            if stored != ty || graph.input_origin(store, 0) != origins[0] {
                return None;
            }
            let value = graph.input_origin(store, 1);
            Some(SmallVec::from_slice(&[value, origins[1]]))
        }
        _ => None,
    }
}

/// Sweep every region bottom-up, re-offering each node to its normal form,
/// until no rule produces a further rewrite.
pub fn normalize(graph: &mut Graph) {
    while normalize_region(graph, graph.root()) {}
}

fn normalize_region(graph: &mut Graph, region: Region) -> bool {
    let mut changed = false;
    let mut traverser = BottomUpTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        for subregion in graph.node(node).kind.subregions().to_vec() {
            changed |= normalize_region(graph, subregion);
        }
        changed |= reduce_node(graph, node);
    }
    changed
}

/// Apply the enabled rules of the node's family once. Returns whether the
/// graph changed. The fixed rule order is: constant folding, canonical
/// ordering, memory-state rules, algebraic rules last.
pub fn reduce_node(graph: &mut Graph, node: Node) -> bool {
    if !graph.is_live(node) {
        return false;
    }
    match &graph.node(node).kind {
        NodeKind::Simple(op) => match op.clone() {
            Operation::Binary(kind, _) => reduce_binary(graph, node, kind),
            Operation::Unary(..) | Operation::Copy(_) | Operation::Match { .. } => {
                refold_via_create(graph, node)
            }
            Operation::Mux { .. } => reduce_mux(graph, node),
            Operation::Alloca { .. } => reduce_alloca(graph, node),
            Operation::Load { .. } => reduce_load(graph, node),
            Operation::Store { .. } => reduce_store(graph, node),
            _ => false,
        },
        NodeKind::Gamma { .. } => reduce_gamma(graph, node),
        _ => false,
    }
}

/// Re-offer an existing node to [on_create]; on success, divert its users to
/// the replacement outputs and remove it.
fn refold_via_create(graph: &mut Graph, node: Node) -> bool {
    let operation = graph.node(node).operation().unwrap().clone();
    let origins: Vec<Origin> = graph
        .node(node)
        .inputs
        .iter()
        .map(|input| input.origin)
        .collect();
    let region = graph.node(node).region;
    let Some(replacements) = on_create(graph, region, &operation, &origins) else {
        return false;
    };
    for (index, replacement) in replacements.iter().enumerate() {
        graph.divert_users(Origin::output(node, index), *replacement);
    }
    graph.remove_node(node);
    true
}

fn reduce_binary(graph: &mut Graph, node: Node, kind: crate::ops::BinaryKind) -> bool {
    if !graph.normal_forms.binary.mutable
        || !graph.normal_forms.binary.flags.contains(BinaryReductions::FOLD)
    {
        return false;
    }
    if refold_via_create(graph, node) {
        return true;
    }
    // Canonicalize commutative operands by origin identity order.
    if kind.is_commutative() {
        let lhs = graph.input_origin(node, 0);
        let rhs = graph.input_origin(node, 1);
        if lhs > rhs {
            graph.set_input_origin(node, 0, rhs);
            graph.set_input_origin(node, 1, lhs);
            return true;
        }
    }
    false
}

fn reduce_mux(graph: &mut Graph, node: Node) -> bool {
    let nf = &graph.normal_forms.mux;
    if !nf.mutable {
        return false;
    }
    let flags = nf.flags;
    let Some(Operation::Mux { ninputs, noutputs }) = graph.node(node).operation().cloned() else {
        unreachable!()
    };
    if noutputs != 1 {
        return false;
    }
    let origins: Vec<Origin> = graph
        .node(node)
        .inputs
        .iter()
        .map(|input| input.origin)
        .collect();

    if flags.contains(MuxReductions::MULTIPLE_ORIGIN) {
        let mut unique: Vec<Origin> = Vec::with_capacity(ninputs);
        for origin in &origins {
            if !unique.contains(origin) {
                unique.push(*origin);
            }
        }
        if unique.len() < ninputs {
            let region = graph.node(node).region;
            let replacement = if unique.len() == 1 {
                unique[0]
            } else {
                let mux = graph.add_node(
                    region,
                    Operation::Mux {
                        ninputs: unique.len(),
                        noutputs: 1,
                    },
                    &unique,
                );
                Origin::output(mux, 0)
            };
            graph.divert_users(Origin::output(node, 0), replacement);
            graph.remove_node(node);
            return true;
        }
    }

    if flags.contains(MuxReductions::MUX_MUX) {
        for (position, origin) in origins.iter().enumerate() {
            let Some((inner, _, Operation::Mux { noutputs: 1, .. })) = producer_op(graph, *origin)
            else {
                continue;
            };
            if inner == node || graph.nusers(*origin) != 1 {
                continue;
            }
            let mut spliced: Vec<Origin> = origins[..position].to_vec();
            spliced.extend(
                graph
                    .node(inner)
                    .inputs
                    .iter()
                    .map(|input| input.origin),
            );
            spliced.extend_from_slice(&origins[position + 1..]);
            let region = graph.node(node).region;
            let mux = graph.add_node(
                region,
                Operation::Mux {
                    ninputs: spliced.len(),
                    noutputs: 1,
                },
                &spliced,
            );
            graph.divert_users(Origin::output(node, 0), Origin::output(mux, 0));
            graph.remove_node(node);
            graph.remove_node(inner);
            return true;
        }
    }
    false
}

fn type_hash(ty: &crate::types::Type) -> u64 {
    let mut hasher = FxHasher::default();
    ty.hash(&mut hasher);
    hasher.finish()
}

fn reduce_alloca(graph: &mut Graph, node: Node) -> bool {
    let nf = &graph.normal_forms.alloca;
    if !nf.mutable || !nf.flags.contains(AllocaReductions::ALLOCA_ALLOCA) {
        return false;
    }
    // `node` consumes the state strand of an upstream alloca; commute the two
    // into canonical order (allocated type hash, then creation index).
    let state = graph.input_origin(node, 0);
    let Some((upstream, 1, Operation::Alloca { pointee: up_ty })) = producer_op(graph, state)
    else {
        return false;
    };
    let up_ty = up_ty.clone();
    if graph.nusers(state) != 1 {
        return false;
    }
    let Some(Operation::Alloca { pointee: my_ty }) = graph.node(node).operation().cloned() else {
        unreachable!()
    };
    let my_key = (type_hash(&my_ty), node);
    let up_key = (type_hash(&up_ty), upstream);
    if my_key >= up_key {
        return false;
    }
    let pre_state = graph.input_origin(upstream, 0);
    graph.set_input_origin(node, 0, pre_state);
    graph.divert_users(Origin::output(node, 1), Origin::output(upstream, 1));
    graph.set_input_origin(upstream, 0, Origin::output(node, 1));
    true
}

fn reduce_load(graph: &mut Graph, node: Node) -> bool {
    let nf = &graph.normal_forms.load;
    if !nf.mutable {
        return false;
    }
    let flags = nf.flags;
    if flags.contains(LoadReductions::LOAD_STORE) && refold_via_create(graph, node) {
        return true;
    }
    let Some(Operation::Load { ty, nstates }) = graph.node(node).operation().cloned() else {
        unreachable!()
    };
    if nstates != 1 {
        return false;
    }
    let address = graph.input_origin(node, 0);
    let state = graph.input_origin(node, 1);

    if flags.contains(LoadReductions::LOAD_ALLOCA)
        && let Some((alloca, 1, Operation::Alloca { .. })) = producer_op(graph, state)
        && !matches!(producer(address), Some((a, 0)) if a == alloca)
        && matches!(producer_op(graph, address), Some((_, 0, Operation::Alloca { .. })))
    {
        let pre_state = graph.input_origin(alloca, 0);
        graph.set_input_origin(node, 1, pre_state);
        return true;
    }

    if flags.contains(LoadReductions::LOAD_MUX)
        && let Some((mux, 0, Operation::Mux { noutputs: 1, .. })) = producer_op(graph, state)
        && graph.nusers(state) == 1
    {
        let strands: Vec<Origin> = graph
            .node(mux)
            .inputs
            .iter()
            .map(|input| input.origin)
            .collect();
        let region = graph.node(node).region;
        let mut operands = vec![address];
        operands.extend_from_slice(&strands);
        let load = graph.add_node(
            region,
            Operation::Load {
                ty,
                nstates: strands.len(),
            },
            &operands,
        );
        graph.divert_users(Origin::output(node, 0), Origin::output(load, 0));
        let outputs: Vec<Origin> =
            (0..strands.len()).map(|i| Origin::output(load, i + 1)).collect();
        let merge = graph.add_node(
            region,
            Operation::Mux {
                ninputs: strands.len(),
                noutputs: 1,
            },
            &outputs,
        );
        graph.divert_users(Origin::output(node, 1), Origin::output(merge, 0));
        graph.remove_node(node);
        graph.remove_node(mux);
        return true;
    }
    false
}

fn reduce_store(graph: &mut Graph, node: Node) -> bool {
    let nf = &graph.normal_forms.store;
    if !nf.mutable {
        return false;
    }
    let flags = nf.flags;
    let Some(Operation::Store { ty, nstates }) = graph.node(node).operation().cloned() else {
        unreachable!()
    };
    if nstates != 1 {
        return false;
    }
    let address = graph.input_origin(node, 0);
    let state = graph.input_origin(node, 2);

    if flags.contains(StoreReductions::STORE_STORE)
        && let Some((earlier, 0, Operation::Store { ty: earlier_ty, nstates: 1 })) =
            producer_op(graph, state)
        && *earlier_ty == ty
        && graph.input_origin(earlier, 0) == address
        && graph.nusers(state) == 1
    {
        let pre_state = graph.input_origin(earlier, 2);
        graph.set_input_origin(node, 2, pre_state);
        graph.remove_node(earlier);
        return true;
    }

    if flags.contains(StoreReductions::STORE_ALLOCA)
        && let Some((alloca, 1, Operation::Alloca { .. })) = producer_op(graph, state)
        && !matches!(producer(address), Some((a, 0)) if a == alloca)
        && matches!(producer_op(graph, address), Some((_, 0, Operation::Alloca { .. })))
    {
        let pre_state = graph.input_origin(alloca, 0);
        graph.set_input_origin(node, 2, pre_state);
        return true;
    }

    if flags.contains(StoreReductions::STORE_MUX)
        && let Some((mux, 0, Operation::Mux { noutputs: 1, .. })) = producer_op(graph, state)
        && graph.nusers(state) == 1
    {
        let strands: Vec<Origin> = graph
            .node(mux)
            .inputs
            .iter()
            .map(|input| input.origin)
            .collect();
        let value = graph.input_origin(node, 1);
        let region = graph.node(node).region;
        let mut operands = vec![address, value];
        operands.extend_from_slice(&strands);
        let store = graph.add_node(
            region,
            Operation::Store {
                ty,
                nstates: strands.len(),
            },
            &operands,
        );
        let outputs: Vec<Origin> =
            (0..strands.len()).map(|i| Origin::output(store, i)).collect();
        let merge = graph.add_node(
            region,
            Operation::Mux {
                ninputs: strands.len(),
                noutputs: 1,
            },
            &outputs,
        );
        graph.divert_users(Origin::output(node, 0), Origin::output(merge, 0));
        graph.remove_node(node);
        graph.remove_node(mux);
        return true;
    }
    false
}

fn reduce_gamma(graph: &mut Graph, node: Node) -> bool {
    let nf = &graph.normal_forms.gamma;
    if !nf.mutable {
        return false;
    }
    let flags = nf.flags;

    if flags.contains(GammaReductions::PREDICATE)
        && let Some(ConstantValue::Control { value, .. }) =
            constant_at(graph, graph.input_origin(node, 0))
    {
        let subregions = graph.gamma_subregions(node).to_vec();
        let chosen = subregions[value as usize];
        let region = graph.node(node).region;
        let mut subst = Substitution::default();
        for index in 1..graph.node(node).inputs.len() {
            subst.insert(
                Origin::argument(chosen, index - 1),
                graph.input_origin(node, index),
            );
        }
        copy_region_contents(graph, chosen, region, &mut subst);
        for index in 0..graph.node(node).outputs.len() {
            let replacement = subst.resolve(graph.result_origin(chosen, index));
            graph.divert_users(Origin::output(node, index), replacement);
        }
        graph.remove_node(node);
        return true;
    }

    if flags.contains(GammaReductions::CONTROL_CONSTANT) {
        let subregions = graph.gamma_subregions(node).to_vec();
        let region = graph.node(node).region;
        let mut changed = false;
        for index in 0..graph.node(node).outputs.len() {
            if graph.nusers(Origin::output(node, index)) == 0 {
                continue;
            }
            let mut constants = subregions
                .iter()
                .map(|sub| constant_at(graph, graph.result_origin(*sub, index)));
            let Some(Some(first @ ConstantValue::Control { .. })) = constants.next() else {
                continue;
            };
            if !constants.all(|c| c == Some(first.clone())) {
                continue;
            }
            let constant = graph.add_node(region, Operation::Constant(first), &[]);
            graph.divert_users(Origin::output(node, index), Origin::output(constant, 0));
            changed = true;
        }
        return changed;
    }
    false
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ops::{BinaryKind, Operation},
        rvsdg::node::User,
        types::Type,
    };

    fn int(graph: &mut Graph, region: Region, value: u64) -> Origin {
        let node = graph.add_node(
            region,
            Operation::Constant(ConstantValue::Int { bits: 32, value }),
            &[],
        );
        Origin::output(node, 0)
    }

    #[test]
    fn creation_folds_constants_when_mutable() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let a = int(&mut graph, root, 20);
        let b = int(&mut graph, root, 22);
        let outputs = graph.add_simple(root, Operation::Binary(BinaryKind::Add, Type::I32), &[a, b]);
        assert_eq!(
            constant_at(&graph, outputs[0]),
            Some(ConstantValue::Int { bits: 32, value: 42 })
        );
    }

    #[test]
    fn creation_leaves_nodes_alone_when_immutable() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = int(&mut graph, root, 20);
        let b = int(&mut graph, root, 22);
        let outputs = graph.add_simple(root, Operation::Binary(BinaryKind::Add, Type::I32), &[a, b]);
        assert_eq!(constant_at(&graph, outputs[0]), None);
    }

    #[test]
    fn load_after_store_forwards_the_value() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let state0 = graph.add_argument(root, Type::Memory);
        let alloca = graph.add_node(
            root,
            Operation::Alloca { pointee: Type::I32 },
            &[state0],
        );
        let value = int(&mut graph, root, 7);
        let store = graph.add_node(
            root,
            Operation::Store {
                ty: Type::I32,
                nstates: 1,
            },
            &[Origin::output(alloca, 0), value, Origin::output(alloca, 1)],
        );
        let outputs = graph.add_simple(
            root,
            Operation::Load {
                ty: Type::I32,
                nstates: 1,
            },
            &[Origin::output(alloca, 0), Origin::output(store, 0)],
        );
        assert_eq!(outputs[0], value);
        assert_eq!(outputs[1], Origin::output(store, 0));
    }

    #[test]
    fn overwritten_store_is_elided() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let state0 = graph.add_argument(root, Type::Memory);
        let alloca = graph.add_node(root, Operation::Alloca { pointee: Type::I32 }, &[state0]);
        let pointer = Origin::output(alloca, 0);
        let v1 = int(&mut graph, root, 1);
        let v2 = int(&mut graph, root, 2);
        let first = graph.add_node(
            root,
            Operation::Store {
                ty: Type::I32,
                nstates: 1,
            },
            &[pointer, v1, Origin::output(alloca, 1)],
        );
        let second = graph.add_node(
            root,
            Operation::Store {
                ty: Type::I32,
                nstates: 1,
            },
            &[pointer, v2, Origin::output(first, 0)],
        );
        graph.add_result(root, Origin::output(second, 0));
        normalize(&mut graph);
        assert!(!graph.is_live(first));
        assert_eq!(graph.input_origin(second, 2), Origin::output(alloca, 1));
    }

    #[test]
    fn mux_of_mux_flattens() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let s0 = graph.add_argument(root, Type::Memory);
        let s1 = graph.add_argument(root, Type::Memory);
        let s2 = graph.add_argument(root, Type::Memory);
        let inner = graph.add_node(
            root,
            Operation::Mux {
                ninputs: 2,
                noutputs: 1,
            },
            &[s0, s1],
        );
        let outer = graph.add_node(
            root,
            Operation::Mux {
                ninputs: 2,
                noutputs: 1,
            },
            &[Origin::output(inner, 0), s2],
        );
        graph.add_result(root, Origin::output(outer, 0));
        normalize(&mut graph);
        assert!(!graph.is_live(inner));
        assert!(!graph.is_live(outer));
        let merged = match graph.result_origin(root, 0) {
            Origin::Output { node, .. } => node,
            origin => panic!("expected a mux output, found {origin:?}"),
        };
        assert_eq!(
            graph.node(merged).operation(),
            Some(&Operation::Mux {
                ninputs: 3,
                noutputs: 1
            })
        );
    }

    #[test]
    fn constant_gamma_predicate_inlines_the_taken_case() {
        let mut graph = Graph::new();
        let root = graph.root();
        let predicate = graph.add_node(
            root,
            Operation::Constant(ConstantValue::Control {
                alternatives: 2,
                value: 1,
            }),
            &[],
        );
        let value = int(&mut graph, root, 5);
        let gamma = graph.add_gamma(root, Origin::output(predicate, 0), 2);
        let arguments = graph.gamma_add_entry_var(gamma, value);
        let subregions = graph.gamma_subregions(gamma).to_vec();
        // Case 0 returns the argument; case 1 returns argument + 1.
        let one = {
            let node = graph.add_node(
                subregions[1],
                Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
                &[],
            );
            Origin::output(node, 0)
        };
        let sum = graph.add_node(
            subregions[1],
            Operation::Binary(BinaryKind::Add, Type::I32),
            &[arguments[1], one],
        );
        let output = graph.gamma_add_exit_var(gamma, &[arguments[0], Origin::output(sum, 0)]);
        graph.add_result(root, output);

        graph.normal_forms.enable_all();
        normalize(&mut graph);

        assert!(!graph.is_live(gamma));
        assert_eq!(
            constant_at(&graph, graph.result_origin(root, 0)),
            Some(ConstantValue::Int { bits: 32, value: 6 })
        );
    }

    #[test]
    fn normalize_reaches_a_fixpoint() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let a = int(&mut graph, root, 3);
        let b = int(&mut graph, root, 4);
        let sum = graph.add_simple(root, Operation::Binary(BinaryKind::Add, Type::I32), &[a, b]);
        let product =
            graph.add_simple(root, Operation::Binary(BinaryKind::Mul, Type::I32), &[sum[0], b]);
        graph.add_result(root, product[0]);
        normalize(&mut graph);
        // A second sweep over every node must not change anything further.
        for region in graph.all_regions() {
            for node in graph.region(region).nodes.clone() {
                assert!(!reduce_node(&mut graph, node), "rule fired after fixpoint");
            }
        }
        assert_eq!(
            constant_at(&graph, graph.result_origin(root, 0)),
            Some(ConstantValue::Int { bits: 32, value: 28 })
        );
    }

    #[test]
    fn commutative_operands_are_canonicalized() {
        let mut graph = Graph::new();
        graph.normal_forms.enable_all();
        let root = graph.root();
        let x = graph.add_argument(root, Type::I32);
        let y = graph.add_argument(root, Type::I32);
        let node = graph.add_node(
            root,
            Operation::Binary(BinaryKind::Add, Type::I32),
            &[y, x],
        );
        graph.add_result(root, Origin::output(node, 0));
        normalize(&mut graph);
        assert_eq!(graph.input_origin(node, 0), x);
        assert_eq!(graph.input_origin(node, 1), y);
        assert_eq!(graph.users(x), &[User::Input { node, index: 0 }]);
    }
}
