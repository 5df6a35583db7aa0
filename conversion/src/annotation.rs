//! Variable-demand annotation: a backward liveness-style fixpoint over the
//! aggregation tree.
//!
//! Each tree node is annotated with the variables demanded at its entry
//! (`top`) and exit (`bottom`); branch nodes additionally record the demand
//! around their cases. Loops are evaluated twice when the first pass grows
//! the demand set; the second pass must reach the fixpoint, since the set
//! only grows and is bounded by the variable count.

use rustc_hash::{FxHashMap, FxHashSet};

use rvopt_ir::tac::{BasicBlock, Variable};

use crate::aggregation::{AggregationTree, Structure, StructureId};

pub type DemandedSet = FxHashSet<Variable>;

/// The demand recorded for one aggregation-tree node.
#[derive(Debug, Clone, Default)]
pub struct DemandSet {
    /// Variables demanded at the node's entry.
    pub top: DemandedSet,
    /// Variables demanded at the node's exit.
    pub bottom: DemandedSet,
    /// For branches: demand at the entry of the cases (after the split block
    /// has been accounted for, this is the union of the case tops).
    pub cases_top: DemandedSet,
    /// For branches: demand at the exit of the cases.
    pub cases_bottom: DemandedSet,
}

/// One entry per aggregation-tree node after annotation.
pub type DemandMap = FxHashMap<StructureId, DemandSet>;

/// Annotate the whole tree; the demanded set starts empty below the root.
pub fn annotate(tree: &AggregationTree) -> DemandMap {
    let mut demanded = DemandedSet::default();
    let mut map = DemandMap::default();
    annotate_node(tree, tree.root(), &mut demanded, &mut map);
    map
}

/// Apply the backward transfer function of one basic block:
/// `pds := (pds \ defs(tac)) ∪ uses(tac)`, walking the block in reverse.
pub fn block_transfer(block: &BasicBlock, demanded: &mut DemandedSet) {
    for tac in block.iter().rev() {
        for result in &tac.results {
            demanded.remove(result);
        }
        for operand in &tac.operands {
            demanded.insert(*operand);
        }
    }
}

fn annotate_node(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    if let Some(existing) = map.get(&id)
        && existing.top == *demanded
    {
        return;
    }
    match &tree.node(id).structure {
        Structure::Entry { .. } => annotate_entry(tree, id, demanded, map),
        Structure::Exit { .. } => annotate_exit(tree, id, demanded, map),
        Structure::Block(_) => annotate_block(tree, id, demanded, map),
        Structure::Linear => annotate_linear(tree, id, demanded, map),
        Structure::Branch { .. } => annotate_branch(tree, id, demanded, map),
        Structure::Loop { .. } => annotate_loop(tree, id, demanded, map),
    }
}

fn annotate_entry(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let Structure::Entry { arguments } = &tree.node(id).structure else {
        unreachable!()
    };
    let bottom = demanded.clone();
    for argument in arguments {
        demanded.remove(argument);
    }
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            ..DemandSet::default()
        },
    );
}

fn annotate_exit(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let Structure::Exit { results } = &tree.node(id).structure else {
        unreachable!()
    };
    let bottom = demanded.clone();
    for result in results {
        demanded.insert(*result);
    }
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            ..DemandSet::default()
        },
    );
}

fn annotate_block(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let Structure::Block(block) = &tree.node(id).structure else {
        unreachable!()
    };
    let bottom = demanded.clone();
    block_transfer(block, demanded);
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            ..DemandSet::default()
        },
    );
}

fn annotate_linear(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let bottom = demanded.clone();
    for child in tree.node(id).children.iter().rev() {
        annotate_node(tree, *child, demanded, map);
    }
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            ..DemandSet::default()
        },
    );
}

fn annotate_branch(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let Structure::Branch { split, join } = &tree.node(id).structure else {
        unreachable!()
    };
    let bottom = demanded.clone();
    block_transfer(join, demanded);
    let cases_bottom = demanded.clone();

    let mut cases_top = DemandedSet::default();
    for child in &tree.node(id).children {
        let mut case_demanded = demanded.clone();
        annotate_node(tree, *child, &mut case_demanded, map);
        cases_top.extend(case_demanded);
    }
    *demanded = cases_top.clone();

    block_transfer(split, demanded);
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            cases_top,
            cases_bottom,
        },
    );
}

fn annotate_loop(
    tree: &AggregationTree,
    id: StructureId,
    demanded: &mut DemandedSet,
    map: &mut DemandMap,
) {
    let child = tree.node(id).children[0];
    let bottom = demanded.clone();
    annotate_node(tree, child, demanded, map);
    if bottom != *demanded {
        // The demand grew across the back edge; re-evaluate once with the
        // widened set, which must be the fixpoint.
        let widened = demanded.clone();
        annotate_node(tree, child, demanded, map);
        debug_assert_eq!(&widened, demanded, "loop demand failed to reach a fixpoint");
    }
    // `top` is the loop-entry demand; `bottom` keeps the post-loop demand so
    // construction can route values that are defined inside the loop but
    // only read after it.
    map.insert(
        id,
        DemandSet {
            top: demanded.clone(),
            bottom,
            ..DemandSet::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use rvopt_ir::{
        Operation, Type,
        ops::BinaryKind,
        tac::{Tac, VariableTable},
    };

    use super::*;

    #[test]
    fn block_transfer_matches_the_equation() {
        let mut variables = VariableTable::new();
        let x = variables.add("x", Type::I32);
        let y = variables.add("y", Type::I32);
        let z = variables.add("z", Type::I32);
        let mut block = BasicBlock::new();
        // z = x + y
        block.append(Tac::new(
            Operation::Binary(BinaryKind::Add, Type::I32),
            [x, y],
            [z],
        ));

        let mut demanded: DemandedSet = [z].into_iter().collect();
        block_transfer(&block, &mut demanded);
        let expected: DemandedSet = [x, y].into_iter().collect();
        assert_eq!(demanded, expected);
    }

    #[test]
    fn defs_kill_before_uses_gen() {
        let mut variables = VariableTable::new();
        let x = variables.add("x", Type::I32);
        let mut block = BasicBlock::new();
        // x = x + x: the use survives the kill
        block.append(Tac::new(
            Operation::Binary(BinaryKind::Add, Type::I32),
            [x, x],
            [x],
        ));
        let mut demanded: DemandedSet = [x].into_iter().collect();
        block_transfer(&block, &mut demanded);
        assert!(demanded.contains(&x));
    }
}
