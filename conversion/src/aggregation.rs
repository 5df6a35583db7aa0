//! Structural decomposition of a reducible CFG into a tree of
//! `{entry, exit, block, linear, branch, loop}` structures.
//!
//! The algorithm is a classical T1/T2-style reduction: single-entry
//! single-successor pairs collapse into `linear`, reconverging diamonds into
//! `branch`, and self-edges (introduced by earlier collapses) into `loop`.
//! Candidates are scanned in reverse postorder of the head node. If no
//! reduction applies before the graph is a single vertex, the CFG is
//! irreducible.

use cranelift_entity::{PrimaryMap, entity_impl};
use rustc_hash::FxHashMap;

use rvopt_ir::{
    IrError, Operation,
    cfg::{CfgAttribute, CfgNode, ControlFlowGraph},
    tac::{BasicBlock, Variable},
};

/// A node of the aggregation tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(u32);
entity_impl!(StructureId, "structure");

/// What an aggregation-tree node represents.
#[derive(Debug, Clone)]
pub enum Structure {
    /// The function entry, wrapping its argument vector.
    Entry { arguments: Vec<Variable> },
    /// The function exit, wrapping its result vector.
    Exit { results: Vec<Variable> },
    /// A single basic block.
    Block(BasicBlock),
    /// Sequential composition of the children.
    Linear,
    /// A diamond: the split and join blocks plus one child per case, in
    /// control-alternative order.
    Branch { split: BasicBlock, join: BasicBlock },
    /// A tail-controlled loop around the single child. `predicate` is the
    /// control variable of the back-edge branch; alternative 1 repeats.
    Loop { predicate: Variable },
}

#[derive(Debug)]
pub struct StructureNode {
    pub structure: Structure,
    pub children: Vec<StructureId>,
}

/// The aggregation tree of one function.
pub struct AggregationTree {
    nodes: PrimaryMap<StructureId, StructureNode>,
    root: StructureId,
}

impl AggregationTree {
    pub fn root(&self) -> StructureId {
        self.root
    }

    pub fn node(&self, id: StructureId) -> &StructureNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids of the tree.
    pub fn ids(&self) -> impl Iterator<Item = StructureId> + '_ {
        self.nodes.keys()
    }
}

struct Vertex {
    tree: StructureId,
    /// Ordered successors; the order carries the control alternative of the
    /// terminating branch.
    succs: Vec<usize>,
    rpo: usize,
    alive: bool,
}

struct Reducer {
    nodes: PrimaryMap<StructureId, StructureNode>,
    vertices: Vec<Vertex>,
}

/// Aggregate a reducible CFG into its structure tree.
pub fn aggregate(cfg: &ControlFlowGraph, function: &str) -> Result<AggregationTree, IrError> {
    let rpo = cfg.reverse_postorder();
    if rpo.len() != cfg.len() {
        return Err(IrError::InvalidInput(format!(
            "unreachable control flow in function '{function}'"
        )));
    }

    let mut nodes = PrimaryMap::new();
    let mut index_of: FxHashMap<CfgNode, usize> = FxHashMap::default();
    let mut vertices = Vec::with_capacity(rpo.len());
    for (position, cfg_node) in rpo.iter().enumerate() {
        let structure = match &cfg.node(*cfg_node).attribute {
            CfgAttribute::Entry { arguments } => Structure::Entry {
                arguments: arguments.clone(),
            },
            CfgAttribute::Exit { results } => Structure::Exit {
                results: results.clone(),
            },
            CfgAttribute::Block(block) => Structure::Block(block.clone()),
        };
        let tree = nodes.push(StructureNode {
            structure,
            children: Vec::new(),
        });
        index_of.insert(*cfg_node, position);
        vertices.push(Vertex {
            tree,
            succs: Vec::new(),
            rpo: position,
            alive: true,
        });
    }
    for (position, cfg_node) in rpo.iter().enumerate() {
        vertices[position].succs = cfg
            .successors(*cfg_node)
            .iter()
            .map(|succ| index_of[succ])
            .collect();
    }

    let mut reducer = Reducer { nodes, vertices };
    reducer.run(function)?;
    let root = reducer.single_remaining_tree();
    Ok(AggregationTree {
        nodes: reducer.nodes,
        root,
    })
}

impl Reducer {
    fn run(&mut self, function: &str) -> Result<(), IrError> {
        loop {
            if self.alive_count() == 1 {
                return Ok(());
            }
            let mut reduced = false;
            let mut order: Vec<usize> =
                (0..self.vertices.len()).filter(|v| self.vertices[*v].alive).collect();
            order.sort_by_key(|v| self.vertices[*v].rpo);
            for vertex in order {
                if self.reduce_loop(vertex)?
                    || self.reduce_branch(vertex)?
                    || self.reduce_linear(vertex)
                {
                    reduced = true;
                    break;
                }
            }
            if !reduced {
                return Err(IrError::IrreducibleCfg {
                    function: function.to_string(),
                });
            }
        }
    }

    fn alive_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.alive).count()
    }

    fn single_remaining_tree(&self) -> StructureId {
        let mut alive = self.vertices.iter().filter(|v| v.alive);
        let vertex = alive.next().expect("reduction left no vertex");
        debug_assert!(alive.next().is_none());
        vertex.tree
    }

    fn predecessors(&self, vertex: usize) -> Vec<usize> {
        let mut preds = Vec::new();
        for (index, v) in self.vertices.iter().enumerate() {
            if !v.alive {
                continue;
            }
            for succ in &v.succs {
                if *succ == vertex {
                    preds.push(index);
                }
            }
        }
        preds
    }

    /// T1: a self-edge collapses into a `loop` structure.
    fn reduce_loop(&mut self, vertex: usize) -> Result<bool, IrError> {
        if !self.vertices[vertex].succs.contains(&vertex) {
            return Ok(false);
        }
        let body = self.vertices[vertex].tree;
        let predicate = self.back_edge_predicate(body)?;
        let looped = self.nodes.push(StructureNode {
            structure: Structure::Loop { predicate },
            children: vec![body],
        });
        let v = &mut self.vertices[vertex];
        v.tree = looped;
        v.succs.retain(|succ| *succ != vertex);
        Ok(true)
    }

    /// The control variable of the 2-way branch terminating the rightmost
    /// block of `tree`. When the body ends in a branch structure, the
    /// repetition branch sits in its join block.
    fn back_edge_predicate(&self, tree: StructureId) -> Result<Variable, IrError> {
        let mut id = tree;
        loop {
            let node = &self.nodes[id];
            let tail = match &node.structure {
                Structure::Block(block) => block,
                Structure::Branch { join, .. } => join,
                Structure::Linear => {
                    id = *node.children.last().expect("empty linear structure");
                    continue;
                }
                _ => {
                    return Err(IrError::InvalidInput(
                        "loop body does not end in a basic block".to_string(),
                    ));
                }
            };
            return match tail.last().map(|tac| &tac.operation) {
                Some(Operation::Branch { alternatives: 2 }) => Ok(tail.last().unwrap().operands[0]),
                _ => Err(IrError::InvalidInput(
                    "loop tail block lacks a 2-way repetition branch".to_string(),
                )),
            };
        }
    }

    /// T2 (diamond): `vertex` is a split whose cases reconverge at one join.
    fn reduce_branch(&mut self, vertex: usize) -> Result<bool, IrError> {
        let cases = self.vertices[vertex].succs.clone();
        if cases.len() < 2 {
            return Ok(false);
        }
        // All cases distinct, none the split itself.
        for (position, case) in cases.iter().enumerate() {
            if *case == vertex || cases[..position].contains(case) {
                return Ok(false);
            }
        }
        // Every case: single predecessor (the split), single successor, and
        // one common join.
        let mut join = None;
        for case in &cases {
            let succs = &self.vertices[*case].succs;
            if succs.len() != 1 || self.predecessors(*case) != vec![vertex] {
                return Ok(false);
            }
            match join {
                None => join = Some(succs[0]),
                Some(j) if j == succs[0] => {}
                Some(_) => return Ok(false),
            }
        }
        let join = join.unwrap();
        if join == vertex || cases.contains(&join) {
            return Ok(false);
        }
        // The join's predecessors are exactly the cases.
        let mut join_preds = self.predecessors(join);
        join_preds.sort_unstable();
        let mut sorted_cases = cases.clone();
        sorted_cases.sort_unstable();
        if join_preds != sorted_cases {
            return Ok(false);
        }
        // The split block is the rightmost block of the split vertex, the
        // join block the leftmost block of the join vertex. Probe both before
        // detaching anything.
        if !self.edge_block_exists(self.vertices[vertex].tree, true)
            || !self.edge_block_exists(self.vertices[join].tree, false)
        {
            return Ok(false);
        }
        let (split_rest, split_block) = self
            .take_last_block(self.vertices[vertex].tree)
            .expect("probed split block");
        let (join_rest, join_block) = self
            .take_first_block(self.vertices[join].tree)
            .expect("probed join block");

        let branch = self.nodes.push(StructureNode {
            structure: Structure::Branch {
                split: split_block,
                join: join_block,
            },
            children: cases.iter().map(|case| self.vertices[*case].tree).collect(),
        });
        let mut sequence = Vec::new();
        if let Some(rest) = split_rest {
            sequence.push(rest);
        }
        sequence.push(branch);
        if let Some(rest) = join_rest {
            sequence.push(rest);
        }
        let tree = if sequence.len() == 1 {
            sequence[0]
        } else {
            self.linear(sequence)
        };

        let join_succs = self.vertices[join].succs.clone();
        for case in &cases {
            self.vertices[*case].alive = false;
        }
        self.vertices[join].alive = false;
        let v = &mut self.vertices[vertex];
        v.tree = tree;
        v.succs = join_succs
            .into_iter()
            .map(|succ| if succ == join { vertex } else { succ })
            .collect();
        Ok(true)
    }

    /// T2 (sequence): `vertex` has a single successor whose only predecessor
    /// is `vertex`.
    fn reduce_linear(&mut self, vertex: usize) -> bool {
        let succs = &self.vertices[vertex].succs;
        if succs.len() != 1 {
            return false;
        }
        let next = succs[0];
        if next == vertex || self.predecessors(next) != vec![vertex] {
            return false;
        }
        let head = self.vertices[vertex].tree;
        let tail = self.vertices[next].tree;
        let tree = self.linear(vec![head, tail]);
        let next_succs = self.vertices[next].succs.clone();
        self.vertices[next].alive = false;
        let v = &mut self.vertices[vertex];
        v.tree = tree;
        v.succs = next_succs
            .into_iter()
            .map(|succ| if succ == next { vertex } else { succ })
            .collect();
        true
    }

    /// Compose trees sequentially, splicing nested `linear` children.
    fn linear(&mut self, parts: Vec<StructureId>) -> StructureId {
        let mut children = Vec::new();
        for part in parts {
            if matches!(self.nodes[part].structure, Structure::Linear) {
                children.append(&mut self.nodes[part].children.clone());
            } else {
                children.push(part);
            }
        }
        self.nodes.push(StructureNode {
            structure: Structure::Linear,
            children,
        })
    }

    /// Whether the rightmost (or leftmost) leaf of `tree` is a basic block.
    fn edge_block_exists(&self, tree: StructureId, rightmost: bool) -> bool {
        let mut id = tree;
        loop {
            let node = &self.nodes[id];
            match &node.structure {
                Structure::Block(_) => return true,
                Structure::Linear => {
                    let child = if rightmost {
                        node.children.last()
                    } else {
                        node.children.first()
                    };
                    match child {
                        Some(child) => id = *child,
                        None => return false,
                    }
                }
                _ => return false,
            }
        }
    }

    /// Detach the rightmost block of `tree`; returns the remaining tree (if
    /// any) and the block. Fails when the rightmost leaf is not a block.
    fn take_last_block(&mut self, tree: StructureId) -> Option<(Option<StructureId>, BasicBlock)> {
        match &self.nodes[tree].structure {
            Structure::Block(block) => {
                let block = block.clone();
                Some((None, block))
            }
            Structure::Linear => {
                let last = *self.nodes[tree].children.last()?;
                let (rest, block) = self.take_last_block(last)?;
                match rest {
                    Some(rest) => {
                        *self.nodes[tree].children.last_mut().unwrap() = rest;
                    }
                    None => {
                        self.nodes[tree].children.pop();
                    }
                }
                let remaining = match self.nodes[tree].children.len() {
                    0 => None,
                    1 => Some(self.nodes[tree].children[0]),
                    _ => Some(tree),
                };
                Some((remaining, block))
            }
            _ => None,
        }
    }

    /// Detach the leftmost block of `tree`; dual of [Reducer::take_last_block].
    fn take_first_block(&mut self, tree: StructureId) -> Option<(Option<StructureId>, BasicBlock)> {
        match &self.nodes[tree].structure {
            Structure::Block(block) => {
                let block = block.clone();
                Some((None, block))
            }
            Structure::Linear => {
                let first = *self.nodes[tree].children.first()?;
                let (rest, block) = self.take_first_block(first)?;
                match rest {
                    Some(rest) => {
                        self.nodes[tree].children[0] = rest;
                    }
                    None => {
                        self.nodes[tree].children.remove(0);
                    }
                }
                let remaining = match self.nodes[tree].children.len() {
                    0 => None,
                    1 => Some(self.nodes[tree].children[0]),
                    _ => Some(tree),
                };
                Some((remaining, block))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rvopt_ir::{
        Operation, Type,
        ops::{BinaryKind, ConstantValue},
        tac::{BasicBlock, Tac, VariableTable},
    };

    use super::*;

    fn branch_tac(predicate: Variable, alternatives: u32) -> Tac {
        Tac::new(Operation::Branch { alternatives }, [predicate], [])
    }

    #[test]
    fn straight_line_aggregates_to_linear() {
        let mut variables = VariableTable::new();
        let c = variables.add("c", Type::I32);
        let mut block = BasicBlock::new();
        block.append(Tac::new(
            Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
            [],
            [c],
        ));
        let mut cfg = ControlFlowGraph::new(vec![], vec![c], variables);
        let body = cfg.add_block(block);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);

        let tree = aggregate(&cfg, "f").unwrap();
        let root = tree.node(tree.root());
        assert!(matches!(root.structure, Structure::Linear));
        assert_eq!(root.children.len(), 3);
        assert!(matches!(
            tree.node(root.children[0]).structure,
            Structure::Entry { .. }
        ));
        assert!(matches!(
            tree.node(root.children[1]).structure,
            Structure::Block(_)
        ));
        assert!(matches!(
            tree.node(root.children[2]).structure,
            Structure::Exit { .. }
        ));
    }

    #[test]
    fn diamond_aggregates_to_branch() {
        let mut variables = VariableTable::new();
        let a = variables.add("a", Type::I32);
        let p = variables.add("p", Type::control(2));
        let r = variables.add("r", Type::I32);
        let one = variables.add("one", Type::I32);

        let mut split = BasicBlock::new();
        split.append(branch_tac(p, 2));
        let mut case0 = BasicBlock::new();
        case0.append(Tac::new(
            Operation::Binary(BinaryKind::Add, Type::I32),
            [a, one],
            [r],
        ));
        let mut case1 = BasicBlock::new();
        case1.append(Tac::new(
            Operation::Binary(BinaryKind::Sub, Type::I32),
            [a, one],
            [r],
        ));
        let join = BasicBlock::new();

        let mut cfg = ControlFlowGraph::new(vec![a, p, one], vec![r], variables);
        let split = cfg.add_block(split);
        let case0 = cfg.add_block(case0);
        let case1 = cfg.add_block(case1);
        let join = cfg.add_block(join);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, split);
        cfg.connect(split, case0);
        cfg.connect(split, case1);
        cfg.connect(case0, join);
        cfg.connect(case1, join);
        cfg.connect(join, exit);

        let tree = aggregate(&cfg, "f").unwrap();
        let root = tree.node(tree.root());
        assert!(matches!(root.structure, Structure::Linear));
        let branch = root
            .children
            .iter()
            .find(|id| matches!(tree.node(**id).structure, Structure::Branch { .. }))
            .expect("no branch structure");
        assert_eq!(tree.node(*branch).children.len(), 2);
    }

    #[test]
    fn self_loop_aggregates_to_loop() {
        let mut variables = VariableTable::new();
        let q = variables.add("q", Type::control(2));
        let r = variables.add("r", Type::I32);

        let mut body = BasicBlock::new();
        body.append(branch_tac(q, 2));
        let mut cfg = ControlFlowGraph::new(vec![r, q], vec![r], variables);
        let body = cfg.add_block(body);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        cfg.connect(body, body);

        let tree = aggregate(&cfg, "f").unwrap();
        let root = tree.node(tree.root());
        let looped = root
            .children
            .iter()
            .find(|id| matches!(tree.node(**id).structure, Structure::Loop { .. }))
            .expect("no loop structure");
        let Structure::Loop { predicate } = tree.node(*looped).structure else {
            unreachable!()
        };
        assert_eq!(predicate, q);
    }

    #[test]
    fn irreducible_control_flow_is_rejected() {
        // Two blocks jumping into each other's middle: a two-entry cycle.
        let mut variables = VariableTable::new();
        let p = variables.add("p", Type::control(2));
        let r = variables.add("r", Type::I32);
        let mut head = BasicBlock::new();
        head.append(branch_tac(p, 2));
        let mut left = BasicBlock::new();
        left.append(branch_tac(p, 2));
        let mut right = BasicBlock::new();
        right.append(branch_tac(p, 2));

        let mut cfg = ControlFlowGraph::new(vec![p, r], vec![r], variables);
        let head = cfg.add_block(head);
        let left = cfg.add_block(left);
        let right = cfg.add_block(right);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, head);
        cfg.connect(head, left);
        cfg.connect(head, right);
        cfg.connect(left, right);
        cfg.connect(left, exit);
        cfg.connect(right, left);
        cfg.connect(right, exit);

        assert!(matches!(
            aggregate(&cfg, "f"),
            Err(IrError::IrreducibleCfg { .. })
        ));
    }
}
