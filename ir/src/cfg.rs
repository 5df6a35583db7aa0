use cranelift_entity::{PrimaryMap, entity_impl};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::tac::{BasicBlock, Variable, VariableTable};

/// A node of the control-flow graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNode(u32);
entity_impl!(CfgNode, "bb");

/// What a CFG node holds: the entry sentinel carrying the function's
/// arguments, the exit sentinel carrying its results, or a basic block.
#[derive(Debug, Clone)]
pub enum CfgAttribute {
    Entry { arguments: Vec<Variable> },
    Exit { results: Vec<Variable> },
    Block(BasicBlock),
}

#[derive(Debug, Clone)]
pub struct CfgNodeData {
    pub attribute: CfgAttribute,
    /// Ordered successors; for a block ending in a branch, successor `i` is
    /// taken on control alternative `i`.
    pub successors: SmallVec<[CfgNode; 2]>,
}

/// A mutable control-flow graph of typed basic blocks, together with the
/// variable table of the enclosing function.
///
/// The graph must be reducible; aggregation rejects it otherwise.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    nodes: PrimaryMap<CfgNode, CfgNodeData>,
    entry: CfgNode,
    exit: CfgNode,
    pub variables: VariableTable,
}

impl ControlFlowGraph {
    pub fn new(arguments: Vec<Variable>, results: Vec<Variable>, variables: VariableTable) -> Self {
        let mut nodes = PrimaryMap::new();
        let entry = nodes.push(CfgNodeData {
            attribute: CfgAttribute::Entry { arguments },
            successors: SmallVec::new(),
        });
        let exit = nodes.push(CfgNodeData {
            attribute: CfgAttribute::Exit { results },
            successors: SmallVec::new(),
        });
        Self {
            nodes,
            entry,
            exit,
            variables,
        }
    }

    pub fn entry(&self) -> CfgNode {
        self.entry
    }

    pub fn exit(&self) -> CfgNode {
        self.exit
    }

    pub fn add_block(&mut self, block: BasicBlock) -> CfgNode {
        self.nodes.push(CfgNodeData {
            attribute: CfgAttribute::Block(block),
            successors: SmallVec::new(),
        })
    }

    pub fn node(&self, node: CfgNode) -> &CfgNodeData {
        &self.nodes[node]
    }

    pub fn node_mut(&mut self, node: CfgNode) -> &mut CfgNodeData {
        &mut self.nodes[node]
    }

    pub fn block(&self, node: CfgNode) -> &BasicBlock {
        match &self.nodes[node].attribute {
            CfgAttribute::Block(block) => block,
            _ => panic!("expected basic block"),
        }
    }

    /// Append a successor edge.
    pub fn connect(&mut self, from: CfgNode, to: CfgNode) {
        self.nodes[from].successors.push(to);
    }

    /// Replace the result vector of the exit sentinel.
    pub fn set_results(&mut self, results: Vec<Variable>) {
        match &mut self.nodes[self.exit].attribute {
            CfgAttribute::Exit { results: r } => *r = results,
            _ => unreachable!("exit sentinel is always an exit attribute"),
        }
    }

    pub fn successors(&self, node: CfgNode) -> &[CfgNode] {
        &self.nodes[node].successors
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CfgNode, &CfgNodeData)> {
        self.nodes.iter()
    }

    /// Reverse postorder of the nodes reachable from the entry.
    pub fn reverse_postorder(&self) -> Vec<CfgNode> {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::with_capacity(self.nodes.len());
        // Iterative DFS keeping an explicit successor cursor per frame.
        let mut stack: Vec<(CfgNode, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry);
        while let Some((node, cursor)) = stack.last_mut() {
            let successors = &self.nodes[*node].successors;
            if *cursor < successors.len() {
                let next = successors[*cursor];
                *cursor += 1;
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                postorder.push(*node);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }
}
