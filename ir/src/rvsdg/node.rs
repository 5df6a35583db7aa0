use cranelift_entity::entity_impl;

use crate::{
    ops::Operation,
    types::{FunctionType, Linkage, Type},
};

/// A node in the graph arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "node");

/// A region in the graph arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(u32);
entity_impl!(Region, "region");

/// The producer side of an edge: a node output or a region argument.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Origin {
    Output { node: Node, index: usize },
    Argument { region: Region, index: usize },
}

impl Origin {
    pub fn output(node: Node, index: usize) -> Origin {
        Origin::Output { node, index }
    }

    pub fn argument(region: Region, index: usize) -> Origin {
        Origin::Argument { region, index }
    }
}

/// The consumer side of an edge: a node input or a region result.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum User {
    Input { node: Node, index: usize },
    Result { region: Region, index: usize },
}

/// A node input; holds the origin it consumes.
#[derive(Debug, Clone)]
pub struct InputData {
    pub origin: Origin,
}

/// A node output; holds its type and the ordered list of users.
#[derive(Debug, Clone)]
pub struct OutputData {
    pub ty: Type,
    pub users: Vec<User>,
}

/// A region argument; holds its type and the ordered list of users.
///
/// Whether an argument has an associated input on the enclosing structural
/// node is positional, by node kind: gamma argument `i` corresponds to input
/// `i + 1` of the gamma, theta and delta argument `i` to input `i`, lambda
/// argument `i < ncontext` to input `i`, phi argument `i >= nrec` to input
/// `i - nrec`. Remaining arguments (function parameters, recursion variables,
/// root-region imports) import nothing.
#[derive(Debug, Clone)]
pub struct ArgumentData {
    pub ty: Type,
    pub users: Vec<User>,
}

/// A region result; holds the origin it consumes.
#[derive(Debug, Clone)]
pub struct ResultData {
    pub origin: Origin,
}

/// Payload of a lambda node.
#[derive(Debug, Clone)]
pub struct LambdaData {
    pub name: String,
    pub linkage: Linkage,
    pub signature: FunctionType,
    pub subregion: Region,
    /// Number of leading context-variable arguments (and inputs).
    pub ncontext: usize,
}

/// Payload of a delta node.
#[derive(Debug, Clone)]
pub struct DeltaData {
    pub name: String,
    pub linkage: Linkage,
    pub constant: bool,
    pub ty: Type,
    pub subregion: Region,
}

/// The kind of a node: a simple operation, or one of the structural variants
/// enclosing subregions.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Simple(Operation),
    /// N-way conditional. Input 0 is the predicate; inputs 1..k are entry
    /// variables exposed as arguments of every subregion; each subregion's
    /// results correspond 1:1 to the gamma's outputs.
    Gamma { subregions: Vec<Region> },
    /// Tail-controlled loop. `ninputs == noutputs == k`; the subregion has
    /// `k` arguments and `k + 1` results, result 0 being the 2-way
    /// continuation predicate.
    Theta { subregion: Region },
    Lambda(LambdaData),
    /// Mutually-recursive group of lambdas. The first `nrec` arguments are
    /// recursion variables paired 1:1 with results and outputs; the remaining
    /// arguments import external dependencies.
    Phi { subregion: Region, nrec: usize },
    Delta(DeltaData),
}

impl NodeKind {
    pub fn is_simple(&self) -> bool {
        matches!(self, NodeKind::Simple(_))
    }

    /// The subregions enclosed by this node, in order.
    pub fn subregions(&self) -> &[Region] {
        match self {
            NodeKind::Simple(_) => &[],
            NodeKind::Gamma { subregions } => subregions,
            NodeKind::Theta { subregion }
            | NodeKind::Phi { subregion, .. } => std::slice::from_ref(subregion),
            NodeKind::Lambda(data) => std::slice::from_ref(&data.subregion),
            NodeKind::Delta(data) => std::slice::from_ref(&data.subregion),
        }
    }
}

/// A live node: its kind, owning region, and ports.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub region: Region,
    pub kind: NodeKind,
    pub inputs: Vec<InputData>,
    pub outputs: Vec<OutputData>,
}

impl NodeData {
    pub fn operation(&self) -> Option<&Operation> {
        match &self.kind {
            NodeKind::Simple(op) => Some(op),
            _ => None,
        }
    }
}

/// A region: an ordered list of nodes plus entry arguments and exit results.
#[derive(Debug, Clone, Default)]
pub struct RegionData {
    /// The structural node enclosing this region; `None` for the root.
    pub owner: Option<Node>,
    /// Nodes in insertion order. Traversal tie-breaks use this order.
    pub nodes: Vec<Node>,
    pub arguments: Vec<ArgumentData>,
    pub results: Vec<ResultData>,
}
