//! The regionalized value state dependence graph: a hierarchical dataflow IR
//! whose structural nodes (gamma, theta, lambda, phi, delta) enclose nested
//! regions.

pub mod copy;
pub mod graph;
pub mod node;
pub mod normal_forms;
pub mod traverser;

pub use self::{
    copy::{Substitution, copy_node, copy_region_contents},
    graph::Graph,
    node::{
        ArgumentData, DeltaData, InputData, LambdaData, Node, NodeData, NodeKind, Origin,
        OutputData, Region, RegionData, ResultData, User,
    },
    normal_forms::{
        AllocaReductions, BinaryReductions, GammaReductions, LoadReductions, MatchReductions,
        MuxReductions, NormalForm, NormalForms, StoreReductions, UnaryReductions, normalize,
    },
    traverser::{BottomUpTraverser, TopDownTraverser},
};
