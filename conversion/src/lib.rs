//! The CFG↔RVSDG conversion pipeline: aggregation of a reducible CFG into a
//! structure tree, backward demand annotation over that tree, RVSDG
//! construction guided by the annotations, and the inverse destruction.

pub mod aggregation;
pub mod annotation;
pub mod construct;
pub mod destruct;

pub use self::{
    aggregation::{AggregationTree, Structure, StructureId, StructureNode, aggregate},
    annotation::{DemandMap, DemandSet, DemandedSet, annotate, block_transfer},
    construct::{ConversionTimings, construct, construct_with_timings},
    destruct::destruct,
};
