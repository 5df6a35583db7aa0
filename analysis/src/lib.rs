//! Alias analysis for the middle-end: a Steensgaard-style flow-insensitive
//! points-to analysis and the memory-state encoders that refine the
//! monolithic memory-state edge into one edge per points-to class.

pub mod encoder;
pub mod points_to_graph;
pub mod steensgaard;

pub use self::{
    encoder::{AdvancedEncoder, BasicEncoder, MemoryStateEncoder},
    points_to_graph::{MemoryLocation, PointsToGraph, PtVertex},
    steensgaard::{AddressClasses, ClassId, PointsToAnalysis, analyze},
};
