//! The optimization passes over the RVSDG, and the pass abstraction the
//! driver schedules them through.

pub mod alias;
pub mod cne;
pub mod dne;
pub mod inline;
pub mod invert;
pub mod ivr;
pub mod pull;
pub mod push;
pub mod reduction;
pub mod unroll;

use rvopt_ir::{RvsdgModule, rvsdg::Graph};
use rvopt_session::StatisticsDescriptor;

pub use self::{
    alias::SteensgaardBasic,
    cne::CommonNodeElimination,
    dne::DeadNodeElimination,
    inline::FunctionInlining,
    invert::ThetaGammaInversion,
    ivr::InvariantValueRedirection,
    pull::PullIn,
    push::PushOut,
    reduction::NodeReduction,
    unroll::LoopUnrolling,
};

/// An RVSDG-to-RVSDG transformation scheduled by the pass driver.
///
/// A pass is total on well-formed graphs: it either completes or panics on a
/// broken invariant. No pass recovers from another pass's errors.
pub trait Pass {
    /// Short identifier, used as the log scope (`pass:<name>`).
    fn name(&self) -> &'static str;

    /// Run the pass, reporting statistics through the descriptor.
    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor);
}

/// Total number of live nodes in the graph, for pass statistics.
pub fn count_nodes(graph: &Graph) -> usize {
    graph
        .all_regions()
        .into_iter()
        .map(|region| graph.region(region).nodes.len())
        .sum()
}
