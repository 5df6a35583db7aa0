//! The `--AASteensgaardBasic` pass: Steensgaard points-to analysis followed
//! by the basic memory-state encoder, with a dead-node sweep to clear the
//! superseded monolithic state chains.

use rvopt_analysis::{BasicEncoder, MemoryStateEncoder, analyze};
use rvopt_ir::RvsdgModule;
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::{Pass, count_nodes, dne::dead_node_elimination};

pub struct SteensgaardBasic;

impl Pass for SteensgaardBasic {
    fn name(&self) -> &'static str {
        "steensgaard-basic"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let analysis = analyze(module);
        let mut record = Statistics::new(StatisticsId::SteensgaardAnalysis);
        record
            .add("nmemory_nodes", analysis.graph.nmemory_nodes())
            .add("nregister_nodes", analysis.graph.nregister_nodes())
            .add_timing("time", timer.elapsed());
        statistics.print(&record);

        let timer = Timer::start();
        let before = count_nodes(&module.graph);
        BasicEncoder.encode(module, &analysis);
        // The encoder leaves the superseded monolithic chains dangling from
        // the old structural state ports; DNE sweeps them.
        dead_node_elimination(module);
        let mut record = Statistics::new(StatisticsId::BasicEncoderEncoding);
        record
            .add("nclasses", analysis.classes.len())
            .add("nnodes_before", before)
            .add("nnodes_after", count_nodes(&module.graph))
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}
