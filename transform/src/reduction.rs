//! The `--red` pass: enables every node-normalization rule on the graph's
//! normal forms and runs the rewrite sweep to fixpoint.

use rvopt_ir::{RvsdgModule, rvsdg::normalize};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::{Pass, count_nodes};

pub struct NodeReduction;

impl Pass for NodeReduction {
    fn name(&self) -> &'static str {
        "red"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let before = count_nodes(&module.graph);
        module.graph.normal_forms.enable_all();
        normalize(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::ReduceNodes);
        record
            .add("nnodes_before", before)
            .add("nnodes_after", count_nodes(&module.graph))
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}
