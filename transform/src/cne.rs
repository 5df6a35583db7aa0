//! Common-node elimination: congruence closure over output equivalence.
//!
//! Two outputs are congruent iff their producing nodes carry equal
//! operations and pairwise-congruent origins; region arguments are congruent
//! iff their corresponding enclosing inputs are, or they are identical.
//! Each top-down pass merges classes and redirects users to the survivor
//! with the smallest creation index; passes repeat until nothing merges.
//! Theta arguments are kept in identity-only classes, since merging them
//! would require proving the feedback congruent first. The pass is
//! idempotent.

use rustc_hash::FxHashMap;

use rvopt_ir::{
    Operation, RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, TopDownTraverser},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::{Pass, count_nodes};

pub struct CommonNodeElimination;

impl Pass for CommonNodeElimination {
    fn name(&self) -> &'static str {
        "cne"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let before = count_nodes(&module.graph);
        common_node_elimination(&mut module.graph);
        let mut record = Statistics::new(StatisticsId::CommonNodeElimination);
        record
            .add("nnodes_before", before)
            .add("nnodes_after", count_nodes(&module.graph))
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// Redirect the users of congruent outputs to a single representative,
/// leaving the now-dead duplicates for DNE.
pub fn common_node_elimination(graph: &mut Graph) {
    loop {
        let mut cne = Cne::default();
        let root = graph.root();
        if !cne.process_region(graph, root) {
            break;
        }
    }
}

#[derive(Default)]
struct Cne {
    class_of: FxHashMap<Origin, u32>,
    next_class: u32,
}

impl Cne {
    fn class(&mut self, origin: Origin) -> u32 {
        if let Some(class) = self.class_of.get(&origin) {
            return *class;
        }
        let class = self.next_class;
        self.next_class += 1;
        self.class_of.insert(origin, class);
        class
    }

    fn set_class(&mut self, origin: Origin, class: u32) {
        self.class_of.insert(origin, class);
    }

    fn process_region(&mut self, graph: &mut Graph, region: Region) -> bool {
        let mut changed = false;
        // Congruence key -> representative node, scoped to this region.
        let mut known: FxHashMap<(Operation, Vec<u32>), Node> = FxHashMap::default();
        let mut traverser = TopDownTraverser::new(graph, region);
        while let Some(node) = traverser.next(graph) {
            match graph.node(node).kind.clone() {
                NodeKind::Simple(operation) => {
                    let key: Vec<u32> = (0..graph.node(node).inputs.len())
                        .map(|index| self.class(graph.input_origin(node, index)))
                        .collect();
                    // Loads and stores participate: congruent state origins
                    // mean they observe the same memory. Allocations never
                    // merge (each names a distinct location), and opaque test
                    // operations stay out.
                    if matches!(
                        operation,
                        Operation::Test { .. } | Operation::Alloca { .. } | Operation::Malloc
                    ) {
                        self.fresh_outputs(graph, node);
                        continue;
                    }
                    match known.get(&(operation.clone(), key.clone())).copied() {
                        Some(existing) if existing != node => {
                            let (keep, drop) = if existing < node {
                                (existing, node)
                            } else {
                                (node, existing)
                            };
                            for index in 0..graph.node(drop).outputs.len() {
                                graph.divert_users(
                                    Origin::output(drop, index),
                                    Origin::output(keep, index),
                                );
                                let class = self.class(Origin::output(keep, index));
                                self.set_class(Origin::output(drop, index), class);
                            }
                            known.insert((operation, key), keep);
                            changed = true;
                        }
                        _ => {
                            known.insert((operation, key), node);
                            self.fresh_outputs(graph, node);
                        }
                    }
                }
                NodeKind::Gamma { subregions } => {
                    // Arguments inherit the class of their entry input, in
                    // every subregion.
                    for index in 1..graph.node(node).inputs.len() {
                        let class = self.class(graph.input_origin(node, index));
                        for subregion in &subregions {
                            self.set_class(Origin::argument(*subregion, index - 1), class);
                        }
                    }
                    for subregion in &subregions {
                        changed |= self.process_region(graph, *subregion);
                    }
                    // Outputs with position-wise congruent subregion results
                    // collapse onto the first.
                    let noutputs = graph.node(node).outputs.len();
                    let result_classes: Vec<Vec<u32>> = (0..noutputs)
                        .map(|index| {
                            subregions
                                .iter()
                                .map(|subregion| {
                                    self.class(graph.result_origin(*subregion, index))
                                })
                                .collect()
                        })
                        .collect();
                    for index in 0..noutputs {
                        let representative = (0..index)
                            .find(|prior| result_classes[*prior] == result_classes[index]);
                        match representative {
                            Some(prior) => {
                                let from = Origin::output(node, index);
                                if graph.nusers(from) > 0 {
                                    graph.divert_users(from, Origin::output(node, prior));
                                    changed = true;
                                }
                                let class = self.class(Origin::output(node, prior));
                                self.set_class(from, class);
                            }
                            None => {
                                self.class(Origin::output(node, index));
                            }
                        }
                    }
                }
                NodeKind::Theta { subregion } => {
                    for index in 0..graph.region(subregion).arguments.len() {
                        self.class(Origin::argument(subregion, index));
                    }
                    changed |= self.process_region(graph, subregion);
                    self.fresh_outputs(graph, node);
                }
                NodeKind::Lambda(data) => {
                    for index in 0..data.ncontext {
                        let class = self.class(graph.input_origin(node, index));
                        self.set_class(Origin::argument(data.subregion, index), class);
                    }
                    changed |= self.process_region(graph, data.subregion);
                    self.fresh_outputs(graph, node);
                }
                NodeKind::Phi { subregion, nrec } => {
                    for index in 0..graph.node(node).inputs.len() {
                        let class = self.class(graph.input_origin(node, index));
                        self.set_class(Origin::argument(subregion, nrec + index), class);
                    }
                    changed |= self.process_region(graph, subregion);
                    self.fresh_outputs(graph, node);
                }
                NodeKind::Delta(data) => {
                    for index in 0..graph.node(node).inputs.len() {
                        let class = self.class(graph.input_origin(node, index));
                        self.set_class(Origin::argument(data.subregion, index), class);
                    }
                    changed |= self.process_region(graph, data.subregion);
                    self.fresh_outputs(graph, node);
                }
            }
        }
        changed
    }

    fn fresh_outputs(&mut self, graph: &Graph, node: Node) {
        for index in 0..graph.node(node).outputs.len() {
            self.class(Origin::output(node, index));
        }
    }
}
