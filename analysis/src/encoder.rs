//! Memory-state encoding: replaces the single monolithic memory-state edge
//! threaded through every memory-touching node with a vector of state edges,
//! one per points-to equivalence class, rewiring mux/load/store signatures
//! and extending structural-node state fan-in/out at region crossings.
//!
//! The basic encoder routes every class through every region crossing. The
//! advanced encoder computes a per-region routing plan of the classes each
//! region actually touches; its routing policy is an open design decision,
//! so it currently routes like the basic encoder while exposing the plan.

use rustc_hash::{FxHashMap, FxHashSet};

use rvopt_ir::{
    Operation, RvsdgModule,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, TopDownTraverser},
};

use crate::steensgaard::{AddressClasses, ClassId, PointsToAnalysis};

/// Splits monolithic memory-state edges according to a points-to analysis.
pub trait MemoryStateEncoder {
    fn name(&self) -> &'static str;
    fn encode(&mut self, module: &mut RvsdgModule, analysis: &PointsToAnalysis);
}

/// The basic encoder: one state edge per points-to class, everywhere.
#[derive(Default)]
pub struct BasicEncoder;

impl MemoryStateEncoder for BasicEncoder {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn encode(&mut self, module: &mut RvsdgModule, analysis: &PointsToAnalysis) {
        let mut encoding = Encoding::new(analysis);
        encoding.encode_module(module);
    }
}

/// The advanced encoder: keeps the basic routing, additionally computing a
/// per-region summary of touched classes for a future narrowing policy.
#[derive(Default)]
pub struct AdvancedEncoder {
    plan: FxHashMap<Region, FxHashSet<ClassId>>,
}

impl AdvancedEncoder {
    /// The classes the nodes of `region` (transitively) touch.
    pub fn plan(&self, region: Region) -> Option<&FxHashSet<ClassId>> {
        self.plan.get(&region)
    }

    fn compute_routing_plan(&mut self, graph: &Graph, analysis: &PointsToAnalysis) {
        for region in graph.all_regions() {
            self.region_plan(graph, analysis, region);
        }
    }

    fn region_plan(
        &mut self,
        graph: &Graph,
        analysis: &PointsToAnalysis,
        region: Region,
    ) -> FxHashSet<ClassId> {
        if let Some(existing) = self.plan.get(&region) {
            return existing.clone();
        }
        let mut touched = FxHashSet::default();
        for &node in &graph.region(region).nodes {
            match &graph.node(node).kind {
                NodeKind::Simple(operation) => match operation {
                    Operation::Alloca { .. } | Operation::Malloc => {
                        touched.extend(analysis.allocation_class(node));
                    }
                    Operation::Load { .. } | Operation::Store { .. } => {
                        match analysis.address_classes(graph.input_origin(node, 0)) {
                            AddressClasses::One(class) => {
                                touched.insert(class);
                            }
                            AddressClasses::All => {
                                touched.extend(analysis.classes.iter().copied());
                            }
                        }
                    }
                    Operation::Call(_) => {
                        touched.extend(analysis.classes.iter().copied());
                    }
                    _ => {}
                },
                kind => {
                    for &subregion in kind.subregions() {
                        touched.extend(self.region_plan(graph, analysis, subregion));
                    }
                }
            }
        }
        self.plan.insert(region, touched.clone());
        touched
    }
}

impl MemoryStateEncoder for AdvancedEncoder {
    fn name(&self) -> &'static str {
        "advanced"
    }

    fn encode(&mut self, module: &mut RvsdgModule, analysis: &PointsToAnalysis) {
        self.compute_routing_plan(&module.graph, analysis);
        // TODO: narrow the routed classes per region using the plan once the
        // routing policy is settled; until then the basic routing applies.
        let mut encoding = Encoding::new(analysis);
        encoding.encode_module(module);
    }
}

type Strands = FxHashMap<ClassId, Origin>;

struct Encoding<'a> {
    analysis: &'a PointsToAnalysis,
    classes: Vec<ClassId>,
    /// Maps the value outputs of rewritten loads back to the origin the
    /// analysis knows, so addresses loaded from memory keep their classes.
    provenance: FxHashMap<Origin, Origin>,
}

impl<'a> Encoding<'a> {
    fn new(analysis: &'a PointsToAnalysis) -> Self {
        Self {
            analysis,
            classes: analysis.classes.clone(),
            provenance: FxHashMap::default(),
        }
    }

    fn encode_module(&mut self, module: &mut RvsdgModule) {
        if self.classes.is_empty() {
            return;
        }
        let root = module.graph.root();
        for node in module.graph.region(root).nodes.clone() {
            match module.graph.node(node).kind.clone() {
                NodeKind::Lambda(_) => self.encode_lambda(&mut module.graph, node),
                NodeKind::Phi { subregion, nrec } => {
                    for index in 0..nrec {
                        if let Origin::Output { node: lambda, .. } =
                            module.graph.result_origin(subregion, index)
                        {
                            self.encode_lambda(&mut module.graph, lambda);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn classes_for_address(&self, address: Origin) -> Vec<ClassId> {
        let mut origin = address;
        loop {
            match self.analysis.try_address_classes(origin) {
                Some(AddressClasses::One(class)) => return vec![class],
                Some(AddressClasses::All) => return self.classes.clone(),
                None => match self.provenance.get(&origin) {
                    Some(previous) => origin = *previous,
                    None => return self.classes.clone(),
                },
            }
        }
    }

    /// Split one monolithic state into a strand per class.
    fn split(&mut self, graph: &mut Graph, region: Region, state: Origin) -> Strands {
        if self.classes.len() == 1 {
            return std::iter::once((self.classes[0], state)).collect();
        }
        let mux = graph.add_node(
            region,
            Operation::Mux {
                ninputs: 1,
                noutputs: self.classes.len(),
            },
            &[state],
        );
        self.classes
            .iter()
            .enumerate()
            .map(|(index, class)| (*class, Origin::output(mux, index)))
            .collect()
    }

    /// Merge the strands back into one monolithic state.
    fn merge(&mut self, graph: &mut Graph, region: Region, strands: &Strands) -> Origin {
        if self.classes.len() == 1 {
            return strands[&self.classes[0]];
        }
        let origins: Vec<Origin> = self.classes.iter().map(|class| strands[class]).collect();
        let mux = graph.add_node(
            region,
            Operation::Mux {
                ninputs: origins.len(),
                noutputs: 1,
            },
            &origins,
        );
        Origin::output(mux, 0)
    }

    fn encode_lambda(&mut self, graph: &mut Graph, lambda: Node) {
        let data = graph.lambda_data(lambda).clone();
        let body = data.subregion;
        let memory_params: Vec<usize> = data
            .signature
            .params()
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_memory())
            .map(|(index, _)| index)
            .collect();
        let memory_results: Vec<usize> = data
            .signature
            .results()
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_memory())
            .map(|(index, _)| index)
            .collect();
        let (&[param], &[result]) = (memory_params.as_slice(), memory_results.as_slice()) else {
            log::debug!(
                target: "analysis:encoder",
                "skipping '{}': no single monolithic memory edge", data.name
            );
            return;
        };

        let entry = graph.argument(body, data.ncontext + param);
        let mut strands = self.split(graph, body, entry);
        self.encode_region(graph, body, &mut strands);
        let merged = self.merge(graph, body, &strands);
        graph.set_result_origin(body, result, merged);
        graph.prune(body);
    }

    fn encode_region(&mut self, graph: &mut Graph, region: Region, strands: &mut Strands) {
        let mut traverser = TopDownTraverser::new(graph, region);
        while let Some(node) = traverser.next(graph) {
            self.encode_node(graph, node, region, strands);
        }
    }

    fn encode_node(&mut self, graph: &mut Graph, node: Node, region: Region, strands: &mut Strands) {
        match graph.node(node).kind.clone() {
            NodeKind::Simple(operation) => match operation {
                Operation::Alloca { .. } => {
                    let class = self
                        .analysis
                        .allocation_class(node)
                        .expect("alloca without a points-to class");
                    graph.set_input_origin(node, 0, strands[&class]);
                    strands.insert(class, Origin::output(node, 1));
                }
                Operation::Malloc => {
                    let class = self
                        .analysis
                        .allocation_class(node)
                        .expect("malloc without a points-to class");
                    graph.set_input_origin(node, 1, strands[&class]);
                    strands.insert(class, Origin::output(node, 1));
                }
                Operation::Load { ty, .. } => {
                    let address = graph.input_origin(node, 0);
                    let mut touched = self.classes_for_address(address);
                    touched.sort_unstable();
                    let mut operands = vec![address];
                    operands.extend(touched.iter().map(|class| strands[class]));
                    let load = graph.add_node(
                        region,
                        Operation::Load {
                            ty,
                            nstates: touched.len(),
                        },
                        &operands,
                    );
                    graph.divert_users(Origin::output(node, 0), Origin::output(load, 0));
                    self.provenance
                        .insert(Origin::output(load, 0), Origin::output(node, 0));
                    for (position, class) in touched.iter().enumerate() {
                        strands.insert(*class, Origin::output(load, position + 1));
                    }
                }
                Operation::Store { ty, .. } => {
                    let address = graph.input_origin(node, 0);
                    let value = graph.input_origin(node, 1);
                    let mut touched = self.classes_for_address(address);
                    touched.sort_unstable();
                    let mut operands = vec![address, value];
                    operands.extend(touched.iter().map(|class| strands[class]));
                    let store = graph.add_node(
                        region,
                        Operation::Store {
                            ty,
                            nstates: touched.len(),
                        },
                        &operands,
                    );
                    for (position, class) in touched.iter().enumerate() {
                        strands.insert(*class, Origin::output(store, position));
                    }
                }
                Operation::Call(signature) => {
                    let memory_params: Vec<usize> = signature
                        .params()
                        .iter()
                        .enumerate()
                        .filter(|(_, ty)| ty.is_memory())
                        .map(|(index, _)| index)
                        .collect();
                    let memory_results: Vec<usize> = signature
                        .results()
                        .iter()
                        .enumerate()
                        .filter(|(_, ty)| ty.is_memory())
                        .map(|(index, _)| index)
                        .collect();
                    let (&[param], &[result]) =
                        (memory_params.as_slice(), memory_results.as_slice())
                    else {
                        return;
                    };
                    // The callee may touch anything: fan every strand into
                    // the call and back out of it.
                    let merged = self.merge(graph, region, strands);
                    graph.set_input_origin(node, 1 + param, merged);
                    let split = self.split(graph, region, Origin::output(node, result));
                    *strands = split;
                }
                _ => {}
            },
            NodeKind::Gamma { subregions } => {
                let mut per_case: Vec<Strands> = vec![Strands::default(); subregions.len()];
                for class in self.classes.clone() {
                    let arguments = graph.gamma_add_entry_var(node, strands[&class]);
                    for (case, argument) in arguments.into_iter().enumerate() {
                        per_case[case].insert(class, argument);
                    }
                }
                for (case, subregion) in subregions.iter().enumerate() {
                    let mut inner = std::mem::take(&mut per_case[case]);
                    self.encode_region(graph, *subregion, &mut inner);
                    per_case[case] = inner;
                }
                for class in self.classes.clone() {
                    let results: Vec<Origin> =
                        per_case.iter().map(|strand| strand[&class]).collect();
                    let output = graph.gamma_add_exit_var(node, &results);
                    strands.insert(class, output);
                }
            }
            NodeKind::Theta { subregion } => {
                let mut indices = Vec::with_capacity(self.classes.len());
                let mut inner = Strands::default();
                for class in self.classes.clone() {
                    let index = graph.theta_extend_loop_var(node, strands[&class]);
                    indices.push((class, index));
                    inner.insert(class, graph.argument(subregion, index));
                }
                self.encode_region(graph, subregion, &mut inner);
                for (class, index) in &indices {
                    graph.theta_set_result(node, *index, inner[class]);
                    strands.insert(*class, Origin::output(node, *index));
                }
            }
            NodeKind::Lambda(_) | NodeKind::Phi { .. } | NodeKind::Delta(_) => {}
        }
    }
}
