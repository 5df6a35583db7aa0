//! RVSDG destruction: lowers the optimized graph back into the CFG-level IR
//! for the external back-end. Simple nodes become TACs in topological order,
//! gammas become split/join diamonds, and thetas become single-entry loops
//! with the back edge on the repetition predicate.

use rustc_hash::FxHashMap;

use rvopt_ir::{
    DataDef, FunctionDef, IrError, Module, Operation, RvsdgModule, Type,
    cfg::{CfgNode, ControlFlowGraph},
    rvsdg::{Graph, Node, NodeKind, Origin, Region, TopDownTraverser},
    tac::{BasicBlock, Tac, Variable, VariableTable},
};

/// Lower an RVSDG module back into the CFG-level module form.
pub fn destruct(rvsdg: &RvsdgModule) -> Result<Module, IrError> {
    let graph = &rvsdg.graph;
    let root = graph.root();
    let names = root_symbol_names(rvsdg);

    let mut module = Module {
        name: rvsdg.name.clone(),
        imports: rvsdg.imports.clone(),
        ..Module::default()
    };

    for &node in &graph.region(root).nodes {
        match &graph.node(node).kind {
            NodeKind::Lambda(_) => {
                let resolve = |origin: Origin| names.get(&origin).cloned();
                module.functions.push(destruct_function(graph, node, &resolve)?);
            }
            NodeKind::Delta(_) => {
                let resolve = |origin: Origin| names.get(&origin).cloned();
                module.data.push(destruct_data(graph, node, &resolve)?);
            }
            NodeKind::Phi { subregion, nrec } => {
                let subregion = *subregion;
                let nrec = *nrec;
                let member_names: Vec<String> = (0..nrec)
                    .map(|index| match graph.result_origin(subregion, index) {
                        Origin::Output { node, .. } => graph.lambda_data(node).name.clone(),
                        origin => panic!("phi result {index} is not a lambda: {origin:?}"),
                    })
                    .collect();
                for index in 0..nrec {
                    let Origin::Output { node: lambda, .. } =
                        graph.result_origin(subregion, index)
                    else {
                        unreachable!()
                    };
                    let resolve = |origin: Origin| match origin {
                        Origin::Argument { region, index } if region == subregion => {
                            if index < nrec {
                                Some(member_names[index].clone())
                            } else {
                                let external =
                                    graph.input_origin(graph.region(region).owner?, index - nrec);
                                names.get(&external).cloned()
                            }
                        }
                        origin => names.get(&origin).cloned(),
                    };
                    module.functions.push(destruct_function(graph, lambda, &resolve)?);
                }
            }
            NodeKind::Simple(op) => {
                return Err(IrError::InvalidInput(format!(
                    "cannot lower stray root-level operation '{op}'"
                )));
            }
            NodeKind::Gamma { .. } | NodeKind::Theta { .. } => {
                return Err(IrError::InvalidInput(
                    "cannot lower control structure at module level".into(),
                ));
            }
        }
    }
    Ok(module)
}

/// Names of module-level symbols by their defining root-region origin.
fn root_symbol_names(rvsdg: &RvsdgModule) -> FxHashMap<Origin, String> {
    let graph = &rvsdg.graph;
    let root = graph.root();
    let mut names = FxHashMap::default();
    for (index, import) in rvsdg.imports.iter().enumerate() {
        names.insert(Origin::argument(root, index), import.name.clone());
    }
    for &node in &graph.region(root).nodes {
        match &graph.node(node).kind {
            NodeKind::Lambda(data) => {
                names.insert(Origin::output(node, 0), data.name.clone());
            }
            NodeKind::Delta(data) => {
                names.insert(Origin::output(node, 0), data.name.clone());
            }
            NodeKind::Phi { subregion, nrec } => {
                for index in 0..*nrec {
                    if let Origin::Output { node: lambda, .. } =
                        graph.result_origin(*subregion, index)
                    {
                        names.insert(
                            Origin::output(node, index),
                            graph.lambda_data(lambda).name.clone(),
                        );
                    }
                }
            }
            _ => {}
        }
    }
    names
}

struct Lowerer<'a> {
    graph: &'a Graph,
    cfg: ControlFlowGraph,
    variables: VariableTable,
    counter: usize,
}

impl<'a> Lowerer<'a> {
    fn fresh(&mut self, prefix: &str, ty: Type) -> Variable {
        let name = format!("{prefix}{}", self.counter);
        self.counter += 1;
        self.variables.add(name, ty)
    }

    fn append(&mut self, block: CfgNode, tac: Tac) {
        match &mut self.cfg.node_mut(block).attribute {
            rvopt_ir::cfg::CfgAttribute::Block(b) => {
                b.append(tac);
            }
            _ => unreachable!("TACs are only appended to basic blocks"),
        }
    }

    /// Lower the contents of `region` starting in `block`; returns the block
    /// where control ends up.
    fn emit_region(
        &mut self,
        region: Region,
        block: CfgNode,
        map: &mut FxHashMap<Origin, Variable>,
    ) -> Result<CfgNode, IrError> {
        let mut current = block;
        let mut traverser = TopDownTraverser::new(self.graph, region);
        while let Some(node) = traverser.next(self.graph) {
            current = self.emit_node(node, current, map)?;
        }
        Ok(current)
    }

    fn emit_node(
        &mut self,
        node: Node,
        current: CfgNode,
        map: &mut FxHashMap<Origin, Variable>,
    ) -> Result<CfgNode, IrError> {
        let kind = self.graph.node(node).kind.clone();
        match kind {
            NodeKind::Simple(operation) => {
                let operands: Vec<Variable> = self
                    .graph
                    .node(node)
                    .inputs
                    .iter()
                    .map(|input| map[&input.origin])
                    .collect();
                let results: Vec<Variable> = self
                    .graph
                    .node(node)
                    .outputs
                    .iter()
                    .map(|output| output.ty.clone())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|ty| self.fresh("t", ty))
                    .collect();
                for (index, variable) in results.iter().enumerate() {
                    map.insert(Origin::output(node, index), *variable);
                }
                self.append(current, Tac::new(operation, operands, results));
                Ok(current)
            }
            NodeKind::Gamma { subregions } => {
                let predicate = map[&self.graph.input_origin(node, 0)];
                self.append(
                    current,
                    Tac::new(
                        Operation::Branch {
                            alternatives: subregions.len() as u32,
                        },
                        [predicate],
                        [],
                    ),
                );
                let out_vars: Vec<Variable> = self
                    .graph
                    .node(node)
                    .outputs
                    .iter()
                    .map(|output| output.ty.clone())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|ty| self.fresh("g", ty))
                    .collect();
                let join = self.cfg.add_block(BasicBlock::new());
                for subregion in &subregions {
                    let case = self.cfg.add_block(BasicBlock::new());
                    self.cfg.connect(current, case);
                    let mut inner = FxHashMap::default();
                    for index in 0..self.graph.region(*subregion).arguments.len() {
                        let origin = self.graph.input_origin(node, index + 1);
                        inner.insert(Origin::argument(*subregion, index), map[&origin]);
                    }
                    let case_exit = self.emit_region(*subregion, case, &mut inner)?;
                    for (position, out) in out_vars.iter().enumerate() {
                        let result = self.graph.result_origin(*subregion, position);
                        let ty = self.graph.origin_type(result);
                        self.append(
                            case_exit,
                            Tac::new(Operation::Copy(ty), [inner[&result]], [*out]),
                        );
                    }
                    self.cfg.connect(case_exit, join);
                }
                for (index, out) in out_vars.iter().enumerate() {
                    map.insert(Origin::output(node, index), *out);
                }
                Ok(join)
            }
            NodeKind::Theta { subregion } => {
                let ninputs = self.graph.node(node).inputs.len();
                let mut loop_vars = Vec::with_capacity(ninputs);
                for index in 0..ninputs {
                    let origin = self.graph.input_origin(node, index);
                    let ty = self.graph.origin_type(origin);
                    let var = self.fresh("l", ty.clone());
                    self.append(
                        current,
                        Tac::new(Operation::Copy(ty), [map[&origin]], [var]),
                    );
                    loop_vars.push(var);
                }
                let body = self.cfg.add_block(BasicBlock::new());
                self.cfg.connect(current, body);
                let mut inner = FxHashMap::default();
                for (index, var) in loop_vars.iter().enumerate() {
                    inner.insert(Origin::argument(subregion, index), *var);
                }
                let body_exit = self.emit_region(subregion, body, &mut inner)?;
                for (index, var) in loop_vars.iter().enumerate() {
                    let result = self.graph.result_origin(subregion, index + 1);
                    let ty = self.graph.origin_type(result);
                    self.append(
                        body_exit,
                        Tac::new(Operation::Copy(ty), [inner[&result]], [*var]),
                    );
                }
                let predicate = inner[&self.graph.result_origin(subregion, 0)];
                self.append(
                    body_exit,
                    Tac::new(Operation::Branch { alternatives: 2 }, [predicate], []),
                );
                let after = self.cfg.add_block(BasicBlock::new());
                // Alternative 0 exits, alternative 1 repeats.
                self.cfg.connect(body_exit, after);
                self.cfg.connect(body_exit, body);
                for (index, var) in loop_vars.iter().enumerate() {
                    map.insert(Origin::output(node, index), *var);
                }
                Ok(after)
            }
            NodeKind::Lambda(_) | NodeKind::Phi { .. } | NodeKind::Delta(_) => {
                Err(IrError::InvalidInput(
                    "cannot lower a nested function or data definition".into(),
                ))
            }
        }
    }
}

fn destruct_function(
    graph: &Graph,
    lambda: Node,
    resolve: &dyn Fn(Origin) -> Option<String>,
) -> Result<FunctionDef, IrError> {
    let data = graph.lambda_data(lambda).clone();
    log::debug!(target: "conversion:destruct", "lowering function '{}'", data.name);
    let body = data.subregion;

    let mut variables = VariableTable::new();
    let mut map: FxHashMap<Origin, Variable> = FxHashMap::default();
    for index in 0..data.ncontext {
        let external = graph.input_origin(lambda, index);
        let symbol = resolve(external).ok_or_else(|| {
            IrError::InvalidInput(format!(
                "context variable {index} of '{}' has no symbolic name",
                data.name
            ))
        })?;
        let ty = graph.origin_type(graph.argument(body, index));
        map.insert(
            Origin::argument(body, index),
            variables.add_symbol_ref(symbol, ty),
        );
    }
    let mut params = Vec::with_capacity(data.signature.params().len());
    for (position, ty) in data.signature.params().iter().enumerate() {
        let variable = variables.add(format!("a{position}"), ty.clone());
        params.push(variable);
        map.insert(
            Origin::argument(body, data.ncontext + position),
            variable,
        );
    }

    let cfg = ControlFlowGraph::new(params, Vec::new(), VariableTable::new());
    let mut lowerer = Lowerer {
        graph,
        cfg,
        variables,
        counter: 0,
    };
    let entry_block = lowerer.cfg.add_block(BasicBlock::new());
    let entry = lowerer.cfg.entry();
    lowerer.cfg.connect(entry, entry_block);
    let last = lowerer.emit_region(body, entry_block, &mut map)?;

    let results: Vec<Variable> = (0..graph.region(body).results.len())
        .map(|index| map[&graph.result_origin(body, index)])
        .collect();
    let exit = lowerer.cfg.exit();
    lowerer.cfg.connect(last, exit);
    lowerer.cfg.set_results(results);

    let Lowerer {
        mut cfg, variables, ..
    } = lowerer;
    cfg.variables = variables;
    Ok(FunctionDef {
        name: data.name,
        signature: data.signature,
        linkage: data.linkage,
        cfg,
    })
}

fn destruct_data(
    graph: &Graph,
    delta: Node,
    resolve: &dyn Fn(Origin) -> Option<String>,
) -> Result<DataDef, IrError> {
    let data = graph.delta_data(delta).clone();
    let body = data.subregion;

    let mut variables = VariableTable::new();
    let mut map: FxHashMap<Origin, Variable> = FxHashMap::default();
    for index in 0..graph.node(delta).inputs.len() {
        let external = graph.input_origin(delta, index);
        let symbol = resolve(external).ok_or_else(|| {
            IrError::InvalidInput(format!(
                "dependency {index} of '{}' has no symbolic name",
                data.name
            ))
        })?;
        let ty = graph.origin_type(graph.argument(body, index));
        map.insert(
            Origin::argument(body, index),
            variables.add_symbol_ref(symbol, ty),
        );
    }

    let cfg = ControlFlowGraph::new(Vec::new(), Vec::new(), VariableTable::new());
    let mut lowerer = Lowerer {
        graph,
        cfg,
        variables,
        counter: 0,
    };
    let block = lowerer.cfg.add_block(BasicBlock::new());
    let entry = lowerer.cfg.entry();
    lowerer.cfg.connect(entry, block);
    let last = lowerer.emit_region(body, block, &mut map)?;
    if last != block {
        return Err(IrError::InvalidInput(format!(
            "initializer of '{}' is not straight-line code",
            data.name
        )));
    }
    let result = map[&graph.result_origin(body, 0)];
    let exit = lowerer.cfg.exit();
    lowerer.cfg.connect(block, exit);
    lowerer.cfg.set_results(vec![result]);

    let Lowerer {
        mut cfg, variables, ..
    } = lowerer;
    cfg.variables = variables;
    Ok(DataDef {
        name: data.name,
        ty: data.ty,
        linkage: data.linkage,
        constant: data.constant,
        initializer: cfg,
    })
}
