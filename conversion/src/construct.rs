//! RVSDG construction: walks the annotated aggregation tree of every
//! function, emitting lambda/gamma/theta structure, and converts global data
//! into delta nodes. Mutually recursive functions are grouped into phi nodes
//! by a Tarjan SCC pass over the call graph.

use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::FxHashMap;

use rvopt_ir::{
    IrError, Linkage, Module, Operation, RvsdgModule, Type,
    cfg::{CfgAttribute, ControlFlowGraph},
    rvsdg::{Graph, Node, Origin, Region},
    tac::{BasicBlock, Tac, Variable, VariableTable},
};

use crate::{
    aggregation::{AggregationTree, Structure, StructureId, aggregate},
    annotation::{DemandMap, annotate},
};

/// Wall-clock spent in the conversion phases, for the pass driver's
/// statistics records.
#[derive(Debug, Default)]
pub struct ConversionTimings {
    pub aggregation: std::time::Duration,
    pub annotation: std::time::Duration,
}

/// Convert a CFG-level module into its RVSDG form.
pub fn construct(module: &Module) -> Result<RvsdgModule, IrError> {
    construct_with_timings(module).map(|(rvsdg, _)| rvsdg)
}

/// As [construct], additionally reporting per-phase timings.
pub fn construct_with_timings(
    module: &Module,
) -> Result<(RvsdgModule, ConversionTimings), IrError> {
    let mut timings = ConversionTimings::default();
    let mut rvsdg = RvsdgModule::new(module.name.clone());
    let mut symbols: FxHashMap<String, Origin> = FxHashMap::default();

    for import in &module.imports {
        let origin = rvsdg.add_import(import.clone());
        symbols.insert(import.name.clone(), origin);
    }

    for data in &module.data {
        convert_data(&mut rvsdg, data, &mut symbols)?;
    }

    // Group functions into call-graph SCCs; Tarjan yields them callees-first.
    let mut callgraph = DiGraph::<usize, ()>::new();
    let indices: Vec<_> = (0..module.functions.len())
        .map(|i| callgraph.add_node(i))
        .collect();
    let function_of: FxHashMap<&str, usize> = module
        .functions
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i))
        .collect();
    for (caller, function) in module.functions.iter().enumerate() {
        for (_, data) in function.cfg.variables.iter() {
            if let Some(symbol) = &data.symbol
                && let Some(&callee) = function_of.get(symbol.as_str())
            {
                callgraph.update_edge(indices[caller], indices[callee], ());
            }
        }
    }

    for scc in tarjan_scc(&callgraph) {
        let mut members: Vec<usize> = scc.iter().map(|ix| callgraph[*ix]).collect();
        members.sort_unstable();
        let recursive = members.len() > 1 || {
            let function = &module.functions[members[0]];
            function
                .cfg
                .variables
                .iter()
                .any(|(_, data)| data.symbol.as_deref() == Some(function.name.as_str()))
        };
        if recursive {
            convert_phi_group(module, &mut rvsdg, &members, &mut symbols, &mut timings)?;
        } else {
            let function = &module.functions[members[0]];
            let root = rvsdg.graph.root();
            let lambda = convert_function(
                &mut rvsdg.graph,
                function,
                root,
                &mut Scope::Root(&symbols),
                &mut timings,
            )?;
            let origin = Origin::output(lambda, 0);
            symbols.insert(function.name.clone(), origin);
            if function.linkage == Linkage::External {
                rvsdg.add_export(origin, function.name.clone());
            }
        }
    }
    Ok((rvsdg, timings))
}

/// Symbol resolution scope: either the root region directly, or the inside
/// of a phi node, where member names resolve to recursion variables and
/// everything else is routed in as a context variable.
enum Scope<'a> {
    Root(&'a FxHashMap<String, Origin>),
    Phi {
        outer: &'a FxHashMap<String, Origin>,
        node: Node,
        members: &'a FxHashMap<String, Origin>,
        routed: &'a mut FxHashMap<String, Origin>,
    },
}

impl Scope<'_> {
    fn resolve(&mut self, graph: &mut Graph, name: &str) -> Result<Origin, IrError> {
        match self {
            Scope::Root(symbols) => symbols
                .get(name)
                .copied()
                .ok_or_else(|| IrError::UndefinedReference(name.to_string())),
            Scope::Phi {
                outer,
                node,
                members,
                routed,
            } => {
                if let Some(origin) = members.get(name) {
                    return Ok(*origin);
                }
                if let Some(origin) = routed.get(name) {
                    return Ok(*origin);
                }
                let external = outer
                    .get(name)
                    .copied()
                    .ok_or_else(|| IrError::UndefinedReference(name.to_string()))?;
                let argument = graph.phi_add_context_var(*node, external);
                routed.insert(name.to_string(), argument);
                Ok(argument)
            }
        }
    }
}

fn convert_phi_group(
    module: &Module,
    rvsdg: &mut RvsdgModule,
    members: &[usize],
    symbols: &mut FxHashMap<String, Origin>,
    timings: &mut ConversionTimings,
) -> Result<(), IrError> {
    let root = rvsdg.graph.root();
    let phi = rvsdg.graph.add_phi(root);
    let subregion = rvsdg.graph.phi_subregion(phi);

    let mut rec_args: FxHashMap<String, Origin> = FxHashMap::default();
    for &index in members {
        let function = &module.functions[index];
        let argument = rvsdg
            .graph
            .phi_add_rec_var(phi, Type::Function(function.signature.clone()));
        rec_args.insert(function.name.clone(), argument);
    }

    let mut routed: FxHashMap<String, Origin> = FxHashMap::default();
    let mut definitions = Vec::with_capacity(members.len());
    for &index in members {
        let function = &module.functions[index];
        let lambda = convert_function(
            &mut rvsdg.graph,
            function,
            subregion,
            &mut Scope::Phi {
                outer: symbols,
                node: phi,
                members: &rec_args,
                routed: &mut routed,
            },
            timings,
        )?;
        definitions.push(Origin::output(lambda, 0));
    }
    rvsdg.graph.phi_finish(phi, &definitions);

    for (position, &index) in members.iter().enumerate() {
        let function = &module.functions[index];
        let origin = Origin::output(phi, position);
        symbols.insert(function.name.clone(), origin);
        if function.linkage == Linkage::External {
            rvsdg.add_export(origin, function.name.clone());
        }
    }
    Ok(())
}

/// Convert one function into a lambda node in `target`.
fn convert_function(
    graph: &mut Graph,
    function: &rvopt_ir::FunctionDef,
    target: Region,
    scope: &mut Scope<'_>,
    timings: &mut ConversionTimings,
) -> Result<Node, IrError> {
    log::debug!(target: "conversion:construct", "converting function '{}'", function.name);
    let started = std::time::Instant::now();
    let tree = aggregate(&function.cfg, &function.name)?;
    timings.aggregation += started.elapsed();
    let started = std::time::Instant::now();
    let demand = annotate(&tree);
    timings.annotation += started.elapsed();
    let variables = &function.cfg.variables;

    let entry_args = entry_arguments(&tree)?;
    if entry_args.len() != function.signature.params().len() {
        return Err(IrError::InvalidInput(format!(
            "function '{}' declares {} parameters but its entry carries {}",
            function.name,
            function.signature.params().len(),
            entry_args.len()
        )));
    }
    for (variable, expected) in entry_args.iter().zip(function.signature.params()) {
        let found = variables.ty(*variable);
        if found != expected {
            return Err(IrError::TypeMismatch {
                expected: expected.clone(),
                found: found.clone(),
            });
        }
    }

    // Everything demanded at the function's top must be a module symbol;
    // those become the lambda's context variables.
    let root_demand = &demand[&tree.root()];
    let mut context_vars: Vec<Variable> = root_demand.top.iter().copied().collect();
    context_vars.sort_unstable();
    let mut context_origins = Vec::with_capacity(context_vars.len());
    for variable in &context_vars {
        let data = variables.get(*variable);
        let symbol = data.symbol.as_deref().ok_or_else(|| {
            IrError::UndefinedReference(data.name.clone())
        })?;
        let origin = scope.resolve(graph, symbol)?;
        let found = graph.origin_type(origin);
        if found != data.ty {
            return Err(IrError::TypeMismatch {
                expected: data.ty.clone(),
                found,
            });
        }
        context_origins.push(origin);
    }

    let lambda = graph.add_lambda(
        target,
        function.name.clone(),
        function.linkage,
        function.signature.clone(),
        &context_origins,
    );
    let body = graph.lambda_subregion(lambda);

    let mut varmap: FxHashMap<Variable, Origin> = FxHashMap::default();
    for (index, variable) in context_vars.iter().enumerate() {
        varmap.insert(*variable, graph.argument(body, index));
    }
    for (index, variable) in entry_args.iter().enumerate() {
        varmap.insert(
            *variable,
            graph.argument(body, context_vars.len() + index),
        );
    }

    let mut exit_results = None;
    convert_structure(
        graph,
        &tree,
        tree.root(),
        &demand,
        variables,
        body,
        &mut varmap,
        &mut exit_results,
    )?;
    let exit_results = exit_results.ok_or_else(|| {
        IrError::InvalidInput(format!("function '{}' has no exit", function.name))
    })?;
    let results: Vec<Origin> = exit_results
        .iter()
        .map(|variable| lookup(&varmap, variables, *variable))
        .collect::<Result<_, _>>()?;
    graph.lambda_finish(lambda, &results);
    Ok(lambda)
}

fn entry_arguments(tree: &AggregationTree) -> Result<Vec<Variable>, IrError> {
    let mut id = tree.root();
    loop {
        match &tree.node(id).structure {
            Structure::Entry { arguments } => return Ok(arguments.clone()),
            Structure::Linear => {
                id = *tree
                    .node(id)
                    .children
                    .first()
                    .ok_or_else(|| IrError::InvalidInput("empty linear structure".into()))?;
            }
            _ => {
                return Err(IrError::InvalidInput(
                    "aggregation tree does not begin with the entry".into(),
                ));
            }
        }
    }
}

fn lookup(
    varmap: &FxHashMap<Variable, Origin>,
    variables: &VariableTable,
    variable: Variable,
) -> Result<Origin, IrError> {
    varmap
        .get(&variable)
        .copied()
        .ok_or_else(|| IrError::UndefinedReference(variables.get(variable).name.clone()))
}

#[allow(clippy::too_many_arguments)]
fn convert_structure(
    graph: &mut Graph,
    tree: &AggregationTree,
    id: StructureId,
    demand: &DemandMap,
    variables: &VariableTable,
    region: Region,
    varmap: &mut FxHashMap<Variable, Origin>,
    exit: &mut Option<Vec<Variable>>,
) -> Result<(), IrError> {
    match &tree.node(id).structure {
        Structure::Entry { .. } => Ok(()),
        Structure::Exit { results } => {
            *exit = Some(results.clone());
            Ok(())
        }
        Structure::Block(block) => emit_block(graph, region, block, variables, varmap),
        Structure::Linear => {
            for child in &tree.node(id).children {
                convert_structure(graph, tree, *child, demand, variables, region, varmap, exit)?;
            }
            Ok(())
        }
        Structure::Branch { split, join } => {
            emit_block(graph, region, split, variables, varmap)?;
            let predicate_var = match split.last() {
                Some(tac) if matches!(tac.operation, Operation::Branch { .. }) => tac.operands[0],
                _ => {
                    return Err(IrError::InvalidInput(
                        "branch split block lacks a terminating branch".into(),
                    ));
                }
            };
            let predicate = lookup(varmap, variables, predicate_var)?;
            let children = tree.node(id).children.clone();
            let expected = Type::control(children.len() as u32);
            let found = graph.origin_type(predicate);
            if found != expected {
                return Err(IrError::TypeMismatch { expected, found });
            }

            let ds = &demand[&id];
            let mut entry_vars: Vec<Variable> = ds.cases_top.iter().copied().collect();
            entry_vars.sort_unstable();
            let mut exit_vars: Vec<Variable> = ds.cases_bottom.iter().copied().collect();
            exit_vars.sort_unstable();

            let gamma = graph.add_gamma(region, predicate, children.len());
            let mut case_arguments: Vec<Vec<Origin>> = vec![Vec::new(); children.len()];
            for variable in &entry_vars {
                let origin = lookup(varmap, variables, *variable)?;
                for (case, argument) in graph.gamma_add_entry_var(gamma, origin).into_iter().enumerate()
                {
                    case_arguments[case].push(argument);
                }
            }
            let subregions = graph.gamma_subregions(gamma).to_vec();

            let mut case_results: Vec<Vec<Origin>> = Vec::with_capacity(children.len());
            for (case, child) in children.iter().enumerate() {
                let mut inner: FxHashMap<Variable, Origin> = entry_vars
                    .iter()
                    .copied()
                    .zip(case_arguments[case].iter().copied())
                    .collect();
                convert_structure(
                    graph,
                    tree,
                    *child,
                    demand,
                    variables,
                    subregions[case],
                    &mut inner,
                    exit,
                )?;
                case_results.push(
                    exit_vars
                        .iter()
                        .map(|variable| lookup(&inner, variables, *variable))
                        .collect::<Result<_, _>>()?,
                );
            }
            for (position, variable) in exit_vars.iter().enumerate() {
                let per_case: Vec<Origin> =
                    case_results.iter().map(|results| results[position]).collect();
                let output = graph.gamma_add_exit_var(gamma, &per_case);
                varmap.insert(*variable, output);
            }
            emit_block(graph, region, join, variables, varmap)
        }
        Structure::Loop { predicate } => {
            let ds = &demand[&id];
            let mut loop_vars: Vec<Variable> =
                ds.top.union(&ds.bottom).copied().collect();
            loop_vars.sort_unstable();

            let theta = graph.add_theta(region);
            for variable in &loop_vars {
                let init = match varmap.get(variable) {
                    Some(origin) => *origin,
                    None => {
                        // Defined inside the loop before any outside
                        // definition; seed the back edge with undef.
                        let ty = variables.ty(*variable).clone();
                        graph.add_simple(region, Operation::Undef(ty), &[])[0]
                    }
                };
                graph.theta_add_loop_var(theta, init);
            }
            let subregion = graph.theta_subregion(theta);
            let mut inner: FxHashMap<Variable, Origin> = loop_vars
                .iter()
                .enumerate()
                .map(|(index, variable)| (*variable, graph.argument(subregion, index)))
                .collect();
            let child = tree.node(id).children[0];
            convert_structure(
                graph, tree, child, demand, variables, subregion, &mut inner, exit,
            )?;

            let predicate_origin = lookup(&inner, variables, *predicate)?;
            let found = graph.origin_type(predicate_origin);
            if found != Type::control(2) {
                return Err(IrError::TypeMismatch {
                    expected: Type::control(2),
                    found,
                });
            }
            let results: Vec<Origin> = loop_vars
                .iter()
                .map(|variable| lookup(&inner, variables, *variable))
                .collect::<Result<_, _>>()?;
            graph.theta_finish(theta, predicate_origin, &results);
            for (index, variable) in loop_vars.iter().enumerate() {
                varmap.insert(*variable, Origin::output(theta, index));
            }
            Ok(())
        }
    }
}

/// Emit one simple node per TAC. Branch operations are structural; they were
/// consumed by aggregation and are skipped here.
fn emit_block(
    graph: &mut Graph,
    region: Region,
    block: &BasicBlock,
    variables: &VariableTable,
    varmap: &mut FxHashMap<Variable, Origin>,
) -> Result<(), IrError> {
    for tac in block {
        if matches!(tac.operation, Operation::Branch { .. }) {
            continue;
        }
        emit_tac(graph, region, tac, variables, varmap)?;
    }
    Ok(())
}

fn emit_tac(
    graph: &mut Graph,
    region: Region,
    tac: &Tac,
    variables: &VariableTable,
    varmap: &mut FxHashMap<Variable, Origin>,
) -> Result<(), IrError> {
    let signature = tac.operation.signature();
    if signature.inputs.len() != tac.operands.len()
        || signature.outputs.len() != tac.results.len()
    {
        return Err(IrError::InvalidInput(format!(
            "operation '{}' applied with wrong arity",
            tac.operation
        )));
    }
    let mut origins = Vec::with_capacity(tac.operands.len());
    for (variable, expected) in tac.operands.iter().zip(signature.inputs.iter()) {
        let origin = lookup(varmap, variables, *variable)?;
        let found = graph.origin_type(origin);
        if &found != expected {
            return Err(IrError::TypeMismatch {
                expected: expected.clone(),
                found,
            });
        }
        origins.push(origin);
    }
    for (variable, expected) in tac.results.iter().zip(signature.outputs.iter()) {
        let declared = variables.ty(*variable);
        if declared != expected {
            return Err(IrError::TypeMismatch {
                expected: expected.clone(),
                found: declared.clone(),
            });
        }
    }
    let outputs = graph.add_simple(region, tac.operation.clone(), &origins);
    for (variable, origin) in tac.results.iter().zip(outputs.iter()) {
        varmap.insert(*variable, *origin);
    }
    Ok(())
}

/// Convert a global-data definition into a delta node. The initializer CFG
/// must be a straight line: entry, one block, exit with a single result.
fn convert_data(
    rvsdg: &mut RvsdgModule,
    data: &rvopt_ir::DataDef,
    symbols: &mut FxHashMap<String, Origin>,
) -> Result<(), IrError> {
    let root = rvsdg.graph.root();
    let delta = rvsdg.graph.add_delta(
        root,
        data.name.clone(),
        data.ty.clone(),
        data.linkage,
        data.constant,
    );
    let subregion = rvsdg.graph.delta_subregion(delta);

    let (block, result) = initializer_shape(&data.initializer, &data.name)?;
    let variables = &data.initializer.variables;
    let mut varmap: FxHashMap<Variable, Origin> = FxHashMap::default();
    let mut dependencies: FxHashMap<String, Origin> = FxHashMap::default();
    for tac in block {
        if matches!(tac.operation, Operation::Branch { .. }) {
            continue;
        }
        // Resolve symbol references through delta dependencies first.
        for variable in &tac.operands {
            if varmap.contains_key(variable) {
                continue;
            }
            let info = variables.get(*variable);
            if let Some(symbol) = &info.symbol {
                let origin = match dependencies.get(symbol) {
                    Some(origin) => *origin,
                    None => {
                        let external = symbols.get(symbol).copied().ok_or_else(|| {
                            IrError::UndefinedReference(symbol.clone())
                        })?;
                        let argument = rvsdg.graph.delta_add_dependency(delta, external);
                        dependencies.insert(symbol.clone(), argument);
                        argument
                    }
                };
                varmap.insert(*variable, origin);
            }
        }
        emit_tac(&mut rvsdg.graph, subregion, tac, variables, &mut varmap)?;
    }
    let initializer = lookup(&varmap, variables, result)?;
    rvsdg.graph.delta_finish(delta, initializer);

    let origin = Origin::output(delta, 0);
    symbols.insert(data.name.clone(), origin);
    if data.linkage == Linkage::External {
        rvsdg.add_export(origin, data.name.clone());
    }
    Ok(())
}

fn initializer_shape<'a>(
    cfg: &'a ControlFlowGraph,
    name: &str,
) -> Result<(&'a BasicBlock, Variable), IrError> {
    let malformed = || {
        IrError::InvalidInput(format!(
            "initializer of '{name}' is not a straight-line block"
        ))
    };
    let entry_succs = cfg.successors(cfg.entry());
    if entry_succs.len() != 1 {
        return Err(malformed());
    }
    let block_node = entry_succs[0];
    if cfg.successors(block_node) != [cfg.exit()] {
        return Err(malformed());
    }
    let CfgAttribute::Block(block) = &cfg.node(block_node).attribute else {
        return Err(malformed());
    };
    let CfgAttribute::Exit { results } = &cfg.node(cfg.exit()).attribute else {
        return Err(malformed());
    };
    let [result] = results.as_slice() else {
        return Err(malformed());
    };
    Ok((block, *result))
}
