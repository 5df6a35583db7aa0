//! End-to-end conversion tests: construction scenarios and the round-trip
//! law `destruct(construct(aggregate(C))) ≡ C` up to observable behavior,
//! checked with a small TAC evaluator over integer functions.

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use rvopt_conversion::{construct, destruct};
use rvopt_ir::{
    DataDef, FunctionDef, FunctionType, Import, Linkage, MatchMapping, Module, Operation, Type,
    cfg::{CfgAttribute, ControlFlowGraph},
    ops::{BinaryKind, ConstantValue},
    rvsdg::NodeKind,
    tac::{BasicBlock, Tac, Variable, VariableTable},
};

// ------------------------------------------------------------------
// A minimal evaluator for integer CFG functions.

fn evaluate(function: &FunctionDef, arguments: &[u64]) -> Vec<u64> {
    let cfg = &function.cfg;
    let mut env: FxHashMap<Variable, u64> = FxHashMap::default();
    let CfgAttribute::Entry { arguments: params } = &cfg.node(cfg.entry()).attribute else {
        panic!("missing entry");
    };
    assert_eq!(params.len(), arguments.len());
    for (param, value) in params.iter().zip(arguments) {
        env.insert(*param, *value);
    }

    let mut node = cfg.successors(cfg.entry())[0];
    for _ in 0..100_000 {
        match &cfg.node(node).attribute {
            CfgAttribute::Exit { results } => {
                return results.iter().map(|v| env[v]).collect();
            }
            CfgAttribute::Block(block) => {
                let mut taken = None;
                for tac in block {
                    step(tac, &mut env, &mut taken);
                }
                let successors = cfg.successors(node);
                node = match taken {
                    Some(alternative) => successors[alternative],
                    None => successors[0],
                };
            }
            CfgAttribute::Entry { .. } => panic!("control reached the entry"),
        }
    }
    panic!("evaluation did not terminate");
}

fn step(tac: &Tac, env: &mut FxHashMap<Variable, u64>, taken: &mut Option<usize>) {
    let operand = |index: usize| env[&tac.operands[index]];
    match &tac.operation {
        Operation::Constant(ConstantValue::Int { value, .. }) => {
            env.insert(tac.results[0], *value);
        }
        Operation::Constant(ConstantValue::Control { value, .. }) => {
            env.insert(tac.results[0], *value as u64);
        }
        Operation::Binary(kind, Type::Int { bits }) => {
            let value = kind.apply(*bits, operand(0), operand(1)).expect("defined input");
            env.insert(tac.results[0], value);
        }
        Operation::Unary(kind, Type::Int { bits }) => {
            env.insert(tac.results[0], kind.apply(*bits, operand(0)));
        }
        Operation::Copy(_) => {
            env.insert(tac.results[0], operand(0));
        }
        Operation::Match { mapping, .. } => {
            env.insert(tac.results[0], mapping.select(operand(0)) as u64);
        }
        Operation::Branch { .. } => {
            *taken = Some(operand(0) as usize);
        }
        Operation::Undef(_) => {
            env.insert(tac.results[0], 0);
        }
        other => panic!("evaluator does not support '{other}'"),
    }
}

// ------------------------------------------------------------------
// Module builders.

fn match_two() -> Operation {
    Operation::Match {
        bits: 1,
        mapping: MatchMapping {
            cases: [(1u64, 1u32)].into(),
            default: 0,
            alternatives: 2,
        },
    }
}

/// `f(a, b) = if a == b { a + b } else { a - b }`
fn diamond_function() -> FunctionDef {
    let mut variables = VariableTable::new();
    let a = variables.add("a", Type::I32);
    let b = variables.add("b", Type::I32);
    let c = variables.add("c", Type::I1);
    let p = variables.add("p", Type::control(2));
    let r = variables.add("r", Type::I32);

    let mut split = BasicBlock::new();
    split.append(Tac::new(
        Operation::Binary(BinaryKind::Eq, Type::I32),
        [a, b],
        [c],
    ));
    split.append(Tac::new(match_two(), [c], [p]));
    split.append(Tac::new(Operation::Branch { alternatives: 2 }, [p], []));
    let mut on_ne = BasicBlock::new();
    on_ne.append(Tac::new(
        Operation::Binary(BinaryKind::Sub, Type::I32),
        [a, b],
        [r],
    ));
    let mut on_eq = BasicBlock::new();
    on_eq.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [a, b],
        [r],
    ));
    let join = BasicBlock::new();

    let mut cfg = ControlFlowGraph::new(vec![a, b], vec![r], variables);
    let split = cfg.add_block(split);
    let on_ne = cfg.add_block(on_ne);
    let on_eq = cfg.add_block(on_eq);
    let join = cfg.add_block(join);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, split);
    cfg.connect(split, on_ne);
    cfg.connect(split, on_eq);
    cfg.connect(on_ne, join);
    cfg.connect(on_eq, join);
    cfg.connect(join, exit);

    FunctionDef {
        name: "select".into(),
        signature: FunctionType::new([Type::I32, Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

/// `f(n) = { s = 0; i = 0; do { s += i; i += 1 } while (i < n); s }`
fn loop_function() -> FunctionDef {
    let mut variables = VariableTable::new();
    let n = variables.add("n", Type::I32);
    let s = variables.add("s", Type::I32);
    let i = variables.add("i", Type::I32);
    let one = variables.add("one", Type::I32);
    let c = variables.add("c", Type::I1);
    let q = variables.add("q", Type::control(2));

    let mut init = BasicBlock::new();
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [s],
    ));
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [i],
    ));
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
        [],
        [one],
    ));
    let mut body = BasicBlock::new();
    body.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [s, i],
        [s],
    ));
    body.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [i, one],
        [i],
    ));
    body.append(Tac::new(
        Operation::Binary(BinaryKind::SLt, Type::I32),
        [i, n],
        [c],
    ));
    body.append(Tac::new(match_two(), [c], [q]));
    body.append(Tac::new(Operation::Branch { alternatives: 2 }, [q], []));
    let tail = BasicBlock::new();

    let mut cfg = ControlFlowGraph::new(vec![n], vec![s], variables);
    let init = cfg.add_block(init);
    let body = cfg.add_block(body);
    let tail = cfg.add_block(tail);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, init);
    cfg.connect(init, body);
    cfg.connect(body, tail);
    cfg.connect(body, body);
    cfg.connect(tail, exit);

    FunctionDef {
        name: "sum".into(),
        signature: FunctionType::new([Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

fn module_of(function: FunctionDef) -> Module {
    Module {
        name: "test".into(),
        functions: vec![function],
        ..Module::default()
    }
}

// ------------------------------------------------------------------
// Scenarios.

#[test]
fn delta_with_dependency() {
    // An import, one external constant delta depending on it, and one
    // internal non-constant delta.
    let mut module = Module {
        name: "deltas".into(),
        ..Module::default()
    };
    module.imports.push(Import {
        name: "x".into(),
        ty: Type::I32,
        linkage: Linkage::External,
    });

    let d1 = {
        let mut variables = VariableTable::new();
        let x = variables.add_symbol_ref("x", Type::I32);
        let v = variables.add("v", Type::I32);
        let mut block = BasicBlock::new();
        block.append(Tac::new(
            Operation::test(&[Type::I32], &[Type::I32]),
            [x],
            [v],
        ));
        let mut cfg = ControlFlowGraph::new(vec![], vec![v], variables);
        let body = cfg.add_block(block);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        DataDef {
            name: "d1".into(),
            ty: Type::I32,
            linkage: Linkage::External,
            constant: true,
            initializer: cfg,
        }
    };
    let d2 = {
        let mut variables = VariableTable::new();
        let v = variables.add("v", Type::I32);
        let mut block = BasicBlock::new();
        block.append(Tac::new(Operation::test(&[], &[Type::I32]), [], [v]));
        let mut cfg = ControlFlowGraph::new(vec![], vec![v], variables);
        let body = cfg.add_block(block);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        DataDef {
            name: "d2".into(),
            ty: Type::I32,
            linkage: Linkage::Internal,
            constant: false,
            initializer: cfg,
        }
    };
    module.data.push(d1);
    module.data.push(d2);

    let rvsdg = construct(&module).unwrap();
    let graph = &rvsdg.graph;
    let root = graph.root();
    assert_eq!(graph.region(root).nodes.len(), 2);

    let delta1 = graph.delta_data(graph.region(root).nodes[0]);
    assert_eq!(delta1.name, "d1");
    assert_eq!(delta1.linkage, Linkage::External);
    assert!(delta1.constant);
    assert_eq!(delta1.ty, Type::I32);

    let delta2 = graph.delta_data(graph.region(root).nodes[1]);
    assert_eq!(delta2.name, "d2");
    assert_eq!(delta2.linkage, Linkage::Internal);
    assert!(!delta2.constant);
}

#[test]
fn diamond_constructs_a_gamma() {
    let module = module_of(diamond_function());
    let rvsdg = construct(&module).unwrap();
    let graph = &rvsdg.graph;
    let lambda = graph.region(graph.root()).nodes[0];
    let body = graph.lambda_subregion(lambda);
    let gammas = graph
        .region(body)
        .nodes
        .iter()
        .filter(|n| matches!(graph.node(**n).kind, NodeKind::Gamma { .. }))
        .count();
    assert_eq!(gammas, 1);
}

#[test]
fn loop_constructs_a_theta() {
    let module = module_of(loop_function());
    let rvsdg = construct(&module).unwrap();
    let graph = &rvsdg.graph;
    let lambda = graph.region(graph.root()).nodes[0];
    let body = graph.lambda_subregion(lambda);
    let thetas = graph
        .region(body)
        .nodes
        .iter()
        .filter(|n| matches!(graph.node(**n).kind, NodeKind::Theta { .. }))
        .count();
    assert_eq!(thetas, 1);
}

#[test]
fn round_trip_preserves_diamond_behavior() {
    let function = diamond_function();
    let module = module_of(function.clone());
    let lowered = destruct(&construct(&module).unwrap()).unwrap();
    assert_eq!(lowered.functions.len(), 1);
    for (a, b) in [(1u64, 1u64), (5, 3), (3, 5), (0, 0), (7, 9)] {
        assert_eq!(
            evaluate(&function, &[a, b]),
            evaluate(&lowered.functions[0], &[a, b]),
            "diverged on ({a}, {b})"
        );
    }
}

#[test]
fn round_trip_preserves_loop_behavior() {
    let function = loop_function();
    let module = module_of(function.clone());
    let lowered = destruct(&construct(&module).unwrap()).unwrap();
    for n in 0..12u64 {
        assert_eq!(
            evaluate(&function, &[n]),
            evaluate(&lowered.functions[0], &[n]),
            "diverged on n = {n}"
        );
    }
}

#[test]
fn round_trip_is_stable_under_reconversion() {
    // The lowered module must itself convert and lower again.
    let module = module_of(loop_function());
    let lowered = destruct(&construct(&module).unwrap()).unwrap();
    let again = destruct(&construct(&lowered).unwrap()).unwrap();
    for n in 0..8u64 {
        assert_eq!(
            evaluate(&lowered.functions[0], &[n]),
            evaluate(&again.functions[0], &[n]),
        );
    }
}

#[test]
fn branch_demand_covers_all_cases() {
    use rvopt_conversion::{aggregate, annotate};

    let function = diamond_function();
    let tree = aggregate(&function.cfg, &function.name).unwrap();
    let demand = annotate(&tree);
    // Find the branch structure and check the union-over-branches property:
    // each case's entry demand is contained in cases_top.
    for id in tree.ids() {
        if matches!(
            tree.node(id).structure,
            rvopt_conversion::Structure::Branch { .. }
        ) {
            let ds = &demand[&id];
            for child in &tree.node(id).children {
                let child_top = &demand[child].top;
                assert!(child_top.is_subset(&ds.cases_top));
            }
            return;
        }
    }
    panic!("no branch structure found");
}
