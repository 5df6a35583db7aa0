//! Pass scenarios: each builds a small module, converts it, runs a pass, and
//! checks the resulting graph shape — and, where control flow is involved,
//! that lowering and re-evaluating the function preserves its behavior.

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use rvopt_conversion::{construct, destruct};
use rvopt_ir::{
    FunctionDef, FunctionType, Linkage, MatchMapping, Module, Operation, RvsdgModule, Type,
    cfg::{CfgAttribute, ControlFlowGraph},
    ops::{BinaryKind, ConstantValue},
    rvsdg::{Node, NodeKind, Origin},
    tac::{BasicBlock, Tac, Variable, VariableTable},
};
use rvopt_session::StatisticsDescriptor;
use rvopt_transform::{
    Pass, cne::common_node_elimination, dne::dead_node_elimination, invert::invert_thetas,
    ivr::redirect_invariant_values, pull::pull_in, push::push_out, unroll::unroll_thetas,
};

// ------------------------------------------------------------------
// Shared helpers.

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

fn module_of(function: FunctionDef) -> Module {
    Module {
        name: "test".into(),
        functions: vec![function],
        ..Module::default()
    }
}

fn lambda_body(rvsdg: &RvsdgModule) -> (Node, rvopt_ir::rvsdg::Region) {
    let graph = &rvsdg.graph;
    let lambda = graph.region(graph.root()).nodes[0];
    (lambda, graph.lambda_subregion(lambda))
}

fn count_total_nodes(rvsdg: &RvsdgModule) -> usize {
    rvopt_transform::count_nodes(&rvsdg.graph)
}

fn evaluate(function: &FunctionDef, arguments: &[u64]) -> Vec<u64> {
    let cfg = &function.cfg;
    let mut env: FxHashMap<Variable, u64> = FxHashMap::default();
    let CfgAttribute::Entry { arguments: params } = &cfg.node(cfg.entry()).attribute else {
        panic!("missing entry");
    };
    for (param, value) in params.iter().zip(arguments) {
        env.insert(*param, *value);
    }
    let mut node = cfg.successors(cfg.entry())[0];
    for _ in 0..100_000 {
        match &cfg.node(node).attribute {
            CfgAttribute::Exit { results } => return results.iter().map(|v| env[v]).collect(),
            CfgAttribute::Block(block) => {
                let mut taken = None;
                for tac in block {
                    let operand = |index: usize| env[&tac.operands[index]];
                    match &tac.operation {
                        Operation::Constant(ConstantValue::Int { value, .. }) => {
                            env.insert(tac.results[0], *value);
                        }
                        Operation::Constant(ConstantValue::Control { value, .. }) => {
                            env.insert(tac.results[0], *value as u64);
                        }
                        Operation::Binary(kind, Type::Int { bits }) => {
                            let value = kind.apply(*bits, operand(0), operand(1)).unwrap();
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
                        Operation::Branch { .. } => taken = Some(operand(0) as usize),
                        Operation::Undef(_) => {
                            env.insert(tac.results[0], 0);
                        }
                        other => panic!("evaluator does not support '{other}'"),
                    }
                }
                let successors = cfg.successors(node);
                node = match taken {
                    Some(alternative) => successors[alternative],
                    None => successors[0],
                };
            }
            CfgAttribute::Entry { .. } => unreachable!(),
        }
    }
    panic!("evaluation did not terminate");
}

// ------------------------------------------------------------------
// Dead-node elimination.

/// `f(s) = { p = alloca i32; store p, 0; 42 }` with the state not returned.
fn dead_store_function() -> FunctionDef {
    let mut variables = VariableTable::new();
    let s = variables.add("s", Type::Memory);
    let p = variables.add("p", Type::pointer(Type::I32));
    let s1 = variables.add("s1", Type::Memory);
    let s2 = variables.add("s2", Type::Memory);
    let zero = variables.add("zero", Type::I32);
    let r = variables.add("r", Type::I32);

    let mut block = BasicBlock::new();
    block.append(Tac::new(Operation::Alloca { pointee: Type::I32 }, [s], [p, s1]));
    block.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [zero],
    ));
    block.append(Tac::new(
        Operation::Store {
            ty: Type::I32,
            nstates: 1,
        },
        [p, zero, s1],
        [s2],
    ));
    block.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 42 }),
        [],
        [r],
    ));

    let mut cfg = ControlFlowGraph::new(vec![s], vec![r], variables);
    let body = cfg.add_block(block);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, body);
    cfg.connect(body, exit);
    FunctionDef {
        name: "f".into(),
        signature: FunctionType::new([Type::Memory], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

#[test]
fn dne_removes_unused_alloca_and_store() {
    let mut rvsdg = construct(&module_of(dead_store_function())).unwrap();
    dead_node_elimination(&mut rvsdg);
    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    let nodes = &graph.region(body).nodes;
    assert_eq!(nodes.len(), 1);
    assert!(matches!(
        graph.node(nodes[0]).operation(),
        Some(Operation::Constant(ConstantValue::Int { value: 42, .. }))
    ));
}

#[test]
fn dne_is_idempotent() {
    let mut rvsdg = construct(&module_of(dead_store_function())).unwrap();
    dead_node_elimination(&mut rvsdg);
    let after_first = count_total_nodes(&rvsdg);
    dead_node_elimination(&mut rvsdg);
    assert_eq!(after_first, count_total_nodes(&rvsdg));
}

// ------------------------------------------------------------------
// Common-node elimination.

/// `f(x, y) = { a = x + y; b = x + y; a + b }`
fn redundant_add_function() -> FunctionDef {
    let mut variables = VariableTable::new();
    let x = variables.add("x", Type::I32);
    let y = variables.add("y", Type::I32);
    let a = variables.add("a", Type::I32);
    let b = variables.add("b", Type::I32);
    let r = variables.add("r", Type::I32);

    let mut block = BasicBlock::new();
    block.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [x, y],
        [a],
    ));
    block.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [x, y],
        [b],
    ));
    block.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [a, b],
        [r],
    ));

    let mut cfg = ControlFlowGraph::new(vec![x, y], vec![r], variables);
    let body = cfg.add_block(block);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, body);
    cfg.connect(body, exit);
    FunctionDef {
        name: "f".into(),
        signature: FunctionType::new([Type::I32, Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

#[test]
fn cne_merges_redundant_adds() {
    let mut rvsdg = construct(&module_of(redundant_add_function())).unwrap();
    common_node_elimination(&mut rvsdg.graph);
    dead_node_elimination(&mut rvsdg);

    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    let nodes = &graph.region(body).nodes;
    assert_eq!(nodes.len(), 2, "expected t = x + y and r = t + t");
    let t = nodes[0];
    let r = nodes[1];
    assert_eq!(graph.input_origin(r, 0), Origin::output(t, 0));
    assert_eq!(graph.input_origin(r, 1), Origin::output(t, 0));
}

#[test]
fn cne_is_idempotent() {
    let mut rvsdg = construct(&module_of(redundant_add_function())).unwrap();
    common_node_elimination(&mut rvsdg.graph);
    dead_node_elimination(&mut rvsdg);
    let after_first = count_total_nodes(&rvsdg);
    common_node_elimination(&mut rvsdg.graph);
    dead_node_elimination(&mut rvsdg);
    assert_eq!(after_first, count_total_nodes(&rvsdg));
}

// ------------------------------------------------------------------
// Theta-gamma inversion.

/// `f(a, n) = { i = 0; do { if (a == 1) i += 1 else i += 2; } while (i < n); i }`
fn invariant_branch_loop() -> FunctionDef {
    let mut variables = VariableTable::new();
    let a = variables.add("a", Type::I32);
    let n = variables.add("n", Type::I32);
    let one = variables.add("one", Type::I32);
    let two = variables.add("two", Type::I32);
    let c1 = variables.add("c1", Type::I1);
    let p = variables.add("p", Type::control(2));
    let i = variables.add("i", Type::I32);
    let c = variables.add("c", Type::I1);
    let q = variables.add("q", Type::control(2));

    let mut init = BasicBlock::new();
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
        [],
        [one],
    ));
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 2 }),
        [],
        [two],
    ));
    init.append(Tac::new(
        Operation::Binary(BinaryKind::Eq, Type::I32),
        [a, one],
        [c1],
    ));
    init.append(Tac::new(match_two(), [c1], [p]));
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [i],
    ));

    let mut split = BasicBlock::new();
    split.append(Tac::new(Operation::Branch { alternatives: 2 }, [p], []));
    let mut by_two = BasicBlock::new();
    by_two.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [i, two],
        [i],
    ));
    let mut by_one = BasicBlock::new();
    by_one.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [i, one],
        [i],
    ));
    let mut join = BasicBlock::new();
    join.append(Tac::new(
        Operation::Binary(BinaryKind::SLt, Type::I32),
        [i, n],
        [c],
    ));
    join.append(Tac::new(match_two(), [c], [q]));
    join.append(Tac::new(Operation::Branch { alternatives: 2 }, [q], []));
    let tail = BasicBlock::new();

    let mut cfg = ControlFlowGraph::new(vec![a, n], vec![i], variables);
    let init = cfg.add_block(init);
    let split = cfg.add_block(split);
    let by_two = cfg.add_block(by_two);
    let by_one = cfg.add_block(by_one);
    let join = cfg.add_block(join);
    let tail = cfg.add_block(tail);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, init);
    cfg.connect(init, split);
    cfg.connect(split, by_two);
    cfg.connect(split, by_one);
    cfg.connect(by_two, join);
    cfg.connect(by_one, join);
    cfg.connect(join, tail);
    cfg.connect(join, split);
    cfg.connect(tail, exit);
    FunctionDef {
        name: "f".into(),
        signature: FunctionType::new([Type::I32, Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

#[test]
fn theta_gamma_inversion_restructures_the_loop() {
    let function = invariant_branch_loop();
    let mut rvsdg = construct(&module_of(function.clone())).unwrap();
    assert_eq!(invert_thetas(&mut rvsdg.graph), 1);
    dead_node_elimination(&mut rvsdg);

    // The loop became a branch over per-case loops.
    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    let gamma = graph
        .region(body)
        .nodes
        .iter()
        .copied()
        .find(|n| matches!(graph.node(*n).kind, NodeKind::Gamma { .. }))
        .expect("no gamma after inversion");
    for subregion in graph.gamma_subregions(gamma) {
        let thetas = graph
            .region(*subregion)
            .nodes
            .iter()
            .filter(|n| matches!(graph.node(**n).kind, NodeKind::Theta { .. }))
            .count();
        assert_eq!(thetas, 1);
    }

    // Behavior is unchanged.
    let lowered = destruct(&rvsdg).unwrap();
    for (a, n) in [(1u64, 0u64), (1, 7), (2, 7), (1, 1), (3, 10)] {
        assert_eq!(
            evaluate(&function, &[a, n]),
            evaluate(&lowered.functions[0], &[a, n]),
            "diverged on ({a}, {n})"
        );
    }
}

// ------------------------------------------------------------------
// Loop unrolling.

/// `f(n) = { i = 0; do { i += 1 } while (i < n); i }`
fn counting_loop() -> FunctionDef {
    let mut variables = VariableTable::new();
    let n = variables.add("n", Type::I32);
    let i = variables.add("i", Type::I32);
    let one = variables.add("one", Type::I32);
    let c = variables.add("c", Type::I1);
    let q = variables.add("q", Type::control(2));

    let mut init = BasicBlock::new();
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [i],
    ));
    let mut body = BasicBlock::new();
    body.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
        [],
        [one],
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

    let mut cfg = ControlFlowGraph::new(vec![n], vec![i], variables);
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
        name: "f".into(),
        signature: FunctionType::new([Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    }
}

#[test]
fn unroll_by_four_guards_and_peels() {
    let function = counting_loop();
    let mut rvsdg = construct(&module_of(function.clone())).unwrap();
    assert_eq!(unroll_thetas(&mut rvsdg.graph, 4), 1);

    // The loop is now guarded by a gamma whose taken case holds the
    // unrolled theta plus the residual.
    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    let gamma = graph
        .region(body)
        .nodes
        .iter()
        .copied()
        .find(|n| matches!(graph.node(*n).kind, NodeKind::Gamma { .. }))
        .expect("no guard gamma after unrolling");
    let unrolled_case = graph.gamma_subregions(gamma)[1];
    let thetas = graph
        .region(unrolled_case)
        .nodes
        .iter()
        .filter(|n| matches!(graph.node(**n).kind, NodeKind::Theta { .. }))
        .count();
    assert_eq!(thetas, 1);

    let lowered = destruct(&rvsdg).unwrap();
    for n in 0..20u64 {
        assert_eq!(
            evaluate(&function, &[n]),
            evaluate(&lowered.functions[0], &[n]),
            "diverged on n = {n}"
        );
    }
}

// ------------------------------------------------------------------
// Invariant value redirection, push, pull.

#[test]
fn ivr_redirects_loop_invariant_outputs() {
    let function = invariant_branch_loop();
    let mut rvsdg = construct(&module_of(function)).unwrap();
    // The predicate `p` and the constants ride through the theta unchanged;
    // IVR must find at least those.
    assert!(redirect_invariant_values(&mut rvsdg.graph) > 0);
    dead_node_elimination(&mut rvsdg);
    // Still lowers to something behaviorally valid.
    destruct(&rvsdg).unwrap();
}

#[test]
fn push_out_hoists_invariant_computation() {
    // `f(a, n) = { i = 0; do { k = a + a; i += k; c = i < n } while (c); i }`
    let mut variables = VariableTable::new();
    let a = variables.add("a", Type::I32);
    let n = variables.add("n", Type::I32);
    let i = variables.add("i", Type::I32);
    let k = variables.add("k", Type::I32);
    let c = variables.add("c", Type::I1);
    let q = variables.add("q", Type::control(2));

    let mut init = BasicBlock::new();
    init.append(Tac::new(
        Operation::Constant(ConstantValue::Int { bits: 32, value: 0 }),
        [],
        [i],
    ));
    let mut body = BasicBlock::new();
    body.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [a, a],
        [k],
    ));
    body.append(Tac::new(
        Operation::Binary(BinaryKind::Add, Type::I32),
        [i, k],
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

    let mut cfg = ControlFlowGraph::new(vec![a, n], vec![i], variables);
    let init = cfg.add_block(init);
    let body_node = cfg.add_block(body);
    let tail = cfg.add_block(tail);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, init);
    cfg.connect(init, body_node);
    cfg.connect(body_node, tail);
    cfg.connect(body_node, body_node);
    cfg.connect(tail, exit);
    let function = FunctionDef {
        name: "f".into(),
        signature: FunctionType::new([Type::I32, Type::I32], [Type::I32]),
        linkage: Linkage::External,
        cfg,
    };

    let mut rvsdg = construct(&module_of(function.clone())).unwrap();
    assert!(push_out(&mut rvsdg.graph) > 0);
    dead_node_elimination(&mut rvsdg);

    // `a + a` now lives in the lambda body, outside the theta.
    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    let hoisted = graph.region(body).nodes.iter().any(|node| {
        matches!(
            graph.node(*node).operation(),
            Some(Operation::Binary(BinaryKind::Add, _))
        )
    });
    assert!(hoisted, "a + a was not hoisted out of the loop");

    let lowered = destruct(&rvsdg).unwrap();
    for (a, n) in [(1u64, 5u64), (2, 9), (0, 0)] {
        assert_eq!(
            evaluate(&function, &[a, n]),
            evaluate(&lowered.functions[0], &[a, n])
        );
    }
}

#[test]
fn pull_in_sinks_gamma_only_values() {
    let function = {
        // `f(a, b, p) = if p { a + b } else { b }` where `a + b` is only
        // demanded by the taken case.
        let mut variables = VariableTable::new();
        let a = variables.add("a", Type::I32);
        let b = variables.add("b", Type::I32);
        let x = variables.add("x", Type::I1);
        let p = variables.add("p", Type::control(2));
        let r = variables.add("r", Type::I32);

        let mut split = BasicBlock::new();
        split.append(Tac::new(match_two(), [x], [p]));
        split.append(Tac::new(Operation::Branch { alternatives: 2 }, [p], []));
        let mut case0 = BasicBlock::new();
        case0.append(Tac::new(Operation::Copy(Type::I32), [b], [r]));
        let mut case1 = BasicBlock::new();
        case1.append(Tac::new(
            Operation::Binary(BinaryKind::Add, Type::I32),
            [a, b],
            [r],
        ));
        let join = BasicBlock::new();

        let mut cfg = ControlFlowGraph::new(vec![a, b, x], vec![r], variables);
        let split = cfg.add_block(split);
        let case0 = cfg.add_block(case0);
        let case1 = cfg.add_block(case1);
        let join = cfg.add_block(join);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, split);
        cfg.connect(split, case0);
        cfg.connect(split, case1);
        cfg.connect(case0, join);
        cfg.connect(case1, join);
        cfg.connect(join, exit);
        FunctionDef {
            name: "f".into(),
            signature: FunctionType::new([Type::I32, Type::I32, Type::I1], [Type::I32]),
            linkage: Linkage::External,
            cfg,
        }
    };

    let mut rvsdg = construct(&module_of(function.clone())).unwrap();
    // Seed a parent-region computation used only by the gamma: push the
    // match node itself cannot move, but a value computed before the gamma
    // can. Construction placed `a + b` inside the case already, so exercise
    // pull on a graph where it sits outside instead: build it directly.
    let pulled = pull_in(&mut rvsdg.graph);
    // Nothing to pull in the constructed form; the call must simply hold.
    assert_eq!(pulled, 0);

    let lowered = destruct(&rvsdg).unwrap();
    for (a, b, x) in [(3u64, 4u64, 1u64), (3, 4, 0)] {
        assert_eq!(
            evaluate(&function, &[a, b, x]),
            evaluate(&lowered.functions[0], &[a, b, x])
        );
    }
}

#[test]
fn pull_in_moves_a_node_used_by_one_gamma() {
    // Hand-build: x = a + a in the parent, used only as a gamma entry var.
    let mut rvsdg = RvsdgModule::new("pull");
    let graph = &mut rvsdg.graph;
    let root = graph.root();
    let signature = FunctionType::new([Type::I32, Type::control(2)], [Type::I32]);
    let lambda = graph.add_lambda(root, "f", Linkage::External, signature, &[]);
    let body = graph.lambda_subregion(lambda);
    let a = graph.argument(body, 0);
    let p = graph.argument(body, 1);

    let sum = graph.add_node(body, Operation::Binary(BinaryKind::Add, Type::I32), &[a, a]);
    let gamma = graph.add_gamma(body, p, 2);
    let args_sum = graph.gamma_add_entry_var(gamma, Origin::output(sum, 0));
    let args_a = graph.gamma_add_entry_var(gamma, a);
    let output = graph.gamma_add_exit_var(gamma, &[args_sum[0], args_a[1]]);
    graph.lambda_finish(lambda, &[output]);
    rvsdg.add_export(Origin::output(lambda, 0), "f");

    assert_eq!(pull_in(&mut rvsdg.graph), 1);
    let graph = &rvsdg.graph;
    assert!(!graph.is_live(sum));
    // The sum now lives in subregion 0, where its value was demanded.
    let subregions = graph.gamma_subregions(gamma).to_vec();
    let sums_inside = graph
        .region(subregions[0])
        .nodes
        .iter()
        .filter(|n| {
            matches!(
                graph.node(**n).operation(),
                Some(Operation::Binary(BinaryKind::Add, _))
            )
        })
        .count();
    assert_eq!(sums_inside, 1);
}

// ------------------------------------------------------------------
// Alias analysis + encoding.

#[test]
fn steensgaard_basic_splits_disjoint_state_chains() {
    // Three chained allocas and two stores; after encoding, each store
    // threads exactly the strand of its own points-to class.
    let mut variables = VariableTable::new();
    let s = variables.add("s", Type::Memory);
    let p = variables.add("p", Type::pointer(Type::I32));
    let q = variables.add("q", Type::pointer(Type::pointer(Type::I32)));
    let r = variables.add(
        "r",
        Type::pointer(Type::pointer(Type::pointer(Type::I32))),
    );
    let states: Vec<Variable> = (1..=5).map(|i| variables.add(format!("s{i}"), Type::Memory)).collect();

    let mut block = BasicBlock::new();
    block.append(Tac::new(Operation::Alloca { pointee: Type::I32 }, [s], [p, states[0]]));
    block.append(Tac::new(
        Operation::Alloca {
            pointee: Type::pointer(Type::I32),
        },
        [states[0]],
        [q, states[1]],
    ));
    block.append(Tac::new(
        Operation::Alloca {
            pointee: Type::pointer(Type::pointer(Type::I32)),
        },
        [states[1]],
        [r, states[2]],
    ));
    block.append(Tac::new(
        Operation::Store {
            ty: Type::pointer(Type::I32),
            nstates: 1,
        },
        [q, p, states[2]],
        [states[3]],
    ));
    block.append(Tac::new(
        Operation::Store {
            ty: Type::pointer(Type::pointer(Type::I32)),
            nstates: 1,
        },
        [r, q, states[3]],
        [states[4]],
    ));

    let mut cfg = ControlFlowGraph::new(vec![s], vec![states[4]], variables);
    let body = cfg.add_block(block);
    let (entry, exit) = (cfg.entry(), cfg.exit());
    cfg.connect(entry, body);
    cfg.connect(body, exit);
    let function = FunctionDef {
        name: "f".into(),
        signature: FunctionType::new([Type::Memory], [Type::Memory]),
        linkage: Linkage::External,
        cfg,
    };

    let mut rvsdg = construct(&module_of(function)).unwrap();
    let mut pass = rvopt_transform::SteensgaardBasic;
    pass.run(&mut rvsdg, &StatisticsDescriptor::default());

    let (_, body) = lambda_body(&rvsdg);
    let graph = &rvsdg.graph;
    for &node in &graph.region(body).nodes {
        if let Some(Operation::Store { nstates, .. }) = graph.node(node).operation() {
            assert_eq!(*nstates, 1, "store threads exactly its own class");
        }
    }
}

// ------------------------------------------------------------------
// Termination under random inputs.

mod termination {
    use proptest::prelude::*;
    use rvopt_ir::rvsdg::{Graph, normalize, normal_forms::reduce_node};

    use super::*;

    fn arbitrary_kind(selector: u8) -> BinaryKind {
        match selector % 6 {
            0 => BinaryKind::Add,
            1 => BinaryKind::Sub,
            2 => BinaryKind::Mul,
            3 => BinaryKind::And,
            4 => BinaryKind::Or,
            _ => BinaryKind::Xor,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Random constant expression chains always normalize to a fixpoint.
        #[test]
        fn normalize_terminates(values in prop::collection::vec(0u64..1000, 2..20),
                                kinds in prop::collection::vec(0u8..6, 1..19)) {
            let mut graph = Graph::new();
            graph.normal_forms.enable_all();
            let root = graph.root();
            let mut origins: Vec<Origin> = values
                .iter()
                .map(|value| {
                    let node = graph.add_node(
                        root,
                        Operation::Constant(ConstantValue::Int { bits: 32, value: *value }),
                        &[],
                    );
                    Origin::output(node, 0)
                })
                .collect();
            for kind in kinds {
                if origins.len() < 2 {
                    break;
                }
                let rhs = origins.pop().unwrap();
                let lhs = origins.pop().unwrap();
                let outs = graph.add_simple(
                    root,
                    Operation::Binary(arbitrary_kind(kind), Type::I32),
                    &[lhs, rhs],
                );
                origins.push(outs[0]);
            }
            graph.add_result(root, origins[0]);
            normalize(&mut graph);
            // Fixpoint: no rule fires on any surviving node.
            for region in graph.all_regions() {
                for node in graph.region(region).nodes.clone() {
                    prop_assert!(!reduce_node(&mut graph, node));
                }
            }
        }

        /// DNE and CNE terminate and are idempotent on random loop bodies.
        #[test]
        fn dne_cne_idempotent(n in 0u64..16) {
            let function = counting_loop();
            let mut rvsdg = construct(&module_of(function.clone())).unwrap();
            common_node_elimination(&mut rvsdg.graph);
            dead_node_elimination(&mut rvsdg);
            let count = count_total_nodes(&rvsdg);
            common_node_elimination(&mut rvsdg.graph);
            dead_node_elimination(&mut rvsdg);
            prop_assert_eq!(count, count_total_nodes(&rvsdg));

            let lowered = destruct(&rvsdg).unwrap();
            prop_assert_eq!(
                evaluate(&function, &[n]),
                evaluate(&lowered.functions[0], &[n])
            );
        }
    }
}

// ------------------------------------------------------------------
// Function inlining.

#[test]
fn inlining_replaces_direct_calls() {
    // g(x) = x + 1 (internal, single call site); f(a) = g(a).
    let callee = {
        let mut variables = VariableTable::new();
        let x = variables.add("x", Type::I32);
        let one = variables.add("one", Type::I32);
        let r = variables.add("r", Type::I32);
        let mut block = BasicBlock::new();
        block.append(Tac::new(
            Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
            [],
            [one],
        ));
        block.append(Tac::new(
            Operation::Binary(BinaryKind::Add, Type::I32),
            [x, one],
            [r],
        ));
        let mut cfg = ControlFlowGraph::new(vec![x], vec![r], variables);
        let body = cfg.add_block(block);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        FunctionDef {
            name: "g".into(),
            signature: FunctionType::new([Type::I32], [Type::I32]),
            linkage: Linkage::Internal,
            cfg,
        }
    };
    let caller = {
        let signature = FunctionType::new([Type::I32], [Type::I32]);
        let mut variables = VariableTable::new();
        let a = variables.add("a", Type::I32);
        let g = variables.add_symbol_ref("g", Type::Function(signature.clone()));
        let r = variables.add("r", Type::I32);
        let mut block = BasicBlock::new();
        block.append(Tac::new(Operation::Call(signature.clone()), [g, a], [r]));
        let mut cfg = ControlFlowGraph::new(vec![a], vec![r], variables);
        let body = cfg.add_block(block);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        cfg.connect(entry, body);
        cfg.connect(body, exit);
        FunctionDef {
            name: "f".into(),
            signature,
            linkage: Linkage::External,
            cfg,
        }
    };
    let module = Module {
        name: "inline".into(),
        functions: vec![callee, caller],
        ..Module::default()
    };

    let mut rvsdg = construct(&module).unwrap();
    assert_eq!(rvopt_transform::inline::inline_functions(&mut rvsdg), 1);
    dead_node_elimination(&mut rvsdg);

    // No call remains anywhere in the graph.
    let graph = &rvsdg.graph;
    for region in graph.all_regions() {
        for &node in &graph.region(region).nodes {
            assert!(
                !matches!(graph.node(node).operation(), Some(Operation::Call(_))),
                "call survived inlining"
            );
        }
    }

    let lowered = destruct(&rvsdg).unwrap();
    let f = lowered.functions.iter().find(|f| f.name == "f").unwrap();
    assert_eq!(evaluate(f, &[41]), vec![42]);
}
