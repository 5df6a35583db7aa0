//! Points-to scenarios over hand-built graphs.

use pretty_assertions::assert_eq;

use rvopt_analysis::{MemoryLocation, analyze};
use rvopt_ir::{
    FunctionType, Linkage, Operation, RvsdgModule, Type,
    rvsdg::{Node, Origin},
};

/// `p = alloca; q = alloca; r = alloca; store q, p; store r, q`
fn store_chain() -> (RvsdgModule, Node, Node, Node) {
    let mut module = RvsdgModule::new("store1");
    let graph = &mut module.graph;
    let root = graph.root();
    let signature = FunctionType::new([Type::Memory], [Type::Memory]);
    let lambda = graph.add_lambda(root, "f", Linkage::External, signature, &[]);
    let body = graph.lambda_subregion(lambda);
    let state = graph.argument(body, 0);

    let p = graph.add_node(body, Operation::Alloca { pointee: Type::I32 }, &[state]);
    let q = graph.add_node(
        body,
        Operation::Alloca {
            pointee: Type::pointer(Type::I32),
        },
        &[Origin::output(p, 1)],
    );
    let r = graph.add_node(
        body,
        Operation::Alloca {
            pointee: Type::pointer(Type::pointer(Type::I32)),
        },
        &[Origin::output(q, 1)],
    );
    let store_q = graph.add_node(
        body,
        Operation::Store {
            ty: Type::pointer(Type::I32),
            nstates: 1,
        },
        &[Origin::output(q, 0), Origin::output(p, 0), Origin::output(r, 1)],
    );
    let store_r = graph.add_node(
        body,
        Operation::Store {
            ty: Type::pointer(Type::pointer(Type::I32)),
            nstates: 1,
        },
        &[
            Origin::output(r, 0),
            Origin::output(q, 0),
            Origin::output(store_q, 0),
        ],
    );
    graph.lambda_finish(lambda, &[Origin::output(store_r, 0)]);
    module.add_export(Origin::output(lambda, 0), "f");
    (module, p, q, r)
}

#[test]
fn store_chain_points_to_sets() {
    let (module, p, q, r) = store_chain();
    let analysis = analyze(&module);
    let graph = &analysis.graph;

    // register(r) points exactly at r's location.
    assert_eq!(
        graph.register_points_to(Origin::output(r, 0)),
        vec![MemoryLocation::Alloca(r)]
    );
    // The chain of cells: r's cell holds q, q's cell holds p.
    let r_cell = graph.memory_node(MemoryLocation::Alloca(r)).unwrap();
    assert!(graph.points_to(r_cell).contains(&MemoryLocation::Alloca(q)));
    let q_cell = graph.memory_node(MemoryLocation::Alloca(q)).unwrap();
    assert!(graph.points_to(q_cell).contains(&MemoryLocation::Alloca(p)));
}

#[test]
fn distinct_allocations_stay_in_distinct_classes() {
    let (module, p, q, r) = store_chain();
    let analysis = analyze(&module);
    let p_class = analysis.allocation_class(p).unwrap();
    let q_class = analysis.allocation_class(q).unwrap();
    let r_class = analysis.allocation_class(r).unwrap();
    assert!(p_class != q_class && q_class != r_class && p_class != r_class);
}

#[test]
fn address_classes_are_precise_for_local_allocas() {
    use rvopt_analysis::AddressClasses;

    let (module, _, q, _) = store_chain();
    let analysis = analyze(&module);
    let q_class = analysis.allocation_class(q).unwrap();
    assert_eq!(
        analysis.address_classes(Origin::output(q, 0)),
        AddressClasses::One(q_class)
    );
}
