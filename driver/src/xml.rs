//! Internal graph dump in a nested XML form, selected with `--xml`.

use std::fmt::Write;

use rvopt_ir::{RvsdgModule, rvsdg::{Graph, NodeKind, Region, TopDownTraverser}};

pub fn write_graph(module: &RvsdgModule) -> String {
    let graph = &module.graph;
    let mut out = String::new();
    let _ = writeln!(out, "<rvsdg module=\"{}\">", module.name);
    write_region(graph, graph.root(), 1, &mut out);
    let _ = writeln!(out, "</rvsdg>");
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_region(graph: &Graph, region: Region, depth: usize, out: &mut String) {
    indent(out, depth);
    let data = graph.region(region);
    let _ = writeln!(
        out,
        "<region id=\"{region}\" arguments=\"{}\" results=\"{}\">",
        data.arguments.len(),
        data.results.len()
    );
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        let data = graph.node(node);
        let kind = match &data.kind {
            NodeKind::Simple(op) => format!("{op}"),
            NodeKind::Gamma { .. } => "gamma".to_string(),
            NodeKind::Theta { .. } => "theta".to_string(),
            NodeKind::Lambda(lambda) => format!("lambda name=\"{}\"", lambda.name),
            NodeKind::Phi { .. } => "phi".to_string(),
            NodeKind::Delta(delta) => format!("delta name=\"{}\"", delta.name),
        };
        indent(out, depth + 1);
        let _ = writeln!(
            out,
            "<node id=\"{node}\" op=\"{kind}\" inputs=\"{}\" outputs=\"{}\">",
            data.inputs.len(),
            data.outputs.len()
        );
        for subregion in data.kind.subregions() {
            write_region(graph, *subregion, depth + 2, out);
        }
        indent(out, depth + 1);
        let _ = writeln!(out, "</node>");
    }
    indent(out, depth);
    let _ = writeln!(out, "</region>");
}
