//! Writer for the textual module format: the inverse of the reader, used to
//! hand the lowered module to the external back-end.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use rvopt_ir::{
    ConstantValue, FunctionDef, Module, Operation, Type,
    cfg::{CfgAttribute, CfgNode, ControlFlowGraph},
    tac::{Tac, Variable},
};

pub fn write_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", module.name);
    for import in &module.imports {
        let _ = writeln!(
            out,
            "import @{} : {} {}",
            import.name, import.ty, import.linkage
        );
    }
    for data in &module.data {
        let constant = if data.constant { " constant" } else { "" };
        let _ = writeln!(
            out,
            "data @{} : {} {}{} {{",
            data.name, data.ty, data.linkage, constant
        );
        write_straight_line(&mut out, &data.initializer);
        let _ = writeln!(out, "}}");
    }
    for function in &module.functions {
        write_function(&mut out, function);
    }
    out
}

fn operand_name(cfg: &ControlFlowGraph, variable: Variable) -> String {
    let data = cfg.variables.get(variable);
    match &data.symbol {
        Some(symbol) => format!("@{symbol}"),
        None => data.name.clone(),
    }
}

fn write_tac(out: &mut String, cfg: &ControlFlowGraph, tac: &Tac) {
    let results: Vec<String> = tac
        .results
        .iter()
        .map(|v| format!("{} : {}", operand_name(cfg, *v), cfg.variables.ty(*v)))
        .collect();
    let operands: Vec<String> = tac.operands.iter().map(|v| operand_name(cfg, *v)).collect();
    let text = match &tac.operation {
        Operation::Constant(ConstantValue::Int { bits, value }) => {
            format!("const.i{bits} {value}")
        }
        Operation::Constant(ConstantValue::Control {
            alternatives,
            value,
        }) => format!("ctlconst.{alternatives} {value}"),
        Operation::Match { mapping, .. } => {
            let mut text = format!("match {}", operands.join(", "));
            for (value, alternative) in mapping.cases.iter() {
                let _ = write!(text, ", {value}:{alternative}");
            }
            let _ = write!(text, ", default:{}", mapping.default);
            let _ = writeln!(out, "  {} = {text}", results.join(", "));
            return;
        }
        Operation::Binary(kind, ty) => {
            format!(
                "{}.{ty} {}",
                format!("{kind:?}").to_lowercase(),
                operands.join(", ")
            )
        }
        Operation::Unary(kind, ty) => {
            format!(
                "{}.{ty} {}",
                format!("{kind:?}").to_lowercase(),
                operands.join(", ")
            )
        }
        Operation::Copy(ty) => format!("copy.{ty} {}", operands.join(", ")),
        Operation::Undef(ty) => format!("undef.{ty}"),
        Operation::Alloca { pointee } => format!("alloca.{pointee} {}", operands.join(", ")),
        Operation::Malloc => format!("malloc {}", operands.join(", ")),
        Operation::Load { ty, .. } => format!("load.{ty} {}", operands.join(", ")),
        Operation::Store { ty, .. } => format!("store.{ty} {}", operands.join(", ")),
        Operation::Mux { .. } => format!("mux {}", operands.join(", ")),
        Operation::Call(_) => format!("call {}", operands.join(", ")),
        Operation::DataMarker(ty) => format!("data.{ty} {}", operands.join(", ")),
        Operation::Test { .. } => format!("testop {}", operands.join(", ")),
        Operation::Branch { .. } => unreachable!("branches are printed as terminators"),
    };
    if results.is_empty() {
        // Only branches have no results, and they are handled separately.
        let _ = writeln!(out, "  {text}");
    } else {
        let _ = writeln!(out, "  {} = {text}", results.join(", "));
    }
}

fn write_straight_line(out: &mut String, cfg: &ControlFlowGraph) {
    let entry_succs = cfg.successors(cfg.entry());
    if let Some(&block) = entry_succs.first()
        && let CfgAttribute::Block(body) = &cfg.node(block).attribute
    {
        for tac in body {
            write_tac(out, cfg, tac);
        }
    }
    if let CfgAttribute::Exit { results } = &cfg.node(cfg.exit()).attribute {
        let names: Vec<String> = results.iter().map(|v| operand_name(cfg, *v)).collect();
        let _ = writeln!(out, "  return {}", names.join(", "));
    }
}

fn write_function(out: &mut String, function: &FunctionDef) {
    let cfg = &function.cfg;
    let params: Vec<String> = match &cfg.node(cfg.entry()).attribute {
        CfgAttribute::Entry { arguments } => arguments
            .iter()
            .map(|v| format!("{} : {}", operand_name(cfg, *v), cfg.variables.ty(*v)))
            .collect(),
        _ => Vec::new(),
    };
    let results: Vec<String> = function
        .signature
        .results()
        .iter()
        .map(Type::to_string)
        .collect();
    let _ = writeln!(
        out,
        "function @{}({}) -> ({}) {} {{",
        function.name,
        params.join(", "),
        results.join(", "),
        function.linkage
    );

    // Number the blocks in reverse postorder; the entry's successor is 0.
    let mut numbers: FxHashMap<CfgNode, u32> = FxHashMap::default();
    let mut order: Vec<CfgNode> = Vec::new();
    for node in cfg.reverse_postorder() {
        if matches!(cfg.node(node).attribute, CfgAttribute::Block(_)) {
            numbers.insert(node, order.len() as u32);
            order.push(node);
        }
    }

    for node in order {
        let _ = writeln!(out, "block {}:", numbers[&node]);
        let CfgAttribute::Block(block) = &cfg.node(node).attribute else {
            unreachable!()
        };
        let mut terminated = false;
        for tac in block {
            if let Operation::Branch { .. } = tac.operation {
                let mut targets: Vec<String> = vec![operand_name(cfg, tac.operands[0])];
                targets.extend(
                    cfg.successors(node)
                        .iter()
                        .map(|succ| numbers[succ].to_string()),
                );
                let _ = writeln!(out, "  branch {}", targets.join(", "));
                terminated = true;
            } else {
                write_tac(out, cfg, tac);
            }
        }
        if !terminated {
            match cfg.successors(node) {
                [succ] if *succ == cfg.exit() => {
                    let CfgAttribute::Exit { results } = &cfg.node(cfg.exit()).attribute else {
                        unreachable!()
                    };
                    let names: Vec<String> =
                        results.iter().map(|v| operand_name(cfg, *v)).collect();
                    let _ = writeln!(out, "  return {}", names.join(", "));
                }
                [succ] => {
                    let _ = writeln!(out, "  jump {}", numbers[succ]);
                }
                other => {
                    unreachable!("block without branch has {} successors", other.len())
                }
            }
        }
    }
    let _ = writeln!(out, "}}");
}
