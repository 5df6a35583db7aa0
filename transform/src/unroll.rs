//! Loop unrolling. A theta with a recognized induction pattern
//! (`iv' = iv + c`, continue while `iv' < bound`, `c` a positive constant,
//! `bound` loop-invariant) is replaced by a gamma-guarded unrolled theta
//! advancing `factor` iterations at a time, plus a residual one-at-a-time
//! theta for the remaining trips.

use rvopt_ir::{
    BinaryKind, ConstantValue, MatchMapping, Operation, RvsdgModule, Type,
    rvsdg::{Graph, Node, NodeKind, Origin, Region, Substitution, copy_node, copy_region_contents},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::Pass;

pub struct LoopUnrolling {
    factor: usize,
}

impl LoopUnrolling {
    pub fn new(factor: usize) -> Self {
        assert!(factor >= 2, "unrolling needs a factor of at least 2");
        Self { factor }
    }
}

impl Default for LoopUnrolling {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Pass for LoopUnrolling {
    fn name(&self) -> &'static str {
        "url"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let unrolled = unroll_thetas(&mut module.graph, self.factor);
        let mut record = Statistics::new(StatisticsId::LoopUnrolling);
        record
            .add("factor", self.factor)
            .add("nunrolled", unrolled)
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

/// The recognized induction shape of an unrollable theta.
struct UnrollInfo {
    /// Loop-variable index of the induction variable.
    iv: usize,
    /// Loop-variable index of the invariant bound.
    bound: usize,
    /// Step constant (known positive).
    step: u64,
    bits: u32,
}

fn unroll_info(graph: &Graph, theta: Node) -> Option<UnrollInfo> {
    let body = graph.theta_subregion(theta);

    // predicate = match(slt(iv + step, bound)), continuing on alternative 1
    let Origin::Output {
        node: match_node,
        index: 0,
    } = graph.result_origin(body, 0)
    else {
        return None;
    };
    let Some(Operation::Match { mapping, .. }) = graph.node(match_node).operation() else {
        return None;
    };
    if mapping.alternatives != 2 || mapping.select(1) != 1 || mapping.select(0) != 0 {
        return None;
    }
    let Origin::Output {
        node: compare,
        index: 0,
    } = graph.input_origin(match_node, 0)
    else {
        return None;
    };
    let Some(Operation::Binary(BinaryKind::SLt, Type::Int { bits })) =
        graph.node(compare).operation()
    else {
        return None;
    };
    let bits = *bits;

    let Origin::Argument {
        region: bound_region,
        index: bound,
    } = graph.input_origin(compare, 1)
    else {
        return None;
    };
    if bound_region != body
        || graph.result_origin(body, bound + 1) != Origin::argument(body, bound)
    {
        return None;
    }

    let Origin::Output {
        node: step_node,
        index: 0,
    } = graph.input_origin(compare, 0)
    else {
        return None;
    };
    let Some(Operation::Binary(BinaryKind::Add, Type::Int { .. })) =
        graph.node(step_node).operation()
    else {
        return None;
    };
    // Accept the induction variable and the constant in either operand order.
    let mut candidate = None;
    for (arg, konst) in [(0usize, 1usize), (1, 0)] {
        let Origin::Argument { region, index: iv } = graph.input_origin(step_node, arg) else {
            continue;
        };
        if region != body {
            continue;
        }
        let Origin::Output { node: c, index: 0 } = graph.input_origin(step_node, konst) else {
            continue;
        };
        let Some(Operation::Constant(ConstantValue::Int { value, .. })) =
            graph.node(c).operation()
        else {
            continue;
        };
        candidate = Some((iv, *value));
        break;
    }
    let (iv, step) = candidate?;
    if sign_extend(step, bits) <= 0 {
        return None;
    }
    // The induction variable must feed back the incremented value.
    if graph.result_origin(body, iv + 1) != Origin::output(step_node, 0) {
        return None;
    }
    Some(UnrollInfo {
        iv,
        bound,
        step,
        bits,
    })
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

fn mask(value: u64, bits: u32) -> u64 {
    if bits >= 64 { value } else { value & ((1u64 << bits) - 1) }
}

/// Unroll every theta with a recognized induction pattern; returns how many.
pub fn unroll_thetas(graph: &mut Graph, factor: usize) -> usize {
    let mut unrolled = 0;
    for region in graph.all_regions() {
        for node in graph.region(region).nodes.clone() {
            if graph.is_live(node)
                && matches!(graph.node(node).kind, NodeKind::Theta { .. })
                && unroll_theta(graph, node, factor)
            {
                unrolled += 1;
            }
        }
    }
    unrolled
}

/// Emit `match(slt(iv + (factor-1)*step, bound))`: "at least `factor` trips
/// remain".
fn emit_guard(
    graph: &mut Graph,
    region: Region,
    info: &UnrollInfo,
    factor: usize,
    iv: Origin,
    bound: Origin,
) -> Origin {
    let margin = mask(info.step.wrapping_mul(factor as u64 - 1), info.bits);
    let constant = graph.add_node(
        region,
        Operation::Constant(ConstantValue::Int {
            bits: info.bits,
            value: margin,
        }),
        &[],
    );
    let ty = Type::Int { bits: info.bits };
    let sum = graph.add_node(
        region,
        Operation::Binary(BinaryKind::Add, ty.clone()),
        &[iv, Origin::output(constant, 0)],
    );
    let compare = graph.add_node(
        region,
        Operation::Binary(BinaryKind::SLt, ty),
        &[Origin::output(sum, 0), bound],
    );
    let matcher = graph.add_node(
        region,
        Operation::Match {
            bits: 1,
            mapping: MatchMapping {
                cases: [(1u64, 1u32)].into(),
                default: 0,
                alternatives: 2,
            },
        },
        &[Origin::output(compare, 0)],
    );
    Origin::output(matcher, 0)
}

fn unroll_theta(graph: &mut Graph, theta: Node, factor: usize) -> bool {
    let Some(info) = unroll_info(graph, theta) else {
        return false;
    };
    log::debug!(target: "pass:url", "unrolling {theta} by {factor}");
    let body = graph.theta_subregion(theta);
    let parent = graph.node(theta).region;
    let ninputs = graph.node(theta).inputs.len();
    let inputs: Vec<Origin> = (0..ninputs)
        .map(|index| graph.input_origin(theta, index))
        .collect();

    // Outer guard: enough trips for at least one unrolled iteration?
    let guard = emit_guard(
        graph,
        parent,
        &info,
        factor,
        inputs[info.iv],
        inputs[info.bound],
    );
    let outer = graph.add_gamma(parent, guard, 2);
    let mut case_args: Vec<Vec<Origin>> = vec![Vec::new(); 2];
    for origin in &inputs {
        for (case, argument) in graph
            .gamma_add_entry_var(outer, *origin)
            .into_iter()
            .enumerate()
        {
            case_args[case].push(argument);
        }
    }
    let outer_subregions = graph.gamma_subregions(outer).to_vec();

    // Case 0 (fewer than `factor` trips): the loop runs as-is.
    let short_outputs: Vec<Origin> = {
        let mut subst = Substitution::default();
        for (index, origin) in inputs.iter().enumerate() {
            subst.insert(*origin, case_args[0][index]);
        }
        let copy = copy_node(graph, theta, outer_subregions[0], &mut subst);
        (0..ninputs).map(|index| Origin::output(copy, index)).collect()
    };

    // Case 1: the unrolled theta, advancing `factor` trips per iteration.
    let unrolled = graph.add_theta(outer_subregions[1]);
    for index in 0..ninputs {
        graph.theta_add_loop_var(unrolled, case_args[1][index]);
    }
    let unrolled_body = graph.theta_subregion(unrolled);
    let mut previous: Vec<Origin> = (0..ninputs)
        .map(|index| graph.argument(unrolled_body, index))
        .collect();
    for _ in 0..factor {
        let mut subst = Substitution::default();
        for (index, origin) in previous.iter().enumerate() {
            subst.insert(Origin::argument(body, index), *origin);
        }
        copy_region_contents(graph, body, unrolled_body, &mut subst);
        previous = (0..ninputs)
            .map(|index| subst.resolve(graph.result_origin(body, index + 1)))
            .collect();
    }
    let continue_guard = emit_guard(
        graph,
        unrolled_body,
        &info,
        factor,
        previous[info.iv],
        previous[info.bound],
    );
    graph.theta_finish(unrolled, continue_guard, &previous);

    // Residual trips after the unrolled loop exits, guarded by the original
    // continuation predicate so they only run when at least one remains.
    let residual_guard = {
        let ty = Type::Int { bits: info.bits };
        let compare = graph.add_node(
            outer_subregions[1],
            Operation::Binary(BinaryKind::SLt, ty),
            &[
                Origin::output(unrolled, info.iv),
                Origin::output(unrolled, info.bound),
            ],
        );
        let matcher = graph.add_node(
            outer_subregions[1],
            Operation::Match {
                bits: 1,
                mapping: MatchMapping {
                    cases: [(1u64, 1u32)].into(),
                    default: 0,
                    alternatives: 2,
                },
            },
            &[Origin::output(compare, 0)],
        );
        Origin::output(matcher, 0)
    };
    let residual_gamma = graph.add_gamma(outer_subregions[1], residual_guard, 2);
    let mut residual_args: Vec<Vec<Origin>> = vec![Vec::new(); 2];
    for index in 0..ninputs {
        for (case, argument) in graph
            .gamma_add_entry_var(residual_gamma, Origin::output(unrolled, index))
            .into_iter()
            .enumerate()
        {
            residual_args[case].push(argument);
        }
    }
    let residual_subregions = graph.gamma_subregions(residual_gamma).to_vec();
    let residual_outputs: Vec<Origin> = {
        let mut subst = Substitution::default();
        for (index, origin) in inputs.iter().enumerate() {
            subst.insert(*origin, residual_args[1][index]);
        }
        let copy = copy_node(graph, theta, residual_subregions[1], &mut subst);
        (0..ninputs).map(|index| Origin::output(copy, index)).collect()
    };
    let mut inner_outputs = Vec::with_capacity(ninputs);
    for index in 0..ninputs {
        inner_outputs.push(graph.gamma_add_exit_var(
            residual_gamma,
            &[residual_args[0][index], residual_outputs[index]],
        ));
    }

    // Stitch the outer gamma together and replace the original theta.
    let mut final_outputs = Vec::with_capacity(ninputs);
    for index in 0..ninputs {
        final_outputs.push(graph.gamma_add_exit_var(
            outer,
            &[short_outputs[index], inner_outputs[index]],
        ));
    }
    for index in 0..ninputs {
        graph.divert_users(Origin::output(theta, index), final_outputs[index]);
    }
    graph.remove_node(theta);
    true
}
