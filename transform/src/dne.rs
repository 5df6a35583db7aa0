//! Dead-node elimination: a two-phase mark/sweep over the RVSDG.
//!
//! The mark phase seeds liveness at the root region's results and propagates
//! it bottom-up, with per-variant rules for the structural nodes; thetas are
//! re-marked until the loop-carried argument-to-input propagation reaches a
//! fixpoint. The sweep phase removes dead nodes bottom-up and shrinks the
//! ports of surviving structural nodes in strict correspondence, so the
//! arity invariants hold afterwards. The pass is idempotent.

use rustc_hash::FxHashSet;

use rvopt_ir::{
    RvsdgModule,
    rvsdg::{BottomUpTraverser, Graph, Node, NodeKind, Origin, Region, User},
};
use rvopt_session::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

use crate::{Pass, count_nodes};

pub struct DeadNodeElimination;

impl Pass for DeadNodeElimination {
    fn name(&self) -> &'static str {
        "dne"
    }

    fn run(&mut self, module: &mut RvsdgModule, statistics: &StatisticsDescriptor) {
        let timer = Timer::start();
        let before = count_nodes(&module.graph);
        dead_node_elimination(module);
        let mut record = Statistics::new(StatisticsId::DeadNodeElimination);
        record
            .add("nnodes_before", before)
            .add("nnodes_after", count_nodes(&module.graph))
            .add_timing("time", timer.elapsed());
        statistics.print(&record);
    }
}

#[derive(Default)]
struct Liveness {
    origins: FxHashSet<Origin>,
    users: FxHashSet<UserKey>,
}

/// Hashable identity of a user endpoint.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
enum UserKey {
    Input(Node, usize),
    Result(Region, usize),
}

impl From<User> for UserKey {
    fn from(user: User) -> Self {
        match user {
            User::Input { node, index } => UserKey::Input(node, index),
            User::Result { region, index } => UserKey::Result(region, index),
        }
    }
}

impl Liveness {
    fn mark_origin(&mut self, origin: Origin) {
        self.origins.insert(origin);
    }

    fn mark_input(&mut self, graph: &Graph, node: Node, index: usize) {
        if self.users.insert(UserKey::Input(node, index)) {
            self.mark_origin(graph.input_origin(node, index));
        }
    }

    fn mark_result(&mut self, graph: &Graph, region: Region, index: usize) {
        if self.users.insert(UserKey::Result(region, index)) {
            self.mark_origin(graph.result_origin(region, index));
        }
    }

    fn mark_node(&mut self, graph: &Graph, node: Node) {
        for index in 0..graph.node(node).inputs.len() {
            self.mark_input(graph, node, index);
        }
    }

    fn origin_alive(&self, origin: Origin) -> bool {
        self.origins.contains(&origin)
    }

    fn input_alive(&self, node: Node, index: usize) -> bool {
        self.users.contains(&UserKey::Input(node, index))
    }

    fn node_alive(&self, graph: &Graph, node: Node) -> bool {
        (0..graph.node(node).outputs.len()).any(|i| self.origin_alive(Origin::output(node, i)))
    }
}

/// Remove every node, port, and root argument that cannot reach an export.
pub fn dead_node_elimination(module: &mut RvsdgModule) {
    let graph = &mut module.graph;
    let root = graph.root();

    let mut ctx = Liveness::default();
    for index in 0..graph.region(root).results.len() {
        ctx.mark_result(graph, root, index);
    }
    mark_region(graph, root, &mut ctx);

    sweep_region(graph, root, &ctx);
    for index in (0..graph.region(root).arguments.len()).rev() {
        if !ctx.origin_alive(Origin::argument(root, index)) {
            graph.remove_argument(root, index);
            module.imports.remove(index);
        }
    }
}

// ------------------------------------------------------------------
// Mark phase

fn mark_region(graph: &Graph, region: Region, ctx: &mut Liveness) {
    let mut traverser = BottomUpTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        match &graph.node(node).kind {
            NodeKind::Simple(_) => {
                if ctx.node_alive(graph, node) {
                    ctx.mark_node(graph, node);
                }
            }
            NodeKind::Gamma { .. } => mark_gamma(graph, node, ctx),
            NodeKind::Theta { .. } => mark_theta(graph, node, ctx),
            NodeKind::Lambda(_) => mark_lambda(graph, node, ctx),
            NodeKind::Phi { .. } => mark_phi(graph, node, ctx),
            NodeKind::Delta(_) => mark_delta(graph, node, ctx),
        }
    }
}

fn mark_gamma(graph: &Graph, node: Node, ctx: &mut Liveness) {
    let subregions = graph.gamma_subregions(node).to_vec();

    // Exit variables.
    let mut used = false;
    for index in 0..graph.node(node).outputs.len() {
        if ctx.origin_alive(Origin::output(node, index)) {
            for subregion in &subregions {
                ctx.mark_result(graph, *subregion, index);
            }
            used = true;
        }
    }
    if !used {
        return;
    }

    for subregion in &subregions {
        mark_region(graph, *subregion, ctx);
    }

    // Predicate and entry variables.
    ctx.mark_input(graph, node, 0);
    for index in 1..graph.node(node).inputs.len() {
        let alive = subregions
            .iter()
            .any(|subregion| ctx.origin_alive(Origin::argument(*subregion, index - 1)));
        if alive {
            ctx.mark_input(graph, node, index);
        }
    }
}

fn mark_theta(graph: &Graph, node: Node, ctx: &mut Liveness) {
    let subregion = graph.theta_subregion(node);

    // Loop exits and entries.
    let mut used = false;
    for index in 0..graph.node(node).outputs.len() {
        if ctx.origin_alive(Origin::output(node, index)) {
            ctx.mark_result(graph, subregion, index + 1);
            ctx.mark_input(graph, node, index);
            used = true;
        }
    }
    if !used {
        return;
    }

    ctx.mark_result(graph, subregion, 0);
    mark_region(graph, subregion, ctx);

    // Loop-carried dependencies: a live argument keeps its input (and hence
    // its feedback) alive; rerun until nothing new fires.
    let mut remark = false;
    for index in 0..graph.region(subregion).arguments.len() {
        if ctx.origin_alive(Origin::argument(subregion, index)) && !ctx.input_alive(node, index) {
            ctx.mark_input(graph, node, index);
            ctx.mark_origin(Origin::output(node, index));
            remark = true;
        }
    }
    if remark {
        mark_theta(graph, node, ctx);
    }
}

fn mark_lambda(graph: &Graph, node: Node, ctx: &mut Liveness) {
    let data = graph.lambda_data(node);
    let subregion = data.subregion;
    let ncontext = data.ncontext;

    if !ctx.origin_alive(Origin::output(node, 0)) {
        return;
    }

    for index in 0..graph.region(subregion).results.len() {
        ctx.mark_result(graph, subregion, index);
    }
    mark_region(graph, subregion, ctx);

    for index in 0..ncontext {
        if ctx.origin_alive(Origin::argument(subregion, index)) {
            ctx.mark_input(graph, node, index);
        }
    }
}

fn mark_phi(graph: &Graph, node: Node, ctx: &mut Liveness) {
    let subregion = graph.phi_subregion(node);
    let nrec = graph.phi_nrec(node);

    let mut used = false;
    for index in 0..nrec {
        if ctx.origin_alive(Origin::output(node, index)) {
            ctx.mark_result(graph, subregion, index);
            used = true;
        }
    }
    if !used {
        return;
    }

    mark_region(graph, subregion, ctx);

    for index in 0..graph.node(node).inputs.len() {
        if ctx.origin_alive(Origin::argument(subregion, nrec + index)) {
            ctx.mark_input(graph, node, index);
        }
    }
}

fn mark_delta(graph: &Graph, node: Node, ctx: &mut Liveness) {
    if ctx.origin_alive(Origin::output(node, 0)) {
        ctx.mark_node(graph, node);
    }
}

// ------------------------------------------------------------------
// Sweep phase

fn sweep_region(graph: &mut Graph, region: Region, ctx: &Liveness) {
    let mut traverser = BottomUpTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        match &graph.node(node).kind {
            NodeKind::Simple(_) => {
                if !ctx.node_alive(graph, node) {
                    graph.remove_node(node);
                }
            }
            NodeKind::Gamma { .. } => sweep_gamma(graph, node, ctx),
            NodeKind::Theta { .. } => sweep_theta(graph, node, ctx),
            NodeKind::Lambda(_) => sweep_lambda(graph, node, ctx),
            NodeKind::Phi { .. } => sweep_phi(graph, node, ctx),
            NodeKind::Delta(_) => sweep_delta(graph, node, ctx),
        }
    }
}

fn sweep_gamma(graph: &mut Graph, node: Node, ctx: &Liveness) {
    if !ctx.node_alive(graph, node) {
        graph.remove_node(node);
        return;
    }
    let subregions = graph.gamma_subregions(node).to_vec();

    // Exit variables, highest index first so liveness keys stay valid.
    for index in (0..graph.node(node).outputs.len()).rev() {
        if ctx.origin_alive(Origin::output(node, index)) {
            continue;
        }
        for subregion in &subregions {
            graph.remove_result(*subregion, index);
        }
        graph.remove_output(node, index);
    }

    for subregion in &subregions {
        sweep_region(graph, *subregion, ctx);
    }

    // Entry variables whose argument is dead in every subregion.
    for index in (1..graph.node(node).inputs.len()).rev() {
        let alive = subregions
            .iter()
            .any(|subregion| ctx.origin_alive(Origin::argument(*subregion, index - 1)));
        if !alive {
            for subregion in &subregions {
                graph.remove_argument(*subregion, index - 1);
            }
            graph.remove_input(node, index);
        }
    }
}

fn sweep_theta(graph: &mut Graph, node: Node, ctx: &Liveness) {
    if !ctx.node_alive(graph, node) {
        graph.remove_node(node);
        return;
    }
    let subregion = graph.theta_subregion(node);

    // Dead feedback results first (result 0 is the predicate and stays).
    let dead: Vec<usize> = (0..graph.node(node).inputs.len())
        .filter(|index| {
            !ctx.input_alive(node, *index) && !ctx.origin_alive(Origin::output(node, *index))
        })
        .collect();
    for index in dead.iter().rev() {
        graph.remove_result(subregion, index + 1);
    }

    sweep_region(graph, subregion, ctx);

    for index in dead.iter().rev() {
        debug_assert!(graph.users(Origin::argument(subregion, *index)).is_empty());
        graph.remove_argument(subregion, *index);
        graph.remove_input(node, *index);
        graph.remove_output(node, *index);
    }
    debug_assert_eq!(
        graph.node(node).inputs.len(),
        graph.node(node).outputs.len()
    );
    debug_assert_eq!(
        graph.region(subregion).arguments.len(),
        graph.region(subregion).results.len() - 1
    );
}

fn sweep_lambda(graph: &mut Graph, node: Node, ctx: &Liveness) {
    if !ctx.node_alive(graph, node) {
        graph.remove_node(node);
        return;
    }
    let data = graph.lambda_data(node);
    let subregion = data.subregion;
    let ncontext = data.ncontext;

    sweep_region(graph, subregion, ctx);

    // Dead context variables.
    for index in (0..ncontext).rev() {
        if !ctx.origin_alive(Origin::argument(subregion, index)) {
            graph.remove_argument(subregion, index);
            graph.remove_input(node, index);
            *graph.lambda_ncontext_mut(node) -= 1;
        }
    }
}

fn sweep_phi(graph: &mut Graph, node: Node, ctx: &Liveness) {
    if !ctx.node_alive(graph, node) {
        graph.remove_node(node);
        return;
    }
    let subregion = graph.phi_subregion(node);
    let nrec = graph.phi_nrec(node);

    // Capture liveness against the pre-sweep indices; removals shift them.
    let rec_dead: Vec<bool> = (0..nrec)
        .map(|index| {
            !ctx.origin_alive(Origin::output(node, index))
                && !ctx.origin_alive(Origin::argument(subregion, index))
        })
        .collect();
    let ctx_dead: Vec<bool> = (0..graph.node(node).inputs.len())
        .map(|index| !ctx.origin_alive(Origin::argument(subregion, nrec + index)))
        .collect();

    for index in (0..nrec).rev() {
        if rec_dead[index] {
            graph.remove_result(subregion, index);
        }
    }

    sweep_region(graph, subregion, ctx);

    for index in (0..nrec).rev() {
        if rec_dead[index] {
            graph.remove_argument(subregion, index);
            graph.remove_output(node, index);
            *graph.phi_nrec_mut(node) -= 1;
        }
    }

    // Dead external dependencies; context arguments now sit right after the
    // surviving recursion variables.
    let nrec = graph.phi_nrec(node);
    for index in (0..ctx_dead.len()).rev() {
        if ctx_dead[index] {
            graph.remove_argument(subregion, nrec + index);
            graph.remove_input(node, index);
        }
    }
}

fn sweep_delta(graph: &mut Graph, node: Node, ctx: &Liveness) {
    if !ctx.node_alive(graph, node) {
        graph.remove_node(node);
    }
}
