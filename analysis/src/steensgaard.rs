//! Steensgaard-style flow-insensitive points-to analysis: a union-find over
//! abstract locations driven by one pass over the graph, a call-resolution
//! fixpoint, and a post-pass that collapses every equivalence class into one
//! points-to-graph memory node.

use rustc_hash::{FxHashMap, FxHashSet};

use rvopt_ir::{
    Operation, RvsdgModule, Type,
    rvsdg::{Graph, Node, NodeKind, Origin},
};

use crate::points_to_graph::{MemoryLocation, PointsToGraph};

/// A points-to equivalence class, identified by its union-find
/// representative.
pub type ClassId = usize;

/// What the memory-state encoder needs to know about an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressClasses {
    /// The address stays within one known class.
    One(ClassId),
    /// The address may reach any location.
    All,
}

/// The result of the analysis: the collapsed points-to graph plus the
/// classification used by the memory-state encoders.
pub struct PointsToAnalysis {
    pub graph: PointsToGraph,
    /// All classes containing at least one memory location, sorted.
    pub classes: Vec<ClassId>,
    alloca_class: FxHashMap<Node, ClassId>,
    malloc_class: FxHashMap<Node, ClassId>,
    pointee: FxHashMap<Origin, ClassId>,
    unknown: FxHashSet<ClassId>,
}

impl PointsToAnalysis {
    /// The class of the location allocated by `node`.
    pub fn allocation_class(&self, node: Node) -> Option<ClassId> {
        self.alloca_class
            .get(&node)
            .or_else(|| self.malloc_class.get(&node))
            .copied()
    }

    /// The classes a load/store through `address` may touch.
    pub fn address_classes(&self, address: Origin) -> AddressClasses {
        self.try_address_classes(address).unwrap_or(AddressClasses::All)
    }

    /// As [PointsToAnalysis::address_classes], but distinguishes an address
    /// the analysis never saw (`None`) from one that may reach anything.
    pub fn try_address_classes(&self, address: Origin) -> Option<AddressClasses> {
        let class = self.pointee.get(&address)?;
        if self.unknown.contains(class) {
            Some(AddressClasses::All)
        } else {
            Some(AddressClasses::One(*class))
        }
    }
}

fn pointer_like(ty: &Type) -> bool {
    matches!(ty, Type::Pointer(_) | Type::Function(_))
}

#[derive(Debug, Clone)]
enum LocKind {
    Register(Origin),
    Memory(MemoryLocation),
    /// An inferred pointee with no known location yet.
    Blank,
}

/// Growable union-find with path halving; unions count as revisions so the
/// call-resolution loop can detect a fixpoint.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    revision: u64,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::new(),
            rank: Vec::new(),
            revision: 0,
        }
    }

    fn make(&mut self) -> usize {
        self.parent.push(self.parent.len());
        self.rank.push(0);
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return a;
        }
        self.revision += 1;
        let (root, child) = if self.rank[a] >= self.rank[b] { (a, b) } else { (b, a) };
        self.parent[child] = root;
        if self.rank[a] == self.rank[b] {
            self.rank[root] += 1;
        }
        root
    }
}

struct Solver<'a> {
    graph: &'a Graph,
    uf: UnionFind,
    locations: Vec<LocKind>,
    registers: FxHashMap<Origin, usize>,
    memory: FxHashMap<MemoryLocation, usize>,
    /// Representative -> location holding the class pointee.
    points_to: FxHashMap<usize, usize>,
    calls: Vec<Node>,
    unknown: usize,
}

impl<'a> Solver<'a> {
    fn new(graph: &'a Graph) -> Self {
        let mut solver = Self {
            graph,
            uf: UnionFind::new(),
            locations: Vec::new(),
            registers: FxHashMap::default(),
            memory: FxHashMap::default(),
            points_to: FxHashMap::default(),
            calls: Vec::new(),
            unknown: 0,
        };
        let unknown = solver.memory_loc(MemoryLocation::Unknown);
        let external = solver.memory_loc(MemoryLocation::ExternalMemory);
        solver.uf.union(unknown, external);
        // Whatever escapes may point at anything that escaped.
        solver.set_points_to(unknown, unknown);
        solver.unknown = unknown;
        solver
    }

    fn alloc(&mut self, kind: LocKind) -> usize {
        let index = self.uf.make();
        debug_assert_eq!(index, self.locations.len());
        self.locations.push(kind);
        index
    }

    fn register(&mut self, origin: Origin) -> usize {
        if let Some(index) = self.registers.get(&origin) {
            return *index;
        }
        let index = self.alloc(LocKind::Register(origin));
        self.registers.insert(origin, index);
        index
    }

    fn memory_loc(&mut self, location: MemoryLocation) -> usize {
        if let Some(index) = self.memory.get(&location) {
            return *index;
        }
        let index = self.alloc(LocKind::Memory(location));
        self.memory.insert(location, index);
        index
    }

    /// The pointee class of `x`, created as a blank if absent.
    fn pointee(&mut self, x: usize) -> usize {
        let rep = self.uf.find(x);
        if let Some(target) = self.points_to.get(&rep) {
            return *target;
        }
        let blank = self.alloc(LocKind::Blank);
        self.points_to.insert(rep, blank);
        blank
    }

    fn set_points_to(&mut self, x: usize, target: usize) {
        let rep = self.uf.find(x);
        match self.points_to.get(&rep).copied() {
            Some(existing) => {
                self.join(existing, target);
            }
            None => {
                self.points_to.insert(rep, target);
            }
        }
    }

    /// Unify two classes, recursively merging their pointees.
    fn join(&mut self, a: usize, b: usize) {
        let (a, b) = (self.uf.find(a), self.uf.find(b));
        if a == b {
            return;
        }
        let pa = self.points_to.remove(&a);
        let pb = self.points_to.remove(&b);
        let root = self.uf.union(a, b);
        match (pa, pb) {
            (Some(pa), Some(pb)) => {
                self.points_to.insert(root, pa);
                self.join(pa, pb);
            }
            (Some(p), None) | (None, Some(p)) => {
                self.points_to.insert(root, p);
            }
            (None, None) => {}
        }
    }

    /// Join the registers at two origins if they are pointer-like.
    fn join_origins(&mut self, a: Origin, b: Origin) {
        if pointer_like(&self.graph.origin_type(a)) && pointer_like(&self.graph.origin_type(b)) {
            let ra = self.register(a);
            let rb = self.register(b);
            self.join(ra, rb);
        }
    }

    fn run(&mut self, module: &RvsdgModule) {
        self.mark_imports(module);
        for region in self.graph.all_regions() {
            for node in self.graph.region(region).nodes.clone() {
                self.transfer(node);
            }
        }
        self.resolve_calls();
    }

    fn mark_imports(&mut self, module: &RvsdgModule) {
        let root = self.graph.root();
        for index in 0..module.imports.len() {
            let origin = Origin::argument(root, index);
            if !pointer_like(&self.graph.origin_type(origin)) {
                continue;
            }
            let register = self.register(origin);
            let location = self.memory_loc(MemoryLocation::Import(index));
            let pointee = self.pointee(register);
            self.join(pointee, location);
            // Imported cells may hold pointers to anything external.
            let contents = self.pointee(location);
            let unknown = self.unknown;
            self.join(contents, unknown);
        }
    }

    fn transfer(&mut self, node: Node) {
        match self.graph.node(node).kind.clone() {
            NodeKind::Simple(operation) => self.transfer_simple(node, &operation),
            NodeKind::Gamma { subregions } => {
                for index in 1..self.graph.node(node).inputs.len() {
                    let origin = self.graph.input_origin(node, index);
                    for subregion in &subregions {
                        self.join_origins(origin, Origin::argument(*subregion, index - 1));
                    }
                }
                for index in 0..self.graph.node(node).outputs.len() {
                    for subregion in &subregions {
                        self.join_origins(
                            Origin::output(node, index),
                            self.graph.result_origin(*subregion, index),
                        );
                    }
                }
            }
            NodeKind::Theta { subregion } => {
                for index in 0..self.graph.node(node).inputs.len() {
                    let argument = Origin::argument(subregion, index);
                    self.join_origins(self.graph.input_origin(node, index), argument);
                    self.join_origins(Origin::output(node, index), argument);
                    self.join_origins(argument, self.graph.result_origin(subregion, index + 1));
                }
            }
            NodeKind::Lambda(data) => {
                let location = self.memory_loc(MemoryLocation::Lambda(node));
                let register = self.register(Origin::output(node, 0));
                let pointee = self.pointee(register);
                self.join(pointee, location);
                for index in 0..data.ncontext {
                    self.join_origins(
                        self.graph.input_origin(node, index),
                        Origin::argument(data.subregion, index),
                    );
                }
            }
            NodeKind::Phi { subregion, nrec } => {
                for index in 0..nrec {
                    let argument = Origin::argument(subregion, index);
                    self.join_origins(Origin::output(node, index), argument);
                    self.join_origins(argument, self.graph.result_origin(subregion, index));
                }
                for index in 0..self.graph.node(node).inputs.len() {
                    self.join_origins(
                        self.graph.input_origin(node, index),
                        Origin::argument(subregion, nrec + index),
                    );
                }
            }
            NodeKind::Delta(data) => {
                let location = self.memory_loc(MemoryLocation::Delta(node));
                let register = self.register(Origin::output(node, 0));
                let pointee = self.pointee(register);
                self.join(pointee, location);
                let initializer = self.graph.result_origin(data.subregion, 0);
                if pointer_like(&self.graph.origin_type(initializer)) {
                    let contents = self.pointee(location);
                    let value = self.register(initializer);
                    self.join(contents, value);
                }
                for index in 0..self.graph.node(node).inputs.len() {
                    self.join_origins(
                        self.graph.input_origin(node, index),
                        Origin::argument(data.subregion, index),
                    );
                }
            }
        }
    }

    fn transfer_simple(&mut self, node: Node, operation: &Operation) {
        match operation {
            Operation::Alloca { .. } => {
                let location = self.memory_loc(MemoryLocation::Alloca(node));
                let register = self.register(Origin::output(node, 0));
                let pointee = self.pointee(register);
                self.join(pointee, location);
            }
            Operation::Malloc => {
                let location = self.memory_loc(MemoryLocation::Malloc(node));
                let register = self.register(Origin::output(node, 0));
                let pointee = self.pointee(register);
                self.join(pointee, location);
            }
            Operation::Load { ty, .. } if pointer_like(ty) => {
                let address = self.register(self.graph.input_origin(node, 0));
                let cells = self.pointee(address);
                let contents = self.pointee(cells);
                let value = self.register(Origin::output(node, 0));
                self.join(value, contents);
            }
            Operation::Store { ty, .. } if pointer_like(ty) => {
                let address = self.register(self.graph.input_origin(node, 0));
                let cells = self.pointee(address);
                let value = self.register(self.graph.input_origin(node, 1));
                self.join(cells, value);
            }
            Operation::Copy(ty) if pointer_like(ty) => {
                self.join_origins(
                    self.graph.input_origin(node, 0),
                    Origin::output(node, 0),
                );
            }
            Operation::Call(_) => {
                self.calls.push(node);
            }
            Operation::Test { .. } => {
                // Opaque operation: any pointer flowing through it escapes.
                let unknown = self.unknown;
                for index in 0..self.graph.node(node).inputs.len() {
                    let origin = self.graph.input_origin(node, index);
                    if pointer_like(&self.graph.origin_type(origin)) {
                        let register = self.register(origin);
                        self.join(register, unknown);
                    }
                }
                for index in 0..self.graph.node(node).outputs.len() {
                    let origin = Origin::output(node, index);
                    if pointer_like(&self.graph.origin_type(origin)) {
                        let register = self.register(origin);
                        self.join(register, unknown);
                    }
                }
            }
            _ => {}
        }
    }

    /// Trace an origin backwards through invariant structure to a defining
    /// lambda, for direct-call precision.
    fn trace_function(&self, origin: Origin) -> Option<Node> {
        match origin {
            Origin::Output { node, index } => match &self.graph.node(node).kind {
                NodeKind::Lambda(_) => Some(node),
                NodeKind::Phi { subregion, .. } => {
                    match self.graph.result_origin(*subregion, index) {
                        Origin::Output { node, .. }
                            if matches!(self.graph.node(node).kind, NodeKind::Lambda(_)) =>
                        {
                            Some(node)
                        }
                        _ => None,
                    }
                }
                _ => None,
            },
            Origin::Argument { region, index } => {
                let input = self.graph.argument_input(region, index)?;
                let owner = self.graph.region(region).owner?;
                if let NodeKind::Theta { subregion } = &self.graph.node(owner).kind {
                    // Only safe through a loop if the variable is invariant.
                    if self.graph.result_origin(*subregion, index + 1) != origin {
                        return None;
                    }
                }
                self.trace_function(self.graph.input_origin(owner, input))
            }
        }
    }

    /// Unify call arguments/results with the signatures of every function the
    /// callee may denote, iterating until the points-to relation stabilizes.
    fn resolve_calls(&mut self) {
        loop {
            let revision = self.uf.revision;
            for position in 0..self.calls.len() {
                let call = self.calls[position];
                let callee = self.graph.input_origin(call, 0);
                if let Some(lambda) = self.trace_function(callee) {
                    self.unify_call_with(call, lambda);
                    continue;
                }
                let candidates = self.lambda_candidates(callee);
                if candidates.is_empty() {
                    self.escape_call(call);
                } else {
                    for lambda in candidates {
                        self.unify_call_with(call, lambda);
                    }
                }
            }
            if self.uf.revision == revision {
                break;
            }
        }
    }

    /// The lambda locations in the pointee class of the callee register.
    fn lambda_candidates(&mut self, callee: Origin) -> Vec<Node> {
        let register = self.register(callee);
        let cells = self.pointee(register);
        let cells = self.uf.find(cells);
        let mut lambdas = Vec::new();
        let mut is_unknown = false;
        for (index, kind) in self.locations.clone().into_iter().enumerate() {
            if self.uf.find(index) != cells {
                continue;
            }
            match kind {
                LocKind::Memory(MemoryLocation::Lambda(node)) => lambdas.push(node),
                LocKind::Memory(MemoryLocation::Unknown)
                | LocKind::Memory(MemoryLocation::ExternalMemory)
                | LocKind::Memory(MemoryLocation::Import(_)) => is_unknown = true,
                _ => {}
            }
        }
        if is_unknown {
            Vec::new()
        } else {
            lambdas
        }
    }

    fn unify_call_with(&mut self, call: Node, lambda: Node) {
        let data = self.graph.lambda_data(lambda).clone();
        let body = data.subregion;
        let nparams = data.signature.params().len();
        for index in 0..nparams {
            self.join_origins(
                self.graph.input_origin(call, index + 1),
                Origin::argument(body, data.ncontext + index),
            );
        }
        for index in 0..data.signature.results().len() {
            self.join_origins(
                Origin::output(call, index),
                self.graph.result_origin(body, index),
            );
        }
    }

    /// An indirect call whose target is unknown: its pointer arguments and
    /// results escape.
    fn escape_call(&mut self, call: Node) {
        let unknown = self.unknown;
        for index in 1..self.graph.node(call).inputs.len() {
            let origin = self.graph.input_origin(call, index);
            if pointer_like(&self.graph.origin_type(origin)) {
                let register = self.register(origin);
                self.join(register, unknown);
            }
        }
        for index in 0..self.graph.node(call).outputs.len() {
            let origin = Origin::output(call, index);
            if pointer_like(&self.graph.origin_type(origin)) {
                let register = self.register(origin);
                self.join(register, unknown);
            }
        }
    }

    /// Classes reachable from escaped roots via pointee edges.
    fn escaped_classes(&mut self, module: &RvsdgModule) -> FxHashSet<usize> {
        let root = self.graph.root();
        let mut worklist = vec![self.uf.find(self.unknown)];
        for index in 0..module.exports.len() {
            let origin = self.graph.result_origin(root, index);
            if pointer_like(&self.graph.origin_type(origin)) {
                let register = self.register(origin);
                let pointee = self.pointee(register);
                let rep = self.uf.find(pointee);
                worklist.push(rep);
            }
        }
        let mut visited = FxHashSet::default();
        while let Some(class) = worklist.pop() {
            if !visited.insert(class) {
                continue;
            }
            if let Some(target) = self.points_to.get(&class).copied() {
                let rep = self.uf.find(target);
                worklist.push(rep);
            }
        }
        visited
    }

    fn finish(mut self, module: &RvsdgModule) -> PointsToAnalysis {
        let escaped = self.escaped_classes(module);

        // Group memory locations by class.
        let mut members: FxHashMap<usize, Vec<MemoryLocation>> = FxHashMap::default();
        for (location, index) in self.memory.clone() {
            let rep = self.uf.find(index);
            members.entry(rep).or_default().push(location);
        }

        let mut graph = PointsToGraph::new();
        let mut class_vertex = FxHashMap::default();
        let mut classes: Vec<ClassId> = members.keys().copied().collect();
        classes.sort_unstable();
        for class in &classes {
            let mut locations = members[class].clone();
            locations.sort_unstable();
            class_vertex.insert(*class, graph.add_memory_node(locations));
        }
        // Memory-to-memory pointee edges.
        for class in &classes {
            if let Some(target) = self.points_to.get(class).copied() {
                let target = self.uf.find(target);
                if let Some(vertex) = class_vertex.get(&target) {
                    graph.add_edge(class_vertex[class], *vertex);
                }
            }
        }
        // Register vertices and their edges.
        let mut pointee_map = FxHashMap::default();
        for (origin, index) in self.registers.clone() {
            let rep = self.uf.find(index);
            let escapes = escaped.contains(&rep);
            let vertex = graph.add_register_node(origin, escapes);
            if let Some(target) = self.points_to.get(&rep).copied() {
                let target = self.uf.find(target);
                if let Some(memory) = class_vertex.get(&target) {
                    graph.add_edge(vertex, *memory);
                }
                if members.contains_key(&target) {
                    pointee_map.insert(origin, target);
                }
            }
        }

        let mut alloca_class = FxHashMap::default();
        let mut malloc_class = FxHashMap::default();
        let mut unknown = FxHashSet::default();
        for (location, index) in self.memory.clone() {
            let rep = self.uf.find(index);
            match location {
                MemoryLocation::Alloca(node) => {
                    alloca_class.insert(node, rep);
                }
                MemoryLocation::Malloc(node) => {
                    malloc_class.insert(node, rep);
                }
                MemoryLocation::Unknown
                | MemoryLocation::ExternalMemory
                | MemoryLocation::Import(_) => {
                    unknown.insert(rep);
                }
                _ => {}
            }
        }

        PointsToAnalysis {
            graph,
            classes,
            alloca_class,
            malloc_class,
            pointee: pointee_map,
            unknown,
        }
    }
}

/// Run the analysis over a module.
pub fn analyze(module: &RvsdgModule) -> PointsToAnalysis {
    log::debug!(target: "analysis:steensgaard", "analyzing module '{}'", module.name);
    let mut solver = Solver::new(&module.graph);
    solver.run(module);
    solver.finish(module)
}
