use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::{
    ops::Operation,
    rvsdg::{
        node::{
            ArgumentData, DeltaData, InputData, LambdaData, Node, NodeData, NodeKind, Origin,
            OutputData, Region, RegionData, ResultData, User,
        },
        normal_forms::{self, NormalForms},
        traverser::BottomUpTraverser,
    },
    types::{FunctionType, Linkage, Type},
};

enum NodeSlot {
    Live(NodeData),
    Removed,
}

/// The graph arena: owns every node and region, and maintains the
/// bidirectional edge bookkeeping between inputs and their origins.
///
/// All mutation goes through the rewrite primitives here; they keep the
/// structural invariants intact or panic. User-visible malformedness is
/// rejected earlier, at module reading; anything that trips an assertion in
/// this module is a programming error.
pub struct Graph {
    nodes: PrimaryMap<Node, NodeSlot>,
    regions: PrimaryMap<Region, RegionData>,
    root: Region,
    pub normal_forms: NormalForms,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut regions = PrimaryMap::new();
        let root = regions.push(RegionData::default());
        Self {
            nodes: PrimaryMap::new(),
            regions,
            root,
            normal_forms: NormalForms::default(),
        }
    }

    pub fn root(&self) -> Region {
        self.root
    }

    pub fn is_live(&self, node: Node) -> bool {
        matches!(self.nodes[node], NodeSlot::Live(_))
    }

    pub fn node(&self, node: Node) -> &NodeData {
        match &self.nodes[node] {
            NodeSlot::Live(data) => data,
            NodeSlot::Removed => panic!("use of removed {node}"),
        }
    }

    fn node_mut(&mut self, node: Node) -> &mut NodeData {
        match &mut self.nodes[node] {
            NodeSlot::Live(data) => data,
            NodeSlot::Removed => panic!("use of removed {node}"),
        }
    }

    pub fn region(&self, region: Region) -> &RegionData {
        &self.regions[region]
    }

    fn region_mut(&mut self, region: Region) -> &mut RegionData {
        &mut self.regions[region]
    }

    /// All regions of the graph reachable from the root, depth-first.
    pub fn all_regions(&self) -> Vec<Region> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(region) = stack.pop() {
            out.push(region);
            for &node in &self.regions[region].nodes {
                stack.extend_from_slice(self.node(node).kind.subregions());
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Ports and edges

    pub fn origin_type(&self, origin: Origin) -> Type {
        match origin {
            Origin::Output { node, index } => self.node(node).outputs[index].ty.clone(),
            Origin::Argument { region, index } => self.regions[region].arguments[index].ty.clone(),
        }
    }

    /// The region in which `origin` is visible.
    pub fn origin_region(&self, origin: Origin) -> Region {
        match origin {
            Origin::Output { node, .. } => self.node(node).region,
            Origin::Argument { region, .. } => region,
        }
    }

    pub fn users(&self, origin: Origin) -> &[User] {
        match origin {
            Origin::Output { node, index } => &self.node(node).outputs[index].users,
            Origin::Argument { region, index } => &self.regions[region].arguments[index].users,
        }
    }

    fn users_mut(&mut self, origin: Origin) -> &mut Vec<User> {
        match origin {
            Origin::Output { node, index } => &mut self.node_mut(node).outputs[index].users,
            Origin::Argument { region, index } => {
                &mut self.regions[region].arguments[index].users
            }
        }
    }

    pub fn input_origin(&self, node: Node, index: usize) -> Origin {
        self.node(node).inputs[index].origin
    }

    pub fn output(&self, node: Node, index: usize) -> Origin {
        debug_assert!(index < self.node(node).outputs.len());
        Origin::output(node, index)
    }

    pub fn argument(&self, region: Region, index: usize) -> Origin {
        debug_assert!(index < self.regions[region].arguments.len());
        Origin::argument(region, index)
    }

    pub fn result_origin(&self, region: Region, index: usize) -> Origin {
        self.regions[region].results[index].origin
    }

    fn connect(&mut self, origin: Origin, user: User) {
        self.users_mut(origin).push(user);
    }

    fn disconnect(&mut self, origin: Origin, user: User) {
        let users = self.users_mut(origin);
        let position = users
            .iter()
            .position(|u| *u == user)
            .expect("orphaned user-list entry");
        users.remove(position);
    }

    /// Rewrite the origin stored at `user` without touching user lists.
    fn set_user_origin(&mut self, user: User, origin: Origin) {
        match user {
            User::Input { node, index } => self.node_mut(node).inputs[index].origin = origin,
            User::Result { region, index } => {
                self.regions[region].results[index].origin = origin
            }
        }
    }

    /// Replace the user-list entry `old` on `origin` with `new`, in place.
    fn rename_user(&mut self, origin: Origin, old: User, new: User) {
        let users = self.users_mut(origin);
        let position = users
            .iter()
            .position(|u| *u == old)
            .expect("orphaned user-list entry");
        users[position] = new;
    }

    /// Reconnect input `index` of `node` to a new origin.
    pub fn set_input_origin(&mut self, node: Node, index: usize, origin: Origin) {
        let old = self.node(node).inputs[index].origin;
        if old == origin {
            return;
        }
        assert_eq!(
            self.origin_type(old),
            self.origin_type(origin),
            "type mismatch when reconnecting input"
        );
        self.disconnect(old, User::Input { node, index });
        self.node_mut(node).inputs[index].origin = origin;
        self.connect(origin, User::Input { node, index });
    }

    /// Reconnect result `index` of `region` to a new origin.
    pub fn set_result_origin(&mut self, region: Region, index: usize, origin: Origin) {
        let old = self.regions[region].results[index].origin;
        if old == origin {
            return;
        }
        assert_eq!(
            self.origin_type(old),
            self.origin_type(origin),
            "type mismatch when reconnecting result"
        );
        self.disconnect(old, User::Result { region, index });
        self.regions[region].results[index].origin = origin;
        self.connect(origin, User::Result { region, index });
    }

    /// Atomically rewire every user of `from` to `to`, preserving user order.
    pub fn divert_users(&mut self, from: Origin, to: Origin) {
        if from == to {
            return;
        }
        assert_eq!(
            self.origin_type(from),
            self.origin_type(to),
            "type mismatch when diverting users"
        );
        let users = std::mem::take(self.users_mut(from));
        for user in &users {
            self.set_user_origin(*user, to);
        }
        self.users_mut(to).extend(users);
    }

    pub fn nusers(&self, origin: Origin) -> usize {
        self.users(origin).len()
    }

    // ------------------------------------------------------------------
    // Simple nodes

    /// Create a simple node without offering it to its normal form.
    pub fn add_node(&mut self, region: Region, operation: Operation, origins: &[Origin]) -> Node {
        let signature = operation.signature();
        assert_eq!(
            signature.inputs.len(),
            origins.len(),
            "operation arity mismatch for {operation}"
        );
        for (origin, expected) in origins.iter().zip(signature.inputs.iter()) {
            assert_eq!(
                self.origin_region(*origin),
                region,
                "operand origin not visible in target region"
            );
            assert_eq!(
                &self.origin_type(*origin),
                expected,
                "operand type mismatch for {operation}"
            );
        }
        let data = NodeData {
            region,
            kind: NodeKind::Simple(operation),
            inputs: origins.iter().map(|o| InputData { origin: *o }).collect(),
            outputs: signature
                .outputs
                .iter()
                .map(|ty| OutputData {
                    ty: ty.clone(),
                    users: Vec::new(),
                })
                .collect(),
        };
        let node = self.nodes.push(NodeSlot::Live(data));
        for (index, origin) in origins.iter().enumerate() {
            self.connect(*origin, User::Input { node, index });
        }
        self.regions[region].nodes.push(node);
        node
    }

    /// Create a simple node, first offering the operation to its normal form.
    ///
    /// When the family's normal form is mutable it may satisfy the request
    /// without creating a node (constant folding, load-after-store
    /// forwarding); the returned origins are then pre-existing outputs.
    pub fn add_simple(
        &mut self,
        region: Region,
        operation: Operation,
        origins: &[Origin],
    ) -> SmallVec<[Origin; 2]> {
        if let Some(outputs) = normal_forms::on_create(self, region, &operation, origins) {
            return outputs;
        }
        let noutputs = operation.signature().outputs.len();
        let node = self.add_node(region, operation, origins);
        (0..noutputs).map(|i| Origin::output(node, i)).collect()
    }

    // ------------------------------------------------------------------
    // Region ports

    pub fn add_argument(&mut self, region: Region, ty: Type) -> Origin {
        let arguments = &mut self.region_mut(region).arguments;
        arguments.push(ArgumentData {
            ty,
            users: Vec::new(),
        });
        Origin::argument(region, arguments.len() - 1)
    }

    /// Insert an argument at `index`, shifting later arguments up.
    fn insert_argument(&mut self, region: Region, index: usize, ty: Type) -> Origin {
        self.region_mut(region).arguments.insert(
            index,
            ArgumentData {
                ty,
                users: Vec::new(),
            },
        );
        for j in index + 1..self.regions[region].arguments.len() {
            for user in self.regions[region].arguments[j].users.clone() {
                self.set_user_origin(user, Origin::argument(region, j));
            }
        }
        Origin::argument(region, index)
    }

    pub fn add_result(&mut self, region: Region, origin: Origin) -> usize {
        assert_eq!(
            self.origin_region(origin),
            region,
            "result origin not visible in region"
        );
        let index = self.regions[region].results.len();
        self.region_mut(region).results.push(ResultData { origin });
        self.connect(origin, User::Result { region, index });
        index
    }

    /// Remove argument `index` of `region`. The argument must be unused.
    pub fn remove_argument(&mut self, region: Region, index: usize) {
        assert!(
            self.regions[region].arguments[index].users.is_empty(),
            "cannot remove argument with live users"
        );
        self.region_mut(region).arguments.remove(index);
        for j in index..self.regions[region].arguments.len() {
            for user in self.regions[region].arguments[j].users.clone() {
                self.set_user_origin(user, Origin::argument(region, j));
            }
        }
    }

    /// Remove result `index` of `region`.
    pub fn remove_result(&mut self, region: Region, index: usize) {
        let origin = self.regions[region].results[index].origin;
        self.disconnect(origin, User::Result { region, index });
        self.region_mut(region).results.remove(index);
        for j in index..self.regions[region].results.len() {
            let origin = self.regions[region].results[j].origin;
            self.rename_user(
                origin,
                User::Result {
                    region,
                    index: j + 1,
                },
                User::Result { region, index: j },
            );
        }
    }

    /// Remove input `index` of `node`, shifting later inputs down.
    pub fn remove_input(&mut self, node: Node, index: usize) {
        let origin = self.node(node).inputs[index].origin;
        self.disconnect(origin, User::Input { node, index });
        self.node_mut(node).inputs.remove(index);
        for j in index..self.node(node).inputs.len() {
            let origin = self.node(node).inputs[j].origin;
            self.rename_user(
                origin,
                User::Input {
                    node,
                    index: j + 1,
                },
                User::Input { node, index: j },
            );
        }
    }

    /// Remove output `index` of `node`. The output must be unused.
    pub fn remove_output(&mut self, node: Node, index: usize) {
        assert!(
            self.node(node).outputs[index].users.is_empty(),
            "cannot remove output with live users"
        );
        self.node_mut(node).outputs.remove(index);
        for j in index..self.node(node).outputs.len() {
            for user in self.node(node).outputs[j].users.clone() {
                self.set_user_origin(user, Origin::output(node, j));
            }
        }
    }

    // ------------------------------------------------------------------
    // Node removal

    /// Remove `node` from the graph. Panics if any output still has users.
    /// Subregions of structural nodes are destroyed along with the node.
    pub fn remove_node(&mut self, node: Node) {
        assert!(
            self.node(node)
                .outputs
                .iter()
                .all(|output| output.users.is_empty()),
            "cannot remove node with live users"
        );
        let subregions: Vec<Region> = self.node(node).kind.subregions().to_vec();
        for subregion in subregions {
            self.destroy_region(subregion);
        }
        for index in 0..self.node(node).inputs.len() {
            let origin = self.node(node).inputs[index].origin;
            self.disconnect(origin, User::Input { node, index });
        }
        let region = self.node(node).region;
        self.regions[region].nodes.retain(|n| *n != node);
        self.nodes[node] = NodeSlot::Removed;
    }

    /// Destroy the entire contents of a region: results, nodes, arguments.
    fn destroy_region(&mut self, region: Region) {
        for index in (0..self.regions[region].results.len()).rev() {
            let origin = self.regions[region].results[index].origin;
            self.disconnect(origin, User::Result { region, index });
        }
        self.region_mut(region).results.clear();
        let mut traverser = BottomUpTraverser::new(self, region);
        while let Some(node) = traverser.next(self) {
            self.remove_node(node);
        }
        debug_assert!(
            self.regions[region]
                .arguments
                .iter()
                .all(|argument| argument.users.is_empty()),
            "orphaned user-list entry on destroyed region argument"
        );
        self.region_mut(region).arguments.clear();
        debug_assert!(self.regions[region].nodes.is_empty());
    }

    /// Remove every node of `region` (recursively) whose outputs are all
    /// unused.
    pub fn prune(&mut self, region: Region) {
        let mut traverser = BottomUpTraverser::new(self, region);
        while let Some(node) = traverser.next(self) {
            if self
                .node(node)
                .outputs
                .iter()
                .all(|output| output.users.is_empty())
            {
                self.remove_node(node);
            } else {
                for subregion in self.node(node).kind.subregions().to_vec() {
                    self.prune(subregion);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Gamma nodes

    /// Create an n-way conditional. `predicate` must be of type
    /// `ctl<nsubregions>`.
    pub fn add_gamma(&mut self, region: Region, predicate: Origin, nsubregions: usize) -> Node {
        assert!(nsubregions >= 2, "gamma requires at least two subregions");
        assert_eq!(
            self.origin_type(predicate),
            Type::control(nsubregions as u32),
            "gamma predicate type mismatch"
        );
        assert_eq!(self.origin_region(predicate), region);
        let node = self.nodes.push(NodeSlot::Live(NodeData {
            region,
            kind: NodeKind::Gamma {
                subregions: Vec::new(),
            },
            inputs: vec![InputData { origin: predicate }],
            outputs: Vec::new(),
        }));
        self.connect(predicate, User::Input { node, index: 0 });
        let subregions: Vec<Region> = (0..nsubregions)
            .map(|_| {
                self.regions.push(RegionData {
                    owner: Some(node),
                    ..RegionData::default()
                })
            })
            .collect();
        match &mut self.node_mut(node).kind {
            NodeKind::Gamma { subregions: s } => *s = subregions,
            _ => unreachable!(),
        }
        self.regions[region].nodes.push(node);
        node
    }

    pub fn gamma_subregions(&self, node: Node) -> &[Region] {
        match &self.node(node).kind {
            NodeKind::Gamma { subregions } => subregions,
            _ => panic!("expected gamma node"),
        }
    }

    /// Add an entry variable; returns the corresponding argument origin of
    /// every subregion, in subregion order.
    pub fn gamma_add_entry_var(&mut self, node: Node, origin: Origin) -> Vec<Origin> {
        let region = self.node(node).region;
        assert_eq!(self.origin_region(origin), region);
        let ty = self.origin_type(origin);
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(InputData { origin });
        self.connect(origin, User::Input { node, index });
        let subregions = self.gamma_subregions(node).to_vec();
        subregions
            .into_iter()
            .map(|subregion| self.add_argument(subregion, ty.clone()))
            .collect()
    }

    /// Add an exit variable from one result origin per subregion; returns the
    /// new output origin.
    pub fn gamma_add_exit_var(&mut self, node: Node, results: &[Origin]) -> Origin {
        let subregions = self.gamma_subregions(node).to_vec();
        assert_eq!(
            results.len(),
            subregions.len(),
            "one result per gamma subregion required"
        );
        let ty = self.origin_type(results[0]);
        for (subregion, origin) in subregions.iter().zip(results.iter()) {
            assert_eq!(self.origin_type(*origin), ty, "gamma exit variable type mismatch");
            self.add_result(*subregion, *origin);
        }
        let index = self.node(node).outputs.len();
        self.node_mut(node).outputs.push(OutputData {
            ty,
            users: Vec::new(),
        });
        Origin::output(node, index)
    }

    // ------------------------------------------------------------------
    // Theta nodes

    /// Create an empty tail-controlled loop. Loop variables are added with
    /// [Graph::theta_add_loop_var]; the node is complete once
    /// [Graph::theta_finish] has set the continuation predicate and the
    /// feedback results.
    pub fn add_theta(&mut self, region: Region) -> Node {
        let node = self.nodes.push(NodeSlot::Live(NodeData {
            region,
            kind: NodeKind::Theta {
                subregion: Region::from_u32(0),
            },
            inputs: Vec::new(),
            outputs: Vec::new(),
        }));
        let subregion = self.regions.push(RegionData {
            owner: Some(node),
            ..RegionData::default()
        });
        match &mut self.node_mut(node).kind {
            NodeKind::Theta { subregion: s } => *s = subregion,
            _ => unreachable!(),
        }
        self.regions[region].nodes.push(node);
        node
    }

    pub fn theta_subregion(&self, node: Node) -> Region {
        match &self.node(node).kind {
            NodeKind::Theta { subregion } => *subregion,
            _ => panic!("expected theta node"),
        }
    }

    /// Add a loop variable before the theta is finished; returns its index.
    pub fn theta_add_loop_var(&mut self, node: Node, init: Origin) -> usize {
        let subregion = self.theta_subregion(node);
        assert!(
            self.regions[subregion].results.is_empty(),
            "loop variables must be added before the theta is finished"
        );
        let region = self.node(node).region;
        assert_eq!(self.origin_region(init), region);
        let ty = self.origin_type(init);
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(InputData { origin: init });
        self.connect(init, User::Input { node, index });
        self.add_argument(subregion, ty);
        index
    }

    /// Complete a theta: result 0 becomes the 2-way continuation predicate,
    /// results 1..k+1 the feedback values, and the outputs are created.
    pub fn theta_finish(&mut self, node: Node, predicate: Origin, results: &[Origin]) {
        let subregion = self.theta_subregion(node);
        assert!(self.regions[subregion].results.is_empty());
        assert_eq!(
            results.len(),
            self.node(node).inputs.len(),
            "theta feedback arity mismatch"
        );
        assert_eq!(
            self.origin_type(predicate),
            Type::control(2),
            "theta predicate must be 2-way control"
        );
        self.add_result(subregion, predicate);
        for (index, origin) in results.iter().enumerate() {
            assert_eq!(
                self.origin_type(*origin),
                self.regions[subregion].arguments[index].ty,
                "theta feedback type mismatch"
            );
            self.add_result(subregion, *origin);
        }
        let types: Vec<Type> = self
            .node(node)
            .inputs
            .iter()
            .map(|input| self.origin_type(input.origin))
            .collect();
        for ty in types {
            self.node_mut(node).outputs.push(OutputData {
                ty,
                users: Vec::new(),
            });
        }
    }

    /// Add a loop variable to a finished theta as an invariant pass-through;
    /// returns its index. The feedback can be re-pointed afterwards with
    /// [Graph::theta_set_result].
    pub fn theta_extend_loop_var(&mut self, node: Node, init: Origin) -> usize {
        let subregion = self.theta_subregion(node);
        assert!(
            !self.regions[subregion].results.is_empty(),
            "theta is not finished"
        );
        let region = self.node(node).region;
        assert_eq!(self.origin_region(init), region);
        let ty = self.origin_type(init);
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(InputData { origin: init });
        self.connect(init, User::Input { node, index });
        let argument = self.add_argument(subregion, ty.clone());
        let result_index = self.add_result(subregion, argument);
        debug_assert_eq!(result_index, index + 1);
        self.node_mut(node).outputs.push(OutputData {
            ty,
            users: Vec::new(),
        });
        index
    }

    /// Re-point the feedback result of loop variable `index`.
    pub fn theta_set_result(&mut self, node: Node, index: usize, origin: Origin) {
        let subregion = self.theta_subregion(node);
        self.set_result_origin(subregion, index + 1, origin);
    }

    /// Re-point the continuation predicate of a finished theta.
    pub fn theta_set_predicate(&mut self, node: Node, origin: Origin) {
        let subregion = self.theta_subregion(node);
        self.set_result_origin(subregion, 0, origin);
    }

    // ------------------------------------------------------------------
    // Lambda nodes

    /// Create a function abstraction. The subregion's arguments are the
    /// context variables followed by the function parameters; the single
    /// output is the function value.
    pub fn add_lambda(
        &mut self,
        region: Region,
        name: impl Into<String>,
        linkage: Linkage,
        signature: FunctionType,
        context: &[Origin],
    ) -> Node {
        let node = self.nodes.push(NodeSlot::Live(NodeData {
            region,
            kind: NodeKind::Lambda(LambdaData {
                name: name.into(),
                linkage,
                signature: signature.clone(),
                subregion: Region::from_u32(0), // patched below
                ncontext: context.len(),
            }),
            inputs: context.iter().map(|o| InputData { origin: *o }).collect(),
            outputs: vec![OutputData {
                ty: Type::Function(signature.clone()),
                users: Vec::new(),
            }],
        }));
        for (index, origin) in context.iter().enumerate() {
            assert_eq!(self.origin_region(*origin), region);
            self.connect(*origin, User::Input { node, index });
        }
        let subregion = self.regions.push(RegionData {
            owner: Some(node),
            ..RegionData::default()
        });
        match &mut self.node_mut(node).kind {
            NodeKind::Lambda(data) => data.subregion = subregion,
            _ => unreachable!(),
        }
        let context_types: Vec<Type> =
            context.iter().map(|origin| self.origin_type(*origin)).collect();
        for ty in context_types {
            self.add_argument(subregion, ty);
        }
        for ty in signature.params() {
            self.add_argument(subregion, ty.clone());
        }
        self.regions[region].nodes.push(node);
        node
    }

    pub fn lambda_data(&self, node: Node) -> &LambdaData {
        match &self.node(node).kind {
            NodeKind::Lambda(data) => data,
            _ => panic!("expected lambda node"),
        }
    }

    pub fn lambda_subregion(&self, node: Node) -> Region {
        self.lambda_data(node).subregion
    }

    /// Mutable access to the context-variable count, for structural sweeps
    /// that remove context ports.
    pub fn lambda_ncontext_mut(&mut self, node: Node) -> &mut usize {
        match &mut self.node_mut(node).kind {
            NodeKind::Lambda(data) => &mut data.ncontext,
            _ => panic!("expected lambda node"),
        }
    }

    /// Capture an additional free value; returns the new context argument.
    pub fn lambda_add_context_var(&mut self, node: Node, origin: Origin) -> Origin {
        let region = self.node(node).region;
        assert_eq!(self.origin_region(origin), region);
        let ty = self.origin_type(origin);
        let (subregion, ncontext) = {
            let data = self.lambda_data(node);
            (data.subregion, data.ncontext)
        };
        let index = self.node(node).inputs.len();
        debug_assert_eq!(index, ncontext);
        self.node_mut(node).inputs.push(InputData { origin });
        self.connect(origin, User::Input { node, index });
        let argument = self.insert_argument(subregion, ncontext, ty);
        match &mut self.node_mut(node).kind {
            NodeKind::Lambda(data) => data.ncontext += 1,
            _ => unreachable!(),
        }
        argument
    }

    /// Set the function results, completing the lambda.
    pub fn lambda_finish(&mut self, node: Node, results: &[Origin]) {
        let data = self.lambda_data(node);
        let subregion = data.subregion;
        let expected: Vec<Type> = data.signature.results().to_vec();
        assert_eq!(results.len(), expected.len(), "lambda result arity mismatch");
        for (origin, ty) in results.iter().zip(expected.iter()) {
            assert_eq!(&self.origin_type(*origin), ty, "lambda result type mismatch");
            self.add_result(subregion, *origin);
        }
    }

    // ------------------------------------------------------------------
    // Phi nodes

    /// Create an empty recursion environment for a group of mutually
    /// recursive functions.
    pub fn add_phi(&mut self, region: Region) -> Node {
        let node = self.nodes.push(NodeSlot::Live(NodeData {
            region,
            kind: NodeKind::Phi {
                subregion: Region::from_u32(0),
                nrec: 0,
            },
            inputs: Vec::new(),
            outputs: Vec::new(),
        }));
        let subregion = self.regions.push(RegionData {
            owner: Some(node),
            ..RegionData::default()
        });
        match &mut self.node_mut(node).kind {
            NodeKind::Phi { subregion: s, .. } => *s = subregion,
            _ => unreachable!(),
        }
        self.regions[region].nodes.push(node);
        node
    }

    pub fn phi_subregion(&self, node: Node) -> Region {
        match &self.node(node).kind {
            NodeKind::Phi { subregion, .. } => *subregion,
            _ => panic!("expected phi node"),
        }
    }

    pub fn phi_nrec(&self, node: Node) -> usize {
        match &self.node(node).kind {
            NodeKind::Phi { nrec, .. } => *nrec,
            _ => panic!("expected phi node"),
        }
    }

    /// Mutable access to the recursion-variable count, for structural sweeps
    /// that remove recursion ports.
    pub fn phi_nrec_mut(&mut self, node: Node) -> &mut usize {
        match &mut self.node_mut(node).kind {
            NodeKind::Phi { nrec, .. } => nrec,
            _ => panic!("expected phi node"),
        }
    }

    /// Declare a recursion variable; returns its argument origin. All
    /// recursion variables must be declared before any context variable.
    pub fn phi_add_rec_var(&mut self, node: Node, ty: Type) -> Origin {
        assert!(
            self.node(node).inputs.is_empty(),
            "recursion variables must precede context variables"
        );
        let subregion = self.phi_subregion(node);
        let argument = self.add_argument(subregion, ty.clone());
        self.node_mut(node).outputs.push(OutputData {
            ty,
            users: Vec::new(),
        });
        match &mut self.node_mut(node).kind {
            NodeKind::Phi { nrec, .. } => *nrec += 1,
            _ => unreachable!(),
        }
        argument
    }

    /// Import an external dependency; returns its argument origin.
    pub fn phi_add_context_var(&mut self, node: Node, origin: Origin) -> Origin {
        let region = self.node(node).region;
        assert_eq!(self.origin_region(origin), region);
        let ty = self.origin_type(origin);
        let subregion = self.phi_subregion(node);
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(InputData { origin });
        self.connect(origin, User::Input { node, index });
        self.add_argument(subregion, ty)
    }

    /// Tie each recursion variable to its definition, completing the phi.
    pub fn phi_finish(&mut self, node: Node, definitions: &[Origin]) {
        let subregion = self.phi_subregion(node);
        let nrec = self.phi_nrec(node);
        assert_eq!(definitions.len(), nrec, "phi definition arity mismatch");
        for (index, origin) in definitions.iter().enumerate() {
            assert_eq!(
                self.origin_type(*origin),
                self.regions[subregion].arguments[index].ty,
                "phi definition type mismatch"
            );
            self.add_result(subregion, *origin);
        }
    }

    // ------------------------------------------------------------------
    // Delta nodes

    /// Create a global-data node whose body computes its initializer.
    /// The output is a pointer to the data.
    pub fn add_delta(
        &mut self,
        region: Region,
        name: impl Into<String>,
        ty: Type,
        linkage: Linkage,
        constant: bool,
    ) -> Node {
        let node = self.nodes.push(NodeSlot::Live(NodeData {
            region,
            kind: NodeKind::Delta(DeltaData {
                name: name.into(),
                linkage,
                constant,
                ty: ty.clone(),
                subregion: Region::from_u32(0), // patched below
            }),
            inputs: Vec::new(),
            outputs: vec![OutputData {
                ty: Type::pointer(ty),
                users: Vec::new(),
            }],
        }));
        let subregion = self.regions.push(RegionData {
            owner: Some(node),
            ..RegionData::default()
        });
        match &mut self.node_mut(node).kind {
            NodeKind::Delta(data) => data.subregion = subregion,
            _ => unreachable!(),
        }
        self.regions[region].nodes.push(node);
        node
    }

    pub fn delta_data(&self, node: Node) -> &DeltaData {
        match &self.node(node).kind {
            NodeKind::Delta(data) => data,
            _ => panic!("expected delta node"),
        }
    }

    pub fn delta_subregion(&self, node: Node) -> Region {
        self.delta_data(node).subregion
    }

    /// Import a dependency into the delta body; returns its argument origin.
    pub fn delta_add_dependency(&mut self, node: Node, origin: Origin) -> Origin {
        let region = self.node(node).region;
        assert_eq!(self.origin_region(origin), region);
        let ty = self.origin_type(origin);
        let subregion = self.delta_subregion(node);
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(InputData { origin });
        self.connect(origin, User::Input { node, index });
        self.add_argument(subregion, ty)
    }

    /// Set the initializer value, completing the delta.
    pub fn delta_finish(&mut self, node: Node, origin: Origin) {
        let data = self.delta_data(node);
        let subregion = data.subregion;
        assert_eq!(self.origin_type(origin), data.ty, "delta initializer type mismatch");
        assert!(self.regions[subregion].results.is_empty());
        self.add_result(subregion, origin);
    }

    // ------------------------------------------------------------------
    // Cross-region routing

    /// Make `origin` available in `target`, a region nested (directly or
    /// transitively) inside the region where `origin` is visible, by
    /// threading it through the intervening structural nodes.
    pub fn route_origin(&mut self, origin: Origin, target: Region) -> Origin {
        let home = self.origin_region(origin);
        if home == target {
            return origin;
        }
        let mut path = Vec::new();
        let mut region = target;
        while region != home {
            let owner = self.regions[region]
                .owner
                .expect("origin not visible from target region");
            path.push(region);
            region = self.node(owner).region;
        }
        let mut current = origin;
        for &subregion in path.iter().rev() {
            let owner = self.regions[subregion].owner.unwrap();
            let kind = self.node(owner).kind.clone();
            current = match kind {
                NodeKind::Gamma { subregions } => {
                    let position = subregions
                        .iter()
                        .position(|r| *r == subregion)
                        .expect("subregion not owned by its gamma");
                    self.gamma_add_entry_var(owner, current)[position]
                }
                NodeKind::Theta { .. } => {
                    let index = self.theta_extend_loop_var(owner, current);
                    self.argument(subregion, index)
                }
                NodeKind::Lambda(_) => self.lambda_add_context_var(owner, current),
                NodeKind::Phi { .. } => self.phi_add_context_var(owner, current),
                NodeKind::Delta(_) => self.delta_add_dependency(owner, current),
                NodeKind::Simple(_) => unreachable!("simple nodes own no regions"),
            };
        }
        current
    }

    /// The input of the enclosing structural node associated with argument
    /// `index` of `region`, if the argument imports a value across the region
    /// boundary.
    pub fn argument_input(&self, region: Region, index: usize) -> Option<usize> {
        let owner = self.regions[region].owner?;
        match &self.node(owner).kind {
            NodeKind::Gamma { .. } => Some(index + 1),
            NodeKind::Theta { .. } | NodeKind::Delta(_) => Some(index),
            NodeKind::Lambda(data) => (index < data.ncontext).then_some(index),
            NodeKind::Phi { nrec, .. } => (index >= *nrec).then(|| index - nrec),
            NodeKind::Simple(_) => unreachable!("simple nodes own no regions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ops::{BinaryKind, ConstantValue};

    fn constant(graph: &mut Graph, region: Region, value: u64) -> Origin {
        let node = graph.add_node(
            region,
            Operation::Constant(ConstantValue::Int { bits: 32, value }),
            &[],
        );
        Origin::output(node, 0)
    }

    #[test]
    fn user_lists_track_connections() {
        let mut graph = Graph::new();
        let root = graph.root();
        let c = constant(&mut graph, root, 1);
        let add = graph.add_node(root, Operation::Binary(BinaryKind::Add, Type::I32), &[c, c]);
        assert_eq!(graph.nusers(c), 2);
        assert_eq!(
            graph.users(c),
            &[
                User::Input { node: add, index: 0 },
                User::Input { node: add, index: 1 }
            ]
        );
        assert_eq!(graph.input_origin(add, 0), c);
    }

    #[test]
    fn divert_users_rewires_atomically() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = constant(&mut graph, root, 1);
        let b = constant(&mut graph, root, 2);
        let add = graph.add_node(root, Operation::Binary(BinaryKind::Add, Type::I32), &[a, a]);
        graph.divert_users(a, b);
        assert_eq!(graph.nusers(a), 0);
        assert_eq!(graph.nusers(b), 2);
        assert_eq!(graph.input_origin(add, 0), b);
        assert_eq!(graph.input_origin(add, 1), b);
    }

    #[test]
    #[should_panic(expected = "live users")]
    fn removing_a_used_node_panics() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = constant(&mut graph, root, 1);
        graph.add_node(root, Operation::Copy(Type::I32), &[a]);
        let Origin::Output { node, .. } = a else {
            unreachable!()
        };
        graph.remove_node(node);
    }

    #[test]
    fn remove_node_releases_edges() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = constant(&mut graph, root, 1);
        let copy = graph.add_node(root, Operation::Copy(Type::I32), &[a]);
        graph.remove_node(copy);
        assert_eq!(graph.nusers(a), 0);
        assert!(!graph.is_live(copy));
        assert_eq!(graph.region(root).nodes.len(), 1);
    }

    #[test]
    fn input_removal_shifts_user_entries() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = constant(&mut graph, root, 1);
        let b = constant(&mut graph, root, 2);
        let op = Operation::test(&[Type::I32, Type::I32], &[]);
        let node = graph.add_node(root, op, &[a, b]);
        graph.remove_input(node, 0);
        assert_eq!(graph.nusers(a), 0);
        assert_eq!(graph.users(b), &[User::Input { node, index: 0 }]);
        assert_eq!(graph.input_origin(node, 0), b);
    }

    #[test]
    fn gamma_ports_stay_in_correspondence() {
        let mut graph = Graph::new();
        let root = graph.root();
        let predicate = {
            let node = graph.add_node(
                root,
                Operation::Constant(ConstantValue::Control {
                    alternatives: 2,
                    value: 0,
                }),
                &[],
            );
            Origin::output(node, 0)
        };
        let v = constant(&mut graph, root, 7);
        let gamma = graph.add_gamma(root, predicate, 2);
        let arguments = graph.gamma_add_entry_var(gamma, v);
        assert_eq!(arguments.len(), 2);
        let output = graph.gamma_add_exit_var(gamma, &arguments);
        assert_eq!(graph.node(gamma).inputs.len(), 2);
        assert_eq!(graph.node(gamma).outputs.len(), 1);
        for subregion in graph.gamma_subregions(gamma) {
            assert_eq!(graph.region(*subregion).arguments.len(), 1);
            assert_eq!(graph.region(*subregion).results.len(), 1);
        }
        assert_eq!(graph.origin_type(output), Type::I32);
    }

    #[test]
    fn theta_arity_correspondence() {
        let mut graph = Graph::new();
        let root = graph.root();
        let init = constant(&mut graph, root, 0);
        let theta = graph.add_theta(root);
        let index = graph.theta_add_loop_var(theta, init);
        assert_eq!(index, 0);
        let subregion = graph.theta_subregion(theta);
        let argument = graph.argument(subregion, 0);
        let predicate = {
            let node = graph.add_node(
                subregion,
                Operation::Constant(ConstantValue::Control {
                    alternatives: 2,
                    value: 0,
                }),
                &[],
            );
            Origin::output(node, 0)
        };
        graph.theta_finish(theta, predicate, &[argument]);
        assert_eq!(graph.node(theta).inputs.len(), 1);
        assert_eq!(graph.node(theta).outputs.len(), 1);
        assert_eq!(graph.region(subregion).arguments.len(), 1);
        assert_eq!(graph.region(subregion).results.len(), 2);
    }

    #[test]
    fn route_origin_threads_through_nested_regions() {
        let mut graph = Graph::new();
        let root = graph.root();
        let v = constant(&mut graph, root, 3);
        let predicate = {
            let node = graph.add_node(
                root,
                Operation::Constant(ConstantValue::Control {
                    alternatives: 2,
                    value: 0,
                }),
                &[],
            );
            Origin::output(node, 0)
        };
        let gamma = graph.add_gamma(root, predicate, 2);
        let subregion = graph.gamma_subregions(gamma)[1];
        let routed = graph.route_origin(v, subregion);
        assert_eq!(graph.origin_region(routed), subregion);
        assert_eq!(graph.origin_type(routed), Type::I32);
        // The route created one entry variable on the gamma.
        assert_eq!(graph.node(gamma).inputs.len(), 2);
        assert_eq!(graph.input_origin(gamma, 1), v);
    }

    #[test]
    fn prune_removes_dead_chains() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = constant(&mut graph, root, 1);
        let copy = graph.add_node(root, Operation::Copy(Type::I32), &[a]);
        let dead = graph.add_node(
            root,
            Operation::Copy(Type::I32),
            &[Origin::output(copy, 0)],
        );
        let live = constant(&mut graph, root, 2);
        graph.add_result(root, live);
        graph.prune(root);
        assert!(!graph.is_live(dead));
        assert!(!graph.is_live(copy));
        assert_eq!(graph.region(root).nodes.len(), 1);
    }
}
