use std::{cmp::Reverse, collections::BinaryHeap};

use rustc_hash::FxHashMap;

use crate::rvsdg::{
    graph::Graph,
    node::{Node, Origin, Region, User},
};

/// Computes the deterministic top-down order of a region: a node becomes
/// visitable once all of its intra-region predecessors have been visited,
/// ties broken by insertion order.
fn topological_order(graph: &Graph, region: Region) -> Vec<Node> {
    let nodes = &graph.region(region).nodes;
    let position: FxHashMap<Node, usize> =
        nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut indegree: FxHashMap<Node, usize> = FxHashMap::default();
    for &node in nodes {
        let mut count = 0;
        for input in &graph.node(node).inputs {
            if let Origin::Output { node: producer, .. } = input.origin
                && position.contains_key(&producer)
            {
                count += 1;
            }
        }
        indegree.insert(node, count);
    }

    let mut ready: BinaryHeap<Reverse<(usize, Node)>> = nodes
        .iter()
        .filter(|n| indegree[n] == 0)
        .map(|n| Reverse((position[n], *n)))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for output in &graph.node(node).outputs {
            for user in &output.users {
                if let User::Input { node: consumer, .. } = user
                    && let Some(count) = indegree.get_mut(consumer)
                {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((position[consumer], *consumer)));
                    }
                }
            }
        }
    }
    assert_eq!(
        order.len(),
        nodes.len(),
        "cycle among nodes of a region; theta feedback must go through results"
    );
    order
}

/// Yields the nodes of a region top-down: every node after all the producers
/// of its inputs, ties broken by insertion order.
///
/// The order is snapshotted at construction. Removing the yielded node or any
/// node that has not been yielded yet is safe; removed nodes are skipped.
/// Nodes created after construction are not visited.
pub struct TopDownTraverser {
    order: Vec<Node>,
    position: usize,
}

impl TopDownTraverser {
    pub fn new(graph: &Graph, region: Region) -> Self {
        Self {
            order: topological_order(graph, region),
            position: 0,
        }
    }

    pub fn next(&mut self, graph: &Graph) -> Option<Node> {
        while self.position < self.order.len() {
            let node = self.order[self.position];
            self.position += 1;
            if graph.is_live(node) {
                return Some(node);
            }
        }
        None
    }
}

/// Yields the nodes of a region bottom-up: every node after all of its
/// intra-region users. Dual of [TopDownTraverser], with the same snapshot and
/// removal-safety contract.
pub struct BottomUpTraverser {
    order: Vec<Node>,
    position: usize,
}

impl BottomUpTraverser {
    pub fn new(graph: &Graph, region: Region) -> Self {
        let mut order = topological_order(graph, region);
        order.reverse();
        Self { order, position: 0 }
    }

    pub fn next(&mut self, graph: &Graph) -> Option<Node> {
        while self.position < self.order.len() {
            let node = self.order[self.position];
            self.position += 1;
            if graph.is_live(node) {
                return Some(node);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ops::{BinaryKind, ConstantValue, Operation},
        types::Type,
    };

    fn diamond(graph: &mut Graph) -> (Node, Node, Node, Node) {
        let root = graph.root();
        let a = graph.add_node(
            root,
            Operation::Constant(ConstantValue::Int { bits: 32, value: 1 }),
            &[],
        );
        let b = graph.add_node(root, Operation::Copy(Type::I32), &[Origin::output(a, 0)]);
        let c = graph.add_node(root, Operation::Copy(Type::I32), &[Origin::output(a, 0)]);
        let d = graph.add_node(
            root,
            Operation::Binary(BinaryKind::Add, Type::I32),
            &[Origin::output(b, 0), Origin::output(c, 0)],
        );
        (a, b, c, d)
    }

    #[test]
    fn top_down_order_is_deterministic() {
        let mut graph = Graph::new();
        let (a, b, c, d) = diamond(&mut graph);
        let mut traverser = TopDownTraverser::new(&graph, graph.root());
        let mut order = Vec::new();
        while let Some(node) = traverser.next(&graph) {
            order.push(node);
        }
        // Ties (b vs c) break by insertion order.
        assert_eq!(order, vec![a, b, c, d]);
    }

    #[test]
    fn bottom_up_is_the_dual() {
        let mut graph = Graph::new();
        let (a, b, c, d) = diamond(&mut graph);
        let mut traverser = BottomUpTraverser::new(&graph, graph.root());
        let mut order = Vec::new();
        while let Some(node) = traverser.next(&graph) {
            order.push(node);
        }
        assert_eq!(order, vec![d, c, b, a]);
    }

    #[test]
    fn removal_of_later_nodes_is_skipped() {
        let mut graph = Graph::new();
        let (a, b, c, d) = diamond(&mut graph);
        let mut traverser = TopDownTraverser::new(&graph, graph.root());
        assert_eq!(traverser.next(&graph), Some(a));
        graph.remove_node(d);
        graph.remove_node(c);
        assert_eq!(traverser.next(&graph), Some(b));
        assert_eq!(traverser.next(&graph), None);
    }
}
