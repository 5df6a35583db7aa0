//! The points-to graph: memory locations and pointer-holding registers, with
//! edges asserting "a pointer held by `v` may point to location `w`".

use std::fmt::Write as _;

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use rvopt_ir::rvsdg::{Node, Origin};

/// An abstract memory location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryLocation {
    /// A stack allocation, identified by its alloca node.
    Alloca(Node),
    /// A heap allocation, identified by its malloc node.
    Malloc(Node),
    /// A global, identified by its delta node.
    Delta(Node),
    /// A function, identified by its lambda node.
    Lambda(Node),
    /// An externally resolved symbol, identified by its root argument index.
    Import(usize),
    /// Anything an escaped pointer may reach.
    Unknown,
    /// Memory outside the module.
    ExternalMemory,
}

/// A vertex of the points-to graph.
#[derive(Debug, Clone)]
pub enum PtVertex {
    /// One collapsed equivalence class of memory locations.
    Memory { members: Vec<MemoryLocation> },
    /// A pointer-typed register (an RVSDG origin).
    Register { origin: Origin, escapes: bool },
}

/// The final, collapsed points-to graph produced by the analysis.
#[derive(Default)]
pub struct PointsToGraph {
    graph: DiGraph<PtVertex, ()>,
    registers: FxHashMap<Origin, NodeIndex>,
    memory: FxHashMap<MemoryLocation, NodeIndex>,
}

impl PointsToGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one memory vertex covering an equivalence class of locations.
    pub fn add_memory_node(&mut self, members: Vec<MemoryLocation>) -> NodeIndex {
        let index = self.graph.add_node(PtVertex::Memory {
            members: members.clone(),
        });
        for member in members {
            self.memory.insert(member, index);
        }
        index
    }

    pub fn add_register_node(&mut self, origin: Origin, escapes: bool) -> NodeIndex {
        let index = self.graph.add_node(PtVertex::Register { origin, escapes });
        self.registers.insert(origin, index);
        index
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.update_edge(from, to, ());
    }

    pub fn memory_node(&self, location: MemoryLocation) -> Option<NodeIndex> {
        self.memory.get(&location).copied()
    }

    pub fn register_node(&self, origin: Origin) -> Option<NodeIndex> {
        self.registers.get(&origin).copied()
    }

    /// The memory locations `vertex` may point to.
    pub fn points_to(&self, vertex: NodeIndex) -> Vec<MemoryLocation> {
        let mut locations = Vec::new();
        for target in self.graph.neighbors(vertex) {
            if let PtVertex::Memory { members } = &self.graph[target] {
                locations.extend(members.iter().copied());
            }
        }
        locations.sort_unstable();
        locations
    }

    /// The memory locations the pointer register at `origin` may point to.
    pub fn register_points_to(&self, origin: Origin) -> Vec<MemoryLocation> {
        self.register_node(origin)
            .map(|index| self.points_to(index))
            .unwrap_or_default()
    }

    pub fn escapes(&self, origin: Origin) -> bool {
        matches!(
            self.register_node(origin).map(|ix| &self.graph[ix]),
            Some(PtVertex::Register { escapes: true, .. })
        )
    }

    pub fn nmemory_nodes(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|ix| matches!(self.graph[*ix], PtVertex::Memory { .. }))
            .count()
    }

    pub fn nregister_nodes(&self) -> usize {
        self.registers.len()
    }

    /// A compact textual rendering for logs and tests.
    pub fn to_summary(&self) -> String {
        let mut out = String::new();
        for index in self.graph.node_indices() {
            match &self.graph[index] {
                PtVertex::Memory { members } => {
                    let _ = writeln!(out, "mem {members:?} -> {:?}", self.points_to(index));
                }
                PtVertex::Register { origin, escapes } => {
                    let _ = writeln!(
                        out,
                        "reg {origin:?}{} -> {:?}",
                        if *escapes { " (escapes)" } else { "" },
                        self.points_to(index)
                    );
                }
            }
        }
        out
    }
}
