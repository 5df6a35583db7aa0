use crate::{
    cfg::ControlFlowGraph,
    rvsdg::{Graph, Origin},
    types::{FunctionType, Linkage, Type},
};

/// An externally resolved symbol the module depends on.
#[derive(Debug, Clone)]
pub struct Import {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
}

/// A function definition: name, type, linkage, and a reducible CFG body.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub signature: FunctionType,
    pub linkage: Linkage,
    pub cfg: ControlFlowGraph,
}

/// A global-data definition whose initializer is computed by a CFG.
#[derive(Debug, Clone)]
pub struct DataDef {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
    pub constant: bool,
    pub initializer: ControlFlowGraph,
}

/// The front-end contract: an ordered list of imports, function definitions,
/// and global-data definitions. The back-end consumes the analogous module
/// after RVSDG destruction.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub imports: Vec<Import>,
    pub functions: Vec<FunctionDef>,
    pub data: Vec<DataDef>,
}

/// A module symbol exported through a root-region result.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
}

/// The RVSDG form of a module: the graph plus the import/export bookkeeping
/// that aligns root-region arguments and results with symbol names.
pub struct RvsdgModule {
    pub graph: Graph,
    pub name: String,
    /// One entry per root-region argument, in order.
    pub imports: Vec<Import>,
    /// One entry per root-region result, in order.
    pub exports: Vec<Export>,
}

impl RvsdgModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(),
            name: name.into(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Declare an import, creating the matching root-region argument.
    pub fn add_import(&mut self, import: Import) -> Origin {
        let origin = self.graph.add_argument(self.graph.root(), import.ty.clone());
        self.imports.push(import);
        origin
    }

    /// Export `origin` under `name`, creating the matching root result.
    pub fn add_export(&mut self, origin: Origin, name: impl Into<String>) {
        self.graph.add_result(self.graph.root(), origin);
        self.exports.push(Export { name: name.into() });
    }
}
