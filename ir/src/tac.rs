use cranelift_entity::{PrimaryMap, entity_impl};
use smallvec::SmallVec;

use crate::{ops::Operation, types::Type};

/// An SSA-like named value of the CFG-level IR.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
entity_impl!(Variable, "v");

/// Metadata of a variable. Variables referencing module-level symbols carry
/// the symbol name; they are resolved to context variables during RVSDG
/// construction.
#[derive(Debug, Clone)]
pub struct VariableData {
    pub name: String,
    pub ty: Type,
    pub symbol: Option<String>,
}

/// The variable table of one function.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    variables: PrimaryMap<Variable, VariableData>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, ty: Type) -> Variable {
        self.variables.push(VariableData {
            name: name.into(),
            ty,
            symbol: None,
        })
    }

    /// Declare a variable standing for the module-level symbol `symbol`.
    pub fn add_symbol_ref(&mut self, symbol: impl Into<String>, ty: Type) -> Variable {
        let symbol = symbol.into();
        self.variables.push(VariableData {
            name: symbol.clone(),
            ty,
            symbol: Some(symbol),
        })
    }

    pub fn get(&self, variable: Variable) -> &VariableData {
        &self.variables[variable]
    }

    pub fn ty(&self, variable: Variable) -> &Type {
        &self.variables[variable].ty
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, &VariableData)> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// A three-address operation: an operation applied to named input variables,
/// defining named output variables.
#[derive(Debug, Clone)]
pub struct Tac {
    pub operation: Operation,
    pub operands: SmallVec<[Variable; 2]>,
    pub results: SmallVec<[Variable; 1]>,
}

impl Tac {
    pub fn new(
        operation: Operation,
        operands: impl IntoIterator<Item = Variable>,
        results: impl IntoIterator<Item = Variable>,
    ) -> Self {
        Self {
            operation,
            operands: operands.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}

/// An ordered list of three-address operations.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    tacs: Vec<Tac>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tac: Tac) -> &Tac {
        self.tacs.push(tac);
        self.tacs.last().unwrap()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tac> {
        self.tacs.iter()
    }

    pub fn ntacs(&self) -> usize {
        self.tacs.len()
    }

    pub fn first(&self) -> Option<&Tac> {
        self.tacs.first()
    }

    pub fn last(&self) -> Option<&Tac> {
        self.tacs.last()
    }

    pub fn drop_first(&mut self) {
        if !self.tacs.is_empty() {
            self.tacs.remove(0);
        }
    }

    pub fn drop_last(&mut self) {
        self.tacs.pop();
    }
}

impl<'a> IntoIterator for &'a BasicBlock {
    type Item = &'a Tac;
    type IntoIter = std::slice::Iter<'a, Tac>;

    fn into_iter(self) -> Self::IntoIter {
        self.tacs.iter()
    }
}
