//! The IR crates of the middle-end: the RVSDG graph substrate, the CFG-level
//! three-address IR it is converted from and lowered back to, and the module
//! model shared with the front- and back-end.

pub mod cfg;
pub mod error;
pub mod module;
pub mod ops;
pub mod rvsdg;
pub mod tac;
pub mod types;

pub use self::{
    error::IrError,
    module::{DataDef, Export, FunctionDef, Import, Module, RvsdgModule},
    ops::{BinaryKind, ConstantValue, MatchMapping, Operation, Signature, UnaryKind},
    types::{FloatKind, FunctionType, Linkage, Type},
};

pub use rustc_hash::{FxHashMap, FxHashSet};
