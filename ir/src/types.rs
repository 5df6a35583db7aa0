use std::{fmt, sync::Arc};

/// The set of floating-point formats understood by the middle-end.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Half,
    Single,
    Double,
}

/// The type of a value flowing along an edge of the graph, or held by a
/// variable of the CFG-level IR.
///
/// Types are immutable values compared by structural equality; composite
/// variants share their payload via [Arc] so cloning a type is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A fixed-width integer.
    Int { bits: u32 },
    /// A floating-point number of the given format.
    Float(FloatKind),
    /// A pointer to a value of the pointee type.
    Pointer(Arc<Type>),
    /// A fixed-length array.
    Array { element: Arc<Type>, len: u64 },
    /// A structure with ordered fields.
    Struct(Arc<[Type]>),
    /// An abstract memory state.
    ///
    /// Memory states carry no data at runtime; they sequence operations that
    /// touch memory. The basic memory-state encoder splits edges of this type
    /// into one edge per points-to equivalence class.
    Memory,
    /// An abstract I/O state, sequencing externally observable effects.
    Io,
    /// A control value selecting one of `alternatives` continuations.
    Control { alternatives: u32 },
    /// A function.
    Function(FunctionType),
}

impl Type {
    pub const I1: Type = Type::Int { bits: 1 };
    pub const I8: Type = Type::Int { bits: 8 };
    pub const I32: Type = Type::Int { bits: 32 };
    pub const I64: Type = Type::Int { bits: 64 };

    pub fn pointer(pointee: Type) -> Type {
        Type::Pointer(Arc::new(pointee))
    }

    pub fn control(alternatives: u32) -> Type {
        Type::Control { alternatives }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Type::Memory)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Type::Control { .. })
    }

    /// The pointee type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int { bits } => write!(f, "i{bits}"),
            Type::Float(FloatKind::Half) => f.write_str("f16"),
            Type::Float(FloatKind::Single) => f.write_str("f32"),
            Type::Float(FloatKind::Double) => f.write_str("f64"),
            Type::Pointer(p) => write!(f, "ptr<{p}>"),
            Type::Array { element, len } => write!(f, "[{element}; {len}]"),
            Type::Struct(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str("}")
            }
            Type::Memory => f.write_str("mem"),
            Type::Io => f.write_str("io"),
            Type::Control { alternatives } => write!(f, "ctl<{alternatives}>"),
            Type::Function(fty) => write!(f, "{fty}"),
        }
    }
}

/// The type of a function: an ordered vector of parameter types mapped to an
/// ordered vector of result types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    params: Arc<[Type]>,
    results: Arc<[Type]>,
}

impl FunctionType {
    pub fn new(params: impl Into<Arc<[Type]>>, results: impl Into<Arc<[Type]>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn results(&self) -> &[Type] {
        &self.results
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fn(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(") -> (")?;
        for (i, ty) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")
    }
}

/// Symbol visibility of a module-level definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => f.write_str("external"),
            Linkage::Internal => f.write_str("internal"),
        }
    }
}
