use std::{fmt, sync::Arc};

use smallvec::{SmallVec, smallvec};

use crate::types::{FunctionType, Type};

/// The kind of a binary arithmetic, bitwise, or comparison operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl BinaryKind {
    pub fn is_commutative(&self) -> bool {
        use BinaryKind::*;
        matches!(self, Add | Mul | And | Or | Xor | Eq | Ne)
    }

    pub fn is_comparison(&self) -> bool {
        use BinaryKind::*;
        matches!(self, Eq | Ne | SLt | SLe | SGt | SGe | ULt | ULe | UGt | UGe)
    }

    /// Evaluate the operation on two constants of width `bits`.
    ///
    /// Both operands are given zero-extended in `u64`. Returns `None` when the
    /// result is undefined (division or remainder by zero). Comparison kinds
    /// yield 0 or 1.
    pub fn apply(&self, bits: u32, lhs: u64, rhs: u64) -> Option<u64> {
        let mask = mask(bits);
        let sl = sign_extend(lhs, bits);
        let sr = sign_extend(rhs, bits);
        let value = match self {
            BinaryKind::Add => lhs.wrapping_add(rhs),
            BinaryKind::Sub => lhs.wrapping_sub(rhs),
            BinaryKind::Mul => lhs.wrapping_mul(rhs),
            BinaryKind::SDiv => {
                if rhs == 0 {
                    return None;
                }
                sl.wrapping_div(sr) as u64
            }
            BinaryKind::UDiv => {
                if rhs == 0 {
                    return None;
                }
                lhs / rhs
            }
            BinaryKind::SRem => {
                if rhs == 0 {
                    return None;
                }
                sl.wrapping_rem(sr) as u64
            }
            BinaryKind::URem => {
                if rhs == 0 {
                    return None;
                }
                lhs % rhs
            }
            BinaryKind::And => lhs & rhs,
            BinaryKind::Or => lhs | rhs,
            BinaryKind::Xor => lhs ^ rhs,
            BinaryKind::Shl => lhs.checked_shl(rhs as u32).unwrap_or(0),
            BinaryKind::LShr => lhs.checked_shr(rhs as u32).unwrap_or(0),
            BinaryKind::AShr => {
                if rhs as u32 >= bits {
                    if sl < 0 { mask } else { 0 }
                } else {
                    (sl >> rhs) as u64
                }
            }
            BinaryKind::Eq => (lhs == rhs) as u64,
            BinaryKind::Ne => (lhs != rhs) as u64,
            BinaryKind::SLt => (sl < sr) as u64,
            BinaryKind::SLe => (sl <= sr) as u64,
            BinaryKind::SGt => (sl > sr) as u64,
            BinaryKind::SGe => (sl >= sr) as u64,
            BinaryKind::ULt => (lhs < rhs) as u64,
            BinaryKind::ULe => (lhs <= rhs) as u64,
            BinaryKind::UGt => (lhs > rhs) as u64,
            BinaryKind::UGe => (lhs >= rhs) as u64,
        };
        Some(value & mask)
    }
}

/// The kind of a unary operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Neg,
    Not,
}

impl UnaryKind {
    pub fn apply(&self, bits: u32, operand: u64) -> u64 {
        let mask = mask(bits);
        match self {
            UnaryKind::Neg => operand.wrapping_neg() & mask,
            UnaryKind::Not => !operand & mask,
        }
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

/// A typed constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    /// An integer constant of the given width, stored zero-extended.
    Int { bits: u32, value: u64 },
    /// A control constant selecting alternative `value` of `alternatives`.
    Control { alternatives: u32, value: u32 },
}

impl ConstantValue {
    pub fn ty(&self) -> Type {
        match self {
            ConstantValue::Int { bits, .. } => Type::Int { bits: *bits },
            ConstantValue::Control { alternatives, .. } => Type::Control {
                alternatives: *alternatives,
            },
        }
    }
}

/// The case table of a [Operation::Match]: maps integer values to control
/// alternatives, with a default alternative for unmatched values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchMapping {
    pub cases: Arc<[(u64, u32)]>,
    pub default: u32,
    pub alternatives: u32,
}

impl MatchMapping {
    pub fn select(&self, value: u64) -> u32 {
        self.cases
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, alt)| *alt)
            .unwrap_or(self.default)
    }
}

/// The input and output type vectors of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub inputs: SmallVec<[Type; 4]>,
    pub outputs: SmallVec<[Type; 2]>,
}

/// An operation descriptor: the symbolic identity of a simple node together
/// with its input and output type vectors.
///
/// Two operations are equal iff their identities and type vectors coincide.
/// The set of operations is closed; passes dispatch by exhaustive matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Binary arithmetic/bitwise/comparison on values of the payload type.
    Binary(BinaryKind, Type),
    /// Unary operation on a value of the payload type.
    Unary(UnaryKind, Type),
    /// Value copy. Also the CFG-level variable assignment.
    Copy(Type),
    /// A typed constant with no inputs.
    Constant(ConstantValue),
    /// Map an integer of width `bits` to a control value.
    Match { bits: u32, mapping: MatchMapping },
    /// CFG block terminator consuming a control value. Never appears in the
    /// RVSDG; branches are absorbed into gamma and theta structure.
    Branch { alternatives: u32 },
    /// Memory-state multiplexer: merges or splits abstract memory states.
    Mux { ninputs: usize, noutputs: usize },
    /// Stack allocation of a value of the pointee type, threaded through the
    /// memory state.
    Alloca { pointee: Type },
    /// Heap allocation of `size` bytes.
    Malloc,
    /// Load a value of type `ty` through a pointer, threaded through
    /// `nstates` memory states.
    Load { ty: Type, nstates: usize },
    /// Store a value of type `ty` through a pointer.
    Store { ty: Type, nstates: usize },
    /// Call a function value with the given signature.
    Call(FunctionType),
    /// Marks the computed initializer value in a global-data body.
    DataMarker(Type),
    /// An undefined value of the given type.
    Undef(Type),
    /// Placeholder operation with an arbitrary signature, for tests.
    Test {
        inputs: Arc<[Type]>,
        outputs: Arc<[Type]>,
    },
}

impl Operation {
    /// The input and output type vectors of this operation.
    pub fn signature(&self) -> Signature {
        match self {
            Operation::Binary(kind, ty) => Signature {
                inputs: smallvec![ty.clone(), ty.clone()],
                outputs: smallvec![if kind.is_comparison() { Type::I1 } else { ty.clone() }],
            },
            Operation::Unary(_, ty) => Signature {
                inputs: smallvec![ty.clone()],
                outputs: smallvec![ty.clone()],
            },
            Operation::Copy(ty) => Signature {
                inputs: smallvec![ty.clone()],
                outputs: smallvec![ty.clone()],
            },
            Operation::Constant(value) => Signature {
                inputs: smallvec![],
                outputs: smallvec![value.ty()],
            },
            Operation::Match { bits, mapping } => Signature {
                inputs: smallvec![Type::Int { bits: *bits }],
                outputs: smallvec![Type::Control {
                    alternatives: mapping.alternatives,
                }],
            },
            Operation::Branch { alternatives } => Signature {
                inputs: smallvec![Type::Control {
                    alternatives: *alternatives,
                }],
                outputs: smallvec![],
            },
            Operation::Mux { ninputs, noutputs } => Signature {
                inputs: std::iter::repeat_n(Type::Memory, *ninputs).collect(),
                outputs: std::iter::repeat_n(Type::Memory, *noutputs).collect(),
            },
            Operation::Alloca { pointee } => Signature {
                inputs: smallvec![Type::Memory],
                outputs: smallvec![Type::pointer(pointee.clone()), Type::Memory],
            },
            Operation::Malloc => Signature {
                inputs: smallvec![Type::I64, Type::Memory],
                outputs: smallvec![Type::pointer(Type::I8), Type::Memory],
            },
            Operation::Load { ty, nstates } => {
                let mut inputs = smallvec![Type::pointer(ty.clone())];
                inputs.extend(std::iter::repeat_n(Type::Memory, *nstates));
                let mut outputs = smallvec![ty.clone()];
                outputs.extend(std::iter::repeat_n(Type::Memory, *nstates));
                Signature { inputs, outputs }
            }
            Operation::Store { ty, nstates } => {
                let mut inputs = smallvec![Type::pointer(ty.clone()), ty.clone()];
                inputs.extend(std::iter::repeat_n(Type::Memory, *nstates));
                Signature {
                    inputs,
                    outputs: std::iter::repeat_n(Type::Memory, *nstates).collect(),
                }
            }
            Operation::Call(fty) => {
                let mut inputs = smallvec![Type::Function(fty.clone())];
                inputs.extend(fty.params().iter().cloned());
                Signature {
                    inputs,
                    outputs: fty.results().iter().cloned().collect(),
                }
            }
            Operation::DataMarker(ty) => Signature {
                inputs: smallvec![ty.clone()],
                outputs: smallvec![ty.clone()],
            },
            Operation::Undef(ty) => Signature {
                inputs: smallvec![],
                outputs: smallvec![ty.clone()],
            },
            Operation::Test { inputs, outputs } => Signature {
                inputs: inputs.iter().cloned().collect(),
                outputs: outputs.iter().cloned().collect(),
            },
        }
    }

    pub fn is_memory_op(&self) -> bool {
        matches!(
            self,
            Operation::Mux { .. }
                | Operation::Alloca { .. }
                | Operation::Malloc
                | Operation::Load { .. }
                | Operation::Store { .. }
        )
    }

    /// Create a test operation from plain type slices.
    pub fn test(inputs: &[Type], outputs: &[Type]) -> Operation {
        Operation::Test {
            inputs: inputs.into(),
            outputs: outputs.into(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Binary(kind, _) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Operation::Unary(kind, _) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Operation::Copy(_) => f.write_str("copy"),
            Operation::Constant(ConstantValue::Int { value, .. }) => write!(f, "const {value}"),
            Operation::Constant(ConstantValue::Control { value, .. }) => {
                write!(f, "ctlconst {value}")
            }
            Operation::Match { .. } => f.write_str("match"),
            Operation::Branch { .. } => f.write_str("branch"),
            Operation::Mux { .. } => f.write_str("mux"),
            Operation::Alloca { .. } => f.write_str("alloca"),
            Operation::Malloc => f.write_str("malloc"),
            Operation::Load { .. } => f.write_str("load"),
            Operation::Store { .. } => f.write_str("store"),
            Operation::Call(_) => f.write_str("call"),
            Operation::DataMarker(_) => f.write_str("data"),
            Operation::Undef(_) => f.write_str("undef"),
            Operation::Test { .. } => f.write_str("testop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_apply_wraps_at_width() {
        assert_eq!(BinaryKind::Add.apply(8, 250, 10), Some(4));
        assert_eq!(BinaryKind::Mul.apply(8, 16, 16), Some(0));
        assert_eq!(BinaryKind::Sub.apply(32, 0, 1), Some(0xffff_ffff));
    }

    #[test]
    fn binary_apply_signed_comparisons() {
        // -1 < 1 at any width
        assert_eq!(BinaryKind::SLt.apply(8, 0xff, 1), Some(1));
        assert_eq!(BinaryKind::ULt.apply(8, 0xff, 1), Some(0));
        assert_eq!(BinaryKind::SDiv.apply(8, 0xfe, 2), Some(0xff));
    }

    #[test]
    fn division_by_zero_is_undefined() {
        assert_eq!(BinaryKind::SDiv.apply(32, 1, 0), None);
        assert_eq!(BinaryKind::URem.apply(32, 1, 0), None);
    }

    #[test]
    fn operation_equality_includes_types() {
        let a = Operation::Binary(BinaryKind::Add, Type::I32);
        let b = Operation::Binary(BinaryKind::Add, Type::I64);
        assert_ne!(a, b);
        assert_eq!(a, Operation::Binary(BinaryKind::Add, Type::I32));
    }

    #[test]
    fn store_signature_threads_states() {
        let op = Operation::Store {
            ty: Type::I32,
            nstates: 3,
        };
        let sig = op.signature();
        assert_eq!(sig.inputs.len(), 5);
        assert_eq!(sig.outputs.len(), 3);
        assert!(sig.outputs.iter().all(Type::is_memory));
    }

    #[test]
    fn match_mapping_selects_default() {
        let mapping = MatchMapping {
            cases: Arc::from([(0u64, 1u32), (1, 0)]),
            default: 2,
            alternatives: 3,
        };
        assert_eq!(mapping.select(0), 1);
        assert_eq!(mapping.select(7), 2);
    }
}
