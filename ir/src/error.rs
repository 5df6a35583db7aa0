use crate::types::Type;

/// Errors surfaced to the user by the middle-end.
///
/// Everything else (arity mismatches, orphaned user-list entries, removal of
/// nodes with live users) is a programming error and panics with file/line
/// context rather than being reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// The input module is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A control-flow graph could not be reduced to structured form.
    #[error("irreducible control flow in function '{function}'")]
    IrreducibleCfg { function: String },

    /// A value was used at a type other than its declared type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },

    /// A name was used without a visible definition.
    #[error("undefined reference to '{0}'")]
    UndefinedReference(String),
}
