// Error types for the two points where this crate can fail: building a
// CST from an AST (§4.1, §4.2), and driving records through it (§6).
//
// The teacher's own error enums (vm.rs::Error, typechecker.rs::TypeError)
// are hand-rolled with no Display impl; `thiserror` is pulled in here
// instead so these errors carry a human-readable message for the CLI
// boundary and `?` composes the same way it does for every other
// fallible call in this crate (see DESIGN.md).

use thiserror::Error;

/// Raised while translating an AST into a CST: name-resolution failures
/// from stack_allocate.rs, and context-validation failures (R1-R7) from
/// cst.rs.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("local variable `{0}` declared more than once in the same scope")]
    Redeclared(String),

    #[error("local variable `{0}` used before it was declared")]
    Undeclared(String),

    #[error("`break` used outside of a loop body")]
    BreakOutsideLoop,

    #[error("`continue` used outside of a loop body")]
    ContinueOutsideLoop,

    #[error("`return` used outside of a function or subroutine body")]
    ReturnOutsideCallable,

    #[error("`return` shape does not match its enclosing function/subroutine")]
    ReturnShapeMismatch,

    #[error("`$*`/field access is not allowed in begin/end blocks")]
    SrecAccessInBeginOrEnd,

    #[error("`$*`/field write is not allowed inside a function body")]
    SrecWriteInFunc,

    #[error("subroutine call is not allowed inside a function body")]
    CallInFunc,

    #[error("output statement (emit/emitf/emitp/tee/print/dump) is not allowed inside a function body")]
    SideEffectInFunction,

    #[error("`filter` statement misplaced: {0}")]
    FilterMisplaced(String),

    #[error("duplicate `{0}` block; at most one is allowed")]
    DuplicateBlock(&'static str),

    #[error("call to undefined function or subroutine `{0}`")]
    UnknownCallable(String),

    #[error("`{name}` called with {got} argument(s), expected {expected}")]
    Arity { name: String, expected: usize, got: usize },

    #[error("`{0}` is a subroutine and cannot be called as a function")]
    SubrCalledAsFunc(String),

    #[error("`{0}` is a function and cannot be called as a subroutine")]
    FuncCalledAsSubr(String),
}

/// Raised while running a built CST against an input stream.
#[derive(Debug, Error)]
pub enum IoSinkError {
    #[error("failed to open output stream `{path}`: {source}")]
    Open { path: String, #[source] source: std::io::Error },

    #[error("failed to write record: {source}")]
    Write { #[source] source: std::io::Error },

    #[error("failed to serialize record as JSON: {source}")]
    Serialize { #[source] source: serde_json::Error },
}
