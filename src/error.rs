//! Compiler diagnostics.
//!
//! Every user-facing error carries the source file and line it refers to and
//! formats as a single line:
//!
//! ```text
//! <file>:<line> Error <code>: <message>
//! ```
//!
//! The numeric code identifies the error class (syntax 1, resolution 2,
//! type 3, arity 4, semantic misuse 5, internal consistency 9). The first
//! error aborts compilation; there is no recovery.

use thiserror::Error;

/// Source location of a token or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub col: usize,
}

impl Span {
    pub fn zero() -> Self {
        Span {
            start: 0,
            end: 0,
            line: 1,
            col: 1,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{file}:{line} Error {}: {message}", .kind.code())]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: String,
    pub line: usize,
}

impl CompileError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        file: impl Into<String>,
        line: usize,
    ) -> Self {
        CompileError {
            kind,
            message: message.into(),
            file: file.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Syntax (lexer and parser).
    UnexpectedCharacter,
    UnterminatedString,
    InvalidIntegerLiteral,
    UnexpectedToken,
    ExpectedToken,

    // Resolution.
    UnresolvedName,
    AmbiguousName,
    WrongSymbolKind,
    Redefinition,

    // Types.
    TypeMismatch,

    // Arity (tuples, returns, calls).
    ArityMismatch,

    // Semantic misuse.
    AssignToTemporary,
    AssignToCall,
    ReturnOutsideFunction,
    MultipleMain,
    MissingMain,
    TupleOperand,
    MemberCallWithoutReceiver,
    UnimplementedOperator,
    SignedUnsupported,
    InputToTemporary,
    ConditionNotScalar,
    ValueOutOfRange,
    LabelOverflow,
    StatementAtModuleScope,
    NoReturnValue,

    // Internal consistency (never user-triggered).
    ScopeImbalance,
    HeadModel,
}

impl ErrorKind {
    /// Numeric error class reported in diagnostics and used as exit status.
    pub fn code(&self) -> i32 {
        use ErrorKind::*;
        match self {
            UnexpectedCharacter | UnterminatedString | InvalidIntegerLiteral
            | UnexpectedToken | ExpectedToken => 1,
            UnresolvedName | AmbiguousName | WrongSymbolKind | Redefinition => 2,
            TypeMismatch => 3,
            ArityMismatch => 4,
            AssignToTemporary | AssignToCall | ReturnOutsideFunction | MultipleMain
            | MissingMain | TupleOperand | MemberCallWithoutReceiver
            | UnimplementedOperator | SignedUnsupported
            | InputToTemporary | ConditionNotScalar | ValueOutOfRange | LabelOverflow
            | StatementAtModuleScope | NoReturnValue => 5,
            ScopeImbalance | HeadModel => 9,
        }
    }
}
