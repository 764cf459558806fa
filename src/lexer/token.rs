//! Token types for the source dialect.
//!
//! Each token carries its kind, the original lexeme, and a span for error
//! reporting.

use crate::error::Span;

/// A single lexical token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === Keywords ===
    KwType,
    KwIf,
    KwElse,
    KwWhile,
    KwReturn,
    KwInput,
    KwOutput,
    KwInline,
    KwExit,
    KwSigned,

    // === Literals and names ===
    Ident(String),
    Int(i64),
    Str(String), // escape-processed

    // === Punctuation ===
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,  // reserved: multiplication
    Slash, // reserved: division
    Arrow, // "->" before a return-value list

    Eof,
}

impl TokenKind {
    /// Human-readable name used in "expected X" diagnostics.
    pub fn describe(&self) -> &'static str {
        use TokenKind::*;
        match self {
            KwType => "'type'",
            KwIf => "'if'",
            KwElse => "'else'",
            KwWhile => "'while'",
            KwReturn => "'return'",
            KwInput => "'input'",
            KwOutput => "'output'",
            KwInline => "'inline'",
            KwExit => "'exit'",
            KwSigned => "'signed'",
            Ident(_) => "identifier",
            Int(_) => "integer literal",
            Str(_) => "string literal",
            LBrace => "'{'",
            RBrace => "'}'",
            LParen => "'('",
            RParen => "')'",
            Comma => "','",
            Semicolon => "';'",
            Dot => "'.'",
            Assign => "'='",
            Plus => "'+'",
            Minus => "'-'",
            Star => "'*'",
            Slash => "'/'",
            Arrow => "'->'",
            Eof => "end of input",
        }
    }
}
