//! Tokenizer for the source dialect.
//!
//! ## Features
//!
//! - **Identifiers and keywords**: `type if else while return input output
//!   inline exit signed`; everything else word-shaped is an identifier
//! - **Integer literals**: plain decimal
//! - **String literals**: escapes `\n`, `\r`, `\t`, `\\`; an unrecognized
//!   escape reproduces the following character verbatim (so `\"` yields a
//!   quote inside the literal)
//! - **Comments**: `//` to end of line, skipped entirely
//! - **Punctuation**: braces, parens, comma, semicolon, dot, `=`, `+`, `-`,
//!   `*`, `/`, `->`
//!
//! `*` and `/` lex fine but are reserved tokens: the lowerer rejects them.

pub mod cursor;
pub mod token;

#[cfg(test)]
mod tests;

use crate::error::{CompileError, ErrorKind};
use cursor::Cursor;
use token::{Token, TokenKind};

pub struct LexResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<CompileError>,
}

#[must_use]
pub fn tokenize(file: &str, source: &str) -> LexResult {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    while !cursor.is_at_end() {
        match lex_token(&mut cursor, file) {
            Ok(Some(token)) => tokens.push(token),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }

    let (b, l, c) = cursor.current_pos();
    tokens.push(Token {
        kind: TokenKind::Eof,
        lexeme: String::new(),
        span: crate::error::Span {
            start: b,
            end: b,
            line: l,
            col: c,
        },
    });

    LexResult { tokens, errors }
}

fn lex_token(cursor: &mut Cursor, file: &str) -> Result<Option<Token>, CompileError> {
    // Skip whitespace.
    while matches!(cursor.peek(), Some(' ' | '\t' | '\r' | '\n')) {
        cursor.advance();
    }

    // Skip line comments.
    if cursor.peek() == Some('/') && cursor.peek_next() == Some('/') {
        while !matches!(cursor.peek(), None | Some('\n')) {
            cursor.advance();
        }
        return Ok(None);
    }

    if cursor.is_at_end() {
        return Ok(None);
    }

    let (sb, sl, sc) = cursor.current_pos();
    let ch = cursor.peek().unwrap();

    // Single-character tokens.
    let single = match ch {
        '{' => Some(TokenKind::LBrace),
        '}' => Some(TokenKind::RBrace),
        '(' => Some(TokenKind::LParen),
        ')' => Some(TokenKind::RParen),
        ',' => Some(TokenKind::Comma),
        ';' => Some(TokenKind::Semicolon),
        '.' => Some(TokenKind::Dot),
        '=' => Some(TokenKind::Assign),
        '+' => Some(TokenKind::Plus),
        '*' => Some(TokenKind::Star),
        '/' => Some(TokenKind::Slash),
        _ => None,
    };
    if let Some(kind) = single {
        cursor.advance();
        return Ok(Some(Token {
            kind,
            lexeme: ch.to_string(),
            span: cursor.make_span(sb, sl, sc),
        }));
    }

    match ch {
        '-' => {
            cursor.advance();
            if cursor.peek() == Some('>') {
                cursor.advance();
                Ok(Some(Token {
                    kind: TokenKind::Arrow,
                    lexeme: "->".into(),
                    span: cursor.make_span(sb, sl, sc),
                }))
            } else {
                Ok(Some(Token {
                    kind: TokenKind::Minus,
                    lexeme: "-".into(),
                    span: cursor.make_span(sb, sl, sc),
                }))
            }
        }
        '"' => lex_string(cursor, file, sb, sl, sc),
        c if c.is_ascii_digit() => lex_int(cursor, file, sb, sl, sc),
        c if c.is_ascii_alphabetic() || c == '_' => lex_word(cursor, sb, sl, sc),
        _ => {
            cursor.advance();
            Err(CompileError::new(
                ErrorKind::UnexpectedCharacter,
                format!("Unexpected character '{}'", ch),
                file,
                sl,
            ))
        }
    }
}

fn lex_string(
    cursor: &mut Cursor,
    file: &str,
    sb: usize,
    sl: usize,
    sc: usize,
) -> Result<Option<Token>, CompileError> {
    cursor.advance();
    let mut processed = String::new();
    let mut raw = String::from("\"");

    loop {
        let ch = match cursor.peek() {
            Some(c) if c != '\n' => c,
            _ => {
                return Err(CompileError::new(
                    ErrorKind::UnterminatedString,
                    "Unterminated string literal",
                    file,
                    sl,
                ));
            }
        };

        if ch == '"' {
            cursor.advance();
            raw.push('"');
            break;
        }

        if ch == '\\' {
            cursor.advance();
            raw.push('\\');
            let esc = match cursor.peek() {
                Some(c) if c != '\n' => c,
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::UnterminatedString,
                        "Unterminated string literal",
                        file,
                        sl,
                    ));
                }
            };
            cursor.advance();
            raw.push(esc);
            match esc {
                'n' => processed.push('\n'),
                'r' => processed.push('\r'),
                't' => processed.push('\t'),
                '\\' => processed.push('\\'),
                // Unrecognized escape: the following character verbatim.
                other => processed.push(other),
            }
        } else {
            let c = cursor.advance().unwrap();
            processed.push(c);
            raw.push(c);
        }
    }

    Ok(Some(Token {
        kind: TokenKind::Str(processed),
        lexeme: raw,
        span: cursor.make_span(sb, sl, sc),
    }))
}

fn lex_int(
    cursor: &mut Cursor,
    file: &str,
    sb: usize,
    sl: usize,
    sc: usize,
) -> Result<Option<Token>, CompileError> {
    let mut digits = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
        digits.push(cursor.advance().unwrap());
    }

    let value = digits.parse::<i64>().map_err(|_| {
        CompileError::new(
            ErrorKind::InvalidIntegerLiteral,
            format!("Invalid integer literal '{}'", digits),
            file,
            sl,
        )
    })?;

    Ok(Some(Token {
        kind: TokenKind::Int(value),
        lexeme: digits,
        span: cursor.make_span(sb, sl, sc),
    }))
}

fn lex_word(
    cursor: &mut Cursor,
    sb: usize,
    sl: usize,
    sc: usize,
) -> Result<Option<Token>, CompileError> {
    let mut word = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
        word.push(cursor.advance().unwrap());
    }

    let kind = match word.as_str() {
        "type" => TokenKind::KwType,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "return" => TokenKind::KwReturn,
        "input" => TokenKind::KwInput,
        "output" => TokenKind::KwOutput,
        "inline" => TokenKind::KwInline,
        "exit" => TokenKind::KwExit,
        "signed" => TokenKind::KwSigned,
        _ => TokenKind::Ident(word.clone()),
    };

    Ok(Some(Token {
        kind,
        lexeme: word,
        span: cursor.make_span(sb, sl, sc),
    }))
}
