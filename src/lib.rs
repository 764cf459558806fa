//! # bflang
//!
//! A compiler for a small procedural language - variables, typed records,
//! functions with tuple returns, `if`/`while`, member access - targeting a
//! minimal tape machine with eight primitives (`+ - < > . , [ ]`) plus an
//! `@` halt extension understood by the companion interpreter.
//!
//! ## Pipeline
//!
//! 1. **Lexer** - tokenizes source into spanned tokens
//! 2. **Parser** - builds the AST
//! 3. **Registrar** - declares types, functions, and module variables,
//!    laying out every stackframe
//! 4. **Lowerer** - walks function bodies, emitting the typed IR
//! 5. **Emitter** - expands each IR instruction into a fixed primitive
//!    pattern and wraps the program in the label dispatcher
//!
//! The target machine has no registers, no addressable memory, and no
//! conditional jumps; stack discipline and label dispatch are simulated
//! by a choreographed walk of the single data head (see `emitter`).
//!
//! ## Example
//!
//! ```rust
//! use bflang::state::{CompilationState, CompilerOptions};
//!
//! let mut state = CompilationState::new(CompilerOptions {
//!     optimize: true,
//!     ..Default::default()
//! });
//! bflang::compile_source(&mut state, "demo.bfl", "main() { output 65; }").unwrap();
//! let program = bflang::build_program(&state).unwrap();
//! assert!(program.ends_with(']'));
//! ```

pub mod emitter;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod lowering;
pub mod optimizer;
pub mod parser;
pub mod registrar;
pub mod state;
pub mod symbols;

use error::{CompileError, ErrorKind};
use state::CompilationState;
use symbols::SymbolKind;

/// Run one source unit through lex, parse, register, and lower. Multiple
/// units may be compiled into the same state; they share one symbol table
/// and one instruction stream.
pub fn compile_source(
    state: &mut CompilationState,
    file: &str,
    source: &str,
) -> Result<(), CompileError> {
    let lexed = lexer::tokenize(file, source);
    if let Some(err) = lexed.errors.into_iter().next() {
        return Err(err);
    }
    let program = parser::parse(file, &lexed.tokens)?;
    registrar::register(state, file, &program)?;
    lowering::lower(state, file, &program)?;
    state.check_unwound()
}

/// The emitted IR listing, one instruction per line.
pub fn build_listing(state: &CompilationState) -> String {
    let mut listing = String::new();
    for instr in &state.ir {
        listing.push_str(&instr.to_string());
        listing.push('\n');
    }
    listing
}

/// Expand the IR into the final tape program. In debug mode the result is
/// the annotated, unwrapped byte stream; otherwise the body is wrapped in
/// the dispatcher prologue/epilogue targeting `main`, with the peephole
/// pass applied when enabled.
pub fn build_program(state: &CompilationState) -> Result<String, CompileError> {
    let main = state.main.ok_or_else(|| {
        CompileError::new(
            ErrorKind::MissingMain,
            "No main function found",
            "<input>",
            0,
        )
    })?;
    let body = emitter::emit(&state.ir, state.options.debug)?;
    if state.options.debug {
        return Ok(body);
    }
    let entry = match state.symbols.get(main).kind {
        SymbolKind::Function { entry, .. } => entry,
        _ => unreachable!("main is registered as a function"),
    };
    let extent = state.symbols.entry_frame_extent(main);
    Ok(emitter::wrap(&body, entry, extent, state.options.optimize))
}
