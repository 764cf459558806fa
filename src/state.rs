//! Shared compilation state threaded through the pipeline.
//!
//! One [`CompilationState`] value owns the symbol table, the label
//! allocator, and the IR sink. The registrar and the lowerer both mutate
//! it; nothing in the pipeline is shared or reentrant.

use crate::error::{CompileError, ErrorKind};
use crate::ir::{Instr, Op};
use crate::symbols::{Label, SymbolId, SymbolKind, SymbolTable};

/// Process-wide flags, threaded explicitly instead of living in globals.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    pub verbose: bool,
    /// Annotate the byte stream with IR lines and skip wrapping; the
    /// result is a diagnostic artifact, not a runnable program.
    pub debug: bool,
    /// Include temporaries and hidden symbols in the symbol-table dump.
    pub verbose_symbol_table: bool,
    /// Print fully qualified symbol names in comments and dumps.
    pub verbose_symbol_names: bool,
    /// Run the peephole pass when wrapping the program.
    pub optimize: bool,
}

/// Monotone label source. Labels start at 1; 0 is the halt sentinel. A
/// label embeds as a literal cell value in the emitted program, so
/// allocation past the cell range is a hard error.
#[derive(Debug, Default)]
pub struct LabelAllocator {
    last: Label,
}

/// Largest value one 8-bit cell can hold, and therefore the largest label.
pub const MAX_LABEL: Label = 255;

impl LabelAllocator {
    pub fn allocate(&mut self, file: &str, line: usize) -> Result<Label, CompileError> {
        if self.last >= MAX_LABEL {
            return Err(CompileError::new(
                ErrorKind::LabelOverflow,
                format!(
                    "Program needs more than {} labels, which no longer fit in one cell",
                    MAX_LABEL
                ),
                file,
                line,
            ));
        }
        self.last += 1;
        Ok(self.last)
    }
}

pub struct CompilationState {
    pub symbols: SymbolTable,
    /// The builtin 1-cell scalar type, child of the root scope.
    pub cell_type: SymbolId,
    /// The program entry, once a module-scope `main` is registered.
    pub main: Option<SymbolId>,
    pub labels: LabelAllocator,
    /// IR sink; instructions are appended in source order and never
    /// revisited.
    pub ir: Vec<Instr>,
    pub options: CompilerOptions,
}

impl CompilationState {
    pub fn new(options: CompilerOptions) -> Self {
        let mut symbols = SymbolTable::new();
        let cell_type = symbols
            .add(
                "cell",
                "<init>",
                0,
                SymbolKind::Type {
                    builtin_size: Some(1),
                },
                false,
            )
            .expect("empty root scope");
        CompilationState {
            symbols,
            cell_type,
            main: None,
            labels: LabelAllocator::default(),
            ir: Vec::new(),
            options,
        }
    }

    pub fn emit(&mut self, file: &str, line: usize, op: Op, comment: impl Into<String>) {
        self.ir.push(Instr::new(file, line, op, comment));
    }

    /// The scope stack must be unwound back to the root once every input
    /// has been lowered. This is an internal assertion, never
    /// user-triggered.
    pub fn check_unwound(&self) -> Result<(), CompileError> {
        if self.symbols.scope_depth() != 1 {
            return Err(CompileError::new(
                ErrorKind::ScopeImbalance,
                "Scopes not properly deconstructed",
                "<internal>",
                0,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_start_at_one() {
        let mut labels = LabelAllocator::default();
        assert_eq!(labels.allocate("t", 1).unwrap(), 1);
        assert_eq!(labels.allocate("t", 1).unwrap(), 2);
    }

    #[test]
    fn label_overflow_rejected() {
        let mut labels = LabelAllocator::default();
        for _ in 0..MAX_LABEL {
            labels.allocate("t", 1).unwrap();
        }
        let err = labels.allocate("t", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LabelOverflow);
    }

    #[test]
    fn state_starts_with_cell_type() {
        let state = CompilationState::new(CompilerOptions::default());
        let cell = state.symbols.get(state.cell_type);
        assert_eq!(cell.name, "cell");
        assert_eq!(state.symbols.size_sum_of_children(state.cell_type), 1);
        state.check_unwound().unwrap();
    }
}
