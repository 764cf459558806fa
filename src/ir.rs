//! Intermediate instruction set.
//!
//! The lowerer emits a flat list of these; the emitter expands each one
//! into a fixed tape-machine pattern. All cell references are offsets
//! relative to the current function's stackframe, all sizes are in cells.
//! Labels are small positive integers; label 0 is the reserved halt
//! sentinel that stops the dispatcher.

use std::fmt;

use crate::symbols::Label;

/// A frame-relative cell reference.
pub type Cell = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Ignored by the emitter.
    Nop,
    /// Set `size` cells at `dst` to `value`.
    ILoad { dst: Cell, size: usize, value: i64 },
    /// Add `value` to the cell at `dst`.
    IAdd { dst: Cell, size: usize, value: i64 },
    /// Subtract `value` from the cell at `dst`.
    ISub { dst: Cell, size: usize, value: i64 },
    /// Move `size` cells from `src` to `dst`; `src` ends up zero.
    Move { dst: Cell, src: Cell, size: usize },
    /// Add `size` cells from `src` into `dst`, destroying `src`.
    Add { dst: Cell, src: Cell, size: usize },
    /// Subtract `size` cells at `src` from `dst`, destroying `src`.
    Sub { dst: Cell, src: Cell, size: usize },
    /// Non-destructive move through `aux`; `aux` must be zero on entry and
    /// is zero on exit.
    Copy {
        dst: Cell,
        src: Cell,
        aux: Cell,
        size: usize,
        aux_size: usize,
    },
    AddCopy {
        dst: Cell,
        src: Cell,
        aux: Cell,
        size: usize,
        aux_size: usize,
    },
    SubCopy {
        dst: Cell,
        src: Cell,
        aux: Cell,
        size: usize,
        aux_size: usize,
    },
    /// Consume `condition`, leaving `is_zero`/`not_zero` holding exactly
    /// one set flag.
    Compare {
        condition: Cell,
        is_zero: Cell,
        not_zero: Cell,
    },
    /// Load whichever label corresponds to the set flag into the jump
    /// register and transfer control to the dispatcher.
    Test {
        jump_register: Cell,
        is_true: Cell,
        is_false: Cell,
        true_label: Label,
        false_label: Label,
    },
    /// Move the head `offset` cells toward the stack top.
    PushStack { offset: isize },
    /// Move the head `offset` cells back toward the stack base.
    PopStack { offset: isize },
    /// Read `size` bytes into `src`.
    Input { src: Cell, size: usize },
    /// Write `size` bytes from `src`.
    Output { src: Cell, size: usize },
    /// Store the return label into the callee's return-address cell.
    Call {
        return_cell: Cell,
        return_label: Label,
    },
    /// Jump to the label held in the frame's return-address cell; for
    /// `main`, halt the dispatcher instead.
    Ret { return_cell: Cell, is_main: bool },
    Jump { target: Label },
    Label { label: Label },
    /// Literal tape text, emitted verbatim.
    Inline { code: String },
    /// Halt the interpreter with `code` in the current cell.
    Exit { code: u8 },
}

impl Op {
    /// Listing mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::ILoad { .. } => "ILOAD",
            Op::IAdd { .. } => "IADD",
            Op::ISub { .. } => "ISUB",
            Op::Move { .. } => "MOVE",
            Op::Add { .. } => "ADD",
            Op::Sub { .. } => "SUB",
            Op::Copy { .. } => "COPY",
            Op::AddCopy { .. } => "ADD_COPY",
            Op::SubCopy { .. } => "SUB_COPY",
            Op::Compare { .. } => "COMPARE",
            Op::Test { .. } => "TEST",
            Op::PushStack { .. } => "PUSH_STACK",
            Op::PopStack { .. } => "POP_STACK",
            Op::Input { .. } => "INPUT",
            Op::Output { .. } => "OUTPUT",
            Op::Call { .. } => "CALL",
            Op::Ret { .. } => "RETURN",
            Op::Jump { .. } => "JUMP",
            Op::Label { .. } => ".L",
            Op::Inline { .. } => "INLINE",
            Op::Exit { .. } => "EXIT",
        }
    }
}

/// One emitted instruction with its source position and a human-readable
/// comment for the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub file: String,
    pub line: usize,
    pub op: Op,
    pub comment: String,
}

impl Instr {
    pub fn new(file: impl Into<String>, line: usize, op: Op, comment: impl Into<String>) -> Self {
        Instr {
            file: file.into(),
            line,
            op,
            comment: comment.into(),
        }
    }
}

impl fmt::Display for Instr {
    /// Listing format: `<file>:<line> <MNEMONIC> <comment>`; stack
    /// operations include their offset.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.file, self.line, self.op.mnemonic())?;
        match &self.op {
            Op::PushStack { offset } | Op::PopStack { offset } => {
                write!(f, " {}", offset)?;
            }
            Op::Inline { code } => {
                write!(f, " {}", code)?;
            }
            _ => {}
        }
        if !self.comment.is_empty() {
            write!(f, " {}", self.comment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_lines() {
        let i = Instr::new("demo.bfl", 3, Op::ILoad { dst: 1, size: 1, value: 65 }, "__tmp0@1:1 65");
        assert_eq!(i.to_string(), "demo.bfl:3 ILOAD __tmp0@1:1 65");

        let i = Instr::new("demo.bfl", 4, Op::PopStack { offset: 2 }, "");
        assert_eq!(i.to_string(), "demo.bfl:4 POP_STACK 2");

        let i = Instr::new("demo.bfl", 5, Op::Label { label: 7 }, "WHILE_BODY@7");
        assert_eq!(i.to_string(), "demo.bfl:5 .L WHILE_BODY@7");
    }
}
