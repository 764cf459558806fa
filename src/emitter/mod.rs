//! Expansion of IR instructions into tape-machine primitives.
//!
//! ## Head discipline
//!
//! Every balanced pattern starts and ends with the head at cell 0 of the
//! current stackframe; all cell references become fixed runs of `>`/`<`.
//! The emitter tracks a compile-time head offset and asserts that each
//! balanced pattern returns it to zero, the single most important
//! invariant in this module.
//!
//! `PUSH_STACK`/`POP_STACK` move the frame base itself, and the control
//! transfer patterns (`TEST`, `JUMP`, `RET`) leave the head on the new
//! dispatch cell by protocol; the matching `LABEL` pattern plus its
//! trailing `POP_STACK` re-establish the base.
//!
//! ## Dispatcher
//!
//! The program is wrapped in one outer loop. At every transfer the head
//! sits on the jump-target cell `T`; `T+1` carries the scan marker and
//! `T+2` a scratch/continue flag. Each `LABEL L` copies `T`, subtracts
//! `L`, and either falls into its body or skips it; each transfer loads
//! the new target, sets the continue flag (`RET` from `main` clears it),
//! and closes the label's brackets so the scan resumes. The outer loop is
//! cyclic: the scan wraps from the epilogue back to the prologue until a
//! label matches or the continue flag dies.

#[cfg(test)]
mod tests;

use crate::error::{CompileError, ErrorKind};
use crate::ir::{Cell, Instr, Op};
use crate::optimizer;
use crate::symbols::Label;

/// Closing sequence of every control transfer: exits the enclosing label
/// brackets and recomputes the scan marker from the continue flag.
const TRANSFER_CLOSE: &str = ">]<>]>[[-]<+>]<";

/// Expand the IR list into the raw (unwrapped) program body. With `debug`
/// set, each pattern is preceded by its listing line; the result is then a
/// diagnostic artifact rather than a runnable program.
pub fn emit(ir: &[Instr], debug: bool) -> Result<String, CompileError> {
    let mut emitter = Emitter {
        out: String::new(),
        head: 0,
    };
    for instr in ir {
        if debug {
            emitter.out.push_str(&instr.to_string());
            emitter.out.push('\n');
        }
        emitter.instruction(instr)?;
        emitter.out.push('\n');
    }
    Ok(emitter.out)
}

/// Wrap an emitted body into a complete program: walk past the two
/// reserved cells onto main's entry dispatch cell, load the entry label,
/// set the scan marker, and open the cyclic dispatcher loop.
pub fn wrap(body: &str, main_entry: Label, main_extent: usize, optimize: bool) -> String {
    let mut program = String::new();
    program.push_str(&">".repeat(2 + main_extent));
    program.push_str(&"+".repeat(main_entry as usize));
    program.push_str(">+[");
    if optimize {
        program.push_str(&optimizer::optimize(body));
    } else {
        program.extend(body.chars().filter(|&c| c != '\n'));
    }
    program.push(']');
    program
}

struct Emitter {
    out: String,
    /// Model of the head offset relative to the current frame base.
    head: isize,
}

impl Emitter {
    fn move_head(&mut self, offset: isize) {
        if offset >= 0 {
            for _ in 0..offset {
                self.out.push('>');
            }
        } else {
            for _ in 0..-offset {
                self.out.push('<');
            }
        }
        self.head += offset;
    }

    /// Emit `text` with the head on `cell`, returning to the frame base.
    fn at(&mut self, cell: Cell, text: &str) {
        self.move_head(cell as isize);
        self.out.push_str(text);
        self.move_head(-(cell as isize));
    }

    fn zero(&mut self, cell: Cell, size: usize) {
        for i in 0..size {
            self.at(cell + i, "[-]");
        }
    }

    fn inc(&mut self, cell: Cell) {
        self.at(cell, "+");
    }

    fn dec(&mut self, cell: Cell) {
        self.at(cell, "-");
    }

    /// Add a constant to a single cell; negative values subtract.
    fn iadd(&mut self, cell: Cell, value: i64) {
        let glyph = if value < 0 { '-' } else { '+' };
        let run: String = std::iter::repeat(glyph)
            .take(value.unsigned_abs() as usize)
            .collect();
        self.at(cell, &run);
    }

    /// Drain `src` into `dst` cell by cell: `src` ends zero, `dst`
    /// accumulates (or loses, with `subtract`) its value.
    fn drain(&mut self, dst: Cell, src: Cell, size: usize, subtract: bool) {
        for i in 0..size {
            self.at(src + i, "[");
            self.dec(src + i);
            if subtract {
                self.dec(dst + i);
            } else {
                self.inc(dst + i);
            }
            self.at(src + i, "]");
        }
    }

    /// Drain through the aux cell and restore `src` afterwards; `aux`
    /// must be zero on entry and ends zero.
    fn drain_via(&mut self, dst: Cell, src: Cell, aux: Cell, size: usize, subtract: bool) {
        self.zero(aux, 1);
        for i in 0..size {
            self.at(src + i, "[");
            self.dec(src + i);
            if subtract {
                self.dec(dst + i);
            } else {
                self.inc(dst + i);
            }
            self.inc(aux);
            self.at(src + i, "]");
            self.drain(src + i, aux, 1, false);
        }
    }

    /// One IR instruction. Every variant is spelled out so a new
    /// instruction fails to compile until it gets a pattern.
    fn instruction(&mut self, instr: &Instr) -> Result<(), CompileError> {
        match &instr.op {
            Op::Nop => {}
            Op::ILoad { dst, size, value } => {
                self.zero(*dst, *size);
                self.iadd(*dst, *value);
            }
            Op::IAdd { dst, value, .. } => {
                self.iadd(*dst, *value);
            }
            Op::ISub { dst, value, .. } => {
                self.iadd(*dst, -*value);
            }
            Op::Move { dst, src, size } => {
                self.zero(*dst, *size);
                self.drain(*dst, *src, *size, false);
            }
            Op::Add { dst, src, size } => {
                self.drain(*dst, *src, *size, false);
            }
            Op::Sub { dst, src, size } => {
                self.drain(*dst, *src, *size, true);
            }
            Op::Copy {
                dst, src, aux, size, ..
            } => {
                self.zero(*dst, *size);
                self.drain_via(*dst, *src, *aux, *size, false);
            }
            Op::AddCopy {
                dst, src, aux, size, ..
            } => {
                self.drain_via(*dst, *src, *aux, *size, false);
            }
            Op::SubCopy {
                dst, src, aux, size, ..
            } => {
                self.drain_via(*dst, *src, *aux, *size, true);
            }
            Op::Compare {
                condition,
                is_zero,
                not_zero,
            } => {
                self.zero(*is_zero, 1);
                self.inc(*is_zero);
                self.zero(*not_zero, 1);
                self.at(*condition, "[[-]");
                self.inc(*not_zero);
                self.dec(*is_zero);
                self.at(*condition, "]");
            }
            Op::PushStack { offset } => {
                // The frame base itself moves; the model offset stays 0.
                debug_assert!(*offset >= 0, "stack pushes never move below the base");
                for _ in 0..*offset {
                    self.out.push('>');
                }
            }
            Op::PopStack { offset } => {
                debug_assert!(*offset >= 0, "stack pops never move below the base");
                for _ in 0..*offset {
                    self.out.push('<');
                }
            }
            Op::Input { src, size } => {
                for i in 0..*size {
                    self.at(src + i, ",");
                }
            }
            Op::Output { src, size } => {
                for i in 0..*size {
                    self.at(src + i, ".");
                }
            }
            Op::Test {
                jump_register,
                is_true,
                is_false,
                true_label,
                false_label,
            } => {
                self.zero(*jump_register, 1);

                self.at(*is_true, "[[-]");
                self.zero(*jump_register, 1);
                self.iadd(*jump_register, *true_label as i64);
                self.at(*is_true, "]");

                self.at(*is_false, "[[-]");
                self.zero(*jump_register, 1);
                self.iadd(*jump_register, *false_label as i64);
                self.at(*is_false, "]");

                // Transfer: the jump register becomes the new target cell.
                self.transfer_from(*jump_register, ">[-]>[-]+<<");
            }
            Op::Call {
                return_cell,
                return_label,
            } => {
                self.zero(*return_cell, 1);
                self.iadd(*return_cell, *return_label as i64);
            }
            Op::Ret {
                return_cell,
                is_main,
            } => {
                // The return-address cell already holds the label and
                // becomes the new target; main clears the continue flag
                // instead, halting the dispatcher.
                let flag = if *is_main { ">[-]>[-]<<" } else { ">[-]>[-]+<<" };
                self.transfer_from(*return_cell, flag);
            }
            Op::Jump { target } => {
                // Head already on the dispatch cell via PUSH_STACK.
                self.out.push_str(">[-]>[-]+<<[-]");
                self.out.push_str(&"+".repeat(*target as usize));
                self.out.push_str(TRANSFER_CLOSE);
            }
            Op::Label { label } => {
                self.check_balance(instr)?;
                self.out.push_str("[[-]>[-]<<[->+>+<<]>[-<+>]+<>>");
                self.out.push_str(&"-".repeat(*label as usize));
                self.out.push_str("[[-]<->]<<>>+<<>[<");
            }
            Op::Inline { code } => {
                self.out.push_str(code);
            }
            Op::Exit { code } => {
                self.out.push_str("[-]");
                self.out.push_str(&"+".repeat(*code as usize));
                self.out.push('@');
            }
        }
        if matches!(
            instr.op,
            Op::Nop
                | Op::ILoad { .. }
                | Op::IAdd { .. }
                | Op::ISub { .. }
                | Op::Move { .. }
                | Op::Add { .. }
                | Op::Sub { .. }
                | Op::Copy { .. }
                | Op::AddCopy { .. }
                | Op::SubCopy { .. }
                | Op::Compare { .. }
                | Op::Input { .. }
                | Op::Output { .. }
                | Op::Call { .. }
        ) {
            self.check_balance(instr)?;
        }
        Ok(())
    }

    /// Move onto the transfer cell, emit the marker/continue prelude, and
    /// close the enclosing label. The head model resets: control resumes
    /// at whatever label matches next.
    fn transfer_from(&mut self, cell: Cell, prelude: &str) {
        self.out.push('\n');
        self.move_head(cell as isize);
        self.out.push_str(prelude);
        self.out.push_str(TRANSFER_CLOSE);
        self.head = 0;
    }

    /// Balanced patterns must return the head to the frame base.
    fn check_balance(&self, instr: &Instr) -> Result<(), CompileError> {
        if self.head != 0 {
            return Err(CompileError::new(
                ErrorKind::HeadModel,
                format!(
                    "Emitter head model out of balance ({}) before {}",
                    self.head,
                    instr.op.mnemonic()
                ),
                instr.file.clone(),
                instr.line,
            ));
        }
        Ok(())
    }
}
