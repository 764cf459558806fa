//! Tape-machine interpreter.
//!
//! Executes programs over the eight primitives `+ - < > . , [ ]` plus the
//! `@` extension: halt successfully, exposing the current cell as the
//! exit value. Every other byte is a comment.
//!
//! The machine is strict about its boundaries: moving the head off either
//! end of the tape or running a bracket scan off either end of the
//! program is a runtime error naming the offending instruction offset.
//! A well-formed compiled program never triggers either; they exist to
//! catch miscompiled or hand-written programs early.

use std::io::{Read, Write};

use thiserror::Error;

/// Tape size and fill used when none is configured.
pub const DEFAULT_MEMORY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of cells on the tape.
    pub memory_size: usize,
    /// Initial value of every cell.
    pub init_value: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory_size: DEFAULT_MEMORY,
            init_value: 0,
        }
    }
}

/// Why a program stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// Ran off the end of the program.
    Finished,
    /// Hit `@`; carries the value of the current cell.
    Exited(u8),
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("pointer overflow at instruction {0}")]
    PointerOverflow(usize),
    #[error("pointer underflow at instruction {0}")]
    PointerUnderflow(usize),
    #[error("program counter overflow (unbalanced '[')")]
    ProgramCounterOverflow,
    #[error("program counter underflow (unbalanced ']')")]
    ProgramCounterUnderflow,
    #[error("output failed: {0}")]
    Output(std::io::Error),
    #[error("input failed: {0}")]
    Input(std::io::Error),
}

pub struct Machine {
    code: Vec<u8>,
    pc: usize,
    memory: Vec<u8>,
    ptr: usize,
    max_used: usize,
}

impl Machine {
    pub fn new(code: &str, config: &Config) -> Self {
        Machine {
            code: code.bytes().collect(),
            pc: 0,
            memory: vec![config.init_value; config.memory_size],
            ptr: 0,
            max_used: 0,
        }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn ptr(&self) -> usize {
        self.ptr
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Highest cell index the head has visited.
    pub fn max_used(&self) -> usize {
        self.max_used
    }

    /// The instruction about to execute, if any.
    pub fn current(&self) -> Option<u8> {
        self.code.get(self.pc).copied()
    }

    pub fn finished(&self) -> bool {
        self.pc >= self.code.len()
    }

    /// Execute one instruction. Returns a halt reason when the program
    /// ends on this step.
    pub fn step(
        &mut self,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Option<Halt>, MachineError> {
        let Some(&op) = self.code.get(self.pc) else {
            return Ok(Some(Halt::Finished));
        };
        match op {
            b'+' => self.memory[self.ptr] = self.memory[self.ptr].wrapping_add(1),
            b'-' => self.memory[self.ptr] = self.memory[self.ptr].wrapping_sub(1),
            b'>' => {
                self.ptr += 1;
                if self.ptr >= self.memory.len() {
                    return Err(MachineError::PointerOverflow(self.pc));
                }
                if self.ptr > self.max_used {
                    self.max_used = self.ptr;
                }
            }
            b'<' => {
                if self.ptr == 0 {
                    return Err(MachineError::PointerUnderflow(self.pc));
                }
                self.ptr -= 1;
            }
            b'.' => {
                output
                    .write_all(&[self.memory[self.ptr]])
                    .map_err(MachineError::Output)?;
            }
            b',' => {
                let mut byte = [0u8];
                match input.read(&mut byte) {
                    Ok(0) => {} // end of input leaves the cell unchanged
                    Ok(_) => self.memory[self.ptr] = byte[0],
                    Err(e) => return Err(MachineError::Input(e)),
                }
            }
            b'[' => {
                if self.memory[self.ptr] == 0 {
                    self.skip_forward()?;
                }
            }
            b']' => {
                if self.memory[self.ptr] != 0 {
                    self.skip_backward()?;
                }
            }
            b'@' => return Ok(Some(Halt::Exited(self.memory[self.ptr]))),
            _ => {} // comment byte
        }
        self.pc += 1;
        if self.finished() {
            return Ok(Some(Halt::Finished));
        }
        Ok(None)
    }

    /// Run until the program halts.
    pub fn run(
        &mut self,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Halt, MachineError> {
        loop {
            if let Some(halt) = self.step(input, output)? {
                return Ok(halt);
            }
        }
    }

    /// Scan forward to the matching `]`, leaving the pc on it.
    fn skip_forward(&mut self) -> Result<(), MachineError> {
        let mut depth = 0usize;
        loop {
            match self.code.get(self.pc) {
                Some(b'[') => depth += 1,
                Some(b']') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(MachineError::ProgramCounterOverflow),
            }
            self.pc += 1;
        }
    }

    /// Scan backward to the matching `[`, leaving the pc on it.
    fn skip_backward(&mut self) -> Result<(), MachineError> {
        let mut depth = 0usize;
        loop {
            match self.code[self.pc] {
                b']' => depth += 1,
                b'[' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
            if self.pc == 0 {
                return Err(MachineError::ProgramCounterUnderflow);
            }
            self.pc -= 1;
        }
    }

    /// Hex dump of the tape to `w`, sixteen cells per line, marking the
    /// head position.
    pub fn dump(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "ptr: {:#X}", self.ptr)?;
        writeln!(w, "pc: {:#X}", self.pc)?;
        writeln!(w, "usage: {:#X}", self.max_used)?;
        let width = format!("{:X}", self.memory.len()).len().max(2);
        for (row_start, row) in self.memory.chunks(16).enumerate().map(|(i, c)| (i * 16, c)) {
            if row_start > self.max_used + 16 {
                break;
            }
            write!(w, "{:0width$X} |", row_start, width = width)?;
            for (i, cell) in row.iter().enumerate() {
                let marker = if row_start + i == self.ptr { '>' } else { ' ' };
                write!(w, "{}{:02X}", marker, cell)?;
            }
            write!(w, " |")?;
            for cell in row {
                let c = *cell;
                let printable = if (0x20..=0x7E).contains(&c) {
                    c as char
                } else {
                    '.'
                };
                write!(w, "{}", printable)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}
