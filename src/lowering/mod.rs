//! Lowering from the AST to the intermediate instruction stream.
//!
//! ## Discipline
//!
//! For every subexpression the lowerer pushes a scratch stackframe, lowers
//! the child into it, and pops the frame once the child's output has been
//! consumed. Temporaries therefore never leak across statement boundaries
//! and every stack offset is statically computable. Whether a value is
//! consumed destructively (`MOVE`/`ADD`/`SUB`) or preserved
//! (`COPY`/`ADD_COPY`/`SUB_COPY` through a fresh aux cell) depends on
//! whether the producing expression yielded a temporary or a named symbol.
//!
//! ## Control flow
//!
//! `if` and `while` place their jump register at the current stackframe
//! end and chain `TEST`, `LABEL`, and `JUMP` instructions; calls build the
//! callee's activation frame at the caller's frame end (return-address
//! cell first, then return slots, then arguments) and jump through the
//! dispatcher. A function body ends in a single `RET`; `return`
//! statements only fill the pre-declared return slots.


use crate::error::{CompileError, ErrorKind};
use crate::ir::{Cell, Op};
use crate::parser::ast::{BinOp, Expr, FunctionDecl, IoDirection, Program, Statement};
use crate::registrar::{declare_variable, register_type, RETURN_SLOT};
use crate::state::CompilationState;
use crate::symbols::{Label, Resolution, SymbolId, SymbolKind};

/// Lower every function body of an already-registered program.
pub fn lower(
    state: &mut CompilationState,
    file: &str,
    program: &Program,
) -> Result<(), CompileError> {
    let mut lowerer = Lowerer { state, file };
    for item in &program.items {
        if let Statement::Function(decl) = item {
            lowerer.lower_function(decl)?;
        }
    }
    Ok(())
}

/// How a value reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveKind {
    Mov,
    Add,
    Sub,
}

/// Result of lowering one expression: the resolution holding its output,
/// plus the full return-slot list when the expression was a call.
#[derive(Debug, Clone, Default)]
struct Lowered {
    out: Resolution,
    call_returns: Option<Vec<Resolution>>,
}

impl Lowered {
    fn value(out: Resolution) -> Self {
        Lowered {
            out,
            call_returns: None,
        }
    }
}

struct Lowerer<'a> {
    state: &'a mut CompilationState,
    file: &'a str,
}

impl<'a> Lowerer<'a> {
    fn err(&self, kind: ErrorKind, message: impl Into<String>, line: usize) -> CompileError {
        CompileError::new(kind, message, self.file, line)
    }

    // === Symbol helpers ===

    fn as_variable(
        &self,
        resolution: &Resolution,
        line: usize,
    ) -> Result<SymbolId, CompileError> {
        let id = resolution
            .resolved
            .ok_or_else(|| self.err(ErrorKind::UnresolvedName, "Unresolved variable", line))?;
        if !matches!(self.state.symbols.get(id).kind, SymbolKind::Variable { .. }) {
            return Err(self.err(
                ErrorKind::WrongSymbolKind,
                format!(
                    "Expected variable, but received {} '{}'",
                    self.state.symbols.get(id).kind_name(),
                    self.state.symbols.get(id).name
                ),
                line,
            ));
        }
        Ok(id)
    }

    fn variable_shape(&self, id: SymbolId) -> (SymbolId, usize, bool) {
        match self.state.symbols.get(id).kind {
            SymbolKind::Variable {
                ty,
                length,
                is_pointer,
            } => (ty, length, is_pointer),
            _ => unreachable!("checked by as_variable"),
        }
    }

    fn type_to_string(&self, id: SymbolId) -> String {
        let (ty, length, is_pointer) = self.variable_shape(id);
        let name = if self.state.options.verbose_symbol_names {
            self.state.symbols.qualified_name(ty).join(".")
        } else {
            self.state.symbols.get(ty).name.clone()
        };
        if is_pointer {
            format!("{}*{}", name, length)
        } else {
            name
        }
    }

    /// `name[*]@address:size` for listing comments.
    fn describe(&self, resolution: &Resolution, line: usize) -> Result<String, CompileError> {
        let id = self.as_variable(resolution, line)?;
        let address = self.state.symbols.dereference(resolution, self.file, line)?;
        let size = self.state.symbols.stack_size(id);
        let symbol = self.state.symbols.get(id);
        let name = if self.state.options.verbose_symbol_names {
            self.state.symbols.qualified_name(id).join(".")
        } else {
            symbol.name.clone()
        };
        let star = if symbol.temporary { "*" } else { "" };
        Ok(format!("{}{}@{}:{}", name, star, address, size))
    }

    fn check_type(
        &self,
        lhs: &Resolution,
        rhs: &Resolution,
        line: usize,
    ) -> Result<(), CompileError> {
        let l = self.as_variable(lhs, line)?;
        let r = self.as_variable(rhs, line)?;
        let (lty, llen, lptr) = self.variable_shape(l);
        let (rty, rlen, rptr) = self.variable_shape(r);
        if lptr != rptr {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!(
                    "Type mismatch between pointer type and non-pointer type '{}' and '{}'",
                    self.state.symbols.get(l).name,
                    self.state.symbols.get(r).name
                ),
                line,
            ));
        }
        if lty != rty || llen != rlen {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!(
                    "Type mismatch between '{}' of type {} and '{}' of type {}",
                    self.state.symbols.get(l).name,
                    self.type_to_string(l),
                    self.state.symbols.get(r).name,
                    self.type_to_string(r)
                ),
                line,
            ));
        }
        Ok(())
    }

    fn is_temporary(&self, resolution: &Resolution) -> bool {
        resolution
            .resolved
            .map(|id| self.state.symbols.get(id).temporary)
            .unwrap_or(false)
    }

    fn address_of(&self, resolution: &Resolution, line: usize) -> Result<Cell, CompileError> {
        self.state.symbols.dereference(resolution, self.file, line)
    }

    fn size_of(&self, resolution: &Resolution, line: usize) -> Result<usize, CompileError> {
        Ok(self
            .state
            .symbols
            .stack_size(self.as_variable(resolution, line)?))
    }

    fn push_tmp_frame(&mut self, line: usize) -> Result<SymbolId, CompileError> {
        let frame = self.state.symbols.new_tmp_stackframe(self.file, line)?;
        self.state.symbols.push_scope(frame);
        Ok(frame)
    }

    fn pop_frame(&mut self) {
        self.state.symbols.pop_scope();
    }

    fn new_tmp_cell(&mut self, line: usize) -> Result<Resolution, CompileError> {
        self.state
            .symbols
            .new_tmp_variable(self.file, line, self.state.cell_type, None, "__tmp")
    }

    /// Fresh temporary with the element type and length of an existing
    /// variable (used for argument and return-value slots).
    fn new_tmp_like(
        &mut self,
        line: usize,
        shape_of: SymbolId,
        prefix: &str,
    ) -> Result<Resolution, CompileError> {
        let (ty, length, is_pointer) = self.variable_shape(shape_of);
        let length = if is_pointer { Some(length) } else { None };
        self.state
            .symbols
            .new_tmp_variable(self.file, line, ty, length, prefix)
    }

    // === Instruction emission ===

    fn emit(&mut self, line: usize, op: Op, comment: impl Into<String>) {
        self.state.emit(self.file, line, op, comment);
    }

    /// `PUSH_STACK`/`POP_STACK`; zero offsets are dropped.
    fn emit_stack(&mut self, line: usize, pop: bool, offset: usize, comment: &str) {
        if offset == 0 {
            return;
        }
        let op = if pop {
            Op::PopStack {
                offset: offset as isize,
            }
        } else {
            Op::PushStack {
                offset: offset as isize,
            }
        };
        self.emit(line, op, comment);
    }

    /// `LABEL`, then the `POP_STACK` that returns the head from the
    /// dispatch cell to the frame base.
    fn emit_label(&mut self, line: usize, offset: usize, label: Label, comment: &str) {
        self.emit(line, Op::Label { label }, format!("{}@{}", comment, label));
        self.emit_stack(line, true, offset, "");
    }

    /// The `PUSH_STACK` to the dispatch cell, then `JUMP`.
    fn emit_jump(&mut self, line: usize, offset: usize, target: Label, comment: &str) {
        self.emit_stack(line, false, offset, "");
        self.emit(line, Op::Jump { target }, comment.to_string());
    }

    /// Destructive data transfer (`MOVE`/`ADD`/`SUB`).
    fn emit_move(
        &mut self,
        line: usize,
        kind: MoveKind,
        lhs: &Resolution,
        rhs: &Resolution,
    ) -> Result<(), CompileError> {
        if lhs.same_symbol(rhs) {
            return Ok(());
        }
        self.check_type(lhs, rhs, line)?;
        let dst = self.address_of(lhs, line)?;
        let src = self.address_of(rhs, line)?;
        let size = self.size_of(lhs, line)?;
        let comment = format!(
            "{} {}",
            self.describe(lhs, line)?,
            self.describe(rhs, line)?
        );
        let op = match kind {
            MoveKind::Mov => Op::Move { dst, src, size },
            MoveKind::Add => Op::Add { dst, src, size },
            MoveKind::Sub => Op::Sub { dst, src, size },
        };
        self.emit(line, op, comment);
        Ok(())
    }

    /// Non-destructive data transfer through an aux cell.
    fn emit_copy(
        &mut self,
        line: usize,
        kind: MoveKind,
        lhs: &Resolution,
        rhs: &Resolution,
        aux: &Resolution,
    ) -> Result<(), CompileError> {
        if lhs.same_symbol(rhs) {
            return Ok(());
        }
        let dst = self.address_of(lhs, line)?;
        let src = self.address_of(rhs, line)?;
        let aux_cell = self.address_of(aux, line)?;
        let size = self.size_of(lhs, line)?;
        let aux_size = self.size_of(aux, line)?;
        let comment = format!(
            "{} {} {}",
            self.describe(lhs, line)?,
            self.describe(rhs, line)?,
            self.describe(aux, line)?
        );
        let op = match kind {
            MoveKind::Mov => Op::Copy {
                dst,
                src,
                aux: aux_cell,
                size,
                aux_size,
            },
            MoveKind::Add => Op::AddCopy {
                dst,
                src,
                aux: aux_cell,
                size,
                aux_size,
            },
            MoveKind::Sub => Op::SubCopy {
                dst,
                src,
                aux: aux_cell,
                size,
                aux_size,
            },
        };
        self.emit(line, op, comment);
        Ok(())
    }

    /// Single-cell copy between raw cell references (`TEST` plumbing).
    fn emit_copy_raw(&mut self, line: usize, dst: Cell, src: Cell, aux: Cell) {
        self.emit(
            line,
            Op::Copy {
                dst,
                src,
                aux,
                size: 1,
                aux_size: 1,
            },
            format!("{}, {}, {}", dst, src, aux),
        );
    }

    /// Transfer with the temporary-vs-named dichotomy: temporaries are
    /// drained in place, named sources are preserved through a scratch
    /// copy.
    fn emit_auto_move(
        &mut self,
        line: usize,
        kind: MoveKind,
        lhs: &Resolution,
        rhs: &Resolution,
    ) -> Result<(), CompileError> {
        if lhs.same_symbol(rhs) {
            return Ok(());
        }
        self.check_type(lhs, rhs, line)?;
        if self.is_temporary(rhs) {
            self.emit_move(line, kind, lhs, rhs)
        } else {
            self.push_tmp_frame(line)?;
            let lhs_id = self.as_variable(lhs, line)?;
            let (ty, _, _) = self.variable_shape(lhs_id);
            let aux = self
                .state
                .symbols
                .new_tmp_variable(self.file, line, ty, None, "__tmp")?;
            let result = self.emit_copy(line, kind, lhs, rhs, &aux);
            self.pop_frame();
            result
        }
    }

    fn emit_iload(
        &mut self,
        line: usize,
        dst: &Resolution,
        value: i64,
    ) -> Result<(), CompileError> {
        let size = self.size_of(dst, line)?;
        if size != 1 {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!("Invalid assign of integer to variable of size {}", size),
                line,
            ));
        }
        let comment = format!("{} {}", self.describe(dst, line)?, value);
        let dst = self.address_of(dst, line)?;
        self.emit(line, Op::ILoad { dst, size: 1, value }, comment);
        Ok(())
    }

    fn emit_io(
        &mut self,
        line: usize,
        direction: IoDirection,
        target: &Resolution,
    ) -> Result<(), CompileError> {
        let src = self.address_of(target, line)?;
        let size = self.size_of(target, line)?;
        let comment = self.describe(target, line)?;
        let op = match direction {
            IoDirection::Input => Op::Input { src, size },
            IoDirection::Output => Op::Output { src, size },
        };
        self.emit(line, op, comment);
        Ok(())
    }

    fn emit_compare(
        &mut self,
        line: usize,
        is_zero: Cell,
        not_zero: Cell,
        condition: Cell,
        size: usize,
    ) -> Result<(), CompileError> {
        if size != 1 {
            return Err(self.err(
                ErrorKind::ConditionNotScalar,
                "Only a variable of size 1 can be a condition",
                line,
            ));
        }
        self.emit(
            line,
            Op::Compare {
                condition,
                is_zero,
                not_zero,
            },
            format!(
                "cond@{}, isZero@{}, notZero@{}",
                condition, is_zero, not_zero
            ),
        );
        Ok(())
    }

    /// Evaluate a lowered condition into the flag cells above the jump
    /// register, then dispatch on it. Named conditions are preserved by
    /// comparing a scratch copy.
    fn emit_test(
        &mut self,
        line: usize,
        condition: &Resolution,
        jump_register: Cell,
        on_true: Label,
        on_false: Label,
    ) -> Result<(), CompileError> {
        let size = self.size_of(condition, line)?;
        if size != 1 {
            return Err(self.err(
                ErrorKind::ConditionNotScalar,
                "Condition not of size 1",
                line,
            ));
        }
        let is_true = jump_register + 1;
        let is_false = jump_register + 2;
        let condition_cell = self.address_of(condition, line)?;
        if self.is_temporary(condition) {
            self.emit_compare(line, is_false, is_true, condition_cell, 1)?;
        } else {
            let aux = jump_register + 3;
            self.emit_copy_raw(line, aux, condition_cell, is_true);
            self.emit_compare(line, is_false, is_true, aux, 1)?;
        }
        self.emit(
            line,
            Op::Test {
                jump_register,
                is_true,
                is_false,
                true_label: on_true,
                false_label: on_false,
            },
            format!(
                "truebr@{}, falsebr@{}, jmpreg@{}",
                on_true, on_false, jump_register
            ),
        );
        Ok(())
    }

    // === Expressions ===

    /// A call used as a value must return something; extra return values
    /// fall back to the first with a warning.
    fn check_call_value(&self, lowered: &Lowered, line: usize) -> Result<(), CompileError> {
        if let Some(returns) = &lowered.call_returns {
            if returns.is_empty() {
                return Err(self.err(
                    ErrorKind::NoReturnValue,
                    "Function does not return a value",
                    line,
                ));
            }
            if returns.len() > 1 {
                log::warn!(
                    "{}:{} Warning: Function returns more than one value. Using only the first return value.",
                    self.file,
                    line
                );
            }
        }
        Ok(())
    }

    fn lower_expr(
        &mut self,
        expr: &Expr,
        receiver: Option<&Resolution>,
    ) -> Result<Lowered, CompileError> {
        match expr {
            Expr::Int { value, span } => {
                let line = span.line;
                if !(0..=255).contains(value) {
                    return Err(self.err(
                        ErrorKind::ValueOutOfRange,
                        format!("Integer literal {} does not fit in a cell (0-255)", value),
                        line,
                    ));
                }
                let out = self.new_tmp_cell(line)?;
                self.emit_iload(line, &out, *value)?;
                Ok(Lowered::value(out))
            }
            Expr::Str { value, span } => {
                let line = span.line;
                let bytes = value.as_bytes().to_vec();
                let length = if bytes.is_empty() {
                    None
                } else {
                    Some(bytes.len())
                };
                let out = self.state.symbols.new_tmp_variable(
                    self.file,
                    line,
                    self.state.cell_type,
                    length,
                    "__tmp",
                )?;
                let base = self.address_of(&out, line)?;
                let described = self.describe(&out, line)?;
                for (i, byte) in bytes.iter().enumerate() {
                    self.emit(
                        line,
                        Op::ILoad {
                            dst: base + i,
                            size: 1,
                            value: *byte as i64,
                        },
                        format!("{}+{}, {}", described, i, byte),
                    );
                }
                Ok(Lowered::value(out))
            }
            Expr::Ident { name, span } => {
                let line = span.line;
                let out = match receiver {
                    Some(scope) => {
                        let mut resolution = scope.clone();
                        self.state
                            .symbols
                            .find_in(&mut resolution, name, self.file, line)?;
                        resolution
                    }
                    None => {
                        self.state
                            .symbols
                            .resolve(&[name.clone()], self.file, line)?
                    }
                };
                if !out.is_resolved() {
                    return Err(self.err(
                        ErrorKind::UnresolvedName,
                        format!("Unresolved identifier '{}'", name),
                        line,
                    ));
                }
                Ok(Lowered::value(out))
            }
            Expr::Dot { lhs, name, span } => {
                let line = span.line;
                let lhs_out = self.lower_expr(lhs, receiver)?.out;
                let mut out = lhs_out;
                self.state
                    .symbols
                    .find_in(&mut out, name, self.file, line)?;
                if !out.is_resolved() {
                    return Err(self.err(
                        ErrorKind::UnresolvedName,
                        format!("Unresolved identifier '{}'", name),
                        line,
                    ));
                }
                Ok(Lowered::value(out))
            }
            Expr::Binary { op, lhs, rhs, span } => match op {
                BinOp::Add => self.lower_arith(MoveKind::Add, lhs, rhs, span.line),
                BinOp::Sub => self.lower_arith(MoveKind::Sub, lhs, rhs, span.line),
                BinOp::Assign => self.lower_assign(lhs, rhs, span.line),
                BinOp::Mul | BinOp::Div => Err(self.err(
                    ErrorKind::UnimplementedOperator,
                    format!("Unimplemented operator '{}'", op.describe()),
                    span.line,
                )),
            },
            Expr::Call { callee, args, span } => self.lower_call(callee, args, receiver, span.line),
            Expr::Tuple { span, .. } => Err(self.err(
                ErrorKind::TupleOperand,
                "Tuple expression not allowed here",
                span.line,
            )),
        }
    }

    fn lower_arith(
        &mut self,
        kind: MoveKind,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
    ) -> Result<Lowered, CompileError> {
        if matches!(lhs, Expr::Tuple { .. }) || matches!(rhs, Expr::Tuple { .. }) {
            let op = if kind == MoveKind::Add { "+" } else { "-" };
            return Err(self.err(
                ErrorKind::TupleOperand,
                format!("Operator '{}' not allowed on tuple expression", op),
                line,
            ));
        }

        let out = self.new_tmp_cell(line)?;
        self.push_tmp_frame(line)?;
        let result = (|this: &mut Self| -> Result<(), CompileError> {
            this.push_tmp_frame(line)?;
            let lhs_out = this.lower_expr(lhs, None)?;
            this.check_call_value(&lhs_out, line)?;
            this.check_type(&out, &lhs_out.out, line)?;
            this.emit_auto_move(line, MoveKind::Mov, &out, &lhs_out.out)?;
            this.pop_frame();

            this.push_tmp_frame(line)?;
            let rhs_out = this.lower_expr(rhs, None)?;
            this.check_call_value(&rhs_out, line)?;
            this.check_type(&out, &rhs_out.out, line)?;
            this.emit_auto_move(line, kind, &out, &rhs_out.out)?;
            this.pop_frame();
            Ok(())
        })(self);
        self.pop_frame();
        result?;
        Ok(Lowered::value(out))
    }

    fn lower_assign(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
    ) -> Result<Lowered, CompileError> {
        match (lhs, rhs) {
            (Expr::Tuple { items: dsts, .. }, Expr::Tuple { items: srcs, .. }) => {
                if dsts.len() != srcs.len() {
                    return Err(self.err(
                        ErrorKind::ArityMismatch,
                        format!(
                            "Can't evaluate unsimilar tuples (length {} vs. {})",
                            dsts.len(),
                            srcs.len()
                        ),
                        line,
                    ));
                }
                for (dst, src) in dsts.iter().zip(srcs) {
                    let target = self.lower_expr(dst, None)?.out;
                    self.reject_temporary_target(&target, line)?;
                    self.push_tmp_frame(line)?;
                    let value = self.lower_expr(src, None)?;
                    let result = self.emit_auto_move(line, MoveKind::Mov, &target, &value.out);
                    self.pop_frame();
                    result?;
                }
                Ok(Lowered::default())
            }
            (Expr::Tuple { items: dsts, .. }, Expr::Call { callee, args, span }) => {
                let call = self.lower_call(callee, args, None, span.line)?;
                let returns = call.call_returns.expect("calls always carry return slots");
                if dsts.len() != returns.len() {
                    return Err(self.err(
                        ErrorKind::ArityMismatch,
                        format!(
                            "Can't return values ({} destinations vs. {} values to return)",
                            dsts.len(),
                            returns.len()
                        ),
                        line,
                    ));
                }
                for (dst, ret) in dsts.iter().zip(&returns) {
                    let target = self.lower_expr(dst, None)?.out;
                    self.reject_temporary_target(&target, line)?;
                    self.emit_move(line, MoveKind::Mov, &target, ret)?;
                }
                Ok(Lowered::default())
            }
            (Expr::Call { .. }, _) => Err(self.err(
                ErrorKind::AssignToCall,
                "Can't assign to function call",
                line,
            )),
            _ => {
                let target = self.lower_expr(lhs, None)?.out;
                self.reject_temporary_target(&target, line)?;
                let value = self.lower_expr(rhs, None)?;
                self.check_call_value(&value, line)?;
                self.emit_auto_move(line, MoveKind::Mov, &target, &value.out)?;
                Ok(Lowered::value(target))
            }
        }
    }

    fn reject_temporary_target(
        &self,
        target: &Resolution,
        line: usize,
    ) -> Result<(), CompileError> {
        self.as_variable(target, line)?;
        if self.is_temporary(target) {
            return Err(self.err(
                ErrorKind::AssignToTemporary,
                format!("Can't assign to temporary {}", self.describe(target, line)?),
                line,
            ));
        }
        Ok(())
    }

    fn lower_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        receiver: Option<&Resolution>,
        line: usize,
    ) -> Result<Lowered, CompileError> {
        let fun = self.lower_expr(callee, receiver)?.out;
        let fun_id = fun
            .resolved
            .ok_or_else(|| self.err(ErrorKind::UnresolvedName, "Unresolved function", line))?;
        let (entry, member_of, params, returns) = match &self.state.symbols.get(fun_id).kind {
            SymbolKind::Function {
                entry,
                member_of,
                params,
                returns,
            } => (*entry, *member_of, params.clone(), returns.clone()),
            _ => {
                return Err(self.err(
                    ErrorKind::WrongSymbolKind,
                    format!(
                        "Expected function but received {} '{}'",
                        self.state.symbols.get(fun_id).kind_name(),
                        self.state.symbols.get(fun_id).name
                    ),
                    line,
                ));
            }
        };
        let fun_name = self.state.symbols.get(fun_id).name.clone();

        // The callee's activation frame, laid out at the caller's current
        // frame end: return-address cell, return slots, this, arguments.
        let call_frame = self.push_tmp_frame(line)?;
        let call_result = (|this: &mut Self| -> Result<(Cell, Cell, Vec<Resolution>), CompileError> {
            let ret_slot_id = this.state.symbols.add(
                RETURN_SLOT,
                this.file,
                line,
                SymbolKind::Variable {
                    ty: this.state.cell_type,
                    length: 1,
                    is_pointer: false,
                },
                true,
            )?;
            this.state.symbols.set_hidden(ret_slot_id);
            let ret_slot = Resolution {
                resolved: Some(ret_slot_id),
                scope: Some(ret_slot_id),
                path: vec![ret_slot_id],
            };
            let return_cell = this.address_of(&ret_slot, line)?;

            let mut return_slots = Vec::with_capacity(returns.len());
            for &ret in &returns {
                return_slots.push(this.new_tmp_like(line, ret, "__tmp")?);
            }

            if member_of.is_some() {
                this.lower_receiver_argument(&fun, params[0], line)?;
            }

            let member_offset = if member_of.is_some() { 1 } else { 0 };
            if args.len() != params.len() - member_offset {
                return Err(this.err(
                    ErrorKind::ArityMismatch,
                    format!(
                        "Expected {} arguments, but got {}",
                        params.len() - member_offset,
                        args.len()
                    ),
                    line,
                ));
            }
            for (i, arg) in args.iter().enumerate() {
                let param = params[i + member_offset];
                let slot = this.new_tmp_like(line, param, "__arg")?;
                this.push_tmp_frame(line)?;
                let result = (|this: &mut Self| -> Result<(), CompileError> {
                    let value = this.lower_expr(arg, None)?;
                    this.check_call_value(&value, line)?;
                    if this.is_temporary(&value.out) {
                        this.emit_move(line, MoveKind::Mov, &slot, &value.out)
                    } else {
                        let aux = this.new_tmp_cell(line)?;
                        this.check_type(&slot, &value.out, line)?;
                        this.emit_copy(line, MoveKind::Mov, &slot, &value.out, &aux)
                    }
                })(this);
                this.pop_frame();
                result?;
            }

            let arguments_end = this.state.symbols.frame_end(call_frame);
            Ok((return_cell, arguments_end, return_slots))
        })(self);
        self.pop_frame();
        let (return_cell, arguments_end, return_slots) = call_result?;

        let return_label = self.state.labels.allocate(self.file, line)?;
        self.emit(
            line,
            Op::Call {
                return_cell,
                return_label,
            },
            fun_name.clone(),
        );
        self.emit_jump(
            line,
            arguments_end,
            entry,
            &format!("{}@{}", fun_name, entry),
        );
        // The callee returns with the head on its entry dispatch cell,
        // which sits at the end of the arguments from this side.
        self.emit_label(line, arguments_end, return_label, &format!("ret-{}", fun_name));

        let out = return_slots.first().cloned().unwrap_or_default();
        Ok(Lowered {
            out,
            call_returns: Some(return_slots),
        })
    }

    /// Member call: the receiver chain of the dotted callee becomes the
    /// implicit leading argument.
    fn lower_receiver_argument(
        &mut self,
        fun: &Resolution,
        this_param: SymbolId,
        line: usize,
    ) -> Result<(), CompileError> {
        if fun.path.len() < 2 {
            return Err(self.err(
                ErrorKind::MemberCallWithoutReceiver,
                "Member function not called by a member",
                line,
            ));
        }
        let receiver_path = fun.path[..fun.path.len() - 1].to_vec();
        let receiver = Resolution {
            resolved: receiver_path.last().copied(),
            scope: receiver_path.last().copied(),
            path: receiver_path,
        };
        self.as_variable(&receiver, line)?;
        let this_slot = self.new_tmp_like(line, this_param, "__this")?;

        if self.is_temporary(&receiver) {
            self.emit_move(line, MoveKind::Mov, &this_slot, &receiver)
        } else {
            self.check_type(&this_slot, &receiver, line)?;
            self.push_tmp_frame(line)?;
            let result = (|this: &mut Self| -> Result<(), CompileError> {
                let aux = this.new_tmp_cell(line)?;
                this.emit_copy(line, MoveKind::Mov, &this_slot, &receiver, &aux)
            })(self);
            self.pop_frame();
            result
        }
    }

    // === Statements ===

    fn lower_function(&mut self, decl: &FunctionDecl) -> Result<(), CompileError> {
        let line = decl.span.line;
        let fun = self
            .state
            .symbols
            .resolve(&decl.name, self.file, line)?;
        let fun_id = fun.resolved.ok_or_else(|| {
            self.err(
                ErrorKind::UnresolvedName,
                format!("Unresolved function '{}'", decl.name.join(".")),
                line,
            )
        })?;
        let (entry, member_of) = match &self.state.symbols.get(fun_id).kind {
            SymbolKind::Function {
                entry, member_of, ..
            } => (*entry, *member_of),
            _ => {
                return Err(self.err(
                    ErrorKind::WrongSymbolKind,
                    format!("'{}' is not a function", decl.name.join(".")),
                    line,
                ));
            }
        };

        if let Some(receiver) = member_of {
            self.state.symbols.push_scope(receiver);
        }
        self.state.symbols.push_scope(fun_id);

        let entry_extent = self.state.symbols.entry_frame_extent(fun_id);
        let body_result = (|this: &mut Self| -> Result<Cell, CompileError> {
            let qualified = this.state.symbols.qualified_name(fun_id).join(".");
            this.emit_label(line, entry_extent, entry, &qualified);

            for statement in &decl.body {
                this.lower_statement(statement)?;
            }

            let ret_slot = this
                .state
                .symbols
                .resolve(&[RETURN_SLOT.to_string()], this.file, line)?;
            this.address_of(&ret_slot, line)
        })(self);

        self.state.symbols.pop_scope();
        if member_of.is_some() {
            self.state.symbols.pop_scope();
        }
        let ret_slot_cell = body_result?;

        // The return label lives in frame cell 0, but the transfer
        // protocol needs two scratch cells above the transfer cell, which
        // would land on the return slots. Relocate the label to the entry
        // dispatch cell (past the live slots; any local there is dead by
        // now) and jump from there. The caller's return-site label pops
        // from the same offset.
        let is_main = self.state.main == Some(fun_id);
        self.emit(
            line,
            Op::Move {
                dst: entry_extent,
                src: ret_slot_cell,
                size: 1,
            },
            format!("{}@{} dispatch", RETURN_SLOT, ret_slot_cell),
        );
        self.emit(
            line,
            Op::Ret {
                return_cell: entry_extent,
                is_main,
            },
            decl.name.join("."),
        );
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Block(statements, span) => {
                self.push_tmp_frame(span.line)?;
                let result = statements
                    .iter()
                    .try_for_each(|s| self.lower_statement(s));
                self.pop_frame();
                result
            }
            Statement::Variable(defs) => {
                for def in defs {
                    declare_variable(self.state, self.file, def)?;
                }
                Ok(())
            }
            Statement::Type { name, fields, span } => {
                register_type(self.state, self.file, span.line, name, fields)?;
                Ok(())
            }
            Statement::Function(decl) => Err(self.err(
                ErrorKind::UnexpectedToken,
                "Nested function declarations are not supported",
                decl.span.line,
            )),
            Statement::If {
                condition,
                on_true,
                on_false,
                span,
            } => self.lower_if(condition, on_true, on_false.as_deref(), span.line),
            Statement::While {
                condition,
                body,
                span,
            } => self.lower_while(condition, body, span.line),
            Statement::Return { value, span } => self.lower_return(value.as_ref(), span.line),
            Statement::Io {
                direction,
                expr,
                span,
            } => self.lower_io(*direction, expr, span.line),
            Statement::Inline { code, span } => {
                self.emit(
                    span.line,
                    Op::Inline { code: code.clone() },
                    "inline",
                );
                Ok(())
            }
            Statement::Exit { code, span } => {
                let line = span.line;
                if !(0..=255).contains(code) {
                    return Err(self.err(
                        ErrorKind::ValueOutOfRange,
                        format!("Exit code {} does not fit in a cell (0-255)", code),
                        line,
                    ));
                }
                self.emit(line, Op::Exit { code: *code as u8 }, "exit");
                Ok(())
            }
            Statement::Expression(expr) => {
                let line = expr.span().line;
                self.push_tmp_frame(line)?;
                let result = self.lower_expr(expr, None);
                self.pop_frame();
                result.map(|_| ())
            }
        }
    }

    fn lower_if(
        &mut self,
        condition: &Expr,
        on_true: &Statement,
        on_false: Option<&Statement>,
        line: usize,
    ) -> Result<(), CompileError> {
        let true_label = self.state.labels.allocate(self.file, line)?;
        let false_label = if on_false.is_some() {
            Some(self.state.labels.allocate(self.file, line)?)
        } else {
            None
        };
        let end_label = self.state.labels.allocate(self.file, line)?;

        self.push_tmp_frame(line)?;
        let condition_out = self.lower_expr(condition, None);
        self.pop_frame();
        let condition_out = condition_out?;
        if !condition_out.out.is_resolved() {
            return Err(self.err(ErrorKind::ConditionNotScalar, "Invalid conditional", line));
        }

        let jump_register = self.state.symbols.frame_end(self.state.symbols.current_scope());
        self.emit_test(
            line,
            &condition_out.out,
            jump_register,
            true_label,
            false_label.unwrap_or(end_label),
        )?;

        self.emit_label(line, jump_register, true_label, "IF_TRUE");
        self.push_tmp_frame(line)?;
        let result = self.lower_statement(on_true);
        self.pop_frame();
        result?;
        self.emit_jump(line, jump_register, end_label, "FI");

        if let (Some(false_label), Some(on_false)) = (false_label, on_false) {
            self.emit_label(line, jump_register, false_label, "IF_FALSE");
            self.push_tmp_frame(line)?;
            let result = self.lower_statement(on_false);
            self.pop_frame();
            result?;
            self.emit_jump(line, jump_register, end_label, "FI");
        }

        self.emit_label(line, jump_register, end_label, "FI");
        Ok(())
    }

    fn lower_while(
        &mut self,
        condition: &Expr,
        body: &Statement,
        line: usize,
    ) -> Result<(), CompileError> {
        let condition_label = self.state.labels.allocate(self.file, line)?;
        let body_label = self.state.labels.allocate(self.file, line)?;
        let exit_label = self.state.labels.allocate(self.file, line)?;
        let jump_register = self.state.symbols.frame_end(self.state.symbols.current_scope());

        self.emit_jump(line, jump_register, condition_label, "WHILE");
        self.emit_label(line, jump_register, condition_label, "WHILE_CONDITION");

        self.push_tmp_frame(line)?;
        let condition_out = self.lower_expr(condition, None);
        self.pop_frame();
        let condition_out = condition_out?;
        if !condition_out.out.is_resolved() {
            return Err(self.err(ErrorKind::ConditionNotScalar, "Invalid conditional", line));
        }

        self.emit_test(
            line,
            &condition_out.out,
            jump_register,
            body_label,
            exit_label,
        )?;
        self.emit_label(line, jump_register, body_label, "WHILE_BODY");

        self.push_tmp_frame(line)?;
        let result = self.lower_statement(body);
        self.pop_frame();
        result?;

        self.emit_jump(line, jump_register, condition_label, "WHILE_CONDITION");
        self.emit_label(line, jump_register, exit_label, "WHILE_FALSE");
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>, line: usize) -> Result<(), CompileError> {
        let scope = self.state.symbols.current_scope();
        let fun = self
            .state
            .symbols
            .enclosing_function(scope)
            .ok_or_else(|| {
                self.err(
                    ErrorKind::ReturnOutsideFunction,
                    "Return outside of function",
                    line,
                )
            })?;
        let returns = match &self.state.symbols.get(fun).kind {
            SymbolKind::Function { returns, .. } => returns.clone(),
            _ => unreachable!("enclosing_function returns functions"),
        };

        let Some(value) = value else {
            // A bare `return;` has nothing to store; control falls through
            // to the function's RET.
            return Ok(());
        };

        if let Expr::Tuple { items, .. } = value {
            if items.len() != returns.len() {
                return Err(self.err(
                    ErrorKind::ArityMismatch,
                    format!(
                        "Too {} values to return ({} vs. {})",
                        if items.len() < returns.len() {
                            "few"
                        } else {
                            "many"
                        },
                        items.len(),
                        returns.len()
                    ),
                    line,
                ));
            }
            for (item, &slot) in items.iter().zip(&returns) {
                self.lower_return_value(item, slot, line)?;
            }
        } else {
            if returns.is_empty() {
                return Err(self.err(
                    ErrorKind::NoReturnValue,
                    "The function does not return a value",
                    line,
                ));
            }
            if returns.len() > 1 {
                return Err(self.err(
                    ErrorKind::ArityMismatch,
                    format!("Too few values to return (1 vs. {})", returns.len()),
                    line,
                ));
            }
            self.lower_return_value(value, returns[0], line)?;
        }
        Ok(())
    }

    fn lower_return_value(
        &mut self,
        expr: &Expr,
        slot: SymbolId,
        line: usize,
    ) -> Result<(), CompileError> {
        let target = Resolution {
            resolved: Some(slot),
            scope: Some(slot),
            path: vec![slot],
        };
        self.push_tmp_frame(line)?;
        let result = (|this: &mut Self| -> Result<(), CompileError> {
            let value = this.lower_expr(expr, None)?;
            this.check_call_value(&value, line)?;
            if !value.out.is_resolved() {
                return Err(this.err(
                    ErrorKind::UnresolvedName,
                    "Undefined return value",
                    line,
                ));
            }
            this.emit_auto_move(line, MoveKind::Mov, &target, &value.out)
        })(self);
        self.pop_frame();
        result
    }

    fn lower_io(
        &mut self,
        direction: IoDirection,
        expr: &Expr,
        line: usize,
    ) -> Result<(), CompileError> {
        self.push_tmp_frame(line)?;
        let result = (|this: &mut Self| -> Result<(), CompileError> {
            if let Expr::Tuple { items, .. } = expr {
                for item in items {
                    this.push_tmp_frame(line)?;
                    let result = this.lower_io_scalar(direction, item, line);
                    this.pop_frame();
                    result?;
                }
                Ok(())
            } else {
                this.lower_io_scalar(direction, expr, line)
            }
        })(self);
        self.pop_frame();
        result
    }

    fn lower_io_scalar(
        &mut self,
        direction: IoDirection,
        expr: &Expr,
        line: usize,
    ) -> Result<(), CompileError> {
        let value = self.lower_expr(expr, None)?;
        if !value.out.is_resolved() {
            return Err(self.err(ErrorKind::NoReturnValue, "No destination found", line));
        }
        if direction == IoDirection::Input && self.is_temporary(&value.out) {
            return Err(self.err(
                ErrorKind::InputToTemporary,
                "Input destination can't be a temporary",
                line,
            ));
        }
        self.emit_io(line, direction, &value.out)
    }
}
