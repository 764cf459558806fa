//! Symbol registration pass.
//!
//! Walks the AST once before lowering to declare everything module scope
//! provides: types with their field layout, functions with their entry
//! labels and stackframe heads, and module-level variables. Because the
//! whole module is registered before any body is lowered, functions may
//! call functions declared later in the file.
//!
//! ## Stackframe head
//!
//! Every function's scope receives, in order: the reserved return-address
//! slot `__ret` at cell 0, the declared return slots, then the parameters
//! (member functions get an implicit leading `this` of the receiver type).
//! Locals appear after these as the body is lowered.

use crate::error::{CompileError, ErrorKind};
use crate::parser::ast::{FunctionDecl, Program, Statement, VarDef};
use crate::state::CompilationState;
use crate::symbols::{SymbolId, SymbolKind};

/// Name of the reserved return-address slot.
pub const RETURN_SLOT: &str = "__ret";

pub fn register(
    state: &mut CompilationState,
    file: &str,
    program: &Program,
) -> Result<(), CompileError> {
    for item in &program.items {
        match item {
            Statement::Type { name, fields, span } => {
                register_type(state, file, span.line, name, fields)?;
            }
            Statement::Function(decl) => {
                register_function(state, file, decl)?;
            }
            Statement::Variable(defs) => {
                for def in defs {
                    declare_variable(state, file, def)?;
                }
            }
            _ => {
                return Err(CompileError::new(
                    ErrorKind::StatementAtModuleScope,
                    "Only declarations are allowed at module scope",
                    file,
                    0,
                ));
            }
        }
    }
    Ok(())
}

/// Declare one type with its fields in the current scope.
pub fn register_type(
    state: &mut CompilationState,
    file: &str,
    line: usize,
    name: &str,
    fields: &[VarDef],
) -> Result<SymbolId, CompileError> {
    let id = state.symbols.add(
        name,
        file,
        line,
        SymbolKind::Type { builtin_size: None },
        false,
    )?;
    state.symbols.push_scope(id);
    let result = fields
        .iter()
        .try_for_each(|field| declare_variable(state, file, field).map(|_| ()));
    state.symbols.pop_scope();
    result?;
    Ok(id)
}

/// Declare one variable in the current scope, resolving its declared type
/// (the builtin `cell` when none is given).
pub fn declare_variable(
    state: &mut CompilationState,
    file: &str,
    def: &VarDef,
) -> Result<SymbolId, CompileError> {
    let (ty, length, is_pointer) = match &def.ty {
        Some(spec) => {
            if spec.signed {
                return Err(CompileError::new(
                    ErrorKind::SignedUnsupported,
                    "Signed cells are reserved and not implemented",
                    file,
                    spec.span.line,
                ));
            }
            let resolution = state.symbols.resolve(&spec.name, file, spec.span.line)?;
            let resolved = resolution.resolved.ok_or_else(|| {
                CompileError::new(
                    ErrorKind::UnresolvedName,
                    format!("Undefined type '{}'", spec.name.join(".")),
                    file,
                    spec.span.line,
                )
            })?;
            if !matches!(state.symbols.get(resolved).kind, SymbolKind::Type { .. }) {
                return Err(CompileError::new(
                    ErrorKind::WrongSymbolKind,
                    format!(
                        "Expected type, found {} '{}'",
                        state.symbols.get(resolved).kind_name(),
                        spec.name.join(".")
                    ),
                    file,
                    spec.span.line,
                ));
            }
            (resolved, spec.length, spec.pointer)
        }
        None => (state.cell_type, 1, false),
    };

    state.symbols.add(
        def.name.clone(),
        file,
        def.span.line,
        SymbolKind::Variable {
            ty,
            length,
            is_pointer,
        },
        false,
    )
}

fn register_function(
    state: &mut CompilationState,
    file: &str,
    decl: &FunctionDecl,
) -> Result<(), CompileError> {
    let line = decl.span.line;
    let entry = state.labels.allocate(file, line)?;
    let short_name = decl.name.last().expect("qualified names are non-empty");

    let is_main = decl.name.len() == 1 && short_name == "main";
    if is_main {
        if let Some(prior) = state.main {
            return Err(CompileError::new(
                ErrorKind::MultipleMain,
                format!(
                    "Main function already defined in line {}",
                    state.symbols.get(prior).line
                ),
                file,
                line,
            ));
        }
    }

    // A receiver prefix makes this a member function of that type.
    let member_of = if decl.name.len() > 1 {
        let prefix = &decl.name[..decl.name.len() - 1];
        let resolution = state.symbols.resolve(prefix, file, line)?;
        let resolved = resolution.resolved.ok_or_else(|| {
            CompileError::new(
                ErrorKind::UnresolvedName,
                format!(
                    "Can't extend scope '{}' with function '{}'",
                    prefix.join("."),
                    short_name
                ),
                file,
                line,
            )
        })?;
        if !matches!(state.symbols.get(resolved).kind, SymbolKind::Type { .. }) {
            return Err(CompileError::new(
                ErrorKind::WrongSymbolKind,
                format!(
                    "Only types are extendable, but this extends {} '{}'",
                    state.symbols.get(resolved).kind_name(),
                    prefix.join(".")
                ),
                file,
                line,
            ));
        }
        state.symbols.push_scope(resolved);
        Some(resolved)
    } else {
        None
    };

    let result = register_function_scope(state, file, decl, entry, member_of);
    if member_of.is_some() {
        state.symbols.pop_scope();
    }
    let id = result?;

    if is_main {
        state.main = Some(id);
    }
    Ok(())
}

fn register_function_scope(
    state: &mut CompilationState,
    file: &str,
    decl: &FunctionDecl,
    entry: crate::symbols::Label,
    member_of: Option<SymbolId>,
) -> Result<SymbolId, CompileError> {
    let line = decl.span.line;
    let id = state.symbols.add(
        decl.name.last().unwrap().clone(),
        file,
        line,
        SymbolKind::Function {
            entry,
            member_of,
            params: Vec::new(),
            returns: Vec::new(),
        },
        false,
    )?;
    state.symbols.push_scope(id);
    let filled = fill_function_scope(state, file, decl, member_of);
    state.symbols.pop_scope();
    filled?;
    Ok(id)
}

fn fill_function_scope(
    state: &mut CompilationState,
    file: &str,
    decl: &FunctionDecl,
    member_of: Option<SymbolId>,
) -> Result<(), CompileError> {
    let line = decl.span.line;
    let fn_id = state.symbols.current_scope();

    // Return-address slot, always cell 0 of the frame.
    let ret_slot = state.symbols.add(
        RETURN_SLOT,
        file,
        line,
        SymbolKind::Variable {
            ty: state.cell_type,
            length: 1,
            is_pointer: false,
        },
        false,
    )?;
    state.symbols.set_hidden(ret_slot);

    let mut returns = Vec::with_capacity(decl.returns.len());
    for def in &decl.returns {
        returns.push(declare_variable(state, file, def)?);
    }

    let mut params = Vec::with_capacity(decl.params.len() + 1);
    if let Some(receiver) = member_of {
        // Implicit leading parameter carrying the receiver object.
        let this = state.symbols.add(
            "this",
            file,
            line,
            SymbolKind::Variable {
                ty: receiver,
                length: 1,
                is_pointer: false,
            },
            false,
        )?;
        params.push(this);
    }
    for def in &decl.params {
        params.push(declare_variable(state, file, def)?);
    }

    state.symbols.set_function_signature(fn_id, params, returns);
    Ok(())
}
