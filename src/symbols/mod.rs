//! Symbol model: types, variables, functions, and stackframes.
//!
//! ## Structure
//!
//! Symbols live in an index-keyed arena owned by [`SymbolTable`]; parents
//! and children are `SymbolId`s, so scope traversal never chases pointers
//! and the whole tree drops at end of compilation.
//!
//! ## Layout rules
//!
//! - A variable's stack size is its element type's size times its length;
//!   the builtin `cell` has size 1.
//! - A variable's address relative to its parent is the prefix-sum of the
//!   stack sizes of the siblings declared before it; its address relative
//!   to the enclosing function's stackframe adds the parent's address
//!   recursively, stopping at the function (or the root).
//! - A stackframe occupies no stack in its parent's sum and is addressed
//!   past the stack sizes of *all* its siblings. Sequential scratch frames
//!   in one scope therefore reuse the same cells once the earlier frame is
//!   dead.
//!
//! ## Scopes
//!
//! A scope stack records the open scopes; the top receives new symbols and
//! starts name resolution. Resolution searches the current scope's
//! children, then retreats outward parent by parent; dotted names pin the
//! first component that way and then descend strictly through named
//! children. A variable's descent scope is its element type, which is what
//! makes `p.a` reach the fields of `p`.


use crate::error::{CompileError, ErrorKind};

/// Index of a symbol in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

/// A branch target produced by the label allocator.
pub type Label = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// A named type; size is the sum of its field sizes unless a builtin
    /// size is given (the `cell` type).
    Type { builtin_size: Option<usize> },
    Variable {
        ty: SymbolId,
        length: usize,
        is_pointer: bool,
    },
    Function {
        entry: Label,
        member_of: Option<SymbolId>,
        params: Vec<SymbolId>,
        returns: Vec<SymbolId>,
    },
    /// A pure scope with a contiguous address range.
    Stackframe,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub file: String,
    pub line: usize,
    pub parent: Option<SymbolId>,
    pub children: Vec<SymbolId>,
    pub temporary: bool,
    pub hidden: bool,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SymbolKind::Type { .. } => "Type",
            SymbolKind::Variable { .. } => "Variable",
            SymbolKind::Function { .. } => "Function",
            SymbolKind::Stackframe => "Stackframe",
        }
    }
}

/// Result of a name lookup: the chain of symbols traversed from the
/// outermost component to the resolved leaf.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub resolved: Option<SymbolId>,
    /// Where a further `find` continues the descent.
    pub scope: Option<SymbolId>,
    pub path: Vec<SymbolId>,
}

impl Resolution {
    fn at(scope: SymbolId) -> Self {
        Resolution {
            resolved: None,
            scope: Some(scope),
            path: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn same_symbol(&self, other: &Resolution) -> bool {
        self.is_resolved() && self.resolved == other.resolved
    }
}

pub struct SymbolTable {
    arena: Vec<Symbol>,
    scope_stack: Vec<SymbolId>,
    tmp_var_count: usize,
    tmp_frame_count: usize,
}

impl SymbolTable {
    /// A table whose scope stack holds the root stackframe.
    pub fn new() -> Self {
        let root = Symbol {
            name: "__root__".into(),
            file: "<init>".into(),
            line: 0,
            parent: None,
            children: Vec::new(),
            temporary: false,
            hidden: false,
            kind: SymbolKind::Stackframe,
        };
        SymbolTable {
            arena: vec![root],
            scope_stack: vec![SymbolId(0)],
            tmp_var_count: 0,
            tmp_frame_count: 0,
        }
    }

    pub fn root(&self) -> SymbolId {
        SymbolId(0)
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.arena[id.0]
    }

    fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id.0]
    }

    pub fn current_scope(&self) -> SymbolId {
        *self.scope_stack.last().expect("scope stack never empty")
    }

    pub fn scope_depth(&self) -> usize {
        self.scope_stack.len()
    }

    pub fn push_scope(&mut self, id: SymbolId) {
        self.scope_stack.push(id);
    }

    pub fn pop_scope(&mut self) {
        self.scope_stack.pop();
        assert!(!self.scope_stack.is_empty(), "scope stack underflow");
    }

    /// Add a symbol to the current scope. Fails when a sibling of the same
    /// name already exists in that scope.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        file: impl Into<String>,
        line: usize,
        kind: SymbolKind,
        temporary: bool,
    ) -> Result<SymbolId, CompileError> {
        let name = name.into();
        let file = file.into();
        let scope = self.current_scope();
        if let Some(existing) = self
            .get(scope)
            .children
            .iter()
            .find(|&&c| self.get(c).name == name)
        {
            let prior = self.get(*existing);
            return Err(CompileError::new(
                ErrorKind::Redefinition,
                format!(
                    "Redefinition of '{}', already defined as {} in line {}",
                    name,
                    prior.kind_name(),
                    prior.line
                ),
                file,
                line,
            ));
        }
        let id = SymbolId(self.arena.len());
        self.arena.push(Symbol {
            name,
            file,
            line,
            parent: Some(scope),
            children: Vec::new(),
            temporary,
            hidden: false,
            kind,
        });
        self.get_mut(scope).children.push(id);
        Ok(id)
    }

    pub fn set_hidden(&mut self, id: SymbolId) {
        self.get_mut(id).hidden = true;
    }

    /// Record a function's parameter and return-slot lists once its scope
    /// has been populated.
    pub fn set_function_signature(
        &mut self,
        id: SymbolId,
        params: Vec<SymbolId>,
        returns: Vec<SymbolId>,
    ) {
        match &mut self.get_mut(id).kind {
            SymbolKind::Function {
                params: p,
                returns: r,
                ..
            } => {
                *p = params;
                *r = returns;
            }
            _ => panic!("not a function symbol"),
        }
    }

    /// Fresh anonymous variable in the current scope. A length makes it a
    /// pointer-typed array, mirroring the declaration syntax.
    pub fn new_tmp_variable(
        &mut self,
        file: &str,
        line: usize,
        ty: SymbolId,
        length: Option<usize>,
        prefix: &str,
    ) -> Result<Resolution, CompileError> {
        let name = format!("{}{}", prefix, self.tmp_var_count);
        self.tmp_var_count += 1;
        let kind = SymbolKind::Variable {
            ty,
            length: length.unwrap_or(1),
            is_pointer: length.is_some(),
        };
        let id = self.add(name, file, line, kind, true)?;
        Ok(Resolution {
            resolved: Some(id),
            scope: Some(id),
            path: vec![id],
        })
    }

    /// Fresh anonymous stackframe in the current scope.
    pub fn new_tmp_stackframe(
        &mut self,
        file: &str,
        line: usize,
    ) -> Result<SymbolId, CompileError> {
        let name = format!("__frame{}", self.tmp_frame_count);
        self.tmp_frame_count += 1;
        self.add(name, file, line, SymbolKind::Stackframe, true)
    }

    // === Layout ===

    /// Stack size summed over the symbol's children (a type's field sizes,
    /// a frame's contents).
    pub fn size_sum_of_children(&self, id: SymbolId) -> usize {
        let symbol = self.get(id);
        match &symbol.kind {
            SymbolKind::Type { builtin_size } => match builtin_size {
                Some(size) => *size,
                None => symbol
                    .children
                    .iter()
                    .map(|&c| self.stack_size(c))
                    .sum(),
            },
            SymbolKind::Variable { ty, length, .. } => {
                self.size_sum_of_children(*ty) * *length
            }
            SymbolKind::Function { .. } | SymbolKind::Stackframe => symbol
                .children
                .iter()
                .map(|&c| self.stack_size(c))
                .sum(),
        }
    }

    /// Cells the symbol occupies in its parent's stack region. Only
    /// variables occupy stack; types, functions, and frames are free.
    pub fn stack_size(&self, id: SymbolId) -> usize {
        match self.get(id).kind {
            SymbolKind::Variable { .. } => self.size_sum_of_children(id),
            _ => 0,
        }
    }

    /// Address relative to the parent symbol's region.
    pub fn address_relative_to_parent(&self, id: SymbolId) -> usize {
        let symbol = self.get(id);
        let Some(parent) = symbol.parent else {
            return 0;
        };
        match symbol.kind {
            SymbolKind::Variable { .. } => {
                let mut address = 0;
                for &sibling in &self.get(parent).children {
                    if sibling == id {
                        break;
                    }
                    address += self.stack_size(sibling);
                }
                address
            }
            // Frames sit past every sibling, so dead frames overlap.
            SymbolKind::Stackframe => self
                .get(parent)
                .children
                .iter()
                .map(|&c| self.stack_size(c))
                .sum(),
            _ => 0,
        }
    }

    /// Address relative to the enclosing function's stackframe (or the
    /// root for module-level symbols). Functions and types anchor the
    /// recursion at zero.
    pub fn address_relative_to_function(&self, id: SymbolId) -> usize {
        let symbol = self.get(id);
        match symbol.kind {
            SymbolKind::Variable { .. } | SymbolKind::Stackframe => {
                let parent_address = symbol
                    .parent
                    .map(|p| self.address_relative_to_function(p))
                    .unwrap_or(0);
                parent_address + self.address_relative_to_parent(id)
            }
            _ => 0,
        }
    }

    /// First address past the symbol's current contents, relative to the
    /// enclosing function's stackframe.
    pub fn frame_end(&self, id: SymbolId) -> usize {
        self.address_relative_to_function(id) + self.size_sum_of_children(id)
    }

    /// Frame extent of a function at entry: return-address slot, return
    /// slots, and parameters, before any locals. The entry label's
    /// `POP_STACK` and the caller's dispatch offset both use this.
    pub fn entry_frame_extent(&self, id: SymbolId) -> usize {
        match &self.get(id).kind {
            SymbolKind::Function {
                params, returns, ..
            } => {
                1 + returns
                    .iter()
                    .chain(params.iter())
                    .map(|&s| self.stack_size(s))
                    .sum::<usize>()
            }
            _ => panic!("not a function symbol"),
        }
    }

    /// Nearest enclosing function, the symbol itself included.
    pub fn enclosing_function(&self, id: SymbolId) -> Option<SymbolId> {
        let symbol = self.get(id);
        if matches!(symbol.kind, SymbolKind::Function { .. }) {
            return Some(id);
        }
        symbol.parent.and_then(|p| self.enclosing_function(p))
    }

    // === Resolution ===

    /// Scope used to descend through a symbol: variables expose their
    /// element type, everything else exposes itself.
    fn descent_scope(&self, id: SymbolId) -> SymbolId {
        match self.get(id).kind {
            SymbolKind::Variable { ty, .. } => ty,
            _ => id,
        }
    }

    /// One descent step: find `name` among the children of the current
    /// descent scope. Multiple matches are ambiguous.
    pub fn find_in(
        &self,
        resolution: &mut Resolution,
        name: &str,
        file: &str,
        line: usize,
    ) -> Result<(), CompileError> {
        resolution.resolved = None;
        let Some(scope) = resolution.scope else {
            return Ok(());
        };
        let scope = self.descent_scope(scope);
        let matches: Vec<SymbolId> = self
            .get(scope)
            .children
            .iter()
            .copied()
            .filter(|&c| self.get(c).name == name)
            .collect();
        if matches.len() > 1 {
            return Err(CompileError::new(
                ErrorKind::AmbiguousName,
                format!("Ambiguous name '{}'", name),
                file,
                line,
            ));
        }
        if let Some(&found) = matches.first() {
            resolution.resolved = Some(found);
            resolution.scope = Some(found);
            resolution.path.push(found);
        }
        Ok(())
    }

    /// Resolve a qualified name starting at the current scope and
    /// retreating outward until the first component matches.
    pub fn resolve(
        &self,
        qualified: &[String],
        file: &str,
        line: usize,
    ) -> Result<Resolution, CompileError> {
        let mut scope = Some(self.current_scope());
        while let Some(s) = scope {
            let mut resolution = Resolution::at(s);
            for name in qualified {
                self.find_in(&mut resolution, name, file, line)?;
                if !resolution.is_resolved() {
                    break;
                }
            }
            if resolution.is_resolved() {
                return Ok(resolution);
            }
            scope = self.get(s).parent;
        }
        Ok(Resolution::default())
    }

    /// Absolute offset of a resolved variable chain within the current
    /// function's stackframe.
    pub fn dereference(
        &self,
        resolution: &Resolution,
        file: &str,
        line: usize,
    ) -> Result<usize, CompileError> {
        let mut address = 0;
        for &id in &resolution.path {
            match self.get(id).kind {
                SymbolKind::Variable { .. } => {
                    address += self.address_relative_to_function(id);
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::WrongSymbolKind,
                        format!(
                            "Can't take the address of {} '{}'",
                            self.get(id).kind_name(),
                            self.get(id).name
                        ),
                        file,
                        line,
                    ));
                }
            }
        }
        Ok(address)
    }

    /// Human-readable symbol dump: one symbol per line, indented by path
    /// depth. Temporaries and hidden symbols only appear in verbose mode;
    /// `qualified` switches names to full dotted paths.
    pub fn write_dump(
        &self,
        w: &mut dyn std::io::Write,
        verbose: bool,
        qualified: bool,
    ) -> std::io::Result<()> {
        for &child in &self.get(self.root()).children {
            self.dump_symbol(w, child, 0, verbose, qualified)?;
        }
        Ok(())
    }

    fn dump_symbol(
        &self,
        w: &mut dyn std::io::Write,
        id: SymbolId,
        depth: usize,
        verbose: bool,
        qualified: bool,
    ) -> std::io::Result<()> {
        let symbol = self.get(id);
        if !verbose && (symbol.temporary || symbol.hidden) {
            return Ok(());
        }
        let name = if qualified {
            self.qualified_name(id).join(".")
        } else {
            symbol.name.clone()
        };
        let star = if symbol.temporary { "*" } else { "" };
        write!(w, "{}{}{} {}", "  ".repeat(depth), symbol.kind_name(), star, name)?;
        match &symbol.kind {
            SymbolKind::Type { .. } => {
                writeln!(w, " size={}", self.size_sum_of_children(id))?;
            }
            SymbolKind::Variable { ty, length, .. } => {
                writeln!(
                    w,
                    " address={} size={} length={} type={}",
                    self.address_relative_to_function(id),
                    self.stack_size(id),
                    length,
                    self.get(*ty).name
                )?;
            }
            SymbolKind::Function { entry, .. } => {
                writeln!(w, " entry={}", entry)?;
            }
            SymbolKind::Stackframe => {
                writeln!(w, " address={}", self.address_relative_to_function(id))?;
            }
        }
        for &child in &symbol.children {
            self.dump_symbol(w, child, depth + 1, verbose, qualified)?;
        }
        Ok(())
    }

    /// The qualified path of a symbol from the root, root excluded.
    pub fn qualified_name(&self, id: SymbolId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let symbol = self.get(c);
            if symbol.parent.is_none() {
                break;
            }
            names.push(symbol.name.clone());
            current = symbol.parent;
        }
        names.reverse();
        names
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
