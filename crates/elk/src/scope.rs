//! The lexical scope tree.
//!
//! Scopes live in an index arena (no parent pointers, no cycles): each scope
//! holds a parent `ScopeId` and, for module scopes, the declared and
//! imported member tables. Variables belong to the innermost non-module
//! scope and are addressed by a slot in the frame of the function that owns
//! the scope.

use ahash::AHashMap;

use crate::{
    errors::{RunResult, RuntimeError},
    intern::{FunctionId, Interns, ScopeId, StringId, StructId},
};

/// What a scope is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    RootModule,
    Submodule,
    FunctionBody,
    Block,
    ClosureBody,
}

/// Member and import tables owned by a module scope.
#[derive(Debug, Default)]
pub struct ModuleScope {
    pub functions: AHashMap<StringId, FunctionId>,
    pub structs: AHashMap<StringId, StructId>,
    pub submodules: AHashMap<StringId, ScopeId>,
    pub imported_functions: AHashMap<StringId, FunctionId>,
    pub imported_structs: AHashMap<StringId, StructId>,
    pub imported_submodules: AHashMap<StringId, ScopeId>,
    /// Monotone guard: set before a module's members are analysed so
    /// cyclic imports terminate after visiting each module once.
    pub is_analysed: bool,
}

/// One scope in the arena.
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub module: Option<ModuleScope>,
    /// The function whose frame owns variables declared here; `None` for
    /// top-level code and for module scopes.
    pub owner: Option<FunctionId>,
    vars: AHashMap<StringId, u16>,
}

impl Scope {
    fn is_module(&self) -> bool {
        self.module.is_some()
    }
}

/// The arena owning every scope for the lifetime of the engine.
#[derive(Debug, Default)]
pub struct Scopes {
    scopes: Vec<Scope>,
}

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope and returns its id. Module kinds get member tables.
    pub fn push(&mut self, kind: ScopeKind, parent: Option<ScopeId>, owner: Option<FunctionId>) -> ScopeId {
        let module = matches!(kind, ScopeKind::RootModule | ScopeKind::Submodule).then(ModuleScope::default);
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(Scope {
            kind,
            parent,
            module,
            owner,
            vars: AHashMap::new(),
        });
        id
    }

    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    /// The member tables of a module scope.
    ///
    /// # Panics
    /// Panics if `id` is not a module scope.
    #[must_use]
    pub fn module_of(&self, id: ScopeId) -> &ModuleScope {
        self.scopes[id.index()].module.as_ref().expect("scope is not a module")
    }

    pub(crate) fn module_of_mut(&mut self, id: ScopeId) -> &mut ModuleScope {
        self.scopes[id.index()].module.as_mut().expect("scope is not a module")
    }

    /// The nearest enclosing module scope (or the scope itself).
    #[must_use]
    pub fn enclosing_module(&self, mut id: ScopeId) -> ScopeId {
        loop {
            let scope = self.get(id);
            if scope.is_module() {
                return id;
            }
            id = scope.parent.expect("non-module scope without parent");
        }
    }

    /// Registers a declared function; duplicate names in one module fail.
    pub fn register_function(
        &mut self,
        module: ScopeId,
        name: StringId,
        func: FunctionId,
        interns: &Interns,
    ) -> RunResult<()> {
        let table = self.module_of_mut(module);
        if table.functions.insert(name, func).is_some() {
            return Err(RuntimeError::runtime(format!(
                "function {} is already defined in this module",
                interns.get(name)
            )));
        }
        Ok(())
    }

    /// Registers a declared struct; duplicate names in one module fail.
    pub fn register_struct(
        &mut self,
        module: ScopeId,
        name: StringId,
        id: StructId,
        interns: &Interns,
    ) -> RunResult<()> {
        let table = self.module_of_mut(module);
        if table.structs.insert(name, id).is_some() {
            return Err(RuntimeError::runtime(format!(
                "struct {} is already defined in this module",
                interns.get(name)
            )));
        }
        Ok(())
    }

    pub fn register_submodule(&mut self, module: ScopeId, name: StringId, sub: ScopeId) {
        self.module_of_mut(module).submodules.insert(name, sub);
    }

    /// Resolves a module path, at each step trying declared submodules
    /// first, then imported submodules.
    #[must_use]
    pub fn resolve_module(&self, root: ScopeId, path: &[StringId]) -> Option<ScopeId> {
        let mut current = root;
        for &segment in path {
            let table = self.module_of(current);
            current = table
                .submodules
                .get(&segment)
                .or_else(|| table.imported_submodules.get(&segment))
                .copied()?;
        }
        Some(current)
    }

    /// Looks up a function in a module, optionally through imports.
    #[must_use]
    pub fn find_function(&self, module: ScopeId, name: StringId, include_imports: bool) -> Option<FunctionId> {
        let table = self.module_of(module);
        table
            .functions
            .get(&name)
            .or_else(|| include_imports.then(|| table.imported_functions.get(&name)).flatten())
            .copied()
    }

    /// Looks up a struct in a module, optionally through imports.
    #[must_use]
    pub fn find_struct(&self, module: ScopeId, name: StringId, include_imports: bool) -> Option<StructId> {
        let table = self.module_of(module);
        table
            .structs
            .get(&name)
            .or_else(|| include_imports.then(|| table.imported_structs.get(&name)).flatten())
            .copied()
    }

    /// Records a variable in a scope with its frame slot.
    pub fn add_var(&mut self, scope: ScopeId, name: StringId, slot: u16) {
        debug_assert!(!self.get(scope).is_module(), "variables belong to non-module scopes");
        self.get_mut(scope).vars.insert(name, slot);
    }

    /// Whether a name is visible from a scope (for assignment validation).
    #[must_use]
    pub fn var_exists(&self, from: ScopeId, name: StringId) -> bool {
        self.find_var(from, name).is_some()
    }

    /// Walks the parent chain looking for a variable, stopping at the
    /// enclosing module boundary. Returns the defining scope and slot.
    #[must_use]
    pub fn find_var(&self, from: ScopeId, name: StringId) -> Option<(ScopeId, u16)> {
        let mut current = from;
        loop {
            let scope = self.get(current);
            if scope.is_module() {
                return None;
            }
            if let Some(&slot) = scope.vars.get(&name) {
                return Some((current, slot));
            }
            current = scope.parent?;
        }
    }
}
