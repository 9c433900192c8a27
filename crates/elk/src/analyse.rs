//! The semantic analyser.
//!
//! Transforms a parsed module tree into an analysed tree: every name
//! resolved, every call site classified and arity-checked, every closure's
//! captured-variable set populated, variadic tails rewritten into a list,
//! and pipe producers threaded into their consumers. Resolution data is
//! written into the tree in place; side state (function metadata, struct
//! layouts, scopes) lives in tables owned here and handed to the generator.
//!
//! Module traversal marks each module `is_analysed` before descending, so
//! import cycles terminate after visiting every module exactly once.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    errors::{RunResult, RuntimeError},
    expressions::{
        BinaryOp, CallExpr, CallTarget, CallType, CapturedVar, ClosureExpr, CodeRange, Expr, ExprLoc, FunctionDef,
        Keyword, NewTarget, Param, StringPart, TypeResolution, VarRef,
    },
    intern::{FunctionId, Interns, ScopeId, StringId, StructId},
    scope::{ScopeKind, Scopes},
    stdlib::StdBindings,
    value::{StructLayout, TypeTag},
};

/// Per-function metadata collected during analysis and consumed by the
/// generator and the VM.
#[derive(Debug)]
pub struct FunctionInfo {
    pub name: StringId,
    /// The module scope the function is declared in (closures inherit the
    /// module of their enclosing function).
    pub module: ScopeId,
    pub param_count: usize,
    /// Parameters without defaults, excluding the variadic tail.
    pub required_count: usize,
    pub variadic: bool,
    pub accepts_closure: bool,
    pub is_closure: bool,
    /// Frame size: parameters, the hidden closure slot when present, and
    /// every `let`/loop binding in the body.
    pub num_locals: u16,
    /// Analysed default expressions for the trailing defaulted parameters,
    /// in declaration order; emitted at call sites for omitted arguments.
    pub defaults: Vec<ExprLoc>,
    pub captured_count: u16,
}

impl FunctionInfo {
    /// The hidden local slot holding the trailing closure, when declared.
    #[must_use]
    pub fn closure_slot(&self) -> u16 {
        u16::try_from(self.param_count).expect("parameter count exceeds u16")
    }
}

/// Output of analysis: the side tables the generator and VM need alongside
/// the annotated tree.
#[derive(Debug)]
pub struct AnalysedProgram {
    pub functions: Vec<FunctionInfo>,
    pub structs: Vec<Rc<StructLayout>>,
    /// Frame size of the top-level page.
    pub top_locals: u16,
}

/// Capture bookkeeping for one closure being analysed.
struct ClosureCtx {
    /// The frame the closure literal appears in (`None` = top level).
    parent_frame: Option<FunctionId>,
    captured: Vec<CapturedVar>,
    by_name: AHashMap<StringId, u16>,
}

pub struct Analyser<'a> {
    interns: &'a Interns,
    std: &'a StdBindings,
    scopes: Scopes,
    functions: Vec<FunctionInfo>,
    structs: Vec<Rc<StructLayout>>,
    root: ScopeId,
    current_scope: ScopeId,
    current_function: Option<FunctionId>,
    closure_stack: SmallVec<[ClosureCtx; 2]>,
    loop_depth: usize,
    top_locals: u16,
    /// Position of the last visited expression, attached to raised errors
    /// by the driver.
    last_position: CodeRange,
}

impl<'a> Analyser<'a> {
    pub fn new(interns: &'a Interns, std: &'a StdBindings) -> Self {
        Self {
            interns,
            std,
            scopes: Scopes::new(),
            functions: Vec::new(),
            structs: Vec::new(),
            root: ScopeId::new(0),
            current_scope: ScopeId::new(0),
            current_function: None,
            closure_stack: SmallVec::new(),
            loop_depth: 0,
            top_locals: 0,
            last_position: CodeRange::default(),
        }
    }

    /// Position of the last visited expression, for diagnostics.
    #[must_use]
    pub fn last_position(&self) -> CodeRange {
        self.last_position
    }

    /// Analyses a root module tree in place.
    ///
    /// On failure the driver reads [`last_position`](Self::last_position)
    /// to attach the source range of the last visited expression.
    pub fn analyse(&mut self, tree: &mut ExprLoc) -> RunResult<AnalysedProgram> {
        self.last_position = tree.position;
        let Expr::Module { .. } = tree.expr else {
            return Err(RuntimeError::runtime("analysis input must be a module"));
        };

        self.root = self.scopes.push(ScopeKind::RootModule, None, None);
        self.current_scope = self.root;
        self.collect_module(self.root, tree)?;
        self.resolve_imports(self.root, tree)?;

        let Expr::Module { body, .. } = &mut tree.expr else { unreachable!() };
        self.analyse_module_scope(self.root, body)?;

        // Top-level script statements run in a block scope under the root
        // module; every result is discarded except the final statement's,
        // which is the Execute return channel.
        let top_scope = self.scopes.push(ScopeKind::Block, Some(self.root), None);
        self.current_scope = top_scope;
        let last = body.len().saturating_sub(1);
        for (index, stmt) in body.iter_mut().enumerate() {
            if is_declaration(stmt) {
                continue;
            }
            stmt.is_root = index != last;
            self.analyse_expr(stmt)?;
        }

        Ok(AnalysedProgram {
            functions: std::mem::take(&mut self.functions),
            structs: std::mem::take(&mut self.structs),
            top_locals: self.top_locals,
        })
    }

    // --- collection: register members before any body is analysed ---

    /// Registers every function, struct, and submodule declared in a module
    /// body, assigning ids and building metadata stubs. Bodies are not
    /// analysed yet, so call sites anywhere can see arities everywhere.
    fn collect_module(&mut self, scope: ScopeId, node: &mut ExprLoc) -> RunResult<()> {
        let Expr::Module { body, .. } = &mut node.expr else {
            return Err(RuntimeError::runtime("expected a module declaration"));
        };
        for stmt in body {
            self.last_position = stmt.position;
            match &mut stmt.expr {
                Expr::Function(def) => {
                    let id = self.register_function(scope, def)?;
                    def.id = Some(id);
                    def.module = Some(scope);
                }
                Expr::Struct { name, fields } => {
                    let id = StructId::new(self.structs.len());
                    let mut seen = AHashMap::new();
                    for &field in fields.iter() {
                        if seen.insert(field, ()).is_some() {
                            return Err(RuntimeError::runtime(format!(
                                "duplicate field {} in struct {}",
                                self.interns.get(field),
                                self.interns.get(*name)
                            )));
                        }
                    }
                    self.scopes.register_struct(scope, *name, id, self.interns)?;
                    self.structs.push(Rc::new(StructLayout {
                        id,
                        name: *name,
                        fields: fields.clone(),
                    }));
                }
                Expr::Module { name, .. } => {
                    let sub = self.scopes.push(ScopeKind::Submodule, Some(scope), None);
                    self.scopes.register_submodule(scope, *name, sub);
                    self.collect_module(sub, stmt)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn register_function(&mut self, module: ScopeId, def: &FunctionDef) -> RunResult<FunctionId> {
        let id = FunctionId::new(self.functions.len());
        self.scopes.register_function(module, def.name, id, self.interns)?;
        let variadic = def.params.last().is_some_and(|p| p.variadic);
        let required = def
            .params
            .iter()
            .filter(|p| p.default.is_none() && !p.variadic)
            .count();
        self.functions.push(FunctionInfo {
            name: def.name,
            module,
            param_count: def.params.len(),
            required_count: required,
            variadic,
            accepts_closure: def.accepts_closure,
            is_closure: false,
            num_locals: 0,
            defaults: Vec::new(),
            captured_count: 0,
        });
        Ok(id)
    }

    /// Fills the imported tables of every module from its import specs.
    fn resolve_imports(&mut self, scope: ScopeId, node: &mut ExprLoc) -> RunResult<()> {
        let Expr::Module { imports, body, .. } = &mut node.expr else {
            return Err(RuntimeError::runtime("expected a module declaration"));
        };
        for import in imports.iter_mut() {
            let target = self
                .scopes
                .resolve_module(self.root, &import.path)
                .ok_or_else(|| RuntimeError::module_not_found(self.joined_path(&import.path)))?;
            import.resolved = Some(target);
            let functions: Vec<_> = self.scopes.module_of(target).functions.iter().map(|(&k, &v)| (k, v)).collect();
            let structs: Vec<_> = self.scopes.module_of(target).structs.iter().map(|(&k, &v)| (k, v)).collect();
            let importer = self.scopes.module_of_mut(scope);
            importer.imported_functions.extend(functions);
            importer.imported_structs.extend(structs);
            if let Some(&last) = import.path.last() {
                importer.imported_submodules.insert(last, target);
            }
        }
        for stmt in body {
            if let Expr::Module { name, .. } = &stmt.expr {
                let sub = self
                    .scopes
                    .module_of(scope)
                    .submodules
                    .get(name)
                    .copied()
                    .expect("submodule registered during collection");
                self.resolve_imports(sub, stmt)?;
            }
        }
        Ok(())
    }

    // --- module traversal ---

    /// Analyses a module: declared functions first, then declared
    /// submodules not yet analysed. The `is_analysed` mark is set before
    /// descending so cyclic imports cannot re-enter.
    fn analyse_module_scope(&mut self, scope: ScopeId, body: &mut [ExprLoc]) -> RunResult<()> {
        self.scopes.module_of_mut(scope).is_analysed = true;
        for stmt in body.iter_mut() {
            if let Expr::Function(def) = &mut stmt.expr {
                self.analyse_function(def)?;
            }
        }
        for stmt in body.iter_mut() {
            if let Expr::Module { name, .. } = &stmt.expr {
                let sub = self
                    .scopes
                    .module_of(scope)
                    .submodules
                    .get(name)
                    .copied()
                    .expect("submodule registered during collection");
                if !self.scopes.module_of(sub).is_analysed {
                    let Expr::Module { body: sub_body, .. } = &mut stmt.expr else { unreachable!() };
                    self.analyse_module_scope(sub, sub_body)?;
                }
            }
        }
        Ok(())
    }

    /// Analyses one function body in its defining module's scope.
    fn analyse_function(&mut self, def: &mut FunctionDef) -> RunResult<()> {
        let id = def.id.expect("function registered during collection");
        let module = def.module.expect("function registered during collection");
        self.validate_params(&def.params)?;

        // Defaults see the declaring module's scope only: parameter names
        // are not visible to them.
        let saved_scope = self.current_scope;
        let saved_function = self.current_function;
        self.current_scope = module;
        self.current_function = Some(id);
        for param in &mut def.params {
            if let Some(default) = &mut param.default {
                self.analyse_expr(default)?;
            }
        }

        let body_scope = self.scopes.push(ScopeKind::FunctionBody, Some(module), Some(id));
        self.current_scope = body_scope;
        for (slot, param) in def.params.iter().enumerate() {
            let slot = u16::try_from(slot).expect("parameter count exceeds u16");
            self.scopes.add_var(body_scope, param.name, slot);
        }
        let mut num_locals = u16::try_from(def.params.len()).expect("parameter count exceeds u16");
        if def.accepts_closure {
            num_locals += 1;
        }
        self.functions[id.index()].num_locals = num_locals;

        let saved_loop = std::mem::take(&mut self.loop_depth);
        def.body.is_root = false;
        self.analyse_expr(&mut def.body)?;
        self.loop_depth = saved_loop;

        self.functions[id.index()].defaults = def
            .params
            .iter()
            .filter_map(|p| p.default.clone())
            .collect();

        self.current_scope = saved_scope;
        self.current_function = saved_function;
        Ok(())
    }

    /// Default-valued parameters must be contiguous and trailing; a
    /// variadic parameter must be last and defaultless.
    fn validate_params(&self, params: &[Param]) -> RunResult<()> {
        let mut seen_default = false;
        for (index, param) in params.iter().enumerate() {
            if param.variadic {
                if index != params.len() - 1 || param.default.is_some() {
                    return Err(RuntimeError::runtime(format!(
                        "invalid parameter ordering: variadic parameter {} must be last",
                        self.interns.get(param.name)
                    )));
                }
            } else if param.default.is_some() {
                seen_default = true;
            } else if seen_default {
                return Err(RuntimeError::runtime(format!(
                    "invalid parameter ordering: parameter {} without default follows a defaulted one",
                    self.interns.get(param.name)
                )));
            }
        }
        Ok(())
    }

    // --- expression analysis ---

    fn analyse_expr(&mut self, node: &mut ExprLoc) -> RunResult<()> {
        self.last_position = node.position;
        node.enclosing = self.current_function;
        if matches!(node.expr, Expr::Binary { op: BinaryOp::Pipe, .. }) {
            return self.analyse_pipe(node);
        }
        let is_root = node.is_root;
        match &mut node.expr {
            // Declarations are handled by the module traversal.
            Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. } => Ok(()),
            Expr::Literal(_) => Ok(()),
            Expr::Type { name, resolved } => {
                let text = self.interns.get(*name);
                if let Ok(tag) = text.parse::<TypeTag>() {
                    *resolved = Some(TypeResolution::Builtin(tag));
                    return Ok(());
                }
                let module = self.scopes.enclosing_module(self.current_scope);
                match self.scopes.find_struct(module, *name, true) {
                    Some(id) => {
                        *resolved = Some(TypeResolution::Struct(id));
                        Ok(())
                    }
                    None => Err(RuntimeError::not_found(format!("type {text}"))),
                }
            }
            Expr::Variable { name, resolved } => {
                let var_ref = self.resolve_variable(*name)?;
                *resolved = Some(var_ref);
                Ok(())
            }
            Expr::Let { name, value, slot } => {
                self.analyse_expr(value)?;
                let allocated = self.alloc_slot();
                self.scopes.add_var(self.current_scope, *name, allocated);
                *slot = Some(allocated);
                Ok(())
            }
            Expr::Block(stmts) => {
                let scope = self
                    .scopes
                    .push(ScopeKind::Block, Some(self.current_scope), self.current_function);
                let saved = std::mem::replace(&mut self.current_scope, scope);
                let last = stmts.len().saturating_sub(1);
                for (index, stmt) in stmts.iter_mut().enumerate() {
                    stmt.is_root = index != last || is_root;
                    self.analyse_expr(stmt)?;
                }
                self.current_scope = saved;
                Ok(())
            }
            Expr::If { condition, then, orelse } => {
                self.analyse_expr(condition)?;
                then.is_root = is_root;
                self.analyse_in_child_scope(then)?;
                if let Some(orelse) = orelse {
                    orelse.is_root = is_root;
                    self.analyse_in_child_scope(orelse)?;
                }
                Ok(())
            }
            Expr::While { condition, body } => {
                self.analyse_expr(condition)?;
                body.is_root = true;
                self.loop_depth += 1;
                self.analyse_in_child_scope(body)?;
                self.loop_depth -= 1;
                Ok(())
            }
            Expr::For {
                idents,
                iterable,
                body,
                slots,
            } => {
                self.analyse_expr(iterable)?;
                let scope = self
                    .scopes
                    .push(ScopeKind::Block, Some(self.current_scope), self.current_function);
                let saved = std::mem::replace(&mut self.current_scope, scope);
                slots.clear();
                for &ident in idents.iter() {
                    let slot = self.alloc_slot();
                    self.scopes.add_var(scope, ident, slot);
                    slots.push(slot);
                }
                body.is_root = true;
                self.loop_depth += 1;
                self.analyse_expr(body)?;
                self.loop_depth -= 1;
                self.current_scope = saved;
                Ok(())
            }
            Expr::Keyword(keyword) => match keyword {
                Keyword::Return(value) => {
                    if self.current_function.is_none() {
                        return Err(RuntimeError::runtime("return outside of a function"));
                    }
                    if let Some(value) = value {
                        self.analyse_expr(value)?;
                    }
                    Ok(())
                }
                Keyword::Break | Keyword::Continue => {
                    if self.loop_depth == 0 {
                        return Err(RuntimeError::runtime("break or continue outside of a loop"));
                    }
                    Ok(())
                }
            },
            Expr::Unary { operand, .. } => self.analyse_expr(operand),
            Expr::Binary { op: BinaryOp::Assign, left, right } => {
                self.analyse_expr(right)?;
                match &mut left.expr {
                    Expr::Variable { name, resolved } => {
                        let name = *name;
                        if !self.scopes.var_exists(self.current_scope, name)
                            && !self.interns.get(name).starts_with('$')
                        {
                            return Err(RuntimeError::not_found(format!(
                                "variable {}",
                                self.interns.get(name)
                            )));
                        }
                        let var_ref = self.resolve_variable(name)?;
                        if matches!(var_ref, VarRef::Shell(_)) {
                            return Err(RuntimeError::invalid_assignment("a shell variable"));
                        }
                        *resolved = Some(var_ref);
                        Ok(())
                    }
                    Expr::Indexer { object, index } => {
                        self.analyse_expr(object)?;
                        self.analyse_expr(index)
                    }
                    Expr::FieldAccess { object, .. } => self.analyse_expr(object),
                    other => Err(RuntimeError::invalid_assignment(describe(other))),
                }
            }
            Expr::Binary { left, right, .. } => {
                self.analyse_expr(left)?;
                self.analyse_expr(right)
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.analyse_expr(item)?;
                }
                Ok(())
            }
            Expr::Dictionary(pairs) => {
                for (key, value) in pairs {
                    self.analyse_expr(key)?;
                    self.analyse_expr(value)?;
                }
                Ok(())
            }
            Expr::Range { from, to } => {
                if let Some(from) = from {
                    self.analyse_expr(from)?;
                }
                if let Some(to) = to {
                    self.analyse_expr(to)?;
                }
                Ok(())
            }
            Expr::Indexer { object, index } => {
                self.analyse_expr(object)?;
                self.analyse_expr(index)
            }
            Expr::FieldAccess { object, .. } => self.analyse_expr(object),
            Expr::StringInterpolation(parts) => {
                for part in parts {
                    if let StringPart::Interpolation(expr) = part {
                        self.analyse_expr(expr)?;
                    }
                }
                Ok(())
            }
            Expr::New { path, args, target } => {
                for arg in args.iter_mut() {
                    self.analyse_expr(arg)?;
                }
                let resolved = self.resolve_new(path, args.len())?;
                *target = Some(resolved);
                Ok(())
            }
            Expr::Call(_) => {
                // Split borrow: take the call out, analyse, put it back.
                let Expr::Call(mut call) =
                    std::mem::replace(&mut node.expr, Expr::Literal(crate::expressions::Literal::Nil))
                else {
                    unreachable!()
                };
                let result = self.analyse_call(&mut call, None);
                node.expr = Expr::Call(call);
                result
            }
            Expr::FunctionReference { path, name, target } => {
                let resolved = self.resolve_reference(path, *name)?;
                *target = Some(resolved);
                Ok(())
            }
            Expr::Closure(_) => {
                let Expr::Closure(mut closure) =
                    std::mem::replace(&mut node.expr, Expr::Literal(crate::expressions::Literal::Nil))
                else {
                    unreachable!()
                };
                let result = self.analyse_closure(&mut closure);
                node.expr = Expr::Closure(closure);
                result
            }
        }
    }

    /// Pipe threading: `a | f(b)` becomes the call `f` with `a` inserted as
    /// argument 0 (or as the stdin feed when `f` is a program);
    /// `a | closure` stays a pipe node and invokes the closure with `a`.
    fn analyse_pipe(&mut self, node: &mut ExprLoc) -> RunResult<()> {
        let is_root = node.is_root;
        let Expr::Binary { left, right, .. } =
            std::mem::replace(&mut node.expr, Expr::Literal(crate::expressions::Literal::Nil))
        else {
            unreachable!()
        };
        let mut left = *left;
        let mut right = *right;
        match right.expr {
            Expr::Call(mut call) => {
                let result = self.analyse_call(&mut call, Some(left));
                node.expr = Expr::Call(call);
                node.is_root = is_root;
                result
            }
            Expr::Closure(_) => {
                self.analyse_expr(&mut left)?;
                self.analyse_expr(&mut right)?;
                node.expr = Expr::Binary {
                    op: BinaryOp::Pipe,
                    left: Box::new(left),
                    right: Box::new(right),
                };
                Ok(())
            }
            ref other => Err(RuntimeError::runtime(format!(
                "the right side of a pipe must be a call or a closure, not {}",
                describe(other)
            ))),
        }
    }

    fn analyse_in_child_scope(&mut self, node: &mut ExprLoc) -> RunResult<()> {
        let scope = self
            .scopes
            .push(ScopeKind::Block, Some(self.current_scope), self.current_function);
        let saved = std::mem::replace(&mut self.current_scope, scope);
        let result = self.analyse_expr(node);
        self.current_scope = saved;
        result
    }

    /// Allocates the next local slot in the current frame.
    fn alloc_slot(&mut self) -> u16 {
        match self.current_function {
            Some(id) => {
                let info = &mut self.functions[id.index()];
                let slot = info.num_locals;
                info.num_locals += 1;
                slot
            }
            None => {
                let slot = self.top_locals;
                self.top_locals += 1;
                slot
            }
        }
    }

    /// Resolves a variable reference, recording closure captures.
    ///
    /// `$`-prefixed names are shell/environment variables and skip the
    /// scope check entirely. A reference that crosses closure boundaries is
    /// threaded through every closure in between, so nested closures
    /// capture transitively.
    fn resolve_variable(&mut self, name: StringId) -> RunResult<VarRef> {
        let text = self.interns.get(name);
        if text.starts_with('$') {
            return Ok(VarRef::Shell(name));
        }
        let Some((scope, slot)) = self.scopes.find_var(self.current_scope, name) else {
            return Err(RuntimeError::not_found(format!("variable {text}")));
        };
        let owner = self.scopes.get(scope).owner;
        if owner == self.current_function {
            return Ok(VarRef::Local(slot));
        }
        let Some(start) = self.closure_stack.iter().position(|ctx| ctx.parent_frame == owner) else {
            return Err(RuntimeError::not_found(format!("variable {text}")));
        };
        let mut source = VarRef::Local(slot);
        let mut resolved = source;
        for ctx in &mut self.closure_stack[start..] {
            let index = if let Some(&index) = ctx.by_name.get(&name) {
                index
            } else {
                let index = u16::try_from(ctx.captured.len()).expect("capture count exceeds u16");
                ctx.captured.push(CapturedVar { name, source, index });
                ctx.by_name.insert(name, index);
                index
            };
            resolved = VarRef::Captured(index);
            source = resolved;
        }
        Ok(resolved)
    }

    fn analyse_closure(&mut self, closure: &mut ClosureExpr) -> RunResult<()> {
        self.validate_params(&closure.def.params)?;
        let id = FunctionId::new(self.functions.len());
        let module = self.scopes.enclosing_module(self.current_scope);
        self.functions.push(FunctionInfo {
            name: closure.def.name,
            module,
            param_count: closure.def.params.len(),
            required_count: closure.def.params.iter().filter(|p| p.default.is_none() && !p.variadic).count(),
            variadic: closure.def.params.last().is_some_and(|p| p.variadic),
            accepts_closure: false,
            is_closure: true,
            num_locals: u16::try_from(closure.def.params.len()).expect("parameter count exceeds u16"),
            defaults: Vec::new(),
            captured_count: 0,
        });
        closure.def.id = Some(id);
        closure.def.module = Some(module);

        self.closure_stack.push(ClosureCtx {
            parent_frame: self.current_function,
            captured: Vec::new(),
            by_name: AHashMap::new(),
        });
        let body_scope = self
            .scopes
            .push(ScopeKind::ClosureBody, Some(self.current_scope), Some(id));
        let saved_scope = std::mem::replace(&mut self.current_scope, body_scope);
        let saved_function = self.current_function.replace(id);
        let saved_loop = std::mem::take(&mut self.loop_depth);

        for (slot, param) in closure.def.params.iter().enumerate() {
            let slot = u16::try_from(slot).expect("parameter count exceeds u16");
            self.scopes.add_var(body_scope, param.name, slot);
        }
        closure.def.body.is_root = false;
        let result = self.analyse_expr(&mut closure.def.body);

        self.loop_depth = saved_loop;
        self.current_scope = saved_scope;
        self.current_function = saved_function;
        let ctx = self.closure_stack.pop().expect("closure context pushed above");
        closure.captured = ctx.captured;
        self.functions[id.index()].captured_count =
            u16::try_from(closure.captured.len()).expect("capture count exceeds u16");
        result?;
        Ok(())
    }

    // --- call classification ---

    fn analyse_call(&mut self, call: &mut CallExpr, piped: Option<ExprLoc>) -> RunResult<()> {
        let call_type = self.classify_call(call)?;
        call.call_type = Some(call_type);

        // Thread an inherited piped value: argument 0 for everything but
        // programs, which receive it on stdin instead.
        if let Some(piped) = piped {
            if call_type == CallType::Program {
                call.piped_value = Some(Box::new(piped));
            } else {
                call.args.insert(0, piped);
            }
        }

        for arg in &mut call.args {
            self.analyse_expr(arg)?;
        }
        if let Some(piped_value) = &mut call.piped_value {
            self.analyse_expr(piped_value)?;
        }

        if let Some(closure) = &mut call.closure {
            let allowed = match call_type {
                CallType::Std(id) => self.std.get(id).takes_closure,
                CallType::Function(id) => self.functions[id.index()].accepts_closure,
                _ => false,
            };
            if !allowed {
                return Err(RuntimeError::new(
                    crate::errors::ErrorKind::UnexpectedClosure,
                    format!("{} does not take a closure", self.interns.get(call.name)),
                ));
            }
            self.analyse_expr(closure)?;
        }

        self.check_call_arity(call, call_type)?;
        if let CallType::Function(id) = call_type {
            self.rewrite_variadic_tail(call, id);
        }
        Ok(())
    }

    /// Classification order: built-ins, then standard bindings for paths of
    /// length ≤ 1, then user functions (consulting imports), then programs.
    fn classify_call(&mut self, call: &CallExpr) -> RunResult<CallType> {
        if call.path.is_empty() {
            match self.interns.get(call.name) {
                "cd" => return Ok(CallType::BuiltInCd),
                "exec" => return Ok(CallType::BuiltInExec),
                "scriptPath" => return Ok(CallType::BuiltInScriptPath),
                "closure" => {
                    let accepts = self
                        .current_function
                        .is_some_and(|id| self.functions[id.index()].accepts_closure);
                    if !accepts {
                        return Err(RuntimeError::new(
                            crate::errors::ErrorKind::ExpectedClosure,
                            "the closure built-in requires an enclosing function that declares a closure",
                        ));
                    }
                    return Ok(CallType::BuiltInClosure);
                }
                "call" => return Ok(CallType::BuiltInCall),
                "error" => return Ok(CallType::BuiltInError),
                _ => {}
            }
        }
        if call.path.len() <= 1
            && let Some(id) = self.std.lookup(&self.std_key(&call.path, call.name))
        {
            return Ok(CallType::Std(id));
        }
        let module = self.scopes.enclosing_module(self.current_scope);
        if call.path.is_empty() {
            if let Some(id) = self.scopes.find_function(module, call.name, true) {
                return Ok(CallType::Function(id));
            }
            return Ok(CallType::Program);
        }
        let target = self
            .scopes
            .resolve_module(self.root, &call.path)
            .ok_or_else(|| RuntimeError::module_not_found(self.joined_path(&call.path)))?;
        match self.scopes.find_function(target, call.name, true) {
            Some(id) => Ok(CallType::Function(id)),
            None => Err(RuntimeError::not_found(format!(
                "function {}::{}",
                self.joined_path(&call.path),
                self.interns.get(call.name)
            ))),
        }
    }

    fn check_call_arity(&self, call: &CallExpr, call_type: CallType) -> RunResult<()> {
        let actual = call.args.len();
        match call_type {
            CallType::Function(id) => {
                let info = &self.functions[id.index()];
                let over = !info.variadic && actual > info.param_count;
                if actual < info.required_count || over {
                    return Err(RuntimeError::wrong_arguments(info.param_count, actual, info.variadic));
                }
                Ok(())
            }
            CallType::Std(id) => {
                let std = self.std.get(id);
                if actual < std.min_args {
                    return Err(RuntimeError::wrong_arguments(std.min_args, actual, std.is_variadic()));
                }
                if let Some(max) = std.max_args
                    && actual > max
                    && !std.is_variadic()
                {
                    return Err(RuntimeError::wrong_arguments(max, actual, false));
                }
                Ok(())
            }
            CallType::BuiltInCd if actual > 1 => Err(RuntimeError::wrong_arguments(1, actual, false)),
            CallType::BuiltInScriptPath if actual != 0 => Err(RuntimeError::wrong_arguments(0, actual, false)),
            CallType::BuiltInError if actual != 1 => Err(RuntimeError::wrong_arguments(1, actual, false)),
            CallType::BuiltInExec | CallType::BuiltInCall if actual == 0 => {
                Err(RuntimeError::wrong_arguments(1, actual, true))
            }
            _ => Ok(()),
        }
    }

    /// Collapses the trailing arguments bound to a variadic parameter into
    /// one synthesised list argument.
    fn rewrite_variadic_tail(&mut self, call: &mut CallExpr, id: FunctionId) {
        let info = &self.functions[id.index()];
        if !info.variadic {
            return;
        }
        let fixed = info.param_count - 1;
        if call.args.len() < fixed {
            return;
        }
        let tail: Vec<ExprLoc> = call.args.split_off(fixed);
        let position = tail.first().map_or(self.last_position, |e| e.position);
        let mut list = ExprLoc::new(position, Expr::List(tail));
        list.enclosing = self.current_function;
        call.args.push(list);
    }

    fn resolve_new(&self, path: &[StringId], argc: usize) -> RunResult<NewTarget> {
        if path.is_empty() {
            return Err(RuntimeError::runtime("new requires a struct name"));
        }
        let (module_path, name) = path.split_at(path.len() - 1);
        let name = name[0];
        let current_module = self.scopes.enclosing_module(self.current_scope);
        let module = if module_path.is_empty() {
            Some(current_module)
        } else {
            self.scopes.resolve_module(self.root, module_path)
        };
        if let Some(module) = module
            && let Some(id) = self.scopes.find_struct(module, name, true)
        {
            let layout = &self.structs[id.index()];
            if argc != layout.fields.len() {
                return Err(RuntimeError::wrong_arguments(layout.fields.len(), argc, false));
            }
            return Ok(NewTarget::Struct(id));
        }
        match self.std.lookup_struct(self.interns.get(path[0])) {
            Some(index) => {
                let std_struct = self.std.get_struct(index);
                if argc < std_struct.min_args || argc > std_struct.max_args {
                    let expected = if argc < std_struct.min_args {
                        std_struct.min_args
                    } else {
                        std_struct.max_args
                    };
                    return Err(RuntimeError::wrong_arguments(expected, argc, false));
                }
                Ok(NewTarget::Std(index))
            }
            None => Err(RuntimeError::module_not_found(self.joined_path(path))),
        }
    }

    /// First-class references resolve Std → user function → Program.
    fn resolve_reference(&self, path: &[StringId], name: StringId) -> RunResult<CallTarget> {
        if path.len() <= 1
            && let Some(id) = self.std.lookup(&self.std_key(path, name))
        {
            return Ok(CallTarget::Std(id));
        }
        let module = if path.is_empty() {
            Some(self.scopes.enclosing_module(self.current_scope))
        } else {
            self.scopes.resolve_module(self.root, path)
        };
        if let Some(module) = module
            && let Some(id) = self.scopes.find_function(module, name, true)
        {
            return Ok(CallTarget::Function(id));
        }
        Ok(CallTarget::Program(name))
    }

    fn std_key(&self, path: &[StringId], name: StringId) -> String {
        match path {
            [] => self.interns.get(name).to_owned(),
            [module] => format!("{}::{}", self.interns.get(*module), self.interns.get(name)),
            _ => String::new(),
        }
    }

    fn joined_path(&self, path: &[StringId]) -> String {
        path.iter()
            .map(|&segment| self.interns.get(segment))
            .collect::<Vec<_>>()
            .join("::")
    }
}

fn is_declaration(node: &ExprLoc) -> bool {
    matches!(node.expr, Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. })
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Module { .. } => "a module",
        Expr::Struct { .. } => "a struct declaration",
        Expr::Function(_) => "a function declaration",
        Expr::Let { .. } => "a let binding",
        Expr::New { .. } => "a new expression",
        Expr::If { .. } => "an if expression",
        Expr::For { .. } => "a for loop",
        Expr::While { .. } => "a while loop",
        Expr::Tuple(_) => "a tuple",
        Expr::List(_) => "a list",
        Expr::Dictionary(_) => "a dictionary",
        Expr::Block(_) => "a block",
        Expr::Keyword(_) => "a keyword",
        Expr::Binary { .. } => "a binary expression",
        Expr::Unary { .. } => "a unary expression",
        Expr::FieldAccess { .. } => "a field access",
        Expr::Range { .. } => "a range",
        Expr::Indexer { .. } => "an index expression",
        Expr::Type { .. } => "a type",
        Expr::Variable { .. } => "a variable",
        Expr::Call(_) => "a call",
        Expr::Literal(_) => "a literal",
        Expr::FunctionReference { .. } => "a function reference",
        Expr::StringInterpolation(_) => "a string interpolation",
        Expr::Closure(_) => "a closure",
    }
}
