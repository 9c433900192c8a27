//! The instruction generator: lowers analysed expression trees into pages.
//!
//! One page per callable: the top-level script, every user function, and
//! every closure body. Control flow uses forward jumps patched after the
//! target is known and an explicit backward-jump opcode for loops. Every
//! value-position expression leaves exactly one value on the stack;
//! statement positions compile without a residue.

use std::rc::Rc;

use crate::{
    analyse::AnalysedProgram,
    expressions::{
        BinaryOp, CallExpr, CallTarget, CallType, Expr, ExprLoc, Keyword, Literal, NewTarget, StringPart,
        TypeResolution, UnaryOp, VarRef,
    },
    intern::{FunctionId, Interns, StringId},
    value::{FuncRef, FuncTarget, StructLayout, Value},
};

use super::{JumpLabel, Op, PageBuilder, page::Page};

/// Built-in dispatch ids for the `CallBuiltIn` opcode.
pub mod builtin {
    pub const CD: u8 = 0;
    pub const EXEC: u8 = 1;
    pub const SCRIPT_PATH: u8 = 2;
    pub const ERROR: u8 = 3;
}

/// The compiled artefacts retained for execution: the top-level page (the
/// `Execute` return channel), one page per function in the table, and the
/// struct layouts.
#[derive(Debug)]
pub struct CompiledProgram {
    pub top: Page,
    pages: Vec<Page>,
    pub structs: Vec<Rc<StructLayout>>,
}

impl CompiledProgram {
    /// A program with only a top page; used by VM unit tests that assemble
    /// bytecode by hand.
    #[cfg(test)]
    pub(crate) fn from_top(top: Page) -> Self {
        Self {
            top,
            pages: Vec::new(),
            structs: Vec::new(),
        }
    }

    #[must_use]
    pub fn page(&self, func: FunctionId) -> &Page {
        &self.pages[func.index()]
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Lowers an analysed module tree into a compiled program.
///
/// # Panics
/// Panics on malformed input (unresolved nodes); analysis establishes every
/// invariant the generator relies on.
#[must_use]
pub fn generate(tree: &ExprLoc, analysed: &AnalysedProgram, interns: &Interns) -> CompiledProgram {
    let mut generator = Generator {
        interns,
        analysed,
        pages: (0..analysed.functions.len()).map(|_| None).collect(),
        top_name: None,
    };
    let Expr::Module { body, name, .. } = &tree.expr else {
        panic!("generator input must be a module");
    };
    generator.top_name = Some(*name);
    generator.compile_module(body);
    let top = generator.compile_top(body);
    let pages = generator
        .pages
        .into_iter()
        .enumerate()
        .map(|(index, page)| page.unwrap_or_else(|| panic!("no page generated for function {index}")))
        .collect();
    CompiledProgram {
        top,
        pages,
        structs: analysed.structs.clone(),
    }
}

struct Generator<'a> {
    interns: &'a Interns,
    analysed: &'a AnalysedProgram,
    pages: Vec<Option<Page>>,
    top_name: Option<StringId>,
}

impl<'a> Generator<'a> {
    /// Compiles every function declared in a module body, recursing into
    /// submodules. Closure pages are emitted when their literals are
    /// lowered inside the enclosing page.
    fn compile_module(&mut self, body: &[ExprLoc]) {
        for stmt in body {
            match &stmt.expr {
                Expr::Function(def) => {
                    let id = def.id.expect("function resolved during analysis");
                    let page = self.compile_page(Some(id), &def.body);
                    self.pages[id.index()] = Some(page);
                }
                Expr::Module { body, .. } => self.compile_module(body),
                _ => {}
            }
        }
    }

    /// Compiles the top-level script statements into the top page.
    fn compile_top(&mut self, body: &[ExprLoc]) -> Page {
        let name = self.top_name.expect("top module name recorded");
        let num_locals = self.analysed.top_locals;
        let mut page_gen = PageGen::new(self, None);
        let mut produced = false;
        for stmt in body {
            if matches!(stmt.expr, Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. }) {
                continue;
            }
            if stmt.is_root {
                page_gen.stmt(stmt);
            } else {
                page_gen.expr(stmt, false);
                produced = true;
            }
        }
        if !produced {
            page_gen.push_const(Value::Nil);
        }
        page_gen.b.emit(Op::Ret);
        page_gen.b.build(name, num_locals)
    }

    /// Compiles one function (or closure) body into its page.
    fn compile_page(&mut self, func: Option<FunctionId>, body: &ExprLoc) -> Page {
        let info = &self.analysed.functions[func.expect("function pages have an id").index()];
        let (name, num_locals) = (info.name, info.num_locals);
        let mut page_gen = PageGen::new(self, func);
        page_gen.expr(body, true);
        page_gen.b.emit(Op::Ret);
        page_gen.b.build(name, num_locals)
    }
}

/// Loop bookkeeping: where the header starts, which break jumps await the
/// end, and how deep the stack and iterator stacks were at entry.
struct LoopCtx {
    start: usize,
    breaks: Vec<JumpLabel>,
    entry_depth: i32,
    /// Whether this loop owns an iterator that `break` must tear down.
    has_iter: bool,
}

struct PageGen<'g, 'a> {
    r#gen: &'g mut Generator<'a>,
    b: PageBuilder,
    func: Option<FunctionId>,
    loops: Vec<LoopCtx>,
}

impl<'g, 'a> PageGen<'g, 'a> {
    fn new(r#gen: &'g mut Generator<'a>, func: Option<FunctionId>) -> Self {
        Self {
            r#gen,
            b: PageBuilder::new(),
            func,
            loops: Vec::new(),
        }
    }

    fn push_const(&mut self, value: Value) {
        let index = self.b.add_const(value);
        self.b.emit_u16(Op::Const, index);
    }

    // --- statement position: leaves nothing on the stack ---

    fn stmt(&mut self, node: &ExprLoc) {
        self.b.set_position(node.position);
        match &node.expr {
            Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. } => {}
            Expr::Let { value, slot, .. } => {
                self.expr(value, false);
                self.b.emit_u16(Op::Store, u16_slot(*slot));
            }
            Expr::Block(stmts) => self.block(stmts, node.is_root, false),
            Expr::If { condition, then, orelse } => {
                self.expr(condition, false);
                let to_else = self.b.emit_jump(Op::PopJumpIfNot);
                self.stmt(then);
                match orelse {
                    Some(orelse) => {
                        let to_end = self.b.emit_jump(Op::Jump);
                        self.b.patch_jump(to_else);
                        self.stmt(orelse);
                        self.b.patch_jump(to_end);
                    }
                    None => self.b.patch_jump(to_else),
                }
            }
            Expr::While { condition, body } => self.while_loop(condition, body),
            Expr::For { iterable, body, slots, .. } => self.for_loop(iterable, body, slots),
            Expr::Keyword(keyword) => self.keyword(keyword),
            Expr::Binary {
                op: BinaryOp::Assign,
                left,
                right,
            } => self.assign(left, right),
            _ => {
                self.expr(node, false);
                self.b.emit(Op::Pop);
            }
        }
    }

    // --- value position: leaves exactly one value on the stack ---

    fn expr(&mut self, node: &ExprLoc, tail: bool) {
        self.b.set_position(node.position);
        match &node.expr {
            Expr::Literal(literal) => self.push_const(literal_value(*literal, self.r#gen.interns)),
            Expr::Variable { resolved, .. } => match resolved.expect("variable resolved during analysis") {
                VarRef::Local(slot) => self.b.emit_u16(Op::Load, slot),
                VarRef::Captured(index) => self.b.emit_u16(Op::LoadUpper, index),
                VarRef::Shell(name) => {
                    let index = self.b.add_const(Value::string(self.r#gen.interns.get(name)));
                    self.b.emit_u16(Op::LoadShellVar, index);
                }
            },
            Expr::Let { value, slot, .. } => {
                // A let in value position yields the bound value.
                self.expr(value, false);
                self.b.emit_u16(Op::Store, u16_slot(*slot));
                self.b.emit_u16(Op::Load, u16_slot(*slot));
            }
            Expr::Block(stmts) => self.block(stmts, false, tail),
            Expr::If { condition, then, orelse } => {
                self.expr(condition, false);
                let to_else = self.b.emit_jump(Op::PopJumpIfNot);
                let depth = self.b.stack_depth();
                self.expr(then, tail);
                let to_end = self.b.emit_jump(Op::Jump);
                self.b.patch_jump(to_else);
                self.b.set_stack_depth(depth);
                match orelse {
                    Some(orelse) => self.expr(orelse, tail),
                    None => self.push_const(Value::Nil),
                }
                self.b.patch_jump(to_end);
            }
            Expr::While { condition, body } => {
                self.while_loop(condition, body);
                self.push_const(Value::Nil);
            }
            Expr::For { iterable, body, slots, .. } => {
                self.for_loop(iterable, body, slots);
                self.push_const(Value::Nil);
            }
            Expr::Keyword(keyword) => {
                // Control transfer in value position never falls through,
                // but the surrounding expression still expects a value for
                // static stack accounting.
                self.keyword(keyword);
                self.push_const(Value::Nil);
            }
            Expr::Binary {
                op: BinaryOp::Assign,
                left,
                right,
            } => {
                self.assign(left, right);
                // Assignment as an expression yields the assigned place
                // for variables and nil for element stores.
                match &left.expr {
                    Expr::Variable { resolved, .. } => match resolved.expect("variable resolved during analysis") {
                        VarRef::Local(slot) => self.b.emit_u16(Op::Load, slot),
                        VarRef::Captured(index) => self.b.emit_u16(Op::LoadUpper, index),
                        VarRef::Shell(_) => unreachable!("shell variables are rejected as assignment targets"),
                    },
                    _ => self.push_const(Value::Nil),
                }
            }
            Expr::Binary {
                op: BinaryOp::Pipe,
                left,
                right,
            } => {
                // Analysis rewrote pipes into calls except when the
                // consumer is a closure, which is invoked dynamically with
                // the producer as its single argument.
                self.expr(right, false);
                self.expr(left, false);
                self.b.emit_u8(Op::ResolveArgumentsDynamically, 1);
                self.b.adjust_stack(0);
                self.dynamic_call(node.is_root, tail);
            }
            Expr::Binary { op, left, right } => {
                self.expr(left, false);
                self.expr(right, false);
                self.b.set_position(node.position);
                self.b.emit(binary_opcode(*op));
            }
            Expr::Unary { op, operand } => {
                self.expr(operand, false);
                self.b.emit(match op {
                    UnaryOp::Negate => Op::Negate,
                    UnaryOp::Not => Op::Not,
                });
            }
            Expr::Tuple(items) => {
                self.exprs(items);
                self.b.emit_u8(Op::BuildTuple, small_len(items.len()));
                self.b.adjust_stack(1 - items.len() as i32);
            }
            Expr::List(items) => {
                self.exprs(items);
                if let Ok(count) = u8::try_from(items.len()) {
                    self.b.emit_u8(Op::BuildList, count);
                } else {
                    let count = u32::try_from(items.len()).expect("list literal exceeds u32 length");
                    self.b.emit_u32(Op::BuildListBig, count);
                }
                self.b.adjust_stack(1 - items.len() as i32);
            }
            Expr::Dictionary(pairs) => {
                for (key, value) in pairs {
                    self.expr(key, false);
                    self.expr(value, false);
                }
                self.b.emit_u8(Op::BuildDict, small_len(pairs.len()));
                self.b.adjust_stack(1 - 2 * pairs.len() as i32);
            }
            Expr::Range { from, to } => {
                match from {
                    Some(from) => self.expr(from, false),
                    None => self.push_const(Value::Int(0)),
                }
                match to {
                    Some(to) => self.expr(to, false),
                    None => self.push_const(Value::Nil),
                }
                self.b.emit(Op::BuildRange);
            }
            Expr::StringInterpolation(parts) => {
                for part in parts {
                    match part {
                        StringPart::Literal(text) => self.push_const(Value::string(self.r#gen.interns.get(*text))),
                        StringPart::Interpolation(expr) => self.expr(expr, false),
                    }
                }
                self.b.emit_u8(Op::BuildString, small_len(parts.len()));
                self.b.adjust_stack(1 - parts.len() as i32);
            }
            Expr::Indexer { object, index } => {
                self.expr(object, false);
                self.expr(index, false);
                self.b.set_position(node.position);
                self.b.emit(Op::LoadIndex);
            }
            Expr::FieldAccess { object, field } => {
                self.expr(object, false);
                let index = self.b.add_const(Value::string(self.r#gen.interns.get(*field)));
                self.b.emit_u16(Op::LoadField, index);
            }
            Expr::Type { resolved, .. } => match resolved.expect("type resolved during analysis") {
                TypeResolution::Builtin(tag) => self.push_const(Value::Type(tag)),
                TypeResolution::Struct(id) => self.b.emit_u16(Op::StructConst, u16_id(id.index())),
            },
            Expr::New { args, target, .. } => {
                self.exprs(args);
                let argc = small_len(args.len());
                match target.expect("new target resolved during analysis") {
                    NewTarget::Struct(id) => self.b.emit_u16_u8(Op::New, u16_id(id.index()), argc),
                    NewTarget::Std(index) => self.b.emit_u16_u8(Op::NewStd, u16_id(index), argc),
                }
                self.b.adjust_stack(1 - args.len() as i32);
            }
            Expr::FunctionReference { target, .. } => {
                let target = match target.expect("reference resolved during analysis") {
                    CallTarget::Std(id) => FuncTarget::Std(id),
                    CallTarget::Function(id) => FuncTarget::Function(id),
                    CallTarget::Program(name) => FuncTarget::Program(Rc::from(self.r#gen.interns.get(name))),
                };
                self.push_const(Value::FuncRef(Rc::new(FuncRef::new(target))));
            }
            Expr::Closure(closure) => self.closure(closure),
            Expr::Call(call) => self.call(call, node.position, node.is_root, tail),
            Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. } => self.push_const(Value::Nil),
        }
    }

    fn exprs(&mut self, items: &[ExprLoc]) {
        for item in items {
            self.expr(item, false);
        }
    }

    /// Blocks establish a stack watermark; when the emitted statements
    /// leave a surplus, `ExitBlock` trims back to the watermark keeping the
    /// block's result value.
    fn block(&mut self, stmts: &[ExprLoc], is_root: bool, tail: bool) {
        let watermark = self.b.stack_depth();
        let mut produced = false;
        for stmt in stmts {
            if matches!(stmt.expr, Expr::Function(_) | Expr::Struct { .. } | Expr::Module { .. }) {
                continue;
            }
            if stmt.is_root {
                self.stmt(stmt);
            } else {
                self.expr(stmt, tail);
                produced = true;
            }
        }
        if is_root {
            debug_assert!(!produced, "root block statements leave no residue");
            return;
        }
        if !produced {
            self.push_const(Value::Nil);
        }
        let surplus = self.b.stack_depth() - watermark - 1;
        if surplus > 0 {
            self.b.emit_u8(Op::ExitBlock, small_len(surplus as usize));
            self.b.adjust_stack(-surplus);
        }
    }

    fn while_loop(&mut self, condition: &ExprLoc, body: &ExprLoc) {
        let entry_depth = self.b.stack_depth();
        let start = self.b.current_offset();
        self.expr(condition, false);
        let to_end = self.b.emit_jump(Op::PopJumpIfNot);
        self.loops.push(LoopCtx {
            start,
            breaks: Vec::new(),
            entry_depth,
            has_iter: false,
        });
        self.stmt(body);
        self.b.emit_jump_backward(start);
        let ctx = self.loops.pop().expect("loop context pushed above");
        self.b.patch_jump(to_end);
        for label in ctx.breaks {
            self.b.patch_jump(label);
        }
        self.b.set_stack_depth(entry_depth);
    }

    fn for_loop(&mut self, iterable: &ExprLoc, body: &ExprLoc, slots: &[u16]) {
        self.expr(iterable, false);
        self.b.emit(Op::GetIter);
        let entry_depth = self.b.stack_depth();
        let start = self.b.current_offset();
        let to_end = self.b.emit_jump(Op::ForIter);
        if slots.len() > 1 {
            self.b.emit_u8(Op::Unpack, small_len(slots.len()));
            self.b.adjust_stack(slots.len() as i32 - 1);
            // Unpack pushes elements left to right, so stores pop in
            // reverse declaration order.
            for &slot in slots.iter().rev() {
                self.b.emit_u16(Op::Store, slot);
            }
        } else {
            self.b.emit_u16(Op::Store, slots[0]);
        }
        self.loops.push(LoopCtx {
            start,
            breaks: Vec::new(),
            entry_depth,
            has_iter: true,
        });
        self.stmt(body);
        self.b.emit_jump_backward(start);
        let ctx = self.loops.pop().expect("loop context pushed above");
        self.b.patch_jump(to_end);
        self.b.set_stack_depth(entry_depth);
        self.b.emit(Op::EndFor);
        for label in ctx.breaks {
            self.b.patch_jump(label);
        }
        self.b.set_stack_depth(entry_depth);
    }

    fn keyword(&mut self, keyword: &Keyword) {
        match keyword {
            Keyword::Return(value) => {
                match value {
                    Some(value) => self.expr(value, true),
                    None => self.push_const(Value::Nil),
                }
                self.b.emit(Op::Ret);
            }
            Keyword::Break => {
                let ctx = self.loops.last().expect("break validated inside a loop");
                let (entry_depth, has_iter) = (ctx.entry_depth, ctx.has_iter);
                let surplus = self.b.stack_depth() - entry_depth;
                if surplus > 0 {
                    self.b.emit_u8(Op::PopArgs, small_len(surplus as usize));
                    self.b.adjust_stack(-surplus);
                }
                if has_iter {
                    self.b.emit(Op::EndFor);
                }
                let label = self.b.emit_jump(Op::Jump);
                self.b.set_stack_depth(entry_depth);
                self.loops.last_mut().expect("loop context").breaks.push(label);
            }
            Keyword::Continue => {
                let ctx = self.loops.last().expect("continue validated inside a loop");
                let (start, entry_depth) = (ctx.start, ctx.entry_depth);
                let surplus = self.b.stack_depth() - entry_depth;
                if surplus > 0 {
                    self.b.emit_u8(Op::PopArgs, small_len(surplus as usize));
                    self.b.adjust_stack(-surplus);
                }
                self.b.emit_jump_backward(start);
                self.b.set_stack_depth(entry_depth);
            }
        }
    }

    fn assign(&mut self, left: &ExprLoc, right: &ExprLoc) {
        match &left.expr {
            Expr::Variable { resolved, .. } => {
                self.expr(right, false);
                match resolved.expect("variable resolved during analysis") {
                    VarRef::Local(slot) => self.b.emit_u16(Op::Store, slot),
                    VarRef::Captured(index) => self.b.emit_u16(Op::StoreUpper, index),
                    VarRef::Shell(_) => unreachable!("shell variables are rejected as assignment targets"),
                }
            }
            Expr::Indexer { object, index } => {
                self.expr(object, false);
                self.expr(index, false);
                self.expr(right, false);
                self.b.emit(Op::StoreIndex);
            }
            Expr::FieldAccess { object, field } => {
                self.expr(object, false);
                self.expr(right, false);
                let index = self.b.add_const(Value::string(self.r#gen.interns.get(*field)));
                self.b.emit_u16(Op::StoreField, index);
            }
            _ => unreachable!("assignment targets validated during analysis"),
        }
    }

    /// Emits the captured-variable snapshot loads followed by the closure
    /// construction, and compiles the closure body into its own page.
    fn closure(&mut self, closure: &crate::expressions::ClosureExpr) {
        let id = closure.def.id.expect("closure resolved during analysis");
        for captured in &closure.captured {
            match captured.source {
                VarRef::Local(slot) => self.b.emit_u16(Op::Load, slot),
                VarRef::Captured(index) => self.b.emit_u16(Op::LoadUpper, index),
                VarRef::Shell(_) => unreachable!("shell variables are never captured"),
            }
        }
        self.b
            .emit_u16_u8(Op::BuildClosure, u16_id(id.index()), small_len(closure.captured.len()));
        self.b.adjust_stack(1 - closure.captured.len() as i32);

        let page = self.r#gen.compile_page(Some(id), &closure.def.body);
        self.r#gen.pages[id.index()] = Some(page);
    }

    fn dynamic_call(&mut self, is_root: bool, tail: bool) {
        self.b.emit_u8(Op::DynamicCall, root_mode(is_root, tail));
        self.b.adjust_stack(-1);
    }

    fn call(&mut self, call: &CallExpr, position: crate::expressions::CodeRange, is_root: bool, tail: bool) {
        let call_type = call.call_type.expect("call classified during analysis");
        match call_type {
            CallType::Function(id) => {
                let analysed = self.r#gen.analysed;
                let info = &analysed.functions[id.index()];
                self.exprs(&call.args);
                let mut argc = call.args.len();
                // Fill omitted trailing defaults at the call site, and give
                // an unfilled variadic tail its empty list.
                let fixed = info.param_count - usize::from(info.variadic);
                if argc < fixed {
                    for default in &info.defaults[argc - info.required_count..] {
                        self.expr(default, false);
                        argc += 1;
                    }
                }
                if info.variadic && argc < info.param_count {
                    self.b.emit_u8(Op::BuildList, 0);
                    self.b.adjust_stack(1);
                    argc += 1;
                }
                if let Some(closure) = &call.closure {
                    self.expr(closure, false);
                    argc += 1;
                }
                let op = if is_root {
                    Op::RootCall
                } else if tail {
                    Op::MaybeRootCall
                } else {
                    Op::Call
                };
                self.b.set_position(position);
                self.b.emit_u16_u8(op, u16_id(id.index()), small_len(argc));
                self.b.adjust_stack(1 - argc as i32);
            }
            CallType::Std(id) => {
                self.exprs(&call.args);
                let mut argc = call.args.len();
                if let Some(closure) = &call.closure {
                    self.expr(closure, false);
                    argc += 1;
                }
                self.b.set_position(position);
                self.b.emit_u16_u8(Op::CallStd, u16_id(id.index()), small_len(argc));
                self.b.adjust_stack(1 - argc as i32);
            }
            CallType::Program => {
                let piped = call.piped_value.is_some();
                if let Some(piped_value) = &call.piped_value {
                    self.expr(piped_value, false);
                }
                for arg in &call.args {
                    self.program_arg(arg);
                }
                let name = self.b.add_const(Value::string(self.r#gen.interns.get(call.name)));
                let op = if is_root {
                    Op::RootCallProgram
                } else if tail {
                    Op::MaybeRootCallProgram
                } else {
                    Op::CallProgram
                };
                self.b.set_position(position);
                self.b
                    .emit_u16_u8_u8(op, name, small_len(call.args.len()), u8::from(piped));
                self.b.adjust_stack(1 - call.args.len() as i32 - i32::from(piped));
            }
            CallType::BuiltInCd => self.call_builtin(builtin::CD, &call.args),
            CallType::BuiltInExec => self.call_builtin(builtin::EXEC, &call.args),
            CallType::BuiltInScriptPath => self.call_builtin(builtin::SCRIPT_PATH, &call.args),
            CallType::BuiltInError => self.call_builtin(builtin::ERROR, &call.args),
            CallType::BuiltInCall => {
                self.expr(&call.args[0], false);
                self.exprs(&call.args[1..]);
                let packed = call.args.len() - 1;
                self.b.emit_u8(Op::ResolveArgumentsDynamically, small_len(packed));
                self.b.adjust_stack(1 - packed as i32);
                self.dynamic_call(is_root, tail);
            }
            CallType::BuiltInClosure => {
                let func = self.func.expect("closure built-in validated inside a function");
                let slot = self.r#gen.analysed.functions[func.index()].closure_slot();
                self.b.emit_u16(Op::Load, slot);
                self.exprs(&call.args);
                self.b.emit_u8(Op::ResolveArgumentsDynamically, small_len(call.args.len()));
                self.b.adjust_stack(1 - call.args.len() as i32);
                self.dynamic_call(is_root, tail);
            }
        }
    }

    fn call_builtin(&mut self, id: u8, args: &[ExprLoc]) {
        self.exprs(args);
        self.b.emit_u8_u8(Op::CallBuiltIn, id, small_len(args.len()));
        self.b.adjust_stack(1 - args.len() as i32);
    }

    /// Program arguments that are string literals containing glob
    /// metacharacters expand against the filesystem at run time.
    fn program_arg(&mut self, arg: &ExprLoc) {
        self.expr(arg, false);
        if let Expr::Literal(Literal::Str(text)) = &arg.expr {
            let text = self.r#gen.interns.get(*text);
            if text.contains(['*', '?', '[']) {
                self.b.emit(Op::Glob);
            }
        }
    }
}

fn literal_value(literal: Literal, interns: &Interns) -> Value {
    match literal {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Bool(b),
        Literal::Int(i) => Value::Int(i),
        Literal::Float(f) => Value::Float(f),
        Literal::Str(id) => Value::string(interns.get(id)),
    }
}

fn binary_opcode(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Equal => Op::Equal,
        BinaryOp::NotEqual => Op::NotEqual,
        BinaryOp::Greater => Op::Greater,
        BinaryOp::GreaterEqual => Op::GreaterEqual,
        BinaryOp::Less => Op::Less,
        BinaryOp::LessEqual => Op::LessEqual,
        BinaryOp::And => Op::And,
        BinaryOp::Or => Op::Or,
        BinaryOp::In => Op::Contains,
        BinaryOp::Assign | BinaryOp::Pipe => unreachable!("assignment and pipes are lowered separately"),
    }
}

/// Result-context operand for `DynamicCall`: 0 value, 1 root, 2 inherit.
fn root_mode(is_root: bool, tail: bool) -> u8 {
    if is_root {
        1
    } else if tail {
        2
    } else {
        0
    }
}

fn small_len(len: usize) -> u8 {
    u8::try_from(len).expect("count exceeds u8 operand range")
}

fn u16_id(index: usize) -> u16 {
    u16::try_from(index).expect("id exceeds u16 operand range")
}

fn u16_slot(slot: Option<u16>) -> u16 {
    slot.expect("slot assigned during analysis")
}
