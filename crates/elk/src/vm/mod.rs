//! The virtual machine: executes pages on an operand stack with a
//! call-frame stack.
//!
//! Each frame owns its instruction pointer and a locals window at the
//! bottom of its operand-stack region; arguments become locals in place and
//! the remaining slots are nil-filled. Everything a frame owns (locals,
//! operands, open iterators) is reclaimed by truncation when the frame is
//! retired, so variable lifetimes follow frame lifetimes with no registry.
//!
//! Opcode invariants (operand decoding, stack discipline, constant indices)
//! are assertions; user-visible failures are typed runtime errors that
//! unwind to [`Vm::execute`], where the instruction's recorded source
//! position is attached.

mod binary;

use std::{cell::RefCell, rc::Rc};

use smallvec::SmallVec;

use crate::{
    analyse::AnalysedProgram,
    bytecode::{CompiledProgram, Op, Page, builtin},
    config::ExecConfig,
    errors::{Diagnostic, RunResult, RuntimeError},
    expressions::CodeRange,
    intern::{FunctionId, Interns, StdFunctionId},
    process::{ProcessContext, ShellState, StdinFeed},
    stdlib::{CallEnv, StdBindings},
    tracer::VmTracer,
    value::{ClosureValue, DictKey, DictMap, FuncRef, FuncTarget, SetStorage, StructInstance, Value, ValueIter},
};

pub use binary::{BinOp, apply as apply_binary, contains, negate};

/// Fetches a u8 operand, advancing the cached instruction pointer.
macro_rules! fetch_u8 {
    ($page:expr, $ip:expr) => {{
        let byte = $page.code()[$ip];
        $ip += 1;
        byte
    }};
}

/// Fetches a little-endian u16 operand.
macro_rules! fetch_u16 {
    ($page:expr, $ip:expr) => {{
        let lo = $page.code()[$ip];
        let hi = $page.code()[$ip + 1];
        $ip += 2;
        u16::from_le_bytes([lo, hi])
    }};
}

/// Fetches a little-endian i16 jump offset.
macro_rules! fetch_i16 {
    ($page:expr, $ip:expr) => {{
        let lo = $page.code()[$ip];
        let hi = $page.code()[$ip + 1];
        $ip += 2;
        i16::from_le_bytes([lo, hi])
    }};
}

/// Fetches a little-endian u32 operand.
macro_rules! fetch_u32 {
    ($page:expr, $ip:expr) => {{
        let bytes = [
            $page.code()[$ip],
            $page.code()[$ip + 1],
            $page.code()[$ip + 2],
            $page.code()[$ip + 3],
        ];
        $ip += 4;
        u32::from_le_bytes(bytes)
    }};
}

/// Applies a relative jump offset to the cached instruction pointer.
macro_rules! jump_relative {
    ($ip:expr, $offset:expr) => {{
        let target = i64::try_from($ip).expect("instruction pointer exceeds i64") + i64::from($offset);
        $ip = usize::try_from(target).expect("jump produced a negative instruction pointer");
    }};
}

/// A single activation record.
#[derive(Debug)]
struct Frame {
    /// Page being executed; `None` is the top-level page.
    func: Option<FunctionId>,
    /// Instruction pointer, synced from the cached copy around calls.
    ip: usize,
    /// Start of this frame's locals window on the operand stack.
    base: usize,
    /// Iterator-stack length at entry; restored on return.
    iter_base: usize,
    /// Whether calls in tail position may stream to the shell pipeline.
    root: bool,
    /// The captured-variable frame when executing a closure body.
    captured: Option<Rc<RefCell<Vec<Value>>>>,
}

/// Result of dispatching a callable.
enum Invoked {
    /// A frame was pushed; the dispatch loop must reload its cache.
    Pushed,
    /// The call completed immediately with a value.
    Value(Value),
}

/// The bytecode executor.
pub struct Vm<'a, Tr: VmTracer> {
    program: &'a CompiledProgram,
    analysed: &'a AnalysedProgram,
    std: &'a StdBindings,
    interns: &'a Interns,
    config: &'a ExecConfig,
    shell: ShellState,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    /// Open iterators; loops nest shallowly, so the storage stays inline.
    iters: SmallVec<[ValueIter; 4]>,
    /// Offset of the opcode being executed, for diagnostics.
    instruction_ip: usize,
    tracer: Tr,
}

impl<'a, Tr: VmTracer> Vm<'a, Tr> {
    pub fn new(
        program: &'a CompiledProgram,
        analysed: &'a AnalysedProgram,
        std: &'a StdBindings,
        interns: &'a Interns,
        config: &'a ExecConfig,
        shell: ShellState,
        tracer: Tr,
    ) -> Self {
        Self {
            program,
            analysed,
            std,
            interns,
            config,
            shell,
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(8),
            iters: SmallVec::new(),
            instruction_ip: 0,
            tracer,
        }
    }

    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    /// Executes the top-level page to completion and returns its value.
    pub fn execute(&mut self) -> Result<Value, Diagnostic> {
        self.stack.clear();
        self.frames.clear();
        self.iters.clear();
        self.stack.resize_with(self.program.top.num_locals() as usize, Value::default);
        self.frames.push(Frame {
            func: None,
            ip: 0,
            base: 0,
            iter_base: 0,
            root: false,
            captured: None,
        });
        match self.run_until(0) {
            Ok(value) => Ok(value),
            Err(error) => {
                let position = self.failure_position();
                self.frames.clear();
                self.stack.clear();
                self.iters.clear();
                Err(Diagnostic::new(error, position))
            }
        }
    }

    fn failure_position(&self) -> CodeRange {
        self.frames
            .last()
            .and_then(|frame| self.page_of(frame).position_at(self.instruction_ip))
            .unwrap_or_default()
    }

    fn page_of(&self, frame: &Frame) -> &'a Page {
        match frame.func {
            Some(func) => self.program.page(func),
            None => &self.program.top,
        }
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn current_page(&self) -> &'a Page {
        self.page_of(self.current_frame())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn split_args(&mut self, argc: usize) -> Vec<Value> {
        self.stack.split_off(self.stack.len() - argc)
    }

    fn display(&self, value: &Value) -> String {
        value.display(self.interns).to_string()
    }

    /// The dispatch loop. Runs until the frame stack shrinks back to
    /// `min_depth`, returning that frame's result value. Host re-entry
    /// (standard functions invoking elk callables) nests this loop.
    fn run_until(&mut self, min_depth: usize) -> RunResult<Value> {
        let mut page = self.current_page();
        let mut ip = self.current_frame().ip;
        loop {
            self.instruction_ip = ip;
            let op = Op::try_from(page.code()[ip]).expect("invalid opcode byte");
            ip += 1;
            self.tracer.on_instruction(
                self.instruction_ip,
                op,
                self.stack.len() - self.current_frame().base,
                self.frames.len(),
            );
            match op {
                Op::Nop => {}
                Op::Pop => {
                    self.pop();
                }
                Op::PopArgs => {
                    let count = fetch_u8!(page, ip) as usize;
                    self.stack.truncate(self.stack.len() - count);
                }
                Op::Unpack => {
                    let count = fetch_u8!(page, ip) as usize;
                    let value = self.pop();
                    self.unpack(value, count)?;
                }
                Op::ExitBlock => {
                    let count = fetch_u8!(page, ip) as usize;
                    let top = self.pop();
                    self.stack.truncate(self.stack.len() - count);
                    self.stack.push(top);
                }
                Op::Load => {
                    let slot = fetch_u16!(page, ip) as usize;
                    let base = self.current_frame().base;
                    let value = self.stack[base + slot].clone();
                    self.stack.push(value);
                }
                Op::Store => {
                    let slot = fetch_u16!(page, ip) as usize;
                    let value = self.pop();
                    let base = self.current_frame().base;
                    self.stack[base + slot] = value;
                }
                Op::LoadUpper => {
                    let index = fetch_u16!(page, ip) as usize;
                    let captured = self
                        .current_frame()
                        .captured
                        .as_ref()
                        .expect("LoadUpper outside a closure frame");
                    let value = captured.borrow()[index].clone();
                    self.stack.push(value);
                }
                Op::StoreUpper => {
                    let index = fetch_u16!(page, ip) as usize;
                    let value = self.pop();
                    let captured = self
                        .current_frame()
                        .captured
                        .as_ref()
                        .expect("StoreUpper outside a closure frame");
                    captured.borrow_mut()[index] = value;
                }
                Op::LoadShellVar => {
                    let index = fetch_u16!(page, ip);
                    let name = match page.constant(index) {
                        Value::Str(s) => s.clone(),
                        other => panic!("LoadShellVar constant is not a string: {other:?}"),
                    };
                    let value = self.shell_var(&name);
                    self.stack.push(value);
                }
                Op::Const => {
                    let index = fetch_u16!(page, ip);
                    self.stack.push(page.constant(index).clone());
                }
                Op::Call | Op::RootCall | Op::MaybeRootCall => {
                    let func = FunctionId::new(fetch_u16!(page, ip) as usize);
                    let argc = fetch_u8!(page, ip) as usize;
                    let root = match op {
                        Op::RootCall => true,
                        Op::MaybeRootCall => self.current_frame().root,
                        _ => false,
                    };
                    self.frames.last_mut().expect("frame").ip = ip;
                    self.push_frame(func, argc, root, None)?;
                    page = self.current_page();
                    ip = 0;
                }
                Op::CallStd => {
                    let id = StdFunctionId::new(fetch_u16!(page, ip) as usize);
                    let argc = fetch_u8!(page, ip) as usize;
                    let args = self.split_args(argc);
                    self.frames.last_mut().expect("frame").ip = ip;
                    let std = self.std;
                    let result = std.call(id, self, args)?;
                    self.stack.push(result);
                }
                Op::CallProgram | Op::RootCallProgram | Op::MaybeRootCallProgram => {
                    let name_index = fetch_u16!(page, ip);
                    let argc = fetch_u8!(page, ip) as usize;
                    let flags = fetch_u8!(page, ip);
                    let args = self.split_args(argc);
                    let piped = (flags & 1 != 0).then(|| self.pop());
                    let root = match op {
                        Op::RootCallProgram => true,
                        Op::MaybeRootCallProgram => self.current_frame().root,
                        _ => false,
                    };
                    let name = match page.constant(name_index) {
                        Value::Str(s) => s.clone(),
                        other => panic!("program name constant is not a string: {other:?}"),
                    };
                    let result = self.spawn_program(&name, args, piped, root)?;
                    self.stack.push(result);
                }
                Op::CallBuiltIn => {
                    let id = fetch_u8!(page, ip);
                    let argc = fetch_u8!(page, ip) as usize;
                    let args = self.split_args(argc);
                    let result = self.call_builtin(id, args)?;
                    self.stack.push(result);
                }
                Op::ResolveArgumentsDynamically => {
                    let argc = fetch_u8!(page, ip) as usize;
                    let args = self.split_args(argc);
                    self.stack.push(Value::list(args));
                }
                Op::DynamicCall => {
                    let mode = fetch_u8!(page, ip);
                    let args = match self.pop() {
                        Value::List(items) => items.borrow().clone(),
                        other => panic!("DynamicCall without a materialised argument list: {other:?}"),
                    };
                    let callee = self.pop();
                    let root = match mode {
                        1 => true,
                        2 => self.current_frame().root,
                        _ => false,
                    };
                    self.frames.last_mut().expect("frame").ip = ip;
                    match self.invoke(&callee, args, root)? {
                        Invoked::Pushed => {
                            page = self.current_page();
                            ip = 0;
                        }
                        Invoked::Value(value) => self.stack.push(value),
                    }
                }
                Op::PushArgsToRef => {
                    let argc = fetch_u8!(page, ip) as usize;
                    let args = self.split_args(argc);
                    let value = self.pop();
                    let Value::FuncRef(func_ref) = &value else {
                        return Err(RuntimeError::invalid_operation("argument binding", value.type_tag()));
                    };
                    let bound = FuncRef::new(func_ref.target.clone());
                    let mut bound_args = func_ref.bound_args.borrow().clone();
                    bound_args.extend(args);
                    *bound.bound_args.borrow_mut() = bound_args;
                    *bound.bound_closure.borrow_mut() = func_ref.bound_closure.borrow().clone();
                    self.stack.push(Value::FuncRef(Rc::new(bound)));
                }
                Op::PushClosureToRef => {
                    let closure = self.pop();
                    let value = self.pop();
                    let Value::FuncRef(func_ref) = &value else {
                        return Err(RuntimeError::invalid_operation("closure binding", value.type_tag()));
                    };
                    let bound = FuncRef::new(func_ref.target.clone());
                    *bound.bound_args.borrow_mut() = func_ref.bound_args.borrow().clone();
                    *bound.bound_closure.borrow_mut() = Some(closure);
                    self.stack.push(Value::FuncRef(Rc::new(bound)));
                }
                Op::BuildClosure => {
                    let func = FunctionId::new(fetch_u16!(page, ip) as usize);
                    let count = fetch_u8!(page, ip) as usize;
                    let captured = self.split_args(count);
                    let closure = ClosureValue {
                        func,
                        captured: Rc::new(RefCell::new(captured)),
                    };
                    self.stack
                        .push(Value::FuncRef(Rc::new(FuncRef::new(FuncTarget::Closure(closure)))));
                }
                Op::BuildTuple => {
                    let count = fetch_u8!(page, ip) as usize;
                    let items = self.split_args(count);
                    self.stack.push(Value::Tuple(items.into()));
                }
                Op::BuildList => {
                    let count = fetch_u8!(page, ip) as usize;
                    let items = self.split_args(count);
                    self.stack.push(Value::list(items));
                }
                Op::BuildListBig => {
                    let count = fetch_u32!(page, ip) as usize;
                    let items = self.split_args(count);
                    self.stack.push(Value::list(items));
                }
                Op::BuildSet => {
                    let count = fetch_u8!(page, ip) as usize;
                    let items = self.split_args(count);
                    let mut set = SetStorage::default();
                    for item in items {
                        set.insert(DictKey::from_value(item)?);
                    }
                    self.stack.push(Value::Set(Rc::new(RefCell::new(set))));
                }
                Op::BuildDict => {
                    let pairs = fetch_u8!(page, ip) as usize;
                    let items = self.split_args(pairs * 2);
                    let mut map = DictMap::default();
                    let mut iter = items.into_iter();
                    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                        map.insert(DictKey::from_value(key)?, value);
                    }
                    self.stack.push(Value::Dict(Rc::new(RefCell::new(map))));
                }
                Op::BuildRange => {
                    let end = self.pop();
                    let start = self.pop();
                    let range = match (&start, &end) {
                        (Value::Int(start), Value::Int(end)) => Value::Range {
                            start: *start,
                            end: *end,
                        },
                        _ => {
                            return Err(RuntimeError::invalid_operation(
                                "range",
                                format_args!("{} and {}", start.type_tag(), end.type_tag()),
                            ));
                        }
                    };
                    self.stack.push(range);
                }
                Op::BuildString => {
                    let count = fetch_u8!(page, ip) as usize;
                    let parts = self.split_args(count);
                    let mut text = String::new();
                    for part in &parts {
                        match part {
                            Value::Str(s) => text.push_str(s),
                            other => text.push_str(&self.display(other)),
                        }
                    }
                    self.stack.push(Value::string(text));
                }
                Op::New => {
                    let id = fetch_u16!(page, ip) as usize;
                    let argc = fetch_u8!(page, ip) as usize;
                    let values = self.split_args(argc);
                    let layout = Rc::clone(&self.program.structs[id]);
                    self.stack.push(Value::Struct(Rc::new(StructInstance {
                        layout,
                        values: RefCell::new(values),
                    })));
                }
                Op::NewStd => {
                    let index = fetch_u16!(page, ip) as usize;
                    let argc = fetch_u8!(page, ip) as usize;
                    let args = self.split_args(argc);
                    let result = self.std.construct(index, args)?;
                    self.stack.push(result);
                }
                Op::StructConst => {
                    let id = fetch_u16!(page, ip) as usize;
                    self.stack.push(Value::StructType(Rc::clone(&self.program.structs[id])));
                }
                Op::Glob => {
                    let pattern = self.pop();
                    let result = self.expand_glob(&pattern)?;
                    self.stack.push(result);
                }
                Op::LoadField => {
                    let index = fetch_u16!(page, ip);
                    let object = self.pop();
                    let value = self.load_field(&object, index, page)?;
                    self.stack.push(value);
                }
                Op::StoreField => {
                    let index = fetch_u16!(page, ip);
                    let value = self.pop();
                    let object = self.pop();
                    self.store_field(&object, index, page, value)?;
                }
                Op::LoadIndex => {
                    let index = self.pop();
                    let object = self.pop();
                    let value = self.load_index(&object, &index)?;
                    self.stack.push(value);
                }
                Op::StoreIndex => {
                    let value = self.pop();
                    let index = self.pop();
                    let object = self.pop();
                    self.store_index(&object, index, value)?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Greater | Op::GreaterEqual | Op::Less
                | Op::LessEqual => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = binary::apply(bin_op(op), left, right)?;
                    self.stack.push(result);
                }
                Op::Negate => {
                    let value = self.pop();
                    let result = binary::negate(value)?;
                    self.stack.push(result);
                }
                Op::Not => {
                    let value = self.pop();
                    self.stack.push(Value::Bool(!value.truthy()));
                }
                Op::Equal => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(left.equals(&right)));
                }
                Op::NotEqual => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(!left.equals(&right)));
                }
                Op::And => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(left.truthy() && right.truthy()));
                }
                Op::Or => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(left.truthy() || right.truthy()));
                }
                Op::Contains => {
                    let container = self.pop();
                    let item = self.pop();
                    let result = binary::contains(&container, &item)?;
                    self.stack.push(result);
                }
                Op::Jump => {
                    let offset = fetch_i16!(page, ip);
                    jump_relative!(ip, offset);
                }
                Op::JumpBackward => {
                    let distance = fetch_u16!(page, ip) as usize;
                    ip -= distance;
                }
                Op::JumpIf => {
                    let offset = fetch_i16!(page, ip);
                    if self.stack.last().expect("operand stack underflow").truthy() {
                        jump_relative!(ip, offset);
                    }
                }
                Op::JumpIfNot => {
                    let offset = fetch_i16!(page, ip);
                    if !self.stack.last().expect("operand stack underflow").truthy() {
                        jump_relative!(ip, offset);
                    }
                }
                Op::PopJumpIf => {
                    let offset = fetch_i16!(page, ip);
                    if self.pop().truthy() {
                        jump_relative!(ip, offset);
                    }
                }
                Op::PopJumpIfNot => {
                    let offset = fetch_i16!(page, ip);
                    if !self.pop().truthy() {
                        jump_relative!(ip, offset);
                    }
                }
                Op::Ret => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no frame to return from");
                    self.stack.truncate(frame.base);
                    self.iters.truncate(frame.iter_base);
                    self.tracer.on_return(self.frames.len());
                    if self.frames.len() == min_depth {
                        return Ok(result);
                    }
                    self.stack.push(result);
                    page = self.current_page();
                    ip = self.current_frame().ip;
                }
                Op::GetIter => {
                    let value = self.pop();
                    self.iters.push(value.make_iter()?);
                }
                Op::ForIter => {
                    let offset = fetch_i16!(page, ip);
                    match self.iters.last_mut().expect("ForIter without an iterator").next() {
                        Some(value) => self.stack.push(value),
                        None => jump_relative!(ip, offset),
                    }
                }
                Op::EndFor => {
                    self.iters.pop().expect("EndFor without an iterator");
                }
            }
        }
    }

    // --- calls ---

    fn push_frame(
        &mut self,
        func: FunctionId,
        argc: usize,
        root: bool,
        captured: Option<Rc<RefCell<Vec<Value>>>>,
    ) -> RunResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::runtime("maximum call depth exceeded"));
        }
        let page = self.program.page(func);
        debug_assert!(page.num_locals() as usize >= argc, "locals window smaller than argc");
        let base = self.stack.len() - argc;
        self.stack.resize_with(base + page.num_locals() as usize, Value::default);
        self.frames.push(Frame {
            func: Some(func),
            ip: 0,
            base,
            iter_base: self.iters.len(),
            root,
            captured,
        });
        self.tracer.on_call(Some(self.interns.get(page.name())), self.frames.len());
        Ok(())
    }

    /// Dispatches a dynamic callable: user functions, closures, standard
    /// functions, programs, struct constructors, and bound references.
    fn invoke(&mut self, callee: &Value, args: Vec<Value>, root: bool) -> RunResult<Invoked> {
        match callee {
            Value::FuncRef(func_ref) => {
                let mut args = args;
                {
                    let bound = func_ref.bound_args.borrow();
                    if !bound.is_empty() {
                        let mut all = bound.clone();
                        all.extend(args);
                        args = all;
                    }
                }
                let bound_closure = func_ref.bound_closure.borrow().clone();
                match &func_ref.target {
                    FuncTarget::Function(id) => {
                        let argc = self.bind_function_args(*id, &mut args, bound_closure)?;
                        self.stack.extend(args);
                        self.push_frame(*id, argc, root, None)?;
                        Ok(Invoked::Pushed)
                    }
                    FuncTarget::Closure(closure) => {
                        let info = &self.analysed.functions[closure.func.index()];
                        if args.len() != info.param_count {
                            return Err(RuntimeError::wrong_arguments(info.param_count, args.len(), false));
                        }
                        let captured = Rc::clone(&closure.captured);
                        self.stack.extend(args);
                        self.push_frame(closure.func, info.param_count, root, Some(captured))?;
                        Ok(Invoked::Pushed)
                    }
                    FuncTarget::Std(id) => {
                        let mut args = args;
                        if let Some(closure) = bound_closure {
                            args.push(closure);
                        }
                        let std = self.std;
                        std.call(*id, self, args).map(Invoked::Value)
                    }
                    FuncTarget::Program(name) => {
                        let name = name.clone();
                        self.spawn_program(&name, args, None, root).map(Invoked::Value)
                    }
                }
            }
            Value::StructType(layout) => {
                if args.len() != layout.fields.len() {
                    return Err(RuntimeError::wrong_arguments(layout.fields.len(), args.len(), false));
                }
                Ok(Invoked::Value(Value::Struct(Rc::new(StructInstance {
                    layout: Rc::clone(layout),
                    values: RefCell::new(args),
                }))))
            }
            other => Err(RuntimeError::invalid_operation("call", other.type_tag())),
        }
    }

    /// Normalises dynamic-call arguments against a user function's
    /// signature: checks the arity range, pads omitted defaulted
    /// parameters with nil, collapses a variadic tail, and appends a bound
    /// closure into the hidden slot.
    fn bind_function_args(
        &self,
        id: FunctionId,
        args: &mut Vec<Value>,
        bound_closure: Option<Value>,
    ) -> RunResult<usize> {
        let info = &self.analysed.functions[id.index()];
        if args.len() < info.required_count || (!info.variadic && args.len() > info.param_count) {
            return Err(RuntimeError::wrong_arguments(info.param_count, args.len(), info.variadic));
        }
        let fixed = info.param_count - usize::from(info.variadic);
        if info.variadic {
            if args.len() >= fixed {
                let tail: Vec<Value> = args.split_off(fixed);
                args.push(Value::list(tail));
            } else {
                args.resize_with(fixed, Value::default);
                args.push(Value::list(Vec::new()));
            }
        } else {
            args.resize_with(info.param_count, Value::default);
        }
        if let Some(closure) = bound_closure {
            args.push(closure);
        }
        Ok(args.len())
    }

    // --- built-ins ---

    fn call_builtin(&mut self, id: u8, mut args: Vec<Value>) -> RunResult<Value> {
        match id {
            builtin::CD => {
                let dir = match args.first() {
                    Some(value) => self.display(value),
                    None => std::env::var("HOME")
                        .map_err(|_| RuntimeError::runtime("cd: HOME is not set"))?,
                };
                std::env::set_current_dir(&dir)
                    .map_err(|e| RuntimeError::runtime(format!("cd: {dir}: {e}")))?;
                Ok(Value::Nil)
            }
            builtin::EXEC => {
                let program = self.display(&args.remove(0));
                let root = self.current_frame().root;
                self.spawn_program(&program, args, None, root)
            }
            builtin::SCRIPT_PATH => Ok(Value::string(self.config.script_path.display().to_string())),
            builtin::ERROR => {
                let message = self.display(&args[0]);
                Err(RuntimeError::runtime(message))
            }
            other => panic!("unknown built-in id {other}"),
        }
    }

    // --- processes ---

    /// Spawns an external program. Root context runs it to completion with
    /// inherited stdout and yields the exit code; otherwise the output is
    /// redirected into a pipe value.
    fn spawn_program(&mut self, name: &str, args: Vec<Value>, piped: Option<Value>, root: bool) -> RunResult<Value> {
        let mut argv = Vec::new();
        for arg in &args {
            match arg {
                // Glob expansions and list arguments splice into argv.
                Value::List(items) => {
                    for item in items.borrow().iter() {
                        argv.push(self.display(item));
                    }
                }
                other => argv.push(self.display(other)),
            }
        }
        let mut ctx = ProcessContext::new(name, argv);
        if let Some(piped) = piped {
            let feed = self.stdin_feed(piped);
            ctx.set_piped_value(feed);
        }
        self.tracer.on_process_spawn(name);
        if root {
            let code = ctx.start(&self.shell)?;
            Ok(Value::Int(code))
        } else {
            let pipe = ctx.start_with_redirect(&self.shell, self.config.pipe_line_capacity)?;
            Ok(Value::Pipe(Rc::new(RefCell::new(pipe))))
        }
    }

    /// Converts a piped-in value into a stdin feed. Pipe values stream
    /// lazily; everything else is rendered line-wise up front.
    fn stdin_feed(&self, value: Value) -> StdinFeed {
        match value {
            Value::Pipe(pipe) => pipe
                .borrow_mut()
                .take_stream()
                .unwrap_or(StdinFeed::Lines(Vec::new())),
            Value::List(items) => StdinFeed::Lines(items.borrow().iter().map(|v| self.display(v)).collect()),
            Value::Str(s) => StdinFeed::Lines(s.lines().map(str::to_owned).collect()),
            other => StdinFeed::Lines(vec![self.display(&other)]),
        }
    }

    fn expand_glob(&self, pattern: &Value) -> RunResult<Value> {
        let Value::Str(pattern) = pattern else {
            return Err(RuntimeError::invalid_operation("glob expansion", pattern.type_tag()));
        };
        let mut matches = Vec::new();
        if let Ok(paths) = glob::glob(pattern) {
            for path in paths.flatten() {
                matches.push(Value::string(path.to_string_lossy()));
            }
        }
        if matches.is_empty() {
            // No match leaves the pattern untouched, like a shell would.
            matches.push(Value::Str(pattern.clone()));
        }
        Ok(Value::list(matches))
    }

    // --- variables, fields, and indexing ---

    fn shell_var(&self, name: &str) -> Value {
        let stripped = name.strip_prefix('$').unwrap_or(name);
        if stripped == "?" {
            return Value::Int(self.shell.last_exit_code());
        }
        match std::env::var(stripped) {
            Ok(value) => Value::string(value),
            Err(_) => Value::Nil,
        }
    }

    fn unpack(&mut self, value: Value, count: usize) -> RunResult<()> {
        let items: Vec<Value> = match &value {
            Value::Tuple(items) => items.to_vec(),
            Value::List(items) => items.borrow().clone(),
            other => return Err(RuntimeError::invalid_operation("unpacking", other.type_tag())),
        };
        if items.len() != count {
            return Err(RuntimeError::runtime(format!(
                "cannot unpack {} values into {count} names",
                items.len()
            )));
        }
        self.stack.extend(items);
        Ok(())
    }

    fn field_name<'p>(&self, page: &'p Page, index: u16) -> &'p str {
        match page.constant(index) {
            Value::Str(s) => s.as_ref(),
            other => panic!("field name constant is not a string: {other:?}"),
        }
    }

    fn load_field(&self, object: &Value, index: u16, page: &Page) -> RunResult<Value> {
        let name = self.field_name(page, index);
        match object {
            Value::Struct(instance) => match self.struct_field_index(instance, name) {
                Some(field) => Ok(instance.values.borrow()[field].clone()),
                None => Err(RuntimeError::not_found(format!("field {name}"))),
            },
            other => Err(RuntimeError::invalid_operation("field access", other.type_tag())),
        }
    }

    fn store_field(&self, object: &Value, index: u16, page: &Page, value: Value) -> RunResult<()> {
        let name = self.field_name(page, index);
        match object {
            Value::Struct(instance) => match self.struct_field_index(instance, name) {
                Some(field) => {
                    instance.values.borrow_mut()[field] = value;
                    Ok(())
                }
                None => Err(RuntimeError::not_found(format!("field {name}"))),
            },
            other => Err(RuntimeError::invalid_operation("field assignment", other.type_tag())),
        }
    }

    fn struct_field_index(&self, instance: &StructInstance, name: &str) -> Option<usize> {
        instance
            .layout
            .fields
            .iter()
            .position(|&field| self.interns.get(field) == name)
    }

    fn load_index(&self, object: &Value, index: &Value) -> RunResult<Value> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let at = resolve_index(index, items.len())?;
                Ok(items[at].clone())
            }
            Value::Tuple(items) => {
                let at = resolve_index(index, items.len())?;
                Ok(items[at].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let at = resolve_index(index, chars.len())?;
                Ok(Value::string(chars[at].to_string()))
            }
            Value::Dict(map) => {
                let key = DictKey::from_value(index.clone())?;
                match map.borrow().get(&key) {
                    Some(value) => Ok(value.clone()),
                    None => Err(RuntimeError::not_found(format!("key {}", self.display(index)))),
                }
            }
            other => Err(RuntimeError::invalid_operation("indexing", other.type_tag())),
        }
    }

    fn store_index(&self, object: &Value, index: Value, value: Value) -> RunResult<()> {
        match object {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let at = resolve_index(&index, items.len())?;
                items[at] = value;
                Ok(())
            }
            Value::Dict(map) => {
                let key = DictKey::from_value(index)?;
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            other => Err(RuntimeError::invalid_operation("index assignment", other.type_tag())),
        }
    }
}

/// Resolves an index value against a container length; negative indices
/// count from the end. Out-of-range indices fail with `NotFound` naming
/// the index.
fn resolve_index(index: &Value, len: usize) -> RunResult<usize> {
    let Value::Int(i) = index else {
        return Err(RuntimeError::invalid_cast(index.type_tag(), "index"));
    };
    let resolved = if *i < 0 { *i + len as i64 } else { *i };
    if resolved < 0 || resolved as usize >= len {
        return Err(RuntimeError::not_found(format!("index {i}")));
    }
    Ok(resolved as usize)
}

fn bin_op(op: Op) -> BinOp {
    match op {
        Op::Add => BinOp::Add,
        Op::Sub => BinOp::Sub,
        Op::Mul => BinOp::Mul,
        Op::Div => BinOp::Div,
        Op::Mod => BinOp::Mod,
        Op::Greater => BinOp::Greater,
        Op::GreaterEqual => BinOp::GreaterEqual,
        Op::Less => BinOp::Less,
        Op::LessEqual => BinOp::LessEqual,
        other => panic!("{other} is not an arithmetic opcode"),
    }
}

impl<Tr: VmTracer> CallEnv for Vm<'_, Tr> {
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value> {
        let depth = self.frames.len();
        match self.invoke(callee, args, false)? {
            Invoked::Value(value) => Ok(value),
            Invoked::Pushed => self.run_until(depth),
        }
    }

    fn interns(&self) -> &Interns {
        self.interns
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::PageBuilder, tracer::NoopTracer};

    /// Builds a one-page program around hand-assembled bytecode so opcodes
    /// without a surface form in the generator stay covered.
    fn run_page(build: impl FnOnce(&mut PageBuilder), num_locals: u16) -> Value {
        let mut interns = Interns::new();
        let name = interns.intern("test");
        let mut builder = PageBuilder::new();
        build(&mut builder);
        builder.emit(Op::Ret);
        let page = builder.build(name, num_locals);
        let program = CompiledProgram::from_top(page);
        let analysed = AnalysedProgram {
            functions: Vec::new(),
            structs: Vec::new(),
            top_locals: num_locals,
        };
        let std = StdBindings::new();
        let config = ExecConfig::default();
        let mut vm = Vm::new(
            &program,
            &analysed,
            &std,
            &interns,
            &config,
            ShellState::default(),
            NoopTracer,
        );
        vm.execute().unwrap()
    }

    #[test]
    fn const_and_arithmetic() {
        let result = run_page(
            |b| {
                let one = b.add_const(Value::Int(1));
                let two = b.add_const(Value::Int(2));
                b.emit_u16(Op::Const, one);
                b.emit_u16(Op::Const, two);
                b.emit(Op::Add);
            },
            0,
        );
        assert!(result.equals(&Value::Int(3)));
    }

    #[test]
    fn and_or_are_strict_boolean() {
        let result = run_page(
            |b| {
                let t = b.add_const(Value::Bool(true));
                let nil = b.add_const(Value::Nil);
                b.emit_u16(Op::Const, t);
                b.emit_u16(Op::Const, nil);
                b.emit(Op::And);
            },
            0,
        );
        assert!(result.equals(&Value::Bool(false)));
        let result = run_page(
            |b| {
                let f = b.add_const(Value::Bool(false));
                let one = b.add_const(Value::Int(1));
                b.emit_u16(Op::Const, f);
                b.emit_u16(Op::Const, one);
                b.emit(Op::Or);
            },
            0,
        );
        assert!(result.equals(&Value::Bool(true)));
    }

    #[test]
    fn jump_if_preserves_value() {
        // JumpIf leaves the tested value on the stack for the taken path.
        let result = run_page(
            |b| {
                let one = b.add_const(Value::Int(1));
                let two = b.add_const(Value::Int(2));
                b.emit_u16(Op::Const, one);
                let jump = b.emit_jump(Op::JumpIf);
                b.emit(Op::Pop);
                b.emit_u16(Op::Const, two);
                b.patch_jump(jump);
            },
            0,
        );
        assert!(result.equals(&Value::Int(1)));
    }

    #[test]
    fn jump_if_not_falls_through_on_truthy() {
        let result = run_page(
            |b| {
                let f = b.add_const(Value::Bool(false));
                let nine = b.add_const(Value::Int(9));
                b.emit_u16(Op::Const, f);
                let jump = b.emit_jump(Op::JumpIfNot);
                b.emit(Op::Pop);
                b.emit_u16(Op::Const, nine);
                let done = b.emit_jump(Op::Jump);
                b.patch_jump(jump);
                b.emit(Op::Pop);
                b.emit_u16(Op::Const, nine);
                b.patch_jump(done);
            },
            0,
        );
        assert!(result.equals(&Value::Int(9)));
    }

    #[test]
    fn build_set_deduplicates() {
        let result = run_page(
            |b| {
                let one = b.add_const(Value::Int(1));
                b.emit_u16(Op::Const, one);
                b.emit_u16(Op::Const, one);
                b.emit_u8(Op::BuildSet, 2);
                b.adjust_stack(-1);
            },
            0,
        );
        let Value::Set(set) = result else { panic!("expected a set") };
        assert_eq!(set.borrow().len(), 1);
    }

    #[test]
    fn exit_block_trims_beneath_top() {
        let result = run_page(
            |b| {
                let one = b.add_const(Value::Int(1));
                let two = b.add_const(Value::Int(2));
                let three = b.add_const(Value::Int(3));
                b.emit_u16(Op::Const, one);
                b.emit_u16(Op::Const, two);
                b.emit_u16(Op::Const, three);
                b.emit_u8(Op::ExitBlock, 2);
                b.adjust_stack(-2);
            },
            0,
        );
        assert!(result.equals(&Value::Int(3)));
    }

    #[test]
    fn nop_and_pop_args() {
        let result = run_page(
            |b| {
                let one = b.add_const(Value::Int(1));
                let two = b.add_const(Value::Int(2));
                b.emit_u16(Op::Const, two);
                b.emit(Op::Nop);
                b.emit_u16(Op::Const, one);
                b.emit_u16(Op::Const, one);
                b.emit_u8(Op::PopArgs, 2);
                b.adjust_stack(-2);
            },
            0,
        );
        assert!(result.equals(&Value::Int(2)));
    }

    #[test]
    fn unpack_wrong_length_fails() {
        let mut interns = Interns::new();
        let name = interns.intern("test");
        let mut builder = PageBuilder::new();
        let items = builder.add_const(Value::Int(1));
        builder.emit_u16(Op::Const, items);
        builder.emit_u8(Op::BuildList, 1);
        builder.emit_u8(Op::Unpack, 3);
        builder.adjust_stack(3);
        builder.emit(Op::Ret);
        let page = builder.build(name, 0);
        let program = CompiledProgram::from_top(page);
        let analysed = AnalysedProgram {
            functions: Vec::new(),
            structs: Vec::new(),
            top_locals: 0,
        };
        let std = StdBindings::new();
        let config = ExecConfig::default();
        let mut vm = Vm::new(
            &program,
            &analysed,
            &std,
            &interns,
            &config,
            ShellState::default(),
            NoopTracer,
        );
        let err = vm.execute().unwrap_err();
        assert!(err.error.message.contains("unpack"));
    }
}
