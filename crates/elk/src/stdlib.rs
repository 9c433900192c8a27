//! The host-provided standard function and struct bindings.
//!
//! The engine treats this table as an opaque, read-only registry: the
//! analyser consults declared arities and closure flags, the VM invokes the
//! callables. Host callables receive a [`CallEnv`] so functions like `map`
//! can re-enter the interpreter to invoke elk closures.

use ahash::AHashMap;

use crate::{
    errors::{RunResult, RuntimeError},
    intern::{Interns, StdFunctionId},
    value::Value,
};

/// The re-entry seam host callables use to invoke elk callables.
///
/// Implemented by the VM; `callee` may be any function-reference value
/// (user function, closure, std function, or program).
pub trait CallEnv {
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value>;

    /// The interner, for rendering values in host-side messages.
    fn interns(&self) -> &Interns;
}

/// Invocation callable of a standard function.
pub type StdCallable = Box<dyn Fn(&mut dyn CallEnv, Vec<Value>) -> RunResult<Value>>;

/// One host-provided function with its declared arity shape.
pub struct StdFunction {
    pub name: String,
    pub min_args: usize,
    /// `None` means unbounded (variadic).
    pub max_args: Option<usize>,
    /// Index from which trailing arguments are accepted without bound.
    pub variadic_start: Option<usize>,
    /// Whether a trailing closure is accepted; when present it is appended
    /// as the final argument value.
    pub takes_closure: bool,
    func: StdCallable,
}

impl StdFunction {
    pub fn new(name: impl Into<String>, min_args: usize, max_args: usize, func: StdCallable) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args: Some(max_args),
            variadic_start: None,
            takes_closure: false,
            func,
        }
    }

    pub fn variadic(name: impl Into<String>, min_args: usize, variadic_start: usize, func: StdCallable) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args: None,
            variadic_start: Some(variadic_start),
            takes_closure: false,
            func,
        }
    }

    #[must_use]
    pub fn with_closure(mut self) -> Self {
        self.takes_closure = true;
        self
    }

    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic_start.is_some()
    }
}

impl std::fmt::Debug for StdFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdFunction")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("variadic_start", &self.variadic_start)
            .field("takes_closure", &self.takes_closure)
            .finish_non_exhaustive()
    }
}

/// One host-provided struct usable as a `new` fallback.
pub struct StdStruct {
    pub name: String,
    pub min_args: usize,
    pub max_args: usize,
    construct: Box<dyn Fn(Vec<Value>) -> RunResult<Value>>,
}

impl StdStruct {
    pub fn new(
        name: impl Into<String>,
        min_args: usize,
        max_args: usize,
        construct: Box<dyn Fn(Vec<Value>) -> RunResult<Value>>,
    ) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args,
            construct,
        }
    }
}

impl std::fmt::Debug for StdStruct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdStruct")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish_non_exhaustive()
    }
}

/// The registry of standard functions and structs.
#[derive(Debug, Default)]
pub struct StdBindings {
    functions: Vec<StdFunction>,
    by_name: AHashMap<String, StdFunctionId>,
    structs: Vec<StdStruct>,
    structs_by_name: AHashMap<String, usize>,
}

impl StdBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: StdFunction) -> StdFunctionId {
        let id = StdFunctionId::new(self.functions.len());
        self.by_name.insert(function.name.clone(), id);
        self.functions.push(function);
        id
    }

    pub fn register_struct(&mut self, std_struct: StdStruct) -> usize {
        let index = self.structs.len();
        self.structs_by_name.insert(std_struct.name.clone(), index);
        self.structs.push(std_struct);
        index
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<StdFunctionId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn get(&self, id: StdFunctionId) -> &StdFunction {
        &self.functions[id.index()]
    }

    #[must_use]
    pub fn lookup_struct(&self, name: &str) -> Option<usize> {
        self.structs_by_name.get(name).copied()
    }

    #[must_use]
    pub fn get_struct(&self, index: usize) -> &StdStruct {
        &self.structs[index]
    }

    /// Invokes a standard function with already-marshalled arguments.
    pub fn call(&self, id: StdFunctionId, env: &mut dyn CallEnv, args: Vec<Value>) -> RunResult<Value> {
        (self.functions[id.index()].func)(env, args)
    }

    /// Invokes a standard struct constructor.
    pub fn construct(&self, index: usize, args: Vec<Value>) -> RunResult<Value> {
        let std_struct = &self.structs[index];
        if args.len() < std_struct.min_args || args.len() > std_struct.max_args {
            let expected = if args.len() < std_struct.min_args {
                std_struct.min_args
            } else {
                std_struct.max_args
            };
            return Err(RuntimeError::wrong_arguments(expected, args.len(), false));
        }
        (std_struct.construct)(args)
    }
}
