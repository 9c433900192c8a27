//! The tagged runtime value domain.
//!
//! Small values (numbers, booleans, nil, ranges) are stored inline; lists,
//! dicts, sets, and struct instances are shared by `Rc` handle so indexed
//! assignment through one binding is visible through every other. Pipes wrap
//! a live child-process output stream and are finite but not restartable.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::{IndexMap, IndexSet};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    errors::{RunResult, RuntimeError},
    intern::{FunctionId, Interns, StdFunctionId, StringId, StructId},
    process::Pipe,
};

/// Insertion-ordered dictionary storage.
pub type DictMap = IndexMap<DictKey, Value, ahash::RandomState>;
/// Insertion-ordered set storage.
pub type SetStorage = IndexSet<DictKey, ahash::RandomState>;

/// Type tags driving operator dispatch, conversion, and iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum TypeTag {
    Nil,
    Bool,
    Integer,
    Float,
    String,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Struct,
    Function,
    Type,
    Pipe,
}

/// Shared field layout of a struct declaration.
#[derive(Debug, Clone)]
pub struct StructLayout {
    pub id: StructId,
    pub name: StringId,
    pub fields: Vec<StringId>,
}

/// A struct instance: shared layout plus mutable field values.
#[derive(Debug)]
pub struct StructInstance {
    pub layout: Rc<StructLayout>,
    pub values: RefCell<Vec<Value>>,
}

impl StructInstance {
    /// Returns the field position for a name, if declared.
    #[must_use]
    pub fn field_index(&self, name: StringId) -> Option<usize> {
        self.layout.fields.iter().position(|&f| f == name)
    }
}

/// A closure: page handle plus the captured-variable frame snapshot.
///
/// The snapshot is shared between the closure value and every frame
/// executing its body, so stores through `StoreUpper` persist across calls
/// of the same closure value.
#[derive(Debug, Clone)]
pub struct ClosureValue {
    pub func: FunctionId,
    pub captured: Rc<RefCell<Vec<Value>>>,
}

/// The callable behind a function reference.
#[derive(Debug, Clone)]
pub enum FuncTarget {
    Function(FunctionId),
    Std(StdFunctionId),
    Program(Rc<str>),
    Closure(ClosureValue),
}

/// A first-class callable reference, optionally carrying bound arguments
/// and a bound closure (built by `PushArgsToRef` / `PushClosureToRef`).
#[derive(Debug)]
pub struct FuncRef {
    pub target: FuncTarget,
    pub bound_args: RefCell<Vec<Value>>,
    pub bound_closure: RefCell<Option<Value>>,
}

impl FuncRef {
    #[must_use]
    pub fn new(target: FuncTarget) -> Self {
        Self {
            target,
            bound_args: RefCell::new(Vec::new()),
            bound_closure: RefCell::new(None),
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<DictMap>>),
    Set(Rc<RefCell<SetStorage>>),
    Range { start: i64, end: i64 },
    Struct(Rc<StructInstance>),
    FuncRef(Rc<FuncRef>),
    Type(TypeTag),
    /// A struct type constant, usable as a dynamic constructor.
    StructType(Rc<StructLayout>),
    Pipe(Rc<RefCell<Pipe>>),
}

impl Value {
    #[must_use]
    pub fn string(text: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(text.as_ref()))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Nil => TypeTag::Nil,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Integer,
            Self::Float(_) => TypeTag::Float,
            Self::Str(_) => TypeTag::String,
            Self::List(_) => TypeTag::List,
            Self::Tuple(_) => TypeTag::Tuple,
            Self::Dict(_) => TypeTag::Dict,
            Self::Set(_) => TypeTag::Set,
            Self::Range { .. } => TypeTag::Range,
            Self::Struct(_) => TypeTag::Struct,
            Self::FuncRef(_) => TypeTag::Function,
            Self::Type(_) | Self::StructType(_) => TypeTag::Type,
            Self::Pipe(_) => TypeTag::Pipe,
        }
    }

    /// Shell truthiness: nil and false are falsy, everything else truthy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// Converts this value to the named type.
    ///
    /// Fails with `InvalidCast` when no conversion is defined, and with
    /// `InvalidNumberLiteral` when a string fails to parse as a number.
    pub fn cast(self, to: TypeTag, interns: &Interns) -> RunResult<Self> {
        if self.type_tag() == to {
            return Ok(self);
        }
        match (self, to) {
            (Self::Float(f), TypeTag::Integer) => Ok(Self::Int(f as i64)),
            (Self::Bool(b), TypeTag::Integer) => Ok(Self::Int(i64::from(b))),
            (Self::Str(s), TypeTag::Integer) => s
                .trim()
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| RuntimeError::invalid_number_literal(&s)),
            (Self::Int(i), TypeTag::Float) => Ok(Self::Float(i as f64)),
            (Self::Str(s), TypeTag::Float) => s
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| RuntimeError::invalid_number_literal(&s)),
            (value, TypeTag::String) => Ok(Self::string(value.display(interns).to_string())),
            (value, TypeTag::Bool) => Ok(Self::Bool(value.truthy())),
            (value @ (Self::Tuple(_) | Self::Range { .. } | Self::Set(_) | Self::Pipe(_)), TypeTag::List) => {
                let mut items = Vec::new();
                let mut iter = value.make_iter()?;
                while let Some(item) = iter.next() {
                    items.push(item);
                }
                Ok(Self::list(items))
            }
            (Self::List(items), TypeTag::Tuple) => Ok(Self::Tuple(items.borrow().clone().into())),
            (value @ (Self::List(_) | Self::Tuple(_) | Self::Range { .. }), TypeTag::Set) => {
                let mut set = SetStorage::default();
                let mut iter = value.make_iter()?;
                while let Some(item) = iter.next() {
                    set.insert(DictKey::from_value(item)?);
                }
                Ok(Self::Set(Rc::new(RefCell::new(set))))
            }
            (value, to) => Err(RuntimeError::invalid_cast(value.type_tag(), to)),
        }
    }

    /// Converts this value to an iterator.
    ///
    /// Fails with `InvalidOperation` for non-iterable tags. Pipe iterators
    /// consume the live stream and cannot be restarted.
    pub fn make_iter(&self) -> RunResult<ValueIter> {
        match self {
            Self::List(items) => Ok(ValueIter::List {
                items: Rc::clone(items),
                index: 0,
            }),
            Self::Tuple(items) => Ok(ValueIter::Tuple {
                items: Rc::clone(items),
                index: 0,
            }),
            Self::Range { start, end } => Ok(ValueIter::Range {
                next: *start,
                end: *end,
            }),
            Self::Str(s) => Ok(ValueIter::Chars {
                chars: s.chars().map(|c| Rc::from(c.to_string().as_str())).collect(),
                index: 0,
            }),
            Self::Dict(map) => Ok(ValueIter::Keys {
                keys: map.borrow().keys().cloned().collect(),
                index: 0,
            }),
            Self::Set(set) => Ok(ValueIter::Keys {
                keys: set.borrow().iter().cloned().collect(),
                index: 0,
            }),
            Self::Pipe(pipe) => Ok(ValueIter::Pipe(Rc::clone(pipe))),
            other => Err(RuntimeError::invalid_operation("iteration", other.type_tag())),
        }
    }

    /// Structural equality; container handles compare by content, function
    /// references and pipes by identity.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            (Self::Set(a), Self::Set(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Self::Range { start: s1, end: e1 }, Self::Range { start: s2, end: e2 }) => s1 == s2 && e1 == e2,
            (Self::Struct(a), Self::Struct(b)) => Rc::ptr_eq(a, b),
            (Self::FuncRef(a), Self::FuncRef(b)) => Rc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::StructType(a), Self::StructType(b)) => a.id == b.id,
            (Self::Pipe(a), Self::Pipe(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Formats the value for user output; strings print without quotes.
    #[must_use]
    pub fn display<'a>(&'a self, interns: &'a Interns) -> ValueDisplay<'a> {
        ValueDisplay { value: self, interns }
    }
}

/// The hashable value subset usable as dict keys and set elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Nil,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    /// Converts a value into a key; fails with `InvalidCast` for unhashable
    /// tags (floats, containers, pipes, …).
    pub fn from_value(value: Value) -> RunResult<Self> {
        match value {
            Value::Nil => Ok(Self::Nil),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Int(i) => Ok(Self::Int(i)),
            Value::Str(s) => Ok(Self::Str(s)),
            Value::Tuple(items) => items.iter().cloned().map(Self::from_value).collect::<RunResult<Vec<_>>>().map(Self::Tuple),
            other => Err(RuntimeError::invalid_cast(other.type_tag(), "hashable key")),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Str(s) => Value::Str(s),
            Self::Tuple(items) => Value::Tuple(items.into_iter().map(Self::into_value).collect()),
        }
    }
}

/// An iterator over a runtime value.
///
/// Pipe iteration blocks on the line buffer until a line arrives or the
/// buffer is marked complete; all other variants walk snapshots or shared
/// handles without blocking.
#[derive(Debug)]
pub enum ValueIter {
    List { items: Rc<RefCell<Vec<Value>>>, index: usize },
    Tuple { items: Rc<[Value]>, index: usize },
    Range { next: i64, end: i64 },
    Chars { chars: Vec<Rc<str>>, index: usize },
    Keys { keys: Vec<DictKey>, index: usize },
    Pipe(Rc<RefCell<Pipe>>),
}

impl ValueIter {
    pub fn next(&mut self) -> Option<Value> {
        match self {
            Self::List { items, index } => {
                let item = items.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            Self::Tuple { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            Self::Range { next, end } => {
                if *next >= *end {
                    return None;
                }
                let item = Value::Int(*next);
                *next += 1;
                Some(item)
            }
            Self::Chars { chars, index } => {
                let item = chars.get(*index).cloned().map(Value::Str);
                *index += 1;
                item
            }
            Self::Keys { keys, index } => {
                let item = keys.get(*index).cloned().map(DictKey::into_value);
                *index += 1;
                item
            }
            Self::Pipe(pipe) => pipe.borrow_mut().next_line().map(Value::string),
        }
    }
}

/// Display adapter carrying the interner for struct and function names.
pub struct ValueDisplay<'a> {
    value: &'a Value,
    interns: &'a Interns,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.display(self.interns))?;
                }
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.display(self.interns))?;
                }
                write!(f, ")")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key.clone().into_value().display(self.interns), value.display(self.interns))?;
                }
                write!(f, "}}")
            }
            Value::Set(set) => {
                write!(f, "{{")?;
                for (i, key) in set.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", key.clone().into_value().display(self.interns))?;
                }
                write!(f, "}}")
            }
            Value::Range { start, end } => write!(f, "{start}..{end}"),
            Value::Struct(instance) => {
                write!(f, "{} {{ ", self.interns.get(instance.layout.name))?;
                for (i, (&field, value)) in instance.layout.fields.iter().zip(instance.values.borrow().iter()).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", self.interns.get(field), value.display(self.interns))?;
                }
                write!(f, " }}")
            }
            Value::FuncRef(func_ref) => match &func_ref.target {
                FuncTarget::Function(id) => write!(f, "<function {}>", id.index()),
                FuncTarget::Std(id) => write!(f, "<std function {}>", id.index()),
                FuncTarget::Program(name) => write!(f, "<program {name}>"),
                FuncTarget::Closure(_) => write!(f, "<closure>"),
            },
            Value::Type(tag) => write!(f, "{tag}"),
            Value::StructType(layout) => write!(f, "{}", self.interns.get(layout.name)),
            Value::Pipe(_) => write!(f, "<pipe>"),
        }
    }
}
