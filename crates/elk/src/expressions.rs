//! The expression tree consumed and annotated by the analyser.
//!
//! The external parser produces this tree; the analyser resolves names in
//! place, filling the `Option` slots (`call_type`, `resolved`, `slot`, …)
//! and rewriting pipe threading and variadic tails. The generator consumes
//! the annotated tree and never looks at unresolved nodes.

use crate::{
    intern::{FunctionId, ScopeId, StdFunctionId, StringId, StructId},
    value::TypeTag,
};

/// A half-open byte range into the source text.
///
/// Produced by the external parser; the engine only carries ranges through
/// to diagnostics and never inspects the source itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRange {
    pub start: u32,
    pub end: u32,
}

impl CodeRange {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// An expression with its source position and evaluation context.
///
/// `is_root` marks nodes whose result is discarded (statement position, or a
/// call whose output may stream to the enclosing shell pipeline).
/// `enclosing` is a non-owning handle into the analyser's function side
/// table naming the function (or closure) whose body contains this node.
#[derive(Debug, Clone)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub is_root: bool,
    pub enclosing: Option<FunctionId>,
    pub expr: Expr,
}

impl ExprLoc {
    #[must_use]
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self {
            position,
            is_root: false,
            enclosing: None,
            expr,
        }
    }
}

/// Target of a resolved call or function reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A host-provided standard function.
    Std(StdFunctionId),
    /// A user-defined function, resolved to its page handle.
    Function(FunctionId),
    /// An external executable resolved on PATH at run time.
    Program(StringId),
}

/// Call-site classification assigned by the analyser.
///
/// The generator picks the opcode family from this tag; it is a defect for
/// any `Call` node to survive analysis without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    BuiltInCd,
    BuiltInExec,
    BuiltInScriptPath,
    BuiltInClosure,
    BuiltInCall,
    BuiltInError,
    Std(StdFunctionId),
    Function(FunctionId),
    Program,
}

/// Resolution of a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    /// Slot in the current frame's locals window.
    Local(u16),
    /// Index into the enclosing closure's captured-variable frame.
    Captured(u16),
    /// A `$`-prefixed shell/environment variable, resolved at run time.
    Shell(StringId),
}

/// One captured variable of a closure: where it lives in the defining frame
/// and which capture slot it occupies inside the closure.
#[derive(Debug, Clone, Copy)]
pub struct CapturedVar {
    pub name: StringId,
    /// Location in the frame that constructs the closure.
    pub source: VarRef,
    /// Slot in the closure's captured frame.
    pub index: u16,
}

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: StringId,
    /// Default value expression, analysed in the declaring module's scope
    /// and emitted at call sites for omitted trailing arguments.
    pub default: Option<ExprLoc>,
    pub variadic: bool,
}

impl Param {
    #[must_use]
    pub fn required(name: StringId) -> Self {
        Self {
            name,
            default: None,
            variadic: false,
        }
    }
}

/// A function (or closure body) definition.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: StringId,
    pub params: Vec<Param>,
    /// Whether the signature declares a trailing closure; when true the
    /// frame reserves a hidden slot for it and the `closure` built-in is
    /// legal inside the body.
    pub accepts_closure: bool,
    pub body: Box<ExprLoc>,
    /// Assigned by the analyser; also the page index after generation.
    pub id: Option<FunctionId>,
    /// The module scope this function is declared in.
    pub module: Option<ScopeId>,
}

impl FunctionDef {
    #[must_use]
    pub fn new(name: StringId, params: Vec<Param>, body: ExprLoc) -> Self {
        Self {
            name,
            params,
            accepts_closure: false,
            body: Box::new(body),
            id: None,
            module: None,
        }
    }
}

/// An import declared on a module: makes the target module's functions and
/// structs visible through the importer's imported tables.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub path: Vec<StringId>,
    /// Filled by the analyser with the resolved module scope.
    pub resolved: Option<ScopeId>,
}

/// Resolution of a `new` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewTarget {
    /// A user struct declared in some module.
    Struct(StructId),
    /// A standard-library struct keyed by the first path element.
    Std(usize),
}

/// Resolution of a type name in expression position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeResolution {
    Builtin(TypeTag),
    Struct(StructId),
}

/// A call expression.
///
/// `piped_value` is populated by the pipe rewrite when the target is a
/// `Program`: the producer feeds the child's stdin and is not an argument.
/// For every other target the producer is inserted as argument 0.
#[derive(Debug, Clone)]
pub struct CallExpr {
    /// Module path qualifying the callee; empty for unqualified calls.
    pub path: Vec<StringId>,
    pub name: StringId,
    pub args: Vec<ExprLoc>,
    /// Trailing closure attached with `=>`.
    pub closure: Option<Box<ExprLoc>>,
    pub piped_value: Option<Box<ExprLoc>>,
    pub call_type: Option<CallType>,
}

impl CallExpr {
    #[must_use]
    pub fn new(path: Vec<StringId>, name: StringId, args: Vec<ExprLoc>) -> Self {
        Self {
            path,
            name,
            args,
            closure: None,
            piped_value: None,
            call_type: None,
        }
    }
}

/// A closure expression: anonymous body plus its captured-variable set.
#[derive(Debug, Clone)]
pub struct ClosureExpr {
    pub def: FunctionDef,
    /// Populated by the analyser; ordered by capture index.
    pub captured: Vec<CapturedVar>,
}

/// Control-transfer keywords.
#[derive(Debug, Clone)]
pub enum Keyword {
    Return(Option<Box<ExprLoc>>),
    Break,
    Continue,
}

/// One piece of an interpolated string.
#[derive(Debug, Clone)]
pub enum StringPart {
    Literal(StringId),
    Interpolation(ExprLoc),
}

/// Literal constants, attached to the tree by the parser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StringId),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "|")]
    Pipe,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "not")]
    Not,
}

/// The closed expression sum.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A submodule declaration with its body and imports.
    Module {
        name: StringId,
        imports: Vec<ImportSpec>,
        body: Vec<ExprLoc>,
    },
    /// A struct declaration. Field names must be unique.
    Struct { name: StringId, fields: Vec<StringId> },
    Function(FunctionDef),
    Let {
        name: StringId,
        value: Box<ExprLoc>,
        /// Local slot in the owning frame, assigned by the analyser.
        slot: Option<u16>,
    },
    New {
        path: Vec<StringId>,
        args: Vec<ExprLoc>,
        target: Option<NewTarget>,
    },
    If {
        condition: Box<ExprLoc>,
        then: Box<ExprLoc>,
        orelse: Option<Box<ExprLoc>>,
    },
    For {
        /// Loop identifiers; more than one unpacks each element.
        idents: Vec<StringId>,
        iterable: Box<ExprLoc>,
        body: Box<ExprLoc>,
        /// Local slots for the loop identifiers, assigned by the analyser.
        slots: Vec<u16>,
    },
    While {
        condition: Box<ExprLoc>,
        body: Box<ExprLoc>,
    },
    Tuple(Vec<ExprLoc>),
    List(Vec<ExprLoc>),
    Dictionary(Vec<(ExprLoc, ExprLoc)>),
    Block(Vec<ExprLoc>),
    Keyword(Keyword),
    Binary {
        op: BinaryOp,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    Unary { op: UnaryOp, operand: Box<ExprLoc> },
    FieldAccess { object: Box<ExprLoc>, field: StringId },
    Range {
        from: Option<Box<ExprLoc>>,
        to: Option<Box<ExprLoc>>,
    },
    Indexer { object: Box<ExprLoc>, index: Box<ExprLoc> },
    /// A type name in expression position; resolved to a runtime type
    /// constant (built-in tag or struct type).
    Type {
        name: StringId,
        resolved: Option<TypeResolution>,
    },
    Variable {
        name: StringId,
        resolved: Option<VarRef>,
    },
    Call(CallExpr),
    Literal(Literal),
    /// First-class reference to a callable, resolved Std → user → Program.
    FunctionReference {
        path: Vec<StringId>,
        name: StringId,
        target: Option<CallTarget>,
    },
    StringInterpolation(Vec<StringPart>),
    Closure(ClosureExpr),
}
