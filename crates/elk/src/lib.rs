#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is bounds-checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts follow explicit range checks")]
#![expect(clippy::cast_possible_wrap, reason = "operand widths bound the values")]

mod analyse;
mod bytecode;
mod config;
mod errors;
mod expressions;
mod intern;
mod process;
mod run;
mod scope;
mod stdlib;
mod tracer;
mod value;
mod vm;

pub use crate::{
    analyse::{AnalysedProgram, Analyser, FunctionInfo},
    bytecode::{CompiledProgram, JumpLabel, Op, Operands, Page, PageBuilder, generate},
    config::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_PIPE_LINE_CAPACITY, ExecConfig},
    errors::{Diagnostic, ErrorKind, RunResult, RuntimeError},
    expressions::{
        BinaryOp, CallExpr, CallTarget, CallType, CapturedVar, ClosureExpr, CodeRange, Expr, ExprLoc, FunctionDef,
        ImportSpec, Keyword, Literal, NewTarget, Param, StringPart, TypeResolution, UnaryOp, VarRef,
    },
    intern::{FunctionId, Interns, ScopeId, StdFunctionId, StringId, StructId},
    process::{Pipe, ProcessContext, ShellState, StdinFeed},
    run::Executor,
    stdlib::{CallEnv, StdBindings, StdCallable, StdFunction, StdStruct},
    tracer::{CountingTracer, NoopTracer, StderrTracer, VmTracer},
    value::{ClosureValue, DictKey, FuncRef, FuncTarget, StructInstance, StructLayout, TypeTag, Value, ValueIter},
    vm::Vm,
};
