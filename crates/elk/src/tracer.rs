//! VM execution tracing.
//!
//! A trait-based hook surface with zero-cost no-op defaults: the VM carries
//! the tracer as a type parameter, so with [`NoopTracer`] every hook
//! monomorphises away. [`StderrTracer`] gives a human-readable execution
//! log; [`CountingTracer`] collects opcode frequencies for tests and
//! profiling.

use ahash::AHashMap;

use crate::bytecode::Op;

/// Trait for VM execution tracing.
///
/// All methods have default no-op implementations, so implementations only
/// override the hooks they care about.
pub trait VmTracer {
    /// Called before each opcode dispatch. This is the hottest hook; keep
    /// implementations lightweight.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _op: Op, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a call pushes a new frame.
    #[inline(always)]
    fn on_call(&mut self, _name: Option<&str>, _depth: usize) {}

    /// Called when a frame returns.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when an external program is spawned.
    #[inline(always)]
    fn on_process_spawn(&mut self, _program: &str) {}
}

/// A tracer that does nothing; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Logs execution events to stderr in a human-readable form.
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Log every instruction, not just calls and spawns.
    pub verbose: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, op: Op, stack_depth: usize, frame_depth: usize) {
        if self.verbose {
            eprintln!("[vm] {ip:04} {op} stack={stack_depth} frames={frame_depth}");
        }
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        eprintln!("[vm] call {} depth={depth}", name.unwrap_or("<page>"));
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("[vm] return depth={depth}");
    }

    fn on_process_spawn(&mut self, program: &str) {
        eprintln!("[vm] spawn {program}");
    }
}

/// Counts dispatched opcodes and pushed frames.
#[derive(Debug, Default)]
pub struct CountingTracer {
    pub opcodes: AHashMap<Op, u64>,
    pub calls: u64,
    pub spawns: u64,
}

impl CountingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total instructions dispatched.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.opcodes.values().sum()
    }
}

impl VmTracer for CountingTracer {
    fn on_instruction(&mut self, _ip: usize, op: Op, _stack_depth: usize, _frame_depth: usize) {
        *self.opcodes.entry(op).or_insert(0) += 1;
    }

    fn on_call(&mut self, _name: Option<&str>, _depth: usize) {
        self.calls += 1;
    }

    fn on_process_spawn(&mut self, _program: &str) {
        self.spawns += 1;
    }
}
