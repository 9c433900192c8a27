//! Public interface for compiling and executing elk expression trees.

use crate::{
    analyse::{AnalysedProgram, Analyser},
    bytecode::{CompiledProgram, generate},
    config::ExecConfig,
    errors::Diagnostic,
    expressions::ExprLoc,
    intern::Interns,
    process::ShellState,
    stdlib::StdBindings,
    tracer::{NoopTracer, VmTracer},
    value::Value,
    vm::Vm,
};

/// The execution engine: analyse → generate → run.
///
/// An executor owns the standard bindings, the execution limits, and the
/// shell state (`?` and the script directory), which persist across
/// `execute` calls so successive invocations observe each other's exit
/// codes.
///
/// # Example
/// ```no_run
/// use elk::{Executor, Interns, StdBindings};
///
/// let mut interns = Interns::new();
/// let tree = todo!("obtain a module tree from the parser");
/// let mut executor = Executor::new(StdBindings::new());
/// let value = executor.execute(&interns, tree).unwrap();
/// ```
#[derive(Debug)]
pub struct Executor {
    std: StdBindings,
    config: ExecConfig,
    shell: ShellState,
}

impl Executor {
    #[must_use]
    pub fn new(std: StdBindings) -> Self {
        Self::with_config(std, ExecConfig::default())
    }

    #[must_use]
    pub fn with_config(std: StdBindings, config: ExecConfig) -> Self {
        let shell = ShellState::new(config.script_path.clone());
        Self { std, config, shell }
    }

    /// The registered standard bindings.
    #[must_use]
    pub fn std(&self) -> &StdBindings {
        &self.std
    }

    /// The shell `?` variable: the most recently completed external
    /// process's exit code.
    #[must_use]
    pub fn last_exit_code(&self) -> i64 {
        self.shell.last_exit_code()
    }

    /// Compiles a module tree without running it. The tree is annotated in
    /// place; the returned artefacts can be inspected or executed later.
    pub fn compile(
        &self,
        interns: &Interns,
        tree: &mut ExprLoc,
    ) -> Result<(AnalysedProgram, CompiledProgram), Diagnostic> {
        let mut analyser = Analyser::new(interns, &self.std);
        let analysed = match analyser.analyse(tree) {
            Ok(analysed) => analysed,
            Err(error) => return Err(Diagnostic::new(error, analyser.last_position())),
        };
        let program = generate(tree, &analysed, interns);
        Ok((analysed, program))
    }

    /// Runs a module tree to completion and returns the value of its final
    /// top-level expression (the top page is the return channel).
    pub fn execute(&mut self, interns: &Interns, tree: &mut ExprLoc) -> Result<Value, Diagnostic> {
        self.execute_traced(interns, tree, NoopTracer).0
    }

    /// As [`execute`](Self::execute), with a caller-supplied tracer that is
    /// handed back after the run.
    pub fn execute_traced<Tr: VmTracer>(
        &mut self,
        interns: &Interns,
        tree: &mut ExprLoc,
        tracer: Tr,
    ) -> (Result<Value, Diagnostic>, Tr) {
        let (analysed, program) = match self.compile(interns, tree) {
            Ok(artefacts) => artefacts,
            Err(error) => return (Err(error), tracer),
        };
        let mut vm = Vm::new(
            &program,
            &analysed,
            &self.std,
            interns,
            &self.config,
            self.shell.clone(),
            tracer,
        );
        let result = vm.execute();
        (result, vm.into_tracer())
    }
}
