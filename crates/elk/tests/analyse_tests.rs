//! Analyser behaviour: classification, resolution, captures, and the
//! rewrites observable on the annotated tree.

mod common;

use common::{Tb, run, std_bindings};
use elk::{Analyser, BinaryOp, CallType, ErrorKind, Expr, ExprLoc, Literal, Value};
use pretty_assertions::assert_eq;

fn analyse(tb: &Tb, tree: &mut ExprLoc) -> Result<elk::AnalysedProgram, elk::RuntimeError> {
    let std = std_bindings();
    let mut analyser = Analyser::new(&tb.interns, &std);
    analyser.analyse(tree)
}

/// Finds the first call expression in a statement list, depth-first.
fn find_call<'t>(body: &'t [ExprLoc]) -> Option<&'t elk::CallExpr> {
    fn walk(node: &ExprLoc) -> Option<&elk::CallExpr> {
        match &node.expr {
            Expr::Call(call) => Some(call),
            Expr::Binary { left, right, .. } => walk(left).or_else(|| walk(right)),
            Expr::Let { value, .. } => walk(value),
            _ => None,
        }
    }
    body.iter().find_map(walk)
}

#[test]
fn every_call_is_classified() {
    let mut tb = Tb::new();
    let arg = tb.list(vec![]);
    let std_call = tb.call("len", vec![arg]);
    let program_call = tb.call("definitely-a-program", vec![]);
    let cd = tb.call("cd", vec![]);
    let mut tree = tb.module("main", Vec::new(), vec![std_call, program_call, cd]);
    analyse(&tb, &mut tree).unwrap();

    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let kinds: Vec<CallType> = body
        .iter()
        .map(|stmt| match &stmt.expr {
            Expr::Call(call) => call.call_type.expect("classification missing"),
            other => panic!("expected a call, found {other:?}"),
        })
        .collect();
    assert!(matches!(kinds[0], CallType::Std(_)));
    assert_eq!(kinds[1], CallType::Program);
    assert_eq!(kinds[2], CallType::BuiltInCd);
}

#[test]
fn pipe_into_function_inserts_argument_zero() {
    // [9] | len: the piped list becomes the only argument.
    let mut tb = Tb::new();
    let nine = tb.int(9);
    let list = tb.list(vec![nine]);
    let len_call = tb.call("len", vec![]);
    let piped = tb.pipe(list, len_call);
    let mut tree = tb.module("main", Vec::new(), vec![piped]);
    analyse(&tb, &mut tree).unwrap();

    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let call = find_call(body).expect("pipe rewrote into a call");
    assert!(matches!(call.call_type, Some(CallType::Std(_))));
    assert_eq!(call.args.len(), 1);
    assert!(matches!(call.args[0].expr, Expr::List(_)));
    assert!(call.piped_value.is_none());
}

#[test]
fn pipe_into_program_becomes_stdin_feed() {
    // "hi" | cat: the producer is stored as the piped-in value, not an
    // argument.
    let mut tb = Tb::new();
    let text = tb.str_("hi");
    let cat = tb.call("cat", vec![]);
    let piped = tb.pipe(text, cat);
    let mut tree = tb.module("main", Vec::new(), vec![piped]);
    analyse(&tb, &mut tree).unwrap();

    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let call = find_call(body).expect("pipe rewrote into a call");
    assert_eq!(call.call_type, Some(CallType::Program));
    assert!(call.args.is_empty());
    let piped_value = call.piped_value.as_ref().expect("piped value stored on the program");
    assert!(matches!(piped_value.expr, Expr::Literal(Literal::Str(_))));
}

#[test]
fn variadic_rewrite_builds_one_trailing_list() {
    // fn f(a, *rest) => 0, called f(1, 2, 3, 4): args become [1, [2, 3, 4]].
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let params = vec![tb.param("a"), tb.param_variadic("rest")];
    let decl = tb.func("f", params, zero);
    let args = vec![tb.int(1), tb.int(2), tb.int(3), tb.int(4)];
    let call = tb.call("f", args);
    let mut tree = tb.module("main", Vec::new(), vec![decl, call]);
    analyse(&tb, &mut tree).unwrap();

    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let call = find_call(body).expect("call present");
    assert_eq!(call.args.len(), 2);
    let Expr::List(tail) = &call.args[1].expr else { panic!("expected the variadic tail list") };
    assert_eq!(tail.len(), 3);
}

#[test]
fn unknown_variable_is_not_found() {
    let mut tb = Tb::new();
    let ghost = tb.var("ghost");
    let err = run(&mut tb, vec![ghost]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::NotFound);
    assert!(err.error.message.contains("ghost"));
}

#[test]
fn dollar_variables_skip_the_scope_check() {
    let mut tb = Tb::new();
    let var = tb.var("$ELK_TEST_UNSET_VARIABLE");
    let result = run(&mut tb, vec![var]).unwrap();
    assert!(result.equals(&Value::Nil));
}

#[test]
fn assignment_to_unknown_variable_fails() {
    let mut tb = Tb::new();
    let target = tb.var("missing");
    let one = tb.int(1);
    let assign = tb.assign(target, one);
    let err = run(&mut tb, vec![assign]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::NotFound);
}

#[test]
fn assignment_to_non_place_is_invalid() {
    let mut tb = Tb::new();
    let left = tb.int(3);
    let right = tb.int(4);
    let assign = tb.assign(left, right);
    let err = run(&mut tb, vec![assign]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::InvalidAssignment);
}

#[test]
fn pipe_into_non_call_is_rejected() {
    let mut tb = Tb::new();
    let left = tb.int(1);
    let right = tb.int(2);
    let piped = tb.pipe(left, right);
    let err = run(&mut tb, vec![piped]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::Runtime);
    assert!(err.error.message.contains("pipe"));
}

#[test]
fn default_parameters_must_trail() {
    // fn bad(a = 1, b) => 0
    let mut tb = Tb::new();
    let one = tb.int(1);
    let zero = tb.int(0);
    let params = vec![tb.param_default("a", one), tb.param("b")];
    let decl = tb.func("bad", params, zero);
    let err = run(&mut tb, vec![decl]).unwrap_err();
    assert!(err.error.message.contains("invalid parameter ordering"));
}

#[test]
fn variadic_parameter_must_be_last() {
    // fn bad(*rest, a) => 0
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let params = vec![tb.param_variadic("rest"), tb.param("a")];
    let decl = tb.func("bad", params, zero);
    let err = run(&mut tb, vec![decl]).unwrap_err();
    assert!(err.error.message.contains("invalid parameter ordering"));
}

#[test]
fn duplicate_struct_fields_are_rejected() {
    let mut tb = Tb::new();
    let decl = tb.struct_("Pair", &["x", "x"]);
    let err = run(&mut tb, vec![decl]).unwrap_err();
    assert!(err.error.message.contains("duplicate field"));
}

#[test]
fn closure_on_a_program_call_is_unexpected() {
    let mut tb = Tb::new();
    let body = tb.int(0);
    let closure = tb.closure(&["x"], body);
    let call = tb.call_with_closure("some-program", vec![], closure);
    let err = run(&mut tb, vec![call]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::UnexpectedClosure);
}

#[test]
fn closure_builtin_needs_a_closure_taking_function() {
    // fn plain() => closure(1), where plain declares no closure.
    let mut tb = Tb::new();
    let one = tb.int(1);
    let body = tb.call("closure", vec![one]);
    let decl = tb.func("plain", vec![], body);
    let call = tb.call("plain", vec![]);
    let err = run(&mut tb, vec![decl, call]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::ExpectedClosure);
}

#[test]
fn module_path_resolution_failure() {
    let mut tb = Tb::new();
    let call = tb.call_path(&["no", "such", "module"], "f", vec![]);
    let err = run(&mut tb, vec![call]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::ModuleNotFound);
    assert!(err.error.message.contains("no::such::module"));
}

#[test]
fn import_cycles_terminate_and_share_functions() {
    // module a (imports b) { fn fa() => fb() }
    // module b (imports a) { fn fb() => 7 }
    // a::fa() == 7
    let mut tb = Tb::new();
    let import_b = tb.import(&["b"]);
    let fa_body = tb.call("fb", vec![]);
    let fa = tb.func("fa", vec![], fa_body);
    let module_a = tb.module("a", vec![import_b], vec![fa]);

    let import_a = tb.import(&["a"]);
    let seven = tb.int(7);
    let fb = tb.func("fb", vec![], seven);
    let module_b = tb.module("b", vec![import_a], vec![fb]);

    let call = tb.call_path(&["a"], "fa", vec![]);
    let mut tree = tb.module("main", Vec::new(), vec![module_a, module_b, call]);
    let mut executor = elk::Executor::new(std_bindings());
    let result = executor.execute(&tb.interns, &mut tree).unwrap();
    assert!(result.equals(&Value::Int(7)));
}

#[test]
fn closure_captures_are_recorded_on_the_tree() {
    // let n = 1; [2] | map => &x: x + n. n must appear in the captured set.
    let mut tb = Tb::new();
    let one = tb.int(1);
    let let_n = tb.let_("n", one);
    let two = tb.int(2);
    let list = tb.list(vec![two]);
    let closure_body = {
        let x = tb.var("x");
        let n = tb.var("n");
        tb.bin(BinaryOp::Add, x, n)
    };
    let closure = tb.closure(&["x"], closure_body);
    let map_call = tb.call_with_closure("map", vec![], closure);
    let piped = tb.pipe(list, map_call);
    let n_name = tb.s("n");
    let mut tree = tb.module("main", Vec::new(), vec![let_n, piped]);
    analyse(&tb, &mut tree).unwrap();

    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let call = find_call(body).expect("map call present");
    let closure = call.closure.as_ref().expect("closure attached");
    let Expr::Closure(closure) = &closure.expr else { panic!("expected a closure") };
    assert_eq!(closure.captured.len(), 1);
    assert_eq!(closure.captured[0].name, n_name);
}

#[test]
fn analysis_errors_carry_the_failing_position() {
    let mut tb = Tb::new();
    let ghost = tb.var("ghost");
    let ghost_position = ghost.position;
    let err = run(&mut tb, vec![ghost]).unwrap_err();
    assert_eq!(err.position, ghost_position);
}

#[test]
fn function_reference_falls_back_to_program() {
    let mut tb = Tb::new();
    let reference = tb.func_ref("some-unknown-tool");
    let mut tree = tb.module("main", Vec::new(), vec![reference]);
    analyse(&tb, &mut tree).unwrap();
    let Expr::Module { body, .. } = &tree.expr else { unreachable!() };
    let Expr::FunctionReference { target, .. } = &body[0].expr else { panic!("expected a reference") };
    assert!(matches!(target, Some(elk::CallTarget::Program(_))));
}
