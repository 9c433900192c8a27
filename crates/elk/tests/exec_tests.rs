//! End-to-end execution: trees through analysis, generation, and the VM.

mod common;

use common::{Tb, run, run_value, std_bindings};
use elk::{BinaryOp, ErrorKind, Executor, UnaryOp, Value};
use pretty_assertions::assert_eq;

#[test]
fn let_and_arithmetic() {
    // let x = 1 + 2; x
    let mut tb = Tb::new();
    let sum = {
        let one = tb.int(1);
        let two = tb.int(2);
        tb.bin(BinaryOp::Add, one, two)
    };
    let let_x = tb.let_("x", sum);
    let x = tb.var("x");
    let result = run_value(&mut tb, vec![let_x, x]);
    assert!(result.equals(&Value::Int(3)));
}

#[test]
fn list_indexing_and_out_of_range() {
    // let xs = [10, 20, 30]; xs[1]
    let mut tb = Tb::new();
    let items = vec![tb.int(10), tb.int(20), tb.int(30)];
    let list = tb.list(items);
    let let_xs = tb.let_("xs", list);
    let xs = tb.var("xs");
    let one = tb.int(1);
    let index = tb.index(xs, one);
    let result = run_value(&mut tb, vec![let_xs, index]);
    assert!(result.equals(&Value::Int(20)));

    // xs[5] raises a not-found error naming the index.
    let mut tb = Tb::new();
    let items = vec![tb.int(10), tb.int(20), tb.int(30)];
    let list = tb.list(items);
    let let_xs = tb.let_("xs", list);
    let xs = tb.var("xs");
    let five = tb.int(5);
    let index = tb.index(xs, five);
    let err = run(&mut tb, vec![let_xs, index]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::NotFound);
    assert!(err.error.message.contains('5'));
}

/// Builds `fn sum(a, b=5, *rest) => a + b + len(rest)`.
fn declare_sum(tb: &mut Tb) -> elk::ExprLoc {
    let params = {
        let five = tb.int(5);
        vec![
            tb.param("a"),
            tb.param_default("b", five),
            tb.param_variadic("rest"),
        ]
    };
    let body = {
        let a = tb.var("a");
        let b = tb.var("b");
        let rest = tb.var("rest");
        let len_rest = tb.call("len", vec![rest]);
        let a_plus_b = tb.bin(BinaryOp::Add, a, b);
        tb.bin(BinaryOp::Add, a_plus_b, len_rest)
    };
    tb.func("sum", params, body)
}

#[test]
fn defaults_fill_omitted_arguments() {
    let mut tb = Tb::new();
    let decl = declare_sum(&mut tb);
    let one = tb.int(1);
    let call = tb.call("sum", vec![one]);
    let result = run_value(&mut tb, vec![decl, call]);
    assert!(result.equals(&Value::Int(6)));
}

#[test]
fn variadic_tail_collapses_into_a_list() {
    let mut tb = Tb::new();
    let decl = declare_sum(&mut tb);
    let args = vec![tb.int(1), tb.int(2), tb.int(3), tb.int(4)];
    let call = tb.call("sum", args);
    let result = run_value(&mut tb, vec![decl, call]);
    assert!(result.equals(&Value::Int(5)));
}

#[test]
fn missing_required_argument_reports_arity() {
    let mut tb = Tb::new();
    let decl = declare_sum(&mut tb);
    let call = tb.call("sum", vec![]);
    let err = run(&mut tb, vec![decl, call]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::WrongArguments);
    assert!(err.error.message.contains('3'));
    assert!(err.error.message.contains('0'));
    assert!(err.error.message.contains("variadic"));
}

/// Builds `fn fact(n) => if n <= 1 { 1 } else { n * fact(n - 1) }; fact(5)`.
fn factorial_tree(tb: &mut Tb) -> Vec<elk::ExprLoc> {
    let body = {
        let n = tb.var("n");
        let one = tb.int(1);
        let cond = tb.bin(BinaryOp::LessEqual, n, one);
        let base = tb.int(1);
        let n2 = tb.var("n");
        let n3 = tb.var("n");
        let one2 = tb.int(1);
        let n_minus = tb.bin(BinaryOp::Sub, n3, one2);
        let rec = tb.call("fact", vec![n_minus]);
        let product = tb.bin(BinaryOp::Mul, n2, rec);
        tb.if_(cond, base, Some(product))
    };
    let param = vec![tb.param("n")];
    let decl = tb.func("fact", param, body);
    let five = tb.int(5);
    let call = tb.call("fact", vec![five]);
    vec![decl, call]
}

#[test]
fn recursive_factorial_preserves_stack_across_frames() {
    let mut tb = Tb::new();
    let body = factorial_tree(&mut tb);
    let result = run_value(&mut tb, body);
    assert!(result.equals(&Value::Int(120)));
}

#[test]
fn one_page_per_function() {
    let mut tb = Tb::new();
    let body = factorial_tree(&mut tb);
    let mut tree = tb.module("main", Vec::new(), body);
    let executor = Executor::new(std_bindings());
    let (_, program) = executor.compile(&tb.interns, &mut tree).unwrap();
    // Exactly one page for the one declared function, however many call
    // sites and recursive frames there are.
    assert_eq!(program.page_count(), 1);
}

#[test]
fn pipeline_threads_value_into_std_call() {
    // [1, 2, 3] | map => &x: x * 2
    let mut tb = Tb::new();
    let items = vec![tb.int(1), tb.int(2), tb.int(3)];
    let list = tb.list(items);
    let closure_body = {
        let x = tb.var("x");
        let two = tb.int(2);
        tb.bin(BinaryOp::Mul, x, two)
    };
    let closure = tb.closure(&["x"], closure_body);
    let map_call = tb.call_with_closure("map", vec![], closure);
    let piped = tb.pipe(list, map_call);
    let result = run_value(&mut tb, vec![piped]);

    let Value::List(items) = result else { panic!("expected a list") };
    let items = items.borrow();
    assert_eq!(items.len(), 3);
    assert!(items[0].equals(&Value::Int(2)));
    assert!(items[1].equals(&Value::Int(4)));
    assert!(items[2].equals(&Value::Int(6)));
}

#[test]
fn closures_capture_enclosing_variables() {
    // let n = 10; [1, 2] | map => &x: x + n
    let mut tb = Tb::new();
    let ten = tb.int(10);
    let let_n = tb.let_("n", ten);
    let items = vec![tb.int(1), tb.int(2)];
    let list = tb.list(items);
    let closure_body = {
        let x = tb.var("x");
        let n = tb.var("n");
        tb.bin(BinaryOp::Add, x, n)
    };
    let closure = tb.closure(&["x"], closure_body);
    let map_call = tb.call_with_closure("map", vec![], closure);
    let piped = tb.pipe(list, map_call);
    let result = run_value(&mut tb, vec![let_n, piped]);

    let Value::List(items) = result else { panic!("expected a list") };
    let items = items.borrow();
    assert!(items[0].equals(&Value::Int(11)));
    assert!(items[1].equals(&Value::Int(12)));
}

#[test]
fn while_loop_with_reassignment() {
    // let i = 0; while i < 5 { i = i + 1 }; i
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let let_i = tb.let_("i", zero);
    let cond = {
        let i = tb.var("i");
        let five = tb.int(5);
        tb.bin(BinaryOp::Less, i, five)
    };
    let body = {
        let i = tb.var("i");
        let i2 = tb.var("i");
        let one = tb.int(1);
        let next = tb.bin(BinaryOp::Add, i2, one);
        let assign = tb.assign(i, next);
        tb.block(vec![assign])
    };
    let loop_ = tb.while_(cond, body);
    let i = tb.var("i");
    let result = run_value(&mut tb, vec![let_i, loop_, i]);
    assert!(result.equals(&Value::Int(5)));
}

#[test]
fn for_loop_over_list_and_range() {
    // let total = 0; for x in [1, 2, 3] { total = total + x }; total
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let let_total = tb.let_("total", zero);
    let items = vec![tb.int(1), tb.int(2), tb.int(3)];
    let list = tb.list(items);
    let body = {
        let total = tb.var("total");
        let total2 = tb.var("total");
        let x = tb.var("x");
        let sum = tb.bin(BinaryOp::Add, total2, x);
        let assign = tb.assign(total, sum);
        tb.block(vec![assign])
    };
    let loop_ = tb.for_(&["x"], list, body);
    let total = tb.var("total");
    let result = run_value(&mut tb, vec![let_total, loop_, total]);
    assert!(result.equals(&Value::Int(6)));

    // for i in 0..4 over a range
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let let_total = tb.let_("total", zero);
    let from = tb.int(0);
    let to = tb.int(4);
    let range = tb.range(from, to);
    let body = {
        let total = tb.var("total");
        let total2 = tb.var("total");
        let i = tb.var("i");
        let sum = tb.bin(BinaryOp::Add, total2, i);
        let assign = tb.assign(total, sum);
        tb.block(vec![assign])
    };
    let loop_ = tb.for_(&["i"], range, body);
    let total = tb.var("total");
    let result = run_value(&mut tb, vec![let_total, loop_, total]);
    assert!(result.equals(&Value::Int(6)));
}

#[test]
fn break_exits_innermost_loop() {
    // let n = 0; for x in 0..10 { if x == 3 { break }; n = n + 1 }; n
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let let_n = tb.let_("n", zero);
    let from = tb.int(0);
    let to = tb.int(10);
    let range = tb.range(from, to);
    let body = {
        let x = tb.var("x");
        let three = tb.int(3);
        let cond = tb.bin(BinaryOp::Equal, x, three);
        let brk = tb.brk();
        let brk_block = tb.block(vec![brk]);
        let if_ = tb.if_(cond, brk_block, None);
        let n = tb.var("n");
        let n2 = tb.var("n");
        let one = tb.int(1);
        let next = tb.bin(BinaryOp::Add, n2, one);
        let assign = tb.assign(n, next);
        tb.block(vec![if_, assign])
    };
    let loop_ = tb.for_(&["x"], range, body);
    let n = tb.var("n");
    let result = run_value(&mut tb, vec![let_n, loop_, n]);
    assert!(result.equals(&Value::Int(3)));
}

#[test]
fn dict_tuple_unpack_in_for() {
    // for (k, v) in [("a", 1), ("b", 2)] { total = total + v }
    let mut tb = Tb::new();
    let zero = tb.int(0);
    let let_total = tb.let_("total", zero);
    let pair1 = {
        let a = tb.str_("a");
        let one = tb.int(1);
        tb.tuple(vec![a, one])
    };
    let pair2 = {
        let b = tb.str_("b");
        let two = tb.int(2);
        tb.tuple(vec![b, two])
    };
    let list = tb.list(vec![pair1, pair2]);
    let body = {
        let total = tb.var("total");
        let total2 = tb.var("total");
        let v = tb.var("v");
        let sum = tb.bin(BinaryOp::Add, total2, v);
        let assign = tb.assign(total, sum);
        tb.block(vec![assign])
    };
    let loop_ = tb.for_(&["k", "v"], list, body);
    let total = tb.var("total");
    let result = run_value(&mut tb, vec![let_total, loop_, total]);
    assert!(result.equals(&Value::Int(3)));
}

#[test]
fn dict_literal_and_lookup() {
    let mut tb = Tb::new();
    let key = tb.str_("a");
    let one = tb.int(1);
    let dict = tb.dict(vec![(key, one)]);
    let let_d = tb.let_("d", dict);
    let d = tb.var("d");
    let key2 = tb.str_("a");
    let lookup = tb.index(d, key2);
    let result = run_value(&mut tb, vec![let_d, lookup]);
    assert!(result.equals(&Value::Int(1)));

    // Missing key raises not-found.
    let mut tb = Tb::new();
    let key = tb.str_("a");
    let one = tb.int(1);
    let dict = tb.dict(vec![(key, one)]);
    let let_d = tb.let_("d", dict);
    let d = tb.var("d");
    let missing = tb.str_("zzz");
    let lookup = tb.index(d, missing);
    let err = run(&mut tb, vec![let_d, lookup]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::NotFound);
    assert!(err.error.message.contains("zzz"));
}

#[test]
fn structs_construct_and_mutate() {
    // struct Point { x, y }; let p = new Point(1, 2); p.y = 5; p.x + p.y
    let mut tb = Tb::new();
    let decl = tb.struct_("Point", &["x", "y"]);
    let one = tb.int(1);
    let two = tb.int(2);
    let new_point = tb.new_(&["Point"], vec![one, two]);
    let let_p = tb.let_("p", new_point);
    let p1 = tb.var("p");
    let target = tb.field(p1, "y");
    let five = tb.int(5);
    let assign = tb.assign(target, five);
    let p2 = tb.var("p");
    let px = tb.field(p2, "x");
    let p3 = tb.var("p");
    let py = tb.field(p3, "y");
    let sum = tb.bin(BinaryOp::Add, px, py);
    let result = run_value(&mut tb, vec![decl, let_p, assign, sum]);
    assert!(result.equals(&Value::Int(6)));
}

#[test]
fn std_struct_fallback_for_new() {
    let mut tb = Tb::new();
    let one = tb.int(1);
    let boxed = tb.new_(&["Box"], vec![one]);
    let result = run_value(&mut tb, vec![boxed]);
    let Value::List(items) = result else { panic!("expected the Box fixture to build a list") };
    assert!(items.borrow()[0].equals(&Value::Int(1)));
}

#[test]
fn string_interpolation_renders_values() {
    // "x = ${1 + 2}"
    let mut tb = Tb::new();
    let text = tb.interp_text("x = ");
    let one = tb.int(1);
    let two = tb.int(2);
    let sum = tb.bin(BinaryOp::Add, one, two);
    let interp = tb.interp(vec![text, elk::StringPart::Interpolation(sum)]);
    let result = run_value(&mut tb, vec![interp]);
    assert!(result.equals(&Value::string("x = 3")));
}

#[test]
fn namespaced_std_function_resolves() {
    let mut tb = Tb::new();
    let arg = tb.str_("abc");
    let call = tb.call_path(&["str"], "upper", vec![arg]);
    let result = run_value(&mut tb, vec![call]);
    assert!(result.equals(&Value::string("ABC")));
}

#[test]
fn function_reference_invoked_through_call_builtin() {
    // fn double(n) => n * 2; call(&double, 21)
    let mut tb = Tb::new();
    let body = {
        let n = tb.var("n");
        let two = tb.int(2);
        tb.bin(BinaryOp::Mul, n, two)
    };
    let params = vec![tb.param("n")];
    let decl = tb.func("double", params, body);
    let reference = tb.func_ref("double");
    let twenty_one = tb.int(21);
    let call = tb.call("call", vec![reference, twenty_one]);
    let result = run_value(&mut tb, vec![decl, call]);
    assert!(result.equals(&Value::Int(42)));
}

#[test]
fn closure_builtin_invokes_attached_closure() {
    // fn twice() => closure(5) + closure(7), called with &x: x * 10
    let mut tb = Tb::new();
    let body = {
        let five = tb.int(5);
        let first = tb.call("closure", vec![five]);
        let seven = tb.int(7);
        let second = tb.call("closure", vec![seven]);
        tb.bin(BinaryOp::Add, first, second)
    };
    let decl = tb.func_taking_closure("twice", vec![], body);
    let closure_body = {
        let x = tb.var("x");
        let ten = tb.int(10);
        tb.bin(BinaryOp::Mul, x, ten)
    };
    let closure = tb.closure(&["x"], closure_body);
    let call = tb.call_with_closure("twice", vec![], closure);
    let result = run_value(&mut tb, vec![decl, call]);
    assert!(result.equals(&Value::Int(120)));
}

#[test]
fn error_builtin_raises_runtime_error() {
    let mut tb = Tb::new();
    let message = tb.str_("boom");
    let call = tb.call("error", vec![message]);
    let err = run(&mut tb, vec![call]).unwrap_err();
    assert_eq!(err.error.kind, ErrorKind::Runtime);
    assert_eq!(err.error.message, "boom");
}

#[test]
fn runaway_recursion_hits_depth_guard() {
    // fn forever() => forever()
    let mut tb = Tb::new();
    let rec = tb.call("forever", vec![]);
    let decl = tb.func("forever", vec![], rec);
    let call = tb.call("forever", vec![]);
    let err = run(&mut tb, vec![decl, call]).unwrap_err();
    assert!(err.error.message.contains("call depth"));
}

#[test]
fn counting_tracer_observes_dispatch_and_calls() {
    let mut tb = Tb::new();
    let body = factorial_tree(&mut tb);
    let mut tree = tb.module("main", Vec::new(), body);
    let mut executor = Executor::new(std_bindings());
    let (result, tracer) = executor.execute_traced(&tb.interns, &mut tree, elk::CountingTracer::new());
    assert!(result.unwrap().equals(&Value::Int(120)));
    // fact(5) pushes five frames.
    assert_eq!(tracer.calls, 5);
    assert!(tracer.total() > 0);
    assert!(tracer.opcodes.contains_key(&elk::Op::Mul));
}

#[test]
fn unary_and_logic_operators() {
    let mut tb = Tb::new();
    let five = tb.int(5);
    let negated = tb.unary(UnaryOp::Negate, five);
    let result = run_value(&mut tb, vec![negated]);
    assert!(result.equals(&Value::Int(-5)));

    let mut tb = Tb::new();
    let t = tb.boolean(true);
    let f = tb.boolean(false);
    let and = tb.bin(BinaryOp::And, t, f);
    let not = tb.unary(UnaryOp::Not, and);
    let result = run_value(&mut tb, vec![not]);
    assert!(result.equals(&Value::Bool(true)));
}

#[test]
fn contains_operator_on_ranges() {
    let mut tb = Tb::new();
    let three = tb.int(3);
    let from = tb.int(0);
    let to = tb.int(5);
    let range = tb.range(from, to);
    let contains = tb.bin(BinaryOp::In, three, range);
    let result = run_value(&mut tb, vec![contains]);
    assert!(result.equals(&Value::Bool(true)));
}

#[test]
fn if_expression_yields_branch_value() {
    let mut tb = Tb::new();
    let cond = tb.boolean(false);
    let then = tb.int(1);
    let orelse = tb.int(2);
    let if_ = tb.if_(cond, then, Some(orelse));
    let result = run_value(&mut tb, vec![if_]);
    assert!(result.equals(&Value::Int(2)));

    // Without an else branch the if expression is nil.
    let mut tb = Tb::new();
    let cond = tb.boolean(false);
    let then = tb.int(1);
    let if_ = tb.if_(cond, then, None);
    let result = run_value(&mut tb, vec![if_]);
    assert!(result.equals(&Value::Nil));
}

#[test]
fn return_short_circuits_function_body() {
    // fn pick(n) => { if n > 0 { return 1 }; 2 }
    let mut tb = Tb::new();
    let body = {
        let n = tb.var("n");
        let zero = tb.int(0);
        let cond = tb.bin(BinaryOp::Greater, n, zero);
        let one = tb.int(1);
        let ret = tb.ret(Some(one));
        let ret_block = tb.block(vec![ret]);
        let if_ = tb.if_(cond, ret_block, None);
        let two = tb.int(2);
        tb.block(vec![if_, two])
    };
    let params = vec![tb.param("n")];
    let decl = tb.func("pick", params, body);
    let five = tb.int(5);
    let call_pos = tb.call("pick", vec![five]);
    let result = run_value(&mut tb, vec![decl.clone(), call_pos]);
    assert!(result.equals(&Value::Int(1)));

    let mut tb2 = Tb::new();
    let body = {
        let n = tb2.var("n");
        let zero = tb2.int(0);
        let cond = tb2.bin(BinaryOp::Greater, n, zero);
        let one = tb2.int(1);
        let ret = tb2.ret(Some(one));
        let ret_block = tb2.block(vec![ret]);
        let if_ = tb2.if_(cond, ret_block, None);
        let two = tb2.int(2);
        tb2.block(vec![if_, two])
    };
    let params = vec![tb2.param("n")];
    let decl = tb2.func("pick", params, body);
    let minus = tb2.int(-3);
    let call_neg = tb2.call("pick", vec![minus]);
    let result = run_value(&mut tb2, vec![decl, call_neg]);
    assert!(result.equals(&Value::Int(2)));
}
