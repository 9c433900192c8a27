//! Shared test support: an expression-tree builder standing in for the
//! external parser, plus a standard-bindings fixture.
#![allow(dead_code)]

use elk::{
    BinaryOp, CallExpr, ClosureExpr, CodeRange, Diagnostic, Executor, Expr, ExprLoc, FunctionDef, ImportSpec,
    Interns, Keyword, Literal, Param, RuntimeError, StdBindings, StdFunction, StdStruct, StringId, StringPart,
    UnaryOp, Value,
};

/// Builds expression trees the way the parser would: every node gets a
/// distinct source range so diagnostics can be asserted against.
pub struct Tb {
    pub interns: Interns,
    pos: u32,
}

impl Tb {
    pub fn new() -> Self {
        Self {
            interns: Interns::new(),
            pos: 0,
        }
    }

    pub fn s(&mut self, text: &str) -> StringId {
        self.interns.intern(text)
    }

    fn loc(&mut self, expr: Expr) -> ExprLoc {
        self.pos += 2;
        ExprLoc::new(CodeRange::new(self.pos, self.pos + 1), expr)
    }

    pub fn module(&mut self, name: &str, imports: Vec<ImportSpec>, body: Vec<ExprLoc>) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::Module { name, imports, body })
    }

    pub fn import(&mut self, path: &[&str]) -> ImportSpec {
        ImportSpec {
            path: path.iter().map(|p| self.s(p)).collect(),
            resolved: None,
        }
    }

    pub fn int(&mut self, v: i64) -> ExprLoc {
        self.loc(Expr::Literal(Literal::Int(v)))
    }

    pub fn float(&mut self, v: f64) -> ExprLoc {
        self.loc(Expr::Literal(Literal::Float(v)))
    }

    pub fn boolean(&mut self, v: bool) -> ExprLoc {
        self.loc(Expr::Literal(Literal::Bool(v)))
    }

    pub fn nil(&mut self) -> ExprLoc {
        self.loc(Expr::Literal(Literal::Nil))
    }

    pub fn str_(&mut self, text: &str) -> ExprLoc {
        let id = self.s(text);
        self.loc(Expr::Literal(Literal::Str(id)))
    }

    pub fn var(&mut self, name: &str) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::Variable { name, resolved: None })
    }

    pub fn let_(&mut self, name: &str, value: ExprLoc) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::Let {
            name,
            value: Box::new(value),
            slot: None,
        })
    }

    pub fn bin(&mut self, op: BinaryOp, left: ExprLoc, right: ExprLoc) -> ExprLoc {
        self.loc(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn assign(&mut self, left: ExprLoc, right: ExprLoc) -> ExprLoc {
        self.bin(BinaryOp::Assign, left, right)
    }

    pub fn pipe(&mut self, left: ExprLoc, right: ExprLoc) -> ExprLoc {
        self.bin(BinaryOp::Pipe, left, right)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprLoc) -> ExprLoc {
        self.loc(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn call(&mut self, name: &str, args: Vec<ExprLoc>) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::Call(CallExpr::new(Vec::new(), name, args)))
    }

    pub fn call_path(&mut self, path: &[&str], name: &str, args: Vec<ExprLoc>) -> ExprLoc {
        let path = path.iter().map(|p| self.s(p)).collect();
        let name = self.s(name);
        self.loc(Expr::Call(CallExpr::new(path, name, args)))
    }

    pub fn call_with_closure(&mut self, name: &str, args: Vec<ExprLoc>, closure: ExprLoc) -> ExprLoc {
        let name = self.s(name);
        let mut call = CallExpr::new(Vec::new(), name, args);
        call.closure = Some(Box::new(closure));
        self.loc(Expr::Call(call))
    }

    pub fn closure(&mut self, params: &[&str], body: ExprLoc) -> ExprLoc {
        let name = self.s("<closure>");
        let params = params.iter().map(|p| Param::required(self.s(p))).collect();
        let def = FunctionDef::new(name, params, body);
        self.loc(Expr::Closure(ClosureExpr {
            def,
            captured: Vec::new(),
        }))
    }

    pub fn param(&mut self, name: &str) -> Param {
        Param::required(self.s(name))
    }

    pub fn param_default(&mut self, name: &str, default: ExprLoc) -> Param {
        Param {
            name: self.s(name),
            default: Some(default),
            variadic: false,
        }
    }

    pub fn param_variadic(&mut self, name: &str) -> Param {
        Param {
            name: self.s(name),
            default: None,
            variadic: true,
        }
    }

    pub fn func(&mut self, name: &str, params: Vec<Param>, body: ExprLoc) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::Function(FunctionDef::new(name, params, body)))
    }

    pub fn func_taking_closure(&mut self, name: &str, params: Vec<Param>, body: ExprLoc) -> ExprLoc {
        let name = self.s(name);
        let mut def = FunctionDef::new(name, params, body);
        def.accepts_closure = true;
        self.loc(Expr::Function(def))
    }

    pub fn block(&mut self, stmts: Vec<ExprLoc>) -> ExprLoc {
        self.loc(Expr::Block(stmts))
    }

    pub fn if_(&mut self, condition: ExprLoc, then: ExprLoc, orelse: Option<ExprLoc>) -> ExprLoc {
        self.loc(Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            orelse: orelse.map(Box::new),
        })
    }

    pub fn while_(&mut self, condition: ExprLoc, body: ExprLoc) -> ExprLoc {
        self.loc(Expr::While {
            condition: Box::new(condition),
            body: Box::new(body),
        })
    }

    pub fn for_(&mut self, idents: &[&str], iterable: ExprLoc, body: ExprLoc) -> ExprLoc {
        let idents = idents.iter().map(|i| self.s(i)).collect();
        self.loc(Expr::For {
            idents,
            iterable: Box::new(iterable),
            body: Box::new(body),
            slots: Vec::new(),
        })
    }

    pub fn list(&mut self, items: Vec<ExprLoc>) -> ExprLoc {
        self.loc(Expr::List(items))
    }

    pub fn tuple(&mut self, items: Vec<ExprLoc>) -> ExprLoc {
        self.loc(Expr::Tuple(items))
    }

    pub fn dict(&mut self, pairs: Vec<(ExprLoc, ExprLoc)>) -> ExprLoc {
        self.loc(Expr::Dictionary(pairs))
    }

    pub fn index(&mut self, object: ExprLoc, index: ExprLoc) -> ExprLoc {
        self.loc(Expr::Indexer {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    pub fn field(&mut self, object: ExprLoc, name: &str) -> ExprLoc {
        let field = self.s(name);
        self.loc(Expr::FieldAccess {
            object: Box::new(object),
            field,
        })
    }

    pub fn range(&mut self, from: ExprLoc, to: ExprLoc) -> ExprLoc {
        self.loc(Expr::Range {
            from: Some(Box::new(from)),
            to: Some(Box::new(to)),
        })
    }

    pub fn ret(&mut self, value: Option<ExprLoc>) -> ExprLoc {
        self.loc(Expr::Keyword(Keyword::Return(value.map(Box::new))))
    }

    pub fn brk(&mut self) -> ExprLoc {
        self.loc(Expr::Keyword(Keyword::Break))
    }

    pub fn new_(&mut self, path: &[&str], args: Vec<ExprLoc>) -> ExprLoc {
        let path = path.iter().map(|p| self.s(p)).collect();
        self.loc(Expr::New {
            path,
            args,
            target: None,
        })
    }

    pub fn struct_(&mut self, name: &str, fields: &[&str]) -> ExprLoc {
        let name = self.s(name);
        let fields = fields.iter().map(|f| self.s(f)).collect();
        self.loc(Expr::Struct { name, fields })
    }

    pub fn func_ref(&mut self, name: &str) -> ExprLoc {
        let name = self.s(name);
        self.loc(Expr::FunctionReference {
            path: Vec::new(),
            name,
            target: None,
        })
    }

    pub fn interp(&mut self, parts: Vec<StringPart>) -> ExprLoc {
        self.loc(Expr::StringInterpolation(parts))
    }

    pub fn interp_text(&mut self, text: &str) -> StringPart {
        StringPart::Literal(self.s(text))
    }
}

/// The host bindings the tests run against: a few representative standard
/// functions plus one standard struct for the `new` fallback.
pub fn std_bindings() -> StdBindings {
    let mut bindings = StdBindings::new();
    bindings.register(StdFunction::new(
        "len",
        1,
        1,
        Box::new(|_env, args| match &args[0] {
            Value::List(items) => Ok(Value::Int(items.borrow().len() as i64)),
            Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Dict(map) => Ok(Value::Int(map.borrow().len() as i64)),
            other => Err(RuntimeError::new(
                elk::ErrorKind::InvalidOperation,
                format!("len is not defined for {}", other.type_tag()),
            )),
        }),
    ));
    bindings.register(
        StdFunction::new(
            "map",
            1,
            1,
            Box::new(|env, mut args| {
                let closure = args
                    .pop()
                    .filter(|_| args.len() == 1)
                    .ok_or_else(|| RuntimeError::new(elk::ErrorKind::ExpectedClosure, "map requires a closure"))?;
                let iterable = args.pop().expect("map arity checked");
                let mut iter = iterable.make_iter()?;
                let mut out = Vec::new();
                while let Some(item) = iter.next() {
                    out.push(env.call_value(&closure, vec![item])?);
                }
                Ok(Value::list(out))
            }),
        )
        .with_closure(),
    );
    bindings.register(StdFunction::new(
        "str::upper",
        1,
        1,
        Box::new(|_env, args| match &args[0] {
            Value::Str(s) => Ok(Value::string(s.to_uppercase())),
            other => Err(RuntimeError::new(
                elk::ErrorKind::InvalidCast,
                format!("cannot uppercase {}", other.type_tag()),
            )),
        }),
    ));
    bindings.register_struct(StdStruct::new(
        "Box",
        1,
        1,
        Box::new(|args| Ok(Value::list(args))),
    ));
    bindings
}

/// Wraps statements in a root module and runs them through a fresh
/// executor, returning the final statement's value.
pub fn run(tb: &mut Tb, body: Vec<ExprLoc>) -> Result<Value, Diagnostic> {
    let mut tree = tb.module("main", Vec::new(), body);
    let mut executor = Executor::new(std_bindings());
    executor.execute(&tb.interns, &mut tree)
}

pub fn run_value(tb: &mut Tb, body: Vec<ExprLoc>) -> Value {
    run(tb, body).expect("execution should succeed")
}
