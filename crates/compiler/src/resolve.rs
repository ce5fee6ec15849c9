use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::error::CompileError;

/// Function id reserved for the top-level script body.
pub const SCRIPT_ID: usize = 0;

/// Discover the submission's entry point: the single top-level callable.
/// Callables are `function` declarations and bindings initialised with a
/// function or arrow expression. Exactly one must exist and it must take one parameter.
pub fn find_entry(program: &Program) -> Result<String, CompileError> {
    let mut found: Vec<(&str, usize)> = Vec::new();
    for stmt in &program.body {
        match stmt {
            Stmt::Function(f) => {
                if let Some(name) = &f.name {
                    found.push((name.as_str(), f.params.len()));
                }
            }
            Stmt::Var { decls, .. } => {
                for decl in decls {
                    if let Some(Expr::Function(f)) = &decl.init {
                        found.push((decl.name.as_str(), f.params.len()));
                    }
                }
            }
            _ => {}
        }
    }
    match found.as_slice() {
        [] => Err(CompileError::NoEntryPoint),
        [(name, 1)] => Ok(name.to_string()),
        [(name, arity)] => Err(CompileError::EntryArity {
            name: name.to_string(),
            found: *arity,
        }),
        many => Err(CompileError::AmbiguousEntryPoint(
            many.iter().map(|(n, _)| n.to_string()).collect(),
        )),
    }
}

/// Which bindings of each function are captured by a nested function and
/// therefore live in heap cells rather than plain stack slots.
#[derive(Debug, Default)]
pub struct Captures {
    boxed: HashMap<usize, HashSet<String>>,
}

impl Captures {
    pub fn boxed_in(&self, function_id: usize) -> HashSet<String> {
        self.boxed.get(&function_id).cloned().unwrap_or_default()
    }
}

pub fn analyze(program: &Program) -> Captures {
    let mut captures = Captures::default();
    visit_function(&mut captures, SCRIPT_ID, &[], &program.body, None);
    captures
}

/// Returns the names the function (or anything nested in it) references; records its boxed set.
fn visit_function(
    captures: &mut Captures,
    id: usize,
    params: &[Param],
    body: &[Stmt],
    expr_body: Option<&Expr>,
) -> HashSet<String> {
    let mut scan = Scan::default();
    for param in params {
        scan.declared.insert(param.name.clone());
        if let Some(default) = &param.default {
            scan.expr(default);
        }
    }
    for stmt in body {
        scan.stmt(stmt);
    }
    if let Some(expr) = expr_body {
        scan.expr(expr);
    }

    let mut nested_free = HashSet::new();
    for f in scan.nested {
        let free = match &f.body {
            Body::Block(stmts) => visit_function(captures, f.id, &f.params, stmts, None),
            Body::Expr(e) => visit_function(captures, f.id, &f.params, &[], Some(e)),
        };
        nested_free.extend(free);
    }

    let boxed: HashSet<String> = scan
        .declared
        .intersection(&nested_free)
        .cloned()
        .collect();
    captures.boxed.insert(id, boxed);

    // Over-approximate: names shadowed here still propagate outward, which only
    // boxes more bindings than strictly needed.
    scan.referenced.union(&nested_free).cloned().collect()
}

/// Declarations and references of one function body, not descending into nested functions.
#[derive(Default)]
struct Scan<'a> {
    declared: HashSet<String>,
    referenced: HashSet<String>,
    nested: Vec<&'a FunctionLit>,
}

impl<'a> Scan<'a> {
    fn stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Var { decls, .. } => {
                for decl in decls {
                    self.declared.insert(decl.name.clone());
                    if let Some(init) = &decl.init {
                        self.expr(init);
                    }
                }
            }
            Stmt::Function(f) => {
                if let Some(name) = &f.name {
                    self.declared.insert(name.clone());
                }
                self.nested.push(f);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                self.stmt(then);
                if let Some(s) = otherwise {
                    self.stmt(s);
                }
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(s) = init {
                    self.stmt(s);
                }
                if let Some(e) = cond {
                    self.expr(e);
                }
                if let Some(e) = update {
                    self.expr(e);
                }
                self.stmt(body);
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                ..
            } => {
                if kind.is_some() {
                    self.declared.insert(name.clone());
                } else {
                    self.referenced.insert(name.clone());
                }
                self.expr(iterable);
                self.stmt(body);
            }
            Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
                self.expr(cond);
                self.stmt(body);
            }
            Stmt::Return(Some(e)) | Stmt::Throw(e) | Stmt::Expr(e) => self.expr(e),
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.stmt(s);
                }
            }
            Stmt::Return(None) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Empty => {}
        }
    }

    fn args(&mut self, args: &'a [Arg]) {
        for arg in args {
            match arg {
                Arg::Value(e) | Arg::Spread(e) => self.expr(e),
            }
        }
    }

    fn expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => {}
            Expr::Ident(name, _) => {
                self.referenced.insert(name.clone());
            }
            Expr::Array(items) => self.args(items),
            Expr::Function(f) => self.nested.push(f),
            Expr::Unary(_, e) => self.expr(e),
            Expr::Binary(_, l, r) | Expr::Logical(_, l, r) => {
                self.expr(l);
                self.expr(r);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Update { target, .. } => self.expr(target),
            Expr::Conditional(c, a, b) => {
                self.expr(c);
                self.expr(a);
                self.expr(b);
            }
            Expr::Call { callee, args, .. } => {
                self.expr(callee);
                self.args(args);
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::New { args, .. } => self.args(args),
            Expr::Sequence(items) => {
                for e in items {
                    self.expr(e);
                }
            }
        }
    }
}
