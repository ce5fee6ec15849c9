use std::collections::HashSet;

use mystery_bytecode::{Capture, Constant, Function, Module, Op};

use crate::ast::*;
use crate::error::CompileError;
use crate::resolve::{Captures, SCRIPT_ID};

/// Emit a module whose script function evaluates the top-level statements
/// and returns the value bound to `entry`.
pub fn emit(
    name: &str,
    program: &Program,
    captures: &Captures,
    entry: &str,
) -> Result<Module, CompileError> {
    let mut emitter = Emitter {
        module: Module::new(name),
        captures,
        current: FnEmitter::new(SCRIPT_ID, captures),
        enclosing: Vec::new(),
    };
    let script = emitter.module.reserve_function("script");
    emitter.module.entry = script;
    emitter.emit_script(program, entry)?;
    let fe = std::mem::replace(&mut emitter.current, FnEmitter::new(SCRIPT_ID, captures));
    emitter.module.set_function(script, fe.finish("script".into(), 0));
    Ok(emitter.module)
}

#[derive(Clone, Copy)]
enum Place {
    Local(u32),
    Cell(u32),
    Upvalue(u32),
    Global,
}

struct Binding {
    name: String,
    slot: u32,
    boxed: bool,
    constant: bool,
}

struct Upvalue {
    name: String,
    capture: Capture,
    constant: bool,
}

#[derive(Default)]
struct LoopCtx {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FnEmitter {
    code: Vec<Op>,
    scopes: Vec<Vec<Binding>>,
    next_local: u32,
    upvalues: Vec<Upvalue>,
    loops: Vec<LoopCtx>,
    boxed: HashSet<String>,
}

impl FnEmitter {
    fn new(id: usize, captures: &Captures) -> Self {
        FnEmitter {
            code: Vec::new(),
            scopes: vec![Vec::new()],
            next_local: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
            boxed: captures.boxed_in(id),
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn patch(&mut self, at: usize, target: u32) {
        if let Some(op) = self.code.get_mut(at) {
            *op = match *op {
                Op::Jmp(_) => Op::Jmp(target),
                Op::JmpIf(_) => Op::JmpIf(target),
                Op::JmpIfNot(_) => Op::JmpIfNot(target),
                Op::JmpIfNotNullish(_) => Op::JmpIfNotNullish(target),
                other => other,
            };
        }
    }

    fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_local;
        self.next_local += 1;
        slot
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|b| b.name == name)
    }

    fn finish(mut self, name: String, arity: u8) -> Function {
        // Implicit `return undefined`; also the landing pad for jumps past the last statement.
        self.code.push(Op::PushUndefined);
        self.code.push(Op::Ret);
        Function {
            name,
            arity,
            locals: self.next_local,
            captures: self.upvalues.iter().map(|u| u.capture).collect(),
            code: self.code,
        }
    }
}

fn codegen_error(line: usize, msg: impl Into<String>) -> CompileError {
    CompileError::Codegen {
        line,
        msg: msg.into(),
    }
}

fn binop(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        BinOp::Mod => Op::Mod,
        BinOp::Pow => Op::Pow,
        BinOp::BitAnd => Op::BitAnd,
        BinOp::BitOr => Op::BitOr,
        BinOp::BitXor => Op::BitXor,
        BinOp::Shl => Op::Shl,
        BinOp::Shr => Op::Shr,
        BinOp::UShr => Op::UShr,
        BinOp::StrictEq => Op::StrictEq,
        BinOp::StrictNeq => Op::StrictNeq,
        BinOp::LooseEq => Op::LooseEq,
        BinOp::LooseNeq => Op::LooseNeq,
        BinOp::Lt => Op::Lt,
        BinOp::Lte => Op::Lte,
        BinOp::Gt => Op::Gt,
        BinOp::Gte => Op::Gte,
    }
}

/// `var` names declared anywhere in a function body, outside nested functions.
fn collect_vars(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        collect_vars_stmt(stmt, out);
    }
}

fn collect_vars_stmt(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Var {
            kind: DeclKind::Var,
            decls,
            ..
        } => out.extend(decls.iter().map(|d| d.name.clone())),
        Stmt::ForOf {
            kind: Some(DeclKind::Var),
            name,
            body,
            ..
        } => {
            out.push(name.clone());
            collect_vars_stmt(body, out);
        }
        Stmt::ForOf { body, .. } | Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
            collect_vars_stmt(body, out)
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_vars_stmt(init, out);
            }
            collect_vars_stmt(body, out);
        }
        Stmt::If {
            then, otherwise, ..
        } => {
            collect_vars_stmt(then, out);
            if let Some(s) = otherwise {
                collect_vars_stmt(s, out);
            }
        }
        Stmt::Block(stmts) => collect_vars(stmts, out),
        _ => {}
    }
}

struct Emitter<'a> {
    module: Module,
    captures: &'a Captures,
    current: FnEmitter,
    /// Emitters of the functions lexically enclosing `current`, outermost first.
    enclosing: Vec<FnEmitter>,
}

impl<'a> Emitter<'a> {
    fn fe(&mut self) -> &mut FnEmitter {
        &mut self.current
    }

    fn emit(&mut self, op: Op) -> usize {
        self.current.emit(op)
    }

    fn name_const(&mut self, name: &str) -> u32 {
        self.module.add_const(Constant::Str(name.to_string()))
    }

    fn level(&mut self, depth: usize) -> &mut FnEmitter {
        if depth < self.enclosing.len() {
            &mut self.enclosing[depth]
        } else {
            &mut self.current
        }
    }

    // --- Bindings ---

    fn declare(&mut self, name: &str, constant: bool, line: usize) -> Result<(), CompileError> {
        let fe = self.fe();
        if let Some(scope) = fe.scopes.last() {
            if scope.iter().any(|b| b.name == name) {
                return Err(codegen_error(
                    line,
                    format!("Identifier '{name}' has already been declared"),
                ));
            }
        }
        let slot = fe.alloc_slot();
        let boxed = fe.boxed.contains(name);
        if boxed {
            fe.emit(Op::PushUndefined);
            fe.emit(Op::InitCell(slot));
        }
        if let Some(scope) = fe.scopes.last_mut() {
            scope.push(Binding {
                name: name.to_string(),
                slot,
                boxed,
                constant,
            });
        }
        Ok(())
    }

    fn resolve(&mut self, name: &str) -> (Place, bool) {
        if let Some(b) = self.current.lookup(name) {
            let place = if b.boxed {
                Place::Cell(b.slot)
            } else {
                Place::Local(b.slot)
            };
            return (place, b.constant);
        }
        let depth = self.enclosing.len();
        match self.resolve_upvalue(depth, name) {
            Some((idx, constant)) => (Place::Upvalue(idx), constant),
            None => (Place::Global, false),
        }
    }

    fn resolve_upvalue(&mut self, depth: usize, name: &str) -> Option<(u32, bool)> {
        if depth == 0 {
            return None;
        }
        if let Some(i) = self.level(depth).upvalues.iter().position(|u| u.name == name) {
            let constant = self.level(depth).upvalues[i].constant;
            return Some((i as u32, constant));
        }
        let parent = depth - 1;
        let found = self
            .level(parent)
            .lookup(name)
            .map(|b| (b.slot, b.boxed, b.constant));
        let (capture, constant) = match found {
            Some((slot, true, constant)) => (Capture::Local(slot), constant),
            // Only boxed bindings can be captured; analysis boxes every captured name.
            Some((_, false, _)) => return None,
            None => {
                let (idx, constant) = self.resolve_upvalue(parent, name)?;
                (Capture::Upvalue(idx), constant)
            }
        };
        let fe = self.level(depth);
        fe.upvalues.push(Upvalue {
            name: name.to_string(),
            capture,
            constant,
        });
        Some(((fe.upvalues.len() - 1) as u32, constant))
    }

    fn load(&mut self, name: &str) {
        match self.resolve(name).0 {
            Place::Local(s) => self.emit(Op::LoadLocal(s)),
            Place::Cell(s) => self.emit(Op::LoadCell(s)),
            Place::Upvalue(u) => self.emit(Op::LoadUpvalue(u)),
            Place::Global if name == "undefined" => self.emit(Op::PushUndefined),
            Place::Global => {
                let c = self.name_const(name);
                self.emit(Op::LoadGlobal(c))
            }
        };
    }

    /// Pop the top of stack into `name`. `initializing` permits writes to constants.
    fn store(&mut self, name: &str, initializing: bool, line: usize) -> Result<(), CompileError> {
        let (place, constant) = self.resolve(name);
        if constant && !initializing {
            return Err(codegen_error(
                line,
                format!("Assignment to constant variable '{name}'"),
            ));
        }
        match place {
            Place::Local(s) => self.emit(Op::StoreLocal(s)),
            Place::Cell(s) => self.emit(Op::StoreCell(s)),
            Place::Upvalue(u) => self.emit(Op::StoreUpvalue(u)),
            Place::Global => {
                return Err(codegen_error(line, format!("{name} is not defined")));
            }
        };
        Ok(())
    }

    // --- Functions ---

    fn emit_script(&mut self, program: &Program, entry: &str) -> Result<(), CompileError> {
        let mut vars = Vec::new();
        collect_vars(&program.body, &mut vars);
        self.declare_vars(&vars)?;
        self.predeclare(&program.body)?;
        for stmt in &program.body {
            self.emit_stmt(stmt)?;
        }
        self.load(entry);
        self.emit(Op::Ret);
        Ok(())
    }

    fn declare_vars(&mut self, names: &[String]) -> Result<(), CompileError> {
        for name in names {
            if self.current.lookup(name).is_none() {
                self.declare(name, false, 0)?;
            }
        }
        Ok(())
    }

    /// Compile a nested function and push a closure for it.
    fn emit_closure(&mut self, f: &FunctionLit, name_hint: Option<&str>) -> Result<(), CompileError> {
        let arity = u8::try_from(f.params.len())
            .map_err(|_| codegen_error(f.line, "too many parameters"))?;
        let outer = std::mem::replace(&mut self.current, FnEmitter::new(f.id, self.captures));
        self.enclosing.push(outer);

        let result = self.emit_function_body(f);

        let inner = match self.enclosing.pop() {
            Some(outer) => std::mem::replace(&mut self.current, outer),
            None => return Err(codegen_error(f.line, "function nesting underflow")),
        };
        result?;

        let name = f
            .name
            .clone()
            .or_else(|| name_hint.map(str::to_string))
            .unwrap_or_else(|| "anonymous".into());
        let idx = self.module.add_function(inner.finish(name, arity));
        self.emit(Op::MakeClosure(idx));
        Ok(())
    }

    fn emit_function_body(&mut self, f: &FunctionLit) -> Result<(), CompileError> {
        for (i, param) in f.params.iter().enumerate() {
            let slot = i as u32;
            let fe = self.fe();
            fe.alloc_slot();
            let boxed = fe.boxed.contains(&param.name);
            if boxed {
                fe.emit(Op::LoadLocal(slot));
                fe.emit(Op::InitCell(slot));
            }
            if let Some(scope) = fe.scopes.last_mut() {
                scope.push(Binding {
                    name: param.name.clone(),
                    slot,
                    boxed,
                    constant: false,
                });
            }
        }
        for param in &f.params {
            if let Some(default) = &param.default {
                self.load(&param.name);
                self.emit(Op::PushUndefined);
                self.emit(Op::StrictNeq);
                let skip = self.emit(Op::JmpIf(0));
                self.emit_expr(default)?;
                self.store(&param.name, true, f.line)?;
                let here = self.fe().here();
                self.fe().patch(skip, here);
            }
        }

        match &f.body {
            Body::Expr(e) => {
                self.emit_expr(e)?;
                self.emit(Op::Ret);
            }
            Body::Block(stmts) => {
                self.fe().scopes.push(Vec::new());
                let mut vars = Vec::new();
                collect_vars(stmts, &mut vars);
                self.declare_vars(&vars)?;
                self.predeclare(stmts)?;
                for stmt in stmts {
                    self.emit_stmt(stmt)?;
                }
                self.fe().scopes.pop();
            }
        }
        Ok(())
    }

    // --- Statements ---

    /// Declare the block's `let`/`const`/function bindings and hoist its function declarations.
    fn predeclare(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            match stmt {
                Stmt::Var { kind, decls, line } if *kind != DeclKind::Var => {
                    for decl in decls {
                        self.declare(&decl.name, *kind == DeclKind::Const, *line)?;
                    }
                }
                Stmt::Function(f) => {
                    if let Some(name) = &f.name {
                        self.declare(name, false, f.line)?;
                    }
                }
                _ => {}
            }
        }
        for stmt in stmts {
            if let Stmt::Function(f) = stmt {
                if let Some(name) = &f.name {
                    self.emit_closure(f, None)?;
                    self.store(name, true, f.line)?;
                }
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.fe().scopes.push(Vec::new());
        let result = self
            .predeclare(stmts)
            .and_then(|_| stmts.iter().try_for_each(|s| self.emit_stmt(s)));
        self.fe().scopes.pop();
        result
    }

    /// Sub-statement of a control construct, given its own scope.
    fn emit_scoped(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Block(stmts) => self.emit_block(stmts),
            other => self.emit_block(std::slice::from_ref(other)),
        }
    }

    fn emit_loop_body(&mut self, body: &Stmt) -> Result<LoopCtx, CompileError> {
        self.fe().loops.push(LoopCtx::default());
        let result = self.emit_scoped(body);
        let ctx = self.fe().loops.pop().unwrap_or_default();
        result.map(|_| ctx)
    }

    fn finish_loop(&mut self, ctx: LoopCtx, continue_target: u32, exit: u32) {
        let fe = self.fe();
        for at in ctx.continues {
            fe.patch(at, continue_target);
        }
        for at in ctx.breaks {
            fe.patch(at, exit);
        }
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Var { kind, decls, line } => {
                for decl in decls {
                    match &decl.init {
                        Some(init) => {
                            self.emit_named_expr(init, &decl.name)?;
                            self.store(&decl.name, true, *line)?;
                        }
                        None if *kind == DeclKind::Let => {
                            self.emit(Op::PushUndefined);
                            self.store(&decl.name, true, *line)?;
                        }
                        None => {}
                    }
                }
            }
            Stmt::Function(_) | Stmt::Empty => {}
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.emit_expr(cond)?;
                let to_else = self.emit(Op::JmpIfNot(0));
                self.emit_scoped(then)?;
                match otherwise {
                    Some(other) => {
                        let to_end = self.emit(Op::Jmp(0));
                        let here = self.fe().here();
                        self.fe().patch(to_else, here);
                        self.emit_scoped(other)?;
                        let end = self.fe().here();
                        self.fe().patch(to_end, end);
                    }
                    None => {
                        let here = self.fe().here();
                        self.fe().patch(to_else, here);
                    }
                }
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                self.fe().scopes.push(Vec::new());
                let result = self.emit_for(init.as_deref(), cond.as_ref(), update.as_ref(), body);
                self.fe().scopes.pop();
                result?;
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                line,
            } => self.emit_for_of(*kind, name, iterable, body, *line)?,
            Stmt::While { cond, body } => {
                let start = self.fe().here();
                self.emit_expr(cond)?;
                let exit_jump = self.emit(Op::JmpIfNot(0));
                let ctx = self.emit_loop_body(body)?;
                self.emit(Op::Jmp(start));
                let exit = self.fe().here();
                self.fe().patch(exit_jump, exit);
                self.finish_loop(ctx, start, exit);
            }
            Stmt::DoWhile { body, cond } => {
                let start = self.fe().here();
                let ctx = self.emit_loop_body(body)?;
                let continue_target = self.fe().here();
                self.emit_expr(cond)?;
                self.emit(Op::JmpIf(start));
                let exit = self.fe().here();
                self.finish_loop(ctx, continue_target, exit);
            }
            Stmt::Break(line) => {
                let at = self.emit(Op::Jmp(0));
                match self.fe().loops.last_mut() {
                    Some(ctx) => ctx.breaks.push(at),
                    None => return Err(codegen_error(*line, "Illegal break statement")),
                }
            }
            Stmt::Continue(line) => {
                let at = self.emit(Op::Jmp(0));
                match self.fe().loops.last_mut() {
                    Some(ctx) => ctx.continues.push(at),
                    None => return Err(codegen_error(*line, "Illegal continue statement")),
                }
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.emit_expr(e)?,
                    None => {
                        self.emit(Op::PushUndefined);
                    }
                }
                self.emit(Op::Ret);
            }
            Stmt::Throw(e) => {
                self.emit_expr(e)?;
                self.emit(Op::Throw);
            }
            Stmt::Block(stmts) => self.emit_block(stmts)?,
            Stmt::Expr(e) => {
                self.emit_expr(e)?;
                self.emit(Op::Pop);
            }
        }
        Ok(())
    }

    fn emit_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.predeclare(std::slice::from_ref(init))?;
            self.emit_stmt(init)?;
        }
        let start = self.fe().here();
        let exit_jump = match cond {
            Some(c) => {
                self.emit_expr(c)?;
                Some(self.emit(Op::JmpIfNot(0)))
            }
            None => None,
        };
        let ctx = self.emit_loop_body(body)?;
        let continue_target = self.fe().here();
        if let Some(u) = update {
            self.emit_expr(u)?;
            self.emit(Op::Pop);
        }
        self.emit(Op::Jmp(start));
        let exit = self.fe().here();
        if let Some(at) = exit_jump {
            self.fe().patch(at, exit);
        }
        self.finish_loop(ctx, continue_target, exit);
        Ok(())
    }

    fn emit_for_of(
        &mut self,
        kind: Option<DeclKind>,
        name: &str,
        iterable: &Expr,
        body: &Stmt,
        line: usize,
    ) -> Result<(), CompileError> {
        let length = self.name_const("length");
        let zero = self.module.add_const(Constant::Number(0.0));
        let one = self.module.add_const(Constant::Number(1.0));
        let items = self.fe().alloc_slot();
        let index = self.fe().alloc_slot();

        self.emit_expr(iterable)?;
        self.emit(Op::Iterable);
        self.emit(Op::StoreLocal(items));
        self.emit(Op::PushConst(zero));
        self.emit(Op::StoreLocal(index));

        let start = self.fe().here();
        self.emit(Op::LoadLocal(index));
        self.emit(Op::LoadLocal(items));
        self.emit(Op::GetProp(length));
        self.emit(Op::Lt);
        let exit_jump = self.emit(Op::JmpIfNot(0));

        // Fresh binding per iteration so closures observe their own element.
        self.fe().scopes.push(Vec::new());
        self.fe().loops.push(LoopCtx::default());
        let result = (|| {
            if let Some(k) = kind.filter(|k| *k != DeclKind::Var) {
                self.declare(name, k == DeclKind::Const, line)?;
            }
            self.emit(Op::LoadLocal(items));
            self.emit(Op::LoadLocal(index));
            self.emit(Op::GetIndex);
            self.store(name, kind.is_some(), line)?;
            self.emit_scoped(body)
        })();
        let ctx = self.fe().loops.pop().unwrap_or_default();
        self.fe().scopes.pop();
        result?;

        let continue_target = self.fe().here();
        self.emit(Op::LoadLocal(index));
        self.emit(Op::PushConst(one));
        self.emit(Op::Add);
        self.emit(Op::StoreLocal(index));
        self.emit(Op::Jmp(start));
        let exit = self.fe().here();
        self.fe().patch(exit_jump, exit);
        self.finish_loop(ctx, continue_target, exit);
        Ok(())
    }

    // --- Expressions ---

    /// Anonymous function initialisers take the binding's name.
    fn emit_named_expr(&mut self, expr: &Expr, name: &str) -> Result<(), CompileError> {
        match expr {
            Expr::Function(f) => self.emit_closure(f, Some(name)),
            other => self.emit_expr(other),
        }
    }

    fn emit_args(&mut self, args: &[Arg], line: usize) -> Result<Option<u8>, CompileError> {
        if args.iter().any(|a| matches!(a, Arg::Spread(_))) {
            self.emit_array(args)?;
            return Ok(None);
        }
        let argc = u8::try_from(args.len()).map_err(|_| codegen_error(line, "too many arguments"))?;
        for arg in args {
            if let Arg::Value(e) = arg {
                self.emit_expr(e)?;
            }
        }
        Ok(Some(argc))
    }

    fn emit_array(&mut self, items: &[Arg]) -> Result<(), CompileError> {
        if items.iter().all(|a| matches!(a, Arg::Value(_))) {
            for item in items {
                if let Arg::Value(e) = item {
                    self.emit_expr(e)?;
                }
            }
            self.emit(Op::MakeArray(items.len() as u32));
            return Ok(());
        }
        self.emit(Op::MakeArray(0));
        for item in items {
            match item {
                Arg::Value(e) => {
                    self.emit_expr(e)?;
                    self.emit(Op::ArrayPush);
                }
                Arg::Spread(e) => {
                    self.emit_expr(e)?;
                    self.emit(Op::ArrayExtend);
                }
            }
        }
        Ok(())
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Number(n) => {
                let c = self.module.add_const(Constant::Number(*n));
                self.emit(Op::PushConst(c));
            }
            Expr::Str(s) => {
                let c = self.module.add_const(Constant::Str(s.clone()));
                self.emit(Op::PushConst(c));
            }
            Expr::Bool(b) => {
                let c = self.module.add_const(Constant::Bool(*b));
                self.emit(Op::PushConst(c));
            }
            Expr::Null => {
                let c = self.module.add_const(Constant::Null);
                self.emit(Op::PushConst(c));
            }
            Expr::Ident(name, _) => self.load(name),
            Expr::Array(items) => self.emit_array(items)?,
            Expr::Function(f) => self.emit_closure(f, None)?,
            Expr::Unary(UnaryOp::TypeOf, operand) => match operand.as_ref() {
                Expr::Ident(name, _) if matches!(self.resolve(name).0, Place::Global) => {
                    let c = self.name_const(name);
                    self.emit(Op::TypeOfGlobal(c));
                }
                other => {
                    self.emit_expr(other)?;
                    self.emit(Op::TypeOf);
                }
            },
            Expr::Unary(UnaryOp::Neg, operand) if matches!(operand.as_ref(), Expr::Number(_)) => {
                if let Expr::Number(n) = operand.as_ref() {
                    let c = self.module.add_const(Constant::Number(-n));
                    self.emit(Op::PushConst(c));
                }
            }
            Expr::Unary(op, operand) => {
                self.emit_expr(operand)?;
                self.emit(match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Plus => Op::ToNumber,
                    UnaryOp::BitNot => Op::BitNot,
                    UnaryOp::TypeOf => Op::TypeOf,
                });
            }
            Expr::Binary(op, left, right) => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(binop(*op));
            }
            Expr::Logical(op, left, right) => {
                self.emit_expr(left)?;
                self.emit(Op::Dup);
                let short = self.emit(match op {
                    LogicalOp::And => Op::JmpIfNot(0),
                    LogicalOp::Or => Op::JmpIf(0),
                    LogicalOp::Nullish => Op::JmpIfNotNullish(0),
                });
                self.emit(Op::Pop);
                self.emit_expr(right)?;
                let end = self.fe().here();
                self.fe().patch(short, end);
            }
            Expr::Assign {
                op,
                target,
                value,
                line,
            } => self.emit_assign(*op, target, value, *line)?,
            Expr::Update {
                increment,
                prefix,
                target,
                line,
            } => self.emit_update(*increment, *prefix, target, *line)?,
            Expr::Conditional(test, then, otherwise) => {
                self.emit_expr(test)?;
                let to_else = self.emit(Op::JmpIfNot(0));
                self.emit_expr(then)?;
                let to_end = self.emit(Op::Jmp(0));
                let here = self.fe().here();
                self.fe().patch(to_else, here);
                self.emit_expr(otherwise)?;
                let end = self.fe().here();
                self.fe().patch(to_end, end);
            }
            Expr::Call { callee, args, line } => match callee.as_ref() {
                Expr::Member { object, name } => {
                    self.emit_expr(object)?;
                    let method = self.name_const(name);
                    match self.emit_args(args, *line)? {
                        Some(argc) => self.emit(Op::CallMethod(method, argc)),
                        None => self.emit(Op::CallMethodSpread(method)),
                    };
                }
                other => {
                    self.emit_expr(other)?;
                    match self.emit_args(args, *line)? {
                        Some(argc) => self.emit(Op::Call(argc)),
                        None => self.emit(Op::CallSpread),
                    };
                }
            },
            Expr::Member { object, name } => {
                self.emit_expr(object)?;
                let c = self.name_const(name);
                self.emit(Op::GetProp(c));
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Op::GetIndex);
            }
            Expr::New { name, args, line } => {
                let Some(argc) = self.emit_args(args, *line)? else {
                    return Err(codegen_error(*line, "spread arguments are not supported with new"));
                };
                let c = self.name_const(name);
                self.emit(Op::New(c, argc));
            }
            Expr::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.emit(Op::Pop);
                    }
                    self.emit_expr(item)?;
                }
            }
        }
        Ok(())
    }

    fn emit_assign(
        &mut self,
        op: Option<BinOp>,
        target: &Expr,
        value: &Expr,
        line: usize,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name, _) => {
                match op {
                    None => self.emit_named_expr(value, name)?,
                    Some(op) => {
                        self.load(name);
                        self.emit_expr(value)?;
                        self.emit(binop(op));
                    }
                }
                self.emit(Op::Dup);
                self.store(name, false, line)
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                if let Some(op) = op {
                    self.emit(Op::Dup2);
                    self.emit(Op::GetIndex);
                    self.emit_expr(value)?;
                    self.emit(binop(op));
                } else {
                    self.emit_expr(value)?;
                }
                self.emit(Op::SetIndex);
                Ok(())
            }
            Expr::Member { name, .. } => Err(codegen_error(
                line,
                format!("cannot assign to property '{name}'"),
            )),
            _ => Err(codegen_error(line, "invalid assignment target")),
        }
    }

    fn emit_update(
        &mut self,
        increment: bool,
        prefix: bool,
        target: &Expr,
        line: usize,
    ) -> Result<(), CompileError> {
        let one = self.module.add_const(Constant::Number(1.0));
        let step = if increment { Op::Add } else { Op::Sub };
        match target {
            Expr::Ident(name, _) => {
                self.load(name);
                self.emit(Op::ToNumber);
                if prefix {
                    self.emit(Op::PushConst(one));
                    self.emit(step);
                    self.emit(Op::Dup);
                } else {
                    self.emit(Op::Dup);
                    self.emit(Op::PushConst(one));
                    self.emit(step);
                }
                self.store(name, false, line)
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Op::Dup2);
                self.emit(Op::GetIndex);
                self.emit(Op::ToNumber);
                if prefix {
                    self.emit(Op::PushConst(one));
                    self.emit(step);
                    self.emit(Op::SetIndex);
                } else {
                    let old = self.fe().alloc_slot();
                    self.emit(Op::StoreLocal(old));
                    self.emit(Op::LoadLocal(old));
                    self.emit(Op::PushConst(one));
                    self.emit(step);
                    self.emit(Op::SetIndex);
                    self.emit(Op::Pop);
                    self.emit(Op::LoadLocal(old));
                }
                Ok(())
            }
            Expr::Member { name, .. } => Err(codegen_error(
                line,
                format!("cannot assign to property '{name}'"),
            )),
            _ => Err(codegen_error(line, "invalid update target")),
        }
    }
}
