/// A complete submission: top-level statements in source order.
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

/// Function declaration, function expression or arrow function.
#[derive(Debug, Clone)]
pub struct FunctionLit {
    /// Unique per program, assigned by the parser.
    pub id: usize,
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Body,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Body {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    Var {
        kind: DeclKind,
        decls: Vec<Declarator>,
        line: usize,
    },
    Function(Box<FunctionLit>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        /// `None` when the loop assigns to an existing binding.
        kind: Option<DeclKind>,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
        line: usize,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    Break(usize),
    Continue(usize),
    Return(Option<Expr>),
    Throw(Expr),
    Block(Vec<Stmt>),
    Expr(Expr),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    StrictEq,
    StrictNeq,
    LooseEq,
    LooseNeq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    TypeOf,
}

/// Element of an argument list or array literal.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Expr),
    Spread(Expr),
}

/// Expressions.
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String, usize),
    Array(Vec<Arg>),
    Function(Box<FunctionLit>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Assign {
        /// Compound operator, `None` for plain `=`.
        op: Option<BinOp>,
        target: Box<Expr>,
        value: Box<Expr>,
        line: usize,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
        line: usize,
    },
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
        line: usize,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        name: String,
        args: Vec<Arg>,
        line: usize,
    },
    Sequence(Vec<Expr>),
}
