//! AST node types for the automation DSL.
//!
//! Nodes own their children exclusively; a script's tree is built once per
//! parse and never mutated. Function bodies are reference counted so a call
//! can share the read-only body while binding a fresh set of locals.

use std::rc::Rc;

/// Expressions.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Numeric literal: `42`, `3.5`
    Number(f64),
    /// String literal: `"go"`
    Str(String),
    /// Variable reference. Unknown names evaluate to the default value `0`.
    Variable(String),
    /// Binary arithmetic: `a + b`
    Bin {
        left: Box<Expr>,
        op: crate::value::BinOp,
        right: Box<Expr>,
    },
    /// Comparison: `a == b`. Produces a single boolean; sequence operands
    /// compare element-wise and reduce with AND.
    Cmp {
        left: Box<Expr>,
        op: crate::value::CmpOp,
        right: Box<Expr>,
    },
    /// A bare expression used where a condition is expected: `while (x) {}`.
    /// True when the inner value is truthy.
    Truthy(Box<Expr>),
}

/// A function call site: `click(10, 20)`.
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Expr>,
    pub line: usize,
}

/// A user function declaration. The body is shared read-only between the
/// table entry and active calls; only the per-call binding record is fresh.
#[derive(Debug)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// The element tree of a `dynamic` list literal: parenthesized lists nest
/// recursively.
#[derive(Debug, Clone)]
pub enum ListExpr {
    Item(Expr),
    Nested(Vec<ListExpr>),
}

/// The right-hand side of a `dynamic` declaration.
#[derive(Debug, Clone)]
pub enum DynamicSource {
    /// `dynamic a = (1, 2, (3, 4))`
    List(Vec<ListExpr>),
    /// `dynamic a = call screenshot()` — the call's result is bound.
    Call(CallExpr),
    /// `dynamic a = b` — a plain expression.
    Expr(Expr),
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `name "my script"` — sets the run's display name.
    ScriptName(String),
    /// `var x = expr`
    Var { name: String, value: Expr },
    /// `dynamic xs = ...`
    Dynamic { name: String, source: DynamicSource },
    /// `print(expr)`
    Print(Expr),
    /// `sleep(expr)` — seconds, cancellable in 10 ms increments.
    Sleep(Expr),
    /// `if (c) { .. } else if (c2) { .. } else { .. }` — first true wins,
    /// exactly one body executes.
    If {
        condition: Expr,
        true_body: Vec<Stmt>,
        else_ifs: Vec<(Expr, Vec<Stmt>)>,
        false_body: Vec<Stmt>,
    },
    /// `loop n { .. }` — body runs exactly floor(n) times.
    Loop { count: Expr, body: Vec<Stmt> },
    /// `while c { .. }` — condition re-evaluated before each iteration.
    While { condition: Expr, body: Vec<Stmt> },
    /// `foreach (item, subject) { .. }` — subject may be an integer
    /// (iterate `0..n`) or a sequence (iterate elements).
    Foreach {
        item: String,
        items: Expr,
        body: Vec<Stmt>,
    },
    /// `func f(a, b) { .. }` — registers the function; does not run it.
    Func(Rc<FuncDecl>),
    /// `call f(...)` or a bare call statement.
    Call(CallExpr),
    Break,
    Continue,
}
