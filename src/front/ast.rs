//! The abstract syntax tree.
//!
//! The language is expression-oriented: every construct is an [Expr], and the
//! parser decides where a construct's value is discarded by inserting
//! [Expr::Ignore] nodes.  The lowering to the stack machine relies on that
//! placement for stack balance, so the AST carries no separate statement
//! category.

use derive_more::Display;

use crate::common::{Id, Pos};

/// Binary operators.  The same enum names the operation in `BINOP`
/// instructions of the stack machine, so its display form is the source-level
/// spelling.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum BOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Rem,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    /// Logical conjunction.  Both operands are always evaluated; the result
    /// is 0 or 1.
    #[display("&&")]
    And,
    /// Logical disjunction.  Both operands are always evaluated; the result
    /// is 0 or 1.
    #[display("!!")]
    Or,
}

impl BOp {
    /// Apply the operator with the language's 32-bit semantics: wrapping
    /// arithmetic, truncating division, comparisons and logical connectives
    /// yielding 0 or 1.  Returns `None` on division by zero.
    pub fn apply(self, l: i32, r: i32) -> Option<i32> {
        let bool_to_int = |b: bool| b as i32;
        Some(match self {
            BOp::Add => l.wrapping_add(r),
            BOp::Sub => l.wrapping_sub(r),
            BOp::Mul => l.wrapping_mul(r),
            BOp::Div if r == 0 => return None,
            BOp::Rem if r == 0 => return None,
            BOp::Div => l.wrapping_div(r),
            BOp::Rem => l.wrapping_rem(r),
            BOp::Lt => bool_to_int(l < r),
            BOp::Le => bool_to_int(l <= r),
            BOp::Eq => bool_to_int(l == r),
            BOp::Ne => bool_to_int(l != r),
            BOp::Gt => bool_to_int(l > r),
            BOp::Ge => bool_to_int(l >= r),
            BOp::And => bool_to_int(l != 0 && r != 0),
            BOp::Or => bool_to_int(l != 0 || r != 0),
        })
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Const(i32),
    /// A variable read.
    Var(Pos, Id),
    /// A reference to a variable, i.e. its address.  Assignment left-hand
    /// sides are references.
    Ref(Pos, Id),
    Binop(BOp, Box<Expr>, Box<Expr>),
    /// `lhs := rhs`.  The left-hand side evaluates to an address (a [Ref] in
    /// the surface syntax); the whole expression evaluates to the stored
    /// value.
    Assn(Box<Expr>, Box<Expr>),
    Seq(Box<Expr>, Box<Expr>),
    Skip,
    Read(Pos, Id),
    Write(Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    While(Box<Expr>, Box<Expr>),
    /// `repeat s until e`: the body runs at least once, looping while `e`
    /// evaluates to zero.
    Repeat(Box<Expr>, Box<Expr>),
    /// Evaluate for effect and discard the value.
    Ignore(Box<Expr>),
    Call(Pos, Id, Vec<Expr>),
    /// A lexical scope: definitions plus the expression they scope over.
    Scope(Vec<Def>, Box<Expr>),
}

/// Definitions appearing at the head of a scope.
#[derive(Clone, Debug)]
pub enum Def {
    Local(Vec<Id>),
    Fun(Id, Vec<Id>, Expr),
}
