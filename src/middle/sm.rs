//! The stack machine.
//!
//! A flat program over an operand stack.  Every value-producing instruction
//! pushes exactly one value; the front-end balances the stack by construction
//! (see the parser), so at every program point the stack depth is determined
//! by the instruction sequence alone.  The back-end depends on that.

use derive_more::Display;

use crate::common::Id;
use crate::front::ast::BOp;

/// Where a named binding lives at run time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub enum Loc {
    /// The i-th argument of the enclosing function.
    #[display("arg[{_0}]")]
    Arg(usize),
    /// The i-th local slot of the enclosing function.
    #[display("loc[{_0}]")]
    Local(usize),
    /// A named global.
    #[display("{_0}")]
    Global(Id),
}

/// Conditions for conditional jumps.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Cond {
    /// Taken when the popped value is zero.
    #[display("z")]
    Z,
    /// Taken when the popped value is nonzero.
    #[display("nz")]
    Nz,
}

/// A stack machine instruction.  The display form is the textual form used
/// for dumps and cross-validation.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
pub enum Insn {
    /// Read an integer from the input and push it.
    #[display("READ")]
    Read,
    /// Pop a value and write it to the output.
    #[display("WRITE")]
    Write,
    /// Pop the right then the left operand, push `left op right`.
    #[display("BINOP {_0}")]
    Binop(BOp),
    /// Push the value of a location.
    #[display("LD {_0}")]
    Ld(Loc),
    /// Push a reference to a location.
    #[display("LDA {_0}")]
    Lda(Loc),
    /// Store the top of the stack to a location.  The value stays on the
    /// stack: an assignment evaluates to the stored value.
    #[display("ST {_0}")]
    St(Loc),
    /// Pop a value, then a reference; store through the reference and push
    /// the value back.
    #[display("STI")]
    Sti,
    /// Push a constant.
    #[display("CONST {_0}")]
    Const(i32),
    #[display("LABEL {_0}")]
    Label(Id),
    #[display("JMP {_0}")]
    Jmp(Id),
    #[display("CJMP {_0}, {_1}")]
    CJmp(Cond, Id),
    /// Call a function with the given number of arguments; the arguments are
    /// popped and the result is pushed.
    #[display("CALL {_0}, {_1}")]
    Call(Id, usize),
    /// Function prologue: name, arity, number of locals.
    #[display("BEGIN {_0}, {_1}, {_2}")]
    Begin(Id, usize, usize),
    /// Function epilogue; for non-`main` functions pops the return value.
    #[display("END")]
    End,
    /// Declare a zero-initialized global.
    #[display("GLOBAL {_0}")]
    Global(Id),
    #[display("DROP")]
    Drop,
    #[display("DUP")]
    Dup,
}

/// Render a program one instruction per line.
pub fn listing(program: &[Insn]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for insn in program {
        writeln!(out, "{insn}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn textual_form() {
        assert_eq!(Insn::Binop(BOp::Rem).to_string(), "BINOP %");
        assert_eq!(Insn::Ld(Loc::Local(0)).to_string(), "LD loc[0]");
        assert_eq!(Insn::Lda(Loc::Arg(2)).to_string(), "LDA arg[2]");
        assert_eq!(Insn::St(Loc::Global(id("x"))).to_string(), "ST x");
        assert_eq!(Insn::CJmp(Cond::Nz, id("L3")).to_string(), "CJMP nz, L3");
        assert_eq!(Insn::Call(id("Lfact"), 1).to_string(), "CALL Lfact, 1");
        assert_eq!(Insn::Begin(id("main"), 0, 2).to_string(), "BEGIN main, 0, 2");
    }
}
