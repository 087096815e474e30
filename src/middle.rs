//! The middle-end of the compiler: the stack machine and everything that
//! produces or runs it.

pub mod env;
pub mod interp;
pub mod lower;
pub mod sm;

pub use lower::lower;
pub use sm::{Insn, Loc};
