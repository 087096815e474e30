//! Common definitions that are shared between different parts of the compiler.

use derive_more::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.  Interning keeps name comparisons and map keys cheap, and the
/// same type doubles as the label type in the stack machine and the backend.
pub type Id = internment::Intern<String>;

/// Intern a string slice.
pub fn id(s: &str) -> Id {
    Id::from_ref(s)
}

/// A source position, carried on name-bearing AST nodes and reported in
/// diagnostics as `line:column` (both 1-based).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display, Hash)]
#[display("{line}:{col}")]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Pos { line, col }
    }
}
