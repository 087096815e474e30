//! The compilation environment.
//!
//! Tracks everything the lowering needs while walking the tree: the label
//! supply, the lexical scope depth, the name table (stacked by scope), the
//! argument and local counters of the function being compiled, and the queue
//! of function bodies waiting to be compiled.  The queue entries snapshot the
//! name table at the point of declaration, so a body is later compiled
//! against exactly the names that were visible where it was written.

use crate::common::{id, Id, Map, Pos};
use crate::front::ast::Expr;

use super::sm::Loc;

/// What a name stands for.
#[derive(Clone, Debug)]
pub enum Binding {
    Var(Loc),
    /// A function: its label and arity.
    Fun(Id, usize),
}

/// A naming error, fatal to the compilation.
pub enum CompileError {
    Undefined(Id, Pos),
    NotAVariable(Id, Pos),
    NotAFunction(Id, Pos),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Undefined(x, p) => write!(f, "name {x} is undefined at {p}"),
            CompileError::NotAVariable(x, p) => {
                write!(f, "{x} does not designate a variable at {p}")
            }
            CompileError::NotAFunction(x, p) => {
                write!(f, "{x} does not designate a function at {p}")
            }
        }
    }
}

impl std::fmt::Debug for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for CompileError {}

/// A function body queued for compilation.
pub struct Pending {
    pub label: Id,
    pub args: Vec<Id>,
    pub body: Expr,
    // The name table as of the declaration.
    state: Vec<Map<Id, Binding>>,
}

/// The environment threaded through the lowering.
pub struct Env {
    labels: usize,
    depth: usize,
    scopes: Vec<Map<Id, Binding>>,
    n_args: usize,
    n_locals: usize,
    pending: Vec<Pending>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            labels: 0,
            depth: 0,
            scopes: vec![],
            n_args: 0,
            n_locals: 0,
            pending: vec![],
        }
    }

    /// A fresh control-flow label.
    pub fn gen_label(&mut self) -> Id {
        let l = id(&format!("L{}", self.labels));
        self.labels += 1;
        l
    }

    /// A label for a function.  Top-level functions get a stable name;
    /// nested ones are uniquified with the label counter.
    pub fn gen_fun_label(&mut self, name: Id) -> Id {
        if self.depth == 1 {
            id(&format!("L{name}"))
        } else {
            let l = id(&format!("L{name}_{}", self.labels));
            self.labels += 1;
            l
        }
    }

    pub fn begin_scope(&mut self) {
        self.depth += 1;
        self.scopes.push(Map::new());
    }

    pub fn end_scope(&mut self) {
        self.scopes.pop();
        self.depth -= 1;
    }

    /// Is the current scope the global one?
    pub fn at_global_scope(&self) -> bool {
        self.depth == 1
    }

    /// Bind the next argument of the function being compiled.
    pub fn add_arg(&mut self, name: Id) {
        let loc = Loc::Arg(self.n_args);
        self.n_args += 1;
        self.bind(name, Binding::Var(loc));
    }

    /// Bind a variable: a global at global scope, a fresh local otherwise.
    pub fn add_var(&mut self, name: Id) -> Loc {
        let loc = if self.depth == 1 {
            Loc::Global(name)
        } else {
            let loc = Loc::Local(self.n_locals);
            self.n_locals += 1;
            loc
        };
        self.bind(name, Binding::Var(loc));
        loc
    }

    pub fn add_fun(&mut self, name: Id, label: Id, arity: usize) {
        self.bind(name, Binding::Fun(label, arity));
    }

    fn bind(&mut self, name: Id, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("binding a name outside any scope")
            .insert(name, binding);
    }

    /// Queue a function body for compilation, snapshotting the name table.
    pub fn remember_fun(&mut self, label: Id, args: &[Id], body: &Expr) {
        self.pending.push(Pending {
            label,
            args: args.to_vec(),
            body: body.clone(),
            state: self.scopes.clone(),
        });
    }

    /// Take the queued functions.  Compiling them may queue more, so the
    /// caller drains in a loop.
    pub fn drain_pending(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.pending)
    }

    /// Enter a function: restore its declaration-time name table, reset the
    /// per-function counters, and open a frame for the arguments.
    pub fn begin_fun(&mut self, fun: &Pending) {
        self.scopes = fun.state.clone();
        self.scopes.push(Map::new());
        self.depth = 1;
        self.n_args = 0;
        self.n_locals = 0;
    }

    /// Number of locals of the function being compiled.
    pub fn locals(&self) -> usize {
        self.n_locals
    }

    fn lookup(&self, name: Id) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name))
    }

    pub fn lookup_var(&self, pos: Pos, name: Id) -> Result<Loc, CompileError> {
        match self.lookup(name) {
            Some(Binding::Var(loc)) => Ok(*loc),
            Some(Binding::Fun(..)) => Err(CompileError::NotAVariable(name, pos)),
            None => Err(CompileError::Undefined(name, pos)),
        }
    }

    pub fn lookup_fun(&self, pos: Pos, name: Id) -> Result<(Id, usize), CompileError> {
        match self.lookup(name) {
            Some(Binding::Fun(label, arity)) => Ok((*label, *arity)),
            Some(Binding::Var(_)) => Err(CompileError::NotAFunction(name, pos)),
            None => Err(CompileError::Undefined(name, pos)),
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique_and_deterministic() {
        let mut env = Env::new();
        assert_eq!(env.gen_label().as_str(), "L0");
        assert_eq!(env.gen_label().as_str(), "L1");
        env.begin_scope();
        // Top-level functions get stable labels without consuming a number.
        assert_eq!(env.gen_fun_label(id("f")).as_str(), "Lf");
        env.begin_scope();
        assert_eq!(env.gen_fun_label(id("f")).as_str(), "Lf_2");
        assert_eq!(env.gen_label().as_str(), "L3");
    }

    #[test]
    fn globals_at_depth_one_locals_below() {
        let mut env = Env::new();
        env.begin_scope();
        assert_eq!(env.add_var(id("g")), Loc::Global(id("g")));
        env.begin_scope();
        assert_eq!(env.add_var(id("x")), Loc::Local(0));
        assert_eq!(env.add_var(id("y")), Loc::Local(1));
        // Inner bindings shadow outer ones.
        assert_eq!(env.add_var(id("g")), Loc::Local(2));
        let pos = Pos::new(1, 1);
        assert_eq!(env.lookup_var(pos, id("g")).unwrap(), Loc::Local(2));
        env.end_scope();
        assert_eq!(env.lookup_var(pos, id("g")).unwrap(), Loc::Global(id("g")));
    }

    #[test]
    fn lookups_enforce_binding_kinds() {
        let mut env = Env::new();
        env.begin_scope();
        env.add_var(id("x"));
        env.add_fun(id("f"), id("Lf"), 1);
        let pos = Pos::new(2, 3);
        assert_eq!(
            env.lookup_var(pos, id("f")).unwrap_err().to_string(),
            "f does not designate a variable at 2:3"
        );
        assert_eq!(
            env.lookup_fun(pos, id("x")).unwrap_err().to_string(),
            "x does not designate a function at 2:3"
        );
        assert_eq!(
            env.lookup_fun(pos, id("g")).unwrap_err().to_string(),
            "name g is undefined at 2:3"
        );
    }

    #[test]
    fn pending_functions_capture_their_scope() {
        use crate::front::ast::Expr;
        let mut env = Env::new();
        env.begin_scope();
        env.add_var(id("g"));
        env.add_fun(id("f"), id("Lf"), 0);
        env.remember_fun(id("Lf"), &[], &Expr::Const(0));
        // Later bindings must not leak into the snapshot.
        env.add_var(id("late"));
        let pending = env.drain_pending();
        assert_eq!(pending.len(), 1);
        env.begin_fun(&pending[0]);
        let pos = Pos::new(1, 1);
        assert!(env.lookup_var(pos, id("g")).is_ok());
        assert!(env.lookup_fun(pos, id("f")).is_ok());
        assert!(env.lookup_var(pos, id("late")).is_err());
        // The counters were reset for the new function.
        env.add_arg(id("n"));
        assert_eq!(env.lookup_var(pos, id("n")).unwrap(), Loc::Arg(0));
    }
}
