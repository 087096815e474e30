//! The reference interpreter.
//!
//! Evaluates the AST directly, with the semantics the compiled code has:
//! 32-bit wrapping arithmetic, truncating division, conjunction and
//! disjunction that evaluate both operands, scope depth 1 binding globals,
//! and calls that re-enter depth 1 so a function sees only its own frame and
//! the globals.  Tests cross-check the stack-machine lowering against this.

use std::collections::VecDeque;

use derive_more::Display;

use crate::common::{Id, Map, Pos};

use super::ast::*;

#[derive(Display)]
#[display("Evaluation error: {}", self.0)]
pub struct EvalError(pub String);

impl std::fmt::Debug for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for EvalError {}

/// Evaluate a whole program against the given input queue, returning what it
/// wrote.
pub fn run(program: &Expr, input: &[i32]) -> Result<Vec<i32>, EvalError> {
    let mut evaluator = Evaluator {
        input: input.iter().copied().collect(),
        output: vec![],
        globals: Map::new(),
        vars: vec![Map::new()],
        funs: vec![],
        depth: 0,
    };
    evaluator.eval(program)?;
    Ok(evaluator.output)
}

// A function bound in some scope.  Its static environment is the prefix of
// the function-scope stack up to its defining scope, reconstructed at the
// call site, so mutual recursion between siblings needs no snapshot fixup.
#[derive(Clone)]
struct FunVal {
    params: Vec<Id>,
    body: Expr,
}

struct Evaluator {
    input: VecDeque<i32>,
    output: Vec<i32>,
    globals: Map<Id, i32>,
    // Variable scopes of the current frame, innermost last.
    vars: Vec<Map<Id, i32>>,
    // Function scopes, statically stacked across frames.
    funs: Vec<Map<Id, FunVal>>,
    depth: usize,
}

impl Evaluator {
    fn eval(&mut self, e: &Expr) -> Result<i32, EvalError> {
        match e {
            Expr::Const(n) => Ok(*n),
            Expr::Var(pos, x) => self.read_var(*pos, *x),
            Expr::Ref(pos, x) => Err(EvalError(format!(
                "a bare reference to {x} has no value at {pos}"
            ))),
            Expr::Binop(op, l, r) => {
                let l = self.eval(l)?;
                let r = self.eval(r)?;
                binop(*op, l, r)
            }
            Expr::Assn(lhs, rhs) => {
                let Expr::Ref(pos, x) = **lhs else {
                    return Err(EvalError("unsupported assignment target".to_string()));
                };
                let v = self.eval(rhs)?;
                self.write_var(pos, x, v)?;
                Ok(v)
            }
            Expr::Seq(a, b) => {
                self.eval(a)?;
                self.eval(b)
            }
            Expr::Skip => Ok(0),
            Expr::Read(pos, x) => {
                let v = self.input.pop_front().ok_or_else(|| {
                    EvalError(format!("unexpected end of input at {pos}"))
                })?;
                self.write_var(*pos, *x, v)?;
                Ok(0)
            }
            Expr::Write(e) => {
                let v = self.eval(e)?;
                self.output.push(v);
                Ok(0)
            }
            Expr::If(c, t, f) => {
                if self.eval(c)? != 0 {
                    self.eval(t)
                } else {
                    self.eval(f)
                }
            }
            Expr::While(c, body) => {
                while self.eval(c)? != 0 {
                    self.eval(body)?;
                }
                Ok(0)
            }
            Expr::Repeat(body, c) => {
                loop {
                    self.eval(body)?;
                    if self.eval(c)? != 0 {
                        return Ok(0);
                    }
                }
            }
            Expr::Ignore(e) => {
                self.eval(e)?;
                Ok(0)
            }
            Expr::Call(pos, f, args) => self.call(*pos, *f, args),
            Expr::Scope(defs, body) => self.scope(defs, body),
        }
    }

    fn scope(&mut self, defs: &[Def], body: &Expr) -> Result<i32, EvalError> {
        self.depth += 1;
        self.vars.push(Map::new());
        self.funs.push(Map::new());
        for def in defs {
            match def {
                Def::Local(names) => {
                    for x in names {
                        if self.depth == 1 {
                            self.globals.insert(*x, 0);
                        } else {
                            self.vars.last_mut().unwrap().insert(*x, 0);
                        }
                    }
                }
                Def::Fun(f, params, fbody) => {
                    self.funs.last_mut().unwrap().insert(
                        *f,
                        FunVal {
                            params: params.clone(),
                            body: fbody.clone(),
                        },
                    );
                }
            }
        }
        let result = self.eval(body);
        self.funs.pop();
        self.vars.pop();
        self.depth -= 1;
        result
    }

    fn call(&mut self, pos: Pos, f: Id, args: &[Expr]) -> Result<i32, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let Some(found) = self
            .funs
            .iter()
            .rposition(|scope| scope.contains_key(&f))
        else {
            return Err(EvalError(format!("name {f} is undefined at {pos}")));
        };
        let fun = self.funs[found][&f].clone();
        if fun.params.len() != values.len() {
            return Err(EvalError(format!(
                "{f} expects {} arguments, got {} at {pos}",
                fun.params.len(),
                values.len()
            )));
        }
        let frame: Map<Id, i32> = fun.params.iter().copied().zip(values).collect();
        // Enter the callee: its static function environment is everything up
        // to its defining scope, and it sees a fresh frame at depth 1.
        let saved_vars = std::mem::replace(&mut self.vars, vec![frame]);
        let saved_funs = self.funs.split_off(found + 1);
        let saved_depth = std::mem::replace(&mut self.depth, 1);
        let result = self.eval(&fun.body);
        self.depth = saved_depth;
        self.funs.extend(saved_funs);
        self.vars = saved_vars;
        result
    }

    fn read_var(&self, pos: Pos, x: Id) -> Result<i32, EvalError> {
        for scope in self.vars.iter().rev() {
            if let Some(v) = scope.get(&x) {
                return Ok(*v);
            }
        }
        self.globals
            .get(&x)
            .copied()
            .ok_or_else(|| EvalError(format!("name {x} is undefined at {pos}")))
    }

    fn write_var(&mut self, pos: Pos, x: Id, v: i32) -> Result<(), EvalError> {
        for scope in self.vars.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(&x) {
                *slot = v;
                return Ok(());
            }
        }
        if let Some(slot) = self.globals.get_mut(&x) {
            *slot = v;
            return Ok(());
        }
        Err(EvalError(format!("name {x} is undefined at {pos}")))
    }
}

fn binop(op: BOp, l: i32, r: i32) -> Result<i32, EvalError> {
    op.apply(l, r)
        .ok_or_else(|| EvalError("division by zero".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;

    fn eval(src: &str, input: &[i32]) -> Vec<i32> {
        run(&parse(src).unwrap(), input).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("write(1+2*3)", &[]), vec![7]);
        assert_eq!(eval("write(7/2); write(7%2)", &[]), vec![3, 1]);
        assert_eq!(eval("write(0-7/2)", &[]), vec![-3]);
    }

    #[test]
    fn read_write_round_trip() {
        assert_eq!(eval("read(x); write(x*x)", &[5]), vec![25]);
    }

    #[test]
    fn conjunction_evaluates_both_sides() {
        // Both operands run; the second write happens even when the first
        // operand is already zero.
        assert_eq!(
            eval("local a; write((a := 0) && (a := 2)); write(a)", &[]),
            vec![0, 2]
        );
    }

    #[test]
    fn while_loop_sums() {
        let src = "local n = 10, s = 0; \
                   while n > 0 do s := s + n; n := n - 1 od; write(s)";
        assert_eq!(eval(src, &[]), vec![55]);
    }

    #[test]
    fn repeat_runs_at_least_once() {
        assert_eq!(eval("local n = 5; repeat n := n - 1 until 1; write(n)", &[]), vec![4]);
    }

    #[test]
    fn recursion() {
        let src = "fun fact(n) { if n == 0 then 1 else n * fact(n-1) fi } \
                   write(fact(5))";
        assert_eq!(eval(src, &[]), vec![120]);
    }

    #[test]
    fn mutual_recursion() {
        let src = "fun even(n) { if n == 0 then 1 else odd(n-1) fi } \
                   fun odd(n) { if n == 0 then 0 else even(n-1) fi } \
                   write(even(7))";
        assert_eq!(eval(src, &[]), vec![0]);
    }

    #[test]
    fn globals_are_visible_in_functions() {
        let src = "local g = 3; fun get() { g } write(get())";
        assert_eq!(eval(src, &[]), vec![3]);
    }

    #[test]
    fn undefined_names_report_positions() {
        let err = run(&parse("write(x)").unwrap(), &[]).unwrap_err();
        assert_eq!(err.0, "name x is undefined at 1:7");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(run(&parse("write(1/0)").unwrap(), &[]).is_err());
    }
}
