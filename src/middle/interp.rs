//! The stack machine interpreter.
//!
//! Executes a lowered program directly.  This is the second reference point
//! for the pipeline: the lowering is checked against the AST interpreter
//! here, and the x86 back-end is expected to agree with this machine.

use std::collections::VecDeque;

use derive_more::Display;

use crate::common::{id, Id, Map};

use super::sm::{Cond, Insn, Loc};

#[derive(Display)]
#[display("Runtime error: {}", self.0)]
pub struct RunError(pub String);

impl std::fmt::Debug for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for RunError {}

// Stack values: integers, plus the references pushed by `LDA` and consumed
// by `STI`.  References are resolved against the frame that created them,
// which is always the current one.
#[derive(Clone, Copy, Debug)]
enum Value {
    Int(i32),
    Ref(Loc),
}

struct Frame {
    ret: usize,
    args: Vec<i32>,
    locals: Vec<i32>,
}

/// Run a stack machine program against the given input queue, returning what
/// it wrote.
pub fn run(program: &[Insn], input: &[i32]) -> Result<Vec<i32>, RunError> {
    let mut labels: Map<Id, usize> = Map::new();
    for (index, insn) in program.iter().enumerate() {
        if let Insn::Label(l) = insn {
            if labels.insert(*l, index).is_some() {
                return Err(RunError(format!("label {l} is defined twice")));
            }
        }
    }
    let entry = *labels
        .get(&id("main"))
        .ok_or_else(|| RunError("no main label".to_string()))?;

    let mut machine = Machine {
        input: input.iter().copied().collect(),
        output: vec![],
        globals: Map::new(),
        stack: vec![],
        frames: vec![Frame {
            ret: usize::MAX,
            args: vec![],
            locals: vec![],
        }],
    };

    let mut ip = entry;
    loop {
        let insn = program
            .get(ip)
            .ok_or_else(|| RunError("fell off the end of the program".to_string()))?;
        match insn {
            Insn::Label(_) => {}
            Insn::Const(n) => machine.stack.push(Value::Int(*n)),
            Insn::Read => {
                let v = machine
                    .input
                    .pop_front()
                    .ok_or_else(|| RunError("unexpected end of input".to_string()))?;
                machine.stack.push(Value::Int(v));
            }
            Insn::Write => {
                let v = machine.pop_int()?;
                machine.output.push(v);
            }
            Insn::Binop(op) => {
                let r = machine.pop_int()?;
                let l = machine.pop_int()?;
                let v = op
                    .apply(l, r)
                    .ok_or_else(|| RunError("division by zero".to_string()))?;
                machine.stack.push(Value::Int(v));
            }
            Insn::Ld(loc) => {
                let v = machine.load(*loc)?;
                machine.stack.push(Value::Int(v));
            }
            Insn::Lda(loc) => machine.stack.push(Value::Ref(*loc)),
            Insn::St(loc) => {
                let v = machine.peek_int()?;
                machine.store(*loc, v)?;
            }
            Insn::Sti => {
                let v = machine.pop_int()?;
                let loc = match machine.pop()? {
                    Value::Ref(loc) => loc,
                    Value::Int(_) => {
                        return Err(RunError("STI expects a reference".to_string()))
                    }
                };
                machine.store(loc, v)?;
                machine.stack.push(Value::Int(v));
            }
            Insn::Drop => {
                machine.pop()?;
            }
            Insn::Dup => {
                let top = *machine
                    .stack
                    .last()
                    .ok_or_else(|| RunError("DUP on an empty stack".to_string()))?;
                machine.stack.push(top);
            }
            Insn::Jmp(l) => {
                ip = target(&labels, *l)?;
                continue;
            }
            Insn::CJmp(cond, l) => {
                let v = machine.pop_int()?;
                let taken = match cond {
                    Cond::Z => v == 0,
                    Cond::Nz => v != 0,
                };
                if taken {
                    ip = target(&labels, *l)?;
                    continue;
                }
            }
            Insn::Call(f, n) => {
                let mut args = Vec::with_capacity(*n);
                for _ in 0..*n {
                    args.push(machine.pop_int()?);
                }
                // Popped right-to-left; the callee numbers them from the
                // left.
                args.reverse();
                machine.frames.push(Frame {
                    ret: ip + 1,
                    args,
                    locals: vec![],
                });
                ip = target(&labels, *f)?;
                continue;
            }
            Insn::Begin(_, arity, locals) => {
                let frame = machine.frames.last_mut().unwrap();
                if frame.args.len() != *arity {
                    return Err(RunError(format!(
                        "{insn}: called with {} arguments",
                        frame.args.len()
                    )));
                }
                frame.locals = vec![0; *locals];
            }
            Insn::End => {
                if machine.frames.len() == 1 {
                    return Ok(machine.output);
                }
                let v = machine.pop_int()?;
                let frame = machine.frames.pop().unwrap();
                machine.stack.push(Value::Int(v));
                ip = frame.ret;
                continue;
            }
            Insn::Global(x) => {
                machine.globals.insert(*x, 0);
            }
        }
        ip += 1;
    }
}

fn target(labels: &Map<Id, usize>, l: Id) -> Result<usize, RunError> {
    labels
        .get(&l)
        .copied()
        .ok_or_else(|| RunError(format!("jump to an unknown label {l}")))
}

struct Machine {
    input: VecDeque<i32>,
    output: Vec<i32>,
    globals: Map<Id, i32>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl Machine {
    fn pop(&mut self) -> Result<Value, RunError> {
        self.stack
            .pop()
            .ok_or_else(|| RunError("pop on an empty stack".to_string()))
    }

    fn pop_int(&mut self) -> Result<i32, RunError> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            Value::Ref(_) => Err(RunError("expected an integer, found a reference".to_string())),
        }
    }

    fn peek_int(&self) -> Result<i32, RunError> {
        match self.stack.last() {
            Some(Value::Int(v)) => Ok(*v),
            Some(Value::Ref(_)) => {
                Err(RunError("expected an integer, found a reference".to_string()))
            }
            None => Err(RunError("peek on an empty stack".to_string())),
        }
    }

    fn load(&self, loc: Loc) -> Result<i32, RunError> {
        let frame = self.frames.last().unwrap();
        match loc {
            Loc::Arg(i) => frame.args.get(i).copied(),
            Loc::Local(i) => frame.locals.get(i).copied(),
            Loc::Global(x) => self.globals.get(&x).copied(),
        }
        .ok_or_else(|| RunError(format!("load from an unknown location {loc}")))
    }

    fn store(&mut self, loc: Loc, v: i32) -> Result<(), RunError> {
        let frame = self.frames.last_mut().unwrap();
        let slot = match loc {
            Loc::Arg(i) => frame.args.get_mut(i),
            Loc::Local(i) => frame.locals.get_mut(i),
            Loc::Global(x) => self.globals.get_mut(&x),
        };
        match slot {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(RunError(format!("store to an unknown location {loc}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::BOp;
    use crate::front::{eval, parse::parse};
    use crate::middle::lower::lower;

    // Compile and run on the stack machine, and cross-check the result
    // against the reference interpreter on the same tree.
    fn check(src: &str, input: &[i32], expected: &[i32]) {
        let ast = parse(src).unwrap();
        let sm = lower(&ast).unwrap();
        assert_eq!(run(&sm, input).unwrap(), expected, "stack machine: {src}");
        assert_eq!(eval::run(&ast, input).unwrap(), expected, "reference: {src}");
    }

    #[test]
    fn straight_line() {
        check("write(1+2*3)", &[], &[7]);
    }

    #[test]
    fn read_square() {
        check("local x; read(x); write(x*x)", &[5], &[25]);
    }

    #[test]
    fn while_sum() {
        check(
            "local n = 10, s = 0; while n > 0 do s := s + n; n := n - 1 od; write(s)",
            &[],
            &[55],
        );
    }

    #[test]
    fn factorial() {
        check(
            "fun fact(n) { if n == 0 then 1 else n * fact(n-1) fi } write(fact(5))",
            &[],
            &[120],
        );
    }

    #[test]
    fn mutual_recursion() {
        check(
            "fun even(n) { if n == 0 then 1 else odd(n-1) fi } \
             fun odd(n) { if n == 0 then 0 else even(n-1) fi } \
             write(even(7))",
            &[],
            &[0],
        );
    }

    #[test]
    fn sum_and_difference() {
        check(
            "local a, b; read(a); read(b); write(a+b); write(a-b)",
            &[3, 4],
            &[7, -1],
        );
    }

    #[test]
    fn many_simultaneous_temporaries() {
        // Deep enough to spill past the three stack registers in the
        // back-end; here it checks the lowering keeps the operand order.
        check(
            "local a = 1, b = 2, c = 3, d = 4, e = 5, f = 6, g = 7, h = 8; \
             write(((a+b)+(c+d))+((e+f)+(g+h)))",
            &[],
            &[36],
        );
    }

    #[test]
    fn nested_call_arguments() {
        check(
            "fun add(a, b) { a + b } write(add(add(1, 2), add(3, add(4, 5))))",
            &[],
            &[15],
        );
    }

    #[test]
    fn function_ending_in_assignment() {
        check(
            "local g; fun set(n) { g := n * 2 } write(set(21)); write(g)",
            &[],
            &[42, 42],
        );
    }

    #[test]
    fn argument_order_is_left_to_right() {
        check("fun sub(a, b) { a - b } write(sub(10, 4))", &[], &[6]);
    }

    #[test]
    fn repeat_scenario() {
        check(
            "local n = 0; repeat n := n + 1 until n >= 3; write(n)",
            &[],
            &[3],
        );
    }

    #[test]
    fn logical_connectives_evaluate_both_sides() {
        check(
            "local a; write((a := 1) && (a := 0)); write(a); \
             write((a := 0) !! (a := 3)); write(a)",
            &[],
            &[0, 0, 1, 3],
        );
    }

    #[test]
    fn dup_duplicates_the_top() {
        use crate::common::id;
        let program = [
            Insn::Label(id("main")),
            Insn::Begin(id("main"), 0, 0),
            Insn::Const(21),
            Insn::Dup,
            Insn::Binop(BOp::Add),
            Insn::Write,
            Insn::End,
        ];
        assert_eq!(run(&program, &[]).unwrap(), vec![42]);
    }

    #[test]
    fn sti_stores_through_a_reference() {
        use crate::common::id;
        let x = id("x");
        let program = [
            Insn::Label(id("main")),
            Insn::Begin(id("main"), 0, 0),
            Insn::Global(x),
            Insn::Lda(Loc::Global(x)),
            Insn::Const(7),
            Insn::Sti,
            Insn::Write,
            Insn::End,
        ];
        assert_eq!(run(&program, &[]).unwrap(), vec![7]);
    }

    #[test]
    fn input_underrun_is_reported() {
        let sm = lower(&parse("local x; read(x)").unwrap()).unwrap();
        assert!(run(&sm, &[]).is_err());
    }
}
