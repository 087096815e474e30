//! Code generation: stack machine to x86.
//!
//! Each stack machine instruction is consumed by a symbolic interpretation
//! of the operand stack whose "values" are x86 locations ([Opnd]).  Pushing
//! allocates a location (registers first, then frame slots), popping hands
//! the location back, and the emitted instructions move the run-time values
//! between exactly those locations.
//!
//! Control flow needs care: the run-time stack layout at a label must be the
//! same along every edge into it.  Jumps record the symbolic stack under the
//! target label in a stack map; a label reached after an unconditional
//! transfer (the *barrier* case) reinstates the recorded stack, while a
//! fallthrough label keeps the current one.  The front-end balances pushes
//! and pops symmetrically across branches, so the two always agree.

use crate::common::{id, Id, Map, Set};
use crate::front::ast::BOp;
use crate::middle::sm::{self, Cond};

use super::asm::{
    global_name, ArithOp, Instruction, Opnd, Program, CC, EAX, EBP, EDX, ESP, NUM_STACK_REGS,
    WORD_SIZE,
};

/// A stack machine instruction the backend has no rule for.
#[derive(derive_more::Display, Debug)]
#[display("codegeneration for {_0} is not yet implemented")]
pub struct CodegenError(pub sm::Insn);

impl std::error::Error for CodegenError {}

/// The code generation environment.
pub struct Env {
    // The symbolic operand stack; the top is the most recent allocation.
    stack: Vec<Opnd>,
    // High-water count of local-side frame slots used by the symbolic stack.
    stack_slots: usize,
    globals: Set<Id>,
    // Set right after an unconditional transfer: the next label must
    // reinstate the recorded stack instead of keeping the current one.
    barrier: bool,
    // Frozen symbolic stacks, recorded at jumps and read at labels.
    stack_map: Map<Id, Vec<Opnd>>,
    // Label of the function being generated.
    fun: Id,
}

impl Env {
    pub fn new() -> Self {
        Env {
            stack: vec![],
            stack_slots: 0,
            globals: Set::new(),
            barrier: false,
            stack_map: Map::new(),
            fun: id("main"),
        }
    }

    /// Allocate a location for a fresh symbolic stack slot and push it.
    /// Registers are handed out first; once they run out, local-side frame
    /// slots follow the current top.
    pub fn allocate(&mut self) -> Opnd {
        let opnd = match self.stack.last() {
            None => Opnd::R(0),
            Some(Opnd::R(k)) if k + 1 < NUM_STACK_REGS => Opnd::R(k + 1),
            Some(Opnd::R(_)) => Opnd::S(0),
            Some(Opnd::S(k)) => Opnd::S(k + 1),
            Some(_) => Opnd::S(0),
        };
        if let Opnd::S(k) = opnd {
            self.stack_slots = self.stack_slots.max(k as usize + 1);
        }
        self.stack.push(opnd.clone());
        opnd
    }

    pub fn push(&mut self, opnd: Opnd) {
        self.stack.push(opnd);
    }

    pub fn pop(&mut self) -> Opnd {
        self.stack.pop().expect("symbolic stack underflow")
    }

    /// Pop the top two: `(top, second)`.
    pub fn pop2(&mut self) -> (Opnd, Opnd) {
        let x = self.pop();
        let y = self.pop();
        (x, y)
    }

    pub fn peek(&self) -> Opnd {
        self.stack
            .last()
            .cloned()
            .expect("symbolic stack underflow")
    }

    pub fn add_global(&mut self, x: Id) {
        self.globals.insert(x);
    }

    pub fn globals(&self) -> Set<Id> {
        self.globals.clone()
    }

    /// Materialize a binding's location as an operand.
    pub fn loc(&self, loc: sm::Loc) -> Opnd {
        match loc {
            sm::Loc::Global(x) => Opnd::M(global_name(x)),
            sm::Loc::Arg(i) => Opnd::S(-1 - i as i32),
            sm::Loc::Local(i) => Opnd::S(i as i32),
        }
    }

    pub fn is_barrier(&self) -> bool {
        self.barrier
    }

    pub fn set_barrier(&mut self) {
        self.barrier = true;
    }

    pub fn clear_barrier(&mut self) {
        self.barrier = false;
    }

    /// Record the current symbolic stack under a label.
    pub fn set_stack(&mut self, label: Id) {
        self.stack_map.insert(label, self.stack.clone());
        self.barrier = false;
    }

    /// Reinstate the stack recorded for a label, if any.
    pub fn retrieve_stack(&mut self, label: Id) {
        if let Some(stack) = self.stack_map.get(&label) {
            self.stack = stack.clone();
        }
    }

    pub fn enter_function(&mut self, label: Id) {
        self.fun = label;
    }

    pub fn current_function(&self) -> Id {
        self.fun
    }

    /// The registers on the symbolic stack below the top `depth` entries,
    /// bottom-up: the values that must survive a call whose arguments
    /// occupy the top `depth` slots.
    pub fn live_registers(&self, depth: usize) -> Vec<Opnd> {
        let keep = self
            .stack
            .len()
            .checked_sub(depth)
            .expect("call with more arguments than the symbolic stack holds");
        self.stack[..keep]
            .iter()
            .filter(|opnd| matches!(opnd, Opnd::R(_)))
            .cloned()
            .collect()
    }

    /// High-water mark of local-side frame slots the symbolic stack used.
    pub fn stack_slots(&self) -> usize {
        self.stack_slots
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate x86 code for a stack machine program.
pub fn codegen(program: &[sm::Insn]) -> Result<Program, CodegenError> {
    let mut env = Env::new();
    let mut text = vec![];
    for insn in program {
        text.push(Instruction::Comment(insn.to_string()));
        step(&mut env, &mut text, insn)?;
    }
    Ok(Program {
        globals: env.globals(),
        text,
    })
}

// Emit a word move; two-memory forms are split through %eax.
fn move_value(text: &mut Vec<Instruction>, src: Opnd, dst: Opnd) {
    if src.is_memory() && dst.is_memory() {
        text.push(Instruction::Mov {
            src,
            dst: Opnd::R(EAX),
        });
        text.push(Instruction::Mov {
            src: Opnd::R(EAX),
            dst,
        });
    } else {
        text.push(Instruction::Mov { src, dst });
    }
}

fn step(env: &mut Env, text: &mut Vec<Instruction>, insn: &sm::Insn) -> Result<(), CodegenError> {
    use Instruction::*;
    let eax = Opnd::R(EAX);
    let edx = Opnd::R(EDX);
    match insn {
        sm::Insn::Const(n) => {
            let s = env.allocate();
            text.push(Mov {
                src: Opnd::L(*n),
                dst: s,
            });
        }
        sm::Insn::Ld(l) => {
            let src = env.loc(*l);
            let s = env.allocate();
            move_value(text, src, s);
        }
        sm::Insn::Lda(l) => {
            let src = env.loc(*l);
            let s = env.allocate();
            text.push(Lea {
                src,
                dst: eax.clone(),
            });
            text.push(Mov { src: eax, dst: s });
        }
        sm::Insn::St(l) => {
            // The value stays on the symbolic stack: it is the result of
            // the assignment expression.
            let dst = env.loc(*l);
            move_value(text, env.peek(), dst);
        }
        sm::Insn::Sti => {
            let (x, y) = env.pop2();
            text.push(Mov {
                src: x,
                dst: eax.clone(),
            });
            text.push(Mov {
                src: y.clone(),
                dst: edx.clone(),
            });
            text.push(Mov {
                src: eax.clone(),
                dst: Opnd::I(0, Box::new(edx)),
            });
            text.push(Mov {
                src: eax,
                dst: y.clone(),
            });
            env.push(y);
        }
        sm::Insn::Binop(op) => binop(env, text, *op),
        sm::Insn::Read => {
            let s = env.allocate();
            text.push(Call(id("Lread")));
            text.push(Mov { src: eax, dst: s });
        }
        sm::Insn::Write => {
            let s = env.pop();
            text.push(Push(s));
            text.push(Call(id("Lwrite")));
            text.push(Pop(eax));
        }
        sm::Insn::Drop => {
            env.pop();
        }
        sm::Insn::Label(l) => {
            if env.is_barrier() {
                env.retrieve_stack(*l);
                env.clear_barrier();
            }
            text.push(Label(*l));
        }
        sm::Insn::Jmp(l) => {
            env.set_stack(*l);
            env.set_barrier();
            text.push(Jmp(*l));
        }
        sm::Insn::CJmp(cond, l) => {
            let s = env.pop();
            env.set_stack(*l);
            text.push(Arith {
                op: ArithOp::Cmp,
                src: Opnd::L(0),
                dst: s,
            });
            let cond = match cond {
                Cond::Z => CC::Z,
                Cond::Nz => CC::Nz,
            };
            text.push(JmpCC {
                cond,
                target: *l,
            });
        }
        sm::Insn::Begin(f, _arity, locals) => {
            env.enter_function(*f);
            text.push(Push(Opnd::R(EBP)));
            text.push(Mov {
                src: Opnd::R(ESP),
                dst: Opnd::R(EBP),
            });
            if *locals > 0 {
                text.push(Arith {
                    op: ArithOp::Sub,
                    src: Opnd::L(WORD_SIZE * *locals as i32),
                    dst: Opnd::R(ESP),
                });
            }
        }
        sm::Insn::End => {
            if env.current_function() == id("main") {
                text.push(Mov {
                    src: Opnd::R(EBP),
                    dst: Opnd::R(ESP),
                });
                text.push(Pop(Opnd::R(EBP)));
                text.push(Arith {
                    op: ArithOp::Xor,
                    src: eax.clone(),
                    dst: eax,
                });
                text.push(Ret);
            } else {
                let y = env.pop();
                text.push(Mov {
                    src: Opnd::R(EBP),
                    dst: Opnd::R(ESP),
                });
                text.push(Pop(Opnd::R(EBP)));
                text.push(Mov { src: y, dst: eax });
                text.push(Ret);
            }
        }
        sm::Insn::Call(f, n) => {
            // Everything below the arguments that lives in a register must
            // survive the call; collect it before the pops.
            let live = env.live_registers(*n);
            let mut args = Vec::with_capacity(*n);
            for _ in 0..*n {
                args.push(env.pop());
            }
            let s = env.allocate();
            for r in &live {
                text.push(Push(r.clone()));
            }
            // Pop order is rightmost-first, so pushing in that order leaves
            // the leftmost argument at the lowest address: cdecl.
            for arg in args {
                text.push(Push(arg));
            }
            text.push(Call(*f));
            if *n > 0 {
                text.push(Arith {
                    op: ArithOp::Add,
                    src: Opnd::L(WORD_SIZE * *n as i32),
                    dst: Opnd::R(ESP),
                });
            }
            for r in live.iter().rev() {
                text.push(Pop(r.clone()));
            }
            text.push(Mov { src: eax, dst: s });
        }
        sm::Insn::Global(x) => env.add_global(*x),
        sm::Insn::Dup => return Err(CodegenError(insn.clone())),
    }
    Ok(())
}

fn binop(env: &mut Env, text: &mut Vec<Instruction>, op: BOp) {
    use Instruction::*;
    let eax = Opnd::R(EAX);
    let edx = Opnd::R(EDX);
    let (x, y) = env.pop2();
    match op {
        BOp::Add | BOp::Sub | BOp::Mul => {
            let op = match op {
                BOp::Add => ArithOp::Add,
                BOp::Sub => ArithOp::Sub,
                _ => ArithOp::Mul,
            };
            text.push(Mov {
                src: y.clone(),
                dst: eax.clone(),
            });
            text.push(Arith {
                op,
                src: x,
                dst: eax.clone(),
            });
            text.push(Mov {
                src: eax,
                dst: y.clone(),
            });
        }
        BOp::Div | BOp::Rem => {
            text.push(Mov {
                src: y.clone(),
                dst: eax.clone(),
            });
            text.push(Cltd);
            text.push(IDiv(x));
            let result = if op == BOp::Div { eax } else { edx };
            text.push(Mov {
                src: result,
                dst: y.clone(),
            });
        }
        BOp::Lt | BOp::Le | BOp::Eq | BOp::Ne | BOp::Gt | BOp::Ge => {
            let cond = match op {
                BOp::Lt => CC::L,
                BOp::Le => CC::Le,
                BOp::Eq => CC::E,
                BOp::Ne => CC::Ne,
                BOp::Ge => CC::Ge,
                _ => CC::G,
            };
            text.push(Mov {
                src: y.clone(),
                dst: edx.clone(),
            });
            text.push(Arith {
                op: ArithOp::Xor,
                src: eax.clone(),
                dst: eax.clone(),
            });
            text.push(Arith {
                op: ArithOp::Cmp,
                src: x,
                dst: edx,
            });
            text.push(Set {
                cond,
                reg: "%al",
            });
            text.push(Mov {
                src: eax,
                dst: y.clone(),
            });
        }
        BOp::And | BOp::Or => {
            // Not short-circuiting: both operands were evaluated.  Each is
            // normalized to 0/1, the two are combined, and the result is
            // normalized once more.
            let combine = if op == BOp::And {
                ArithOp::And
            } else {
                ArithOp::Or
            };
            text.push(Mov {
                src: x,
                dst: eax.clone(),
            });
            text.push(Arith {
                op: combine,
                src: eax.clone(),
                dst: eax.clone(),
            });
            text.push(Mov {
                src: Opnd::L(0),
                dst: eax.clone(),
            });
            text.push(Set {
                cond: CC::Ne,
                reg: "%al",
            });
            text.push(Mov {
                src: y.clone(),
                dst: edx.clone(),
            });
            text.push(Arith {
                op: combine,
                src: edx.clone(),
                dst: edx.clone(),
            });
            text.push(Mov {
                src: Opnd::L(0),
                dst: edx.clone(),
            });
            text.push(Set {
                cond: CC::Ne,
                reg: "%dl",
            });
            text.push(Arith {
                op: combine,
                src: edx,
                dst: eax.clone(),
            });
            text.push(Mov {
                src: Opnd::L(0),
                dst: eax.clone(),
            });
            text.push(Set {
                cond: CC::Ne,
                reg: "%al",
            });
            text.push(Mov {
                src: eax,
                dst: y.clone(),
            });
        }
    }
    env.push(y);
}
