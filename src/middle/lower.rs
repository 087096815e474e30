//! Lowering from the AST to the stack machine.
//!
//! A straight recursive walk.  Function bodies are not compiled where they
//! are declared: declaring binds the name to a fresh label and queues the
//! body together with a snapshot of the environment, and the queue is
//! drained after the main body.  Bodies compiled from the queue may declare
//! further functions, so the drain iterates until the queue stays empty;
//! this is what lets mutually recursive definitions resolve.

use crate::common::id;
use crate::front::ast::{Def, Expr};

use super::env::{CompileError, Env};
use super::sm::{Cond, Insn, Loc};

/// Lower a whole program to a stack machine program.
pub fn lower(program: &Expr) -> Result<Vec<Insn>, CompileError> {
    let mut env = Env::new();
    let main = id("main");

    let mut body = vec![];
    compile(&mut env, &mut body, program)?;

    let mut code = vec![Insn::Label(main), Insn::Begin(main, 0, env.locals())];
    code.append(&mut body);
    code.push(Insn::End);

    loop {
        let pending = env.drain_pending();
        if pending.is_empty() {
            break;
        }
        for fun in pending {
            env.begin_fun(&fun);
            for &arg in &fun.args {
                env.add_arg(arg);
            }
            let mut body = vec![];
            compile(&mut env, &mut body, &fun.body)?;
            code.push(Insn::Label(fun.label));
            code.push(Insn::Begin(fun.label, fun.args.len(), env.locals()));
            code.append(&mut body);
            code.push(Insn::End);
        }
    }
    Ok(code)
}

fn compile(env: &mut Env, code: &mut Vec<Insn>, e: &Expr) -> Result<(), CompileError> {
    match e {
        Expr::Const(n) => code.push(Insn::Const(*n)),
        Expr::Var(pos, x) => code.push(Insn::Ld(env.lookup_var(*pos, *x)?)),
        Expr::Ref(pos, x) => code.push(Insn::Lda(env.lookup_var(*pos, *x)?)),
        Expr::Read(pos, x) => {
            let loc = env.lookup_var(*pos, *x)?;
            code.push(Insn::Read);
            code.push(Insn::St(loc));
            code.push(Insn::Drop);
        }
        Expr::Write(e) => {
            compile(env, code, e)?;
            code.push(Insn::Write);
        }
        Expr::Binop(op, l, r) => {
            compile(env, code, l)?;
            compile(env, code, r)?;
            code.push(Insn::Binop(*op));
        }
        Expr::Assn(lhs, rhs) => match **lhs {
            // Plain assignment stores directly; anything else evaluates the
            // left-hand side to an address and stores through it.
            Expr::Ref(pos, x) => {
                let loc = env.lookup_var(pos, x)?;
                compile(env, code, rhs)?;
                code.push(Insn::St(loc));
            }
            _ => {
                compile(env, code, lhs)?;
                compile(env, code, rhs)?;
                code.push(Insn::Sti);
            }
        },
        Expr::Seq(a, b) => {
            compile(env, code, a)?;
            compile(env, code, b)?;
        }
        Expr::Ignore(e) => {
            compile(env, code, e)?;
            code.push(Insn::Drop);
        }
        Expr::Skip => {}
        Expr::If(c, t, f) => {
            let else_label = env.gen_label();
            let end_label = env.gen_label();
            compile(env, code, c)?;
            code.push(Insn::CJmp(Cond::Z, else_label));
            compile(env, code, t)?;
            code.push(Insn::Jmp(end_label));
            code.push(Insn::Label(else_label));
            compile(env, code, f)?;
            code.push(Insn::Label(end_label));
        }
        Expr::While(c, s) => {
            let cond_label = env.gen_label();
            let body_label = env.gen_label();
            code.push(Insn::Jmp(cond_label));
            code.push(Insn::Label(body_label));
            compile(env, code, s)?;
            code.push(Insn::Label(cond_label));
            compile(env, code, c)?;
            code.push(Insn::CJmp(Cond::Nz, body_label));
        }
        Expr::Repeat(s, c) => {
            let start_label = env.gen_label();
            code.push(Insn::Label(start_label));
            compile(env, code, s)?;
            compile(env, code, c)?;
            code.push(Insn::CJmp(Cond::Z, start_label));
        }
        Expr::Call(pos, f, args) => {
            for arg in args {
                compile(env, code, arg)?;
            }
            let (label, _arity) = env.lookup_fun(*pos, *f)?;
            code.push(Insn::Call(label, args.len()));
        }
        Expr::Scope(defs, body) => {
            env.begin_scope();
            // First bind every definition of the scope, so that bodies
            // queued below can see all of them (mutual recursion).
            let mut prelude = vec![];
            let mut fun_labels = vec![];
            for def in defs {
                match def {
                    Def::Local(names) => {
                        for &x in names {
                            if let Loc::Global(_) = env.add_var(x) {
                                prelude.push(Insn::Global(x));
                            }
                        }
                    }
                    Def::Fun(f, args, _) => {
                        let label = env.gen_fun_label(*f);
                        env.add_fun(*f, label, args.len());
                        fun_labels.push(label);
                    }
                }
            }
            let mut fun_labels = fun_labels.into_iter();
            for def in defs {
                if let Def::Fun(_, args, fbody) = def {
                    let label = fun_labels.next().unwrap();
                    env.remember_fun(label, args, fbody);
                }
            }
            code.extend(prelude);
            compile(env, code, body)?;
            env.end_scope();
        }
    }
    Ok(())
}
