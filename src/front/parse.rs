//! The parser.
//!
//! Recursive descent over the token slice.  Besides building the tree, the
//! parser settles stack balance for the lowering: sequencing, loop bodies and
//! the program top level are *statement position* (net stack effect zero), so
//! value-producing constructs get wrapped in [Expr::Ignore] there, while
//! operands, guards, arguments and function bodies are *value position*,
//! where constructs that produce nothing (`skip`, loops, `read`, `write`) are
//! rejected.

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::{Id, Pos};

use super::ast::*;
use super::lex::*;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(pub String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ParseError {}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input).map_err(|e| ParseError(e.to_string()))?;
    let mut parser = Parser { tokens, index: 0 };
    let program = parser.scope()?;
    if let Some(t) = parser.peek() {
        return Err(ParseError(format!(
            "expected end of input, found '{}' at {}",
            t.text, t.pos
        )));
    }
    // The top level is statement position: `main` returns no value.
    Ok(statement(program))
}

// Rewrite an expression for statement position: push the transformation to
// the tail of sequences, scopes and conditionals, and discard the value of
// anything that produces one.
fn statement(e: Expr) -> Expr {
    match e {
        Expr::Seq(a, b) => Expr::Seq(a, Box::new(statement(*b))),
        Expr::Scope(defs, b) => Expr::Scope(defs, Box::new(statement(*b))),
        Expr::If(c, t, f) => Expr::If(c, Box::new(statement(*t)), Box::new(statement(*f))),
        Expr::Skip
        | Expr::While(..)
        | Expr::Repeat(..)
        | Expr::Read(..)
        | Expr::Write(..)
        | Expr::Ignore(..) => e,
        value => Expr::Ignore(Box::new(value)),
    }
}

// Check an expression for value position, recursing like [statement].  `pos`
// anchors the diagnostic when a statement-only construct shows up.
fn value(e: Expr, pos: Pos) -> Result<Expr, ParseError> {
    let reject = |what: &str| {
        Err(ParseError(format!(
            "'{what}' does not produce a value at {pos}"
        )))
    };
    match e {
        Expr::Seq(a, b) => Ok(Expr::Seq(a, Box::new(value(*b, pos)?))),
        Expr::Scope(defs, b) => Ok(Expr::Scope(defs, Box::new(value(*b, pos)?))),
        Expr::If(c, t, f) => Ok(Expr::If(
            c,
            Box::new(value(*t, pos)?),
            Box::new(value(*f, pos)?),
        )),
        Expr::Skip => reject("skip"),
        Expr::While(..) => reject("while"),
        Expr::Repeat(..) => reject("repeat"),
        Expr::Read(..) => reject("read"),
        Expr::Write(..) => reject("write"),
        Expr::Ignore(..) => reject("ignore"),
        v => Ok(v),
    }
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    index: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.index)
    }

    fn peek2(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.index + 1)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn bump(&mut self) -> Token<'src> {
        let t = self.tokens[self.index];
        self.index += 1;
        t
    }

    fn here(&self) -> Pos {
        match self.peek() {
            Some(t) => t.pos,
            None => self
                .tokens
                .last()
                .map(|t| t.pos)
                .unwrap_or(Pos::new(1, 1)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(t) if t.kind == kind => Ok(self.bump()),
            Some(t) => Err(ParseError(format!(
                "expected '{}', found '{}' at {}",
                kind, t.text, t.pos
            ))),
            None => Err(ParseError(format!(
                "expected '{}', found end of input",
                kind
            ))),
        }
    }

    fn name(&mut self) -> Result<(Pos, Id), ParseError> {
        let t = self.expect(TokenKind::Id)?;
        Ok((t.pos, crate::common::id(t.text)))
    }

    // scope := def* seq, with `local x = e` initializers prepended to the
    // body as assignments.
    fn scope(&mut self) -> Result<Expr, ParseError> {
        let mut defs = vec![];
        let mut inits = vec![];
        loop {
            if self.at(TokenKind::Local) {
                self.bump();
                let mut names = vec![];
                loop {
                    let (pos, name) = self.name()?;
                    if self.at(TokenKind::Init) {
                        self.bump();
                        let rhs_pos = self.here();
                        let rhs = value(self.expr()?, rhs_pos)?;
                        inits.push(Expr::Ignore(Box::new(Expr::Assn(
                            Box::new(Expr::Ref(pos, name)),
                            Box::new(rhs),
                        ))));
                    }
                    names.push(name);
                    if self.at(TokenKind::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::Semi)?;
                defs.push(Def::Local(names));
            } else if self.at(TokenKind::Fun) {
                self.bump();
                let (_, name) = self.name()?;
                self.expect(TokenKind::LParen)?;
                let mut params = vec![];
                if !self.at(TokenKind::RParen) {
                    loop {
                        let (_, param) = self.name()?;
                        params.push(param);
                        if self.at(TokenKind::Comma) {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::LBrace)?;
                let body_pos = self.here();
                // A function body is value position: it is what the call
                // returns.
                let body = value(self.scope()?, body_pos)?;
                self.expect(TokenKind::RBrace)?;
                defs.push(Def::Fun(name, params, body));
            } else {
                break;
            }
        }
        let mut body = self.seq()?;
        for init in inits.into_iter().rev() {
            body = Expr::Seq(Box::new(init), Box::new(body));
        }
        if defs.is_empty() {
            Ok(body)
        } else {
            Ok(Expr::Scope(defs, Box::new(body)))
        }
    }

    // seq := expr (";" expr)*.  Non-final elements are statement position;
    // the final element is left raw for the caller to place.
    fn seq(&mut self) -> Result<Expr, ParseError> {
        let mut item = self.expr()?;
        let mut done = !self.at(TokenKind::Semi);
        let mut items = vec![];
        while !done {
            self.bump();
            items.push(statement(item));
            item = self.expr()?;
            done = !self.at(TokenKind::Semi);
        }
        let mut result = item;
        for prev in items.into_iter().rev() {
            result = Expr::Seq(Box::new(prev), Box::new(result));
        }
        Ok(result)
    }

    // expr := NAME ":=" expr | disj, with ":=" right-associative.
    fn expr(&mut self) -> Result<Expr, ParseError> {
        if let (Some(t), Some(t2)) = (self.peek(), self.peek2()) {
            if t.kind == TokenKind::Id && t2.kind == TokenKind::Assign {
                let (pos, name) = self.name()?;
                self.bump();
                let rhs_pos = self.here();
                let rhs = value(self.expr()?, rhs_pos)?;
                return Ok(Expr::Assn(
                    Box::new(Expr::Ref(pos, name)),
                    Box::new(rhs),
                ));
            }
        }
        self.disj()
    }

    fn binop_chain(
        &mut self,
        ops: &[(TokenKind, BOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        associative: bool,
    ) -> Result<Expr, ParseError> {
        let mut lhs_pos = self.here();
        let mut lhs = next(self)?;
        while let Some(t) = self.peek() {
            let Some((_, op)) = ops.iter().find(|(kind, _)| *kind == t.kind) else {
                break;
            };
            let op = *op;
            self.bump();
            let rhs_pos = self.here();
            let rhs = value(next(self)?, rhs_pos)?;
            lhs = Expr::Binop(op, Box::new(value(lhs, lhs_pos)?), Box::new(rhs));
            lhs_pos = rhs_pos;
            if !associative {
                break;
            }
        }
        Ok(lhs)
    }

    fn disj(&mut self) -> Result<Expr, ParseError> {
        self.binop_chain(&[(TokenKind::Or, BOp::Or)], Self::conj, true)
    }

    fn conj(&mut self) -> Result<Expr, ParseError> {
        self.binop_chain(&[(TokenKind::And, BOp::And)], Self::cmp, true)
    }

    fn cmp(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        self.binop_chain(
            &[
                (Lt, BOp::Lt),
                (Le, BOp::Le),
                (Eq, BOp::Eq),
                (Ne, BOp::Ne),
                (Gt, BOp::Gt),
                (Ge, BOp::Ge),
            ],
            Self::add,
            false,
        )
    }

    fn add(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        self.binop_chain(&[(Plus, BOp::Add), (Minus, BOp::Sub)], Self::mul, true)
    }

    fn mul(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        self.binop_chain(
            &[(Star, BOp::Mul), (Slash, BOp::Div), (Percent, BOp::Rem)],
            Self::atom,
            true,
        )
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let Some(t) = self.peek() else {
            return Err(ParseError(
                "expected an expression, found end of input".to_string(),
            ));
        };
        match t.kind {
            Num => {
                let t = self.bump();
                let n: i32 = t.text.parse().map_err(|_| {
                    ParseError(format!("number literal out of range at {}", t.pos))
                })?;
                Ok(Expr::Const(n))
            }
            Id => {
                let (pos, name) = self.name()?;
                if self.at(LParen) {
                    self.bump();
                    let mut args = vec![];
                    if !self.at(RParen) {
                        loop {
                            let arg_pos = self.here();
                            args.push(value(self.expr()?, arg_pos)?);
                            if self.at(Comma) {
                                self.bump();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(RParen)?;
                    Ok(Expr::Call(pos, name, args))
                } else {
                    Ok(Expr::Var(pos, name))
                }
            }
            LParen => {
                self.bump();
                let pos = self.here();
                let e = value(self.expr()?, pos)?;
                self.expect(RParen)?;
                Ok(e)
            }
            If => {
                self.bump();
                self.conditional()
            }
            While => {
                self.bump();
                let guard_pos = self.here();
                let guard = value(self.expr()?, guard_pos)?;
                self.expect(Do)?;
                let body = statement(self.seq()?);
                self.expect(Od)?;
                Ok(Expr::While(Box::new(guard), Box::new(body)))
            }
            Repeat => {
                self.bump();
                let body = statement(self.seq()?);
                self.expect(Until)?;
                let guard_pos = self.here();
                let guard = value(self.expr()?, guard_pos)?;
                Ok(Expr::Repeat(Box::new(body), Box::new(guard)))
            }
            Read => {
                self.bump();
                self.expect(LParen)?;
                let (pos, name) = self.name()?;
                self.expect(RParen)?;
                Ok(Expr::Read(pos, name))
            }
            Write => {
                self.bump();
                self.expect(LParen)?;
                let arg_pos = self.here();
                let arg = value(self.expr()?, arg_pos)?;
                self.expect(RParen)?;
                Ok(Expr::Write(Box::new(arg)))
            }
            Skip => {
                self.bump();
                Ok(Expr::Skip)
            }
            _ => Err(ParseError(format!(
                "expected an expression, found '{}' at {}",
                t.text, t.pos
            ))),
        }
    }

    // The rest of a conditional after `if` or `elif`: branches stay raw; the
    // caller places the whole conditional, and [statement]/[value] recurse
    // into the branches.
    fn conditional(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let guard_pos = self.here();
        let guard = value(self.expr()?, guard_pos)?;
        self.expect(Then)?;
        let then_branch = self.seq()?;
        let else_branch = if self.at(Elif) {
            self.bump();
            self.conditional()?
        } else if self.at(Else) {
            self.bump();
            let e = self.seq()?;
            self.expect(Fi)?;
            e
        } else {
            self.expect(Fi)?;
            Expr::Skip
        };
        Ok(Expr::If(
            Box::new(guard),
            Box::new(then_branch),
            Box::new(else_branch),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_statements() {
        let e = parse("write(1+2*3)").unwrap();
        let Expr::Write(arg) = &e else {
            panic!("expected a write, got {e:?}")
        };
        let Expr::Binop(BOp::Add, _, rhs) = arg.as_ref() else {
            panic!("expected +, got {arg:?}")
        };
        assert!(matches!(rhs.as_ref(), Expr::Binop(BOp::Mul, _, _)));
    }

    #[test]
    fn sequencing_discards_values() {
        let e = parse("x := 1; write(x)").unwrap();
        let Expr::Seq(first, second) = &e else {
            panic!("expected a sequence, got {e:?}")
        };
        assert!(matches!(first.as_ref(), Expr::Ignore(_)));
        assert!(matches!(second.as_ref(), Expr::Write(_)));
    }

    #[test]
    fn local_initializers_desugar_to_assignments() {
        let e = parse("local n = 10, s; write(n)").unwrap();
        let Expr::Scope(defs, body) = &e else {
            panic!("expected a scope, got {e:?}")
        };
        assert!(matches!(&defs[..], [Def::Local(names)] if names.len() == 2));
        let Expr::Seq(init, _) = body.as_ref() else {
            panic!("expected the initializer first, got {body:?}")
        };
        assert!(matches!(init.as_ref(), Expr::Ignore(_)));
    }

    #[test]
    fn function_bodies_are_value_position() {
        let e = parse("fun inc(n) { n + 1 } write(inc(41))").unwrap();
        let Expr::Scope(defs, _) = &e else {
            panic!("expected a scope, got {e:?}")
        };
        assert!(matches!(&defs[..], [Def::Fun(_, params, _)] if params.len() == 1));
        assert!(parse("fun bad() { write(1) } write(bad())").is_err());
    }

    #[test]
    fn conditionals_inherit_their_position() {
        // Statement position: branches are statements, else defaults to skip.
        let e = parse("if 1 then write(1) fi").unwrap();
        let Expr::If(_, t, f) = &e else {
            panic!("expected an if, got {e:?}")
        };
        assert!(matches!(t.as_ref(), Expr::Write(_)));
        assert!(matches!(f.as_ref(), Expr::Skip));
        // Value position: both branches must produce values.
        assert!(parse("write(if 1 then 2 else 3 fi)").is_ok());
        assert!(parse("write(if 1 then 2 fi)").is_err());
    }

    #[test]
    fn loops_cannot_be_values() {
        assert!(parse("write(while 1 do skip od)").is_err());
        assert!(parse("while 1 do skip od").is_ok());
    }

    #[test]
    fn elif_chains_nest() {
        let e = parse("if 1 then skip elif 2 then skip else skip fi").unwrap();
        let Expr::If(_, _, f) = &e else {
            panic!("expected an if, got {e:?}")
        };
        assert!(matches!(f.as_ref(), Expr::If(..)));
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = parse("x := y := 1").unwrap();
        let Expr::Ignore(inner) = &e else {
            panic!("expected top-level ignore, got {e:?}")
        };
        let Expr::Assn(_, rhs) = inner.as_ref() else {
            panic!("expected an assignment, got {inner:?}")
        };
        assert!(matches!(rhs.as_ref(), Expr::Assn(_, _)));
    }

    #[test]
    fn reports_position_of_errors() {
        let msg = parse("write(1\nwrite(2)").unwrap_err().0;
        assert!(msg.contains("2:1"), "{msg}");
    }
}
