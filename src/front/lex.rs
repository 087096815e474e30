//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::Pos;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Where in the input this token starts.
    pub pos: Pos,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("local")]
    Local,
    #[display("fun")]
    Fun,
    #[display("if")]
    If,
    #[display("then")]
    Then,
    #[display("elif")]
    Elif,
    #[display("else")]
    Else,
    #[display("fi")]
    Fi,
    #[display("while")]
    While,
    #[display("do")]
    Do,
    #[display("od")]
    Od,
    #[display("repeat")]
    Repeat,
    #[display("until")]
    Until,
    #[display("skip")]
    Skip,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display(":=")]
    Assign,
    #[display("=")]
    Init,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("<=")]
    Le,
    #[display("<")]
    Lt,
    #[display(">=")]
    Ge,
    #[display(">")]
    Gt,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    And,
    #[display("!!")]
    Or,
}

pub struct LexError(pub Pos, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: usize,
    col: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        // Order matters: keywords before identifiers, two-character operators
        // before their one-character prefixes.
        let table: &[(&str, TokenKind)] = &[
            (r"\Alocal\b", Local),
            (r"\Afun\b", Fun),
            (r"\Aif\b", If),
            (r"\Athen\b", Then),
            (r"\Aelif\b", Elif),
            (r"\Aelse\b", Else),
            (r"\Afi\b", Fi),
            (r"\Awhile\b", While),
            (r"\Ado\b", Do),
            (r"\Aod\b", Od),
            (r"\Arepeat\b", Repeat),
            (r"\Auntil\b", Until),
            (r"\Askip\b", Skip),
            (r"\Aread\b", Read),
            (r"\Awrite\b", Write),
            (r"\A[A-Za-z_][A-Za-z_0-9]*", Id),
            (r"\A[0-9]+", Num),
            (r"\A:=", Assign),
            (r"\A==", Eq),
            (r"\A=", Init),
            (r"\A!=", Ne),
            (r"\A!!", Or),
            (r"\A&&", And),
            (r"\A<=", Le),
            (r"\A<", Lt),
            (r"\A>=", Ge),
            (r"\A>", Gt),
            (r"\A;", Semi),
            (r"\A,", Comma),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A/", Slash),
            (r"\A%", Percent),
        ];
        Lexer {
            input,
            pos: 0,
            line: 1,
            col: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n]|(?:--[^\n]*))*").unwrap(),
            matchers: table
                .iter()
                .map(|(re, kind)| (Regex::new(re).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&mut self) -> bool {
        self.skip_whitespace();
        self.pos == self.input.len()
    }

    // Advance past `len` bytes, keeping the line/column in sync.
    fn advance(&mut self, len: usize) {
        for c in self.input[self.pos..self.pos + len].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += len;
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.advance(m.end())
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.pos == self.input.len() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        let mut found = None;
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                found = Some((m.end(), *kind));
                break;
            }
        }
        if let Some((end, kind)) = found {
            let pos = Pos::new(self.line, self.col);
            let text = &rest[..end];
            self.advance(end);
            return Ok(Some(Token { kind, text, pos }));
        }
        Err(LexError(
            Pos::new(self.line, self.col),
            rest.chars().next().unwrap(),
        ))
    }
}

/// Lex the whole input up front.  The parser works over the resulting slice.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = vec![];
    while let Some(token) = lexer.next()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("local locals while whiler"),
            vec![Local, Id, While, Id]
        );
    }

    #[test]
    fn operators_longest_match() {
        use TokenKind::*;
        assert_eq!(kinds("<= < == = != !! && :="), vec![Le, Lt, Eq, Init, Ne, Or, And, Assign]);
        // `a<=b` must not lex the `<` alone
        assert_eq!(kinds("a<=b"), vec![Id, Le, Id]);
    }

    #[test]
    fn comments_and_positions() {
        let tokens = tokenize("x := 1; -- set x\ny := 2").unwrap();
        assert_eq!(tokens.len(), 7);
        let y = tokens[4];
        assert_eq!(y.text, "y");
        assert_eq!((y.pos.line, y.pos.col), (2, 1));
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("x := #").unwrap_err();
        assert_eq!(err.1, '#');
        assert_eq!((err.0.line, err.0.col), (1, 6));
    }
}
