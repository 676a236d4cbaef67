// Tokenizer + recursive-descent parser for infix math
use std::collections::{HashMap, HashSet};
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ParseError;
use crate::expr::functions::{build_builtin, constant, UNIT_WORDS};
use crate::expr::{BinaryOp, Expr, SymbolTable, UnaryOp, TIME};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(char),
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    And,
    Or,
    Bang,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(v) => v.to_string(),
            Token::Ident(id) => id.clone(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Op(c) => c.to_string(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Le => "<=".into(),
            Token::Ge => ">=".into(),
            Token::EqEq => "==".into(),
            Token::Ne => "!=".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Bang => "!".into(),
        }
    }
}

/// Split `s` into tokens tagged with their byte offset
pub fn tokenize(s: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut toks = Vec::new();
    let mut chars = s.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let mut num = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit()
                    || d == '.'
                    || d == 'e'
                    || d == 'E'
                    || ((d == '+' || d == '-') && (num.ends_with('e') || num.ends_with('E')))
                {
                    num.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = num.parse::<f64>().map_err(|_| ParseError::UnexpectedToken {
                pos,
                found: num.clone(),
                expected: vec!["number".into()],
            })?;
            toks.push((Token::Num(value), pos));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut id = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    id.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            toks.push((Token::Ident(id), pos));
            continue;
        }
        chars.next();
        let tok = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' | '-' | '/' | '^' => Token::Op(c),
            // `**` is accepted as an alias of `^`
            '*' if next_is(&mut chars, '*') => Token::Op('^'),
            '*' => Token::Op('*'),
            '<' if next_is(&mut chars, '=') => Token::Le,
            '<' => Token::Lt,
            '>' if next_is(&mut chars, '=') => Token::Ge,
            '>' => Token::Gt,
            '=' if next_is(&mut chars, '=') => Token::EqEq,
            '!' if next_is(&mut chars, '=') => Token::Ne,
            '!' => Token::Bang,
            '&' if next_is(&mut chars, '&') => Token::And,
            '|' if next_is(&mut chars, '|') => Token::Or,
            _ => return Err(ParseError::UnexpectedChar { ch: c, pos }),
        };
        toks.push((tok, pos));
    }
    Ok(toks)
}

fn next_is(chars: &mut Peekable<CharIndices<'_>>, want: char) -> bool {
    if chars.peek().map(|&(_, d)| d) == Some(want) {
        chars.next();
        true
    } else {
        false
    }
}

/// Identifiers and functions an expression may refer to
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    symbols: Option<&'a SymbolTable>,
    functions: HashMap<String, usize>,
    locals: HashSet<String>,
}

impl<'a> Scope<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols: Some(symbols),
            ..Default::default()
        }
    }

    /// Declare a user function and its arity
    pub fn with_function(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.functions.insert(name.into(), arity);
        self
    }

    /// Declare names that only exist for this expression (reaction locals, formal arguments)
    pub fn with_locals<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.locals.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.locals.contains(name) || self.symbols.is_some_and(|s| s.contains(name))
    }

    /// Turn an identifier into a tree, failing on anything undeclared
    pub fn resolve_identifier(&self, name: &str) -> Result<Expr, ParseError> {
        if self.is_declared(name) {
            return Ok(Expr::sym(name));
        }
        if name == TIME || name == "t" {
            return Ok(Expr::sym(TIME));
        }
        constant(name).ok_or_else(|| ParseError::UnknownIdentifier(name.to_string()))
    }

    /// Build a call node, expanding builtins and checking user arities
    pub fn resolve_call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, ParseError> {
        if let Some(&arity) = self.functions.get(name) {
            if arity != args.len() {
                return Err(ParseError::arity(name, arity, args.len()));
            }
            return Ok(Expr::call(name, args));
        }
        build_builtin(name, args).unwrap_or_else(|| Err(ParseError::UnknownFunction(name.into())))
    }

    fn is_unit(&self, name: &str) -> bool {
        UNIT_WORDS.contains(&name) && !self.is_declared(name)
    }
}

/// Parse infix `text` against `scope`
pub fn parse(text: &str, scope: &Scope<'_>) -> Result<Expr, ParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    Parser::new(tokens, scope).parse_all()
}

pub struct Parser<'s, 'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    expected: Vec<String>,
    scope: &'s Scope<'a>,
}

impl<'s, 'a> Parser<'s, 'a> {
    pub fn new(tokens: Vec<(Token, usize)>, scope: &'s Scope<'a>) -> Self {
        Self {
            tokens,
            pos: 0,
            expected: Vec::new(),
            scope,
        }
    }

    fn expected_push(&mut self, s: &str) {
        if !self.expected.iter().any(|e| e == s) {
            self.expected.push(s.to_string());
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let r = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if r.is_some() {
            self.pos += 1;
        }
        r
    }

    fn error(&self) -> ParseError {
        match self.tokens.get(self.pos) {
            Some((tok, pos)) => ParseError::UnexpectedToken {
                pos: *pos,
                found: tok.describe(),
                expected: self.expected.clone(),
            },
            None => ParseError::UnexpectedEnd {
                expected: self.expected.clone(),
            },
        }
    }

    fn expect(&mut self, tok: Token) -> Result<(), ParseError> {
        if self.peek() == Some(&tok) {
            self.next();
            Ok(())
        } else {
            self.expected_push(&tok.describe());
            Err(self.error())
        }
    }

    /// Parse one expression and require that it consumes every token
    pub fn parse_all(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if self.pos < self.tokens.len() {
            self.expected = vec!["operator".into(), "end of expression".into()];
            return Err(self.error());
        }
        Ok(expr)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_and()?;
        while let Some(Token::Or) = self.peek() {
            self.next();
            let rhs = self.parse_and()?;
            node = Expr::binary(BinaryOp::Or, node, rhs);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_eq()?;
        while let Some(Token::And) = self.peek() {
            self.next();
            let rhs = self.parse_eq()?;
            node = Expr::binary(BinaryOp::And, node, rhs);
        }
        Ok(node)
    }

    fn parse_eq(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_cmp()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.next();
            let rhs = self.parse_cmp()?;
            node = Expr::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_add_sub()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.next();
            let rhs = self.parse_add_sub()?;
            node = Expr::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_add_sub(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_mul_div()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op('+')) => BinaryOp::Add,
                Some(Token::Op('-')) => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_mul_div()?;
            node = Expr::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_mul_div(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op('*')) => BinaryOp::Mul,
                Some(Token::Op('/')) => BinaryOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            node = Expr::binary(op, node, rhs);
        }
        Ok(node)
    }

    // prefix minus binds looser than `^`: -x^2 == -(x^2)
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.next();
                Ok(Expr::unary(UnaryOp::Neg, self.parse_unary()?))
            }
            Some(Token::Op('+')) => {
                self.next();
                self.parse_unary()
            }
            Some(Token::Bang) => {
                self.next();
                Ok(Expr::unary(UnaryOp::Not, self.parse_unary()?))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let node = self.parse_primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.next();
            let rhs = self.parse_unary()?;
            return Ok(node.powf(rhs));
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.next() else {
            self.expected_push("expression");
            return Err(self.error());
        };
        match tok {
            Token::Num(v) => {
                // a trailing unit word is an annotation, not a factor
                if let Some(Token::Ident(id)) = self.peek() {
                    if self.scope.is_unit(id) {
                        self.next();
                    }
                }
                Ok(Expr::num(v))
            }
            Token::Ident(id) => {
                if let Some(Token::LParen) = self.peek() {
                    self.next();
                    let args = self.parse_args()?;
                    self.scope.resolve_call(&id, args)
                } else {
                    self.scope.resolve_identifier(&id)
                }
            }
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => {
                self.pos -= 1;
                self.expected_push("expression");
                Err(self.error())
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.next();
                }
                Some(Token::RParen) => {
                    self.next();
                    return Ok(args);
                }
                _ => {
                    self.expected_push(",");
                    self.expected_push(")");
                    return Err(self.error());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolRole;

    fn table() -> SymbolTable {
        SymbolTable::with_names(SymbolRole::Parameter, ["k1", "k2", "S1", "V", "L"])
    }

    fn p(text: &str) -> Result<Expr, ParseError> {
        let table = table();
        let scope = Scope::new(&table).with_function("f", 2);
        parse(text, &scope)
    }

    #[test]
    fn test_equality_binds_looser_than_ordering() {
        let e = p("k1 < k2 == S1").unwrap();
        assert_eq!(
            e,
            Expr::binary(
                BinaryOp::Eq,
                Expr::binary(BinaryOp::Lt, Expr::sym("k1"), Expr::sym("k2")),
                Expr::sym("S1")
            )
        );
        assert_eq!(e.to_string(), "k1 < k2 == S1");

        let nested = Expr::binary(
            BinaryOp::Lt,
            Expr::binary(BinaryOp::Eq, Expr::sym("k1"), Expr::sym("k2")),
            Expr::sym("S1"),
        );
        assert_eq!(nested.to_string(), "(k1 == k2) < S1");
        assert_eq!(p(&nested.to_string()).unwrap(), nested);
    }

    #[test]
    fn test_precedence_and_associativity() {
        let e = p("k1 * S1 + k2 / V - 1").unwrap();
        assert_eq!(e.to_string(), "k1 * S1 + k2 / V - 1");
        let e = p("-k1 ^ 2").unwrap();
        assert_eq!(e, -(Expr::sym("k1").powf(Expr::num(2.0))));
        let e = p("k1 ^ k2 ^ 2").unwrap();
        assert_eq!(
            e,
            Expr::sym("k1").powf(Expr::sym("k2").powf(Expr::num(2.0)))
        );
    }

    #[test]
    fn test_unknown_identifier_fails() {
        let err = p("k1 * ghost").unwrap_err();
        assert_eq!(err, ParseError::UnknownIdentifier("ghost".into()));
    }

    #[test]
    fn test_unknown_function_fails() {
        let err = p("frobnicate(k1)").unwrap_err();
        assert_eq!(err, ParseError::UnknownFunction("frobnicate".into()));
    }

    #[test]
    fn test_user_function_arity_is_checked() {
        assert!(p("f(k1, k2)").is_ok());
        assert!(matches!(p("f(k1)").unwrap_err(), ParseError::Arity { .. }));
    }

    #[test]
    fn test_unit_annotation_is_stripped() {
        assert_eq!(p("2.5 litre * V").unwrap(), p("2.5 * V").unwrap());
    }

    #[test]
    fn test_declared_symbol_shadowing_a_unit_is_kept() {
        // `L` is a declared parameter here, so `2 L` is not a unit annotation
        assert!(p("2 L").is_err());
    }

    #[test]
    fn test_time_aliases() {
        assert_eq!(p("t").unwrap(), Expr::sym(TIME));
        assert_eq!(p("time").unwrap(), Expr::sym(TIME));
    }

    #[test]
    fn test_piecewise_and_function_form_comparisons() {
        let e = p("piecewise(k1, gt(S1, 0), 0)").unwrap();
        let expected = Expr::piecewise(
            vec![(
                Expr::binary(BinaryOp::Gt, Expr::sym("S1"), Expr::zero()),
                Expr::sym("k1"),
            )],
            Expr::zero(),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_error_reports_position() {
        match p("k1 * )").unwrap_err() {
            ParseError::UnexpectedToken { pos, found, .. } => {
                assert_eq!(pos, 5);
                assert_eq!(found, ")");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            p("k1 $ k2").unwrap_err(),
            ParseError::UnexpectedChar { ch: '$', .. }
        ));
        assert!(matches!(p("(k1 + k2").unwrap_err(), ParseError::UnexpectedEnd { .. }));
        assert_eq!(p("   ").unwrap_err(), ParseError::Empty);
    }
}
