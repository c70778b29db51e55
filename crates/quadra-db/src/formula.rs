// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(
        r"[0-9]+(?:\.[0-9]+)?|[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?|[-+*/()]"
    )
    .expect("token pattern compiles");
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    Empty,
    UnexpectedCharacter(char),
    UnexpectedToken(String),
    UnexpectedEnd,
    DivisionByZero,
    UnknownTable(String),
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty expression"),
            Self::UnexpectedCharacter(ch) => write!(f, "unexpected character {ch:?}"),
            Self::UnexpectedToken(token) => write!(f, "unexpected token {token:?}"),
            Self::UnexpectedEnd => f.write_str("expression ends unexpectedly"),
            Self::DivisionByZero => f.write_str("division by zero"),
            Self::UnknownTable(key) => write!(f, "unknown form table {key:?}"),
        }
    }
}

impl std::error::Error for FormulaError {}

pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub table: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Reference(CellRef),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn references(&self) -> Vec<&CellRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    pub fn evaluate<F>(&self, resolve: &mut F) -> FormulaResult<f64>
    where
        F: FnMut(&CellRef) -> f64,
    {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Reference(cell) => Ok(resolve(cell)),
            Self::Negate(inner) => Ok(-inner.evaluate(resolve)?),
            Self::Binary { op, lhs, rhs } => {
                let left = lhs.evaluate(resolve)?;
                let right = rhs.evaluate(resolve)?;
                match op {
                    BinaryOp::Add => Ok(left + right),
                    BinaryOp::Subtract => Ok(left - right),
                    BinaryOp::Multiply => Ok(left * right),
                    BinaryOp::Divide => {
                        if right == 0.0 {
                            Err(FormulaError::DivisionByZero)
                        } else {
                            Ok(left / right)
                        }
                    }
                }
            }
        }
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a CellRef>) {
        match self {
            Self::Number(_) => {}
            Self::Reference(cell) => refs.push(cell),
            Self::Negate(inner) => inner.collect_references(refs),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_references(refs);
                rhs.collect_references(refs);
            }
        }
    }
}

pub fn parse_expression(raw: &str) -> FormulaResult<Expr> {
    let tokens = tokenize(raw)?;
    Parser {
        tokens,
        position: 0,
    }
    .parse()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident {
        table: Option<String>,
        name: String,
    },
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Ident { table, name } => match table {
                Some(table) => format!("{table}.{name}"),
                None => name.clone(),
            },
            Self::Plus => "+".to_owned(),
            Self::Minus => "-".to_owned(),
            Self::Star => "*".to_owned(),
            Self::Slash => "/".to_owned(),
            Self::Open => "(".to_owned(),
            Self::Close => ")".to_owned(),
        }
    }
}

fn tokenize(raw: &str) -> FormulaResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut cursor = 0usize;
    for found in TOKEN_RE.find_iter(raw) {
        if let Some(stray) = first_stray(&raw[cursor..found.start()]) {
            return Err(FormulaError::UnexpectedCharacter(stray));
        }
        cursor = found.end();
        let text = found.as_str();
        let token = match text {
            "+" => Token::Plus,
            "-" => Token::Minus,
            "*" => Token::Star,
            "/" => Token::Slash,
            "(" => Token::Open,
            ")" => Token::Close,
            _ if text.starts_with(|ch: char| ch.is_ascii_digit()) => Token::Number(
                text.parse()
                    .map_err(|_| FormulaError::UnexpectedToken(text.to_owned()))?,
            ),
            _ => match text.split_once('.') {
                Some((table, name)) => Token::Ident {
                    table: Some(table.to_owned()),
                    name: name.to_owned(),
                },
                None => Token::Ident {
                    table: None,
                    name: text.to_owned(),
                },
            },
        };
        tokens.push(token);
    }
    if let Some(stray) = first_stray(&raw[cursor..]) {
        return Err(FormulaError::UnexpectedCharacter(stray));
    }
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    Ok(tokens)
}

fn first_stray(slice: &str) -> Option<char> {
    slice.chars().find(|ch| !ch.is_whitespace())
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn parse(mut self) -> FormulaResult<Expr> {
        let expr = self.expression()?;
        match self.take() {
            Ok(token) => Err(FormulaError::UnexpectedToken(token.describe())),
            Err(_) => Ok(expr),
        }
    }

    fn expression(&mut self) -> FormulaResult<Expr> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.position += 1;
            let rhs = self.term()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn term(&mut self) -> FormulaResult<Expr> {
        let mut node = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => break,
            };
            self.position += 1;
            let rhs = self.factor()?;
            node = Expr::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn factor(&mut self) -> FormulaResult<Expr> {
        match self.take()? {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Ident { table, name } => Ok(Expr::Reference(CellRef { table, name })),
            Token::Minus => Ok(Expr::Negate(Box::new(self.factor()?))),
            Token::Open => {
                let inner = self.expression()?;
                match self.take()? {
                    Token::Close => Ok(inner),
                    token => Err(FormulaError::UnexpectedToken(token.describe())),
                }
            }
            token => Err(FormulaError::UnexpectedToken(token.describe())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn take(&mut self) -> FormulaResult<Token> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or(FormulaError::UnexpectedEnd)?;
        self.position += 1;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::{FormulaError, parse_expression};
    use std::collections::BTreeMap;

    fn eval(raw: &str) -> Result<f64, FormulaError> {
        parse_expression(raw)?.evaluate(&mut |_| 0.0)
    }

    #[test]
    fn arithmetic_with_precedence_and_parens() {
        let cases = [
            ("1+2", 3.0),
            ("2*3+4", 10.0),
            ("2+3*4", 14.0),
            ("(2+3)*4", 20.0),
            ("10/4", 2.5),
            ("-3+5", 2.0),
            ("2*-3", -6.0),
            ("1.5+2.25", 3.75),
            ("10-2-3", 5.0),
        ];
        for (input, expected) in cases {
            let got = eval(input).expect("expression should evaluate");
            assert_eq!(got, expected, "input={input}");
        }
    }

    #[test]
    fn references_resolve_through_callback() {
        let values = BTreeMap::from([("d1", 3.0), ("d2", 4.0)]);
        let expr = parse_expression("d1 + d2 * 2").expect("expression should parse");
        assert_eq!(expr.references().len(), 2);

        let got = expr
            .evaluate(&mut |cell| values.get(cell.name.as_str()).copied().unwrap_or(0.0))
            .expect("expression should evaluate");
        assert_eq!(got, 11.0);
    }

    #[test]
    fn cross_table_reference_keeps_table_key() {
        let expr = parse_expression("disc_survey.score_d / 2").expect("expression should parse");
        let refs = expr.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].table.as_deref(), Some("disc_survey"));
        assert_eq!(refs[0].name, "score_d");
    }

    #[test]
    fn missing_reference_takes_resolver_default() {
        let expr = parse_expression("missing + 5").expect("expression should parse");
        let got = expr
            .evaluate(&mut |_| 0.0)
            .expect("expression should evaluate");
        assert_eq!(got, 5.0);
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert_eq!(eval("1/0"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("score_d / score_total"), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for input in ["", "   ", "1+", "(2*3", "2 % 3", "a..b", "1 + * 2", ")2("] {
            assert!(parse_expression(input).is_err(), "input={input}");
        }
    }

    #[test]
    fn stray_character_is_named_in_the_error() {
        assert_eq!(
            parse_expression("score_d $ 2"),
            Err(FormulaError::UnexpectedCharacter('$'))
        );
    }
}
