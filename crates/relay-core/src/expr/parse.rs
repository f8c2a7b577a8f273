//! Tokenizer and parser for placeholder expressions

use crate::error::{Error, Result};

/// Binary arithmetic/concatenation operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition or string concatenation
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

/// Parsed form of one placeholder body
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// Numeric literal, integer form preserved
    Int(i64),
    /// Numeric literal with a fractional part
    Float(f64),
    /// Quoted string literal
    Str(String),
    /// Dotted field path into the record, `master.` prefix already stripped
    Field(Vec<String>),
    /// Unary negation
    Neg(Box<Ast>),
    /// Binary operation
    Bin(BinOp, Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Field(Vec<String>),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => literal.push(ch),
                        None => {
                            return Err(Error::Evaluation(
                                "Unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '0'..='9' | '.' => {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(&ch) = chars.peek() {
                    match ch {
                        '0'..='9' => number.push(ch),
                        '.' => {
                            is_float = true;
                            number.push(ch);
                        }
                        _ => break,
                    }
                    chars.next();
                }
                if is_float {
                    let value = number.parse::<f64>().map_err(|_| {
                        Error::Evaluation(format!("Invalid number: {number}"))
                    })?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = number.parse::<i64>().map_err(|_| {
                        Error::Evaluation(format!("Invalid number: {number}"))
                    })?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut path = Vec::new();
                let mut segment = String::new();
                while let Some(&ch) = chars.peek() {
                    match ch {
                        ch if ch.is_alphanumeric() || ch == '_' => {
                            segment.push(ch);
                            chars.next();
                        }
                        '.' => {
                            path.push(std::mem::take(&mut segment));
                            chars.next();
                        }
                        _ => break,
                    }
                }
                if segment.is_empty() {
                    return Err(Error::Evaluation(
                        "Field path ends in '.'".to_string(),
                    ));
                }
                path.push(segment);
                // `master.` is the record alias, not part of the path.
                if path.len() > 1 && path[0] == "master" {
                    path.remove(0);
                }
                tokens.push(Token::Field(path));
            }
            other => {
                return Err(Error::Evaluation(format!(
                    "Unexpected character '{other}' in expression"
                )))
            }
        }
    }

    Ok(tokens)
}

/// Parse one placeholder body into an AST
pub fn parse(input: &str) -> Result<Ast> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Evaluation(format!(
            "Trailing input in expression: {input}"
        )));
    }
    Ok(ast)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Ast> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinOp::Add),
            Some(Token::Minus) => Some(BinOp::Sub),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Ast> {
        let mut lhs = self.factor()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinOp::Mul),
            Some(Token::Slash) => Some(BinOp::Div),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // factor := '-' factor | '(' expression ')' | literal | field
    fn factor(&mut self) -> Result<Ast> {
        match self.next() {
            Some(Token::Minus) => Ok(Ast::Neg(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::Evaluation("Unbalanced parentheses".to_string())),
                }
            }
            Some(Token::Int(i)) => Ok(Ast::Int(i)),
            Some(Token::Float(f)) => Ok(Ast::Float(f)),
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::Field(path)) => Ok(Ast::Field(path)),
            _ => Err(Error::Evaluation("Expected a value".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let ast = parse("price * 1.1 + 2").unwrap();
        assert_eq!(
            ast,
            Ast::Bin(
                BinOp::Add,
                Box::new(Ast::Bin(
                    BinOp::Mul,
                    Box::new(Ast::Field(vec!["price".to_string()])),
                    Box::new(Ast::Float(1.1)),
                )),
                Box::new(Ast::Int(2)),
            )
        );
    }

    #[test]
    fn strips_the_master_alias() {
        assert_eq!(
            parse("master.price").unwrap(),
            Ast::Field(vec!["price".to_string()])
        );
        // A bare `master` field is a real field, not the alias.
        assert_eq!(
            parse("master").unwrap(),
            Ast::Field(vec!["master".to_string()])
        );
    }

    #[test]
    fn parses_string_literals_and_concat() {
        let ast = parse("'SKU-' + code").unwrap();
        assert_eq!(
            ast,
            Ast::Bin(
                BinOp::Add,
                Box::new(Ast::Str("SKU-".to_string())),
                Box::new(Ast::Field(vec!["code".to_string()])),
            )
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        let ast = parse("(a + b) * 2").unwrap();
        assert!(matches!(ast, Ast::Bin(BinOp::Mul, _, _)));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("price +").is_err());
        assert!(parse("(price").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("price ? 2").is_err());
        assert!(parse("a.").is_err());
    }
}
