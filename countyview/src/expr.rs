//! A small arithmetic expression language for variable definitions.
//!
//! Definitions combine raw variable codes with arithmetic, e.g.
//! `(B02001_001E - B02001_002E) / B02001_001E`. The grammar is restricted to
//! `+ - * / ( )`, numeric literals, unary minus and column identifiers, and
//! evaluation is plain `f64` arithmetic: division by zero follows IEEE-754
//! (NaN for 0/0, an infinity otherwise) and never raises.

use std::collections::BTreeSet;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// The set of column identifiers the expression references.
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut idents = BTreeSet::new();
        self.collect_identifiers(&mut idents);
        idents
    }

    fn collect_identifiers<'a>(&'a self, idents: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Column(name) => {
                idents.insert(name.as_str());
            }
            Expr::Neg(inner) => inner.collect_identifiers(idents),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(idents);
                rhs.collect_identifiers(idents);
            }
        }
    }

    /// Evaluate against a column lookup. `None` from the lookup means the
    /// column does not exist at all, which is an error; a column that exists
    /// but has no value for the current row should be supplied as NaN.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ExprError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Column(name) => {
                lookup(name).ok_or_else(|| ExprError::UnknownColumn(name.clone()))
            }
            Expr::Neg(inner) => Ok(-inner.eval(lookup)?),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(lookup)?;
                let rhs = rhs.eval(lookup)?;
                Ok(match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => lhs / rhs,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn parse_error(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError::Parse {
        offset,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push((offset, Token::Plus));
            }
            '-' => {
                chars.next();
                tokens.push((offset, Token::Minus));
            }
            '*' => {
                chars.next();
                tokens.push((offset, Token::Star));
            }
            '/' => {
                chars.next();
                tokens.push((offset, Token::Slash));
            }
            '(' => {
                chars.next();
                tokens.push((offset, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((offset, Token::RParen));
            }
            c if c.is_ascii_digit() => {
                let mut end = offset;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = idx + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &input[offset..end];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| parse_error(offset, format!("invalid number '{text}'")))?;
                tokens.push((offset, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = offset;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = idx + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Ident(input[offset..end].to_string())));
            }
            c => return Err(parse_error(offset, format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn next_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input_len)
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // unary := '-' unary | atom
    fn unary(&mut self) -> Result<Expr, ExprError> {
        if let Some(Token::Minus) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    // atom := number | identifier | '(' expr ')'
    fn atom(&mut self) -> Result<Expr, ExprError> {
        let offset = self.next_offset();
        match self.peek() {
            Some(Token::Number(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(Expr::Number(value))
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(Expr::Column(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(parse_error(self.next_offset(), "expected ')'")),
                }
            }
            Some(_) => Err(parse_error(offset, "expected a number, column or '('")),
            None => Err(parse_error(offset, "unexpected end of expression")),
        }
    }
}

/// Parse a definition string into an expression tree.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parse_error(
            parser.next_offset(),
            "unexpected trailing input",
        ));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval(input: &str, columns: &[(&str, f64)]) -> Result<f64, ExprError> {
        let columns: HashMap<&str, f64> = columns.iter().copied().collect();
        parse(input)?.eval(&|name: &str| columns.get(name).copied())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 3 * 4", &[]).unwrap(), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[]).unwrap(), 20.0);
        assert_eq!(eval("10 - 4 - 3", &[]).unwrap(), 3.0, "Subtraction is left associative");
    }

    #[test]
    fn test_true_division() {
        assert_eq!(eval("7 / 2", &[]).unwrap(), 3.5);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-3 + 5", &[]).unwrap(), 2.0);
        assert_eq!(eval("2 * -3", &[]).unwrap(), -6.0);
    }

    #[test]
    fn test_column_references() {
        let columns = [("B02001_001E", 100.0), ("B02001_002E", 80.0)];
        let result = eval("(B02001_001E - B02001_002E) / B02001_001E", &columns).unwrap();
        assert_eq!(result, 0.2);
    }

    #[test]
    fn test_division_by_zero_never_raises() {
        // IEEE-754 semantics, deliberately not special-cased.
        assert!(eval("0 / 0", &[]).unwrap().is_nan());
        assert_eq!(eval("1 / 0", &[]).unwrap(), f64::INFINITY);
        let columns = [("X", 5.0), ("Y", 0.0)];
        assert_eq!(eval("X / Y", &columns).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_unknown_column() {
        let err = eval("X + 1", &[]).unwrap_err();
        assert_eq!(err, ExprError::UnknownColumn("X".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("(1 + 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse("1 + "), Err(ExprError::Parse { .. })));
        assert!(matches!(parse("1 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse("a % b"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse(""), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_identifiers() {
        let expr = parse("(B01_1E - B01_2E) / B01_1E").unwrap();
        let idents: Vec<&str> = expr.identifiers().into_iter().collect();
        assert_eq!(idents, vec!["B01_1E", "B01_2E"]);
    }
}
