use std::time::Duration;
use regex::Regex;
use crate::errors::PocScanError;
use super::lexer::{tokenize, Token};
use super::{Expr, LogicalOp, Predicate, Value};

/// Deepest nesting of parentheses and `!` accepted in one condition.
const MAX_DEPTH: usize = 128;
/// Longest wait an `oob(n)` call may request.
const MAX_OOB_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a condition expression into a typed tree. Unknown operators,
/// unbalanced parentheses, trailing input and invalid regex literals are
/// rejected here so evaluation never sees them.
pub fn parse_expression(input: &str) -> Result<Expr, PocScanError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(PocScanError::RuleDefinition("empty condition expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0, depth: 0, source: input };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error(&format!("unexpected token {:?}", parser.tokens[parser.pos])));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), PocScanError> {
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(self.error(&format!("expected {:?}, found {:?}", expected, t))),
            None => Err(self.error(&format!("expected {:?}, found end of input", expected))),
        }
    }

    fn error(&self, msg: &str) -> PocScanError {
        PocScanError::RuleDefinition(format!("{} in expression `{}`", msg, self.source))
    }

    fn descend(&mut self) -> Result<(), PocScanError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, PocScanError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, PocScanError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, PocScanError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, PocScanError> {
        let left = self.parse_primary()?;
        match self.peek().cloned() {
            Some(Token::Cmp(op)) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Comparison { op, left: Box::new(left), right: Box::new(right) })
            }
            Some(Token::Matches) => {
                self.advance();
                let pattern = match self.advance() {
                    Some(Token::Str(p)) => p,
                    other => {
                        return Err(self.error(&format!(
                            "'matches' requires a string literal pattern, found {:?}",
                            other
                        )))
                    }
                };
                let regex = Regex::new(&pattern)
                    .map_err(|e| self.error(&format!("invalid regex '{}': {}", pattern, e)))?;
                Ok(Expr::Predicate(Predicate::Matches { subject: Box::new(left), regex }))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, PocScanError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.parse_call(name)
                } else {
                    Ok(Expr::VarRef(name))
                }
            }
            Some(t) => Err(self.error(&format!("unexpected token {:?}", t))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, PocScanError> {
        self.expect(Token::LParen)?;
        match name.as_str() {
            "oob" => {
                let timeout = match self.peek() {
                    Some(Token::Num(n)) => {
                        let secs = *n;
                        self.advance();
                        if secs <= 0.0 {
                            return Err(self.error("oob() timeout must be positive"));
                        }
                        match Duration::try_from_secs_f64(secs) {
                            Ok(timeout) if timeout <= MAX_OOB_TIMEOUT => Some(timeout),
                            _ => return Err(self.error("oob() timeout out of range")),
                        }
                    }
                    _ => None,
                };
                self.expect(Token::RParen)?;
                Ok(Expr::Predicate(Predicate::Oob { timeout }))
            }
            other => Err(self.error(&format!("unknown function '{}'", other))),
        }
    }
}
