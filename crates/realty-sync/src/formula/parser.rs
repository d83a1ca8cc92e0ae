//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Precedence, lowest first: `OR`, `AND`, `NOT`, comparisons, `+ - &`,
//! `* /`, unary minus, primaries.

use super::ast::{BinaryOp, Expr, FieldPath, Function, UnaryOp};
use super::lexer::{Lexer, Spanned, Token};
use super::ValidationError;

/// Deepest run of parentheses, calls and prefix operators accepted.
pub const MAX_NESTING: usize = 64;

/// Operands must start within this many tokens. Binary chains nest
/// leftward, so this bounds their depth.
pub const MAX_TOKENS: usize = 512;

pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn parse(input: &str) -> Result<Expr, ValidationError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser {
            tokens,
            position: 0,
            depth: 0,
        };

        if parser.check(&Token::Eof) {
            return Err(ValidationError::new("expression is empty", 0));
        }

        let expr = parser.parse_or()?;
        if !parser.check(&Token::Eof) {
            let current = parser.current();
            return Err(ValidationError::new(
                format!("unexpected {} after expression", current.token),
                current.position,
            ));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.parse_not()?;
        while self.match_token(&Token::And) {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ValidationError> {
        let position = self.current().position;
        if self.match_token(&Token::Not) {
            let operand = self.nested(position, Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ValidationError> {
        let left = self.parse_additive()?;
        let op = match self.current().token {
            Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                Token::Amp => BinaryOp::Concat,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ValidationError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().token {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ValidationError> {
        let position = self.current().position;
        if self.match_token(&Token::Minus) {
            let operand = self.nested(position, Self::parse_unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        if self.match_token(&Token::Plus) {
            return self.nested(position, Self::parse_unary);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ValidationError> {
        let Spanned { token, position } = self.current().clone();
        if self.position >= MAX_TOKENS {
            return Err(ValidationError::new("expression is too long", position));
        }
        self.position += 1;

        match token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Text(value) => Ok(Expr::Text(value)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Field(name) => Ok(Expr::Field(FieldPath::single(&name))),
            Token::Ident(name) => {
                if self.match_token(&Token::LeftParen) {
                    self.nested(position, |parser| parser.parse_call(&name, position))
                } else {
                    Ok(Expr::Field(FieldPath::dotted(&name)))
                }
            }
            Token::LeftParen => {
                let expr = self.nested(position, Self::parse_or)?;
                self.expect(&Token::RightParen, "')' to close '('")?;
                Ok(expr)
            }
            Token::Eof => Err(ValidationError::new("unexpected end of expression", position)),
            other => Err(ValidationError::new(format!("unexpected {other}"), position)),
        }
    }

    fn parse_call(&mut self, name: &str, position: usize) -> Result<Expr, ValidationError> {
        let function = Function::lookup(name)
            .ok_or_else(|| ValidationError::new(format!("unknown function '{name}'"), position))?;

        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                args.push(self.parse_or()?);
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightParen, "')' to close the argument list")?;

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(ValidationError::new(
                format!(
                    "{} expects {expected} argument(s), got {}",
                    function.name(),
                    args.len()
                ),
                position,
            ));
        }
        if function.takes_path() && !matches!(args.first(), Some(Expr::Field(_))) {
            return Err(ValidationError::new(
                format!("{} expects a field path", function.name()),
                position,
            ));
        }

        Ok(Expr::Call { function, args })
    }

    fn nested<T>(
        &mut self,
        position: usize,
        parse: impl FnOnce(&mut Self) -> Result<T, ValidationError>,
    ) -> Result<T, ValidationError> {
        if self.depth >= MAX_NESTING {
            return Err(ValidationError::new("expression nested too deeply", position));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn current(&self) -> &Spanned {
        // tokenize always ends with Eof, so the last token is a safe fallback.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn check(&self, token: &Token) -> bool {
        &self.current().token == token
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ValidationError> {
        if self.match_token(token) {
            return Ok(());
        }
        let current = self.current();
        Err(ValidationError::new(
            format!("expected {what}, found {}", current.token),
            current.position,
        ))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
