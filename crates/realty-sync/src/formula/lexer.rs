//! Tokenizer for formula expressions.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use super::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Text(String),
    /// A bare name, possibly dotted (`Transaction.Amount`).
    Ident(String),
    /// A `[Bracketed Name]`, taken verbatim.
    Field(String),
    And,
    Or,
    Not,
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LeftParen,
    RightParen,
    Comma,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Text(s) => write!(f, "text '{s}'"),
            Token::Ident(s) => write!(f, "name '{s}'"),
            Token::Field(s) => write!(f, "field [{s}]"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::True => write!(f, "TRUE"),
            Token::False => write!(f, "FALSE"),
            Token::Null => write!(f, "NULL"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Amp => write!(f, "&"),
            Token::Eq => write!(f, "="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with the character offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub struct Lexer<'a> {
    input: Peekable<CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ValidationError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Spanned, ValidationError> {
        self.skip_whitespace();

        let Some(&(position, ch)) = self.input.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                position: self.len,
            });
        };

        let token = match ch {
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            ',' => self.single(Token::Comma),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '=' => {
                self.advance();
                self.eat('=');
                Token::Eq
            }
            '!' => {
                self.advance();
                if self.eat('=') {
                    Token::NotEq
                } else {
                    Token::Not
                }
            }
            '&' => {
                self.advance();
                if self.eat('&') {
                    Token::And
                } else {
                    Token::Amp
                }
            }
            '|' => {
                self.advance();
                if self.eat('|') {
                    Token::Or
                } else {
                    return Err(ValidationError::new("expected '|' after '|'", position));
                }
            }
            '<' => {
                self.advance();
                if self.eat('=') {
                    Token::Le
                } else if self.eat('>') {
                    Token::NotEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                self.advance();
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '\'' | '"' => self.read_text(position)?,
            '[' => self.read_bracketed(position)?,
            c if c.is_ascii_digit() || c == '.' => self.read_number(position)?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            other => {
                return Err(ValidationError::new(
                    format!("unexpected character '{other}'"),
                    position,
                ))
            }
        };

        Ok(Spanned { token, position })
    }

    fn advance(&mut self) -> Option<char> {
        self.input.next().map(|(_, ch)| ch)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().map(|(_, ch)| *ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn read_text(&mut self, start: usize) -> Result<Token, ValidationError> {
        let Some(quote) = self.advance() else {
            return Err(ValidationError::new("unterminated text literal", start));
        };
        let mut value = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => {
                    // A doubled quote is an escaped quote.
                    if self.eat(quote) {
                        value.push(quote);
                    } else {
                        return Ok(Token::Text(value));
                    }
                }
                Some(ch) => value.push(ch),
                None => return Err(ValidationError::new("unterminated text literal", start)),
            }
        }
    }

    fn read_bracketed(&mut self, start: usize) -> Result<Token, ValidationError> {
        self.advance();
        let mut name = String::new();

        loop {
            match self.advance() {
                Some(']') => break,
                Some('[') => {
                    return Err(ValidationError::new("nested '[' in field name", start));
                }
                Some(ch) => name.push(ch),
                None => return Err(ValidationError::new("unterminated field name", start)),
            }
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("empty field name", start));
        }
        Ok(Token::Field(name.to_string()))
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ValidationError> {
        let mut value = String::new();
        let mut seen_dot = false;

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                value.push(ch);
            } else if ch == '.' && !seen_dot {
                seen_dot = true;
                value.push(ch);
            } else {
                break;
            }
            self.advance();
        }

        if value == "." || value.ends_with('.') {
            return Err(ValidationError::new("malformed number", start));
        }
        value
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ValidationError::new("malformed number", start))
    }

    /// True when the character after the current `.` can start a name.
    fn segment_follows(&self) -> bool {
        let mut ahead = self.input.clone();
        ahead.next();
        ahead
            .peek()
            .is_some_and(|(_, ch)| ch.is_alphabetic() || *ch == '_')
    }

    fn read_identifier(&mut self) -> Token {
        let mut value = String::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else if ch == '.' && self.segment_follows() {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match value.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            "NULL" => Token::Null,
            _ => Token::Ident(value),
        }
    }
}
