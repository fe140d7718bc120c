//! Validation of planner-supplied index filters against a closed grammar.
//!
//! Grammar (whitespace-separated, case-sensitive keywords):
//!
//! ```text
//! expr       := and_expr ( "or" and_expr )*
//! and_expr   := primary ( "and" primary )*
//! primary    := "(" expr ")" | comparison
//! comparison := ident "eq" literal
//! literal    := string | number
//! ident      := [A-Za-z_][A-Za-z0-9_/.]*
//! string     := "'" [^']* "'"
//! ```
//!
//! Anything outside this grammar is rejected and never forwarded to the
//! index service.

use gl_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lexer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str,
    Number,
    And,
    Or,
    Eq,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut closed = false;
                for (_, sc) in chars.by_ref() {
                    if sc == '\'' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(Error::validation("filter: unterminated string literal"));
                }
                tokens.push(Token::Str);
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut seen_dot = false;
                while let Some(&(_, nc)) = chars.peek() {
                    if nc.is_ascii_digit() {
                        chars.next();
                    } else if nc == '.' && !seen_dot {
                        seen_dot = true;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, nc)) = chars.peek() {
                    if nc.is_ascii_alphanumeric() || matches!(nc, '_' | '/' | '.') {
                        end = j + nc.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &input[start..end];
                tokens.push(match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "eq" => Token::Eq,
                    _ => Token::Ident(word.to_string()),
                });
            }
            other => {
                return Err(Error::validation(format!(
                    "filter: unexpected character '{other}'"
                )));
            }
        }
    }

    Ok(tokens)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<()> {
        self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            self.and_expr()?;
        }
        Ok(())
    }

    fn and_expr(&mut self) -> Result<()> {
        self.primary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            self.primary()?;
        }
        Ok(())
    }

    fn primary(&mut self) -> Result<()> {
        match self.advance() {
            Some(Token::LParen) => {
                self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(()),
                    _ => Err(Error::validation("filter: expected ')'")),
                }
            }
            Some(Token::Ident(_)) => {
                match self.advance() {
                    Some(Token::Eq) => {}
                    _ => return Err(Error::validation("filter: expected 'eq' after field")),
                }
                match self.advance() {
                    Some(Token::Str) | Some(Token::Number) => Ok(()),
                    _ => Err(Error::validation(
                        "filter: expected string or number literal after 'eq'",
                    )),
                }
            }
            other => Err(Error::validation(format!(
                "filter: expected comparison or '(', got {other:?}"
            ))),
        }
    }
}

/// Validate a planner-supplied filter string against the closed grammar.
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.trim().is_empty() {
        return Err(Error::validation("filter: empty expression"));
    }
    let tokens = lex(filter)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::validation("filter: trailing tokens"));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
