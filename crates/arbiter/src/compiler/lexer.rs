// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Tokenizer for matcher expressions

use crate::error::{CompileError, SyntaxSnafu};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Not,
}

fn unexpected(message: impl Into<String>) -> CompileError {
    SyntaxSnafu {
        message: message.into(),
    }
    .build()
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '.' => tokens.push(Token::Dot),
            '=' => match chars.next() {
                Some((_, '=')) => tokens.push(Token::EqEq),
                _ => return Err(unexpected(format!("single `=` at offset {offset}"))),
            },
            '!' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    tokens.push(Token::NotEq);
                }
                _ => tokens.push(Token::Not),
            },
            '&' => match chars.next() {
                Some((_, '&')) => tokens.push(Token::AndAnd),
                _ => return Err(unexpected(format!("single `&` at offset {offset}"))),
            },
            '|' => match chars.next() {
                Some((_, '|')) => tokens.push(Token::OrOr),
                _ => return Err(unexpected(format!("single `|` at offset {offset}"))),
            },
            quote @ ('"' | '\'') => {
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => literal.push(c),
                        None => {
                            return Err(unexpected(format!(
                                "unterminated string starting at offset {offset}"
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::from(c);
                while let Some((_, next)) = chars.peek() {
                    if next.is_ascii_digit() || *next == '.' {
                        literal.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| unexpected(format!("malformed number `{literal}`")))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, next)) = chars.peek() {
                    if next.is_alphanumeric() || *next == '_' {
                        ident.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(unexpected(format!(
                    "unexpected character `{other}` at offset {offset}"
                )))
            }
        }
    }

    Ok(tokens)
}
