//! Lexical allow-list for raw statements issued by workspace code and the
//! admin query endpoint.
//!
//! The scan skips string literals, quoted identifiers and comments, then
//! checks the leading verb, statement count, and reserved identifiers. The
//! engine's own read-only flag is consulted afterwards for `WITH` statements.

use crate::error::{Error, Result};
use crate::validation::is_reserved;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT` or `WITH`; must be read-only.
    Read,
    /// `INSERT`, `UPDATE`, `DELETE` or `REPLACE`.
    Write,
}

/// A statement that passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked {
    pub kind: StatementKind,
    /// The statement text up to, not including, its terminating semicolon.
    pub statement: String,
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    /// Char offset of the semicolon.
    Semicolon(usize),
    Other,
}

/// Checks `sql` against the allow-list and classifies it.
pub fn check(sql: &str) -> Result<Checked> {
    let tokens = tokenize(sql)?;

    let mut end = None;
    for token in &tokens {
        match token {
            Token::Semicolon(at) => {
                end.get_or_insert(*at);
            }
            _ if end.is_some() => {
                return Err(Error::Forbidden(
                    "multiple statements are not allowed".to_string(),
                ));
            }
            Token::Word(word) | Token::Quoted(word) if is_reserved(word) => {
                return Err(Error::Forbidden(format!(
                    "access to reserved table {word} is not allowed"
                )));
            }
            _ => {}
        }
    }

    let verb = match tokens.first() {
        Some(Token::Word(word)) => word.to_ascii_uppercase(),
        Some(_) => return Err(Error::Forbidden("statement type is not allowed".to_string())),
        None => return Err(Error::invalid("SQL statement is empty")),
    };

    let kind = match verb.as_str() {
        "SELECT" | "WITH" => StatementKind::Read,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementKind::Write,
        other => return Err(Error::Forbidden(format!("{other} statements are not allowed"))),
    };

    let statement = match end {
        Some(at) => sql.chars().take(at).collect(),
        None => sql.to_string(),
    };
    Ok(Checked { kind, statement })
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    if i + 1 >= chars.len() {
                        return Err(Error::invalid("unterminated comment"));
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            '\'' => {
                let (_, next) = read_quoted(&chars, i, '\'')?;
                tokens.push(Token::Other);
                i = next;
            }
            '"' | '`' => {
                let (text, next) = read_quoted(&chars, i, c)?;
                tokens.push(Token::Quoted(text));
                i = next;
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .ok_or_else(|| Error::invalid("unterminated identifier"))?;
                tokens.push(Token::Quoted(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            ';' => {
                tokens.push(Token::Semicolon(i));
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Reads a literal delimited by `quote`, where a doubled quote is an escape.
/// Returns the unescaped text and the index just past the closing quote.
fn read_quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(Error::invalid("unterminated quoted string")),
            Some(&c) if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    text.push(quote);
                    i += 2;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}
