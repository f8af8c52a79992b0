//! Hand-written SQL tokenizer.
//!
//! Token kinds: names/literals (alphanumeric plus `_`), the single-character
//! symbols `< > = * , ( )`, and quoted strings (single or double quotes,
//! yielded without the quotes). Whitespace separates tokens and is
//! discarded.

use eyre::{Result, WrapErr};

use crate::error::EngineError;

pub fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if matches!(c, '<' | '>' | '=' | '*' | ',' | '(' | ')') {
            chars.next();
            tokens.push(c.to_string());
        } else if c == '\'' || c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some(q) if q == c => break,
                    Some(other) => s.push(other),
                    None => {
                        return Err(EngineError::InvalidCommand)
                            .wrap_err("unterminated quoted string")
                    }
                }
            }
            tokens.push(s);
        } else if c.is_ascii_alphanumeric() || c == '_' {
            let mut s = String::new();
            while let Some(&w) = chars.peek() {
                if w.is_ascii_alphanumeric() || w == '_' {
                    s.push(w);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(s);
        } else {
            return Err(EngineError::InvalidCommand)
                .wrap_err_with(|| format!("unexpected character {c:?}"));
        }
    }

    Ok(tokens)
}
