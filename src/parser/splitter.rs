//! Statement splitting and comment stripping over `sqlparser` tokens.
//!
//! Tokens are lexed without unescaping so that rendering them back gives the
//! statement text as the client wrote it. Input that does not lex (an open
//! quote or comment) is handed on as a single unit.

use sqlparser::tokenizer::Token;

use super::tokenizer::{is_comment, lex};

/// Split a batch into statements on `;` outside quotes and comments.
///
/// Statements are trimmed; statements that are empty once comments are
/// removed are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let Ok(tokens) = lex(sql, false) else {
        let unit = sql.trim();
        return if unit.is_empty() {
            Vec::new()
        } else {
            vec![unit.to_string()]
        };
    };

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;

    for token in &tokens {
        match token {
            Token::SemiColon => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
            }
            Token::EOF => {}
            Token::Whitespace(_) => current.push_str(&token.to_string()),
            _ => {
                has_code = true;
                current.push_str(&token.to_string());
            }
        }
    }
    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Remove `--`, `#` and `/* */` comments outside quoted text
pub fn strip_comments(sql: &str) -> String {
    let Ok(tokens) = lex(sql, false) else {
        return sql.to_string();
    };

    let mut out = String::with_capacity(sql.len());
    for token in &tokens {
        if is_comment(token) {
            // a comment separates tokens like whitespace does
            if !out.is_empty() && !out.ends_with(|c: char| c.is_whitespace()) {
                out.push(' ');
            }
        } else if *token != Token::EOF {
            out.push_str(&token.to_string());
        }
    }
    out
}

/// Comment-stripped, trimmed form used for exact-match lookups
pub fn normalize(sql: &str) -> String {
    strip_comments(sql).trim().to_string()
}
