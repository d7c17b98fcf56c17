//! Token view of a statement for the shapes handled inside the proxy.
//!
//! Lexing is done by `sqlparser` with the MySQL dialect; this module folds
//! its tokens into the few kinds the session parser matches on and joins
//! `@`/`@@` variable references into single tokens.

use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token as SqlToken, Tokenizer, Whitespace};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: keyword or identifier, as written
    Word(String),
    /// Backtick-quoted identifier, unquoted
    QuotedIdent(String),
    /// `@@name` or `@@scope.name`, without the `@@`
    SystemVariable(String),
    /// `@name`, without the `@`
    UserVariable(String),
    /// Single- or double-quoted string, unescaped
    String(String),
    /// Numeric literal as written
    Number(String),
    /// `=` or `:=`
    Assign,
    Comma,
    LParen,
    RParen,
    Minus,
    Plus,
    Other(char),
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("{0}")]
    Lex(String),

    #[error("empty variable name")]
    EmptyVariable,
}

/// Raw `sqlparser` tokens, comments and whitespace included
pub(crate) fn lex(sql: &str, unescape: bool) -> Result<Vec<SqlToken>, TokenizeError> {
    Tokenizer::new(&MySqlDialect {}, sql)
        .with_unescape(unescape)
        .tokenize()
        .map_err(|e| TokenizeError::Lex(e.to_string()))
}

pub(crate) fn is_comment(token: &SqlToken) -> bool {
    matches!(
        token,
        SqlToken::Whitespace(Whitespace::SingleLineComment { .. })
            | SqlToken::Whitespace(Whitespace::MultiLineComment(_))
    )
}

fn is_at_sign(token: &SqlToken) -> bool {
    !matches!(token, SqlToken::Word(_)) && token.to_string() == "@"
}

fn bare_word(token: Option<&SqlToken>) -> Option<&str> {
    match token {
        Some(SqlToken::Word(word)) if word.quote_style.is_none() => Some(&word.value),
        _ => None,
    }
}

/// Fold `@`, `@@` and `@@scope.name` starting at `raw[*pos]` into one token
fn variable(raw: &[SqlToken], pos: &mut usize) -> Result<Token, TokenizeError> {
    let mut ats = 0;
    while raw.get(*pos).is_some_and(is_at_sign) {
        ats += 1;
        *pos += 1;
    }
    let mut name = String::new();
    if let Some(value) = bare_word(raw.get(*pos)) {
        let trimmed = value.trim_start_matches('@');
        ats += value.len() - trimmed.len();
        name.push_str(trimmed);
        *pos += 1;
    }
    if ats >= 2 {
        while matches!(raw.get(*pos), Some(SqlToken::Period)) {
            let Some(part) = bare_word(raw.get(*pos + 1)) else {
                break;
            };
            name.push('.');
            name.push_str(part);
            *pos += 2;
        }
    }
    if name.is_empty() {
        return Err(TokenizeError::EmptyVariable);
    }
    Ok(if ats >= 2 {
        Token::SystemVariable(name)
    } else {
        Token::UserVariable(name)
    })
}

/// Tokenize a single statement; comments and whitespace are dropped
pub fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizeError> {
    let raw = lex(sql, true)?;
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(token) = raw.get(pos) {
        let starts_variable = is_at_sign(token)
            || bare_word(Some(token)).is_some_and(|value| value.starts_with('@'));
        if starts_variable {
            tokens.push(variable(&raw, &mut pos)?);
            continue;
        }
        pos += 1;

        let folded = match token {
            SqlToken::EOF | SqlToken::Whitespace(_) => continue,
            SqlToken::Word(word) => match word.quote_style {
                None => Token::Word(word.value.clone()),
                Some(_) => Token::QuotedIdent(word.value.clone()),
            },
            SqlToken::SingleQuotedString(text) | SqlToken::DoubleQuotedString(text) => {
                Token::String(text.clone())
            }
            SqlToken::Number(number, _) => Token::Number(number.clone()),
            SqlToken::Eq => Token::Assign,
            SqlToken::Colon if matches!(raw.get(pos), Some(SqlToken::Eq)) => {
                pos += 1;
                Token::Assign
            }
            SqlToken::Comma => Token::Comma,
            SqlToken::LParen => Token::LParen,
            SqlToken::RParen => Token::RParen,
            SqlToken::Minus => Token::Minus,
            SqlToken::Plus => Token::Plus,
            other => {
                let text = other.to_string();
                if text == ":=" {
                    Token::Assign
                } else {
                    Token::Other(text.chars().next().unwrap_or(' '))
                }
            }
        };
        tokens.push(folded);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_statement_tokens() {
        assert_eq!(
            tokenize("SET @@session.autocommit := 0").unwrap(),
            vec![
                Token::Word("SET".into()),
                Token::SystemVariable("session.autocommit".into()),
                Token::Assign,
                Token::Number("0".into()),
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            tokenize(r#"'it''s' "a\"b" `odd name`"#).unwrap(),
            vec![
                Token::String("it's".into()),
                Token::String("a\"b".into()),
                Token::QuotedIdent("odd name".into()),
            ]
        );
        assert!(matches!(tokenize("'open"), Err(TokenizeError::Lex(_))));
    }

    #[test]
    fn test_numbers_and_signs() {
        assert_eq!(
            tokenize("-1.5, 2").unwrap(),
            vec![
                Token::Minus,
                Token::Number("1.5".into()),
                Token::Comma,
                Token::Number("2".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(
            tokenize("SET /* note */ x = 1 -- trailing").unwrap(),
            vec![
                Token::Word("SET".into()),
                Token::Word("x".into()),
                Token::Assign,
                Token::Number("1".into()),
            ]
        );
    }

    #[test]
    fn test_user_variable_and_empty_name() {
        assert_eq!(
            tokenize("@x").unwrap(),
            vec![Token::UserVariable("x".into())]
        );
        assert_eq!(tokenize("SELECT @@"), Err(TokenizeError::EmptyVariable));
    }

    #[test]
    fn test_keyword_match_ignores_case() {
        let tokens = tokenize("select").unwrap();
        assert!(tokens[0].is_keyword("SELECT"));
        assert!(!tokens[0].is_keyword("SET"));
    }
}
