//! Recognition of session-management statements.
//!
//! Only `SET` and variable-only `SELECT` statements are parsed here. Anything
//! else returns `Ok(None)` and is forwarded to the backend untouched.

use thiserror::Error;

use crate::protocol::{error_codes::*, ErrPacket};
use crate::session::VariableScope;

use super::splitter::strip_comments;
use super::tokenizer::{tokenize, Token};

/// Words that end a select list; a bare word after a variable is an alias
/// unless it is one of these.
const CLAUSE_KEYWORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "INTO", "UNION", "FOR", "WINDOW",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableTarget {
    /// System variable; `name` is lower-cased
    System { name: String, scope: VariableScope },
    /// User variable (`@name`)
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    /// `None` for SQL NULL
    Literal(Option<String>),
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub target: VariableTarget,
    pub value: SetValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub target: VariableTarget,
    /// Column label: the alias, or the variable as written
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatement {
    Set(Vec<Assignment>),
    Select(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("You have an error in your SQL syntax: {0}")]
    Syntax(String),

    #[error("Unknown system variable '{qualifier}.{name}'")]
    UnknownScope { qualifier: String, name: String },
}

impl ParseError {
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            ParseError::Syntax(_) => ErrPacket::new(ER_PARSE, "42000", self.to_string()),
            ParseError::UnknownScope { .. } => {
                ErrPacket::new(ER_UNKNOWN_SYSTEM_VARIABLE, "HY000", self.to_string())
            }
        }
    }
}

fn syntax(message: impl Into<String>) -> ParseError {
    ParseError::Syntax(message.into())
}

/// Split `scope.name` from an `@@` token into a target
fn system_target(raw: &str, default_scope: VariableScope) -> Result<VariableTarget, ParseError> {
    match raw.split_once('.') {
        Some((qualifier, name)) => {
            let scope = VariableScope::from_qualifier(qualifier).ok_or_else(|| {
                ParseError::UnknownScope {
                    qualifier: qualifier.to_string(),
                    name: name.to_string(),
                }
            })?;
            if name.is_empty() || name.contains('.') {
                return Err(syntax(format!("bad variable name '@@{}'", raw)));
            }
            Ok(VariableTarget::System {
                name: name.to_ascii_lowercase(),
                scope,
            })
        }
        None => Ok(VariableTarget::System {
            name: raw.to_ascii_lowercase(),
            scope: default_scope,
        }),
    }
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Word(word)) | Some(Token::QuotedIdent(word)) | Some(Token::String(word)) => {
                Ok(word)
            }
            _ => Err(syntax(format!("expected {}", what))),
        }
    }
}

impl SessionStatement {
    /// Parse `sql` if it is a session-management statement.
    ///
    /// Returns `Ok(None)` for statements that belong to the backend.
    pub fn parse(sql: &str) -> Result<Option<Self>, ParseError> {
        let tokens = match tokenize(sql) {
            Ok(tokens) => tokens,
            Err(e) if starts_with_set(sql) => return Err(syntax(e.to_string())),
            Err(_) => return Ok(None),
        };
        let mut cursor = Cursor::new(tokens);
        if cursor.eat_keyword("SET") {
            return parse_set(&mut cursor).map(Some);
        }
        if cursor.eat_keyword("SELECT") {
            return parse_select(&mut cursor);
        }
        Ok(None)
    }
}

/// Keyword check for text the tokenizer rejected
fn starts_with_set(sql: &str) -> bool {
    let stripped = strip_comments(sql);
    let first = stripped
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    first.eq_ignore_ascii_case("SET")
}

fn parse_set(cursor: &mut Cursor) -> Result<SessionStatement, ParseError> {
    let mut assignments = Vec::new();
    loop {
        parse_assignment(cursor, &mut assignments)?;
        if cursor.at_end() {
            break;
        }
        if !cursor.eat(&Token::Comma) {
            return Err(syntax("expected ',' or end of statement"));
        }
    }
    Ok(SessionStatement::Set(assignments))
}

fn scope_keyword(cursor: &mut Cursor) -> Option<VariableScope> {
    for (keyword, scope) in [
        ("GLOBAL", VariableScope::Global),
        ("SESSION", VariableScope::Session),
        ("LOCAL", VariableScope::Session),
    ] {
        if cursor.eat_keyword(keyword) {
            return Some(scope);
        }
    }
    None
}

fn system(name: &str, scope: VariableScope) -> VariableTarget {
    VariableTarget::System {
        name: name.to_string(),
        scope,
    }
}

fn parse_assignment(cursor: &mut Cursor, out: &mut Vec<Assignment>) -> Result<(), ParseError> {
    let keyword_scope = scope_keyword(cursor);

    if keyword_scope.is_none() && cursor.eat_keyword("NAMES") {
        return parse_names(cursor, out);
    }
    if cursor.eat_keyword("TRANSACTION") {
        return parse_transaction(cursor, keyword_scope.unwrap_or(VariableScope::Session), out);
    }

    let target = match cursor.next() {
        Some(Token::SystemVariable(raw)) if keyword_scope.is_none() => {
            system_target(&raw, VariableScope::Session)?
        }
        Some(Token::UserVariable(name)) if keyword_scope.is_none() => VariableTarget::User(name),
        Some(Token::Word(name)) | Some(Token::QuotedIdent(name)) => VariableTarget::System {
            name: name.to_ascii_lowercase(),
            scope: keyword_scope.unwrap_or(VariableScope::Session),
        },
        _ => return Err(syntax("expected a variable name after SET")),
    };

    if !cursor.eat(&Token::Assign) {
        return Err(syntax("expected '=' in SET"));
    }
    let value = parse_value(cursor)?;
    out.push(Assignment { target, value });
    Ok(())
}

/// `NAMES charset [COLLATE collation]` or `NAMES DEFAULT`
fn parse_names(cursor: &mut Cursor, out: &mut Vec<Assignment>) -> Result<(), ParseError> {
    let value = if cursor.eat_keyword("DEFAULT") {
        SetValue::Default
    } else {
        SetValue::Literal(Some(cursor.expect_word("a character set name after NAMES")?))
    };
    out.push(Assignment {
        target: system("names", VariableScope::Session),
        value,
    });
    if cursor.eat_keyword("COLLATE") {
        let collation = cursor.expect_word("a collation name after COLLATE")?;
        out.push(Assignment {
            target: system("collation_connection", VariableScope::Session),
            value: SetValue::Literal(Some(collation)),
        });
    }
    Ok(())
}

/// `TRANSACTION ISOLATION LEVEL ... | READ ONLY | READ WRITE`, comma separated
fn parse_transaction(
    cursor: &mut Cursor,
    scope: VariableScope,
    out: &mut Vec<Assignment>,
) -> Result<(), ParseError> {
    loop {
        if cursor.eat_keyword("ISOLATION") {
            if !cursor.eat_keyword("LEVEL") {
                return Err(syntax("expected LEVEL after ISOLATION"));
            }
            let level = if cursor.eat_keyword("SERIALIZABLE") {
                "SERIALIZABLE"
            } else if cursor.eat_keyword("REPEATABLE") && cursor.eat_keyword("READ") {
                "REPEATABLE-READ"
            } else if cursor.eat_keyword("READ") {
                if cursor.eat_keyword("COMMITTED") {
                    "READ-COMMITTED"
                } else if cursor.eat_keyword("UNCOMMITTED") {
                    "READ-UNCOMMITTED"
                } else {
                    return Err(syntax("unknown isolation level"));
                }
            } else {
                return Err(syntax("unknown isolation level"));
            };
            out.push(Assignment {
                target: system("transaction_isolation", scope),
                value: SetValue::Literal(Some(level.to_string())),
            });
        } else if cursor.eat_keyword("READ") {
            let read_only = if cursor.eat_keyword("ONLY") {
                "1"
            } else if cursor.eat_keyword("WRITE") {
                "0"
            } else {
                return Err(syntax("expected ONLY or WRITE after READ"));
            };
            out.push(Assignment {
                target: system("transaction_read_only", scope),
                value: SetValue::Literal(Some(read_only.to_string())),
            });
        } else {
            return Err(syntax("expected ISOLATION LEVEL or READ after TRANSACTION"));
        }

        // the comma is shared with the outer assignment list
        let characteristic_follows = cursor.peek() == Some(&Token::Comma)
            && cursor
                .tokens
                .get(cursor.pos + 1)
                .is_some_and(|t| t.is_keyword("ISOLATION") || t.is_keyword("READ"));
        if !characteristic_follows {
            return Ok(());
        }
        cursor.next();
    }
}

fn parse_value(cursor: &mut Cursor) -> Result<SetValue, ParseError> {
    let negative = if cursor.eat(&Token::Minus) {
        true
    } else {
        cursor.eat(&Token::Plus);
        false
    };

    let value = match cursor.next() {
        Some(Token::Number(number)) if negative => SetValue::Literal(Some(format!("-{}", number))),
        Some(Token::Number(number)) => SetValue::Literal(Some(number)),
        _ if negative => return Err(syntax("expected a number after '-'")),
        Some(Token::String(text)) | Some(Token::QuotedIdent(text)) => {
            SetValue::Literal(Some(text))
        }
        Some(Token::Word(word)) if word.eq_ignore_ascii_case("DEFAULT") => SetValue::Default,
        Some(Token::Word(word)) if word.eq_ignore_ascii_case("NULL") => SetValue::Literal(None),
        Some(Token::Word(word)) => SetValue::Literal(Some(word)),
        _ => return Err(syntax("expected a value in SET")),
    };

    match cursor.peek() {
        None | Some(Token::Comma) => Ok(value),
        Some(_) => Err(syntax("only literal values are supported in SET")),
    }
}

fn parse_select(cursor: &mut Cursor) -> Result<Option<SessionStatement>, ParseError> {
    let mut items = Vec::new();
    loop {
        let (target, written) = match cursor.next() {
            Some(Token::SystemVariable(raw)) => {
                (system_target(&raw, VariableScope::Session)?, format!("@@{}", raw))
            }
            Some(Token::UserVariable(name)) => {
                let written = format!("@{}", name);
                (VariableTarget::User(name), written)
            }
            _ => return Ok(None),
        };

        let label = if cursor.eat_keyword("AS") {
            match cursor.next() {
                Some(Token::Word(alias))
                | Some(Token::QuotedIdent(alias))
                | Some(Token::String(alias)) => alias,
                _ => return Ok(None),
            }
        } else {
            match cursor.peek() {
                Some(Token::Word(alias))
                    if !CLAUSE_KEYWORDS.iter().any(|k| alias.eq_ignore_ascii_case(k)) =>
                {
                    let alias = alias.clone();
                    cursor.next();
                    alias
                }
                Some(Token::QuotedIdent(alias)) => {
                    let alias = alias.clone();
                    cursor.next();
                    alias
                }
                _ => written,
            }
        };
        items.push(SelectItem { target, label });

        if cursor.at_end() {
            return Ok(Some(SessionStatement::Select(items)));
        }
        if !cursor.eat(&Token::Comma) {
            return Ok(None);
        }
    }
}

/// Connection id named by `KILL [CONNECTION] <id>`
pub fn kill_target(sql: &str) -> Option<u32> {
    let mut cursor = Cursor::new(tokenize(sql).ok()?);
    if !cursor.eat_keyword("KILL") {
        return None;
    }
    cursor.eat_keyword("CONNECTION");
    let id = match cursor.next()? {
        Token::Number(number) => number.parse().ok()?,
        _ => return None,
    };
    cursor.at_end().then_some(id)
}
