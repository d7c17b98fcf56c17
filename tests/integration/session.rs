//! Connection and session statement integration tests

use crate::{assert_query_error, get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn test_select_one() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let value: Option<i64> = conn.query_first("SELECT 1").expect("SELECT 1 should succeed");
    assert_eq!(value, Some(1));
}

#[test]
fn test_literal_select_with_aliases() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let row: Option<(i64, String, Option<String>)> = conn
        .query_first("SELECT 42 AS answer, 'hello' AS greeting, NULL AS nothing")
        .expect("SELECT should succeed");
    assert_eq!(row, Some((42, "hello".to_string(), None)));
}

#[test]
fn test_multi_statement_results() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let mut result = conn
        .query_iter("SELECT 1; SELECT 2")
        .expect("batch should succeed");

    let mut values = Vec::new();
    while let Some(set) = result.iter() {
        for row in set {
            let row = row.expect("row should decode");
            values.push(mysql::from_row::<i64>(row));
        }
    }
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn test_set_and_read_session_variable() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("SET SESSION wait_timeout = 60")
        .expect("SET should succeed");
    let value: Option<i64> = conn.query_first("SELECT @@wait_timeout").unwrap();
    assert_eq!(value, Some(60));

    conn.query_drop("SET wait_timeout = DEFAULT").unwrap();
    let value: Option<i64> = conn.query_first("SELECT @@session.wait_timeout").unwrap();
    assert_eq!(value, Some(28800));
}

#[test]
fn test_user_variables() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("SET @tenant = 'acme'").unwrap();
    let value: Option<String> = conn.query_first("SELECT @tenant").unwrap();
    assert_eq!(value.as_deref(), Some("acme"));
}

#[test]
fn test_unknown_variable_is_rejected() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    assert_query_error(
        conn.query_drop("SET nonexistent_var = 1"),
        1193,
        "nonexistent_var",
    );

    // The session survives a statement error
    let value: Option<i64> = conn.query_first("SELECT 1").unwrap();
    assert_eq!(value, Some(1));
}

#[test]
fn test_read_only_and_global_writes_rejected() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    assert_query_error(conn.query_drop("SET version = '9'"), 1238, "version");
    assert_query_error(
        conn.query_drop("SET GLOBAL wait_timeout = 10"),
        1227,
        "wait_timeout",
    );
}

#[test]
fn test_empty_query() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    assert_query_error(conn.query_drop(";"), 1065, "Query was empty");
}
