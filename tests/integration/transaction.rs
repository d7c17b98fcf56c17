//! Transaction and autocommit integration tests

use crate::{assert_query_error, get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn test_autocommit_toggle() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();

    conn.query_drop("SET autocommit = 0").expect("disable autocommit");
    let value: Option<i64> = conn.query_first("SELECT @@autocommit").unwrap();
    assert_eq!(value, Some(0));

    conn.query_drop("SELECT 1").unwrap();
    conn.query_drop("SET autocommit = 1").expect("enable autocommit");
    let value: Option<i64> = conn.query_first("SELECT @@autocommit").unwrap();
    assert_eq!(value, Some(1));
}

#[test]
fn test_explicit_transaction() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("BEGIN").expect("BEGIN should succeed");
    conn.query_drop("SELECT 1").unwrap();
    conn.query_drop("COMMIT").expect("COMMIT should succeed");

    conn.query_drop("START TRANSACTION").unwrap();
    conn.query_drop("ROLLBACK").expect("ROLLBACK should succeed");
}

#[test]
fn test_invalid_autocommit_value() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    assert_query_error(
        conn.query_drop("SET autocommit = 'maybe'"),
        1231,
        "autocommit",
    );
}
