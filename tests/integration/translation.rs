//! Translated and bypassed driver queries

use crate::{get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;
use mysql::Row;

#[test]
fn test_transaction_read_only_query() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let row: Row = conn
        .query_first("SELECT @@session.transaction_read_only")
        .unwrap()
        .expect("query should return a row");

    assert_eq!(
        row.columns_ref()[0].name_str(),
        "@@session.transaction_read_only"
    );
    assert_eq!(row.get::<i64, _>(0), Some(0));
}

#[test]
fn test_transaction_isolation_query() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let value: Option<String> = conn
        .query_first("SELECT @@session.transaction_isolation")
        .unwrap();
    assert_eq!(value.as_deref(), Some("REPEATABLE-READ"));
}

#[test]
fn test_bypass_queries_return_ok() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("show databases").expect("bypass should succeed");
    conn.query_drop("show tables").expect("bypass should succeed");
}
