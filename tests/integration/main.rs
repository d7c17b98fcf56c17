//! Integration test entry point
//!
//! These tests drive a running spanwire proxy with the `mysql` client crate.
//!
//! Run with: SPANWIRE_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - SPANWIRE_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - SPANWIRE_TEST_PROXY_HOST: Proxy host (default: 127.0.0.1)
//! - SPANWIRE_TEST_PROXY_PORT: Proxy port (default: 3306)
//! - SPANWIRE_TEST_PROXY_USER: Proxy user (default: app)
//! - SPANWIRE_TEST_PROXY_PASS: Proxy password (default: empty)
//! - SPANWIRE_TEST_PROXY_DB: Database (default: test)

mod session;
mod transaction;
mod translation;

use mysql::{Conn, Error as MySqlError, OptsBuilder};
use std::env;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("SPANWIRE_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set SPANWIRE_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Proxy test configuration
#[derive(Debug, Clone)]
pub struct ProxyTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Get proxy connection config from environment
pub fn get_proxy_config() -> ProxyTestConfig {
    ProxyTestConfig {
        host: env::var("SPANWIRE_TEST_PROXY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("SPANWIRE_TEST_PROXY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("SPANWIRE_TEST_PROXY_USER").unwrap_or_else(|_| "app".to_string()),
        password: env::var("SPANWIRE_TEST_PROXY_PASS").unwrap_or_default(),
        database: env::var("SPANWIRE_TEST_PROXY_DB").unwrap_or_else(|_| "test".to_string()),
    }
}

impl ProxyTestConfig {
    fn opts(&self) -> OptsBuilder {
        OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password))
            .db_name(Some(&self.database))
            // The proxy has no unix socket to discover
            .prefer_socket(false)
    }

    /// Open a single connection to the proxy.
    ///
    /// Pooled connections are avoided: pool health checks send COM_PING,
    /// which the proxy treats as an unknown command.
    pub fn conn(&self) -> Conn {
        Conn::new(self.opts()).expect("Failed to connect to proxy")
    }
}

/// Assert that a query result is a MySQL error with given code and message
pub fn assert_query_error<T: std::fmt::Debug>(
    result: Result<T, MySqlError>,
    expected_code: u16,
    expected_msg: &str,
) {
    match result {
        Ok(v) => panic!(
            "Expected MySQL error {} with message containing '{}', but got: {:?}",
            expected_code, expected_msg, v
        ),
        Err(MySqlError::MySqlError(ref e)) => {
            assert_eq!(
                e.code, expected_code,
                "Expected error code {}, got {}. Message: {}",
                expected_code, e.code, e.message
            );
            assert!(
                e.message.contains(expected_msg),
                "Expected message containing '{}', got: {}",
                expected_msg,
                e.message
            );
        }
        Err(e) => panic!(
            "Expected MySQL error {} with message containing '{}', got different error: {:?}",
            expected_code, expected_msg, e
        ),
    }
}
