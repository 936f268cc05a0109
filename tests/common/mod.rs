//! Scripted native layer shared by the integration tests.

#![allow(dead_code)]

use db_adapter::db::{ConnectRequest, Connector, NativeError, NativeHandle, NativeOutcome, Platform};
use db_adapter::models::{QueryParam, Row};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Route adapter logs to the test output; filter with RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Knobs and counters shared by a connector and every handle it opens.
#[derive(Debug, Default)]
pub struct MockState {
    pub connect_attempts: AtomicUsize,
    /// Number of upcoming connect attempts that fail
    pub failing_connects: AtomicUsize,
    pub reject_configuration: AtomicBool,
    /// Every handle reports "server has gone away" while set
    pub gone_away: AtomicBool,
    pub closed: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
}

impl MockState {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn record(&self, sql: &str) {
        self.executed.lock().unwrap().push(sql.to_string());
    }

    fn check_alive(&self) -> Result<(), NativeError> {
        if self.gone_away.load(Ordering::SeqCst) {
            return Err(NativeError::query("MySQL server has gone away", Some("HY000".into())));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(attempts: usize) -> Self {
        let connector = Self::new();
        connector.state.failing_connects.store(attempts, Ordering::SeqCst);
        connector
    }

    pub fn attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// A handle opened outside any connection, sharing this connector's state.
    pub fn open_handle(&self, platform: Platform) -> MockHandle {
        MockHandle {
            platform,
            state: Arc::clone(&self.state),
            last_id: None,
        }
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn connect(&self, request: &ConnectRequest) -> Result<MockHandle, NativeError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.state.reject_configuration.load(Ordering::SeqCst) {
            return Err(NativeError::configuration(format!("invalid dsn '{}'", request.dsn)));
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(NativeError::connect(format!(
                "Connection refused (attempt {})",
                attempt
            )));
        }

        Ok(MockHandle {
            platform: request.dsn.platform().unwrap_or(Platform::MySql),
            state: Arc::clone(&self.state),
            last_id: None,
        })
    }
}

/// A handle answering from a fixed script:
///
/// - `SELECT ...` returns rows `{id: 1, name: "a"}` and `{id: 2, name: "b"}`
/// - `SELECT ... WHERE 1 = 0` returns no rows
/// - `INSERT ...` affects one row and generates id 42
/// - anything containing `BOGUS` fails with a syntax error
/// - everything else affects zero rows
#[derive(Debug)]
pub struct MockHandle {
    platform: Platform,
    state: Arc<MockState>,
    last_id: Option<String>,
}

pub fn sample_rows() -> Vec<Row> {
    vec![
        json!({"id": 1, "name": "a"}).as_object().cloned().unwrap(),
        json!({"id": 2, "name": "b"}).as_object().cloned().unwrap(),
    ]
}

impl NativeHandle for MockHandle {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn query(&mut self, sql: &str, _params: &[QueryParam]) -> Result<NativeOutcome, NativeError> {
        self.state.check_alive()?;
        self.state.record(sql);

        let upper = sql.trim().to_uppercase();
        if upper.contains("BOGUS") {
            return Err(NativeError::query("You have an error in your SQL syntax", Some("42000".into())));
        }
        if upper.starts_with("SELECT") {
            let columns = vec!["id".to_string(), "name".to_string()];
            if upper.contains("WHERE 1 = 0") {
                return Ok(NativeOutcome::rows(columns, Vec::new()));
            }
            return Ok(NativeOutcome::rows(columns, sample_rows()));
        }
        if upper.starts_with("INSERT") {
            self.last_id = Some("42".to_string());
            return Ok(NativeOutcome::affected(1, Some("42".to_string())));
        }
        Ok(NativeOutcome::affected(0, None))
    }

    async fn prepare(&mut self, sql: &str) -> Result<usize, NativeError> {
        self.state.check_alive()?;
        Ok(sql.matches('?').count())
    }

    async fn ping(&mut self) -> Result<(), NativeError> {
        self.state.check_alive()
    }

    async fn begin(&mut self) -> Result<(), NativeError> {
        self.state.check_alive()?;
        self.state.record("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.state.check_alive()?;
        self.state.record("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        self.state.check_alive()?;
        self.state.record("ROLLBACK");
        Ok(())
    }

    async fn last_insert_id(&mut self, _name: Option<&str>) -> Result<Option<String>, NativeError> {
        self.state.check_alive()?;
        Ok(self.last_id.clone())
    }

    async fn close(self) -> Result<(), NativeError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
