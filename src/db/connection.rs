//! Database connection lifecycle.
//!
//! A [`Connection`] owns exactly one native handle. It connects lazily with a
//! bounded number of attempts, detects dropped server connections, tracks
//! whether a transaction is open, and runs raw SQL.

use crate::config::{CONNECT_ATTEMPTS, ConnectionParameters, DEFAULT_CONNECT_TIMEOUT_SECS};
use crate::db::Platform;
use crate::db::driver::Prototypes;
use crate::db::native::{ConnectRequest, Connector, NativeErrorKind, NativeHandle, NativeOutcome};
use crate::db::result::{ResultSet, ensure_not_streaming};
use crate::db::statement::Statement;
use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of asking for the last generated id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedValue {
    Value(String),
    /// The platform needs a sequence name and none was given.
    Unsupported,
    /// Nothing has been generated on this connection.
    Unavailable,
}

impl GeneratedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A single database connection.
pub struct Connection<C: Connector> {
    connector: C,
    parameters: ConnectionParameters,
    handle: Option<Arc<Mutex<C::Handle>>>,
    platform: Option<Platform>,
    in_transaction: bool,
    /// Number of unbuffered results still being consumed
    streaming: Arc<AtomicUsize>,
    prototypes: Prototypes,
    connect_timeout: Duration,
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("parameters", &self.parameters)
            .field("connected", &self.handle.is_some())
            .field("platform", &self.platform)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl<C: Connector> Connection<C> {
    /// Create a disconnected connection.
    pub fn new(connector: C, parameters: ConnectionParameters) -> Self {
        Self {
            connector,
            platform: parameters.platform(),
            parameters,
            handle: None,
            in_transaction: false,
            streaming: Arc::new(AtomicUsize::new(0)),
            prototypes: Prototypes::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Wrap an already open native handle.
    ///
    /// Only the driver name is known, taken from the handle. Once the handle
    /// is lost no dsn can be built, so a reconnect fails with a configuration
    /// error. Use [`Connection::from_handle_with_parameters`] when the
    /// connection must survive a lost handle.
    pub fn from_handle(connector: C, handle: C::Handle) -> Self {
        let parameters = ConnectionParameters::new().with_driver(handle.platform().dsn_prefix());
        Self::from_handle_with_parameters(connector, handle, parameters)
    }

    /// Wrap an already open native handle; `parameters` describe how to
    /// reconnect through `connector` once the handle is lost.
    pub fn from_handle_with_parameters(
        connector: C,
        handle: C::Handle,
        parameters: ConnectionParameters,
    ) -> Self {
        let platform = handle.platform();
        let mut connection = Self::new(connector, parameters);
        connection.platform = Some(platform);
        connection.handle = Some(Arc::new(Mutex::new(handle)));
        connection
    }

    /// Override the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    /// Lowercase driver name (`mysql`, `pgsql`, `sqlite`).
    pub fn driver_name(&self) -> Option<String> {
        self.parameters
            .driver_name()
            .or_else(|| self.platform.map(|p| p.dsn_prefix().to_string()))
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether a native handle is held, without pinging it.
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn register_prototypes(&mut self, prototypes: Prototypes) {
        self.prototypes = prototypes;
    }

    pub(crate) fn streaming_flag(&self) -> &Arc<AtomicUsize> {
        &self.streaming
    }

    fn reset(&mut self) {
        self.handle = None;
        self.in_transaction = false;
        self.streaming = Arc::new(AtomicUsize::new(0));
    }

    /// Open the native handle. Does nothing when already connected.
    pub async fn connect(&mut self) -> DbResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let dsn = self.parameters.build_dsn()?;
        let driver = dsn.driver().to_string();
        let request = ConnectRequest {
            dsn,
            username: self.parameters.username.clone(),
            password: self.parameters.password.clone(),
            options: self.parameters.options.clone(),
            connect_timeout: self.connect_timeout,
        };

        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            let outcome = self.connector.connect(&request).await;
            match outcome {
                Ok(handle) => {
                    let platform = handle.platform();
                    info!(driver = %driver, attempt, "Connected to {}", platform);
                    self.reset();
                    self.platform = Some(platform);
                    self.handle = Some(Arc::new(Mutex::new(handle)));
                    return Ok(());
                }
                Err(e) if e.kind == NativeErrorKind::Configuration => {
                    return Err(DbError::configuration(e.message));
                }
                Err(e) => {
                    warn!(
                        attempt,
                        driver = %driver,
                        host = ?self.parameters.host,
                        port = ?self.parameters.port,
                        error = %e,
                        "Connect attempt failed"
                    );
                    last_error = e.message;
                }
            }
        }

        error!(driver = %driver, attempts = CONNECT_ATTEMPTS, error = %last_error, "Unable to connect");
        let suggestion = connection_suggestion(self.platform, &last_error);
        Err(DbError::connection(
            format!("Connect Error: {}", last_error),
            suggestion,
        ))
    }

    /// Whether the handle is alive.
    ///
    /// Pings the server. If the ping reports a lost connection the handle is
    /// discarded and `false` is returned; the next call that needs the server
    /// connects afresh.
    pub async fn is_connected(&mut self) -> bool {
        let Some(handle) = self.handle.clone() else {
            return false;
        };
        // the wire is busy with rows that belong to the open result
        if self.streaming.load(Ordering::Acquire) > 0 {
            return true;
        }

        let ping = handle.lock().await.ping().await;
        match ping {
            Ok(()) => true,
            Err(e) if e.is_connection_lost() => {
                warn!(driver = ?self.driver_name(), error = %e, "Connection lost, discarding handle");
                self.reset();
                false
            }
            Err(e) => {
                debug!(error = %e, "Liveness ping failed");
                true
            }
        }
    }

    /// Release the handle. No-op when not connected.
    pub async fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.reset();

        match Arc::try_unwrap(handle) {
            Ok(mutex) => {
                if let Err(e) = mutex.into_inner().close().await {
                    debug!(error = %e, "Error while closing connection");
                }
            }
            Err(_) => debug!("Handle still in use by a statement, dropping it"),
        }
    }

    /// Connect if needed and return the shared handle.
    pub(crate) async fn connected_handle(&mut self) -> DbResult<Arc<Mutex<C::Handle>>> {
        self.connect().await?;
        self.handle
            .clone()
            .ok_or_else(|| DbError::internal("No handle after a successful connect"))
    }

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        let handle = self.connected_handle().await?;
        if self.in_transaction {
            return Err(DbError::transaction_usage("A transaction is already active"));
        }
        ensure_not_streaming(&self.streaming)?;

        handle.lock().await.begin().await?;
        self.in_transaction = true;
        debug!("Transaction started");
        Ok(())
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let handle = self.connected_handle().await?;
        ensure_not_streaming(&self.streaming)?;

        let outcome = handle.lock().await.commit().await;
        self.in_transaction = false;
        outcome?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let Some(handle) = self.handle.clone() else {
            return Err(DbError::transaction_usage(
                "Must be connected before you can rollback",
            ));
        };
        if !self.in_transaction {
            return Err(DbError::transaction_usage(
                "Must call begin_transaction() before you can rollback",
            ));
        }
        ensure_not_streaming(&self.streaming)?;

        let outcome = handle.lock().await.rollback().await;
        self.in_transaction = false;
        outcome?;
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Run raw SQL without parameters.
    pub async fn execute(&mut self, sql: &str) -> DbResult<ResultSet> {
        let handle = self.connected_handle().await?;
        ensure_not_streaming(&self.streaming)?;

        let outcome = handle.lock().await.query(sql, &[]).await?;
        Ok(self.prototypes.result.instantiate(outcome, None, &self.streaming))
    }

    /// Create and prepare a statement; nothing is executed.
    pub async fn prepare(&mut self, sql: &str) -> DbResult<Statement<C::Handle>> {
        let handle = self.connected_handle().await?;
        let mut statement = self.prototypes.statement.instantiate(
            sql.to_string(),
            Arc::downgrade(&handle),
            Arc::clone(&self.streaming),
            self.prototypes.result,
        );
        statement.prepare().await?;
        Ok(statement)
    }

    /// Last generated id, from the named sequence where the platform needs one.
    pub async fn get_last_generated_value(&mut self, name: Option<&str>) -> DbResult<GeneratedValue> {
        let handle = self.connected_handle().await?;
        let platform = handle.lock().await.platform();
        if platform.requires_sequence_name() && name.is_none() {
            return Ok(GeneratedValue::Unsupported);
        }
        ensure_not_streaming(&self.streaming)?;

        let id = handle.lock().await.last_insert_id(name).await?;
        Ok(id.map_or(GeneratedValue::Unavailable, GeneratedValue::Value))
    }

    /// Name of the active schema.
    pub async fn get_current_schema(&mut self) -> DbResult<Option<String>> {
        let handle = self.connected_handle().await?;
        let platform = handle.lock().await.platform();
        if let Some(schema) = platform.fixed_schema() {
            return Ok(Some(schema.to_string()));
        }
        let Some(sql) = platform.current_schema_sql() else {
            return Ok(None);
        };
        ensure_not_streaming(&self.streaming)?;

        let outcome = handle.lock().await.query(sql, &[]).await?;
        let NativeOutcome::Rows { rows, .. } = outcome else {
            return Ok(None);
        };
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(|value| match value {
                JsonValue::String(s) => Some(s.clone()),
                _ => None,
            }))
    }
}

/// Hint attached to the final connect error.
fn connection_suggestion(platform: Option<Platform>, message: &str) -> String {
    let lower = message.to_lowercase();

    if lower.contains("connection refused") || lower.contains("timed out") {
        return match platform {
            Some(p) => format!("Check that the {} server is running and accessible", p),
            None => "Check that the database server is running and accessible".to_string(),
        };
    }

    if lower.contains("authentication") || lower.contains("password") || lower.contains("access denied") {
        return "Verify the username and password".to_string();
    }

    if lower.contains("does not exist") || lower.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if lower.contains("tls") || lower.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match platform {
        Some(Platform::Postgres) => "Verify the dsn format: pgsql:host=localhost;port=5432;dbname=app".to_string(),
        Some(Platform::MySql) => "Verify the dsn format: mysql:host=localhost;port=3306;dbname=app".to_string(),
        Some(Platform::Sqlite) => "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string(),
        None => "Verify the connection parameters".to_string(),
    }
}
