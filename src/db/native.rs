//! The native driver seam.
//!
//! `Connection` never talks to a database library directly. It goes through a
//! [`Connector`] that opens [`NativeHandle`]s. The sqlx implementation lives in
//! [`crate::db::backend`]; tests plug in scripted handles.

use crate::config::Dsn;
use crate::db::Platform;
use crate::error::DbError;
use crate::models::{QueryParam, Row};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Everything a connector needs to open one handle.
#[derive(Clone)]
pub struct ConnectRequest {
    pub dsn: Dsn,
    pub username: Option<String>,
    /// Contains sensitive data - never log
    pub password: Option<String>,
    pub options: BTreeMap<String, String>,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("dsn", &self.dsn)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("options", &self.options)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Failure class reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// The request itself is unusable; retrying cannot help.
    Configuration,
    Connect,
    ConnectionLost,
    Query,
}

/// Error reported by a native handle or connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    pub kind: NativeErrorKind,
    pub message: String,
    pub sql_state: Option<String>,
}

/// Message fragments that identify a dropped server connection.
const CONNECTION_LOST_MARKERS: &[&str] = &[
    "gone away",
    "lost connection",
    "server closed the connection",
    "connection reset",
    "broken pipe",
];

impl NativeError {
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::Configuration, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::Connect, message)
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::ConnectionLost, message)
    }

    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self {
            kind: NativeErrorKind::Query,
            message: message.into(),
            sql_state,
        }
    }

    /// Whether this error means the server connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        if self.kind == NativeErrorKind::ConnectionLost {
            return true;
        }
        let lower = self.message.to_lowercase();
        CONNECTION_LOST_MARKERS.iter().any(|m| lower.contains(m))
    }
}

impl From<NativeError> for DbError {
    fn from(err: NativeError) -> Self {
        match err.kind {
            NativeErrorKind::Configuration => DbError::configuration(err.message),
            NativeErrorKind::Connect => DbError::connection(
                err.message,
                "Check that the database server is running and accessible",
            ),
            NativeErrorKind::ConnectionLost | NativeErrorKind::Query => {
                let suggestion = if err.is_connection_lost() {
                    "The connection was lost; reconnect and retry the statement"
                } else {
                    "Check the SQL syntax and referenced objects"
                };
                DbError::query(err.message, err.sql_state, suggestion)
            }
        }
    }
}

/// What a native query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    /// A row set, fully fetched from the server.
    Rows { columns: Vec<String>, rows: Vec<Row> },
    /// A write acknowledgment.
    Affected {
        rows_affected: u64,
        last_insert_id: Option<String>,
    },
}

impl NativeOutcome {
    pub fn rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::Rows { columns, rows }
    }

    pub fn affected(rows_affected: u64, last_insert_id: Option<String>) -> Self {
        Self::Affected {
            rows_affected,
            last_insert_id,
        }
    }
}

/// One open native database session.
pub trait NativeHandle: Send + 'static {
    fn platform(&self) -> Platform;

    /// Run `sql` with positional `params`.
    fn query(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = Result<NativeOutcome, NativeError>> + Send;

    /// Prepare `sql` server-side and report its parameter count.
    fn prepare(&mut self, sql: &str) -> impl Future<Output = Result<usize, NativeError>> + Send;

    /// Cheap liveness check.
    fn ping(&mut self) -> impl Future<Output = Result<(), NativeError>> + Send;

    fn begin(&mut self) -> impl Future<Output = Result<(), NativeError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), NativeError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), NativeError>> + Send;

    /// Last generated id, optionally from the named sequence.
    fn last_insert_id(
        &mut self,
        name: Option<&str>,
    ) -> impl Future<Output = Result<Option<String>, NativeError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), NativeError>> + Send;
}

/// Opens native handles.
pub trait Connector: Send + Sync + 'static {
    type Handle: NativeHandle;

    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = Result<Self::Handle, NativeError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_markers() {
        assert!(NativeError::query("MySQL server has gone away", None).is_connection_lost());
        assert!(NativeError::query("Lost connection to server during query", None).is_connection_lost());
        assert!(NativeError::connection_lost("eof").is_connection_lost());
        assert!(!NativeError::query("syntax error at or near \"SELEC\"", None).is_connection_lost());
    }

    #[test]
    fn test_native_error_into_db_error() {
        let err: DbError = NativeError::configuration("bad dsn").into();
        assert!(matches!(err, DbError::Configuration { .. }));

        let err: DbError = NativeError::connect("refused").into();
        assert!(err.is_retryable());

        let err: DbError = NativeError::query("no such table: users", Some("HY000".into())).into();
        assert_eq!(err.sql_state(), Some("HY000"));
        assert!(err.to_string().contains("no such table: users"));
    }

    #[test]
    fn test_connect_request_debug_masks_password() {
        let request = ConnectRequest {
            dsn: Dsn::new("mysql", "host=db"),
            username: Some("app".into()),
            password: Some("hunter2".into()),
            options: BTreeMap::new(),
            connect_timeout: Duration::from_secs(1),
        };
        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter2"));
    }
}
