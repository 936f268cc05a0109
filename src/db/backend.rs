//! sqlx implementation of the native layer.
//!
//! A PDO-style DSN (`mysql:host=db;dbname=app`) or URL-style DSN
//! (`mysql://db/app`) is turned into a sqlx connection URL, and one
//! `MySqlConnection`, `PgConnection` or `SqliteConnection` is opened per
//! [`SqlxHandle`].

use crate::db::Platform;
use crate::db::native::{ConnectRequest, Connector, NativeError, NativeHandle, NativeOutcome};
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::RowToJson;
use crate::models::QueryParam;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnection, MySqlQueryResult};
use sqlx::postgres::{PgConnection, PgQueryResult};
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult};
use sqlx::{Column as _, Connection as _, Either, Executor as _, Statement as _};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Leading keywords of statements that produce a row set.
const ROW_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

/// Connector backed by sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

/// An open sqlx connection.
#[derive(Debug)]
pub enum SqlxHandle {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl Connector for SqlxConnector {
    type Handle = SqlxHandle;

    async fn connect(&self, request: &ConnectRequest) -> Result<SqlxHandle, NativeError> {
        let (platform, url) = sqlx_url(request)?;
        debug!(driver = platform.dsn_prefix(), "Opening native connection");

        let open = async {
            match platform {
                Platform::MySql => MySqlConnection::connect(&url).await.map(SqlxHandle::MySql),
                Platform::Postgres => PgConnection::connect(&url).await.map(SqlxHandle::Postgres),
                Platform::Sqlite => SqliteConnection::connect(&url).await.map(SqlxHandle::Sqlite),
            }
        };

        match tokio::time::timeout(request.connect_timeout, open).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(sqlx::Error::Configuration(e))) => Err(NativeError::configuration(e.to_string())),
            Ok(Err(e)) => Err(NativeError::connect(e.to_string())),
            Err(_) => Err(NativeError::connect(format!(
                "Connection timed out after {}s",
                request.connect_timeout.as_secs()
            ))),
        }
    }
}

/// Build the sqlx connection URL for a request.
pub fn sqlx_url(request: &ConnectRequest) -> Result<(Platform, String), NativeError> {
    let dsn = &request.dsn;
    let platform = dsn.platform().ok_or_else(|| {
        NativeError::configuration(format!("Unsupported driver '{}'", dsn.driver()))
    })?;

    if platform == Platform::Sqlite {
        return Ok((platform, sqlite_url(dsn.payload(), &request.options)));
    }

    let mut extra: Vec<(String, String)> = Vec::new();
    let mut url = if dsn.is_url() {
        Url::parse(&format!("{}:{}", platform.url_scheme(), dsn.payload()))
            .map_err(|e| NativeError::configuration(format!("Invalid dsn: {e}")))?
    } else {
        let mut host = None;
        let mut port = None;
        let mut dbname = None;
        let mut user = None;
        let mut password = None;

        for (key, value) in dsn.pairs() {
            match key.as_str() {
                "host" => host = Some(value),
                "port" => port = Some(value),
                "dbname" => dbname = Some(value),
                "user" => user = Some(value),
                "password" => password = Some(value),
                "charset" if platform == Platform::Postgres => {
                    extra.push(("options".into(), format!("-c client_encoding={}", value)))
                }
                "unix_socket" => extra.push(("socket".into(), value)),
                _ => extra.push((key, value)),
            }
        }

        let host = host.unwrap_or_else(|| "localhost".to_string());
        let mut url = Url::parse(&format!("{}://{}", platform.url_scheme(), host))
            .map_err(|e| NativeError::configuration(format!("Invalid host '{host}': {e}")))?;
        if let Some(port) = port {
            let port: u16 = port
                .parse()
                .map_err(|_| NativeError::configuration(format!("Invalid port: {port}")))?;
            url.set_port(Some(port))
                .map_err(|_| NativeError::configuration("Invalid port"))?;
        }
        if let Some(dbname) = dbname {
            url.set_path(&format!("/{}", dbname));
        }
        if let Some(user) = user {
            url.set_username(&user)
                .map_err(|_| NativeError::configuration("Invalid username"))?;
        }
        if let Some(password) = password {
            url.set_password(Some(&password))
                .map_err(|_| NativeError::configuration("Invalid password"))?;
        }
        url
    };

    if let Some(username) = &request.username {
        url.set_username(username)
            .map_err(|_| NativeError::configuration("Invalid username"))?;
    }
    if let Some(password) = &request.password {
        url.set_password(Some(password))
            .map_err(|_| NativeError::configuration("Invalid password"))?;
    }

    extra.extend(request.options.iter().map(|(k, v)| (k.clone(), v.clone())));
    if !extra.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in &extra {
            query.append_pair(key, value);
        }
    }

    Ok((platform, url.to_string()))
}

fn sqlite_url(payload: &str, options: &BTreeMap<String, String>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    // PDO creates missing database files
    if payload != ":memory:" && !payload.contains('?') && !options.contains_key("mode") {
        query.append_pair("mode", "rwc");
    }
    for (key, value) in options {
        query.append_pair(key, value);
    }
    let query = query.finish();

    match (query.is_empty(), payload.contains('?')) {
        (true, _) => format!("sqlite:{}", payload),
        (false, true) => format!("sqlite:{}&{}", payload, query),
        (false, false) => format!("sqlite:{}?{}", payload, query),
    }
}

/// Words of `sql` outside string literals, quoted identifiers and comments.
fn bare_words(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut words = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) != Some(&quote) {
                            break;
                        }
                        i += 1;
                    } else if bytes[i] == b'\\' && quote == b'\'' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                words.push(&sql[start..i]);
            }
            _ => i += 1,
        }
    }
    words
}

fn leading_keyword(sql: &str) -> String {
    bare_words(sql)
        .first()
        .map(|word| word.to_ascii_uppercase())
        .unwrap_or_default()
}

/// Whether `sql` produces a row set.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let words = bare_words(sql);
    let Some(first) = words.first() else {
        return false;
    };
    ROW_KEYWORDS.iter().any(|k| first.eq_ignore_ascii_case(k))
        || words.iter().any(|word| word.eq_ignore_ascii_case("RETURNING"))
}

fn generated_id(sql: &str, id: Option<i64>) -> Option<String> {
    let keyword = leading_keyword(sql);
    match id {
        Some(id) if id > 0 && (keyword == "INSERT" || keyword == "REPLACE") => Some(id.to_string()),
        _ => None,
    }
}

fn query_error(err: sqlx::Error) -> NativeError {
    match err {
        sqlx::Error::Database(db_err) => {
            NativeError::query(db_err.message(), db_err.code().map(|c| c.to_string()))
        }
        sqlx::Error::Io(e) => NativeError::connection_lost(format!("I/O error: {}", e)),
        sqlx::Error::Protocol(msg) => NativeError::connection_lost(format!("Protocol error: {}", msg)),
        sqlx::Error::WorkerCrashed => NativeError::connection_lost("Database worker crashed"),
        other => NativeError::query(other.to_string(), None),
    }
}

fn param_count<T>(parameters: Option<Either<&[T], usize>>) -> usize {
    match parameters {
        Some(Either::Left(types)) => types.len(),
        Some(Either::Right(count)) => count,
        None => 0,
    }
}

fn scalar_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Bind parameters, run the statement and shape the outcome.
macro_rules! run_query {
    ($conn:expr, $sql:expr, $params:expr, $bind:path, $insert_id:expr) => {{
        let conn = $conn;
        let mut query = sqlx::query($sql);
        for param in $params {
            query = $bind(query, param);
        }

        if returns_rows($sql) {
            let rows = query.fetch_all(&mut *conn).await.map_err(query_error)?;
            let columns = match rows.first() {
                Some(row) => row.column_names(),
                None => (&mut *conn)
                    .prepare($sql)
                    .await
                    .map(|stmt| stmt.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default(),
            };
            Ok(NativeOutcome::rows(
                columns,
                rows.iter().map(RowToJson::to_row).collect(),
            ))
        } else {
            let done = query.execute(&mut *conn).await.map_err(query_error)?;
            let id: Option<i64> = ($insert_id)(&done);
            Ok(NativeOutcome::affected(done.rows_affected(), generated_id($sql, id)))
        }
    }};
}

impl SqlxHandle {
    async fn simple(&mut self, sql: &str) -> Result<(), NativeError> {
        debug!(sql = %sql, "Executing native command");
        match self {
            Self::MySql(conn) => conn.execute(sql).await.map(|_| ()),
            Self::Postgres(conn) => conn.execute(sql).await.map(|_| ()),
            Self::Sqlite(conn) => conn.execute(sql).await.map(|_| ()),
        }
        .map_err(query_error)
    }
}

impl NativeHandle for SqlxHandle {
    fn platform(&self) -> Platform {
        match self {
            Self::MySql(_) => Platform::MySql,
            Self::Postgres(_) => Platform::Postgres,
            Self::Sqlite(_) => Platform::Sqlite,
        }
    }

    async fn query(&mut self, sql: &str, params: &[QueryParam]) -> Result<NativeOutcome, NativeError> {
        debug!(sql = %sql, params = params.len(), "Executing native query");
        match self {
            Self::MySql(conn) => run_query!(
                conn,
                sql,
                params,
                bind_mysql_param,
                |done: &MySqlQueryResult| i64::try_from(done.last_insert_id()).ok()
            ),
            Self::Postgres(conn) => run_query!(
                conn,
                sql,
                params,
                bind_postgres_param,
                |_: &PgQueryResult| None
            ),
            Self::Sqlite(conn) => run_query!(
                conn,
                sql,
                params,
                bind_sqlite_param,
                |done: &SqliteQueryResult| Some(done.last_insert_rowid())
            ),
        }
    }

    async fn prepare(&mut self, sql: &str) -> Result<usize, NativeError> {
        match self {
            Self::MySql(conn) => {
                let stmt = (&mut *conn).prepare(sql).await.map_err(query_error)?;
                Ok(param_count(stmt.parameters()))
            }
            Self::Postgres(conn) => {
                let stmt = (&mut *conn).prepare(sql).await.map_err(query_error)?;
                Ok(param_count(stmt.parameters()))
            }
            Self::Sqlite(conn) => {
                let stmt = (&mut *conn).prepare(sql).await.map_err(query_error)?;
                Ok(param_count(stmt.parameters()))
            }
        }
    }

    async fn ping(&mut self) -> Result<(), NativeError> {
        let sql = self.platform().ping_sql();
        self.simple(sql).await
    }

    async fn begin(&mut self) -> Result<(), NativeError> {
        let sql = self.platform().begin_sql();
        self.simple(sql).await
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        self.simple("ROLLBACK").await
    }

    async fn last_insert_id(&mut self, name: Option<&str>) -> Result<Option<String>, NativeError> {
        let outcome = match (self.platform(), name) {
            (Platform::Postgres, Some(sequence)) => {
                self.query("SELECT CURRVAL($1)::text", &[QueryParam::from(sequence)])
                    .await?
            }
            (Platform::Postgres, None) => self.query("SELECT LASTVAL()::text", &[]).await?,
            (Platform::MySql, _) => self.query("SELECT LAST_INSERT_ID()", &[]).await?,
            (Platform::Sqlite, _) => self.query("SELECT last_insert_rowid()", &[]).await?,
        };

        let NativeOutcome::Rows { rows, .. } = outcome else {
            return Ok(None);
        };
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(scalar_string)
            .filter(|id| id != "0"))
    }

    async fn close(self) -> Result<(), NativeError> {
        match self {
            Self::MySql(conn) => conn.close().await,
            Self::Postgres(conn) => conn.close().await,
            Self::Sqlite(conn) => conn.close().await,
        }
        .map_err(query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dsn;
    use std::time::Duration;

    fn request(dsn: &str) -> ConnectRequest {
        ConnectRequest {
            dsn: Dsn::parse(dsn).unwrap(),
            username: None,
            password: None,
            options: BTreeMap::new(),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  select * from t"));
        assert!(returns_rows("(SELECT 1) UNION (SELECT 2)"));
        assert!(returns_rows("-- comment\nWITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("/* hint */ SHOW TABLES"));
        assert!(returns_rows("PRAGMA table_info('users')"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET returning_count = 1"));
        assert!(!returns_rows("CREATE TABLE t (id INTEGER)"));
        assert!(returns_rows("DELETE FROM t WHERE note = 'x' RETURNING id"));
    }

    #[test]
    fn test_returning_inside_literals_and_comments() {
        assert!(!returns_rows("INSERT INTO t (note) VALUES ('returning soon')"));
        assert!(!returns_rows("INSERT INTO t (note) VALUES ('it''s returning')"));
        assert!(!returns_rows(r"INSERT INTO t (note) VALUES ('it\'s returning')"));
        assert!(!returns_rows(r#"UPDATE t SET "returning" = 1"#));
        assert!(!returns_rows("UPDATE t SET `returning` = 1"));
        assert!(!returns_rows("DELETE FROM t -- returning id\nWHERE a = 1"));
        assert!(!returns_rows("DELETE FROM t /* returning id */ WHERE a = 1"));
        assert!(!returns_rows("'SELECT' nonsense"));
    }

    #[test]
    fn test_bare_words() {
        assert_eq!(
            bare_words("(/* x */ select a_b, 'c d' FROM \"e\" -- f\n)"),
            vec!["select", "a_b", "FROM"]
        );
        assert_eq!(leading_keyword("  -- note\n  insert INTO t"), "INSERT");
        assert_eq!(leading_keyword(""), "");
    }

    #[test]
    fn test_generated_id() {
        assert_eq!(generated_id("INSERT INTO t VALUES (1)", Some(5)), Some("5".into()));
        assert_eq!(generated_id("replace into t values (1)", Some(2)), Some("2".into()));
        assert_eq!(generated_id("UPDATE t SET a = 1", Some(5)), None);
        assert_eq!(generated_id("INSERT INTO t VALUES (1)", Some(0)), None);
        assert_eq!(generated_id("INSERT INTO t VALUES (1)", None), None);
    }

    #[test]
    fn test_sqlx_url_from_pdo_pairs() {
        let mut req = request("mysql:dbname=shop;host=db.local;port=3307;charset=utf8mb4");
        req.username = Some("app".into());
        req.password = Some("p@ss word".into());
        req.options.insert("ssl-mode".into(), "disabled".into());

        let (platform, url) = sqlx_url(&req).unwrap();
        assert_eq!(platform, Platform::MySql);
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "mysql");
        assert_eq!(parsed.host_str(), Some("db.local"));
        assert_eq!(parsed.port(), Some(3307));
        assert_eq!(parsed.path(), "/shop");
        assert_eq!(parsed.username(), "app");
        assert_eq!(parsed.password(), Some("p%40ss%20word"));
        let pairs: Vec<_> = parsed.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("charset".into(), "utf8mb4".into())));
        assert!(pairs.contains(&("ssl-mode".into(), "disabled".into())));
    }

    #[test]
    fn test_sqlx_url_pgsql_defaults_host() {
        let (platform, url) = sqlx_url(&request("pgsql:dbname=app")).unwrap();
        assert_eq!(platform, Platform::Postgres);
        assert_eq!(url, "postgres://localhost/app");
    }

    #[test]
    fn test_sqlx_url_url_form() {
        let mut req = request("mysql://root@db:3306/app");
        req.password = Some("secret".into());
        let (_, url) = sqlx_url(&req).unwrap();
        assert_eq!(url, "mysql://root:secret@db:3306/app");
    }

    #[test]
    fn test_sqlx_url_sqlite() {
        assert_eq!(sqlx_url(&request("sqlite::memory:")).unwrap().1, "sqlite::memory:");
        assert_eq!(
            sqlx_url(&request("sqlite:/tmp/app.db")).unwrap().1,
            "sqlite:/tmp/app.db?mode=rwc"
        );
        let mut req = request("sqlite:/tmp/app.db");
        req.options.insert("mode".into(), "ro".into());
        assert_eq!(sqlx_url(&req).unwrap().1, "sqlite:/tmp/app.db?mode=ro");
    }

    #[test]
    fn test_sqlx_url_unknown_driver() {
        let err = sqlx_url(&request("oci:dbname=x")).unwrap_err();
        assert_eq!(err.kind, crate::db::native::NativeErrorKind::Configuration);
    }
}
