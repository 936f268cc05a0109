//! Database platform identification.
//!
//! A `Platform` names the SQL dialect a connection speaks. It is resolved from
//! driver names (`pdo_mysql`, `pgsql`, ...), DSN prefixes and URL schemes, and
//! carries the small amount of dialect-specific SQL the adapter needs.

use serde::{Deserialize, Serialize};

/// Supported database platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Includes MariaDB
    MySql,
    Postgres,
    Sqlite,
}

/// Spelling used by [`Platform::display_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameFormat {
    /// `Mysql`, `Postgresql`, `Sqlite`
    #[default]
    CamelCase,
    /// `MySQL`, `PostgreSQL`, `SQLite`
    Natural,
}

impl Platform {
    /// Resolve a platform from a driver name.
    ///
    /// Matching is case-insensitive and ignores `-`, `_` and spaces. A leading
    /// `pdo` is stripped, so `pdo_mysql`, `PDO-MySQL`, `pdo mysql` and `pdomysql`
    /// all resolve to MySQL. Bare names are accepted as well:
    ///
    /// - MySQL: `mysql`, `mysqli`, `mariadb`
    /// - PostgreSQL: `pgsql`, `postgres`, `postgresql`
    /// - SQLite: `sqlite`, `sqlite3`
    pub fn from_driver_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        let bare = normalized.strip_prefix("pdo").unwrap_or(&normalized);

        match bare {
            "mysql" | "mysqli" | "mariadb" => Some(Self::MySql),
            "pgsql" | "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Prefix used in PDO-style DSNs (`mysql:host=...`).
    pub fn dsn_prefix(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "pgsql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Scheme used in sqlx connection URLs.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Get the display name for this platform.
    pub fn display_name(&self, format: NameFormat) -> &'static str {
        match (self, format) {
            (Self::MySql, NameFormat::CamelCase) => "Mysql",
            (Self::MySql, NameFormat::Natural) => "MySQL",
            (Self::Postgres, NameFormat::CamelCase) => "Postgresql",
            (Self::Postgres, NameFormat::Natural) => "PostgreSQL",
            (Self::Sqlite, NameFormat::CamelCase) => "Sqlite",
            (Self::Sqlite, NameFormat::Natural) => "SQLite",
        }
    }

    /// Get the default port for this platform.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }

    /// Query that reports the active schema, or `None` when the schema is fixed.
    pub fn current_schema_sql(&self) -> Option<&'static str> {
        match self {
            Self::MySql => Some("SELECT DATABASE()"),
            Self::Postgres => Some("SELECT CURRENT_SCHEMA"),
            Self::Sqlite => None,
        }
    }

    /// Schema name for platforms that do not need a query to find it.
    pub fn fixed_schema(&self) -> Option<&'static str> {
        match self {
            Self::Sqlite => Some("main"),
            _ => None,
        }
    }

    /// Statement that opens a transaction.
    pub fn begin_sql(&self) -> &'static str {
        match self {
            Self::MySql => "START TRANSACTION",
            Self::Postgres | Self::Sqlite => "BEGIN",
        }
    }

    /// Lightweight liveness query.
    pub fn ping_sql(&self) -> &'static str {
        "SELECT 1"
    }

    /// Whether a generated id needs an explicit sequence name.
    pub fn requires_sequence_name(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Positional placeholder for the parameter at `position` (1-based).
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${}", position),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name(NameFormat::Natural))
    }
}
