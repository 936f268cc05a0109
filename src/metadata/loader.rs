//! Catalog queries that describe a table's columns.
//!
//! Each platform has its own loader. All of them return descriptors in
//! ordinal order and go through the driver's statement factory, so they work
//! with any [`Connector`].

use crate::config::DEFAULT_SCHEMA;
use crate::db::{Connector, Driver, Platform};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, QueryParam, Row, TableColumns};
use serde_json::Value as JsonValue;
use tracing::debug;

mod queries {
    pub mod mysql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS column_name,
            ORDINAL_POSITION AS ordinal_position,
            CONVERT(COLUMN_TYPE USING utf8) AS column_type,
            CONVERT(IS_NULLABLE USING utf8) AS is_nullable,
            CONVERT(COLUMN_DEFAULT USING utf8) AS column_default,
            CONVERT(COLUMN_KEY USING utf8) AS column_key,
            CONVERT(EXTRA USING utf8) AS extra,
            CONVERT(COLUMN_COMMENT USING utf8) AS column_comment
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;
    }

    pub mod postgres {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            c.ordinal_position::int AS ordinal_position,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            (pk.column_name IS NOT NULL) AS is_primary_key,
            col_description(t.oid, a.attnum) AS column_comment
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name::text = $1::text
            AND tc.table_schema::text = COALESCE($2::text, CURRENT_SCHEMA()::text)
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name::text = pk.column_name
        WHERE c.table_name::text = $1::text
        AND c.table_schema::text = COALESCE($2::text, CURRENT_SCHEMA()::text)
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod sqlite {
        /// PRAGMA arguments cannot be bound; identifiers are quoted instead.
        pub fn describe_columns(table: &str, schema: &str) -> String {
            format!(
                "PRAGMA {}.table_info({})",
                quote_identifier(schema),
                quote_identifier(table)
            )
        }

        fn quote_identifier(name: &str) -> String {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Load the columns of `schema.table`.
///
/// `schema` may be [`DEFAULT_SCHEMA`], in which case the connection's active
/// schema is used. A table without columns is reported as a query error.
pub async fn load_columns<C: Connector>(
    driver: &mut Driver<C>,
    table: &str,
    schema: &str,
) -> DbResult<TableColumns> {
    driver.connection_mut().connect().await?;
    let platform = driver
        .connection()
        .platform()
        .ok_or_else(|| DbError::internal("Platform unknown after connect"))?;

    let schema_param = if schema == DEFAULT_SCHEMA {
        QueryParam::Null
    } else {
        QueryParam::from(schema)
    };

    let (sql, params) = match platform {
        Platform::MySql => (
            queries::mysql::DESCRIBE_COLUMNS.to_string(),
            vec![QueryParam::from(table), schema_param],
        ),
        Platform::Postgres => (
            queries::postgres::DESCRIBE_COLUMNS.to_string(),
            vec![QueryParam::from(table), schema_param],
        ),
        Platform::Sqlite => {
            let schema = if schema == DEFAULT_SCHEMA { "main" } else { schema };
            (queries::sqlite::describe_columns(table, schema), Vec::new())
        }
    };

    let mut statement = driver.create_statement(sql).await?;
    statement.set_buffer_results(true);
    let rows = statement.execute_with(params).await?.fetch_all();

    let columns: TableColumns = match platform {
        Platform::MySql => rows.iter().map(mysql_column).collect(),
        Platform::Postgres => rows.iter().map(postgres_column).collect(),
        Platform::Sqlite => rows.iter().map(sqlite_column).collect(),
    };

    if columns.is_empty() {
        return Err(DbError::query(
            format!("Table '{}.{}' does not exist or has no columns", schema, table),
            None,
            "Check the table and schema names",
        ));
    }

    debug!(table = %table, schema = %schema, columns = columns.len(), "Loaded table metadata");
    Ok(columns)
}

fn mysql_column(row: &Row) -> ColumnDescriptor {
    let data_type = get_string(row, "column_type");
    let mut column = ColumnDescriptor::new(
        get_string(row, "column_name"),
        get_u32(row, "ordinal_position"),
        data_type,
        get_string(row, "is_nullable").eq_ignore_ascii_case("YES"),
    )
    .with_primary(get_string(row, "column_key") == "PRI");

    if let Some(default) = get_optional_string(row, "column_default") {
        column = column.with_default_str(&default);
    }
    if let Some(extra) = get_optional_string(row, "extra").filter(|s| !s.is_empty()) {
        column = column.with_extra(extra);
    }
    if let Some(comment) = get_optional_string(row, "column_comment").filter(|s| !s.is_empty()) {
        column = column.with_comment(comment);
    }
    column
}

fn postgres_column(row: &Row) -> ColumnDescriptor {
    let mut column = ColumnDescriptor::new(
        get_string(row, "column_name"),
        get_u32(row, "ordinal_position"),
        get_string(row, "column_type"),
        get_string(row, "is_nullable") == "YES",
    )
    .with_primary(get_bool(row, "is_primary_key"));

    if let Some(default) = get_optional_string(row, "column_default") {
        column = column.with_default_str(&default);
    }
    if let Some(comment) = get_optional_string(row, "column_comment").filter(|s| !s.is_empty()) {
        column = column.with_comment(comment);
    }
    column
}

fn sqlite_column(row: &Row) -> ColumnDescriptor {
    let mut column = ColumnDescriptor::new(
        get_string(row, "name"),
        get_u32(row, "cid") + 1,
        get_string(row, "type"),
        !get_bool(row, "notnull"),
    )
    .with_primary(get_bool(row, "pk"));

    if let Some(default) = get_optional_string(row, "dflt_value") {
        column = column.with_default_str(&default);
    }
    column
}

/// Case-insensitive column lookup.
fn get<'a>(row: &'a Row, column: &str) -> Option<&'a JsonValue> {
    row.get(column).or_else(|| {
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

fn get_optional_string(row: &Row, column: &str) -> Option<String> {
    match get(row, column)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn get_string(row: &Row, column: &str) -> String {
    get_optional_string(row, column).unwrap_or_default()
}

fn get_u32(row: &Row, column: &str) -> u32 {
    match get(row, column) {
        Some(JsonValue::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
        Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn get_bool(row: &Row, column: &str) -> bool {
    match get(row, column) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(JsonValue::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "1" | "t" | "true" | "yes"),
        _ => false,
    }
}
