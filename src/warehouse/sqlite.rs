use anyhow::{Context, Result, anyhow};
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::{Connection, params_from_iter};
use std::path::PathBuf;
use tracing::debug;

use super::{ConnectParams, Connector, SqlValue, WarehouseConnection};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            SqlValue::Null => Value::Null,
            SqlValue::Text(s) => Value::Text(s.clone()),
            SqlValue::Integer(i) => Value::Integer(*i),
            SqlValue::Real(f) => Value::Real(*f),
            SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
        }))
    }
}

/// Opens SQLite databases; one file stands in for one warehouse database.
///
/// The file is taken from the profile's `extra.path`, falling back to the
/// connector's default.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    default_path: PathBuf,
}

impl SqliteConnector {
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: default_path.into(),
        }
    }

    pub fn database_path(&self, params: &ConnectParams) -> PathBuf {
        params
            .extra
            .get("path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_path.clone())
    }
}

impl Connector for SqliteConnector {
    type Conn = SqliteConnection;

    fn connect(&self, params: &ConnectParams) -> Result<SqliteConnection> {
        let path = self.database_path(params);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        debug!(
            path = %path.display(),
            account = %params.account,
            warehouse = %params.warehouse,
            database = %params.database,
            schema = %params.schema,
            "Opening SQLite warehouse"
        );
        let conn = Connection::open(&path)
            .with_context(|| format!("opening warehouse {}", path.display()))?;
        Ok(SqliteConnection(conn))
    }
}

pub struct SqliteConnection(Connection);

impl WarehouseConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        Ok(self.0.execute(sql, params_from_iter(params.iter()))?)
    }

    fn close(self) -> Result<()> {
        self.0
            .close()
            .map_err(|(_, e)| anyhow!("closing warehouse connection: {}", e))
    }
}
