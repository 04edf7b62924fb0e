//! Warehouse access for the load stage.
//!
//! [`ConnectionStore`] resolves named connection profiles.
//! [`Connector`] opens a [`WarehouseConnection`] from resolved parameters.
//! [`SqliteConnector`] implements both on top of a local SQLite file.

mod profile;
mod sqlite;

pub use profile::{ConnectionProfile, ConnectionStore, normalize_account};
pub use sqlite::{SqliteConnection, SqliteConnector};

use anyhow::Result;
use serde_json::{Map, Value};

/// Everything needed to open a session against the destination.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub account: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    /// Backend-specific settings carried over from the profile.
    pub extra: Map<String, Value>,
}

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl From<Option<f64>> for SqlValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(SqlValue::Null, SqlValue::Real)
    }
}

pub trait WarehouseConnection {
    /// Runs one statement with positional `?` parameters, returning affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Releases the session.
    fn close(self) -> Result<()>;
}

pub trait Connector {
    type Conn: WarehouseConnection;

    fn connect(&self, params: &ConnectParams) -> Result<Self::Conn>;
}
