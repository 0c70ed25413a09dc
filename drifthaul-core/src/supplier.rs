//! Connection supply and scoped ownership.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::driver::WarehouseConnection;
use crate::error::{CoreError, Result};

/// Document field naming a database override.
pub const DATABASE_OVERRIDE_FIELD: &str = "_database";
/// Document field naming a schema override.
pub const SCHEMA_OVERRIDE_FIELD: &str = "_schema";

/// Per-document target overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicOverrides {
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl DynamicOverrides {
    pub fn new(database: Option<String>, schema: Option<String>) -> Self {
        Self { database, schema }
    }

    /// Overrides set here win over `fallback`.
    pub fn or(&self, fallback: &DynamicOverrides) -> DynamicOverrides {
        DynamicOverrides {
            database: self.database.clone().or_else(|| fallback.database.clone()),
            schema: self.schema.clone().or_else(|| fallback.schema.clone()),
        }
    }

    /// Remove the override fields from a document and return them.
    pub fn take_from(document: &mut Map<String, JsonValue>) -> DynamicOverrides {
        let mut take = |field: &str| match document.remove(field) {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        };
        DynamicOverrides {
            database: take(DATABASE_OVERRIDE_FIELD),
            schema: take(SCHEMA_OVERRIDE_FIELD),
        }
    }
}

/// Host-side provider of live connections.
pub trait ConnectionSupplier: Send {
    /// Open a new connection. Called at most once per [`ConnectionScope`].
    fn connect(&mut self) -> Result<Box<dyn WarehouseConnection>>;

    /// Overrides applied to every document of this supplier.
    fn overrides(&self) -> &DynamicOverrides;
}

/// Owns at most one connection for one unit of work.
///
/// The connection is created on first use and closed when the scope is
/// released or dropped.
pub struct ConnectionScope {
    supplier: Box<dyn ConnectionSupplier>,
    conn: Option<Box<dyn WarehouseConnection>>,
}

impl ConnectionScope {
    pub fn new(supplier: Box<dyn ConnectionSupplier>) -> Self {
        Self {
            supplier,
            conn: None,
        }
    }

    /// The scope's connection, opened on first call.
    pub fn get(&mut self) -> Result<&mut dyn WarehouseConnection> {
        if self.conn.is_none() {
            let conn = self.supplier.connect()?;
            debug!(url = conn.url(), dialect = conn.dialect().name(), "opened connection");
            self.conn = Some(conn);
        }
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(CoreError::Resource("connection unavailable".to_string())),
        }
    }

    /// The connection if one is open, without opening one.
    pub fn current(&mut self) -> Option<&mut dyn WarehouseConnection> {
        match self.conn.as_deref_mut() {
            Some(conn) => Some(conn),
            None => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn overrides(&self) -> &DynamicOverrides {
        self.supplier.overrides()
    }

    /// Close and forget the connection.
    pub fn release(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn
                .close()
                .map_err(|err| CoreError::Resource(format!("failed to close connection: {err}"))),
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "connection close on scope exit failed");
        }
    }
}
