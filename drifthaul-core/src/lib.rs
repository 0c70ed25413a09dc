pub mod bulk;
pub mod cache;
pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod procedure;
pub mod redact;
pub mod script;
pub mod sql_parser;
pub mod stage;
pub mod statement;
pub mod stream;
pub mod supplier;
pub mod types;
pub mod wrapper;

pub use crate::config::ConnectorConfig;
pub use crate::dialect::Dialect;
pub use crate::error::{CoreError, ErrorKind, Result};
pub use crate::supplier::{ConnectionScope, ConnectionSupplier, DynamicOverrides};
pub use crate::wrapper::{LoadDocument, QueryBatches, WarehouseWrapper, WriteOperation, WriteResult};
