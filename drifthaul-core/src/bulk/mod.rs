//! Bulk transfer through a stage: upload + COPY into a table, or COPY into the
//! stage + download for unload.

pub mod load;
pub mod unload;

use std::collections::HashSet;

pub use self::load::{BulkLoader, LoadSummary, LoadTarget};
pub use self::unload::{BulkUnloader, UnloadRequest, UnloadedFile};

/// (database, schema) pairs already truncated by this wrapper instance.
#[derive(Debug, Default)]
pub struct TruncationLedger {
    truncated: HashSet<(Option<String>, Option<String>)>,
}

impl TruncationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, database: Option<&str>, schema: Option<&str>) -> bool {
        self.truncated
            .contains(&(database.map(str::to_owned), schema.map(str::to_owned)))
    }

    /// Returns `false` if the pair was already recorded.
    pub fn record(&mut self, database: Option<&str>, schema: Option<&str>) -> bool {
        self.truncated
            .insert((database.map(str::to_owned), schema.map(str::to_owned)))
    }

    pub fn len(&self) -> usize {
        self.truncated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.truncated.is_empty()
    }
}
