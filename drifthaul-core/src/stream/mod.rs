//! Streaming JSON output of cursor rows.

pub mod array;
pub mod ndjson;
pub mod row;

pub use self::array::{BatchArrayStreamer, JsonArrayWriter, StartPosition};
pub use self::ndjson::NdjsonArrayReader;
pub use self::row::{RowStream, RowStreamer};
