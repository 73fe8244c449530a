use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{AppError, Result};

pub mod coerce;
mod csv;
mod json;

pub use coerce::{coerce_ints, Schema};
pub use csv::CsvFormatter;
pub use json::JsonFormatter;

/// Injected on every record: the exchange the line came from.
pub const FIELD_EXCHANGE: &str = "line_exchange";
/// Injected on every record: the line type tag.
pub const FIELD_TYPE: &str = "line_type";
/// Injected on every record: the line timestamp in Unix nanoseconds.
pub const FIELD_TIMESTAMP: &str = "line_timestamp";
/// Injected when present: the channel the line belongs to.
pub const FIELD_CHANNEL: &str = "line_channel";

/// Renders values records into an output byte buffer.
pub trait Formatter: Send + Sync {
    /// Writes a single header record. Formats without a header write nothing.
    fn write_header(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Writes one record terminated by a newline.
    fn write_row(&self, buf: &mut Vec<u8>, values: &Map<String, Value>) -> Result<()>;
}

/// Creates the formatter for an output format name ('json' or 'csv').
pub fn make_formatter(format: &str, fields: Option<Vec<String>>) -> Result<Arc<dyn Formatter>> {
    match format {
        "" | "json" => Ok(Arc::new(JsonFormatter::new(fields))),
        "csv" => Ok(Arc::new(CsvFormatter::new(fields.unwrap_or_default()))),
        other => Err(AppError::message(format!(
            "unsupported output format '{}'",
            other
        ))),
    }
}
