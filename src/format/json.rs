use serde_json::{Map, Value};

use crate::error::Result;

use super::Formatter;

/// JSON Lines formatter, one object per record.
///
/// With a field filter the record is projected onto exactly those fields,
/// missing keys becoming null; without one all present fields are written.
pub struct JsonFormatter {
    filter: Option<Vec<String>>,
}

impl JsonFormatter {
    pub fn new(filter: Option<Vec<String>>) -> Self {
        Self { filter }
    }
}

impl Formatter for JsonFormatter {
    fn write_header(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn write_row(&self, buf: &mut Vec<u8>, values: &Map<String, Value>) -> Result<()> {
        match &self.filter {
            Some(fields) => {
                let mut projected = Map::new();
                for field in fields {
                    projected.insert(
                        field.clone(),
                        values.get(field).cloned().unwrap_or(Value::Null),
                    );
                }
                serde_json::to_writer(&mut *buf, &projected)?;
            }
            None => serde_json::to_writer(&mut *buf, values)?,
        }
        buf.push(b'\n');
        Ok(())
    }
}
