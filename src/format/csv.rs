use std::io::Write;

use serde_json::{Map, Value};

use crate::error::{AppError, Result};

use super::Formatter;

/// CSV formatter with a fixed, ordered field list.
///
/// Fields are written verbatim without quoting; a record whose value cannot
/// be rendered as a string or number fails the whole run.
pub struct CsvFormatter {
    fields: Vec<String>,
}

impl CsvFormatter {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    fn write_value(buf: &mut Vec<u8>, field: &str, value: &Value) -> Result<()> {
        match value {
            Value::String(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    write!(buf, "{}", i)?;
                } else if let Some(u) = n.as_u64() {
                    write!(buf, "{}", u)?;
                } else if let Some(f) = n.as_f64() {
                    write!(buf, "{:.10}", f)?;
                }
            }
            other => {
                return Err(AppError::Format(format!(
                    "unsupported value for field '{}': {}",
                    field, other
                )))
            }
        }
        Ok(())
    }
}

impl Formatter for CsvFormatter {
    fn write_header(&self, buf: &mut Vec<u8>) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            buf.extend_from_slice(field.as_bytes());
            buf.push(if i == self.fields.len() - 1 { b'\n' } else { b',' });
        }
        Ok(())
    }

    fn write_row(&self, buf: &mut Vec<u8>, values: &Map<String, Value>) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            match values.get(field) {
                None | Some(Value::Null) => {}
                Some(value) => Self::write_value(buf, field, value)?,
            }
            buf.push(if i == self.fields.len() - 1 { b'\n' } else { b',' });
        }
        Ok(())
    }
}
