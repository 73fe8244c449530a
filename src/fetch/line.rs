use crate::error::{AppError, Result};

/// Type tag of one record returned by the filter endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Start,
    End,
    Message,
    Send,
    Error,
}

impl LineType {
    pub fn as_str(self) -> &'static str {
        match self {
            LineType::Start => "start",
            LineType::End => "end",
            LineType::Message => "message",
            LineType::Send => "send",
            LineType::Error => "error",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "start" => Some(LineType::Start),
            "end" => Some(LineType::End),
            "message" => Some(LineType::Message),
            "send" => Some(LineType::Send),
            "error" => Some(LineType::Error),
            _ => None,
        }
    }
}

/// One typed record of a filter response.
#[derive(Debug, Clone)]
pub struct Line {
    pub exchange: String,
    pub line_type: LineType,
    pub channel: Option<String>,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// Parses a filter response body.
///
/// Each non-empty line carries four tab-separated fields: type tag, channel
/// (empty when the line has none), timestamp in Unix nanoseconds, payload.
pub fn parse_filter_body(exchange: &str, body: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    for raw in body.lines() {
        if raw.is_empty() {
            continue;
        }
        let mut parts = raw.splitn(4, '\t');
        let (Some(tag), Some(channel), Some(timestamp), payload) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::decode(format!("malformed filter line: {:?}", raw)));
        };
        let line_type = LineType::from_tag(tag)
            .ok_or_else(|| AppError::decode(format!("unknown line type '{}'", tag)))?;
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| AppError::decode(format!("bad line timestamp '{}'", timestamp)))?;
        lines.push(Line {
            exchange: exchange.to_string(),
            line_type,
            channel: (!channel.is_empty()).then(|| channel.to_string()),
            timestamp,
            payload: payload.unwrap_or_default().as_bytes().to_vec(),
        });
    }
    Ok(lines)
}
