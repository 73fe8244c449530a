use crate::error::{AppError, Result};

/// One record of a snapshot response.
///
/// The first record of a response carries the channel schema as its payload;
/// the rest are the initial state of the channel at the requested time.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub channel: String,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// Parses a snapshot response body: `channel`, timestamp, payload,
/// tab-separated, one record per line.
pub fn parse_snapshot_body(body: &str) -> Result<Vec<SnapshotRecord>> {
    let mut records = Vec::new();
    for raw in body.lines() {
        if raw.is_empty() {
            continue;
        }
        let mut parts = raw.splitn(3, '\t');
        let (Some(channel), Some(timestamp), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::decode(format!(
                "malformed snapshot line: {:?}",
                raw
            )));
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| AppError::decode(format!("bad snapshot timestamp '{}'", timestamp)))?;
        records.push(SnapshotRecord {
            channel: channel.to_string(),
            timestamp,
            payload: payload.as_bytes().to_vec(),
        });
    }
    Ok(records)
}
