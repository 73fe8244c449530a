use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::fetch::{Line, LineType};
use crate::format::{
    coerce_ints, Formatter, Schema, FIELD_CHANNEL, FIELD_EXCHANGE, FIELD_TIMESTAMP, FIELD_TYPE,
};

use super::slot::{Stage, StageCell};
use super::FilterSource;

/// Completion message a worker sends exactly once.
pub(crate) struct WorkerDone {
    pub pos: usize,
    /// The slot's buffer filled with this minute's formatted records, or
    /// the error that aborted the minute.
    pub result: Result<Vec<u8>>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    source: Arc<dyn FilterSource>,
    minute: i64,
    schema: Arc<Schema>,
    formatter: Arc<dyn Formatter>,
    stage: StageCell,
    buf: Vec<u8>,
    pos: usize,
    cancel: CancellationToken,
    done: mpsc::Sender<WorkerDone>,
) {
    let result = fetch_minute(
        source.as_ref(),
        minute,
        &schema,
        formatter.as_ref(),
        &stage,
        buf,
        &cancel,
    )
    .await;
    // The manager keeps receiving until every launched worker has reported.
    let _ = done.send(WorkerDone { pos, result }).await;
}

async fn fetch_minute(
    source: &dyn FilterSource,
    minute: i64,
    schema: &Schema,
    formatter: &dyn Formatter,
    stage: &StageCell,
    mut buf: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    stage.set(Stage::Downloading);
    let lines = tokio::select! {
        fetched = source.fetch_minute(minute) => fetched?,
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
    };
    stage.set(Stage::Processing);
    format_lines(&lines, schema, formatter, &mut buf)?;
    stage.set(Stage::Done);
    Ok(buf)
}

/// Formats one minute's lines into `buf`.
///
/// `message` lines preceding the first `start` line repeat the channel
/// schema and are skipped; `start` lines themselves are not emitted. Every
/// emitted record carries the injected `line_*` fields.
pub(crate) fn format_lines(
    lines: &[Line],
    schema: &Schema,
    formatter: &dyn Formatter,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let mut values: Map<String, Value> = Map::new();
    let mut past_start = false;
    for line in lines {
        match line.line_type {
            LineType::Message => {
                if !past_start {
                    continue;
                }
                values = serde_json::from_slice(&line.payload)?;
                coerce_ints(&mut values, schema);
            }
            LineType::Start => {
                past_start = true;
                continue;
            }
            _ => {}
        }
        values.insert(
            FIELD_EXCHANGE.to_string(),
            Value::from(line.exchange.clone()),
        );
        values.insert(FIELD_TYPE.to_string(), Value::from(line.line_type.as_str()));
        if let Some(channel) = &line.channel {
            values.insert(FIELD_CHANNEL.to_string(), Value::from(channel.clone()));
        }
        values.insert(FIELD_TIMESTAMP.to_string(), Value::from(line.timestamp));
        formatter.write_row(buf, &values)?;
        values.clear();
    }
    Ok(())
}
