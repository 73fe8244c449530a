use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::cli::RapidArgs;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::{ApiClient, HttpFilterSource, SnapshotParam, SnapshotRecord};
use crate::format::{
    coerce_ints, make_formatter, Formatter, Schema, FIELD_CHANNEL, FIELD_EXCHANGE,
    FIELD_TIMESTAMP, FIELD_TYPE,
};
use crate::rapid::{minute_range, spawn_progress_reporter, RapidDownload};
use crate::utils::time::{format_rfc3339, parse_datetime_param};

/// Working buffer size for the header and the snapshot rows.
const PRELUDE_BUFFER_CAPACITY: usize = 100_000;

pub async fn run(args: &RapidArgs) -> Result<()> {
    let start = parse_datetime_param(&args.start)
        .map_err(|err| AppError::message(format!("--start: {}", err)))?;
    let end = parse_datetime_param(&args.end)
        .map_err(|err| AppError::message(format!("--end: {}", err)))?;
    if !matches!(args.format.as_str(), "json" | "csv") {
        return Err(AppError::message(format!(
            "--format: '{}' not supported",
            args.format
        )));
    }
    let explicit_fields = args.fields.as_ref().map(|list| {
        list.split(',')
            .map(|field| field.to_string())
            .collect::<Vec<_>>()
    });

    let config = Config::load()?;
    let client = ApiClient::new(&config.apikey)?;

    // Download the initial state; its first record carries the channel schema.
    let records = client
        .snapshot(&SnapshotParam {
            exchange: args.exchange.clone(),
            channels: vec![args.channel.clone()],
            at: start,
            format: "json".to_string(),
        })
        .await?;
    let Some((first, rest)) = records.split_first() else {
        return Err(AppError::ChannelUnavailable {
            channel: args.channel.clone(),
            at: format_rfc3339(start),
        });
    };
    let schema: Schema = serde_json::from_slice(&first.payload)
        .map_err(|err| AppError::decode(format!("channel schema: {}", err)))?;

    let fields = explicit_fields.unwrap_or_else(|| default_fields(&schema));
    let formatter = make_formatter(&args.format, Some(fields))?;

    let mut stdout = tokio::io::stdout();
    write_prelude(&mut stdout, formatter.as_ref(), &schema, rest, &args.exchange).await?;

    // Fetch and output the minute stream in parallel.
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());
    let source = Arc::new(HttpFilterSource::new(
        client,
        args.exchange.clone(),
        vec![args.channel.clone()],
    ));
    let mut rapid = RapidDownload::start(
        source,
        schema,
        formatter,
        args.parallel,
        start,
        end,
        &cancel,
    );

    let (start_minute, end_minute) = minute_range(start, end);
    let total_minutes = (end_minute - start_minute + 1).max(0) as u64;
    let progress_stop = CancellationToken::new();
    let progress =
        spawn_progress_reporter(rapid.cursors(), total_minutes, progress_stop.clone());

    let streamed = stream_output(&mut rapid, &mut stdout).await;
    progress_stop.cancel();
    let _ = progress.await;
    let closed = rapid.close().await;
    stdout.flush().await?;

    match (streamed, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(err), Ok(())) => Err(err),
        (Ok(()), Err(err)) => Err(err),
        (Err(err), Err(close_err)) => {
            if close_err.to_string() != err.to_string() {
                log::warn!("error while closing the pipeline: {}", close_err);
            }
            Err(err)
        }
    }
}

async fn stream_output(rapid: &mut RapidDownload, stdout: &mut tokio::io::Stdout) -> Result<()> {
    loop {
        match rapid.next().await? {
            Some(buf) => {
                stdout.write_all(&buf).await?;
                rapid.return_buffer(buf).await?;
            }
            None => return Ok(()),
        }
    }
}

async fn write_prelude(
    stdout: &mut tokio::io::Stdout,
    formatter: &dyn Formatter,
    schema: &Schema,
    records: &[SnapshotRecord],
    exchange: &str,
) -> Result<()> {
    let mut buf = Vec::with_capacity(PRELUDE_BUFFER_CAPACITY);
    formatter.write_header(&mut buf)?;
    stdout.write_all(&buf).await?;
    for record in records {
        buf.clear();
        format_snapshot_row(formatter, schema, record, exchange, &mut buf)?;
        stdout.write_all(&buf).await?;
    }
    Ok(())
}

/// Formats one snapshot record the way workers format message lines.
fn format_snapshot_row(
    formatter: &dyn Formatter,
    schema: &Schema,
    record: &SnapshotRecord,
    exchange: &str,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let mut values: Map<String, Value> = serde_json::from_slice(&record.payload)
        .map_err(|err| AppError::decode(format!("snapshot payload: {}", err)))?;
    coerce_ints(&mut values, schema);
    values.insert(FIELD_TYPE.to_string(), Value::from("message"));
    values.insert(FIELD_EXCHANGE.to_string(), Value::from(exchange));
    values.insert(FIELD_CHANNEL.to_string(), Value::from(record.channel.clone()));
    values.insert(FIELD_TIMESTAMP.to_string(), Value::from(record.timestamp));
    formatter.write_row(buf, &values)
}

/// Reserved fields first, then the schema's keys in ascending order.
fn default_fields(schema: &Schema) -> Vec<String> {
    let mut fields = vec![
        FIELD_EXCHANGE.to_string(),
        FIELD_TYPE.to_string(),
        FIELD_TIMESTAMP.to_string(),
        FIELD_CHANNEL.to_string(),
    ];
    let mut keys: Vec<String> = schema.keys().cloned().collect();
    keys.sort_unstable();
    fields.extend(keys);
    fields
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}
