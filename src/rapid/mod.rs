//! Rapid parallel minute-fetch pipeline.
//!
//! Minutes are fetched out of order for throughput, reassembled in strict
//! ascending order, and streamed to the consumer under flow control. The
//! number of live buffers always equals the configured parallelism: a slot
//! is reused only after the consumer has returned its buffer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::fetch::Line;
use crate::format::{Formatter, Schema};

mod manager;
mod progress;
mod slot;
mod worker;

pub use progress::spawn_progress_reporter;
pub use slot::Cursors;

/// Source of one minute of filtered data, consumed by the download workers.
#[async_trait]
pub trait FilterSource: Send + Sync + 'static {
    /// Fetches the ordered typed lines of one minute.
    async fn fetch_minute(&self, minute: i64) -> Result<Vec<Line>>;
}

/// Derives the inclusive minute-index range of a time range; `end` is
/// treated as exclusive at second granularity, so an `end` on an exact
/// minute boundary does not include that minute.
pub fn minute_range(start: DateTime<Utc>, end: DateTime<Utc>) -> (i64, i64) {
    (
        start.timestamp().div_euclid(60),
        (end.timestamp() - 1).div_euclid(60),
    )
}

/// Consumer-side handle over the parallel minute downloader.
///
/// Every buffer yielded by `next` must be handed back through
/// `return_buffer` before the slot that produced it can fetch another
/// minute; consumer slowness therefore translates directly into fewer
/// in-flight requests.
pub struct RapidDownload {
    out_rx: mpsc::Receiver<Vec<u8>>,
    ret_tx: mpsc::Sender<Vec<u8>>,
    err_rx: mpsc::Receiver<AppError>,
    cancel: CancellationToken,
    cursors: Arc<Cursors>,
    manager: Option<JoinHandle<()>>,
    last_error: Option<String>,
    closed: bool,
}

impl RapidDownload {
    /// Spawns the manager task and returns the consumer-side handle.
    ///
    /// `cancel` is the caller's token; the pipeline derives its own child
    /// from it, so cancelling either stops the run.
    pub fn start(
        source: Arc<dyn FilterSource>,
        schema: Schema,
        formatter: Arc<dyn Formatter>,
        parallel: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Self {
        let parallel = parallel.max(1);
        let (start_minute, end_minute) = minute_range(start, end);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (ret_tx, ret_rx) = mpsc::channel(parallel);
        let (err_tx, err_rx) = mpsc::channel(1);
        let cursors = Arc::new(Cursors::new());
        let cancel = cancel.child_token();
        let manager = manager::Manager::new(
            source,
            Arc::new(schema),
            formatter,
            parallel,
            start_minute,
            end_minute,
            Arc::clone(&cursors),
            cancel.clone(),
            out_tx,
            ret_rx,
            err_tx,
        );
        let handle = tokio::spawn(manager.run());
        Self {
            out_rx,
            ret_tx,
            err_rx,
            cancel,
            cursors,
            manager: Some(handle),
            last_error: None,
            closed: false,
        }
    }

    /// Cursor mirror for progress observers.
    pub fn cursors(&self) -> Arc<Cursors> {
        Arc::clone(&self.cursors)
    }

    /// Yields the next in-order buffer, `None` at end of stream, or the
    /// first error of the run. Idempotent once the stream has ended.
    pub async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.closed || self.last_error.is_some() {
            return match self.remembered() {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
        match self.out_rx.recv().await {
            Some(buf) => Ok(Some(buf)),
            None => match self.err_rx.recv().await {
                Some(err) => Err(self.remember(err)),
                None => Ok(None),
            },
        }
    }

    /// Hands a buffer back so its slot can fetch the next minute. A no-op
    /// once an error has been observed or the pipeline is closed.
    pub async fn return_buffer(&mut self, buf: Vec<u8>) -> Result<()> {
        if self.closed || self.last_error.is_some() {
            return Ok(());
        }
        if self.ret_tx.send(buf).await.is_err() {
            // The manager is gone; surface its verdict if it left one.
            if let Some(err) = self.err_rx.recv().await {
                return Err(self.remember(err));
            }
        }
        Ok(())
    }

    /// Cancels the pipeline, waits until the manager and every worker have
    /// stopped, and reports the first error of the run. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return match self.remembered() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        self.closed = true;
        self.cancel.cancel();
        if let Some(handle) = self.manager.take() {
            let _ = handle.await;
        }
        if self.last_error.is_none() {
            if let Some(err) = self.err_rx.recv().await {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
            return Ok(());
        }
        match self.remembered() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn remember(&mut self, err: AppError) -> AppError {
        self.last_error = Some(err.to_string());
        err
    }

    fn remembered(&self) -> Option<AppError> {
        self.last_error.as_ref().cloned().map(AppError::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::{json, Value};
    use tokio::time::{sleep, Duration};

    use crate::fetch::LineType;
    use crate::format::JsonFormatter;

    struct MinuteScript {
        delay: Duration,
        fail: bool,
        lines: Vec<Line>,
    }

    /// In-memory filter source with per-minute delays and injected faults.
    struct ScriptedSource {
        minutes: HashMap<i64, MinuteScript>,
        launched: Mutex<Vec<i64>>,
        active: Mutex<usize>,
        max_active: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                minutes: HashMap::new(),
                launched: Mutex::new(Vec::new()),
                active: Mutex::new(0),
                max_active: Mutex::new(0),
            }
        }

        fn minute(mut self, minute: i64, delay_ms: u64, lines: Vec<Line>) -> Self {
            self.minutes.insert(
                minute,
                MinuteScript {
                    delay: Duration::from_millis(delay_ms),
                    fail: false,
                    lines,
                },
            );
            self
        }

        fn failing_minute(mut self, minute: i64, delay_ms: u64) -> Self {
            self.minutes.insert(
                minute,
                MinuteScript {
                    delay: Duration::from_millis(delay_ms),
                    fail: true,
                    lines: Vec::new(),
                },
            );
            self
        }

        fn launched(&self) -> Vec<i64> {
            self.launched.lock().unwrap().clone()
        }

        fn max_active(&self) -> usize {
            *self.max_active.lock().unwrap()
        }
    }

    #[async_trait]
    impl FilterSource for ScriptedSource {
        async fn fetch_minute(&self, minute: i64) -> Result<Vec<Line>> {
            self.launched.lock().unwrap().push(minute);
            {
                let mut active = self.active.lock().unwrap();
                *active += 1;
                let mut max = self.max_active.lock().unwrap();
                *max = (*max).max(*active);
            }
            let outcome = match self.minutes.get(&minute) {
                Some(script) => {
                    if script.delay > Duration::ZERO {
                        sleep(script.delay).await;
                    }
                    if script.fail {
                        Err(AppError::message(format!(
                            "injected failure for minute {}",
                            minute
                        )))
                    } else {
                        Ok(script.lines.clone())
                    }
                }
                None => Ok(Vec::new()),
            };
            *self.active.lock().unwrap() -= 1;
            outcome
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn start_line(ts: i64) -> Line {
        Line {
            exchange: "bitmex".to_string(),
            line_type: LineType::Start,
            channel: None,
            timestamp: ts,
            payload: b"{\"price\":\"float\"}".to_vec(),
        }
    }

    fn message_line(ts: i64, payload: &str) -> Line {
        Line {
            exchange: "bitmex".to_string(),
            line_type: LineType::Message,
            channel: Some("trade".to_string()),
            timestamp: ts,
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn pipeline(
        source: ScriptedSource,
        parallel: usize,
        start_secs: i64,
        end_secs: i64,
    ) -> (Arc<ScriptedSource>, RapidDownload) {
        let source = Arc::new(source);
        let rapid = RapidDownload::start(
            Arc::clone(&source) as Arc<dyn FilterSource>,
            Schema::new(),
            Arc::new(JsonFormatter::new(None)),
            parallel,
            at(start_secs),
            at(end_secs),
            &CancellationToken::new(),
        );
        (source, rapid)
    }

    /// Drives the pipeline to end of stream, returning every emitted buffer.
    async fn collect(rapid: &mut RapidDownload) -> Result<Vec<Vec<u8>>> {
        let mut buffers = Vec::new();
        loop {
            match rapid.next().await? {
                Some(buf) => {
                    buffers.push(buf.clone());
                    rapid.return_buffer(buf).await?;
                }
                None => return Ok(buffers),
            }
        }
    }

    fn parse_rows(buffers: &[Vec<u8>]) -> Vec<Value> {
        let mut rows = Vec::new();
        for buf in buffers {
            for row in String::from_utf8(buf.clone()).unwrap().lines() {
                rows.push(serde_json::from_str(row).unwrap());
            }
        }
        rows
    }

    #[tokio::test]
    async fn formats_a_single_minute_with_one_message() {
        let source = ScriptedSource::new().minute(
            26824320,
            0,
            vec![
                start_line(1_609_459_200_000_000_000),
                message_line(1_609_459_200_000_000_000, r#"{"price":10.5}"#),
            ],
        );
        // 2021-01-01T00:00:00Z .. 2021-01-01T00:01:00Z
        let (_, mut rapid) = pipeline(source, 2, 1_609_459_200, 1_609_459_260);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        let rows = parse_rows(&buffers);
        assert_eq!(buffers.len(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0],
            json!({
                "line_exchange": "bitmex",
                "line_type": "message",
                "line_channel": "trade",
                "line_timestamp": 1_609_459_200_000_000_000_i64,
                "price": 10.5
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn emits_minutes_in_order_despite_out_of_order_completion() {
        let source = ScriptedSource::new()
            .minute(
                0,
                50,
                vec![start_line(0), message_line(0, r#"{"price":1.0}"#)],
            )
            .minute(
                1,
                1,
                vec![start_line(60), message_line(60, r#"{"price":2.0}"#)],
            );
        let (_, mut rapid) = pipeline(source, 2, 0, 120);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        let rows = parse_rows(&buffers);
        assert_eq!(buffers.len(), 2);
        assert_eq!(rows[0]["price"], json!(1.0));
        assert_eq!(rows[1]["price"], json!(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_are_nondecreasing_across_the_run() {
        let mut source = ScriptedSource::new();
        for minute in 0..8i64 {
            // Later minutes finish sooner.
            let delay = (8 - minute) as u64 * 3;
            source = source.minute(
                minute,
                delay,
                vec![
                    start_line(minute * 60),
                    message_line(minute * 60_000_000_000, r#"{"price":1.0}"#),
                    message_line(minute * 60_000_000_000 + 1, r#"{"price":2.0}"#),
                ],
            );
        }
        let (_, mut rapid) = pipeline(source, 3, 0, 8 * 60);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        let rows = parse_rows(&buffers);
        assert_eq!(buffers.len(), 8);
        assert_eq!(rows.len(), 16);
        let timestamps: Vec<i64> = rows
            .iter()
            .map(|row| row["line_timestamp"].as_i64().unwrap())
            .collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn launches_every_minute_exactly_once_and_bounds_concurrency() {
        let mut source = ScriptedSource::new();
        for minute in 0..6i64 {
            source = source.minute(minute, (minute as u64 % 3) * 2, vec![]);
        }
        let (source, mut rapid) = pipeline(source, 3, 0, 6 * 60);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        assert_eq!(buffers.len(), 6);
        let mut launched = source.launched();
        launched.sort_unstable();
        assert_eq!(launched, vec![0, 1, 2, 3, 4, 5]);
        assert!(source.max_active() <= 3);
    }

    #[tokio::test]
    async fn an_empty_minute_is_still_emitted_as_an_empty_buffer() {
        let source = ScriptedSource::new().minute(
            0,
            0,
            vec![
                message_line(1, r#"{"price":1.0}"#),
                message_line(2, r#"{"price":2.0}"#),
            ],
        );
        let (_, mut rapid) = pipeline(source, 1, 0, 60);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        // No start line in the response, so every message is suppressed.
        assert_eq!(buffers.len(), 1);
        assert!(buffers[0].is_empty());
    }

    #[tokio::test]
    async fn an_empty_range_terminates_immediately() {
        let (source, mut rapid) = pipeline(ScriptedSource::new(), 4, 300, 300);

        assert!(collect(&mut rapid).await.unwrap().is_empty());
        rapid.close().await.unwrap();
        assert!(source.launched().is_empty());
    }

    #[tokio::test]
    async fn an_exact_minute_boundary_end_is_exclusive() {
        let source = ScriptedSource::new().minute(0, 0, vec![]);
        let (source, mut rapid) = pipeline(source, 4, 0, 60);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        assert_eq!(buffers.len(), 1);
        assert_eq!(source.launched(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_run_with_parallel_one() {
        let mut source = ScriptedSource::new();
        for minute in 0..4i64 {
            source = source.minute(
                minute,
                (4 - minute) as u64,
                vec![
                    start_line(minute * 60),
                    message_line(minute, r#"{"price":1.0}"#),
                ],
            );
        }
        let (source, mut rapid) = pipeline(source, 1, 0, 4 * 60);

        let buffers = collect(&mut rapid).await.unwrap();
        rapid.close().await.unwrap();

        assert_eq!(buffers.len(), 4);
        assert_eq!(source.max_active(), 1);
        // With one slot the launch order is the emission order.
        assert_eq!(source.launched(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_worker_aborts_the_run_with_one_error() {
        let mut source = ScriptedSource::new();
        for minute in 0..20i64 {
            source = source.minute(minute, 2, vec![]);
        }
        let source = source.failing_minute(3, 1);
        let (_, mut rapid) = pipeline(source, 4, 0, 20 * 60);

        let mut emitted = 0usize;
        let err = loop {
            match rapid.next().await {
                Ok(Some(buf)) => {
                    emitted += 1;
                    rapid.return_buffer(buf).await.unwrap();
                }
                Ok(None) => panic!("expected an error before end of stream"),
                Err(err) => break err,
            }
        };

        assert!(err.to_string().contains("injected failure for minute 3"));
        assert!(emitted <= 3);

        // The error is remembered and replayed.
        let close_err = rapid.close().await.unwrap_err();
        assert_eq!(close_err.to_string(), err.to_string());
        let next_err = rapid.next().await.unwrap_err();
        assert_eq!(next_err.to_string(), err.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_an_active_run() {
        let mut source = ScriptedSource::new();
        for minute in 0..10i64 {
            source = source.minute(minute, 60_000, vec![]);
        }
        let (_, mut rapid) = pipeline(source, 2, 0, 10 * 60);

        let err = rapid.close().await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));

        let second = rapid.close().await.unwrap_err();
        assert_eq!(second.to_string(), err.to_string());
    }

    #[tokio::test]
    async fn next_keeps_returning_end_of_stream() {
        let (_, mut rapid) = pipeline(ScriptedSource::new(), 2, 0, 0);

        assert!(rapid.next().await.unwrap().is_none());
        assert!(rapid.next().await.unwrap().is_none());
        rapid.close().await.unwrap();
        assert!(rapid.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn external_cancellation_stops_the_run() {
        let mut scripted = ScriptedSource::new();
        for minute in 0..5i64 {
            scripted = scripted.minute(minute, 60_000, vec![]);
        }
        let token = CancellationToken::new();
        let mut rapid = RapidDownload::start(
            Arc::new(scripted) as Arc<dyn FilterSource>,
            Schema::new(),
            Arc::new(JsonFormatter::new(None)),
            2,
            at(0),
            at(5 * 60),
            &token,
        );

        token.cancel();
        let err = loop {
            match rapid.next().await {
                Ok(Some(buf)) => rapid.return_buffer(buf).await.unwrap(),
                Ok(None) => panic!("expected a cancellation error"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, AppError::Cancelled));
    }

    #[test]
    fn minute_range_floors_start_and_excludes_end_boundary() {
        assert_eq!(minute_range(at(0), at(60)), (0, 0));
        assert_eq!(minute_range(at(0), at(61)), (0, 1));
        assert_eq!(minute_range(at(59), at(60)), (0, 0));
        assert_eq!(minute_range(at(120), at(120)), (2, 1));
        assert_eq!(minute_range(at(1_609_459_200), at(1_609_459_260)), (26_824_320, 26_824_320));
    }
}
