use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::format::{Formatter, Schema};

use super::slot::{Cursors, Slot, Stage};
use super::worker::{self, WorkerDone};
use super::FilterSource;

/// Initial capacity of each slot buffer; a busy minute's formatted payload
/// reaches tens of megabytes.
const BUFFER_CAPACITY: usize = 10 * 1024 * 1024;

/// Single authority over cursors, slots, and launch decisions.
///
/// Runs as one task. Workers complete out of order; the ring of `parallel`
/// slots holds finished minutes until every earlier minute has been emitted
/// and its buffer has come back from the consumer.
pub(crate) struct Manager {
    source: Arc<dyn FilterSource>,
    schema: Arc<Schema>,
    formatter: Arc<dyn Formatter>,
    parallel: usize,
    start_minute: i64,
    end_minute: i64,
    slots: Vec<Slot>,
    read_pos: usize,
    write_pos: usize,
    running: usize,
    cursors: Arc<Cursors>,
    cancel: CancellationToken,
    worker_cancel: CancellationToken,
    done_tx: mpsc::Sender<WorkerDone>,
    done_rx: mpsc::Receiver<WorkerDone>,
    out_tx: mpsc::Sender<Vec<u8>>,
    ret_rx: mpsc::Receiver<Vec<u8>>,
    err_tx: mpsc::Sender<AppError>,
}

impl Manager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn FilterSource>,
        schema: Arc<Schema>,
        formatter: Arc<dyn Formatter>,
        parallel: usize,
        start_minute: i64,
        end_minute: i64,
        cursors: Arc<Cursors>,
        cancel: CancellationToken,
        out_tx: mpsc::Sender<Vec<u8>>,
        ret_rx: mpsc::Receiver<Vec<u8>>,
        err_tx: mpsc::Sender<AppError>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(parallel);
        let worker_cancel = cancel.child_token();
        let slots = (0..parallel).map(|_| Slot::empty()).collect();
        Self {
            source,
            schema,
            formatter,
            parallel,
            start_minute,
            end_minute,
            slots,
            read_pos: 0,
            write_pos: 0,
            running: 0,
            cursors,
            cancel,
            worker_cancel,
            done_tx,
            done_rx,
            out_tx,
            ret_rx,
            err_tx,
        }
    }

    /// Runs the manager to completion.
    ///
    /// On exit no worker is left in flight, the emission channel is closed
    /// before the first error (if any) is published, and errors after the
    /// first are discarded.
    pub async fn run(mut self) {
        let result = self.drive().await;
        self.worker_cancel.cancel();
        while self.running > 0 {
            if self.done_rx.recv().await.is_none() {
                break;
            }
            self.running -= 1;
        }
        drop(self.out_tx);
        if let Err(err) = result {
            let _ = self.err_tx.send(err).await;
        }
    }

    async fn drive(&mut self) -> Result<()> {
        while self.start_minute + (self.write_pos as i64) <= self.end_minute
            && self.running < self.parallel
        {
            let idx = self.write_pos % self.parallel;
            self.launch(idx, self.write_pos, Vec::with_capacity(BUFFER_CAPACITY));
            self.write_pos += 1;
            self.cursors.store_write(self.write_pos);
        }
        if self.running == 0 {
            // Empty minute range.
            return Ok(());
        }
        loop {
            let received = tokio::select! {
                received = self.done_rx.recv() => received,
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            };
            let Some(done) = received else {
                return Err(AppError::invariant(
                    "completion channel closed with workers in flight",
                ));
            };
            self.running -= 1;
            let buf = done.result?;
            let idx = done.pos % self.parallel;
            if self.slots[idx].stage.get() != Stage::Done {
                return Err(AppError::invariant(
                    "received job done, but the slot is not in the done stage",
                ));
            }
            self.slots[idx].stage.set(Stage::WaitingOthers);
            self.slots[idx].buf = Some(buf);
            self.drain_ready().await?;
            if self.read_pos == self.write_pos && self.running == 0 {
                return Ok(());
            }
        }
    }

    /// Emits every slot that is ready in read-cursor order, recycling each
    /// returned buffer into the next launch.
    async fn drain_ready(&mut self) -> Result<()> {
        loop {
            let idx = self.read_pos % self.parallel;
            if self.slots[idx].stage.get() != Stage::WaitingOthers {
                return Ok(());
            }
            let Some(buf) = self.slots[idx].buf.take() else {
                return Err(AppError::invariant("ready slot holds no buffer"));
            };
            tokio::select! {
                sent = self.out_tx.send(buf) => {
                    if sent.is_err() {
                        // Consumer dropped the stream.
                        return Err(AppError::Cancelled);
                    }
                }
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            }
            self.slots[idx].stage.set(Stage::WaitingBufferReturn);
            let mut returned = tokio::select! {
                maybe = self.ret_rx.recv() => match maybe {
                    Some(returned) => returned,
                    None => return Err(AppError::Cancelled),
                },
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            };
            returned.clear();
            if self.start_minute + (self.write_pos as i64) <= self.end_minute {
                self.launch(idx, self.write_pos, returned);
                self.write_pos += 1;
                self.cursors.store_write(self.write_pos);
            } else {
                self.slots[idx].buf = None;
                self.slots[idx].stage.set(Stage::Empty);
            }
            self.read_pos += 1;
            self.cursors.store_read(self.read_pos);
        }
    }

    fn launch(&mut self, idx: usize, pos: usize, buf: Vec<u8>) {
        let slot = &mut self.slots[idx];
        slot.stage.set(Stage::Preparing);
        slot.buf = None;
        tokio::spawn(worker::run(
            Arc::clone(&self.source),
            self.start_minute + pos as i64,
            Arc::clone(&self.schema),
            Arc::clone(&self.formatter),
            slot.stage.clone(),
            buf,
            pos,
            self.worker_cancel.clone(),
            self.done_tx.clone(),
        ));
        self.running += 1;
    }
}
