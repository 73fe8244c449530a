use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle stage of one slot in the work ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Stage {
    Empty = 0,
    Preparing,
    Downloading,
    Processing,
    Done,
    WaitingOthers,
    WaitingBufferReturn,
}

impl Stage {
    fn from_u8(raw: u8) -> Stage {
        match raw {
            0 => Stage::Empty,
            1 => Stage::Preparing,
            2 => Stage::Downloading,
            3 => Stage::Processing,
            4 => Stage::Done,
            5 => Stage::WaitingOthers,
            _ => Stage::WaitingBufferReturn,
        }
    }
}

/// Stage cell shared between the manager and the slot's current worker.
///
/// Relaxed ordering is enough: the completion channel synchronizes the
/// handoff, and any other reader is an advisory observer.
#[derive(Clone)]
pub(crate) struct StageCell(Arc<AtomicU8>);

impl StageCell {
    pub fn new(stage: Stage) -> Self {
        Self(Arc::new(AtomicU8::new(stage as u8)))
    }

    pub fn set(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Relaxed);
    }

    pub fn get(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// One cell of the fixed-size work ring.
pub(crate) struct Slot {
    pub stage: StageCell,
    /// The slot's buffer; None while a worker or the consumer holds it.
    pub buf: Option<Vec<u8>>,
}

impl Slot {
    pub fn empty() -> Self {
        Self {
            stage: StageCell::new(Stage::Empty),
            buf: None,
        }
    }
}

/// Read-side mirror of the manager's cursors for progress observers.
pub struct Cursors {
    read: AtomicUsize,
    write: AtomicUsize,
}

impl Cursors {
    pub(crate) fn new() -> Self {
        Self {
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    pub(crate) fn store_read(&self, pos: usize) {
        self.read.store(pos, Ordering::Relaxed);
    }

    pub(crate) fn store_write(&self, pos: usize) {
        self.write.store(pos, Ordering::Relaxed);
    }

    /// Index of the next minute to be emitted.
    pub fn read_pos(&self) -> usize {
        self.read.load(Ordering::Relaxed)
    }

    /// Index of the next minute to be launched.
    pub fn write_pos(&self) -> usize {
        self.write.load(Ordering::Relaxed)
    }
}
