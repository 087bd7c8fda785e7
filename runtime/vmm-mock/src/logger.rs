//! Capturing `log::Log` for tests
//!
//! Only threads that called [`init`] are recorded, and records are tagged with
//! the thread that emitted them. Device handlers log synchronously on the
//! calling thread, so a test can look at its own records while other tests run
//! in parallel.

use std::cell::Cell;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use log::{Level, LevelFilter, Log, Metadata, Record};
use pvpanic::GUEST_ERROR_TARGET;

/// One captured log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

struct CaptureLogger {
    records: Mutex<Vec<(ThreadId, CapturedRecord)>>,
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !CAPTURING.with(Cell::get) {
            return;
        }
        let captured = CapturedRecord {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push((thread::current().id(), captured));
        }
    }

    fn flush(&self) {}
}

/// Install the capturing logger (idempotent), start recording the calling
/// thread and forget anything it logged before
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
    CAPTURING.with(|c| c.set(true));
    take_current_thread();
}

/// Remove and return the records emitted by the calling thread
pub fn take_current_thread() -> Vec<CapturedRecord> {
    let me = thread::current().id();
    let Ok(mut records) = LOGGER.records.lock() else {
        return Vec::new();
    };

    let (mine, others): (Vec<_>, Vec<_>) = records.drain(..).partition(|(id, _)| *id == me);
    *records = others;
    mine.into_iter().map(|(_, r)| r).collect()
}

/// Guest-error diagnostics emitted by the calling thread
pub fn take_guest_errors() -> Vec<CapturedRecord> {
    take_current_thread()
        .into_iter()
        .filter(|r| r.target == GUEST_ERROR_TARGET)
        .collect()
}
