//! Ordered record of host side effects
//!
//! Monitor events and run-state requests go through one channel so the
//! relative order of the two is preserved.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{unbounded, Receiver, Sender};
use pvpanic::{EventSink, MonitorEvent, RunState, RunStateController};

/// One call a device made into the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEffect {
    Monitor(MonitorEvent),
    RunState(RunState),
}

/// Shared journal of host effects plus the simulated VM run state
pub struct Journal {
    tx: Sender<HostEffect>,
    rx: Receiver<HostEffect>,
    state: Arc<AtomicCell<RunState>>,
}

impl Journal {
    /// Empty journal, VM running
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            state: Arc::new(AtomicCell::new(RunState::Running)),
        }
    }

    /// Monitor channel endpoint recording into this journal
    pub fn monitor(&self) -> RecordingMonitor {
        RecordingMonitor {
            tx: self.tx.clone(),
        }
    }

    /// Run-state manager recording into this journal
    pub fn run_state(&self) -> RecordingRunState {
        RecordingRunState {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Take every effect recorded so far, oldest first
    pub fn drain(&self) -> Vec<HostEffect> {
        self.rx.try_iter().collect()
    }

    /// Current simulated run state
    pub fn current_state(&self) -> RunState {
        self.state.load()
    }

    /// Resume the VM (monitor `cont`)
    pub fn resume(&self) {
        self.state.store(RunState::Running);
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

/// [`EventSink`] that records into a [`Journal`]
#[derive(Clone)]
pub struct RecordingMonitor {
    tx: Sender<HostEffect>,
}

impl EventSink for RecordingMonitor {
    fn emit(&mut self, event: MonitorEvent) {
        // Receiver lives in the journal; a dropped journal just discards
        let _ = self.tx.send(HostEffect::Monitor(event));
    }
}

/// [`RunStateController`] that records into a [`Journal`]
#[derive(Clone)]
pub struct RecordingRunState {
    tx: Sender<HostEffect>,
    state: Arc<AtomicCell<RunState>>,
}

impl RunStateController for RecordingRunState {
    fn request_stop(&mut self, state: RunState) {
        self.state.store(state);
        let _ = self.tx.send(HostEffect::RunState(state));
    }
}
