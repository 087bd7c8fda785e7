//! Host collaborators the device calls into
//!
//! The run-state manager, the monitor channel and the firmware configuration
//! table all belong to the VMM. The device only needs the narrow slice of each
//! defined here, so tests can substitute recording fakes.

use alloc::string::String;
use alloc::vec::Vec;
use serde::Serialize;
use thiserror::Error;

/// VM run states the device can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Guest executing normally
    Running,
    /// Stopped because the guest reported a kernel panic
    GuestPanicked,
}

/// Action the host takes in response to a guest panic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestPanicAction {
    Pause,
}

/// Structured notification for the management channel.
///
/// Serializes in the monitor wire shape, e.g.
/// `{"event":"GUEST_PANICKED","data":{"action":"pause"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorEvent {
    GuestPanicked { action: GuestPanicAction },
}

impl MonitorEvent {
    /// Event name as seen by management clients
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::GuestPanicked { .. } => "GUEST_PANICKED",
        }
    }
}

/// VM lifecycle manager
pub trait RunStateController: Send {
    /// Stop guest execution and enter `state`.
    ///
    /// Called on the vCPU thread that performed the I/O access. What "stop"
    /// means (pause, exit, callback) is up to the implementation.
    fn request_stop(&mut self, state: RunState);
}

/// Management/monitor event channel
pub trait EventSink: Send {
    fn emit(&mut self, event: MonitorEvent);
}

/// Firmware configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FwCfgError {
    #[error("fw_cfg file '{name}' already exists")]
    DuplicateFile { name: String },

    #[error("fw_cfg file name too long ({len} bytes, max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("fw_cfg file table full ({capacity} entries)")]
    TableFull { capacity: usize },
}

/// Firmware configuration table read by guest firmware
pub trait FwCfg {
    /// Publish a named blob
    fn add_file(&mut self, name: &str, data: Vec<u8>) -> Result<(), FwCfgError>;
}
