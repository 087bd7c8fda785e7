//! Recording host collaborators for device tests
//!
//! # WARNING: This is NOT a real VMM!
//!
//! These types stand in for the run-state manager, the monitor channel and
//! the fw-cfg table so devices can be exercised without a virtual machine.
//! Everything a device does to the host is recorded, in order, so tests can
//! assert on exactly what happened.
//!
//! ## Usage
//!
//! ```rust
//! use pvpanic::{IoBus, PvPanic, PvPanicConfig};
//! use vmm_mock::{fresh_globals, FwCfgTable, Journal};
//!
//! let journal = Journal::new();
//! let mut bus = IoBus::new();
//! let mut fw_cfg = FwCfgTable::new();
//!
//! PvPanic::with_globals(
//!     PvPanicConfig::default(),
//!     Box::new(journal.run_state()),
//!     Box::new(journal.monitor()),
//!     fresh_globals(),
//! )
//! .realize(&mut bus, Some(&mut fw_cfg))
//! .unwrap();
//!
//! bus.write(0x505, 0x01, 1).unwrap();
//! assert_eq!(journal.drain().len(), 2);
//! ```

mod fw_cfg;
mod journal;
pub mod logger;

pub use fw_cfg::{FwCfgTable, FW_CFG_FILE_SLOTS, FW_CFG_MAX_FILE_PATH};
pub use journal::{HostEffect, Journal, RecordingMonitor, RecordingRunState};

use pvpanic::NotifierGlobals;

/// Isolated set-once state for one test or one simulated machine
///
/// Leaks a small allocation; intended for tests and short-lived tools.
pub fn fresh_globals() -> &'static NotifierGlobals {
    Box::leak(Box::new(NotifierGlobals::new()))
}
