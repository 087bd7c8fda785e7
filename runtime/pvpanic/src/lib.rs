//! pvpanic - Paravirtual panic notifier device
//!
//! # Purpose
//! A guest kernel that hits an unrecoverable panic writes a control byte to a
//! single I/O port. The host observes the write, tells the management channel
//! that the guest panicked, and stops the VM in the `GuestPanicked` run state.
//!
//! # Integration Points
//! - Depends on: an [`IoBus`] to mount the register on
//! - Provides to: the VMM board code (one instance per machine)
//! - Collaborators: [`RunStateController`], [`EventSink`], optional [`FwCfg`]
//! - Guest ABI: read returns [`PanicEvents::SUPPORTED`], write bit 0 = panicked
//!
//! # Architecture
//! The device itself is stateless. The only shared state is the pair of
//! set-once flags in [`NotifierGlobals`] (unknown-event diagnostic, fw-cfg
//! publication), which default to a process-wide instance.
//!
//! # Testing Strategy
//! - Unit tests: bitmask decoding, property parsing, bus dispatch
//! - Integration tests: full machine scenarios with `vmm-mock` collaborators

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

mod bus;
mod config;
mod device;
mod events;
mod host;

pub use bus::{AccessSize, BusError, IoBus, IoRegion, IoRegionOps, MountedRegion};
pub use config::{ConfigError, PropertyInfo, PropertyKind, PvPanicConfig, DEFAULT_IOPORT};
pub use device::{pvpanic_init, NotifierGlobals, PvPanic, GUEST_ERROR_TARGET};
pub use events::PanicEvents;
pub use host::{
    EventSink, FwCfg, FwCfgError, GuestPanicAction, MonitorEvent, RunState, RunStateController,
};

/// QOM-style type name of the device
pub const TYPE_NAME: &str = "pvpanic";

/// Whether the device may be created from the user command line.
///
/// The board instantiates it; users only tune the `ioport` property.
pub const USER_CREATABLE: bool = false;

/// Name of the fw-cfg file carrying the port number
pub const FW_CFG_PORT_FILE: &str = "etc/pvpanic-port";

/// Width of the guest-visible register in bytes
pub const REGISTER_WIDTH: u16 = 1;
