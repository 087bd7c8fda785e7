//! pvpanic device - guest panic notification over a single I/O port
//!
//! The guest reads the port once to confirm the notifier is present, then
//! writes [`PanicEvents::PANICKED`] from its panic path. On that write the
//! device emits `GUEST_PANICKED` to the monitor and asks the run-state
//! manager to stop the VM, in that order, on every such write.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info, warn};

use crate::bus::{AccessSize, IoBus, IoRegion, IoRegionOps};
use crate::config::PvPanicConfig;
use crate::events::PanicEvents;
use crate::host::{EventSink, FwCfg, GuestPanicAction, MonitorEvent, RunState, RunStateController};
use crate::{BusError, FW_CFG_PORT_FILE, REGISTER_WIDTH, TYPE_NAME};

/// `log` target for diagnostics caused by guest misbehaviour
pub const GUEST_ERROR_TARGET: &str = "guest_error";

/// Set-once flags shared by every pvpanic instance using them
///
/// Both flags only ever go from `false` to `true`; the first caller to flip
/// one wins. A race between two instances costs at most a duplicate log line
/// or fw-cfg attempt.
#[derive(Debug)]
pub struct NotifierGlobals {
    unknown_event_logged: AtomicBool,
    port_published: AtomicBool,
}

static PROCESS_GLOBALS: NotifierGlobals = NotifierGlobals::new();

impl NotifierGlobals {
    pub const fn new() -> Self {
        Self {
            unknown_event_logged: AtomicBool::new(false),
            port_published: AtomicBool::new(false),
        }
    }

    /// Process-wide instance used by [`PvPanic::new`]
    pub fn process() -> &'static NotifierGlobals {
        &PROCESS_GLOBALS
    }

    /// Whether the unknown-event diagnostic has been emitted
    pub fn unknown_event_logged(&self) -> bool {
        self.unknown_event_logged.load(Ordering::Relaxed)
    }

    /// Whether some instance has published `etc/pvpanic-port`
    pub fn port_published(&self) -> bool {
        self.port_published.load(Ordering::Relaxed)
    }

    /// Returns true exactly once: for the caller that should log
    fn claim_unknown_event_log(&self) -> bool {
        !self.unknown_event_logged.swap(true, Ordering::Relaxed)
    }

    /// Returns true exactly once: for the caller that should publish
    fn claim_port_publication(&self) -> bool {
        !self.port_published.swap(true, Ordering::Relaxed)
    }
}

impl Default for NotifierGlobals {
    fn default() -> Self {
        Self::new()
    }
}

/// Panic notifier device
pub struct PvPanic {
    config: PvPanicConfig,
    run_state: Box<dyn RunStateController>,
    monitor: Box<dyn EventSink>,
    globals: &'static NotifierGlobals,
}

impl PvPanic {
    /// Create a device using the process-wide [`NotifierGlobals`]
    pub fn new(
        config: PvPanicConfig,
        run_state: Box<dyn RunStateController>,
        monitor: Box<dyn EventSink>,
    ) -> Self {
        Self::with_globals(config, run_state, monitor, NotifierGlobals::process())
    }

    /// Create a device sharing set-once state with a specific group of
    /// instances (one group per emulated machine, or per test)
    pub fn with_globals(
        config: PvPanicConfig,
        run_state: Box<dyn RunStateController>,
        monitor: Box<dyn EventSink>,
        globals: &'static NotifierGlobals,
    ) -> Self {
        Self {
            config,
            run_state,
            monitor,
            globals,
        }
    }

    /// Configured I/O port
    pub fn ioport(&self) -> u16 {
        self.config.ioport
    }

    /// Mount the register on `bus` and publish the port through fw-cfg.
    ///
    /// Publication happens at most once per [`NotifierGlobals`] and only when
    /// `fw_cfg` is present; a failing fw-cfg table is logged and ignored.
    ///
    /// # Errors
    /// Returns the bus error if the port range is already taken.
    pub fn realize(self, bus: &mut IoBus, fw_cfg: Option<&mut dyn FwCfg>) -> Result<(), BusError> {
        let ioport = self.ioport();
        let globals = self.globals;

        let region = IoRegion::new(TYPE_NAME, REGISTER_WIDTH, AccessSize::BYTE, Box::new(self));
        bus.register(ioport, region)?;

        match fw_cfg {
            Some(fw_cfg) if globals.claim_port_publication() => {
                debug!("pvpanic: publishing port {:#x} as {}", ioport, FW_CFG_PORT_FILE);
                if let Err(e) = fw_cfg.add_file(FW_CFG_PORT_FILE, ioport.to_le_bytes().to_vec()) {
                    warn!("pvpanic: could not publish {}: {}", FW_CFG_PORT_FILE, e);
                }
            }
            Some(_) => debug!("pvpanic: port already published, skipping fw_cfg"),
            None => debug!("pvpanic: no fw_cfg present, port {:#x} not published", ioport),
        }

        Ok(())
    }

    fn handle_event(&mut self, events: PanicEvents) {
        if events.has_unknown() && self.globals.claim_unknown_event_log() {
            warn!(target: GUEST_ERROR_TARGET, "pvpanic: unknown event {:#x}.", events.bits());
        }

        if events.is_panicked() {
            info!("pvpanic: guest panicked on port {:#x}, pausing", self.ioport());
            self.monitor.emit(MonitorEvent::GuestPanicked {
                action: GuestPanicAction::Pause,
            });
            self.run_state.request_stop(RunState::GuestPanicked);
        }
    }
}

impl IoRegionOps for PvPanic {
    fn read(&mut self, _offset: u64, _size: u8) -> u64 {
        PanicEvents::SUPPORTED.bits() as u64
    }

    fn write(&mut self, _offset: u64, value: u64, _size: u8) {
        self.handle_event(PanicEvents::from_register(value));
    }
}

/// Attach a default-configured pvpanic device to `bus`
pub fn pvpanic_init(
    bus: &mut IoBus,
    run_state: Box<dyn RunStateController>,
    monitor: Box<dyn EventSink>,
    fw_cfg: Option<&mut dyn FwCfg>,
) -> Result<(), BusError> {
    PvPanic::new(PvPanicConfig::default(), run_state, monitor).realize(bus, fw_cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FwCfgError;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Effect {
        Event(MonitorEvent),
        Stop(RunState),
    }

    type Effects = Arc<Mutex<Vec<Effect>>>;

    struct Monitor(Effects);

    impl EventSink for Monitor {
        fn emit(&mut self, event: MonitorEvent) {
            self.0.lock().unwrap().push(Effect::Event(event));
        }
    }

    struct Vm(Effects);

    impl RunStateController for Vm {
        fn request_stop(&mut self, state: RunState) {
            self.0.lock().unwrap().push(Effect::Stop(state));
        }
    }

    #[derive(Default)]
    struct Table {
        files: Vec<(String, Vec<u8>)>,
        fail: bool,
    }

    impl FwCfg for Table {
        fn add_file(&mut self, name: &str, data: Vec<u8>) -> Result<(), FwCfgError> {
            if self.fail {
                return Err(FwCfgError::TableFull { capacity: 0 });
            }
            self.files.push((name.to_string(), data));
            Ok(())
        }
    }

    fn fresh_globals() -> &'static NotifierGlobals {
        Box::leak(Box::new(NotifierGlobals::new()))
    }

    fn device(config: PvPanicConfig, globals: &'static NotifierGlobals) -> (PvPanic, Effects) {
        let effects: Effects = Arc::new(Mutex::new(Vec::new()));
        let dev = PvPanic::with_globals(
            config,
            Box::new(Vm(effects.clone())),
            Box::new(Monitor(effects.clone())),
            globals,
        );
        (dev, effects)
    }

    const PANIC_EVENT: MonitorEvent = MonitorEvent::GuestPanicked {
        action: GuestPanicAction::Pause,
    };

    #[test]
    fn test_read_returns_capabilities() {
        let (mut dev, _) = device(PvPanicConfig::default(), fresh_globals());
        assert_eq!(dev.read(0, 1), 0x01);
        dev.write(0, 0x01, 1);
        dev.write(0, 0xff, 1);
        assert_eq!(dev.read(0, 1), 0x01);
    }

    #[test]
    fn test_write_panicked_emits_then_stops() {
        let (mut dev, effects) = device(PvPanicConfig::default(), fresh_globals());
        dev.write(0, 0x01, 1);
        assert_eq!(
            *effects.lock().unwrap(),
            vec![Effect::Event(PANIC_EVENT), Effect::Stop(RunState::GuestPanicked)]
        );
    }

    #[test]
    fn test_write_zero_is_ignored() {
        let globals = fresh_globals();
        let (mut dev, effects) = device(PvPanicConfig::default(), globals);
        dev.write(0, 0x00, 1);
        assert!(effects.lock().unwrap().is_empty());
        assert!(!globals.unknown_event_logged());
    }

    #[test]
    fn test_unknown_bits_set_flag_once() {
        let globals = fresh_globals();
        let (mut dev, effects) = device(PvPanicConfig::default(), globals);

        dev.write(0, 0x02, 1);
        assert!(globals.unknown_event_logged());
        assert!(effects.lock().unwrap().is_empty());

        // 0xff carries bit 0 as well, so it still panics
        dev.write(0, 0xff, 1);
        assert_eq!(effects.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_repeated_panics_not_deduplicated() {
        let (mut dev, effects) = device(PvPanicConfig::default(), fresh_globals());
        dev.write(0, 0x01, 1);
        dev.write(0, 0x01, 1);
        let effects = effects.lock().unwrap();
        assert_eq!(effects.len(), 4);
        assert_eq!(effects[2], Effect::Event(PANIC_EVENT));
        assert_eq!(effects[3], Effect::Stop(RunState::GuestPanicked));
    }

    #[test]
    fn test_realize_publishes_port_le() {
        let globals = fresh_globals();
        let mut bus = IoBus::new();
        let mut table = Table::default();
        let (dev, _) = device(PvPanicConfig::with_ioport(0x600), globals);
        assert_eq!(dev.ioport(), 0x600);

        dev.realize(&mut bus, Some(&mut table)).unwrap();

        assert_eq!(
            table.files,
            vec![(FW_CFG_PORT_FILE.to_string(), vec![0x00, 0x06])]
        );
        assert!(globals.port_published());
        assert!(bus.is_mapped(0x600));
        assert!(!bus.is_mapped(0x505));
    }

    #[test]
    fn test_realize_without_fw_cfg_leaves_flag_clear() {
        let globals = fresh_globals();
        let mut bus = IoBus::new();
        let (dev, _) = device(PvPanicConfig::default(), globals);

        dev.realize(&mut bus, None).unwrap();
        assert!(!globals.port_published());
        assert!(bus.is_mapped(0x505));
    }

    #[test]
    fn test_fw_cfg_failure_is_not_fatal() {
        let globals = fresh_globals();
        let mut bus = IoBus::new();
        let mut table = Table {
            fail: true,
            ..Table::default()
        };
        let (dev, _) = device(PvPanicConfig::default(), globals);

        assert!(dev.realize(&mut bus, Some(&mut table)).is_ok());
        assert!(table.files.is_empty());
        assert!(bus.is_mapped(0x505));
    }

    #[test]
    fn test_realize_on_taken_port() {
        let globals = fresh_globals();
        let mut bus = IoBus::new();
        let (first, _) = device(PvPanicConfig::default(), globals);
        let (second, _) = device(PvPanicConfig::default(), globals);

        first.realize(&mut bus, None).unwrap();
        assert!(matches!(
            second.realize(&mut bus, None),
            Err(BusError::Overlap { existing: "pvpanic", .. })
        ));
    }

    #[test]
    fn test_globals_claims_are_single_shot() {
        let globals = NotifierGlobals::new();
        assert!(globals.claim_unknown_event_log());
        assert!(!globals.claim_unknown_event_log());
        assert!(globals.claim_port_publication());
        assert!(!globals.claim_port_publication());
    }
}
