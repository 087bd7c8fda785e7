//! Simulated machine: an I/O bus with pvpanic devices and recording host

use std::fs;
use std::path::Path;

use anyhow::Context;
use pvpanic::{BusError, FwCfg, IoBus, NotifierGlobals, PvPanic, PvPanicConfig, RunState};
use serde::Deserialize;
use vmm_mock::{fresh_globals, FwCfgTable, HostEffect, Journal};

use crate::ops::GuestOp;

/// Machine description file
///
/// ```toml
/// fw_cfg = true
///
/// [[device]]
/// ioport = 0x505
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineFile {
    /// Whether the board has a fw-cfg table
    pub fw_cfg: bool,

    #[serde(rename = "device")]
    pub devices: Vec<PvPanicConfig>,
}

impl Default for MachineFile {
    fn default() -> Self {
        Self {
            fw_cfg: true,
            devices: Vec::new(),
        }
    }
}

impl MachineFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading machine file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing machine file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Result of one guest operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub op: GuestOp,
    pub port: u16,
    /// Value read, for `in`
    pub value: Option<u8>,
    pub effects: Vec<HostEffect>,
    pub error: Option<BusError>,
}

pub struct Machine {
    pub bus: IoBus,
    pub fw_cfg: Option<FwCfgTable>,
    pub journal: Journal,
    /// Ports of the realized devices, in creation order (never empty)
    ports: Vec<u16>,
    globals: &'static NotifierGlobals,
}

impl Machine {
    /// Realize every device in `file`, or one default device if it lists none
    pub fn build(file: &MachineFile) -> anyhow::Result<Self> {
        let journal = Journal::new();
        let globals = fresh_globals();
        let mut bus = IoBus::new();
        let mut fw_cfg = file.fw_cfg.then(FwCfgTable::new);

        let configs = if file.devices.is_empty() {
            vec![PvPanicConfig::default()]
        } else {
            file.devices.clone()
        };

        let mut ports = Vec::with_capacity(configs.len());
        for config in configs {
            let device = PvPanic::with_globals(
                config,
                Box::new(journal.run_state()),
                Box::new(journal.monitor()),
                globals,
            );
            let port = device.ioport();
            device
                .realize(&mut bus, fw_cfg.as_mut().map(|t| t as &mut dyn FwCfg))
                .with_context(|| format!("realizing pvpanic at {:#x}", port))?;
            ports.push(port);
        }

        Ok(Self {
            bus,
            fw_cfg,
            journal,
            ports,
            globals,
        })
    }

    /// Port used when an operation names none
    pub fn default_port(&self) -> u16 {
        self.ports[0]
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Set-once state shared by this machine's devices
    pub fn globals(&self) -> &'static NotifierGlobals {
        self.globals
    }

    pub fn run_state(&self) -> RunState {
        self.journal.current_state()
    }

    /// Monitor `cont`
    pub fn resume(&self) {
        self.journal.resume();
    }

    /// Perform one guest access and collect what the host saw
    pub fn execute(&mut self, op: GuestOp) -> Access {
        let (port, result) = match op {
            GuestOp::In { port } => {
                let port = port.unwrap_or(self.default_port());
                (port, self.bus.read(port, 1).map(|v| Some(v as u8)))
            }
            GuestOp::Out { port, value } => {
                let port = port.unwrap_or(self.default_port());
                (port, self.bus.write(port, value as u64, 1).map(|_| None))
            }
        };

        let (value, error) = match result {
            Ok(value) => (value, None),
            Err(e) => (None, Some(e)),
        };

        Access {
            op,
            port,
            value,
            effects: self.journal.drain(),
            error,
        }
    }
}
