//! Device configuration and property schema
//!
//! Properties are fixed at creation. There is no hot reconfiguration: once a
//! [`crate::PvPanic`] is built from a config, its port never changes.

use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default I/O port of the panic register
pub const DEFAULT_IOPORT: u16 = 0x505;

/// Errors from property parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Property '{name}' not found on device pvpanic")]
    UnknownProperty { name: String },

    #[error("Property '{name}' expects {expected}, got '{value}'")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Value type of a device property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    U16,
}

impl PropertyKind {
    fn describe(self) -> &'static str {
        match self {
            PropertyKind::U16 => "a 16-bit unsigned integer",
        }
    }
}

/// Static description of one device property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub default: u64,
}

/// Creation-time configuration of a pvpanic device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PvPanicConfig {
    /// I/O port the register is mounted at
    pub ioport: u16,
}

impl Default for PvPanicConfig {
    fn default() -> Self {
        Self {
            ioport: DEFAULT_IOPORT,
        }
    }
}

impl PvPanicConfig {
    /// Property schema, in declaration order
    pub const PROPERTIES: &'static [PropertyInfo] = &[PropertyInfo {
        name: "ioport",
        kind: PropertyKind::U16,
        default: DEFAULT_IOPORT as u64,
    }];

    /// Config with an explicit port
    pub fn with_ioport(ioport: u16) -> Self {
        Self { ioport }
    }

    /// Set a property from its textual form (`ioport=0x600` style).
    ///
    /// Accepts decimal or `0x`-prefixed hexadecimal.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "ioport" => {
                self.ioport = parse_u16(value).ok_or_else(|| ConfigError::InvalidValue {
                    name: "ioport",
                    expected: PropertyKind::U16.describe(),
                    value: value.to_string(),
                })?;
                Ok(())
            }
            _ => Err(ConfigError::UnknownProperty {
                name: name.to_string(),
            }),
        }
    }

    /// Apply a comma-separated property list such as `ioport=0x600`
    pub fn apply_properties(&mut self, props: &str) -> Result<(), ConfigError> {
        for prop in props.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = prop.split_once('=').unwrap_or((prop, ""));
            self.set_property(name.trim(), value.trim())?;
        }
        Ok(())
    }
}

fn parse_u16(value: &str) -> Option<u16> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
