//! Port I/O bus - mounts device regions in the 16-bit I/O space
//!
//! Each region declares the access widths its handlers accept. The bus
//! enforces them before dispatching, so a handler registered with
//! [`AccessSize::BYTE`] only ever sees `size == 1`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use log::{debug, trace, warn};
use thiserror::Error;

/// Size of the x86 I/O port space
const PORT_SPACE: u32 = 0x1_0000;

/// Bus errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("No region mapped at port {port:#x}")]
    Unmapped { port: u16 },

    #[error("Unsupported {size}-byte access at port {port:#x} (region '{region}')")]
    UnsupportedAccess {
        port: u16,
        size: u8,
        region: &'static str,
    },

    #[error("Region '{name}' at {base:#x} overlaps '{existing}'")]
    Overlap {
        name: &'static str,
        base: u16,
        existing: &'static str,
    },

    #[error("Region '{name}' at {base:#x} (size {size}) exceeds the port space")]
    OutOfRange {
        name: &'static str,
        base: u16,
        size: u16,
    },

    #[error("Invalid region '{name}'")]
    InvalidRegion { name: &'static str },
}

pub type Result<T> = core::result::Result<T, BusError>;

/// Handlers for a mounted I/O region
///
/// `offset` is relative to the region base. Values are little-endian and
/// right-aligned to `size` bytes.
pub trait IoRegionOps: Send {
    fn read(&mut self, offset: u64, size: u8) -> u64;
    fn write(&mut self, offset: u64, value: u64, size: u8);
}

/// Access widths (in bytes) a region accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSize {
    pub min: u8,
    pub max: u8,
}

impl AccessSize {
    /// Byte-only register
    pub const BYTE: AccessSize = AccessSize { min: 1, max: 1 };

    fn is_valid(&self) -> bool {
        self.min.is_power_of_two()
            && self.max.is_power_of_two()
            && self.min <= self.max
            && self.max <= 8
    }

    /// Whether an access of `size` bytes is allowed
    pub fn permits(&self, size: u8) -> bool {
        size.is_power_of_two() && size >= self.min && size <= self.max
    }
}

/// An I/O region ready to be mounted
pub struct IoRegion {
    name: &'static str,
    size: u16,
    access: AccessSize,
    ops: Box<dyn IoRegionOps>,
}

impl IoRegion {
    pub fn new(name: &'static str, size: u16, access: AccessSize, ops: Box<dyn IoRegionOps>) -> Self {
        Self {
            name,
            size,
            access,
            ops,
        }
    }

    fn end(&self, base: u16) -> u32 {
        base as u32 + self.size as u32
    }
}

/// Summary of a mounted region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountedRegion {
    pub base: u16,
    pub size: u16,
    pub name: &'static str,
}

/// Port I/O address space
#[derive(Default)]
pub struct IoBus {
    /// Regions keyed by base port
    regions: BTreeMap<u16, IoRegion>,
}

impl IoBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `region` at `base`
    ///
    /// # Errors
    /// Returns error if the region is empty, declares inconsistent access
    /// widths, runs past port `0xffff`, or overlaps a mounted region.
    pub fn register(&mut self, base: u16, region: IoRegion) -> Result<()> {
        let name = region.name;

        if region.size == 0 || !region.access.is_valid() {
            return Err(BusError::InvalidRegion { name });
        }

        let end = region.end(base);
        if end > PORT_SPACE {
            return Err(BusError::OutOfRange {
                name,
                base,
                size: region.size,
            });
        }

        // Only the nearest neighbour on each side can overlap
        let below = self
            .regions
            .range(..=base)
            .next_back()
            .filter(|&(&b, r)| r.end(b) > base as u32);
        let above = self
            .regions
            .range(base..)
            .next()
            .filter(|&(&b, _)| (b as u32) < end);

        if let Some((_, existing)) = below.or(above) {
            return Err(BusError::Overlap {
                name,
                base,
                existing: existing.name,
            });
        }

        debug!(
            "io: mounted '{}' at {:#x}..{:#x} (access {}..={} bytes)",
            name, base, end, region.access.min, region.access.max
        );
        self.regions.insert(base, region);
        Ok(())
    }

    /// Dispatch a guest `in` of `size` bytes
    pub fn read(&mut self, port: u16, size: u8) -> Result<u64> {
        let (base, region) = self.checked_region(port, size)?;
        let value = region.ops.read((port - base) as u64, size) & value_mask(size);
        trace!("io: in  {:#06x}/{} -> {:#x} ({})", port, size, value, region.name);
        Ok(value)
    }

    /// Dispatch a guest `out` of `size` bytes
    pub fn write(&mut self, port: u16, value: u64, size: u8) -> Result<()> {
        let (base, region) = self.checked_region(port, size)?;
        let value = value & value_mask(size);
        trace!("io: out {:#06x}/{} <- {:#x} ({})", port, size, value, region.name);
        region.ops.write((port - base) as u64, value, size);
        Ok(())
    }

    /// Whether any region covers `port`
    pub fn is_mapped(&self, port: u16) -> bool {
        self.regions
            .range(..=port)
            .next_back()
            .is_some_and(|(&b, r)| r.end(b) > port as u32)
    }

    /// Mounted regions in port order
    pub fn regions(&self) -> impl Iterator<Item = MountedRegion> + '_ {
        self.regions.iter().map(|(&base, r)| MountedRegion {
            base,
            size: r.size,
            name: r.name,
        })
    }

    fn checked_region(&mut self, port: u16, size: u8) -> Result<(u16, &mut IoRegion)> {
        let (base, region) = match self.regions.range_mut(..=port).next_back() {
            Some((&b, r)) if r.end(b) > port as u32 => (b, r),
            _ => {
                warn!("io: access to unmapped port {:#x}", port);
                return Err(BusError::Unmapped { port });
            }
        };

        let fits = port as u32 + size as u32 <= region.end(base);
        if !region.access.permits(size) || !fits {
            warn!(
                "io: {}-byte access at {:#x} rejected by '{}'",
                size, port, region.name
            );
            return Err(BusError::UnsupportedAccess {
                port,
                size,
                region: region.name,
            });
        }

        Ok((base, region))
    }
}

fn value_mask(size: u8) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size as u32 * 8)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    /// Scratch register that echoes back the last write
    struct Latch {
        value: u64,
        writes: Arc<Mutex<Vec<(u64, u64, u8)>>>,
    }

    impl IoRegionOps for Latch {
        fn read(&mut self, _offset: u64, _size: u8) -> u64 {
            self.value
        }

        fn write(&mut self, offset: u64, value: u64, size: u8) {
            self.value = value;
            self.writes.lock().unwrap().push((offset, value, size));
        }
    }

    fn latch(name: &'static str, size: u16, access: AccessSize) -> (IoRegion, Arc<Mutex<Vec<(u64, u64, u8)>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let ops = Latch {
            value: 0,
            writes: writes.clone(),
        };
        (IoRegion::new(name, size, access, Box::new(ops)), writes)
    }

    #[test]
    fn test_register_and_dispatch() {
        let mut bus = IoBus::new();
        let (region, writes) = latch("scratch", 1, AccessSize::BYTE);
        bus.register(0x80, region).unwrap();

        bus.write(0x80, 0x5a, 1).unwrap();
        assert_eq!(bus.read(0x80, 1).unwrap(), 0x5a);
        assert_eq!(writes.lock().unwrap().as_slice(), &[(0, 0x5a, 1)]);
    }

    #[test]
    fn test_offset_is_region_relative() {
        let mut bus = IoBus::new();
        let (region, writes) = latch("wide", 8, AccessSize { min: 1, max: 4 });
        bus.register(0x3f8, region).unwrap();

        bus.write(0x3fb, 0x1, 1).unwrap();
        assert_eq!(writes.lock().unwrap()[0].0, 3);
    }

    #[test]
    fn test_unmapped_port() {
        let mut bus = IoBus::new();
        let (region, _) = latch("scratch", 1, AccessSize::BYTE);
        bus.register(0x80, region).unwrap();

        assert_eq!(bus.read(0x81, 1), Err(BusError::Unmapped { port: 0x81 }));
        assert_eq!(bus.write(0x7f, 1, 1), Err(BusError::Unmapped { port: 0x7f }));
        assert!(bus.is_mapped(0x80));
        assert!(!bus.is_mapped(0x81));
    }

    #[test]
    fn test_byte_region_rejects_wide_access() {
        let mut bus = IoBus::new();
        let (region, writes) = latch("scratch", 1, AccessSize::BYTE);
        bus.register(0x80, region).unwrap();

        assert!(matches!(
            bus.write(0x80, 0x0101, 2),
            Err(BusError::UnsupportedAccess { size: 2, .. })
        ));
        assert!(matches!(
            bus.read(0x80, 4),
            Err(BusError::UnsupportedAccess { size: 4, .. })
        ));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_access_past_region_end() {
        let mut bus = IoBus::new();
        let (region, _) = latch("pair", 2, AccessSize { min: 1, max: 2 });
        bus.register(0x70, region).unwrap();

        assert!(bus.read(0x70, 2).is_ok());
        assert!(matches!(
            bus.read(0x71, 2),
            Err(BusError::UnsupportedAccess { .. })
        ));
    }

    #[test]
    fn test_write_value_masked_to_width() {
        let mut bus = IoBus::new();
        let (region, writes) = latch("scratch", 1, AccessSize::BYTE);
        bus.register(0x80, region).unwrap();

        bus.write(0x80, 0x1ff, 1).unwrap();
        assert_eq!(writes.lock().unwrap()[0].1, 0xff);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut bus = IoBus::new();
        let (a, _) = latch("a", 4, AccessSize::BYTE);
        let (b, _) = latch("b", 1, AccessSize::BYTE);
        let (c, _) = latch("c", 4, AccessSize::BYTE);
        bus.register(0x100, a).unwrap();

        assert_eq!(
            bus.register(0x103, b).unwrap_err(),
            BusError::Overlap {
                name: "b",
                base: 0x103,
                existing: "a"
            }
        );
        assert!(matches!(
            bus.register(0xfe, c),
            Err(BusError::Overlap { existing: "a", .. })
        ));

        // Adjacent is fine
        let (d, _) = latch("d", 1, AccessSize::BYTE);
        bus.register(0x104, d).unwrap();
        assert_eq!(bus.regions().count(), 2);
    }

    #[test]
    fn test_region_bounds() {
        let mut bus = IoBus::new();
        let (edge, _) = latch("edge", 1, AccessSize::BYTE);
        bus.register(0xffff, edge).unwrap();

        let (past, _) = latch("past", 2, AccessSize::BYTE);
        assert!(matches!(
            bus.register(0xfffe, past),
            Err(BusError::Overlap { .. })
        ));

        let mut bus = IoBus::new();
        let (past, _) = latch("past", 2, AccessSize::BYTE);
        assert!(matches!(
            bus.register(0xffff, past),
            Err(BusError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_region() {
        let mut bus = IoBus::new();
        let (empty, _) = latch("empty", 0, AccessSize::BYTE);
        assert_eq!(
            bus.register(0x10, empty),
            Err(BusError::InvalidRegion { name: "empty" })
        );

        let (odd, _) = latch("odd", 4, AccessSize { min: 2, max: 1 });
        assert!(bus.register(0x10, odd).is_err());
    }

    #[test]
    fn test_regions_listing() {
        let mut bus = IoBus::new();
        let (a, _) = latch("a", 1, AccessSize::BYTE);
        let (b, _) = latch("b", 2, AccessSize::BYTE);
        bus.register(0x600, a).unwrap();
        bus.register(0x505, b).unwrap();

        let listed: Vec<_> = bus.regions().collect();
        assert_eq!(
            listed,
            vec![
                MountedRegion { base: 0x505, size: 2, name: "b" },
                MountedRegion { base: 0x600, size: 1, name: "a" },
            ]
        );
    }
}
