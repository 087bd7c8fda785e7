//! Panic event bitmask exchanged over the pvpanic register
//!
//! Reads return the set of events the host understands; writes carry the
//! events the guest is reporting. New events are added as new bits, so an
//! old host only logs bits it does not know instead of rejecting the write.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

bitflags! {
    /// Events a guest can report through the panic port
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PanicEvents: u8 {
        /// Guest kernel panicked; stop the VM
        const PANICKED = 1 << 0;
    }
}

const_assert_eq!(PanicEvents::PANICKED.bits(), 0x01);

impl PanicEvents {
    /// Capability mask returned on every read
    pub const SUPPORTED: PanicEvents = PanicEvents::PANICKED;

    /// Decode a raw register write.
    ///
    /// The register is one byte wide, so anything above bit 7 is dropped
    /// before decoding. Unknown bits are kept so callers can report them.
    pub fn from_register(value: u64) -> Self {
        PanicEvents::from_bits_retain(value as u8)
    }

    /// Bits set by the guest that this host does not understand
    pub fn unknown_bits(self) -> u8 {
        self.bits() & !PanicEvents::SUPPORTED.bits()
    }

    /// Whether any unknown bit is set
    pub fn has_unknown(self) -> bool {
        self.unknown_bits() != 0
    }

    /// Whether the guest reported a panic
    pub fn is_panicked(self) -> bool {
        self.contains(PanicEvents::PANICKED)
    }
}
