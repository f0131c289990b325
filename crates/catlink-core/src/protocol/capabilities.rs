//! Capability bitmask advertised by the display device.
//!
//! Bit layout (LSB first):
//! - Bit 0: ILI9341 display driver
//! - Bit 1: ST7789 display driver
//! - Bit 2: hardware buttons (emits `EVENT BTN=`)
//! - Bit 3: 2 Mbaud serial
//! - Bit 4: temperature overlay (`DATA TEMPS=`)
//! - Bit 5: messenger mode
//! - Bit 6: tutor mode
//! - Bit 7: over-the-air updates
//!
//! The device advertises the bits it supports in `HELLO ... CAP=`; the host
//! sends the bits it wishes to use in `REQCAP=`.  Feature use is always gated
//! on the peer's advertised bits, never on what was requested.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a capability mask cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid capability mask: {0:?}")]
pub struct ParseCapabilityError(pub String);

/// 32-bit capability mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(pub u32);

impl CapabilitySet {
    pub const DISPLAY_ILI9341: CapabilitySet = CapabilitySet(1 << 0);
    pub const DISPLAY_ST7789: CapabilitySet = CapabilitySet(1 << 1);
    pub const BUTTONS: CapabilitySet = CapabilitySet(1 << 2);
    pub const SERIAL_2M: CapabilitySet = CapabilitySet(1 << 3);
    pub const TEMP_OVERLAY: CapabilitySet = CapabilitySet(1 << 4);
    pub const MESSENGER_MODE: CapabilitySet = CapabilitySet(1 << 5);
    pub const TUTOR_MODE: CapabilitySet = CapabilitySet(1 << 6);
    pub const OTA_SUPPORTED: CapabilitySet = CapabilitySet(1 << 7);

    /// No capabilities.
    pub const NONE: CapabilitySet = CapabilitySet(0);
    /// Every bit set; what a host requests when it wants "whatever you have".
    pub const ALL: CapabilitySet = CapabilitySet(u32::MAX);
    /// Mask advertised by the reference firmware build.
    pub const REFERENCE_DEVICE: CapabilitySet = CapabilitySet(0x0000_0037);

    const NAMED: [(CapabilitySet, &'static str); 8] = [
        (Self::DISPLAY_ILI9341, "DISPLAY_ILI9341"),
        (Self::DISPLAY_ST7789, "DISPLAY_ST7789"),
        (Self::BUTTONS, "BUTTONS"),
        (Self::SERIAL_2M, "SERIAL_2M"),
        (Self::TEMP_OVERLAY, "TEMP_OVERLAY"),
        (Self::MESSENGER_MODE, "MESSENGER_MODE"),
        (Self::TUTOR_MODE, "TUTOR_MODE"),
        (Self::OTA_SUPPORTED, "OTA_SUPPORTED"),
    ];

    /// Raw bitmask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit in `other` is set in `self`.
    pub const fn contains(self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the defined bits that are set.  Undefined bits are ignored.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for CapabilitySet {
    type Output = CapabilitySet;

    fn bitor(self, rhs: Self) -> Self::Output {
        CapabilitySet(self.0 | rhs.0)
    }
}

impl BitOrAssign for CapabilitySet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CapabilitySet {
    type Output = CapabilitySet;

    fn bitand(self, rhs: Self) -> Self::Output {
        CapabilitySet(self.0 & rhs.0)
    }
}

/// Wire form: fixed-width uppercase hex, e.g. `0x00000037`.
impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Accepts `0x`-prefixed hex (any case, any width) or plain decimal, as
/// older firmware sent either.
impl FromStr for CapabilitySet {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse::<u32>(),
        };
        parsed
            .map(CapabilitySet)
            .map_err(|_| ParseCapabilityError(s.to_string()))
    }
}
