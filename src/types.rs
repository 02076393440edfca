//! Shared value types for the receive and transmit paths (spec §3).

use crate::error::LoRaError;

/// Spreading factor, `sf ∈ [7, 12]`. Symbol length is `N = 2^sf` chips.
pub const SF_MIN: u32 = 7;
pub const SF_MAX: u32 = 12;

/// Code rate, encoded as the number of parity bits added to a 4-bit nibble.
///
/// `cw_len = 4 + cr_index`, matching the header flags field layout in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeRate {
    Cr45 = 1,
    Cr46 = 2,
    Cr47 = 3,
    Cr48 = 4,
}

impl CodeRate {
    pub const fn cr_index(self) -> u8 {
        self as u8
    }

    pub const fn cw_len(self) -> u32 {
        4 + self.cr_index() as u32
    }

    pub fn from_cr_index(idx: u8) -> Result<Self, LoRaError> {
        match idx {
            1 => Ok(CodeRate::Cr45),
            2 => Ok(CodeRate::Cr46),
            3 => Ok(CodeRate::Cr47),
            4 => Ok(CodeRate::Cr48),
            other => Err(LoRaError::InvalidConfig(format!(
                "cr_index {other} out of range [1,4]"
            ))),
        }
    }
}

/// Oversampling factor applied ahead of symbol-rate processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Oversampling {
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
}

impl Oversampling {
    pub const fn factor(self) -> usize {
        self as usize
    }

    pub fn from_factor(os: usize) -> Result<Self, LoRaError> {
        match os {
            1 => Ok(Oversampling::X1),
            2 => Ok(Oversampling::X2),
            4 => Ok(Oversampling::X4),
            8 => Ok(Oversampling::X8),
            other => Err(LoRaError::InvalidConfig(format!(
                "oversampling factor {other} must be one of 1, 2, 4, 8"
            ))),
        }
    }
}

/// Decoded local frame header (post-decode, not the wire bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeader {
    pub payload_len: u8,
    pub cr: CodeRate,
    pub has_crc: bool,
}

/// Result of the preamble/SFD search (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreambleDetection {
    pub start_sample_raw: usize,
    pub os: Oversampling,
    pub phase: usize,
}

/// A fully decoded frame handed back to the caller (§6 "Frame sink").
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub header: LocalHeader,
    pub detection: PreambleDetection,
    /// Fractional CFO in cycles/sample, `∈ [-0.5, 0.5)` (§3, §4.4).
    pub cfo_fractional: f32,
    pub cfo_integer: i32,
    pub sto: i32,
    pub crc_ok: bool,
    pub frame_start_raw: usize,
    pub frame_end_raw: usize,
}
