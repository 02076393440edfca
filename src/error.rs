use thiserror::Error;

use crate::types::CodeRate;

/// Failure kinds surfaced by the receive pipeline (see spec §7).
///
/// Most variants are recoverable: the state machine logs them at the
/// transition boundary and advances the read cursor rather than returning
/// an unwind-worthy error. Only [`LoRaError::InvalidConfig`] is fatal, and
/// only at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoRaError {
    #[error("not enough samples buffered yet")]
    InsufficientSamples,

    #[error("no preamble found in the search window")]
    PreambleNotFound,

    #[error("sync word / SFD did not match within the anchor window")]
    SyncMismatch,

    #[error("header checksum did not verify")]
    HeaderCrcFailed,

    #[error("header codeword was uncorrectable or carried an invalid field")]
    HeaderInvalid,

    #[error("payload codeword could not be corrected under {0:?}")]
    FecUncorrectable(CodeRate),

    #[error("payload CRC-16 did not match the received trailer")]
    PayloadCrcFailed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, LoRaError>;
