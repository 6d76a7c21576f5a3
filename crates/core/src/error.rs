//! Error types for save state and cartridge handling.

use thiserror::Error;

use crate::machine::ConfigId;

/// Errors returned by capture, restore and the persisted save slot.
///
/// Every variant is recoverable: the machine is left in its last valid
/// state and the caller decides what to report.
#[derive(Debug, Error)]
pub enum StateError {
    /// Snapshot was taken under a different ROM/mapper configuration.
    #[error("save state belongs to config {snapshot}, machine is running {live}")]
    ConfigMismatch { snapshot: ConfigId, live: ConfigId },

    /// Payload length does not match what the live machine expects.
    #[error("corrupt save state: expected {expected} bytes, found {found}")]
    CorruptState { expected: usize, found: usize },

    /// Persisted file has a bad magic, version or header.
    #[error("invalid save state file: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while parsing an iNES image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("not an iNES image (bad magic)")]
    BadMagic,

    #[error("image truncated: header declares {expected} bytes, file has {found}")]
    Truncated { expected: usize, found: usize },

    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u8),

    #[error("invalid PRG-RAM size {0} bytes")]
    InvalidPrgRam(usize),
}
