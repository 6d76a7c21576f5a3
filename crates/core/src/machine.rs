//! Interface to the emulated machine.
//!
//! The save state core never executes instructions itself. It drives a
//! [`Machine`] one frame at a time and reaches its registers and memories
//! through the [`Stateful`] field registration.

use std::fmt;

use crate::state::Stateful;

/// Opaque token identifying the loaded ROM/mapper combination.
///
/// Two machines with the same config always register the same field list,
/// so a snapshot is only valid for the config it was captured under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigId(pub u64);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// An emulated console that can be run frame by frame and serialized.
pub trait Machine: Stateful {
    /// Advance one full frame and return its length in CPU ticks.
    fn run_frame(&mut self) -> u32;

    /// Identifies the current state shape (ROM, mapper, cartridge RAM size).
    fn config_id(&self) -> ConfigId;

    /// True while a frame is executing. Capture and restore must never
    /// observe this.
    fn mid_frame(&self) -> bool {
        false
    }
}
