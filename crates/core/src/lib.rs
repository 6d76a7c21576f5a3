//! # famicom-core
//!
//! Save state and rewind core for a 6502-class console emulator.
//!
//! The whole emulated machine can be serialized to a byte buffer, restored,
//! persisted to a single save slot on disk, and recorded frame by frame into
//! a bounded history that is played back in reverse while the rewind input
//! is held.
//!
//! ## Architecture
//!
//! - [`state`] — The transfer protocol: one field traversal shared by the
//!   Size, Save and Load modes
//! - [`Machine`] — What the core needs from an emulated console
//! - [`Snapshot`] — Immutable captured state, tagged with its frame length and config
//! - [`savestate`] — Capture, restore and the persisted `.state` file
//! - [`RewindBuffer`] — Fixed-capacity ring of recent snapshots
//! - [`RewindController`] — Forward/rewinding state machine driven once per frame
//! - [`console`] — NES-shaped reference machine with a deterministic workload
//!
//! ## Frame loop
//!
//! ```text
//! loop {
//!     match rewind.handle_rewind(&mut console, &mut ctx, rewind_held)? {
//!         Direction::Backward => { /* present restored frame, reversed audio */ }
//!         Direction::Forward => {
//!             let ticks = console.run_frame();
//!             rewind.frame_completed(&mut console, &mut ctx, ticks)?;
//!         }
//!     }
//! }
//! ```

pub mod console;
pub mod error;
pub mod machine;
pub mod rewind;
pub mod savestate;
pub mod snapshot;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use console::Console;
pub use error::{CartridgeError, StateError};
pub use machine::{ConfigId, Machine};
pub use rewind::{Direction, RewindConfig, RewindController, RewindState};
pub use snapshot::{RewindBuffer, Snapshot};
pub use state::{Stateful, Transfer, TransferMode};

/// NTSC CPU clock: 21.477272 MHz master / 12
pub const CPU_HZ: u32 = 1_789_773;

/// NTSC frame rate, rounded
pub const FRAMES_PER_SECOND: u32 = 60;

/// Per-frame flags shared between the main loop and the rewind controller.
///
/// Owned by the main loop and passed by `&mut`. Only the controller writes
/// `is_backwards_frame`; only the frontend writes `rewind_enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmuContext {
    /// The frame about to be presented was produced by a rewind restore.
    pub is_backwards_frame: bool,
    /// Record history and accept rewind input.
    pub rewind_enabled: bool,
}

impl EmuContext {
    pub fn new() -> Self {
        EmuContext { is_backwards_frame: false, rewind_enabled: true }
    }
}

impl Default for EmuContext {
    fn default() -> Self {
        Self::new()
    }
}
