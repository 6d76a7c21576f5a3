//! Rewind controller.
//!
//! Records one snapshot per completed frame and, while the rewind input is
//! held, restores them newest first instead of running the machine forward.
//!
//! ```text
//!            rewind held, history left
//!   FORWARD ---------------------------> REWINDING --+
//!      ^  ^                                 |    ^    | rewind held,
//!      |  |      rewind released            |    +----+ history left
//!      |  +---------------------------------+
//!      |         history exhausted          |
//!      +------------------------------------+
//! ```
//!
//! Releasing rewind makes the restored state the present: recording resumes
//! from there and the frames that were stepped over are gone.

use log::{debug, info, warn};

use crate::error::StateError;
use crate::machine::{ConfigId, Machine};
use crate::savestate::{capture, restore};
use crate::snapshot::{RewindBuffer, Snapshot};
use crate::state::measure;
use crate::{EmuContext, FRAMES_PER_SECOND};

/// Controller state. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindState {
    Forward,
    Rewinding,
}

/// What the main loop should do this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Run the machine for one frame.
    Forward,
    /// A snapshot was restored; present it instead of running.
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindConfig {
    /// History length in frames
    pub capacity: usize,
    /// Start with recording on
    pub enabled: bool,
}

impl Default for RewindConfig {
    fn default() -> Self {
        // 10 seconds
        RewindConfig { capacity: 10 * FRAMES_PER_SECOND as usize, enabled: true }
    }
}

pub struct RewindController {
    buffer: RewindBuffer,
    state: RewindState,
    recording: bool,
    /// Tick length of the frame restored in this iteration
    frame_len: Option<u32>,
    /// Config the history was recorded under
    config: Option<ConfigId>,
    /// Payload size for `config`
    expected_size: usize,
    /// Snapshot on screen while rewinding; returned to history on resume
    restored: Option<Snapshot>,
}

impl RewindController {
    pub fn new(config: RewindConfig) -> Self {
        RewindController {
            buffer: RewindBuffer::new(config.capacity),
            state: RewindState::Forward,
            recording: config.enabled,
            frame_len: None,
            config: None,
            expected_size: 0,
            restored: None,
        }
    }

    pub fn state(&self) -> RewindState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Turn per-frame recording on or off. History already held is kept.
    pub fn set_recording(&mut self, on: bool) {
        if on != self.recording {
            info!("Rewind recording {}", if on { "enabled" } else { "disabled" });
        }
        self.recording = on;
    }

    /// Snapshots available to step back through.
    pub fn history_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &RewindBuffer {
        &self.buffer
    }

    /// Drop all history and return to forward play.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = RewindState::Forward;
        self.frame_len = None;
        self.restored = None;
    }

    /// Tick length of the frame restored this iteration, for audio timing.
    /// `None` unless the last `handle_rewind` stepped backward.
    pub fn get_frame_len(&self) -> Option<u32> {
        self.frame_len
    }

    /// Notice a config change on the machine.
    ///
    /// History from the old config is discarded and the payload size of the
    /// new one is recorded. Returns true if the config changed.
    pub fn sync_config<M: Machine + ?Sized>(&mut self, machine: &mut M) -> bool {
        let live = machine.config_id();
        if self.config == Some(live) {
            return false;
        }
        if let Some(old) = self.config {
            info!("Machine config changed {} -> {}, dropping {} rewind frames", old, live, self.buffer.len());
        }
        self.clear();
        self.config = Some(live);
        self.expected_size = measure(machine);
        debug!("Rewind tracking config {} ({} bytes per frame)", live, self.expected_size);
        true
    }

    /// Sample the rewind input for this iteration.
    ///
    /// Returns [`Direction::Backward`] when a snapshot was restored, in which
    /// case the caller presents it and must not run the machine.
    pub fn handle_rewind<M: Machine + ?Sized>(
        &mut self,
        machine: &mut M,
        ctx: &mut EmuContext,
        do_rewind: bool,
    ) -> Result<Direction, StateError> {
        self.sync_config(machine);
        ctx.is_backwards_frame = false;
        self.frame_len = None;
        let do_rewind = do_rewind && ctx.rewind_enabled;

        match (self.state, do_rewind) {
            (RewindState::Forward, false) => Ok(Direction::Forward),
            (RewindState::Forward, true) => {
                if self.buffer.is_empty() {
                    debug!("Rewind requested with no history");
                    return Ok(Direction::Forward);
                }
                debug!("Rewind start, {} frames available", self.buffer.len());
                self.state = RewindState::Rewinding;
                self.step_back(machine, ctx)
            }
            (RewindState::Rewinding, true) => self.step_back(machine, ctx),
            (RewindState::Rewinding, false) => {
                self.resume();
                debug!("Rewind released, resuming with {} frames of history", self.buffer.len());
                Ok(Direction::Forward)
            }
        }
    }

    fn step_back<M: Machine + ?Sized>(&mut self, machine: &mut M, ctx: &mut EmuContext) -> Result<Direction, StateError> {
        let snap = match self.buffer.pop_newest() {
            Some(snap) => snap,
            None => {
                debug!("Rewind history exhausted");
                self.resume();
                return Ok(Direction::Forward);
            }
        };
        if let Err(e) = restore(machine, &snap) {
            warn!("Rewind restore failed: {}", e);
            self.resume();
            return Err(e);
        }
        self.frame_len = Some(snap.frame_ticks());
        ctx.is_backwards_frame = true;
        self.restored = Some(snap);
        Ok(Direction::Backward)
    }

    /// Back to forward play. The frame left on screen is the present again,
    /// so it goes back into history.
    fn resume(&mut self) {
        self.state = RewindState::Forward;
        if let Some(snap) = self.restored.take() {
            self.buffer.push(snap);
        }
    }

    /// Record the frame that just completed.
    ///
    /// Does nothing while rewinding, with recording off, or with rewind
    /// disabled on the context. A capture whose size differs from what the
    /// config was first measured at is rejected.
    pub fn frame_completed<M: Machine + ?Sized>(
        &mut self,
        machine: &mut M,
        ctx: &mut EmuContext,
        ticks: u32,
    ) -> Result<(), StateError> {
        self.sync_config(machine);
        if !self.recording || !ctx.rewind_enabled || self.state != RewindState::Forward {
            return Ok(());
        }
        let snap = capture(machine, ticks)?;
        if snap.len() != self.expected_size {
            warn!(
                "Rewind frame size drifted to {} bytes (config {} expects {})",
                snap.len(),
                snap.config(),
                self.expected_size
            );
            return Err(StateError::CorruptState { expected: self.expected_size, found: snap.len() });
        }
        self.buffer.push(snap);
        Ok(())
    }

    /// One main loop iteration: rewind, or run a frame and record it.
    pub fn step<M: Machine + ?Sized>(
        &mut self,
        machine: &mut M,
        ctx: &mut EmuContext,
        do_rewind: bool,
    ) -> Result<Direction, StateError> {
        let dir = self.handle_rewind(machine, ctx, do_rewind)?;
        if dir == Direction::Forward {
            let ticks = machine.run_frame();
            self.frame_completed(machine, ctx, ticks)?;
        }
        Ok(dir)
    }
}

impl Default for RewindController {
    fn default() -> Self {
        Self::new(RewindConfig::default())
    }
}
