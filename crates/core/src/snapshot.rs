//! Machine snapshots and the rewind ring buffer.
//!
//! A [`Snapshot`] is the payload of one Save traversal taken at a frame
//! boundary. The [`RewindBuffer`] keeps the most recent snapshots, one per
//! frame, so gameplay can be stepped backward.
//!
//! ## Usage
//!
//! ```text
//! // GUI: hold Backspace (or the left shoulder button) to rewind
//! // Headless: --rewind-at F --rewind-for K
//! ```

use log::warn;

use crate::machine::ConfigId;

/// A frozen, immutable copy of the machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    payload: Box<[u8]>,
    /// Length in CPU ticks of the frame this snapshot was taken after
    frame_ticks: u32,
    config: ConfigId,
}

impl Snapshot {
    pub fn new(payload: Vec<u8>, frame_ticks: u32, config: ConfigId) -> Self {
        Snapshot { payload: payload.into_boxed_slice(), frame_ticks, config }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn frame_ticks(&self) -> u32 {
        self.frame_ticks
    }

    pub fn config(&self) -> ConfigId {
        self.config
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Ring buffer of per-frame snapshots for rewind.
///
/// Holds at most `capacity` entries; pushing onto a full buffer silently
/// evicts the oldest one. All entries always share a single [`ConfigId`].
pub struct RewindBuffer {
    buf: Vec<Option<Snapshot>>,
    /// Write position (next slot to overwrite)
    write_pos: usize,
    /// Number of valid snapshots
    count: usize,
    /// Config shared by every held snapshot
    config: Option<ConfigId>,
}

impl RewindBuffer {
    /// Create a new rewind buffer holding up to `capacity` snapshots.
    ///
    /// With capacity=600 this stores 10 seconds of rewind at 60fps.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!("rewind capacity 0 requested, using 1");
            1
        } else {
            capacity
        };
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        RewindBuffer { buf, write_pos: 0, count: 0, config: None }
    }

    /// Push a snapshot, evicting the oldest entry if full.
    ///
    /// A snapshot from a different config than the held entries empties the
    /// buffer first.
    pub fn push(&mut self, snap: Snapshot) {
        if let Some(held) = self.config {
            if held != snap.config() && self.count > 0 {
                warn!("rewind push under config {} while holding {}, clearing", snap.config(), held);
                self.clear();
            }
        }
        self.config = Some(snap.config());
        self.buf[self.write_pos] = Some(snap);
        self.write_pos = (self.write_pos + 1) % self.buf.len();
        if self.count < self.buf.len() {
            self.count += 1;
        }
    }

    /// Pop the most recent snapshot (for rewind). Returns None if empty.
    pub fn pop_newest(&mut self) -> Option<Snapshot> {
        if self.count == 0 {
            return None;
        }
        // Move write_pos back
        if self.write_pos == 0 {
            self.write_pos = self.buf.len() - 1;
        } else {
            self.write_pos -= 1;
        }
        self.count -= 1;
        self.buf[self.write_pos].take()
    }

    /// The snapshot `pop_newest` would return, left in place.
    pub fn peek_newest(&self) -> Option<&Snapshot> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.write_pos + self.buf.len() - 1) % self.buf.len();
        self.buf[idx].as_ref()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Config of the held snapshots, if any were pushed since the last clear.
    pub fn config(&self) -> Option<ConfigId> {
        self.config
    }

    /// Clear all snapshots.
    pub fn clear(&mut self) {
        for slot in self.buf.iter_mut() {
            *slot = None;
        }
        self.count = 0;
        self.write_pos = 0;
        self.config = None;
    }

    /// Bytes held by stored snapshots: payloads plus per-entry bookkeeping.
    pub fn memory_usage(&self) -> usize {
        self.buf.iter().flatten().map(|s| s.len() + std::mem::size_of::<Snapshot>()).sum()
    }
}
