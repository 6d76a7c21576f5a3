//! Minimal machine for unit tests.

use crate::machine::{ConfigId, Machine};
use crate::state::{Stateful, Transfer};

/// A machine whose entire state is one byte region plus a frame counter.
pub struct Blob {
    pub data: Vec<u8>,
    pub frames: u32,
    pub config: ConfigId,
    pub in_frame: bool,
}

impl Blob {
    /// `len` bytes of state in total (4 of them are the frame counter).
    pub fn new(len: usize, config: ConfigId) -> Self {
        assert!(len >= 4);
        Blob { data: vec![0u8; len - 4], frames: 0, config, in_frame: false }
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}

impl Stateful for Blob {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        t.value("blob.frames", &mut self.frames);
        t.bytes("blob.data", &mut self.data);
    }
}

impl Machine for Blob {
    fn run_frame(&mut self) -> u32 {
        self.frames += 1;
        let f = self.frames;
        for (i, b) in self.data.iter_mut().enumerate() {
            *b = b.wrapping_add((i as u32).wrapping_mul(31).wrapping_add(f) as u8);
        }
        // NTSC alternates 29780 / 29781
        29780 + (f & 1)
    }

    fn config_id(&self) -> ConfigId {
        self.config
    }

    fn mid_frame(&self) -> bool {
        self.in_frame
    }
}
