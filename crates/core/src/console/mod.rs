//! Reference console: a NES-shaped [`Machine`].
//!
//! Carries the full register and memory set a save state has to capture
//! (CPU registers and interrupt latches, 2 KB work RAM, PPU registers and
//! memories, APU channels and sequencer, controller shift register, mapper
//! registers and cartridge RAM) and advances it with a deterministic
//! per-frame workload in place of instruction execution. Given the same
//! state and the same input, a frame always produces the same next state,
//! which is what makes rewind observable and testable.

pub mod apu;
pub mod cartridge;
pub mod cpu;
pub mod ppu;

use crate::error::{CartridgeError, StateError};
use crate::machine::{ConfigId, Machine};
use crate::snapshot::Snapshot;
use crate::state::{measure, read_fields, Stateful, Transfer};

pub use apu::Apu;
pub use cartridge::{Cartridge, Mapper, Mirroring};
pub use cpu::Cpu;
pub use ppu::{Ppu, NES_HEIGHT, NES_WIDTH};

/// CPU work RAM
pub const RAM_SIZE: usize = 2048;

// Work RAM locations used by the workload
const PLAYER_X: usize = 0x0300;
const PLAYER_Y: usize = 0x0301;
const PAD_STATE: usize = 0x00F0;
const FRAME_LO: usize = 0x00F1;

/// Controller buttons in shift-register order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Standard controller port ($4016).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Joypad {
    /// Live button state from the host; input, not machine state
    pub buttons: u8,
    pub shift: u8,
    pub strobe: bool,
}

impl Joypad {
    pub fn write(&mut self, value: u8) {
        self.strobe = value & 1 != 0;
        if self.strobe {
            self.shift = self.buttons;
        }
    }

    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons & 1;
        }
        let bit = self.shift & 1;
        self.shift = (self.shift >> 1) | 0x80;
        bit
    }
}

/// The reference console.
pub struct Console {
    pub cpu: Cpu,
    pub ram: Vec<u8>,
    pub ppu: Ppu,
    pub apu: Apu,
    pub joypad: Joypad,
    pub cart: Cartridge,
    /// Frames completed since power-on
    frame: u64,
    /// Workload PRNG
    rng_state: u32,
    /// PPU dots left over after the last whole CPU tick (0..3)
    dot_phase: u8,
    in_frame: bool,
    /// Samples produced by the last frame
    audio_out: Vec<f32>,
}

impl Console {
    pub fn new(cart: Cartridge) -> Self {
        let mut console = Console {
            cpu: Cpu::new(),
            ram: vec![0u8; RAM_SIZE],
            ppu: Ppu::new(),
            apu: Apu::new(),
            joypad: Joypad::default(),
            cart,
            frame: 0,
            rng_state: 0xDEAD_BEEF,
            dot_phase: 0,
            in_frame: false,
            audio_out: Vec::with_capacity(1024),
        };
        console.reset();
        console
    }

    /// Parse an iNES image and power on with it.
    pub fn from_ines(image: &[u8]) -> Result<Self, CartridgeError> {
        Ok(Console::new(Cartridge::from_ines(image)?))
    }

    /// Swap in a new cartridge. This changes the machine config.
    pub fn insert_cartridge(&mut self, cart: Cartridge) {
        self.cart = cart;
        self.ram.fill(0);
        self.ppu = Ppu::new();
        self.reset();
    }

    /// Soft reset. Work RAM and cartridge RAM survive; the config is unchanged.
    pub fn reset(&mut self) {
        let prg = self.cart.prg_rom();
        let vector = if prg.len() >= 4 {
            let base = prg.len() - 4;
            u16::from_le_bytes([prg[base], prg[base + 1]])
        } else {
            0x8000
        };
        self.cpu.reset(vector);
        self.ppu.reset();
        self.apu.reset();
        self.cart.reset();
        self.joypad = Joypad { buttons: self.joypad.buttons, ..Joypad::default() };
        self.frame = 0;
        self.rng_state = 0xDEAD_BEEF;
        self.dot_phase = 0;
        self.ram[PLAYER_X] = 120;
        self.ram[PLAYER_Y] = 112;
        // Game init: NMI on, background on
        self.ppu.ctrl = ppu::CTRL_NMI;
        self.ppu.mask = ppu::MASK_SHOW_BG;
    }

    pub fn set_button(&mut self, btn: Button, pressed: bool) {
        if pressed {
            self.joypad.buttons |= btn.mask();
        } else {
            self.joypad.buttons &= !btn.mask();
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Take the samples generated by the last frame.
    pub fn take_audio(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.audio_out)
    }

    /// Render the current picture as 0RGB pixels (256×240).
    pub fn framebuffer_u32(&self) -> Vec<u32> {
        let mut fb = vec![0u32; NES_WIDTH * NES_HEIGHT];
        self.ppu.render(&mut fb);
        fb
    }

    /// Audio unit state stored in a snapshot of a console.
    pub fn apu_from_snapshot(snap: &Snapshot) -> Result<Apu, StateError> {
        // Field order: cpu, ram, ppu, apu
        let start = measure(&mut Cpu::new()) + RAM_SIZE + measure(&mut Ppu::new());
        let mut apu = Apu::new();
        let end = start + measure(&mut apu);
        let bytes = snap
            .payload()
            .get(start..end)
            .ok_or(StateError::CorruptState { expected: end, found: snap.len() })?;
        read_fields(&mut apu, bytes)?;
        Ok(apu)
    }

    /// Samples of a frame `ticks` long, reversed, for presenting it backward.
    ///
    /// `before` is the snapshot taken at the end of the previous frame; a
    /// frame's audio depends only on the audio state it started from. With
    /// no older snapshot the frame is silent.
    pub fn backward_audio(before: Option<&Snapshot>, ticks: u32) -> Result<Vec<f32>, StateError> {
        let apu = match before {
            Some(snap) => Console::apu_from_snapshot(snap)?,
            None => Apu::new(),
        };
        let mut samples = apu.preview(ticks);
        samples.reverse();
        Ok(samples)
    }

    /// Simple xorshift PRNG
    fn next_random(&mut self) -> u8 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        (self.rng_state & 0xFF) as u8
    }

    /// Controller poll the way games do it: strobe, then eight reads.
    fn poll_pad(&mut self) -> u8 {
        self.joypad.write(1);
        self.joypad.write(0);
        (0..8).fold(0u8, |acc, i| acc | (self.joypad.read() << i))
    }

    /// The per-frame workload standing in for program execution.
    fn run_workload(&mut self, ticks: u32) {
        self.cpu.service_nmi(&mut self.ram, 0x8000);

        let pad = self.poll_pad();
        self.ram[PAD_STATE] = pad;
        let mut x = self.ram[PLAYER_X];
        let mut y = self.ram[PLAYER_Y];
        if pad & Button::Left.mask() != 0 { x = x.wrapping_sub(2); }
        if pad & Button::Right.mask() != 0 { x = x.wrapping_add(2); }
        if pad & Button::Up.mask() != 0 { y = y.saturating_sub(2); }
        if pad & Button::Down.mask() != 0 { y = y.saturating_add(2).min(NES_HEIGHT as u8 - 1); }
        self.ram[PLAYER_X] = x;
        self.ram[PLAYER_Y] = y;

        // Leave a trail in the nametable
        let tile = (y as usize / 8) * 32 + x as usize / 8;
        self.ppu.write_nametable(tile, 1 + (self.frame % 7) as u8);

        // Background churn in work RAM and OAM
        for _ in 0..4 {
            let r = self.next_random();
            let addr = 0x400 + ((r as usize) << 2 | (self.frame as usize & 3));
            self.ram[addr % RAM_SIZE] ^= r;
        }
        let r = self.next_random();
        self.ppu.oam[(self.frame % 64) as usize * 4] = r;

        if pad & Button::Select.mask() != 0 {
            let coarse = (self.ppu.coarse_x() as u8 + 1) & 0x1F;
            self.ppu.write_scroll(coarse << 3);
            self.ppu.write_scroll(0);
        }

        // Registers drift with the work done
        self.cpu.a = self.next_random();
        self.cpu.x = x;
        self.cpu.y = y;
        self.cpu.set_zn(self.cpu.a);
        self.cpu.pc = 0x8000 | ((self.cpu.pc.wrapping_add(ticks as u16)) & 0x7FFF);
        self.cpu.cycles = self.cpu.cycles.wrapping_add(ticks as u64);

        // Tone follows the player
        self.apu.pulse1.enabled = true;
        self.apu.pulse1.period = 0x80 + x as u16 * 2;
        self.apu.pulse1.volume = if pad & Button::A.mask() != 0 { 15 } else { 4 };
        self.apu.pulse1.length = 30;
        self.apu.triangle.enabled = pad & Button::B.mask() != 0;
        self.apu.triangle.period = 0x100 + y as u16 * 2;
        self.apu.triangle.linear = 8;

        // Save data and a bank switch now and then
        self.ram[FRAME_LO] = self.frame as u8;
        self.cart.write(0x6000, self.frame as u8);
        if self.frame % 60 == 0 {
            self.cart.write(0x8000, (self.frame / 60) as u8);
        }
    }
}

impl Stateful for Console {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        self.cpu.transfer_state(t);
        t.bytes("ram", &mut self.ram);
        self.ppu.transfer_state(t);
        self.apu.transfer_state(t);
        t.value("pad.shift", &mut self.joypad.shift);
        t.value("pad.strobe", &mut self.joypad.strobe);
        self.cart.transfer_state(t);
        t.value("console.frame", &mut self.frame);
        t.value("console.rng_state", &mut self.rng_state);
        t.value("console.dot_phase", &mut self.dot_phase);
    }
}

impl Machine for Console {
    fn run_frame(&mut self) -> u32 {
        self.in_frame = true;
        let dots = self.ppu.frame_dots() + self.dot_phase as u32;
        let ticks = dots / 3;
        self.dot_phase = (dots % 3) as u8;

        self.ppu.begin_frame();
        // Audio plays out the registers as they stood at frame start; writes
        // made by this frame's workload are heard next frame
        self.audio_out.clear();
        self.apu.run(ticks, &mut self.audio_out);
        self.run_workload(ticks);
        self.cpu.irq_line = self.apu.frame_irq;
        self.ppu.end_frame();
        if self.ppu.nmi_occurred {
            self.cpu.nmi_pending = true;
        }
        self.frame = self.frame.wrapping_add(1);
        self.in_frame = false;
        ticks
    }

    fn config_id(&self) -> ConfigId {
        self.cart.config_id()
    }

    fn mid_frame(&self) -> bool {
        self.in_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::cartridge::ines_image;
    use crate::savestate;
    use crate::state::{layout, measure, read_fields, write_fields};
    use proptest::prelude::*;

    fn console() -> Console {
        Console::from_ines(&ines_image(1, 2, 0, 1, true)).unwrap()
    }

    fn dump(c: &mut Console) -> Vec<u8> {
        let mut buf = vec![0u8; measure(c)];
        write_fields(c, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_frame_ticks_alternate() {
        let mut c = console();
        let ticks: Vec<u32> = (0..6).map(|_| c.run_frame()).collect();
        // 89342 / 3 and 89341 / 3 with the leftover dots carried
        assert!(ticks.iter().all(|&t| t == 29780 || t == 29781));
        assert_eq!(ticks.iter().map(|&t| t as u64).sum::<u64>(), (89342 * 3 + 89341 * 3) / 3);
    }

    #[test]
    fn test_deterministic() {
        let mut a = console();
        let mut b = console();
        for _ in 0..30 {
            a.run_frame();
            b.run_frame();
        }
        assert_eq!(dump(&mut a), dump(&mut b));
    }

    #[test]
    fn test_input_changes_state() {
        let mut a = console();
        let mut b = console();
        b.set_button(Button::Right, true);
        a.run_frame();
        b.run_frame();
        assert_eq!(b.ram[PLAYER_X], a.ram[PLAYER_X] + 2);
        assert_eq!(b.ram[PAD_STATE], Button::Right.mask());
    }

    #[test]
    fn test_state_roundtrip_continues_identically() {
        let mut a = console();
        for _ in 0..10 {
            a.run_frame();
        }
        let saved = dump(&mut a);

        let mut b = console();
        read_fields(&mut b, &saved).unwrap();
        for _ in 0..10 {
            a.run_frame();
            b.run_frame();
        }
        assert_eq!(dump(&mut a), dump(&mut b));
        assert_eq!(a.frame(), 20);
    }

    #[test]
    fn test_produces_audio() {
        let mut c = console();
        // Reset leaves the channels off; the tone is heard from frame 2
        c.run_frame();
        assert!(c.take_audio().iter().all(|&s| s == 0.0));
        let ticks = c.run_frame();
        let samples = c.take_audio();
        assert!(samples.len() >= 733 && samples.len() <= 735);
        assert!(samples.iter().any(|&s| s > 0.0));
        assert!(c.apu.preview(ticks).len() >= 733);
    }

    #[test]
    fn test_nmi_latched_at_vblank() {
        let mut c = console();
        c.run_frame();
        assert!(c.cpu.nmi_pending);
        assert!(!c.mid_frame());
    }

    #[test]
    fn test_soft_reset_keeps_config() {
        let mut c = console();
        let cfg = c.config_id();
        let size = measure(&mut c);
        c.run_frame();
        c.reset();
        assert_eq!(c.config_id(), cfg);
        assert_eq!(measure(&mut c), size);
    }

    #[test]
    fn test_joypad_shift_order() {
        let mut pad = Joypad { buttons: Button::A.mask() | Button::Right.mask(), ..Joypad::default() };
        pad.write(1);
        pad.write(0);
        let bits: Vec<u8> = (0..9).map(|_| pad.read()).collect();
        assert_eq!(bits, [1, 0, 0, 0, 0, 0, 0, 1, 1]);
    }

    /// Persist `payload` and bring it back through the save slot path.
    fn reload(c: &mut Console, payload: Vec<u8>) {
        let snap = Snapshot::new(payload, 0, c.config_id());
        let mut file = Vec::new();
        savestate::persist(&snap, &mut file).unwrap();
        let loaded = savestate::load_persisted(&file[..], c).unwrap();
        savestate::restore(c, &loaded).unwrap();
    }

    fn field_range(c: &mut Console, name: &str) -> std::ops::Range<usize> {
        let f = layout(c).into_iter().find(|f| f.name == name).unwrap();
        f.offset..f.offset + f.width
    }

    #[test]
    fn test_out_of_range_registers_run() {
        let mut c = console();
        c.run_frame();
        let mut payload = dump(&mut c);
        for name in ["apu.sequencer_cycles", "apu.sequencer_step", "apu.sample_clock", "cpu.cycles", "console.frame"] {
            let r = field_range(&mut c, name);
            payload[r].fill(0xFF);
        }
        let r = field_range(&mut c, "mmc1.shift_count");
        payload[r.start] = 0x10;
        let r = field_range(&mut c, "ram");
        payload[r.start + PLAYER_Y] = 0xFF;
        reload(&mut c, payload);
        assert_eq!(c.apu.sequencer_cycles, 0xFFFF);

        c.set_button(Button::Down, true);
        for _ in 0..4 {
            c.run_frame();
        }
        assert!(c.apu.sequencer_cycles < 7457);
        assert!(c.apu.sequencer_step < 4);
        assert!(c.ram[PLAYER_Y] < NES_HEIGHT as u8);
        match &c.cart.mapper {
            Mapper::Mmc1(m) => assert!(m.shift_count < 5),
            other => panic!("unexpected mapper {:?}", other),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn any_payload_runs(noise in proptest::collection::vec(any::<u8>(), 256), buttons in any::<u8>()) {
            let mut c = console();
            let len = measure(&mut c);
            let payload: Vec<u8> = (0..len).map(|i| noise[i % 256] ^ (i as u8)).collect();
            reload(&mut c, payload);
            c.joypad.buttons = buttons;
            // The first frame also spends whatever dot phase was loaded
            c.run_frame();
            for _ in 0..3 {
                let ticks = c.run_frame();
                prop_assert!(ticks == 29780 || ticks == 29781);
            }
        }
    }

    #[test]
    fn test_backward_audio_matches_recorded_frame() {
        let mut c = console();
        let mut snaps = Vec::new();
        let mut audio = Vec::new();
        for i in 0..6 {
            c.set_button(Button::Left, i % 2 == 0);
            c.set_button(Button::A, i % 3 == 0);
            let ticks = c.run_frame();
            audio.push(c.take_audio());
            snaps.push(savestate::capture(&mut c, ticks).unwrap());
        }
        // Frame 5 starts from the state after frame 4
        let back = Console::backward_audio(Some(&snaps[3]), snaps[4].frame_ticks()).unwrap();
        let mut expected = audio[4].clone();
        expected.reverse();
        assert_eq!(back, expected);
        assert_ne!(audio[4], audio[5]);
    }

    #[test]
    fn test_backward_audio_without_history_is_silent() {
        let samples = Console::backward_audio(None, 29781).unwrap();
        assert_eq!(samples.len(), 733);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_apu_from_short_snapshot() {
        let snap = Snapshot::new(vec![0u8; 64], 0, ConfigId(1));
        assert!(matches!(Console::apu_from_snapshot(&snap), Err(StateError::CorruptState { .. })));
    }
}
