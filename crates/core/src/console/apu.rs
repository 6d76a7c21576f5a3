//! Audio unit registers and a simple square/triangle mixer.
//!
//! Channel timers, phase accumulators and the frame sequencer are all state
//! fields, as is the fractional sample clock, so audio after a restore
//! continues exactly where the snapshot left off.

use crate::state::{Stateful, Transfer};
use crate::CPU_HZ;

/// Output sample rate in Hz
pub const SAMPLE_RATE: u32 = 44_100;

/// Pulse duty cycles as fractions of a 32-bit phase.
const DUTY: [u32; 4] = [0x2000_0000, 0x4000_0000, 0x8000_0000, 0xC000_0000];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pulse {
    pub enabled: bool,
    pub duty: u8,
    pub volume: u8,
    /// 11-bit timer period
    pub period: u16,
    pub length: u8,
    pub phase: u32,
}

impl Pulse {
    fn sample(&mut self) -> f32 {
        if !self.enabled || self.period < 8 || self.length == 0 {
            return 0.0;
        }
        let freq = CPU_HZ as f64 / (16.0 * (self.period as f64 + 1.0));
        self.phase = self.phase.wrapping_add(phase_step(freq));
        if self.phase < DUTY[(self.duty & 3) as usize] {
            self.volume as f32
        } else {
            0.0
        }
    }

    fn transfer(&mut self, t: &mut Transfer<'_>, names: [&'static str; 6]) {
        t.value(names[0], &mut self.enabled);
        t.value(names[1], &mut self.duty);
        t.value(names[2], &mut self.volume);
        t.value(names[3], &mut self.period);
        t.value(names[4], &mut self.length);
        t.value(names[5], &mut self.phase);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Triangle {
    pub enabled: bool,
    pub period: u16,
    pub linear: u8,
    pub phase: u32,
}

impl Triangle {
    fn sample(&mut self) -> f32 {
        if !self.enabled || self.linear == 0 || self.period < 2 {
            return 0.0;
        }
        let freq = CPU_HZ as f64 / (32.0 * (self.period as f64 + 1.0));
        self.phase = self.phase.wrapping_add(phase_step(freq));
        // 32-step sequence 15..0, 0..15
        let step = (self.phase >> 27) as u8;
        let level = if step < 16 { 15 - step } else { step - 16 };
        level as f32
    }
}

/// 32-bit phase increment per output sample for a tone of `freq` Hz.
fn phase_step(freq: f64) -> u32 {
    ((freq / SAMPLE_RATE as f64) * 4_294_967_296.0) as u64 as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apu {
    pub pulse1: Pulse,
    pub pulse2: Pulse,
    pub triangle: Triangle,
    /// Frame sequencer: five-step mode flag
    pub five_step: bool,
    pub irq_inhibit: bool,
    pub frame_irq: bool,
    pub sequencer_step: u8,
    /// CPU cycles into the current sequencer step
    pub sequencer_cycles: u16,
    /// Fractional sample clock (ticks × SAMPLE_RATE, modulo CPU_HZ)
    pub sample_clock: u64,
}

/// CPU cycles per frame sequencer step (quarter frame)
const SEQUENCER_PERIOD: u16 = 7457;

impl Apu {
    pub fn new() -> Self {
        Apu {
            pulse1: Pulse::default(),
            pulse2: Pulse { duty: 1, ..Pulse::default() },
            triangle: Triangle::default(),
            five_step: false,
            irq_inhibit: false,
            frame_irq: false,
            sequencer_step: 0,
            sequencer_cycles: 0,
            sample_clock: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Apu::new();
    }

    /// Advance `ticks` CPU cycles, appending mixed samples to `out`.
    pub fn run(&mut self, ticks: u32, out: &mut Vec<f32>) {
        self.clock_sequencer(ticks);
        // A loaded clock can hold any value; keep it below one sample
        self.sample_clock %= CPU_HZ as u64;
        self.sample_clock += ticks as u64 * SAMPLE_RATE as u64;
        let n = self.sample_clock / CPU_HZ as u64;
        self.sample_clock %= CPU_HZ as u64;
        out.reserve(n as usize);
        for _ in 0..n {
            let p = self.pulse1.sample() + self.pulse2.sample();
            let tri = self.triangle.sample();
            out.push(0.00752 * p + 0.00851 * tri);
        }
    }

    /// Samples `ticks` cycles of output from the current state without
    /// advancing it. Used to present a frame that is played backward.
    pub fn preview(&self, ticks: u32) -> Vec<f32> {
        let mut apu = self.clone();
        let mut out = Vec::new();
        apu.run(ticks, &mut out);
        out
    }

    fn clock_sequencer(&mut self, ticks: u32) {
        let steps = if self.five_step { 5 } else { 4 };
        let mut remaining = ticks;
        while remaining > 0 {
            let left = SEQUENCER_PERIOD.saturating_sub(self.sequencer_cycles) as u32;
            if remaining < left {
                self.sequencer_cycles += remaining as u16;
                break;
            }
            remaining -= left;
            self.sequencer_cycles = 0;
            self.sequencer_step = (self.sequencer_step % steps + 1) % steps;
            // Half-frame: length counters
            if self.sequencer_step % 2 == 0 {
                for p in [&mut self.pulse1, &mut self.pulse2] {
                    p.length = p.length.saturating_sub(1);
                }
            }
            // Quarter-frame: linear counter
            self.triangle.linear = self.triangle.linear.saturating_sub(1);
            if self.sequencer_step == 0 && !self.five_step && !self.irq_inhibit {
                self.frame_irq = true;
            }
        }
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Stateful for Apu {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        self.pulse1.transfer(t, ["apu.p1.enabled", "apu.p1.duty", "apu.p1.volume", "apu.p1.period", "apu.p1.length", "apu.p1.phase"]);
        self.pulse2.transfer(t, ["apu.p2.enabled", "apu.p2.duty", "apu.p2.volume", "apu.p2.period", "apu.p2.length", "apu.p2.phase"]);
        t.value("apu.tri.enabled", &mut self.triangle.enabled);
        t.value("apu.tri.period", &mut self.triangle.period);
        t.value("apu.tri.linear", &mut self.triangle.linear);
        t.value("apu.tri.phase", &mut self.triangle.phase);
        t.value("apu.five_step", &mut self.five_step);
        t.value("apu.irq_inhibit", &mut self.irq_inhibit);
        t.value("apu.frame_irq", &mut self.frame_irq);
        t.value("apu.sequencer_step", &mut self.sequencer_step);
        t.value("apu.sequencer_cycles", &mut self.sequencer_cycles);
        t.value("apu.sample_clock", &mut self.sample_clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone() -> Apu {
        let mut apu = Apu::new();
        apu.pulse1 = Pulse { enabled: true, duty: 2, volume: 10, period: 0x0FD, length: 200, phase: 0 };
        apu
    }

    #[test]
    fn test_sample_count_per_frame() {
        let mut apu = tone();
        let mut out = Vec::new();
        apu.run(29781, &mut out);
        // 29781 * 44100 / 1789773 = 733.8
        assert_eq!(out.len(), 733);
        out.clear();
        apu.run(29781, &mut out);
        assert_eq!(out.len(), 734);
    }

    #[test]
    fn test_silent_when_disabled() {
        let mut apu = Apu::new();
        let mut out = Vec::new();
        apu.run(10_000, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_preview_does_not_advance() {
        let apu = tone();
        let before = apu.clone();
        let a = apu.preview(29781);
        let b = apu.preview(29781);
        assert_eq!(apu, before);
        assert_eq!(a, b);
        assert!(a.iter().any(|&s| s > 0.0));
    }

    #[test]
    fn test_sequencer_recovers_from_loaded_garbage() {
        let mut apu = tone();
        apu.sequencer_cycles = 0xFFFF;
        apu.sequencer_step = 0xFF;
        apu.sample_clock = u64::MAX;
        let mut out = Vec::new();
        apu.run(29781, &mut out);
        assert!(apu.sequencer_cycles < SEQUENCER_PERIOD);
        assert!(apu.sequencer_step < 4);
        assert!(out.len() <= 735);
    }

    #[test]
    fn test_frame_irq_in_four_step_mode() {
        let mut apu = Apu::new();
        let mut out = Vec::new();
        apu.run(SEQUENCER_PERIOD as u32 * 4, &mut out);
        assert_eq!(apu.sequencer_step, 0);
        assert!(apu.frame_irq);
    }
}
