//! 6502 register file and interrupt latches.
//!
//! Instruction execution is not modeled; the console advances these
//! registers with its per-frame workload. What matters here is that every
//! piece of CPU state, including the pending interrupt latches and the cycle
//! counter, is a plain state field.

use crate::state::{Stateful, Transfer};

// Status register bits
pub const FLAG_C: u8 = 0x01;
pub const FLAG_Z: u8 = 0x02;
pub const FLAG_I: u8 = 0x04;
pub const FLAG_D: u8 = 0x08;
pub const FLAG_B: u8 = 0x10;
pub const FLAG_U: u8 = 0x20;
pub const FLAG_V: u8 = 0x40;
pub const FLAG_N: u8 = 0x80;

/// Address of the reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    /// Stack pointer (offset into page 1)
    pub s: u8,
    /// Status register: N V U B D I Z C (bits 7..0)
    pub p: u8,
    pub pc: u16,
    /// Monotonic cycle counter
    pub cycles: u64,
    /// NMI edge latched, serviced at the next instruction boundary
    pub nmi_pending: bool,
    /// Level-triggered IRQ line (APU frame counter, mapper)
    pub irq_line: bool,
    /// Cycles the CPU is stalled for (OAM/DMC DMA)
    pub stall: u16,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            a: 0,
            x: 0,
            y: 0,
            s: 0xFD,
            p: FLAG_I | FLAG_U,
            pc: 0,
            cycles: 0,
            nmi_pending: false,
            irq_line: false,
            stall: 0,
        }
    }

    /// Power-up state, with PC loaded from the reset vector.
    pub fn reset(&mut self, reset_vector: u16) {
        *self = Cpu::new();
        self.pc = reset_vector;
        // Reset takes 7 cycles
        self.cycles = 7;
    }

    #[inline(always)]
    pub fn flag(&self, mask: u8) -> bool {
        self.p & mask != 0
    }

    #[inline(always)]
    pub fn set_flag(&mut self, mask: u8, v: bool) {
        if v {
            self.p |= mask;
        } else {
            self.p &= !mask;
        }
    }

    /// Set Z and N from a result value.
    #[inline(always)]
    pub fn set_zn(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, value & 0x80 != 0);
    }

    /// Take a pending NMI: push PC and P, jump to the vector.
    pub fn service_nmi(&mut self, ram: &mut [u8], vector: u16) {
        if !self.nmi_pending {
            return;
        }
        self.nmi_pending = false;
        self.push(ram, (self.pc >> 8) as u8);
        self.push(ram, self.pc as u8);
        self.push(ram, (self.p | FLAG_U) & !FLAG_B);
        self.set_flag(FLAG_I, true);
        self.pc = vector;
        self.cycles = self.cycles.wrapping_add(7);
    }

    fn push(&mut self, ram: &mut [u8], value: u8) {
        ram[0x100 + self.s as usize] = value;
        self.s = self.s.wrapping_sub(1);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Stateful for Cpu {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        t.value("cpu.a", &mut self.a);
        t.value("cpu.x", &mut self.x);
        t.value("cpu.y", &mut self.y);
        t.value("cpu.s", &mut self.s);
        t.value("cpu.p", &mut self.p);
        t.value("cpu.pc", &mut self.pc);
        t.value("cpu.cycles", &mut self.cycles);
        t.value("cpu.nmi_pending", &mut self.nmi_pending);
        t.value("cpu.irq_line", &mut self.irq_line);
        t.value("cpu.stall", &mut self.stall);
    }
}
