//! Picture unit registers and memories.
//!
//! Holds the register set ($2000-$2007 plus the internal v/t/x/w scroll
//! latches), OAM, nametable RAM and palette RAM. The pixel pipeline is not
//! modeled: [`Ppu::render`] draws the nametable as solid 8×8 blocks, which
//! is enough to see state travel backward and forward.

use crate::state::{Stateful, Transfer};

pub const NES_WIDTH: usize = 256;
pub const NES_HEIGHT: usize = 240;
pub const DOTS_PER_SCANLINE: u32 = 341;
pub const SCANLINES_PER_FRAME: u32 = 262;
/// Nametable RAM (two 1 KB screens)
pub const VRAM_SIZE: usize = 2048;

// PPUCTRL / PPUMASK / PPUSTATUS bits
pub const CTRL_NMI: u8 = 0x80;
pub const MASK_SHOW_BG: u8 = 0x08;
pub const MASK_SHOW_SPRITES: u8 = 0x10;
pub const STATUS_VBLANK: u8 = 0x80;
pub const STATUS_SPRITE0: u8 = 0x40;

/// 16 colors from the 2C02 system palette, enough for a block renderer.
const SYSTEM_COLORS: [u32; 16] = [
    0x00_626262, 0x00_001FB2, 0x00_2404C8, 0x00_5200B2, 0x00_730076, 0x00_800024, 0x00_730B00, 0x00_522800,
    0x00_244400, 0x00_005700, 0x00_005C00, 0x00_005324, 0x00_003C76, 0x00_000000, 0x00_ABABAB, 0x00_FFFEFF,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ppu {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    /// Current VRAM address (15 bits)
    pub v: u16,
    /// Temporary VRAM address / scroll latch
    pub t: u16,
    pub fine_x: u8,
    /// First/second write toggle shared by $2005/$2006
    pub w: bool,
    /// $2007 read buffer
    pub read_buffer: u8,
    pub scanline: i16,
    pub dot: u16,
    pub odd_frame: bool,
    /// NMI output latched at the start of vblank
    pub nmi_occurred: bool,
    pub oam: [u8; 256],
    pub vram: [u8; VRAM_SIZE],
    pub palette: [u8; 32],
}

impl Ppu {
    pub fn new() -> Self {
        let mut palette = [0u8; 32];
        for (i, p) in palette.iter_mut().enumerate() {
            *p = (i as u8 * 5) & 0x0F;
        }
        Ppu {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            v: 0,
            t: 0,
            fine_x: 0,
            w: false,
            read_buffer: 0,
            scanline: -1,
            dot: 0,
            odd_frame: false,
            nmi_occurred: false,
            oam: [0xFF; 256],
            vram: [0; VRAM_SIZE],
            palette,
        }
    }

    pub fn reset(&mut self) {
        self.ctrl = 0;
        self.mask = 0;
        self.w = false;
        self.read_buffer = 0;
        self.odd_frame = false;
        self.scanline = -1;
        self.dot = 0;
    }

    pub fn rendering_enabled(&self) -> bool {
        self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES) != 0
    }

    /// Dots in the frame about to run. With rendering on, odd frames skip
    /// the idle dot of the pre-render line.
    pub fn frame_dots(&self) -> u32 {
        let full = DOTS_PER_SCANLINE * SCANLINES_PER_FRAME;
        if self.odd_frame && self.rendering_enabled() {
            full - 1
        } else {
            full
        }
    }

    /// Pre-render line: clear vblank and sprite flags.
    pub fn begin_frame(&mut self) {
        self.status &= !(STATUS_VBLANK | STATUS_SPRITE0);
        self.nmi_occurred = false;
        self.scanline = -1;
        self.dot = 0;
    }

    /// Enter vblank at scanline 241, dot 1.
    pub fn end_frame(&mut self) {
        self.status |= STATUS_VBLANK;
        self.nmi_occurred = self.ctrl & CTRL_NMI != 0;
        self.odd_frame = !self.odd_frame;
        self.scanline = 241;
        self.dot = 1;
    }

    /// $2005 write.
    pub fn write_scroll(&mut self, value: u8) {
        if !self.w {
            self.t = (self.t & !0x001F) | (value as u16 >> 3);
            self.fine_x = value & 0x07;
        } else {
            self.t = (self.t & !0x73E0) | ((value as u16 & 0x07) << 12) | ((value as u16 & 0xF8) << 2);
        }
        self.w = !self.w;
    }

    /// Coarse X scroll in tiles.
    pub fn coarse_x(&self) -> usize {
        (self.t & 0x1F) as usize
    }

    pub fn write_nametable(&mut self, index: usize, value: u8) {
        self.vram[index % VRAM_SIZE] = value;
    }

    /// Draw the first nametable as 8×8 color blocks into a 256×240 buffer.
    pub fn render(&self, out: &mut [u32]) {
        let scroll = self.coarse_x();
        for ty in 0..NES_HEIGHT / 8 {
            for tx in 0..NES_WIDTH / 8 {
                let tile = self.vram[ty * 32 + (tx + scroll) % 32];
                let color = SYSTEM_COLORS[(self.palette[(tile & 0x1F) as usize] & 0x0F) as usize];
                for py in 0..8 {
                    let row = (ty * 8 + py) * NES_WIDTH + tx * 8;
                    out[row..row + 8].fill(color);
                }
            }
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Stateful for Ppu {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        t.value("ppu.ctrl", &mut self.ctrl);
        t.value("ppu.mask", &mut self.mask);
        t.value("ppu.status", &mut self.status);
        t.value("ppu.oam_addr", &mut self.oam_addr);
        t.value("ppu.v", &mut self.v);
        t.value("ppu.t", &mut self.t);
        t.value("ppu.fine_x", &mut self.fine_x);
        t.value("ppu.w", &mut self.w);
        t.value("ppu.read_buffer", &mut self.read_buffer);
        t.value("ppu.scanline", &mut self.scanline);
        t.value("ppu.dot", &mut self.dot);
        t.value("ppu.odd_frame", &mut self.odd_frame);
        t.value("ppu.nmi_occurred", &mut self.nmi_occurred);
        t.bytes("ppu.oam", &mut self.oam);
        t.bytes("ppu.vram", &mut self.vram);
        t.bytes("ppu.palette", &mut self.palette);
    }
}
