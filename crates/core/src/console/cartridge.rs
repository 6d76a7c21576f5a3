//! iNES cartridge images and mapper register state.
//!
//! Only the parts of a cartridge that a save state has to capture are
//! modeled: bank registers, the MMC1 serial shift register, PRG-RAM and
//! CHR-RAM. PRG-ROM and CHR-ROM are immutable and never serialized.
//!
//! ## Header
//!
//! ```text
//! 0-3  "NES" 0x1A
//! 4    PRG-ROM size in 16 KB units
//! 5    CHR-ROM size in 8 KB units (0 = 8 KB CHR-RAM)
//! 6    flags 6: mirroring, battery, trainer, mapper low nibble
//! 7    flags 7: mapper high nibble
//! 8    PRG-RAM size in 8 KB units
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::CartridgeError;
use crate::machine::ConfigId;
use crate::state::{Stateful, Transfer};

const INES_MAGIC: &[u8; 4] = b"NES\x1A";
const HEADER_SIZE: usize = 16;
const TRAINER_SIZE: usize = 512;
const PRG_BANK: usize = 16 * 1024;
const CHR_BANK: usize = 8 * 1024;
const PRG_RAM_UNIT: usize = 8 * 1024;
/// Largest PRG-RAM any supported board carries
pub const MAX_PRG_RAM: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
}

/// MMC1 (SxROM) registers, loaded through a 5-bit serial port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mmc1 {
    pub shift: u8,
    pub shift_count: u8,
    pub control: u8,
    pub chr_bank0: u8,
    pub chr_bank1: u8,
    pub prg_bank: u8,
}

impl Mmc1 {
    fn write(&mut self, addr: u16, value: u8) {
        if value & 0x80 != 0 {
            self.shift = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            return;
        }
        if self.shift_count >= 5 {
            self.shift = 0;
            self.shift_count = 0;
        }
        self.shift |= (value & 1) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count == 5 {
            let data = self.shift;
            match addr {
                0x8000..=0x9FFF => self.control = data,
                0xA000..=0xBFFF => self.chr_bank0 = data,
                0xC000..=0xDFFF => self.chr_bank1 = data,
                _ => self.prg_bank = data,
            }
            self.shift = 0;
            self.shift_count = 0;
        }
    }
}

/// Board-specific register state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapper {
    Nrom,
    Mmc1(Mmc1),
    UxRom { bank: u8 },
    CnRom { bank: u8 },
}

impl Mapper {
    pub fn number(&self) -> u8 {
        match self {
            Mapper::Nrom => 0,
            Mapper::Mmc1(_) => 1,
            Mapper::UxRom { .. } => 2,
            Mapper::CnRom { .. } => 3,
        }
    }

    fn from_number(n: u8) -> Result<Self, CartridgeError> {
        match n {
            0 => Ok(Mapper::Nrom),
            1 => Ok(Mapper::Mmc1(Mmc1 { control: 0x0C, ..Mmc1::default() })),
            2 => Ok(Mapper::UxRom { bank: 0 }),
            3 => Ok(Mapper::CnRom { bank: 0 }),
            n => Err(CartridgeError::UnsupportedMapper(n)),
        }
    }
}

/// A loaded cartridge.
pub struct Cartridge {
    prg_rom: Vec<u8>,
    /// CHR-ROM, or CHR-RAM when `chr_is_ram`
    pub chr: Vec<u8>,
    chr_is_ram: bool,
    /// Battery-backed or work RAM at $6000-$7FFF
    pub prg_ram: Vec<u8>,
    pub mapper: Mapper,
    pub mirroring: Mirroring,
    pub battery: bool,
    config: ConfigId,
}

impl Cartridge {
    /// Parse an iNES image.
    ///
    /// PRG-RAM size comes from header byte 8. It is validated here, once,
    /// because it fixes the save state size for the lifetime of the ROM.
    pub fn from_ines(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() < 4 || &image[0..4] != INES_MAGIC {
            return Err(CartridgeError::BadMagic);
        }
        if image.len() < HEADER_SIZE {
            return Err(CartridgeError::Truncated { expected: HEADER_SIZE, found: image.len() });
        }
        let prg_size = image[4] as usize * PRG_BANK;
        let chr_size = image[5] as usize * CHR_BANK;
        let flags6 = image[6];
        let flags7 = image[7];
        let trainer = if flags6 & 0x04 != 0 { TRAINER_SIZE } else { 0 };
        let battery = flags6 & 0x02 != 0;
        let mapper_number = (flags7 & 0xF0) | (flags6 >> 4);
        let mapper = Mapper::from_number(mapper_number)?;

        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        let expected = HEADER_SIZE + trainer + prg_size + chr_size;
        if image.len() < expected {
            return Err(CartridgeError::Truncated { expected, found: image.len() });
        }

        // Byte 8 == 0 means "8 KB" on boards that have work RAM at all
        let prg_ram_size = match image[8] {
            0 if battery || mapper_number == 1 => PRG_RAM_UNIT,
            n => n as usize * PRG_RAM_UNIT,
        };
        if prg_ram_size > MAX_PRG_RAM || (prg_ram_size != 0 && !prg_ram_size.is_power_of_two()) {
            return Err(CartridgeError::InvalidPrgRam(prg_ram_size));
        }

        let prg_start = HEADER_SIZE + trainer;
        let prg_rom = image[prg_start..prg_start + prg_size].to_vec();
        let (chr, chr_is_ram) = if chr_size == 0 {
            (vec![0u8; CHR_BANK], true)
        } else {
            (image[prg_start + prg_size..expected].to_vec(), false)
        };

        let mut hasher = DefaultHasher::new();
        mapper_number.hash(&mut hasher);
        prg_ram_size.hash(&mut hasher);
        chr_is_ram.hash(&mut hasher);
        mirroring.hash(&mut hasher);
        prg_rom.hash(&mut hasher);
        if !chr_is_ram {
            chr.hash(&mut hasher);
        }

        Ok(Cartridge {
            prg_rom,
            chr,
            chr_is_ram,
            prg_ram: vec![0u8; prg_ram_size],
            mapper,
            mirroring,
            battery,
            config: ConfigId(hasher.finish()),
        })
    }

    pub fn config_id(&self) -> ConfigId {
        self.config
    }

    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_is_ram
    }

    /// CPU write to cartridge space ($6000-$FFFF).
    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                if !self.prg_ram.is_empty() {
                    let len = self.prg_ram.len();
                    self.prg_ram[(addr as usize - 0x6000) % len] = value;
                }
            }
            0x8000..=0xFFFF => match &mut self.mapper {
                Mapper::Nrom => {}
                Mapper::Mmc1(m) => m.write(addr, value),
                Mapper::UxRom { bank } => *bank = value & 0x0F,
                Mapper::CnRom { bank } => *bank = value & 0x03,
            },
            _ => {}
        }
    }

    /// Return registers to power-on values. RAM contents survive.
    pub fn reset(&mut self) {
        self.mapper = match self.mapper {
            Mapper::Nrom => Mapper::Nrom,
            Mapper::Mmc1(_) => Mapper::Mmc1(Mmc1 { control: 0x0C, ..Mmc1::default() }),
            Mapper::UxRom { .. } => Mapper::UxRom { bank: 0 },
            Mapper::CnRom { .. } => Mapper::CnRom { bank: 0 },
        };
    }
}

impl Stateful for Cartridge {
    fn transfer_state(&mut self, t: &mut Transfer<'_>) {
        match &mut self.mapper {
            Mapper::Nrom => {}
            Mapper::Mmc1(m) => {
                t.value("mmc1.shift", &mut m.shift);
                t.value("mmc1.shift_count", &mut m.shift_count);
                t.value("mmc1.control", &mut m.control);
                t.value("mmc1.chr_bank0", &mut m.chr_bank0);
                t.value("mmc1.chr_bank1", &mut m.chr_bank1);
                t.value("mmc1.prg_bank", &mut m.prg_bank);
            }
            Mapper::UxRom { bank } => t.value("uxrom.bank", bank),
            Mapper::CnRom { bank } => t.value("cnrom.bank", bank),
        }
        t.bytes("cart.prg_ram", &mut self.prg_ram);
        if self.chr_is_ram {
            t.bytes("cart.chr_ram", &mut self.chr);
        }
    }
}

/// Build a minimal iNES image, for tests and the frontend's demo cartridge.
pub fn ines_image(mapper: u8, prg_banks: u8, chr_banks: u8, prg_ram_units: u8, battery: bool) -> Vec<u8> {
    let mut image = vec![0u8; HEADER_SIZE];
    image[0..4].copy_from_slice(INES_MAGIC);
    image[4] = prg_banks;
    image[5] = chr_banks;
    image[6] = (mapper << 4) | if battery { 0x02 } else { 0 };
    image[7] = mapper & 0xF0;
    image[8] = prg_ram_units;
    let body = prg_banks as usize * PRG_BANK + chr_banks as usize * CHR_BANK;
    image.extend((0..body).map(|i| (i * 7) as u8));
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::measure;

    #[test]
    fn test_parse_nrom() {
        let cart = Cartridge::from_ines(&ines_image(0, 2, 1, 0, false)).unwrap();
        assert_eq!(cart.mapper, Mapper::Nrom);
        assert_eq!(cart.prg_rom().len(), 32 * 1024);
        assert!(cart.prg_ram.is_empty());
        assert!(!cart.chr_is_ram());
    }

    #[test]
    fn test_parse_mmc1_defaults_to_8k_ram() {
        let cart = Cartridge::from_ines(&ines_image(1, 8, 0, 0, true)).unwrap();
        assert_eq!(cart.mapper.number(), 1);
        assert_eq!(cart.prg_ram.len(), 8 * 1024);
        assert!(cart.chr_is_ram());
        assert!(cart.battery);
    }

    #[test]
    fn test_bad_magic() {
        let mut image = ines_image(0, 1, 1, 0, false);
        image[3] = 0;
        assert_eq!(Cartridge::from_ines(&image).err(), Some(CartridgeError::BadMagic));
    }

    #[test]
    fn test_truncated() {
        let mut image = ines_image(0, 1, 1, 0, false);
        image.truncate(1000);
        assert!(matches!(Cartridge::from_ines(&image), Err(CartridgeError::Truncated { .. })));
    }

    #[test]
    fn test_unsupported_mapper() {
        let image = ines_image(4, 1, 1, 0, false);
        assert_eq!(Cartridge::from_ines(&image).err(), Some(CartridgeError::UnsupportedMapper(4)));
    }

    #[test]
    fn test_prg_ram_size_validated() {
        // 24 KB is not a power of two
        let image = ines_image(1, 1, 0, 3, true);
        assert_eq!(Cartridge::from_ines(&image).err(), Some(CartridgeError::InvalidPrgRam(24 * 1024)));
        // 64 KB exceeds any supported board
        let image = ines_image(1, 1, 0, 8, true);
        assert_eq!(Cartridge::from_ines(&image).err(), Some(CartridgeError::InvalidPrgRam(64 * 1024)));
    }

    #[test]
    fn test_config_id_depends_on_shape() {
        let a = Cartridge::from_ines(&ines_image(1, 2, 0, 1, true)).unwrap();
        let b = Cartridge::from_ines(&ines_image(1, 2, 0, 2, true)).unwrap();
        let a2 = Cartridge::from_ines(&ines_image(1, 2, 0, 1, true)).unwrap();
        assert_ne!(a.config_id(), b.config_id());
        assert_eq!(a.config_id(), a2.config_id());
    }

    #[test]
    fn test_state_size_follows_prg_ram() {
        let mut small = Cartridge::from_ines(&ines_image(1, 2, 1, 1, true)).unwrap();
        let mut large = Cartridge::from_ines(&ines_image(1, 2, 1, 4, true)).unwrap();
        assert_eq!(measure(&mut small), 6 + 8 * 1024);
        assert_eq!(measure(&mut large), 6 + 32 * 1024);
    }

    #[test]
    fn test_mmc1_serial_write() {
        let mut cart = Cartridge::from_ines(&ines_image(1, 8, 1, 0, true)).unwrap();
        // Write 0b10011 to the PRG bank register, LSB first
        for bit in [1, 1, 0, 0, 1] {
            cart.write(0xE000, bit);
        }
        match &cart.mapper {
            Mapper::Mmc1(m) => {
                assert_eq!(m.prg_bank, 0b10011);
                assert_eq!(m.shift_count, 0);
            }
            other => panic!("unexpected mapper {:?}", other),
        }
    }

    #[test]
    fn test_mmc1_stale_shift_count_restarts() {
        let mut cart = Cartridge::from_ines(&ines_image(1, 8, 1, 0, true)).unwrap();
        if let Mapper::Mmc1(m) = &mut cart.mapper {
            m.shift_count = 0x10;
            m.shift = 0xFF;
        }
        for bit in [1, 0, 1, 0, 1] {
            cart.write(0xA000, bit);
        }
        match &cart.mapper {
            Mapper::Mmc1(m) => {
                assert_eq!(m.chr_bank0, 0b10101);
                assert_eq!(m.shift_count, 0);
            }
            other => panic!("unexpected mapper {:?}", other),
        }
    }

    #[test]
    fn test_prg_ram_write() {
        let mut cart = Cartridge::from_ines(&ines_image(1, 2, 1, 1, true)).unwrap();
        cart.write(0x6001, 0xAB);
        assert_eq!(cart.prg_ram[1], 0xAB);
    }
}
