use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

// A valid cartridge must at least contain the full header (0x0100-0x014F).
const MIN_ROM_SIZE: usize = 0x0150;

const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("failed to read ROM file: {0}")]
    Io(#[from] io::Error),
    #[error("ROM image is {0} bytes; a valid cartridge needs at least 0x150")]
    TooSmall(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    /// 9-bit day counter.
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcRegisters {
    /// Day-high register: day bit 8, halt (bit 6), carry (bit 7).
    pub fn day_high(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }

    fn set_day_high(&mut self, value: u8) {
        self.days = (self.days & 0x00FF) | (((value & 0x01) as u16) << 8);
        self.halt = value & 0x40 != 0;
        self.carry = value & 0x80 != 0;
    }
}

/// MBC3 real-time clock.
///
/// The live registers advance with emulated time; reads go through a latched
/// copy refreshed by the 0x00->0x01 latch sequence.
#[derive(Debug, Clone)]
pub struct Rtc {
    regs: RtcRegisters,
    latched: RtcRegisters,
    subsecond_cycles: u32,
}

impl Rtc {
    fn new() -> Self {
        Self {
            regs: RtcRegisters::default(),
            latched: RtcRegisters::default(),
            subsecond_cycles: 0,
        }
    }

    fn latch(&mut self) {
        self.latched = self.regs;
    }

    fn read_latched(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.latched.seconds & 0x3F,
            0x09 => self.latched.minutes & 0x3F,
            0x0A => self.latched.hours & 0x1F,
            0x0B => (self.latched.days & 0x00FF) as u8,
            0x0C => self.latched.day_high(),
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => {
                self.regs.seconds = value & 0x3F;
                self.subsecond_cycles = 0;
            }
            0x09 => self.regs.minutes = value & 0x3F,
            0x0A => self.regs.hours = value & 0x1F,
            0x0B => self.regs.days = (self.regs.days & 0x0100) | value as u16,
            0x0C => self.regs.set_day_high(value),
            _ => {}
        }
        self.latch();
    }

    fn step(&mut self, cycles: u32) {
        if self.regs.halt {
            return;
        }
        self.subsecond_cycles += cycles;
        while self.subsecond_cycles >= RTC_CYCLES_PER_SECOND {
            self.subsecond_cycles -= RTC_CYCLES_PER_SECOND;
            self.advance_second();
        }
    }

    fn advance_second(&mut self) {
        self.regs.seconds = (self.regs.seconds + 1) & 0x3F;
        if self.regs.seconds != 60 {
            return;
        }
        self.regs.seconds = 0;
        self.regs.minutes = (self.regs.minutes + 1) & 0x3F;
        if self.regs.minutes != 60 {
            return;
        }
        self.regs.minutes = 0;
        self.regs.hours = (self.regs.hours + 1) & 0x1F;
        if self.regs.hours != 24 {
            return;
        }
        self.regs.hours = 0;
        if self.regs.days == 0x01FF {
            self.regs.days = 0;
            self.regs.carry = true;
        } else {
            self.regs.days += 1;
        }
    }

    pub fn registers(&self) -> RtcRegisters {
        self.regs
    }

    pub fn latched_registers(&self) -> RtcRegisters {
        self.latched
    }

    pub fn restore(&mut self, regs: RtcRegisters, latched: RtcRegisters) {
        self.regs = regs;
        self.latched = latched;
        self.subsecond_cycles = 0;
    }
}

#[derive(Debug)]
enum MbcState {
    None,
    Mbc1 {
        rom_bank: u8,
        bank_hi: u8,
        mode: u8,
        ram_enabled: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enabled: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enabled: bool,
        rtc: Option<Rtc>,
        latch_pending: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enabled: bool,
    },
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub title: String,
    cart_type: u8,
    save_path: Option<PathBuf>,
    state: MbcState,
}

impl Cartridge {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(&path)?;
        let mut cart = Self::from_bytes(data)?;

        if cart.has_battery() {
            let mut save = PathBuf::from(path.as_ref());
            save.set_extension("sav");
            cart.save_path = Some(save.clone());
            if let Ok(bytes) = fs::read(&save) {
                for (d, s) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *d = *s;
                }
            }
        }

        info!(
            "loaded ROM \"{}\" ({} KiB, {:?}, {} KiB RAM)",
            cart.title,
            cart.rom.len() / 1024,
            cart.mbc,
            cart.ram.len() / 1024
        );
        Ok(cart)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, CartridgeError> {
        if data.len() < MIN_ROM_SIZE {
            return Err(CartridgeError::TooSmall(data.len()));
        }

        let header = Header::parse(&data);
        let cart_type = header.cart_type();
        let mbc = header.mbc_type();
        let ram_size = header.ram_size();
        let title = header.title();

        let state = match mbc {
            MbcType::None | MbcType::Unknown(_) => MbcState::None,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                bank_hi: 0,
                mode: 0,
                ram_enabled: false,
            },
            MbcType::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enabled: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enabled: false,
                rtc: header.has_rtc().then(Rtc::new),
                latch_pending: false,
            },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enabled: false,
            },
        };

        Ok(Self {
            rom: data,
            ram: vec![0; ram_size],
            mbc,
            title,
            cart_type,
            save_path: None,
            state,
        })
    }

    /// Read from the 0x0000-0x7FFF ROM window.
    pub fn read_rom(&self, addr: u16) -> u8 {
        if addr < 0x4000 {
            return self.rom.get(addr as usize).copied().unwrap_or(0xFF);
        }
        let bank = self.effective_rom_bank();
        let offset = bank * ROM_BANK_SIZE + (addr as usize - 0x4000);
        self.rom.get(offset).copied().unwrap_or(0xFF)
    }

    fn effective_rom_bank(&self) -> usize {
        match &self.state {
            MbcState::None => 1,
            MbcState::Mbc1 {
                rom_bank,
                bank_hi,
                mode,
                ..
            } => {
                if *mode == 0 {
                    ((*bank_hi as usize) << 5) | *rom_bank as usize
                } else {
                    *rom_bank as usize
                }
            }
            MbcState::Mbc2 { rom_bank, .. } => *rom_bank as usize,
            MbcState::Mbc3 { rom_bank, .. } => *rom_bank as usize,
            MbcState::Mbc5 { rom_bank, .. } => *rom_bank as usize,
        }
    }

    /// The 0x0000-0x7FFF write window is the MBC control channel.
    pub fn write_rom(&mut self, addr: u16, val: u8) {
        match &mut self.state {
            MbcState::None => {}
            MbcState::Mbc1 {
                rom_bank,
                bank_hi,
                mode,
                ram_enabled,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = val & 0x1F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
                0x4000..=0x5FFF => *bank_hi = val & 0x03,
                0x6000..=0x7FFF => *mode = val & 0x01,
                _ => {}
            },
            MbcState::Mbc2 {
                rom_bank,
                ram_enabled,
            } => {
                // One control region; address bit 8 picks the target.
                if addr <= 0x3FFF {
                    if addr & 0x0100 == 0 {
                        *ram_enabled = val & 0x0F == 0x0A;
                    } else {
                        *rom_bank = val & 0x0F;
                        if *rom_bank == 0 {
                            *rom_bank = 1;
                        }
                    }
                }
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enabled,
                rtc,
                latch_pending,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = val & 0x7F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
                0x4000..=0x5FFF => *ram_bank = val,
                0x6000..=0x7FFF => {
                    if val == 0x00 {
                        *latch_pending = true;
                    } else {
                        if val == 0x01 && *latch_pending {
                            if let Some(rtc) = rtc {
                                rtc.latch();
                            }
                        }
                        *latch_pending = false;
                    }
                }
                _ => {}
            },
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enabled,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = val & 0x0F == 0x0A,
                // Bank 0 is a legal selection on MBC5.
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | val as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0x0FF) | (((val & 0x01) as u16) << 8),
                0x4000..=0x5FFF => *ram_bank = val & 0x0F,
                _ => {}
            },
        }
    }

    /// Read from the 0xA000-0xBFFF external RAM window.
    pub fn read_ram(&self, addr: u16) -> u8 {
        let offset = (addr as usize - 0xA000) & (RAM_BANK_SIZE - 1);
        match &self.state {
            MbcState::None => self.ram.get(offset).copied().unwrap_or(0xFF),
            MbcState::Mbc1 {
                bank_hi,
                mode,
                ram_enabled,
                ..
            } => {
                if !*ram_enabled {
                    return 0xFF;
                }
                let bank = if *mode == 1 { *bank_hi as usize } else { 0 };
                self.ram
                    .get(bank * RAM_BANK_SIZE + offset)
                    .copied()
                    .unwrap_or(0xFF)
            }
            MbcState::Mbc2 { ram_enabled, .. } => {
                if !*ram_enabled {
                    return 0xFF;
                }
                // 512 half-bytes addressed by the low 9 bits; the upper
                // nibble is undefined and reads as 0.
                let idx = (addr as usize - 0xA000) & 0x01FF;
                self.ram.get(idx).copied().unwrap_or(0) & 0x0F
            }
            MbcState::Mbc3 {
                ram_bank,
                ram_enabled,
                rtc,
                ..
            } => {
                if !*ram_enabled {
                    return 0xFF;
                }
                match *ram_bank {
                    0x00..=0x03 => self
                        .ram
                        .get(*ram_bank as usize * RAM_BANK_SIZE + offset)
                        .copied()
                        .unwrap_or(0xFF),
                    0x08..=0x0C => rtc
                        .as_ref()
                        .map(|r| r.read_latched(*ram_bank))
                        .unwrap_or(0xFF),
                    _ => 0xFF,
                }
            }
            MbcState::Mbc5 {
                ram_bank,
                ram_enabled,
                ..
            } => {
                if !*ram_enabled {
                    return 0xFF;
                }
                self.ram
                    .get(*ram_bank as usize * RAM_BANK_SIZE + offset)
                    .copied()
                    .unwrap_or(0xFF)
            }
        }
    }

    /// Write to the 0xA000-0xBFFF external RAM window. Writes to disabled or
    /// absent RAM are ignored.
    pub fn write_ram(&mut self, addr: u16, val: u8) {
        let offset = (addr as usize - 0xA000) & (RAM_BANK_SIZE - 1);
        match &mut self.state {
            MbcState::None => {
                if let Some(b) = self.ram.get_mut(offset) {
                    *b = val;
                }
            }
            MbcState::Mbc1 {
                bank_hi,
                mode,
                ram_enabled,
                ..
            } => {
                if !*ram_enabled {
                    return;
                }
                let bank = if *mode == 1 { *bank_hi as usize } else { 0 };
                if let Some(b) = self.ram.get_mut(bank * RAM_BANK_SIZE + offset) {
                    *b = val;
                }
            }
            MbcState::Mbc2 { ram_enabled, .. } => {
                if !*ram_enabled {
                    return;
                }
                let idx = (addr as usize - 0xA000) & 0x01FF;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val & 0x0F;
                }
            }
            MbcState::Mbc3 {
                ram_bank,
                ram_enabled,
                rtc,
                ..
            } => {
                if !*ram_enabled {
                    return;
                }
                match *ram_bank {
                    0x00..=0x03 => {
                        let idx = *ram_bank as usize * RAM_BANK_SIZE + offset;
                        if let Some(b) = self.ram.get_mut(idx) {
                            *b = val;
                        }
                    }
                    0x08..=0x0C => {
                        if let Some(rtc) = rtc.as_mut() {
                            rtc.write_register(*ram_bank, val);
                        }
                    }
                    _ => {}
                }
            }
            MbcState::Mbc5 {
                ram_bank,
                ram_enabled,
                ..
            } => {
                if !*ram_enabled {
                    return;
                }
                let idx = *ram_bank as usize * RAM_BANK_SIZE + offset;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val;
                }
            }
        }
    }

    /// Advance the RTC, if present, by `cycles` T-cycles of emulated time.
    pub fn step_rtc(&mut self, cycles: u32) {
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.state {
            rtc.step(cycles);
        }
    }

    pub fn rtc(&self) -> Option<&Rtc> {
        match &self.state {
            MbcState::Mbc3 { rtc: Some(rtc), .. } => Some(rtc),
            _ => None,
        }
    }

    pub fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        match &mut self.state {
            MbcState::Mbc3 { rtc: Some(rtc), .. } => Some(rtc),
            _ => None,
        }
    }

    fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    pub fn save_ram(&self) -> io::Result<()> {
        if let Some(path) = &self.save_path {
            if !self.ram.is_empty() {
                fs::write(path, &self.ram)?;
            }
        }
        Ok(())
    }

    /// Serialize banking registers and RTC for a save state: external RAM
    /// size + contents, then bank state, then both RTC register banks.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.ram.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.ram);

        let (rom_bank, bank_hi, mode, ram_enabled, latch_pending) = match &self.state {
            MbcState::None => (1u16, 0u8, 0u8, false, false),
            MbcState::Mbc1 {
                rom_bank,
                bank_hi,
                mode,
                ram_enabled,
            } => (*rom_bank as u16, *bank_hi, *mode, *ram_enabled, false),
            MbcState::Mbc2 {
                rom_bank,
                ram_enabled,
            } => (*rom_bank as u16, 0, 0, *ram_enabled, false),
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enabled,
                latch_pending,
                ..
            } => (*rom_bank as u16, *ram_bank, 0, *ram_enabled, *latch_pending),
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enabled,
            } => (*rom_bank, *ram_bank, 0, *ram_enabled, false),
        };
        out.extend_from_slice(&rom_bank.to_le_bytes());
        out.push(bank_hi);
        out.push(mode);
        let mut flags = 0u8;
        if ram_enabled {
            flags |= 0x01;
        }
        if latch_pending {
            flags |= 0x02;
        }
        out.push(flags);

        let (live, latched) = match self.rtc() {
            Some(rtc) => (rtc.registers(), rtc.latched_registers()),
            None => (RtcRegisters::default(), RtcRegisters::default()),
        };
        for regs in [live, latched] {
            out.push(regs.seconds);
            out.push(regs.minutes);
            out.push(regs.hours);
            out.extend_from_slice(&regs.days.to_le_bytes());
            out.push(regs.day_high() & 0xC0);
        }
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::Reader<'_>) -> Result<(), crate::savestate::StateError> {
        let ram_size = r.read_u32()? as usize;
        let ram = r.read_bytes(ram_size)?;
        for (d, s) in self.ram.iter_mut().zip(ram.iter()) {
            *d = *s;
        }

        let rom_bank = r.read_u16()?;
        let bank_hi = r.read_u8()?;
        let mode = r.read_u8()?;
        let flags = r.read_u8()?;
        let ram_enabled = flags & 0x01 != 0;
        let latch_pending = flags & 0x02 != 0;

        let mut rtc_banks = [RtcRegisters::default(); 2];
        for regs in rtc_banks.iter_mut() {
            regs.seconds = r.read_u8()?;
            regs.minutes = r.read_u8()?;
            regs.hours = r.read_u8()?;
            regs.days = r.read_u16()? & 0x01FF;
            let high = r.read_u8()?;
            regs.halt = high & 0x40 != 0;
            regs.carry = high & 0x80 != 0;
        }

        match &mut self.state {
            MbcState::None => {}
            MbcState::Mbc1 {
                rom_bank: rb,
                bank_hi: hi,
                mode: m,
                ram_enabled: en,
            } => {
                *rb = (rom_bank as u8) & 0x1F;
                *hi = bank_hi & 0x03;
                *m = mode & 0x01;
                *en = ram_enabled;
            }
            MbcState::Mbc2 {
                rom_bank: rb,
                ram_enabled: en,
            } => {
                *rb = (rom_bank as u8) & 0x0F;
                *en = ram_enabled;
            }
            MbcState::Mbc3 {
                rom_bank: rb,
                ram_bank: bk,
                ram_enabled: en,
                rtc,
                latch_pending: lp,
            } => {
                *rb = (rom_bank as u8) & 0x7F;
                *bk = bank_hi;
                *en = ram_enabled;
                *lp = latch_pending;
                if let Some(rtc) = rtc {
                    rtc.restore(rtc_banks[0], rtc_banks[1]);
                }
            }
            MbcState::Mbc5 {
                rom_bank: rb,
                ram_bank: bk,
                ram_enabled: en,
            } => {
                *rb = rom_bank & 0x1FF;
                *bk = bank_hi & 0x0F;
                *en = ram_enabled;
            }
        }
        Ok(())
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let mut slice = &self.data[0x0134..0x0144];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    fn mbc_type(&self) -> MbcType {
        match self.cart_type() {
            0x00 | 0x08 | 0x09 => MbcType::None,
            0x01..=0x03 => MbcType::Mbc1,
            0x05 | 0x06 => MbcType::Mbc2,
            0x0F..=0x13 => MbcType::Mbc3,
            0x19..=0x1E => MbcType::Mbc5,
            code => {
                warn!("unknown MBC code 0x{code:02X}; treating cartridge as ROM-only");
                MbcType::Unknown(code)
            }
        }
    }

    fn has_rtc(&self) -> bool {
        matches!(self.cart_type(), 0x0F | 0x10 | 0x13)
    }

    fn ram_size(&self) -> usize {
        // MBC2 carries 512x4-bit internal RAM regardless of the header code.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }

        match self.data[0x0149] {
            0x00 => 0,
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => {
                warn!("unsupported RAM size code 0x{code:02X}; defaulting to 32 KiB");
                0x8000
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_second_chain_rolls_over() {
        let mut rtc = Rtc::new();
        rtc.regs.seconds = 59;
        rtc.regs.minutes = 59;
        rtc.regs.hours = 23;
        rtc.regs.days = 4;
        rtc.advance_second();
        assert_eq!(rtc.regs.seconds, 0);
        assert_eq!(rtc.regs.minutes, 0);
        assert_eq!(rtc.regs.hours, 0);
        assert_eq!(rtc.regs.days, 5);
    }

    #[test]
    fn rtc_day_overflow_sets_carry() {
        let mut rtc = Rtc::new();
        rtc.regs.seconds = 59;
        rtc.regs.minutes = 59;
        rtc.regs.hours = 23;
        rtc.regs.days = 0x01FF;
        rtc.advance_second();
        assert_eq!(rtc.regs.days, 0);
        assert!(rtc.regs.carry);
    }

    #[test]
    fn rtc_halt_freezes_time() {
        let mut rtc = Rtc::new();
        rtc.write_register(0x0C, 0x40);
        rtc.step(RTC_CYCLES_PER_SECOND * 3);
        assert_eq!(rtc.regs.seconds, 0);

        rtc.write_register(0x0C, 0x00);
        rtc.step(RTC_CYCLES_PER_SECOND);
        assert_eq!(rtc.regs.seconds, 1);
    }

    #[test]
    fn rtc_seconds_write_resets_subsecond_phase() {
        let mut rtc = Rtc::new();
        rtc.step(RTC_CYCLES_PER_SECOND / 2);
        rtc.write_register(0x08, 30);
        rtc.step(RTC_CYCLES_PER_SECOND - 1);
        assert_eq!(rtc.regs.seconds, 30);
        rtc.step(1);
        assert_eq!(rtc.regs.seconds, 31);
    }
}
