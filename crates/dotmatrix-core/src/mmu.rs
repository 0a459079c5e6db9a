use crate::{apu::Apu, cartridge::Cartridge, input::Input, timer::Timer};

pub const VRAM_SIZE: usize = 0x2000;
pub const WRAM_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;
pub const HRAM_SIZE: usize = 0x7F;
pub const IO_SIZE: usize = 0x80;

// Post-boot-ROM values of the 0xFF40-0xFF4B LCD register block.
const BOOT_LCD_REGS: [u8; 12] = [
    0x91, 0x85, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFC, 0xFF, 0xFF, 0x00, 0x00,
];

/// Memory bus.
///
/// Decodes the 16-bit address space and owns every byte the guest can see:
/// the VRAM/WRAM/OAM/HRAM arrays, the I/O mirror, IE, and the nested
/// cartridge, joypad, timer and APU subsystems. The CPU and PPU borrow the
/// bus for the duration of a step; nothing holds a back-pointer.
pub struct Mmu {
    pub cart: Option<Cartridge>,
    pub boot_rom: Option<Vec<u8>>,
    pub boot_mapped: bool,
    pub vram: [u8; VRAM_SIZE],
    pub wram: [u8; WRAM_SIZE],
    pub oam: [u8; OAM_SIZE],
    pub hram: [u8; HRAM_SIZE],
    pub io: [u8; IO_SIZE],
    pub ie_reg: u8,
    pub if_reg: u8,
    pub input: Input,
    pub timer: Timer,
    pub apu: Apu,
}

impl Mmu {
    pub fn new() -> Self {
        Self::with_apu(Apu::new())
    }

    pub fn with_apu(apu: Apu) -> Self {
        let mut io = [0u8; IO_SIZE];
        io[0x00] = 0xCF; // JOYP idle
        io[0x02] = 0x7E; // SC
        io[0x40..0x4C].copy_from_slice(&BOOT_LCD_REGS[..]);

        Self {
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            vram: [0; VRAM_SIZE],
            wram: [0; WRAM_SIZE],
            oam: [0; OAM_SIZE],
            hram: [0; HRAM_SIZE],
            io,
            ie_reg: 0,
            if_reg: 0xE1,
            input: Input::new(),
            timer: Timer::new(),
            apu,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.boot_rom = Some(data);
        self.boot_mapped = true;
    }

    pub fn save_cart_ram(&mut self) {
        if let Some(cart) = &self.cart {
            if let Err(e) = cart.save_ram() {
                log::warn!("failed to save cartridge RAM: {e}");
            }
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x00FF if self.boot_mapped => self
                .boot_rom
                .as_ref()
                .and_then(|b| b.get(addr as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF => self.cart.as_ref().map(|c| c.read_rom(addr)).unwrap_or(0xFF),
            0x8000..=0x9FFF => self.vram[(addr - 0x8000) as usize],
            0xA000..=0xBFFF => self.cart.as_ref().map(|c| c.read_ram(addr)).unwrap_or(0xFF),
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            // Echo RAM mirrors 0xC000-0xDDFF.
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.input.read(),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize],
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write_rom(addr, val);
                }
            }
            0x8000..=0x9FFF => self.vram[(addr - 0x8000) as usize] = val,
            0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write_ram(addr, val);
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.input.write(val),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.if_reg = val,
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF44 => self.io[0x44] = 0, // LY is read-only; writes reset it
            0xFF46 => {
                self.io[0x46] = val;
                self.oam_dma(val);
            }
            0xFF50 => self.boot_mapped = false,
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize] = val,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
        }
    }

    /// OAM DMA: copy 160 bytes from `src_hi << 8` into OAM at write time.
    fn oam_dma(&mut self, src_hi: u8) {
        let src = (src_hi as u16) << 8;
        for i in 0..OAM_SIZE as u16 {
            self.oam[i as usize] = self.read_byte(src.wrapping_add(i));
        }
    }

    /// Serialize the bus-owned arrays in their canonical order.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.wram);
        out.extend_from_slice(&self.vram);
        out.extend_from_slice(&self.hram);
        out.extend_from_slice(&self.oam);
        out.extend_from_slice(&self.io);
        out.push(self.ie_reg);
        out.push(self.if_reg);
        out.push(self.input.buttons);
        out.push(self.input.select);
        out.push(self.boot_mapped as u8);
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::Reader<'_>,
    ) -> Result<(), crate::savestate::StateError> {
        self.wram.copy_from_slice(r.read_bytes(WRAM_SIZE)?);
        self.vram.copy_from_slice(r.read_bytes(VRAM_SIZE)?);
        self.hram.copy_from_slice(r.read_bytes(HRAM_SIZE)?);
        self.oam.copy_from_slice(r.read_bytes(OAM_SIZE)?);
        self.io.copy_from_slice(r.read_bytes(IO_SIZE)?);
        self.ie_reg = r.read_u8()?;
        self.if_reg = r.read_u8()?;
        self.input.buttons = r.read_u8()?;
        self.input.select = r.read_u8()?;
        self.boot_mapped = r.read_u8()? != 0;
        Ok(())
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}
