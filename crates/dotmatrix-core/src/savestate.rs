use thiserror::Error;

use crate::gameboy::GameBoy;

/// Save-state file envelope: magic, version byte, then each component's
/// fields in a fixed order (CPU, bus arrays, cartridge, PPU, APU, timer).
pub const MAGIC: &[u8; 7] = b"GBSTATE";
pub const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("not a save state (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {0}")]
    BadVersion(u8),
    #[error("save state is truncated")]
    Truncated,
}

/// Little-endian cursor over a state payload. Every read is bounds-checked
/// so a short file surfaces as `Truncated` instead of a panic.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StateError> {
        let end = self.pos.checked_add(len).ok_or(StateError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(StateError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, StateError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, StateError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}

/// Serialize the complete machine state.
pub fn save(gb: &GameBoy) -> Vec<u8> {
    let mut out = Vec::with_capacity(0x10000);
    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    gb.cpu.save_state(&mut out);
    gb.mmu.save_state(&mut out);
    if let Some(cart) = &gb.mmu.cart {
        out.push(1);
        cart.save_state(&mut out);
    } else {
        out.push(0);
    }
    gb.ppu.save_state(&mut out);
    gb.mmu.apu.save_state(&mut out);

    let timer = &gb.mmu.timer;
    out.push(timer.div);
    out.push(timer.tima);
    out.push(timer.tma);
    out.push(timer.tac);
    out.extend_from_slice(&timer.div_counter.to_le_bytes());
    out.extend_from_slice(&timer.tima_counter.to_le_bytes());

    out
}

/// Restore a state produced by [`save`]. A bad magic or version refuses the
/// load without touching the emulator.
pub fn load(gb: &mut GameBoy, data: &[u8]) -> Result<(), StateError> {
    let mut r = Reader::new(data);

    if r.read_bytes(MAGIC.len())? != MAGIC {
        return Err(StateError::BadMagic);
    }
    let version = r.read_u8()?;
    if version != VERSION {
        return Err(StateError::BadVersion(version));
    }

    gb.cpu.load_state(&mut r)?;
    gb.mmu.load_state(&mut r)?;
    if r.read_u8()? != 0 {
        match gb.mmu.cart.as_mut() {
            Some(cart) => cart.load_state(&mut r)?,
            None => {
                // No cartridge inserted: skip the block (RAM contents plus
                // the fixed-size bank/RTC tail) to keep the cursor aligned.
                let ram_size = r.read_u32()? as usize;
                r.read_bytes(ram_size + 17)?;
            }
        }
    }
    gb.ppu.load_state(&mut r)?;
    gb.mmu.apu.load_state(&mut r)?;

    let timer = &mut gb.mmu.timer;
    timer.div = r.read_u8()?;
    timer.tima = r.read_u8()?;
    timer.tma = r.read_u8()?;
    timer.tac = r.read_u8()? & 0x07;
    timer.div_counter = r.read_u32()?;
    timer.tima_counter = r.read_u32()?;

    Ok(())
}
