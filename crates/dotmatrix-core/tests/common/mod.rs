#![allow(dead_code)]

use dotmatrix_core::{cartridge::Cartridge, gameboy::GameBoy};

/// Build a synthetic ROM of `banks` 16 KiB banks with the given header
/// bytes. Each bank's first byte is stamped with its index so bank-mapping
/// tests can tell them apart.
pub fn make_rom(cart_type: u8, ram_code: u8, banks: usize) -> Vec<u8> {
    let banks = banks.max(2);
    let mut rom = vec![0u8; 0x4000 * banks];
    rom[0x0147] = cart_type;
    rom[0x0149] = ram_code;
    for bank in 0..banks {
        rom[bank * 0x4000] = bank as u8;
    }
    rom
}

/// A machine with a flat 32 KiB ROM whose entry point holds `program`.
pub fn gb_with_program(program: &[u8]) -> GameBoy {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::from_bytes(rom).expect("synthetic ROM must parse"));
    gb
}

/// A machine running an all-NOP ROM.
pub fn gb_with_nops() -> GameBoy {
    gb_with_program(&[])
}

/// Step whole instructions until the PPU reports a finished frame, and
/// return the CPU cycle counter at that point.
pub fn run_until_frame(gb: &mut GameBoy) -> u64 {
    while !gb.frame_ready() {
        gb.step();
    }
    gb.cpu.cycles
}
