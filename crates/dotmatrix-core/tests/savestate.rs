mod common;

use common::{gb_with_nops, make_rom};
use dotmatrix_core::{cartridge::Cartridge, gameboy::GameBoy, savestate::StateError};

#[test]
fn round_trip_restores_every_serialized_field() {
    let mut gb = gb_with_nops();
    gb.run_frame();
    gb.mmu.write_byte(0xC123, 0x42);
    gb.mmu.write_byte(0x8000, 0x99);
    gb.mmu.write_byte(0xFF85, 0x17);
    gb.run_frame();

    let snapshot = gb.save_state();
    let pc = gb.cpu.pc;
    let cycles = gb.cpu.cycles;

    // Diverge, then restore.
    gb.run_frame();
    gb.mmu.write_byte(0xC123, 0x00);
    assert_ne!(gb.cpu.pc, pc);

    gb.load_state(&snapshot).unwrap();
    assert_eq!(gb.cpu.pc, pc);
    assert_eq!(gb.cpu.cycles, cycles);
    assert_eq!(gb.mmu.read_byte(0xC123), 0x42);
    assert_eq!(gb.mmu.read_byte(0x8000), 0x99);
    assert_eq!(gb.mmu.read_byte(0xFF85), 0x17);

    // Re-serializing the restored machine reproduces the snapshot exactly.
    assert_eq!(gb.save_state(), snapshot);
}

#[test]
fn envelope_starts_with_magic_and_version() {
    let gb = gb_with_nops();
    let state = gb.save_state();
    assert_eq!(&state[..7], b"GBSTATE");
    assert_eq!(state[7], 1);
}

#[test]
fn bad_magic_refuses_load_and_leaves_state_untouched() {
    let mut gb = gb_with_nops();
    gb.run_frame();
    let mut state = gb.save_state();
    state[0] = b'X';

    let before = gb.cpu.debug_state();
    let err = gb.load_state(&state).unwrap_err();
    assert!(matches!(err, StateError::BadMagic));
    assert_eq!(gb.cpu.debug_state(), before);
}

#[test]
fn wrong_version_refuses_load() {
    let mut gb = gb_with_nops();
    let mut state = gb.save_state();
    state[7] = 9;

    let before = gb.cpu.debug_state();
    let err = gb.load_state(&state).unwrap_err();
    assert!(matches!(err, StateError::BadVersion(9)));
    assert_eq!(gb.cpu.debug_state(), before);
}

#[test]
fn truncated_payload_is_an_error() {
    let mut gb = gb_with_nops();
    let state = gb.save_state();
    assert!(matches!(
        gb.load_state(&state[..40]),
        Err(StateError::Truncated)
    ));
}

#[test]
fn cartridge_ram_and_banking_survive_the_trip() {
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::from_bytes(make_rom(0x13, 0x03, 8)).unwrap());

    gb.mmu.write_byte(0x0000, 0x0A); // enable RAM
    gb.mmu.write_byte(0x4000, 0x02); // RAM bank 2
    gb.mmu.write_byte(0xA000, 0x5A);
    gb.mmu.write_byte(0x2000, 0x05); // ROM bank 5

    let snapshot = gb.save_state();
    gb.mmu.write_byte(0xA000, 0x00);
    gb.mmu.write_byte(0x2000, 0x01);

    gb.load_state(&snapshot).unwrap();
    assert_eq!(gb.mmu.read_byte(0xA000), 0x5A);
    assert_eq!(gb.mmu.read_byte(0x4000), 5, "ROM bank restored");
}

#[test]
fn framebuffer_contents_survive_the_trip() {
    let mut gb = gb_with_nops();
    for i in 0..16u16 {
        gb.mmu.write_byte(0x8000 + i, 0xFF);
    }
    gb.mmu.write_byte(0xFF47, 0xE4);
    gb.run_frame();
    assert!(gb.framebuffer().iter().all(|&px| px == 3));

    let snapshot = gb.save_state();
    let mut other = gb_with_nops();
    other.load_state(&snapshot).unwrap();
    assert!(other.framebuffer().iter().all(|&px| px == 3));
}
