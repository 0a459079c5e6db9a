mod common;

use common::gb_with_nops;
use dotmatrix_core::gameboy::{Config, GameBoy};

const FRAME_SEQ: u32 = 8192;

#[test]
fn trigger_enables_a_channel() {
    let mut gb = gb_with_nops();
    assert_eq!(gb.mmu.read_byte(0xFF26) & 0x02, 0, "channel 2 starts silent");

    gb.mmu.write_byte(0xFF17, 0xF0); // full volume, DAC on
    gb.mmu.write_byte(0xFF18, 0x00);
    gb.mmu.write_byte(0xFF19, 0x87); // trigger, frequency high bits
    assert_eq!(gb.mmu.read_byte(0xFF26) & 0x02, 0x02);
}

#[test]
fn trigger_with_dac_off_stays_silent() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF17, 0x00); // NRx2 high bits clear: DAC off
    gb.mmu.write_byte(0xFF19, 0x80);
    assert_eq!(gb.mmu.read_byte(0xFF26) & 0x02, 0);
}

#[test]
fn length_counter_silences_the_channel() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF17, 0xF0);
    gb.mmu.write_byte(0xFF16, 0x3E); // length counter = 64 - 62 = 2
    gb.mmu.write_byte(0xFF19, 0xC0); // trigger with length enable
    assert!(gb.mmu.apu.channel_active(2));

    gb.mmu.apu.step(FRAME_SEQ * 8);
    assert!(!gb.mmu.apu.channel_active(2), "length expiry disables");
}

#[test]
fn length_reloads_to_64_when_zero() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF17, 0xF0);
    gb.mmu.write_byte(0xFF16, 0x00); // length counter = 64
    gb.mmu.write_byte(0xFF19, 0xC0);

    // 63 length clocks: 4 per 8-step sequencer revolution.
    gb.mmu.apu.step(FRAME_SEQ * 8 * 15);
    assert!(gb.mmu.apu.channel_active(2));
    gb.mmu.apu.step(FRAME_SEQ * 8 * 2);
    assert!(!gb.mmu.apu.channel_active(2));
}

#[test]
fn envelope_steps_volume_down() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF17, 0xF1); // volume 15, decrease, period 1
    gb.mmu.write_byte(0xFF19, 0x80);
    assert_eq!(gb.mmu.apu.ch2_volume(), 15);

    gb.mmu.apu.step(FRAME_SEQ * 8); // one full revolution: one envelope clock
    assert_eq!(gb.mmu.apu.ch2_volume(), 14);

    // Volume clamps at zero instead of wrapping.
    gb.mmu.apu.step(FRAME_SEQ * 8 * 40);
    assert_eq!(gb.mmu.apu.ch2_volume(), 0);
    assert!(gb.mmu.apu.channel_active(2), "envelope does not disable");
}

#[test]
fn envelope_steps_volume_up() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF17, 0x19); // volume 1, increase, period 1
    gb.mmu.write_byte(0xFF19, 0x80);
    gb.mmu.apu.step(FRAME_SEQ * 8 * 3);
    assert_eq!(gb.mmu.apu.ch2_volume(), 4);
}

#[test]
fn master_disable_gates_register_writes() {
    let mut gb = gb_with_nops();
    gb.mmu.write_byte(0xFF26, 0x00);
    assert_eq!(gb.mmu.read_byte(0xFF26), 0x70);
    assert!(!gb.mmu.apu.channel_active(1), "power-off kills channels");

    gb.mmu.write_byte(0xFF17, 0xF0);
    gb.mmu.write_byte(0xFF19, 0x80);
    assert!(!gb.mmu.apu.channel_active(2), "writes ignored while off");

    gb.mmu.write_byte(0xFF26, 0x80);
    gb.mmu.write_byte(0xFF17, 0xF0);
    gb.mmu.write_byte(0xFF19, 0x80);
    assert!(gb.mmu.apu.channel_active(2));
}

#[test]
fn one_frame_produces_the_resampled_count() {
    let mut gb = GameBoy::with_config(Config {
        skip_bootrom: true,
        audio_sample_rate: 44_100,
        audio_buffer_samples: 4096,
    });
    gb.load_cart(
        dotmatrix_core::cartridge::Cartridge::from_bytes(vec![0u8; 0x8000]).unwrap(),
    );
    let queue = gb.audio_output();

    gb.run_frame();
    // 70_224 cycles at 44.1 kHz over a 4.194304 MHz clock.
    assert_eq!(queue.len(), 738);
}

#[test]
fn ring_buffer_caps_at_configured_size() {
    let mut gb = GameBoy::with_config(Config {
        skip_bootrom: true,
        audio_buffer_samples: 100,
        ..Config::default()
    });
    gb.load_cart(
        dotmatrix_core::cartridge::Cartridge::from_bytes(vec![0u8; 0x8000]).unwrap(),
    );
    let queue = gb.audio_output();

    gb.run_frame();
    assert_eq!(queue.len(), 100, "overflow drops oldest, length stays capped");

    let mut drained = 0;
    while queue.pop().is_some() {
        drained += 1;
    }
    assert_eq!(drained, 100);
}

#[test]
fn triggered_square_reaches_the_queue_with_signal() {
    let mut gb = GameBoy::with_config(Config {
        skip_bootrom: true,
        audio_buffer_samples: 4096,
        ..Config::default()
    });
    gb.load_cart(
        dotmatrix_core::cartridge::Cartridge::from_bytes(vec![0u8; 0x8000]).unwrap(),
    );
    // Quiet channel 1, then run channel 2 at ~1 kHz, 50% duty, full volume.
    gb.mmu.write_byte(0xFF12, 0x00);
    gb.mmu.write_byte(0xFF17, 0xF0);
    gb.mmu.write_byte(0xFF16, 0x80);
    gb.mmu.write_byte(0xFF18, 0x00);
    gb.mmu.write_byte(0xFF19, 0x87);

    let queue = gb.audio_output();
    gb.run_frame();

    let samples: Vec<i16> = std::iter::from_fn(|| queue.pop()).collect();
    assert!(samples.iter().any(|&s| s != 0), "audible output expected");
    assert!(samples.iter().any(|&s| s == 0), "square wave has low phases");
}

#[test]
fn sweep_raises_frequency_until_overflow_disables() {
    let mut gb = gb_with_nops();
    // Channel 1: sweep period 1, shift 1, start near the top of the range.
    gb.mmu.write_byte(0xFF10, 0x11);
    gb.mmu.write_byte(0xFF12, 0xF0);
    gb.mmu.write_byte(0xFF13, 0x00);
    gb.mmu.write_byte(0xFF14, 0x84); // trigger at frequency 0x400

    // Each sweep step adds shadow >> 1: 0x400 -> 0x600 -> 0x900 > 0x7FF.
    gb.mmu.apu.step(FRAME_SEQ * 8 * 4);
    assert!(!gb.mmu.apu.channel_active(1), "sweep overflow disables");
}
