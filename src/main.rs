#[cfg(feature = "audio")]
mod audio;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use log::info;

use dotmatrix_core::{
    cartridge::Cartridge,
    gameboy::{Config, GameBoy},
};

/// Headless Game Boy emulator. Runs the core for a bounded number of
/// frames/seconds/cycles and can dump the final frame or a save state.
#[derive(Parser)]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Path to a 256-byte boot ROM; when given, execution starts from it
    #[arg(long)]
    bootrom: Option<PathBuf>,

    /// Number of frames to run (default 60 unless --seconds/--cycles given)
    #[arg(long)]
    frames: Option<u64>,

    /// Number of wall-clock seconds to run
    #[arg(long)]
    seconds: Option<u64>,

    /// Number of CPU T-cycles to run
    #[arg(long)]
    cycles: Option<u64>,

    /// Pace emulation to real time (~59.7 frames per second)
    #[arg(long)]
    throttle: bool,

    /// Write the final framebuffer to this path as a binary PGM
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Write a save state here when the run ends
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Restore this save state before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Audio sample rate in Hz
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Audio ring buffer size in samples
    #[arg(long, default_value_t = 512)]
    audio_buffer: u32,

    /// Print CPU state once per emulated second
    #[arg(long)]
    debug: bool,
}

// One frame of 70_224 T-cycles at 4.194304 MHz.
const FRAME_TIME: Duration = Duration::from_nanos(16_742_706);

fn main() {
    env_logger::init();
    let args = Args::parse();

    let cart = match Cartridge::from_file(&args.rom) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load ROM: {e}");
            std::process::exit(1);
        }
    };

    let config = Config {
        skip_bootrom: args.bootrom.is_none(),
        audio_sample_rate: args.sample_rate,
        audio_buffer_samples: args.audio_buffer,
    };
    let mut gb = GameBoy::with_config(config);
    gb.load_cart(cart);

    if let Some(path) = &args.bootrom {
        match std::fs::read(path) {
            Ok(data) => gb.load_boot_rom(data),
            Err(e) => eprintln!("Failed to load boot ROM: {e}"),
        }
    }

    if let Some(path) = &args.load_state {
        match std::fs::read(path) {
            Ok(data) => match gb.load_state(&data) {
                Ok(()) => info!("restored state from {}", path.display()),
                Err(e) => eprintln!("Failed to restore state: {e}"),
            },
            Err(e) => eprintln!("Failed to read state file: {e}"),
        }
    }

    #[cfg(feature = "audio")]
    let _stream = audio::start_stream(gb.audio_output());

    let frame_limit = match (args.frames, args.seconds, args.cycles) {
        (None, None, None) => Some(60),
        (frames, _, _) => frames,
    };
    let second_limit = args.seconds.map(Duration::from_secs);
    let cycle_limit = args.cycles;

    let start = Instant::now();
    let mut frame_count = 0u64;
    let mut next_frame = Instant::now();

    loop {
        gb.run_frame();
        gb.ppu.clear_frame_flag();
        frame_count += 1;

        if args.debug && frame_count % 60 == 0 {
            println!("{}", gb.cpu.debug_state());
        }

        if let Some(max) = frame_limit {
            if frame_count >= max {
                break;
            }
        }
        if let Some(limit) = second_limit {
            if start.elapsed() >= limit {
                break;
            }
        }
        if let Some(max) = cycle_limit {
            if gb.cpu.cycles >= max {
                break;
            }
        }

        if args.throttle {
            next_frame += FRAME_TIME;
            let now = Instant::now();
            if next_frame > now {
                std::thread::sleep(next_frame - now);
            } else {
                next_frame = now;
            }
        }
    }

    info!(
        "ran {frame_count} frames / {} cycles in {:.2?}",
        gb.cpu.cycles,
        start.elapsed()
    );

    if let Some(path) = &args.screenshot {
        if let Err(e) = write_pgm(path, gb.framebuffer()) {
            eprintln!("Failed to write screenshot: {e}");
        }
    }

    if let Some(path) = &args.save_state {
        if let Err(e) = std::fs::write(path, gb.save_state()) {
            eprintln!("Failed to write save state: {e}");
        }
    }

    gb.mmu.save_cart_ram();
}

/// Dump the 160x144 shade buffer as a binary PGM, shade 0 lightest.
fn write_pgm(path: &PathBuf, frame: &[u8; 160 * 144]) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(frame.len() + 16);
    out.extend_from_slice(b"P5\n160 144\n255\n");
    out.extend(frame.iter().map(|&shade| 255 - shade * 85));
    std::fs::write(path, out)
}
