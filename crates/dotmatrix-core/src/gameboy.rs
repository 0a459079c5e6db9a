use crate::{
    apu::Apu,
    audio_queue::AudioConsumer,
    cartridge::Cartridge,
    cpu::Cpu,
    mmu::Mmu,
    ppu::Ppu,
    savestate::{self, StateError},
};

/// T-cycles per displayed frame (154 scanlines of 456 cycles).
pub const CYCLES_PER_FRAME: u32 = 70_224;

/// Core-recognized behavior switches. Everything display-related (palettes,
/// scaling, window title) belongs to the frontend.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Start from the post-boot register state instead of running a boot ROM.
    pub skip_bootrom: bool,
    pub audio_sample_rate: u32,
    pub audio_buffer_samples: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            skip_bootrom: true,
            audio_sample_rate: 44_100,
            audio_buffer_samples: 512,
        }
    }
}

/// The whole machine: CPU and PPU stepped against the bus that owns
/// everything else.
pub struct GameBoy {
    pub cpu: Cpu,
    pub ppu: Ppu,
    pub mmu: Mmu,
    config: Config,
}

impl GameBoy {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            mmu: Mmu::with_apu(Apu::with_config(
                config.audio_sample_rate,
                config.audio_buffer_samples as usize,
            )),
            config,
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.mmu.load_cart(cart);
    }

    /// Map a boot ROM at 0x0000 and restart execution from the power-on
    /// state instead of the post-boot snapshot.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.mmu.load_boot_rom(data);
        self.cpu = Cpu::power_on();
    }

    /// Reset to the initial state while preserving the loaded cartridge and
    /// boot ROM.
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        let boot = self.mmu.boot_rom.take();
        self.cpu = Cpu::new();
        self.ppu = Ppu::new();
        self.mmu = Mmu::with_apu(Apu::with_config(
            self.config.audio_sample_rate,
            self.config.audio_buffer_samples as usize,
        ));
        if let Some(c) = cart {
            self.mmu.load_cart(c);
        }
        if let Some(b) = boot {
            self.load_boot_rom(b);
        }
    }

    /// Handle for the host audio thread.
    pub fn audio_output(&self) -> AudioConsumer {
        self.mmu.apu.output()
    }

    /// Execute one CPU step and distribute the elapsed T-cycles to the PPU,
    /// timer, APU and cartridge RTC. Returns the cycle delta.
    pub fn step(&mut self) -> u32 {
        let before = self.cpu.cycles;
        self.cpu.step(&mut self.mmu);
        let delta = (self.cpu.cycles - before) as u32;

        self.ppu.step(&mut self.mmu, delta);
        self.mmu.timer.step(delta, &mut self.mmu.if_reg);
        self.mmu.apu.step(delta);
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.step_rtc(delta);
        }

        delta
    }

    /// Run one frame's worth of emulation (at least `CYCLES_PER_FRAME`
    /// T-cycles). The framebuffer afterwards holds the latest completed
    /// scanlines; `ppu.frame_ready()` reports whether a V-blank was crossed.
    pub fn run_frame(&mut self) {
        let mut cycles = 0;
        while cycles < CYCLES_PER_FRAME {
            cycles += self.step();
        }
    }

    pub fn frame_ready(&self) -> bool {
        self.ppu.frame_ready()
    }

    pub fn framebuffer(&self) -> &[u8; crate::ppu::SCREEN_WIDTH * crate::ppu::SCREEN_HEIGHT] {
        self.ppu.framebuffer()
    }

    pub fn save_state(&self) -> Vec<u8> {
        savestate::save(self)
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        savestate::load(self, data)
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
