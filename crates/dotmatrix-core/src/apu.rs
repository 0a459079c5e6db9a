use crate::audio_queue::{audio_queue, AudioConsumer, AudioProducer};

const CPU_CLOCK_HZ: u32 = 4_194_304;
// 512 Hz frame sequencer tick.
const FRAME_SEQUENCER_PERIOD: u32 = 8192;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_BUFFER_SAMPLES: usize = 512;
const VOLUME_FACTOR: i16 = 512;

// Duty table for the pulse channels. Each entry is an 8-step waveform;
// the index (0..3) is the duty selector in NRx1 bits 7-6.
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

#[derive(Default)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn set_params(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn reload(&mut self, freq: u16) {
        self.shadow = freq;
        self.timer = if self.period == 0 { 8 } else { self.period };
        self.enabled = self.period != 0 || self.shift != 0;
    }

    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow.wrapping_add(delta)
        }
    }
}

#[derive(Default)]
struct SquareChannel {
    enabled: bool,
    dac_enabled: bool,
    duty: u8,
    duty_pos: u8,
    frequency: u16,
    timer: i32,
    length_counter: u8,
    length_enable: bool,
    volume: u8,
    initial_volume: u8,
    envelope_period: u8,
    envelope_add: bool,
    envelope_timer: u8,
    output: u8,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            sweep: with_sweep.then(Sweep::default),
            ..Default::default()
        }
    }

    fn period(&self) -> i32 {
        ((2048 - self.frequency) as i32) * 4
    }

    fn step(&mut self, cycles: u32) {
        if !self.enabled || !self.dac_enabled {
            self.output = 0;
            return;
        }
        let mut cycles = cycles as i32;
        while self.timer <= cycles {
            cycles -= self.timer;
            self.timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
        self.timer -= cycles;
        self.output = DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.volume;
    }

    fn trigger(&mut self) {
        if !self.dac_enabled {
            return;
        }
        self.enabled = true;
        self.volume = self.initial_volume;
        self.envelope_timer = self.envelope_period;
        if self.length_counter == 0 {
            self.length_counter = 64;
        }
        self.timer = self.period();
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.reload(self.frequency);
            if sweep.shift != 0 && sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length_counter > 0 {
            self.length_counter -= 1;
            if self.length_counter == 0 {
                self.enabled = false;
            }
        }
    }

    fn clock_envelope(&mut self) {
        if !self.enabled || self.envelope_period == 0 {
            return;
        }
        if self.envelope_timer > 0 {
            self.envelope_timer -= 1;
        }
        if self.envelope_timer == 0 {
            self.envelope_timer = self.envelope_period;
            if self.envelope_add {
                if self.volume < 15 {
                    self.volume += 1;
                }
            } else if self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    fn clock_sweep(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if !sweep.enabled {
            return;
        }
        if sweep.timer > 0 {
            sweep.timer -= 1;
        }
        if sweep.timer != 0 {
            return;
        }
        sweep.timer = if sweep.period == 0 { 8 } else { sweep.period };
        if sweep.period == 0 {
            return;
        }
        let new_freq = sweep.calculate();
        if new_freq > 2047 {
            self.enabled = false;
        } else if sweep.shift != 0 {
            sweep.shadow = new_freq;
            self.frequency = new_freq;
            if sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }
}

/// Audio processing unit: the two square-wave channels, their 512 Hz frame
/// sequencer, and the 44.1 kHz mono mixer feeding the host ring buffer.
pub struct Apu {
    /// Raw register bytes, 0xFF10-0xFF3F mapped to 0x00-0x2F.
    regs: [u8; 0x30],
    ch1: SquareChannel,
    ch2: SquareChannel,
    enabled: bool,
    frame_sequencer: u8,
    sequencer_cycles: u32,
    /// Fixed-point sample clock: accumulates `cycles * sample_rate` and
    /// emits one sample per `CPU_CLOCK_HZ`.
    sample_acc: u64,
    sample_rate: u32,
    producer: AudioProducer,
    consumer: AudioConsumer,
}

impl Apu {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_SAMPLE_RATE, DEFAULT_BUFFER_SAMPLES)
    }

    pub fn with_config(sample_rate: u32, buffer_samples: usize) -> Self {
        let (producer, consumer) = audio_queue(buffer_samples);
        let mut apu = Self {
            regs: [0; 0x30],
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            enabled: true,
            frame_sequencer: 0,
            sequencer_cycles: 0,
            sample_acc: 0,
            sample_rate: sample_rate.max(1),
            producer,
            consumer,
        };

        // Post-boot-ROM register contents: channel 1 is left running a 50%
        // duty tone at full volume, channel 2 is silent.
        apu.regs[0x00] = 0x80;
        apu.regs[0x01] = 0xBF;
        apu.regs[0x02] = 0xF3;
        apu.regs[0x04] = 0xBF;
        apu.regs[0x06] = 0x3F;
        apu.regs[0x09] = 0xBF;
        apu.regs[0x14] = 0x77;
        apu.regs[0x15] = 0xF3;
        apu.regs[0x16] = 0xF1;

        apu.ch1.enabled = true;
        apu.ch1.dac_enabled = true;
        apu.ch1.duty = 2;
        apu.ch1.initial_volume = 0x0F;
        apu.ch1.volume = 0x0F;
        apu.ch1.envelope_period = 3;
        apu.ch1.frequency = 0x03FF;
        apu.ch1.length_counter = 0x3F;

        apu.ch2.frequency = 0x03FF;
        apu.ch2.length_counter = 0x3F;

        apu
    }

    /// Handle for the host audio thread; clones share the same ring.
    pub fn output(&self) -> AudioConsumer {
        self.consumer.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_active(&self, channel: u8) -> bool {
        match channel {
            1 => self.ch1.enabled,
            2 => self.ch2.enabled,
            _ => false,
        }
    }

    pub fn ch1_volume(&self) -> u8 {
        self.ch1.volume
    }

    pub fn ch2_volume(&self) -> u8 {
        self.ch2.volume
    }

    pub fn sequencer_step(&self) -> u8 {
        self.frame_sequencer
    }

    /// Advance the unit by `cycles` T-cycles: clock the frame sequencer,
    /// run the channel timers, and resample the mix into the ring buffer.
    pub fn step(&mut self, cycles: u32) {
        if self.enabled {
            self.sequencer_cycles += cycles;
            while self.sequencer_cycles >= FRAME_SEQUENCER_PERIOD {
                self.sequencer_cycles -= FRAME_SEQUENCER_PERIOD;
                self.clock_frame_sequencer();
            }

            self.ch1.step(cycles);
            self.ch2.step(cycles);
        }

        self.sample_acc += cycles as u64 * self.sample_rate as u64;
        while self.sample_acc >= CPU_CLOCK_HZ as u64 {
            self.sample_acc -= CPU_CLOCK_HZ as u64;
            self.producer.push(self.mix());
        }
    }

    fn clock_frame_sequencer(&mut self) {
        // Steps 0/2/4/6 clock length, 2/6 clock sweep, 7 clocks envelope.
        match self.frame_sequencer {
            0 | 4 => {
                self.ch1.clock_length();
                self.ch2.clock_length();
            }
            2 | 6 => {
                self.ch1.clock_length();
                self.ch2.clock_length();
                self.ch1.clock_sweep();
            }
            7 => {
                self.ch1.clock_envelope();
                self.ch2.clock_envelope();
            }
            _ => {}
        }
        self.frame_sequencer = (self.frame_sequencer + 1) & 7;
    }

    fn mix(&self) -> i16 {
        if !self.enabled {
            return 0;
        }
        let sum = self.ch1.output as i16 + self.ch2.output as i16;
        sum.saturating_mul(VOLUME_FACTOR)
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 | 0xFF16 => 0x3F,
            0xFF12 | 0xFF17 => 0x00,
            0xFF13 | 0xFF18 => 0xFF,
            0xFF14 | 0xFF19 => 0xBF,
            0xFF24 | 0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        if addr == 0xFF26 {
            let mut nr52 = 0x70;
            if self.enabled {
                nr52 |= 0x80;
            }
            if self.ch1.enabled {
                nr52 |= 0x01;
            }
            if self.ch2.enabled {
                nr52 |= 0x02;
            }
            return nr52;
        }
        let stored = self
            .regs
            .get((addr as usize).wrapping_sub(0xFF10))
            .copied()
            .unwrap_or(0xFF);
        stored | Self::read_mask(addr)
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if addr == 0xFF26 {
            let was_enabled = self.enabled;
            self.enabled = val & 0x80 != 0;
            if was_enabled && !self.enabled {
                self.power_off();
            }
            return;
        }
        // While the master enable is off, every other register is inert.
        if !self.enabled {
            return;
        }

        let Some(slot) = self.regs.get_mut((addr as usize).wrapping_sub(0xFF10)) else {
            return;
        };
        *slot = val;

        match addr {
            0xFF10 => {
                if let Some(sweep) = self.ch1.sweep.as_mut() {
                    sweep.set_params(val);
                }
            }
            0xFF11 => {
                self.ch1.duty = val >> 6;
                self.ch1.length_counter = 64 - (val & 0x3F);
            }
            0xFF12 => {
                self.ch1.envelope_add = val & 0x08 != 0;
                self.ch1.envelope_period = val & 0x07;
                self.ch1.initial_volume = val >> 4;
                self.ch1.dac_enabled = val & 0xF8 != 0;
                if !self.ch1.dac_enabled {
                    self.ch1.enabled = false;
                }
            }
            0xFF13 => self.ch1.frequency = (self.ch1.frequency & 0x0700) | val as u16,
            0xFF14 => {
                self.ch1.frequency =
                    (self.ch1.frequency & 0x00FF) | (((val & 0x07) as u16) << 8);
                self.ch1.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch1.trigger();
                }
            }
            0xFF16 => {
                self.ch2.duty = val >> 6;
                self.ch2.length_counter = 64 - (val & 0x3F);
            }
            0xFF17 => {
                self.ch2.envelope_add = val & 0x08 != 0;
                self.ch2.envelope_period = val & 0x07;
                self.ch2.initial_volume = val >> 4;
                self.ch2.dac_enabled = val & 0xF8 != 0;
                if !self.ch2.dac_enabled {
                    self.ch2.enabled = false;
                }
            }
            0xFF18 => self.ch2.frequency = (self.ch2.frequency & 0x0700) | val as u16,
            0xFF19 => {
                self.ch2.frequency =
                    (self.ch2.frequency & 0x00FF) | (((val & 0x07) as u16) << 8);
                self.ch2.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch2.trigger();
                }
            }
            _ => {}
        }
    }

    fn power_off(&mut self) {
        self.regs = [0; 0x30];
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.frame_sequencer = 0;
        self.sequencer_cycles = 0;
    }

    /// Serialize register bytes, channel state and sequencer position.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.regs);
        out.push(self.enabled as u8);
        out.push(self.frame_sequencer);
        out.extend_from_slice(&self.sequencer_cycles.to_le_bytes());
        for ch in [&self.ch1, &self.ch2] {
            out.push(ch.enabled as u8);
            out.push(ch.dac_enabled as u8);
            out.push(ch.duty);
            out.push(ch.duty_pos);
            out.extend_from_slice(&ch.frequency.to_le_bytes());
            out.extend_from_slice(&ch.timer.to_le_bytes());
            out.push(ch.length_counter);
            out.push(ch.length_enable as u8);
            out.push(ch.volume);
            out.push(ch.initial_volume);
            out.push(ch.envelope_period);
            out.push(ch.envelope_add as u8);
            out.push(ch.envelope_timer);
            out.push(ch.output);
        }
    }

    pub fn load_state(
        &mut self,
        r: &mut crate::savestate::Reader<'_>,
    ) -> Result<(), crate::savestate::StateError> {
        let regs = r.read_bytes(0x30)?;
        self.regs.copy_from_slice(regs);
        self.enabled = r.read_u8()? != 0;
        self.frame_sequencer = r.read_u8()? & 7;
        self.sequencer_cycles = r.read_u32()?;
        for ch in [&mut self.ch1, &mut self.ch2] {
            ch.enabled = r.read_u8()? != 0;
            ch.dac_enabled = r.read_u8()? != 0;
            ch.duty = r.read_u8()? & 3;
            ch.duty_pos = r.read_u8()? & 7;
            ch.frequency = r.read_u16()? & 0x07FF;
            ch.timer = r.read_i32()?;
            ch.length_counter = r.read_u8()?;
            ch.length_enable = r.read_u8()? != 0;
            ch.volume = r.read_u8()? & 0x0F;
            ch.initial_volume = r.read_u8()? & 0x0F;
            ch.envelope_period = r.read_u8()? & 0x07;
            ch.envelope_add = r.read_u8()? != 0;
            ch.envelope_timer = r.read_u8()?;
            ch.output = r.read_u8()?;
        }
        if let Some(sweep) = self.ch1.sweep.as_mut() {
            sweep.set_params(self.regs[0x00]);
            sweep.reload(self.ch1.frequency);
        }
        Ok(())
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}
