use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use dotmatrix_core::audio_queue::AudioConsumer;

/// Start audio playback using `cpal`, draining samples produced by the APU.
///
/// The core generates mono; the callback duplicates each sample across the
/// device channels and substitutes silence when the queue underflows.
///
/// Returns the active [`cpal::Stream`] if successful.
pub fn start_stream(queue: AudioConsumer) -> Option<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("no supported output config: {e}");
            return None;
        }
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let err_fn = |err| eprintln!("cpal stream error: {err}");

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop().unwrap_or(0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .ok()?,
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop().unwrap_or(0) as f32 / 32768.0;
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .ok()?,
        _ => {
            eprintln!("unsupported sample format: {sample_format:?}");
            return None;
        }
    };

    if let Err(e) = stream.play() {
        eprintln!("failed to start audio stream: {e}");
        return None;
    }
    Some(stream)
}
