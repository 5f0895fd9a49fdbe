//! # Audio Capture Module
//!
//! Live frame source built on CPAL (Cross-Platform Audio Library). The input
//! callback accumulates samples, downmixes to mono and forwards fixed-size
//! [`SampleFrame`]s over a crossbeam channel to the analysis thread.
//!
//! ## Features
//! - Automatic input device selection
//! - Sample rate negotiation around a preferred rate
//! - Mono downmix for multi-channel devices
//! - Non-blocking hand-off: frames are dropped, never queued, when the
//!   consumer falls behind

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, TrySendError};
use log::{error, info, warn};

use crate::SampleFrame;

/// Default number of samples per analysis frame (~46 ms at 44.1 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Default preferred capture rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel the complete frames are sent on
/// * `frame_size` - Samples per frame
/// * `preferred_rate` - Sample rate to aim for; the closest supported one is used
///
/// # Returns
/// * `Ok((stream, sample_rate))` - The running stream (capture stops when it
///   is dropped) and the negotiated sample rate
/// * `Err(e)` - No usable input device or configuration
pub fn start_audio_capture(
    sender: Sender<SampleFrame>,
    frame_size: usize,
    preferred_rate: u32,
) -> Result<(cpal::Stream, u32)> {
    if frame_size == 0 {
        return Err(anyhow!("frame size must be positive"));
    }

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, preferred_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = preferred_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));

    let sample_rate = config.sample_rate().0;
    let channels = config.channels().max(1) as usize;
    let config: cpal::StreamConfig = config.into();

    info!(
        "Selected sample rate: {} Hz, {} channel(s), {} samples per frame",
        sample_rate, channels, frame_size
    );

    let err_fn = |err| error!("An error occurred on the audio stream: {}", err);

    let mut frame_buffer = FrameAccumulator::new(frame_size, sample_rate as f32);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            frame_buffer.push_interleaved(data, channels, |frame| {
                match sender.try_send(frame) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!("analysis is behind, dropping a frame");
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                }
            });
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Collects interleaved device samples into mono frames of a fixed size.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    sample_rate: f32,
    buffer: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize, sample_rate: f32) -> Self {
        Self {
            frame_size,
            sample_rate,
            buffer: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Appends interleaved samples and emits every completed frame.
    ///
    /// `emit` returns `false` when the consumer is gone; pending samples are
    /// then discarded.
    pub fn push_interleaved<F>(&mut self, data: &[f32], channels: usize, mut emit: F)
    where
        F: FnMut(SampleFrame) -> bool,
    {
        let channels = channels.max(1);
        if channels == 1 {
            self.buffer.extend_from_slice(data);
        } else {
            self.buffer.extend(
                data.chunks_exact(channels)
                    .map(|c| c.iter().sum::<f32>() / channels as f32),
            );
        }

        while self.buffer.len() >= self.frame_size {
            let samples = self.buffer[..self.frame_size].to_vec();
            self.buffer.drain(..self.frame_size);
            let frame = SampleFrame {
                samples,
                sample_rate: self.sample_rate,
            };
            if !emit(frame) {
                self.buffer.clear();
                return;
            }
        }
    }
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Mono is preferred, then the range
/// closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min_rate, max_rate) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let rate_distance = if (min_rate..=max_rate).contains(&target_rate) {
                0
            } else {
                let min_diff = (min_rate as i64 - target_rate as i64).abs();
                let max_diff = (max_rate as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels() != 1, rate_distance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_fixed_size_frames_and_keeps_the_rest() {
        let mut acc = FrameAccumulator::new(4, 8000.0);
        let mut frames = Vec::new();
        acc.push_interleaved(&[0.1; 10], 1, |f| {
            frames.push(f);
            true
        });
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 4 && f.sample_rate == 8000.0));

        acc.push_interleaved(&[0.1; 2], 1, |f| {
            frames.push(f);
            true
        });
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn downmixes_interleaved_stereo() {
        let mut acc = FrameAccumulator::new(2, 48000.0);
        let mut frames = Vec::new();
        acc.push_interleaved(&[1.0, 0.0, 0.5, 0.5], 2, |f| {
            frames.push(f);
            true
        });
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.5, 0.5]);
    }

    #[test]
    fn disconnected_consumer_discards_pending_samples() {
        let mut acc = FrameAccumulator::new(2, 48000.0);
        let mut calls = 0;
        acc.push_interleaved(&[0.0; 7], 1, |_| {
            calls += 1;
            false
        });
        assert_eq!(calls, 1);
        let mut later = 0;
        acc.push_interleaved(&[0.0; 1], 1, |_| {
            later += 1;
            true
        });
        assert_eq!(later, 0);
    }
}
