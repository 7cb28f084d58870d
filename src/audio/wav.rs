//! WAV file loading for offline replay.

use crate::error::{Result, SttError};
use std::io::Read;
use std::path::Path;

/// Decoded WAV audio, mono PCM16 at the requested rate.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Rate of the file before resampling.
    pub source_rate: u32,
}

impl WavAudio {
    pub fn duration_ms(&self) -> u64 {
        crate::audio::buffer::samples_to_ms(self.samples.len() as u64, self.sample_rate)
    }
}

/// Load a WAV file, downmixing to mono and resampling to `target_rate`.
pub fn load(path: &Path, target_rate: u32) -> Result<WavAudio> {
    let file = std::fs::File::open(path).map_err(|e| SttError::Audio {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    from_reader(std::io::BufReader::new(file), target_rate)
}

/// Decode WAV data from any reader.
/// Supports arbitrary sample rates and channel counts.
pub fn from_reader<R: Read>(reader: R, target_rate: u32) -> Result<WavAudio> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| SttError::Audio {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let source_rate = spec.sample_rate;
    let channels = spec.channels.max(1) as usize;

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SttError::Audio {
            message: format!(
                "Unsupported WAV format: {:?} {}-bit (expected 16-bit PCM)",
                spec.sample_format, spec.bits_per_sample
            ),
        });
    }

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SttError::Audio {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono = downmix(&raw_samples, channels);
    let samples = resample(&mono, source_rate, target_rate);

    Ok(WavAudio {
        samples,
        sample_rate: target_rate,
        source_rate,
    })
}

/// Average interleaved channels into one.
fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
