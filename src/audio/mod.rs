//! # Audio Module
//!
//! Everything that touches raw audio before and after the model stages:
//!
//! - **Decoder**: container/codec-agnostic decoding of uploaded bytes into
//!   the canonical transcription format (mono, 16kHz, f32)
//! - **Fallback**: synthetic silence WAV generation used whenever real
//!   synthesis is unavailable
//!
//! ## Canonical Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: 32-bit float in [-1.0, 1.0]

pub mod decoder;
pub mod fallback;

/// Sample rate every waveform is resampled to before transcription.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// A decoded waveform in the canonical transcription format.
///
/// Produced fresh for each request by [`decoder::decode_to_canonical`] and
/// never persisted.
#[derive(Debug, Clone)]
pub struct CanonicalAudio {
    pub samples: Vec<f32>,
}

impl CanonicalAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / CANONICAL_SAMPLE_RATE as f64
    }

    /// Root-mean-square amplitude, used as the voice-activity measure.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}
