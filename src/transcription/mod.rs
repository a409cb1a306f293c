//! # Pashto Speech Recognition
//!
//! Whisper-based transcription tuned for Pashto input. The model is loaded
//! once at startup and shared behind a lock; transcription classifies its
//! outcome so the pipeline can pick the right fallback instead of parsing
//! error strings.

pub mod engine;
pub mod model;

pub use engine::{TranscriptionEngine, TranscriptOutcome};
pub use model::PashtoAsrModel;
