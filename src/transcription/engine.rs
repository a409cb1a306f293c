//! # Transcription Engine
//!
//! Wraps the Whisper model with outcome classification. Callers get a
//! `TranscriptOutcome` enum rather than a string to inspect, so downstream
//! fallback decisions are exhaustive matches instead of prefix checks.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::audio::CanonicalAudio;
use crate::config::AsrConfig;
use crate::transcription::PashtoAsrModel;

/// Result of a transcription attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// Usable transcript text.
    Text(String),
    /// Audio carried no detectable speech, or the model produced nothing.
    EmptyOrSilent,
    /// No model is loaded (startup load failed or is still in flight).
    ModelUnavailable,
    /// The model ran but errored.
    Failed,
}

impl TranscriptOutcome {
    /// Short label for logs and status payloads.
    pub fn label(&self) -> &'static str {
        match self {
            TranscriptOutcome::Text(_) => "text",
            TranscriptOutcome::EmptyOrSilent => "empty_or_silent",
            TranscriptOutcome::ModelUnavailable => "model_unavailable",
            TranscriptOutcome::Failed => "failed",
        }
    }
}

/// Shared transcription front-end.
///
/// The model slot starts empty and is filled by `load_model` at startup.
/// A failed load leaves the slot empty; transcription then reports
/// `ModelUnavailable` instead of erroring, and the pipeline degrades.
pub struct TranscriptionEngine {
    model: Arc<RwLock<Option<PashtoAsrModel>>>,
    model_repo: String,
    language: String,
    silence_rms_threshold: f32,
}

impl TranscriptionEngine {
    pub fn new(config: &AsrConfig) -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
            model_repo: config.model_repo.clone(),
            language: config.language.clone(),
            silence_rms_threshold: config.silence_rms_threshold,
        }
    }

    /// Download and initialize the configured checkpoint.
    pub async fn load_model(&self) -> anyhow::Result<()> {
        let model = PashtoAsrModel::load(&self.model_repo, &self.language).await?;
        *self.model.write().await = Some(model);
        tracing::info!("transcription model {} ready", self.model_repo);
        Ok(())
    }

    /// Whether a model is currently loaded.
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// The configured checkpoint repository.
    pub fn model_repo(&self) -> &str {
        &self.model_repo
    }

    /// Transcribe canonical audio, classifying the result.
    ///
    /// Silence is detected up front with an RMS gate, so silent clips never
    /// reach the model. Whisper hallucinates text on silence otherwise.
    pub async fn transcribe(&self, audio: &CanonicalAudio) -> TranscriptOutcome {
        if audio.samples.is_empty() {
            return TranscriptOutcome::EmptyOrSilent;
        }

        let rms = audio.rms();
        if rms < self.silence_rms_threshold {
            tracing::info!(
                "audio below voice activity threshold (rms {:.5} < {:.5}), skipping model",
                rms,
                self.silence_rms_threshold
            );
            return TranscriptOutcome::EmptyOrSilent;
        }

        let mut guard = self.model.write().await;
        let model = match guard.as_mut() {
            Some(model) => model,
            None => return TranscriptOutcome::ModelUnavailable,
        };

        match model.transcribe(&audio.samples) {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    TranscriptOutcome::EmptyOrSilent
                } else {
                    TranscriptOutcome::Text(text)
                }
            }
            Err(e) => {
                tracing::error!("transcription failed: {}", e);
                TranscriptOutcome::Failed
            }
        }
    }
}
