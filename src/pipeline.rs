//! # Question-Answer Pipeline
//!
//! Orchestrates one full run: decode uploaded audio, transcribe the Pashto
//! question, translate it, generate a bilingual answer, and synthesize
//! speech for both Pashto texts. Results land in the single-slot session.
//!
//! ## Degradation contract:
//! `process` is infallible. Any failure before answer generation aborts
//! into a fixed bilingual fallback result with silent audio; failures in
//! individual later stages substitute that stage's fallback and continue.
//! Callers always get a complete result set.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::answer::AnswerGenerator;
use crate::audio::{decoder, fallback};
use crate::config::PipelineConfig;
use crate::state::{AudioArtifact, AudioRole, SessionState};
use crate::transcription::{TranscriptionEngine, TranscriptOutcome};
use crate::translation::Translator;
use crate::tts::SpeechSynthesizer;

pub const FALLBACK_QUESTION_PASHTO: &str =
    "مهرباني وکړئ په واضح ډول پښتو کې خپله پوښتنه ووايه";
pub const FALLBACK_QUESTION_ENGLISH: &str = "Please ask your question clearly in Pashto";
pub const FALLBACK_ANSWER_PASHTO: &str =
    "زه ستاسو د پوښتنې اوریدلو لپاره دلته یم. مهرباني وکړئ خپله پوښتنه په واضح ډول ووايئ";
pub const FALLBACK_ANSWER_ENGLISH: &str =
    "I am here to listen to your question. Please ask your question clearly";

/// The four texts produced by one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub pashto_question: String,
    pub english_question: String,
    pub pashto_answer: String,
    pub english_answer: String,
}

impl PipelineResult {
    /// The complete fallback set used when a run aborts early.
    pub fn fallback() -> Self {
        Self {
            pashto_question: FALLBACK_QUESTION_PASHTO.to_string(),
            english_question: FALLBACK_QUESTION_ENGLISH.to_string(),
            pashto_answer: FALLBACK_ANSWER_PASHTO.to_string(),
            english_answer: FALLBACK_ANSWER_ENGLISH.to_string(),
        }
    }
}

/// The full processing pipeline.
///
/// Owns the session slot for writing; handlers share the same `Arc` for
/// reads. The caller is responsible for holding the pipeline gate while a
/// run is in flight.
pub struct Pipeline {
    engine: Arc<TranscriptionEngine>,
    translator: Arc<Translator>,
    answerer: AnswerGenerator,
    synthesizer: Arc<SpeechSynthesizer>,
    session: Arc<RwLock<SessionState>>,
    min_input_bytes: usize,
    silence_fallback: Duration,
}

impl Pipeline {
    pub fn new(
        engine: Arc<TranscriptionEngine>,
        translator: Arc<Translator>,
        answerer: AnswerGenerator,
        synthesizer: Arc<SpeechSynthesizer>,
        session: Arc<RwLock<SessionState>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            engine,
            translator,
            answerer,
            synthesizer,
            session,
            min_input_bytes: config.min_input_bytes,
            silence_fallback: config.silence_fallback(),
        }
    }

    /// Minimum accepted upload size in bytes.
    pub fn min_input_bytes(&self) -> usize {
        self.min_input_bytes
    }

    /// Run the full pipeline on uploaded audio and store the results.
    ///
    /// `filename_hint` feeds the decoder's format probe; `voice_id`
    /// overrides the default synthesis voice for this run.
    pub async fn process(
        &self,
        audio_bytes: &[u8],
        filename_hint: Option<&str>,
        voice_id: Option<&str>,
    ) -> PipelineResult {
        let run_id = Uuid::new_v4();
        tracing::info!(
            "pipeline run {} started ({} input bytes)",
            run_id,
            audio_bytes.len()
        );

        if audio_bytes.len() < self.min_input_bytes {
            tracing::warn!(
                "pipeline run {} aborted: input below {} bytes",
                run_id,
                self.min_input_bytes
            );
            return self.store_fallback();
        }

        let audio = match decoder::decode_to_canonical(audio_bytes, filename_hint) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!("pipeline run {} aborted: decode failed: {}", run_id, e);
                return self.store_fallback();
            }
        };
        tracing::info!(
            "pipeline run {}: decoded {:.2}s of audio",
            run_id,
            audio.duration_secs()
        );

        let pashto_question = match self.engine.transcribe(&audio).await {
            TranscriptOutcome::Text(text) => text,
            outcome => {
                tracing::warn!(
                    "pipeline run {} aborted: transcription outcome {}",
                    run_id,
                    outcome.label()
                );
                return self.store_fallback();
            }
        };
        tracing::info!("pipeline run {}: transcribed question", run_id);

        let english_question = self.translator.pashto_to_english(&pashto_question).await;
        tracing::info!("pipeline run {}: translated question", run_id);

        let answers = self
            .answerer
            .generate(&pashto_question, &english_question)
            .await;
        tracing::info!("pipeline run {}: generated answer", run_id);

        let result = PipelineResult {
            pashto_question: self.synthesizer.optimize_for_synthesis(&pashto_question),
            english_question,
            pashto_answer: self.synthesizer.optimize_for_synthesis(&answers.pashto_answer),
            english_answer: answers.english_answer,
        };

        let question_audio = self
            .synthesize_or_silence(&result.pashto_question, voice_id)
            .await;
        let answer_audio = self
            .synthesize_or_silence(&result.pashto_answer, voice_id)
            .await;

        self.store(result.clone(), question_audio, answer_audio);

        tracing::info!("pipeline run {} completed", run_id);
        result
    }

    /// Re-synthesize one stored clip, e.g. after a voice change.
    ///
    /// The stored audio is only replaced when synthesis succeeds; a failed
    /// attempt keeps whatever clip the session already has. Returns whether
    /// the clip was replaced.
    pub async fn regenerate_audio(&self, role: AudioRole, voice_id: Option<&str>) -> bool {
        let text = {
            let session = self.session.read().unwrap();
            session
                .latest
                .as_ref()
                .map(|result| role.text_of(result).to_string())
        };
        let Some(text) = text else {
            return false;
        };
        if text.is_empty() {
            return false;
        }

        match self.synthesizer.synthesize(&text, voice_id).await {
            Some(bytes) => {
                let mut session = self.session.write().unwrap();
                session.replace_audio(role, AudioArtifact::mp3(bytes));
                true
            }
            None => false,
        }
    }

    async fn synthesize_or_silence(&self, text: &str, voice_id: Option<&str>) -> AudioArtifact {
        match self.synthesizer.synthesize(text, voice_id).await {
            Some(bytes) => AudioArtifact::mp3(bytes),
            None => AudioArtifact::wav(fallback::silent_wav(self.silence_fallback)),
        }
    }

    fn store_fallback(&self) -> PipelineResult {
        let result = PipelineResult::fallback();
        let silence = || AudioArtifact::wav(fallback::silent_wav(self.silence_fallback));
        self.store(result.clone(), silence(), silence());
        result
    }

    fn store(
        &self,
        result: PipelineResult,
        question_audio: AudioArtifact,
        answer_audio: AudioArtifact,
    ) {
        // Lock poisoning is unrecoverable here; a poisoned session means a
        // handler panicked mid-read, and crashing is the honest response.
        let mut session = self.session.write().unwrap();
        session.store_run(result, question_audio, answer_audio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AudioRole;
    use std::io::Cursor;

    fn test_pipeline() -> (Pipeline, Arc<RwLock<SessionState>>) {
        let config = AppConfig::default();
        let session = Arc::new(RwLock::new(SessionState::default()));
        let engine = Arc::new(TranscriptionEngine::new(&config.asr));
        let translator = Arc::new(Translator::new(&config.translation));
        let answerer = AnswerGenerator::new(&config.answer, Arc::clone(&translator));
        let synthesizer = Arc::new(SpeechSynthesizer::new(&config.tts));
        let pipeline = Pipeline::new(
            engine,
            translator,
            answerer,
            synthesizer,
            Arc::clone(&session),
            &config.pipeline,
        );
        (pipeline, session)
    }

    fn silence_wav_bytes(duration_secs: f64) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..(16_000.0 * duration_secs) as usize {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn assert_session_has_silent_fallback(session: &Arc<RwLock<SessionState>>) {
        let session = session.read().unwrap();
        for role in [AudioRole::PashtoQuestion, AudioRole::PashtoAnswer] {
            let artifact = session.artifact(role).unwrap();
            assert_eq!(artifact.mime, "audio/wav");
            let reader = hound::WavReader::new(Cursor::new(&artifact.bytes)).unwrap();
            assert_eq!(reader.spec().channels, 1);
            assert_eq!(reader.spec().bits_per_sample, 16);
        }
    }

    #[tokio::test]
    async fn test_tiny_upload_degrades_to_fallback() {
        let (pipeline, session) = test_pipeline();

        let result = pipeline.process(&[0u8; 20], None, None).await;

        assert_eq!(result.pashto_question, FALLBACK_QUESTION_PASHTO);
        assert_eq!(result.english_question, FALLBACK_QUESTION_ENGLISH);
        assert_eq!(result.pashto_answer, FALLBACK_ANSWER_PASHTO);
        assert_eq!(result.english_answer, FALLBACK_ANSWER_ENGLISH);
        assert_eq!(session.read().unwrap().latest, Some(result));
        assert_session_has_silent_fallback(&session);
    }

    #[tokio::test]
    async fn test_undecodable_upload_degrades_to_fallback() {
        let (pipeline, session) = test_pipeline();

        let garbage = vec![0x42u8; 4096];
        let result = pipeline.process(&garbage, Some("clip.mp3"), None).await;

        assert_eq!(result, PipelineResult::fallback());
        assert_session_has_silent_fallback(&session);
    }

    #[tokio::test]
    async fn test_silent_recording_degrades_to_fallback() {
        let (pipeline, session) = test_pipeline();

        // 1.2 seconds of valid but silent WAV, comfortably over the size floor
        let bytes = silence_wav_bytes(1.2);
        assert!(bytes.len() >= pipeline.min_input_bytes());

        let result = pipeline.process(&bytes, Some("silence.wav"), None).await;

        assert_eq!(result.pashto_question, FALLBACK_QUESTION_PASHTO);
        assert_eq!(result.pashto_answer, FALLBACK_ANSWER_PASHTO);
        assert_session_has_silent_fallback(&session);
    }

    #[tokio::test]
    async fn test_each_run_replaces_the_previous_session() {
        let (pipeline, session) = test_pipeline();

        pipeline.process(&[0u8; 10], None, None).await;
        let first_latest = session.read().unwrap().latest.clone();
        assert!(first_latest.is_some());

        pipeline.process(&silence_wav_bytes(1.2), Some("s.wav"), None).await;
        let session = session.read().unwrap();
        assert!(session.latest.is_some());
        assert_eq!(session.audio.len(), 2);
    }
}
