//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Secrets never live in the TOML file: the Gemini and UpliftAI API keys are
//! read from `GOOGLE_API_KEY` / `UPLIFT_AI_API_KEY` (loaded from `.env` by
//! `dotenv` in main).
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_TTS_VOICE_ID, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub asr: AsrConfig,
    pub translation: TranslationConfig,
    pub answer: AnswerConfig,
    pub tts: TtsConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-recognition settings.
///
/// `model_repo` is a HuggingFace repository holding a whisper-architecture
/// checkpoint; `language` is the whisper language code used for the decoder
/// prompt. `silence_rms_threshold` classifies decoded audio as silent before
/// the model is ever invoked — tunable, not a correctness constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    pub model_repo: String,
    pub language: String,
    pub silence_rms_threshold: f32,
}

/// External translation process settings.
///
/// The translator shells out to `command` (argv vector), writes the prompt
/// to stdin and reads the translation from stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Generative-answer service settings (Gemini-style `generateContent` API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    pub endpoint: String,
    pub model: String,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub timeout_secs: u64,
    /// Read from GOOGLE_API_KEY, never from the TOML file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Text-to-speech service settings (UpliftAI-style API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub endpoint: String,
    pub voice_id: String,
    pub output_format: String,
    pub max_text_chars: usize,
    pub timeout_secs: u64,
    /// Read from UPLIFT_AI_API_KEY, never from the TOML file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Pipeline-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Encoded uploads below this byte count are treated as empty/silent
    /// without decoding or model invocation.
    pub min_input_bytes: usize,
    /// Duration of the generated silence-fallback WAV.
    pub silence_fallback_secs: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8660,
            },
            asr: AsrConfig {
                model_repo: "openai/whisper-small".to_string(),
                language: "ps".to_string(),
                silence_rms_threshold: 0.01,
            },
            translation: TranslationConfig {
                command: vec![
                    "ollama".to_string(),
                    "run".to_string(),
                    "translategemma:4b".to_string(),
                ],
                timeout_secs: 30,
            },
            answer: AnswerConfig {
                endpoint: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-2.5-flash".to_string(),
                max_attempts: 3,
                backoff_base_secs: 1,
                timeout_secs: 30,
                api_key: None,
            },
            tts: TtsConfig {
                endpoint: "https://api.upliftai.org/v1/synthesis/text-to-speech".to_string(),
                voice_id: "v_8eelc901".to_string(),
                output_format: "MP3_22050_128".to_string(),
                max_text_chars: 500,
                timeout_secs: 30,
                api_key: None,
            },
            pipeline: PipelineConfig {
                min_input_bytes: 1000,
                silence_fallback_secs: 1.5,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and environment.
    ///
    /// `HOST` and `PORT` (used by deployment platforms) override the
    /// corresponding server settings without the APP_ prefix.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;

        // Secrets come from the environment only.
        config.answer.api_key = env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty());
        config.tts.api_key = env::var("UPLIFT_AI_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.translation.command.is_empty() {
            return Err(anyhow::anyhow!("Translation command cannot be empty"));
        }

        if self.answer.max_attempts == 0 {
            return Err(anyhow::anyhow!("Answer max_attempts must be greater than 0"));
        }

        if self.tts.max_text_chars == 0 {
            return Err(anyhow::anyhow!("TTS max_text_chars must be greater than 0"));
        }

        if self.pipeline.min_input_bytes == 0 {
            return Err(anyhow::anyhow!("Pipeline min_input_bytes must be greater than 0"));
        }

        if self.asr.silence_rms_threshold < 0.0 {
            return Err(anyhow::anyhow!("Silence RMS threshold cannot be negative"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Partial updates are allowed: only the fields present in the JSON are
    /// changed. API keys and the server bind address cannot be changed at
    /// runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(asr) = partial.get("asr") {
            if let Some(repo) = asr.get("model_repo").and_then(|v| v.as_str()) {
                self.asr.model_repo = repo.to_string();
            }
            if let Some(lang) = asr.get("language").and_then(|v| v.as_str()) {
                self.asr.language = lang.to_string();
            }
            if let Some(threshold) = asr.get("silence_rms_threshold").and_then(|v| v.as_f64()) {
                self.asr.silence_rms_threshold = threshold as f32;
            }
        }

        if let Some(translation) = partial.get("translation") {
            if let Some(timeout) = translation.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.translation.timeout_secs = timeout;
            }
        }

        if let Some(answer) = partial.get("answer") {
            if let Some(model) = answer.get("model").and_then(|v| v.as_str()) {
                self.answer.model = model.to_string();
            }
            if let Some(attempts) = answer.get("max_attempts").and_then(|v| v.as_u64()) {
                self.answer.max_attempts = attempts as u32;
            }
        }

        if let Some(tts) = partial.get("tts") {
            if let Some(voice) = tts.get("voice_id").and_then(|v| v.as_str()) {
                self.tts.voice_id = voice.to_string();
            }
            if let Some(format) = tts.get("output_format").and_then(|v| v.as_str()) {
                self.tts.output_format = format.to_string();
            }
            if let Some(chars) = tts.get("max_text_chars").and_then(|v| v.as_u64()) {
                self.tts.max_text_chars = chars as usize;
            }
        }

        if let Some(pipeline) = partial.get("pipeline") {
            if let Some(bytes) = pipeline.get("min_input_bytes").and_then(|v| v.as_u64()) {
                self.pipeline.min_input_bytes = bytes as usize;
            }
            if let Some(secs) = pipeline.get("silence_fallback_secs").and_then(|v| v.as_f64()) {
                self.pipeline.silence_fallback_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl TranslationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AnswerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

impl TtsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn silence_fallback(&self) -> Duration {
        Duration::from_secs_f64(self.silence_fallback_secs)
    }
}
