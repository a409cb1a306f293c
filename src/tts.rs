//! # Pashto Speech Synthesis
//!
//! Sends Pashto text to the UpliftAI text-to-speech API and returns the
//! encoded audio bytes. Synthesis is best-effort: any failure (bad input,
//! missing key, network error, non-200 status) returns `None` and the
//! pipeline substitutes silent audio.

use serde::Serialize;

use crate::config::TtsConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisRequest<'a> {
    voice_id: &'a str,
    text: &'a str,
    output_format: &'a str,
}

/// UpliftAI-backed speech synthesizer.
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    default_voice_id: String,
    output_format: String,
    max_text_chars: usize,
    api_key: Option<String>,
}

impl SpeechSynthesizer {
    pub fn new(config: &TtsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.endpoint.clone(),
            default_voice_id: config.voice_id.clone(),
            output_format: config.output_format.clone(),
            max_text_chars: config.max_text_chars,
            api_key: config.api_key.clone(),
        }
    }

    /// Whether an API key is configured.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Synthesize Pashto speech for `text`.
    ///
    /// Returns the encoded audio bytes, or `None` when the text is
    /// unsuitable or synthesis fails. Guard cases never touch the network.
    pub async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Option<Vec<u8>> {
        if text.trim().is_empty() || text == "Not available" {
            return None;
        }

        let cleaned = self.clean_for_synthesis(text);
        if cleaned.chars().count() < 2 {
            return None;
        }

        let api_key = match &self.api_key {
            Some(key) => key,
            None => {
                tracing::warn!("no speech synthesis API key configured");
                return None;
            }
        };

        let voice = voice_id.unwrap_or(&self.default_voice_id);
        let body = SynthesisRequest {
            voice_id: voice,
            text: &cleaned,
            output_format: &self.output_format,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("speech synthesis request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            tracing::error!("speech synthesis API returned {}: {}", status, detail);
            return None;
        }

        if let Some(duration) = response
            .headers()
            .get("x-uplift-ai-audio-duration")
            .and_then(|v| v.to_str().ok())
        {
            tracing::info!("synthesized audio duration: {} ms", duration);
        }

        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::error!("failed to read synthesis response body: {}", e);
                None
            }
        }
    }

    /// Normalize Pashto text for pronunciation.
    ///
    /// Adds a breathing space after sentence punctuation, drops quotes and
    /// newlines, and truncates overly long text at the configured limit.
    pub fn clean_for_synthesis(&self, text: &str) -> String {
        let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        for punct in ['؟', '!', '.', '،'] {
            text = text.replace(punct, &format!("{} ", punct));
        }

        text = text.replace(['"', '\''], "");
        while text.contains("  ") {
            text = text.replace("  ", " ");
        }
        let text = text.trim();

        if text.chars().count() > self.max_text_chars {
            let truncated: String = text.chars().take(self.max_text_chars).collect();
            format!("{}...", truncated)
        } else {
            text.to_string()
        }
    }

    /// Reshape a long Pashto answer so synthesis pauses naturally.
    ///
    /// Short answers pass through cleaning unchanged; longer ones are
    /// re-joined on the Pashto comma so the voice pauses between sentences
    /// instead of stopping dead.
    pub fn optimize_for_synthesis(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut text = text.to_string();
        if !text.ends_with(['.', '!', '؟']) {
            text.push('.');
        }

        let text = self.clean_for_synthesis(&text);

        if text.chars().count() > 100 {
            let sentences: Vec<&str> = text
                .split(['.', '!', '؟'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if sentences.len() > 1 {
                let (last, rest) = sentences.split_last().unwrap_or((&"", &[]));
                return format!("{}، {}.", rest.join("، "), last);
            }
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn synthesizer() -> SpeechSynthesizer {
        SpeechSynthesizer::new(&AppConfig::default().tts)
    }

    #[test]
    fn test_clean_adds_space_after_punctuation() {
        let tts = synthesizer();
        assert_eq!(
            tts.clean_for_synthesis("سلام،څنګه یې؟ښه یم."),
            "سلام، څنګه یې؟ ښه یم."
        );
    }

    #[test]
    fn test_clean_strips_quotes_and_newlines() {
        let tts = synthesizer();
        assert_eq!(
            tts.clean_for_synthesis("\"سلام\"\nدنیا\r'ته'"),
            "سلام دنیا ته"
        );
    }

    #[test]
    fn test_clean_truncates_long_text() {
        let tts = synthesizer();
        let long = "واو ".repeat(300);
        let cleaned = tts.clean_for_synthesis(&long);
        assert!(cleaned.ends_with("..."));
        assert!(cleaned.chars().count() <= 503);
    }

    #[test]
    fn test_optimize_short_text_gets_terminal_punctuation() {
        let tts = synthesizer();
        assert_eq!(tts.optimize_for_synthesis("دا ځواب دی"), "دا ځواب دی.");
    }

    #[test]
    fn test_optimize_long_text_rejoins_sentences_with_commas() {
        let tts = synthesizer();
        let long = "دا لومړۍ جمله ده چې د ازموینې لپاره لیکل شوې ده. \
                    دا دویمه جمله ده چې هم د ازموینې لپاره ده. \
                    دا دریمه او وروستۍ جمله ده.";
        let optimized = tts.optimize_for_synthesis(long);
        assert!(optimized.contains("،"));
        assert!(optimized.ends_with('.'));
        // No full stops left mid-text.
        assert_eq!(optimized.matches('.').count(), 1);
    }

    #[test]
    fn test_optimize_empty() {
        let tts = synthesizer();
        assert_eq!(tts.optimize_for_synthesis(""), "");
    }

    #[tokio::test]
    async fn test_guard_inputs_return_none_without_network() {
        let tts = synthesizer();
        assert_eq!(tts.synthesize("", None).await, None);
        assert_eq!(tts.synthesize("Not available", None).await, None);
        assert_eq!(tts.synthesize("a", None).await, None);
    }

    #[tokio::test]
    async fn test_missing_api_key_returns_none() {
        // Default config carries no key.
        let tts = synthesizer();
        assert_eq!(tts.synthesize("دا یوه جمله ده", None).await, None);
    }
}
