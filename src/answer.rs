//! # Answer Generation
//!
//! Generates a Pashto answer for the transcribed question with the Gemini
//! REST API, then translates that answer to English through the local
//! translator. Transient API failures are retried with exponential backoff.
//!
//! Like translation, answer generation is infallible by contract: every
//! failure mode collapses to a fixed bilingual fallback pair.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::config::AnswerConfig;
use crate::retry::RetryPolicy;
use crate::translation::Translator;

pub const UNAVAILABLE_PASHTO: &str =
    "زه اوس مهال د ځواب ورکولو توان نه لرم. مهرباني وکړئ لږ وروسته بیا هڅه وکړئ.";
pub const UNAVAILABLE_ENGLISH: &str =
    "I am currently unable to provide answers. Please try again later.";

pub const TOO_SHORT_PASHTO: &str =
    "ستاسو پوښتنه ډيره لنډه ده. مهرباني وکړئ نور تفصيل وړاندې کړئ.";
pub const TOO_SHORT_ENGLISH: &str =
    "Your question is too short. Please provide more details.";

/// Substituted when the model's cleaned answer is degenerate (under 5 chars).
pub const GENERIC_PASHTO_ANSWER: &str =
    "زه ستاسو د پوښتنې په اړه فکر کوم. د ستاسو د پوښتنې ځواب دا دی: زه هڅه کوم چې په پښتو کې ګټور معلومات تاسو ته وړاندې کړم.";

/// A generated answer in both languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerPair {
    pub pashto_answer: String,
    pub english_answer: String,
}

impl AnswerPair {
    fn unavailable() -> Self {
        Self {
            pashto_answer: UNAVAILABLE_PASHTO.to_string(),
            english_answer: UNAVAILABLE_ENGLISH.to_string(),
        }
    }

    fn too_short() -> Self {
        Self {
            pashto_answer: TOO_SHORT_PASHTO.to_string(),
            english_answer: TOO_SHORT_ENGLISH.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

/// Gemini-backed answer generator.
pub struct AnswerGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    translator: Arc<Translator>,
}

impl AnswerGenerator {
    pub fn new(config: &AnswerConfig, translator: Arc<Translator>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::new(config.max_attempts, config.backoff_base()),
            translator,
        }
    }

    /// Whether an API key is configured.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a bilingual answer for a transcribed question.
    ///
    /// `english_question` is the translator's output for the same question
    /// and gives the model bilingual context.
    pub async fn generate(&self, pashto_question: &str, english_question: &str) -> AnswerPair {
        let pashto_question = pashto_question.trim();
        if pashto_question.split_whitespace().count() < 2 {
            return AnswerPair::too_short();
        }

        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => {
                tracing::warn!("no answer API key configured");
                return AnswerPair::unavailable();
            }
        };

        let prompt = build_prompt(pashto_question, english_question);

        let result = self
            .retry
            .run(|attempt| {
                let prompt = prompt.clone();
                let api_key = api_key.clone();
                async move {
                    tracing::debug!("answer generation attempt {}", attempt + 1);
                    self.request_answer(&prompt, &api_key).await
                }
            })
            .await;

        let raw_answer = match result {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("answer generation failed after retries: {}", e);
                return AnswerPair::unavailable();
            }
        };

        let mut pashto_answer = clean_answer_text(&raw_answer);
        if pashto_answer.chars().count() < 5 {
            pashto_answer = GENERIC_PASHTO_ANSWER.to_string();
        }

        let english_answer = self.translator.pashto_to_english(&pashto_answer).await;

        AnswerPair {
            pashto_answer,
            english_answer,
        }
    }

    async fn request_answer(&self, prompt: &str, api_key: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.endpoint, self.model, api_key
        );

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("answer API returned {}: {}", status, detail));
        }

        let parsed: GeminiResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(anyhow!("answer API returned an empty response"));
        }
        Ok(text)
    }
}

fn build_prompt(pashto_question: &str, english_question: &str) -> String {
    format!(
        "You are a helpful AI assistant that answers questions in Pashto.\n\
         \n\
         QUESTION IN PASHTO: {pashto_question}\n\
         QUESTION IN ENGLISH: {english_question}\n\
         \n\
         TASK: Provide a helpful answer with these EXACT requirements:\n\
         \n\
         1. Answer in CLEAR, SIMPLE Pashto (2-3 sentences max)\n\
         2. Do NOT repeat the question\n\
         3. Do NOT include \"Question:\" or \"Answer:\" labels\n\
         4. Do NOT include any explanations about the format\n\
         5. Just provide the answer directly in Pashto"
    )
}

/// Labels the model sometimes prepends despite instructions.
const LABELS_TO_REMOVE: &[&str] = &[
    "Question:",
    "Answer:",
    "PASHTO_ANSWER:",
    "ENGLISH_ANSWER:",
    "پوښتنه:",
    "ځواب:",
    "Pashto Answer:",
    "English Answer:",
    "پښتو ځواب:",
    "انګلیسي ځواب:",
    "Translation:",
    "ترجمه:",
    "Pashto:",
    "English:",
    "پښتو:",
    "انګلیسي:",
];

/// Strip markdown, leading labels and stray whitespace from a model answer.
///
/// Idempotent: running it on its own output changes nothing.
pub fn clean_answer_text(text: &str) -> String {
    let mut text = text
        .replace("**", "")
        .replace(['*', '#', '`'], "")
        .trim()
        .to_string();

    let mut stripped = true;
    while stripped {
        stripped = false;
        for label in LABELS_TO_REMOVE {
            if let Some(rest) = text.strip_prefix(label) {
                text = rest.trim().to_string();
                stripped = true;
            }
        }
    }

    let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if !text.is_empty() && !text.ends_with(['.', '!', '?', '؟']) {
        text.push('.');
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn generator(api_key: Option<&str>) -> AnswerGenerator {
        let config = AppConfig::default();
        let mut answer = config.answer;
        answer.api_key = api_key.map(String::from);
        let translator = Arc::new(Translator::new(&config.translation));
        AnswerGenerator::new(&answer, translator)
    }

    #[test]
    fn test_clean_answer_strips_markdown_and_labels() {
        assert_eq!(
            clean_answer_text("Answer: **کابل** د افغانستان پلازمېنه ده."),
            "کابل د افغانستان پلازمېنه ده."
        );
        assert_eq!(
            clean_answer_text("ځواب: پښتو ځواب: سلام"),
            "سلام."
        );
    }

    #[test]
    fn test_clean_answer_collapses_whitespace_and_punctuates() {
        assert_eq!(clean_answer_text("دا   يوه\n\nجمله ده"), "دا يوه جمله ده.");
        assert_eq!(clean_answer_text("ایا دا سمه ده؟"), "ایا دا سمه ده؟");
    }

    #[test]
    fn test_clean_answer_is_idempotent() {
        let raw = "Answer: **ځواب:** دا   ازموینه ده";
        let once = clean_answer_text(raw);
        assert_eq!(clean_answer_text(&once), once);
    }

    #[test]
    fn test_clean_answer_empty() {
        assert_eq!(clean_answer_text(""), "");
        assert_eq!(clean_answer_text("**"), "");
    }

    #[tokio::test]
    async fn test_short_question_gets_too_short_pair() {
        let gen = generator(Some("key"));
        let pair = gen.generate("سلام", "").await;
        assert_eq!(pair.pashto_answer, TOO_SHORT_PASHTO);
        assert_eq!(pair.english_answer, TOO_SHORT_ENGLISH);
    }

    #[tokio::test]
    async fn test_missing_api_key_gets_unavailable_pair() {
        let gen = generator(None);
        let pair = gen.generate("دا يوه پوښتنه ده", "this is a question").await;
        assert_eq!(pair.pashto_answer, UNAVAILABLE_PASHTO);
        assert_eq!(pair.english_answer, UNAVAILABLE_ENGLISH);
    }

    #[test]
    fn test_prompt_embeds_both_questions() {
        let prompt = build_prompt("پښتو پوښتنه", "english question");
        assert!(prompt.contains("QUESTION IN PASHTO: پښتو پوښتنه"));
        assert!(prompt.contains("QUESTION IN ENGLISH: english question"));
    }
}
