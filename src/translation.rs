//! # Pashto to English Translation
//!
//! Shells out to a local translation model (Ollama by default) and cleans
//! the model's chatty output down to a single English sentence.
//!
//! Translation never returns an error to the pipeline: every failure mode
//! maps to a fixed sentinel string so a degraded run still produces a full
//! result set.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::TranslationConfig;

/// Returned when the input transcript is blank and there is nothing to translate.
pub const UNCLEAR_QUESTION: &str = "Please ask your question clearly in Pashto";
/// Returned when the subprocess exceeds its deadline.
pub const TIMEOUT_MESSAGE: &str = "Translation timeout - please try again";
/// Returned when the translation binary is not installed.
pub const SERVICE_UNAVAILABLE: &str = "Translation service not available";
/// Returned when the subprocess runs but fails.
pub const TRANSLATION_FAILED: &str = "Translation failed - please try again";
/// Returned when the model produces empty output.
pub const NOT_AVAILABLE: &str = "Translation not available";

/// Subprocess-backed Pashto to English translator.
pub struct Translator {
    command: Vec<String>,
    timeout: Duration,
}

impl Translator {
    pub fn new(config: &TranslationConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
        }
    }

    /// The configured translation command, for status reporting.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Translate Pashto text to English.
    ///
    /// Infallible by contract: timeouts, a missing binary, subprocess
    /// failures and empty output each yield their sentinel string.
    pub async fn pashto_to_english(&self, pashto_text: &str) -> String {
        let pashto_text = pashto_text.trim();
        if pashto_text.is_empty() {
            return UNCLEAR_QUESTION.to_string();
        }
        if self.command.is_empty() {
            return SERVICE_UNAVAILABLE.to_string();
        }

        let prompt = format!(
            "Translate this Pashto text to English:\n{}\n\nEnglish Translation:",
            pashto_text
        );

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("translation command not found: {}", self.command_line());
                return SERVICE_UNAVAILABLE.to_string();
            }
            Err(e) => {
                tracing::error!("failed to spawn translator: {}", e);
                return TRANSLATION_FAILED.to_string();
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(prompt.as_bytes()).await.is_err() {
                tracing::error!("failed to write prompt to translator stdin");
                return TRANSLATION_FAILED.to_string();
            }
            // Close stdin so the model knows the prompt is complete.
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!("translator subprocess failed: {}", e);
                return TRANSLATION_FAILED.to_string();
            }
            Err(_) => {
                tracing::warn!(
                    "translation timed out after {:.0}s",
                    self.timeout.as_secs_f64()
                );
                return TIMEOUT_MESSAGE.to_string();
            }
        };

        let raw = String::from_utf8_lossy(&output.stdout);
        let translation = clean_translation(&raw);

        if translation.is_empty() {
            tracing::warn!("translator produced empty output");
            NOT_AVAILABLE.to_string()
        } else {
            tracing::info!("translated: {}", truncate_for_log(&translation));
            translation
        }
    }
}

/// Reduce raw model output to the translation itself.
///
/// Drops echo lines (the model repeating the instruction or the Pashto
/// input), strips label prefixes and ensures terminal punctuation.
pub fn clean_translation(raw: &str) -> String {
    let clean_lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            !line.is_empty() && !lower.starts_with("translate") && !lower.starts_with("pashto")
        })
        .collect();

    let mut translation = clean_lines.join(" ").trim().to_string();

    // Compare on the original bytes: to_lowercase() can change byte length
    // for non-ASCII input, so offsets into a lowercased copy are unsafe.
    for prefix in ["english translation:", "translation:"] {
        let has_prefix = translation
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if has_prefix {
            translation = translation[prefix.len()..].trim().to_string();
        }
    }

    if !translation.is_empty() && !translation.ends_with(['.', '!', '?']) {
        translation.push('.');
    }

    translation
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(100).collect()
}
