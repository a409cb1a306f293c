//! # Application State Management
//!
//! Shared state for the HTTP handlers: runtime configuration, request
//! metrics, the single-slot session holding the latest pipeline results,
//! and the gate that serializes pipeline runs.
//!
//! ## Concurrency model:
//! - Config and metrics use `Arc<RwLock<T>>`; handlers read, a few write.
//! - The session slot is written only by the pipeline and read by handlers.
//! - `PipelineGate` is a compare-and-swap flag with an RAII guard, so a
//!   panicking or cancelled run can never leave the server stuck busy.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::config::AppConfig;
use crate::pipeline::PipelineResult;

/// Which stored audio clip a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRole {
    PashtoQuestion,
    PashtoAnswer,
}

impl AudioRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioRole::PashtoQuestion => "pashto_question",
            AudioRole::PashtoAnswer => "pashto_answer",
        }
    }

    /// The session text field this role's audio was synthesized from.
    pub fn text_of<'a>(&self, result: &'a PipelineResult) -> &'a str {
        match self {
            AudioRole::PashtoQuestion => &result.pashto_question,
            AudioRole::PashtoAnswer => &result.pashto_answer,
        }
    }
}

impl FromStr for AudioRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pashto_question" => Ok(AudioRole::PashtoQuestion),
            "pashto_answer" => Ok(AudioRole::PashtoAnswer),
            _ => Err(anyhow::anyhow!("unknown audio type: {}", s)),
        }
    }
}

/// A stored audio clip with its content type.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl AudioArtifact {
    pub fn mp3(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "audio/mpeg",
        }
    }

    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: "audio/wav",
        }
    }
}

/// Single-slot session: the latest pipeline run's texts and audio.
///
/// Each new run replaces the previous one completely. There is no history
/// and no per-user keying; the service serves one conversation at a time.
#[derive(Debug, Default)]
pub struct SessionState {
    pub latest: Option<PipelineResult>,
    pub audio: HashMap<AudioRole, AudioArtifact>,
}

impl SessionState {
    /// Replace the session with a fresh run's output.
    pub fn store_run(
        &mut self,
        result: PipelineResult,
        question_audio: AudioArtifact,
        answer_audio: AudioArtifact,
    ) {
        self.latest = Some(result);
        self.audio.clear();
        self.audio.insert(AudioRole::PashtoQuestion, question_audio);
        self.audio.insert(AudioRole::PashtoAnswer, answer_audio);
    }

    pub fn artifact(&self, role: AudioRole) -> Option<&AudioArtifact> {
        self.audio.get(&role)
    }

    /// Overwrite one audio slot, keeping the texts.
    pub fn replace_audio(&mut self, role: AudioRole, artifact: AudioArtifact) {
        self.audio.insert(role, artifact);
    }

    /// Drop everything.
    pub fn reset(&mut self) {
        self.latest = None;
        self.audio.clear();
    }
}

/// Mutual-exclusion gate for pipeline runs.
///
/// `try_acquire` either claims the gate and returns a guard, or returns
/// `None` when a run is already in flight. The guard releases the gate on
/// drop, including on panic or task cancellation.
#[derive(Debug, Default)]
pub struct PipelineGate {
    busy: AtomicBool,
}

impl PipelineGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<PipelineGateGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(PipelineGateGuard {
                gate: Arc::clone(self),
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped.
pub struct PipelineGateGuard {
    gate: Arc<PipelineGate>,
}

impl Drop for PipelineGateGuard {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub session: Arc<RwLock<SessionState>>,
    pub gate: Arc<PipelineGate>,
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            session: Arc::new(RwLock::new(SessionState::default())),
            gate: Arc::new(PipelineGate::new()),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so other requests aren't
    /// blocked while the caller works with the config.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record timing and outcome for one request to an endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot metrics for the /metrics endpoint. Clones so no lock is
    /// held during response serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_exclusive_until_released() {
        let gate = Arc::new(PipelineGate::new());

        let guard = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_gate_releases_on_panic() {
        let gate = Arc::new(PipelineGate::new());
        let panicking = Arc::clone(&gate);

        let result = std::panic::catch_unwind(move || {
            let _guard = panicking.try_acquire().unwrap();
            panic!("run blew up");
        });
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_session_store_and_reset() {
        let mut session = SessionState::default();
        assert!(session.latest.is_none());

        session.store_run(
            PipelineResult {
                pashto_question: "پوښتنه".into(),
                english_question: "question".into(),
                pashto_answer: "ځواب".into(),
                english_answer: "answer".into(),
            },
            AudioArtifact::wav(vec![1, 2, 3]),
            AudioArtifact::mp3(vec![4, 5, 6]),
        );

        assert!(session.latest.is_some());
        assert_eq!(
            session.artifact(AudioRole::PashtoAnswer).unwrap().mime,
            "audio/mpeg"
        );

        session.reset();
        assert!(session.latest.is_none());
        assert!(session.artifact(AudioRole::PashtoQuestion).is_none());
    }

    #[test]
    fn test_store_run_replaces_previous_audio() {
        let mut session = SessionState::default();
        let result = PipelineResult {
            pashto_question: "a".into(),
            english_question: "b".into(),
            pashto_answer: "c".into(),
            english_answer: "d".into(),
        };
        session.store_run(
            result.clone(),
            AudioArtifact::wav(vec![1]),
            AudioArtifact::wav(vec![2]),
        );
        session.store_run(
            result,
            AudioArtifact::mp3(vec![9]),
            AudioArtifact::mp3(vec![8]),
        );
        assert_eq!(
            session.artifact(AudioRole::PashtoQuestion).unwrap().bytes,
            vec![9]
        );
        assert_eq!(session.audio.len(), 2);
    }

    #[test]
    fn test_audio_role_parsing() {
        assert_eq!(
            "pashto_question".parse::<AudioRole>().unwrap(),
            AudioRole::PashtoQuestion
        );
        assert!("playlist".parse::<AudioRole>().is_err());
    }

    #[test]
    fn test_metrics_accounting() {
        let state = AppState::new(AppConfig::default());
        state.increment_request_count();
        state.record_endpoint_request("POST /upload-recording", 120, false);
        state.record_endpoint_request("POST /upload-recording", 80, true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 1);
        let endpoint = &snapshot.endpoint_metrics["POST /upload-recording"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.average_duration_ms(), 100.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }
}
