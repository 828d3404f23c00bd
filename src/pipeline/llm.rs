//! Model interaction: gated, retried, time-limited calls to the provider.
//!
//! Prompt wording lives in [`crate::prompts`]; this module only owns how a
//! call is made. [`LlmClient`] is shared by the vision analyzer, the report
//! map/reduce stages and Q&A so every model call in a run goes through the
//! same [`CallGate`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are frequent when several websites are analysed at
//! once. Exponential backoff (`retry_backoff_ms * 2^attempt`) with 500 ms
//! base and 3 retries waits 500 ms → 1 s → 2 s. Each attempt runs under
//! `api_timeout_secs`; a timed-out attempt counts as a failed attempt.
//! The gate permit is held only while a request is in flight, never during
//! a backoff sleep.

use crate::config::CriticConfig;
use crate::error::SegmentError;
use crate::model::{AnalysisRecord, Segment};
use crate::pipeline::{encode, postprocess};
use crate::prompts::segment_analysis_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

// ── Call gate ────────────────────────────────────────────────────────────────

/// Process-wide limit on in-flight model calls.
///
/// Cloning shares the underlying semaphore. An unlimited gate never waits.
#[derive(Debug, Clone, Default)]
pub struct CallGate {
    semaphore: Option<Arc<Semaphore>>,
}

impl CallGate {
    /// A gate admitting at most `limit` concurrent calls; `None` is unlimited.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            semaphore: limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Wait for a slot. The slot is released when the permit is dropped.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.semaphore {
            // The semaphore is never closed, so acquisition only fails if it were.
            Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Free slots right now, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

// ── Retry loop ───────────────────────────────────────────────────────────────

/// Why a model call ultimately failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The final attempt exceeded the per-call timeout.
    TimedOut { secs: u64, retries: u32 },
    /// The final attempt returned an error.
    Failed { retries: u32, detail: String },
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::TimedOut { secs, retries } => {
                write!(f, "timed out after {secs}s ({retries} retries)")
            }
            CallFailure::Failed { retries, detail } => {
                write!(f, "failed after {retries} retries: {detail}")
            }
        }
    }
}

/// Retry policy shared by every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CriticConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

/// Run `call` until it succeeds or the policy is exhausted.
///
/// `label` identifies the call in logs (e.g. `"a.com segment 3"`).
pub async fn call_with_retry<F, Fut>(
    label: &str,
    policy: RetryPolicy,
    gate: &CallGate,
    mut call: F,
) -> Result<String, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, String>>,
{
    let mut last = CallFailure::Failed {
        retries: 0,
        detail: "Unknown error".to_string(),
    };

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        let _permit = gate.acquire().await;
        match timeout(policy.timeout, call()).await {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(detail)) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, detail);
                last = CallFailure::Failed {
                    retries: attempt,
                    detail,
                };
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    label,
                    attempt + 1,
                    policy.timeout.as_secs()
                );
                last = CallFailure::TimedOut {
                    secs: policy.timeout.as_secs(),
                    retries: attempt,
                };
            }
        }
    }

    Err(last)
}

// ── Client ───────────────────────────────────────────────────────────────────

/// A provider plus the retry policy and call gate every request goes through.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    gate: CallGate,
    policy: RetryPolicy,
    max_tokens: usize,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("gate", &self.gate)
            .field("policy", &self.policy)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmClient {
    /// Wrap `provider` with the retry and gate settings from `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &CriticConfig) -> Self {
        Self {
            provider,
            gate: CallGate::new(config.max_inflight_calls),
            policy: RetryPolicy::from_config(config),
            max_tokens: config.max_tokens,
        }
    }

    /// Share an existing gate instead of the one derived from the config.
    pub fn with_gate(mut self, gate: CallGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &CallGate {
        &self.gate
    }

    /// Send `messages` and return the cleaned answer text.
    pub async fn complete(
        &self,
        label: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, CallFailure> {
        let options = build_options(temperature, self.max_tokens);
        let start = Instant::now();
        let provider = &self.provider;
        let options = &options;

        let text = call_with_retry(label, self.policy, &self.gate, || async move {
            match provider.chat(messages, Some(options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        label, response.prompt_tokens, response.completion_tokens
                    );
                    Ok(response.content)
                }
                Err(e) => Err(e.to_string()),
            }
        })
        .await?;

        debug!("{}: completed in {:?}", label, start.elapsed());
        Ok(postprocess::clean_model_output(&text))
    }

    /// Single-prompt convenience wrapper used by the text stages.
    pub async fn prompt(
        &self,
        label: &str,
        prompt: String,
        temperature: f32,
    ) -> Result<String, CallFailure> {
        self.complete(label, &[ChatMessage::user(prompt)], temperature)
            .await
    }
}

/// Build `CompletionOptions` for one call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

// ── Segment analysis ─────────────────────────────────────────────────────────

/// Turns one screenshot segment into free-text analysis.
#[async_trait]
pub trait SegmentAnalyzer: Send + Sync {
    async fn analyze(&self, segment: &Segment) -> Result<String, SegmentError>;
}

/// Default analyzer: the UX analysis prompt plus the segment image, sent to
/// a vision model.
#[derive(Debug, Clone)]
pub struct VisionSegmentAnalyzer {
    client: LlmClient,
    prompt: Option<String>,
    temperature: f32,
}

impl VisionSegmentAnalyzer {
    pub fn new(client: LlmClient, config: &CriticConfig) -> Self {
        Self {
            client,
            prompt: config.analysis_prompt.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl SegmentAnalyzer for VisionSegmentAnalyzer {
    async fn analyze(&self, segment: &Segment) -> Result<String, SegmentError> {
        let index = segment.index;
        let pixels = segment.pixels.clone();
        let image = tokio::task::spawn_blocking(move || encode::encode_segment(&pixels))
            .await
            .map_err(|e| SegmentError::EncodeFailed {
                segment: index,
                detail: format!("encoder task panicked: {e}"),
            })?
            .map_err(|e| SegmentError::EncodeFailed {
                segment: index,
                detail: e.to_string(),
            })?;

        let prompt = segment_analysis_prompt(self.prompt.as_deref(), index);
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
        let label = format!("Segment {index}");

        self.client
            .complete(&label, &messages, self.temperature)
            .await
            .map_err(|failure| match failure {
                CallFailure::TimedOut { secs, .. } => SegmentError::Timeout {
                    segment: index,
                    secs,
                },
                CallFailure::Failed { retries, detail } => SegmentError::LlmFailed {
                    segment: index,
                    retries: retries.min(u8::MAX as u32) as u8,
                    detail,
                },
            })
    }
}

/// Analyse every segment of one website.
///
/// Runs up to `config.concurrency` calls at once and never fails: an
/// analyzer error becomes a record carrying the failure notice. Records are
/// returned sorted by segment index.
pub async fn analyze_segments(
    analyzer: &dyn SegmentAnalyzer,
    segments: &[Segment],
    website: &str,
    category: &str,
    config: &CriticConfig,
) -> Vec<AnalysisRecord> {
    let callback = config.progress_callback.as_ref();

    let mut records: Vec<AnalysisRecord> = stream::iter(segments.iter().map(|segment| async move {
        let source: PathBuf = segment
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(segment.file_name()));

        match analyzer.analyze(segment).await {
            Ok(text) => {
                debug!("{}: segment {} analysed ({} chars)", website, segment.index, text.len());
                if let Some(cb) = callback {
                    cb.on_segment_complete(website, segment.index, text.len());
                }
                AnalysisRecord::analysed(segment.index, website, category, source, text)
            }
            Err(e) => {
                warn!("{}: segment {} failed: {}", website, segment.index, e);
                if let Some(cb) = callback {
                    cb.on_segment_error(website, segment.index, &e.to_string());
                }
                AnalysisRecord::failed(segment.index, website, category, source, e)
            }
        }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

    records.sort_by_key(|r| r.segment_index);
    records
}
