//! Configuration types for website critique runs.
//!
//! All pipeline behaviour is controlled through [`CriticConfig`], built via
//! its [`CriticConfigBuilder`]. One struct carries every knob so a run can be
//! logged, shared across tasks, and reproduced.

use crate::error::CriticError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for collection, indexing and reporting.
///
/// Built via [`CriticConfig::builder()`] or using [`CriticConfig::default()`].
///
/// # Example
/// ```rust
/// use site_critic::CriticConfig;
///
/// let config = CriticConfig::builder()
///     .segment_height(1600)
///     .overlap(80)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.segment_height, 1600);
/// ```
#[derive(Clone)]
pub struct CriticConfig {
    /// Height of one screenshot slice in pixels. Default: 2000.
    ///
    /// Tall enough to keep a hero section or pricing table in one piece,
    /// small enough that a vision model still reads body text at a 2×
    /// device scale.
    pub segment_height: u32,

    /// Rows shared by consecutive slices. Default: 50.
    ///
    /// Anything cut at a slice boundary appears whole in at least one of the
    /// two neighbours. Must be smaller than `segment_height`.
    pub overlap: u32,

    /// Number of concurrent model calls per stage. Default: 10.
    pub concurrency: usize,

    /// Process-wide cap on in-flight model calls across all websites.
    /// Default: None (only `concurrency` applies).
    ///
    /// Whole websites are processed concurrently, each with its own
    /// `concurrency` budget; set this to stay under an upstream quota.
    pub max_inflight_calls: Option<usize>,

    /// Documents whose trimmed text is shorter than this are treated as noise
    /// and never reach the map stage. Default: 100 characters.
    pub min_segment_chars: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for vision analysis and critique. Default: 0.5.
    pub temperature: f32,

    /// Sampling temperature for interactive Q&A answers. Default: 0.7.
    pub qa_temperature: f32,

    /// Maximum tokens per model response. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom vision analysis prompt. If None, uses the built-in prompt.
    pub analysis_prompt: Option<String>,

    /// Browser viewport width in CSS pixels. Default: 1280.
    pub viewport_width: u32,

    /// Maximum page height captured, in CSS pixels. Default: 12000.
    pub capture_height: u32,

    /// Device pixel ratio of the capture. Default: 2.
    pub device_scale_factor: u32,

    /// Wall-clock limit for one screenshot, in seconds. Default: 90.
    pub capture_timeout_secs: u64,

    /// Embedding model for the similarity index. Default: "text-embedding-3-small".
    pub embedding_model: String,

    /// Base URL of the OpenAI-compatible embeddings API. Default: "https://api.openai.com/v1".
    pub embedding_base_url: String,

    /// Inputs per embeddings request. Default: 64.
    pub embedding_batch_size: usize,

    /// Token ceiling of the embedding model; longer documents are logged. Default: 8191.
    pub embedding_token_limit: usize,

    /// Segments retrieved as context per question. Default: 2.
    pub qa_top_k: usize,

    /// Directory that holds `<category>_websites/`, the index, and reports. Default: ".".
    pub output_root: PathBuf,

    /// Progress events sink. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            segment_height: 2000,
            overlap: 50,
            concurrency: 10,
            max_inflight_calls: None,
            min_segment_chars: 100,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.5,
            qa_temperature: 0.7,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            analysis_prompt: None,
            viewport_width: 1280,
            capture_height: 12_000,
            device_scale_factor: 2,
            capture_timeout_secs: 90,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_batch_size: 64,
            embedding_token_limit: 8191,
            qa_top_k: 2,
            output_root: PathBuf::from("."),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CriticConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticConfig")
            .field("segment_height", &self.segment_height)
            .field("overlap", &self.overlap)
            .field("concurrency", &self.concurrency)
            .field("max_inflight_calls", &self.max_inflight_calls)
            .field("min_segment_chars", &self.min_segment_chars)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("embedding_model", &self.embedding_model)
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl CriticConfig {
    /// Create a new builder for `CriticConfig`.
    pub fn builder() -> CriticConfigBuilder {
        CriticConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding the per-website folders of `category`.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.output_root.join(format!("{category}_websites"))
    }

    /// Directory holding the persisted similarity index.
    pub fn index_dir(&self) -> PathBuf {
        self.output_root.join("combined_vectorstore")
    }

    /// Directory receiving final reports.
    pub fn reports_dir(&self) -> PathBuf {
        self.output_root.join("reports")
    }

    /// Directory receiving the pre-report corpus dumps.
    pub fn raw_segments_dir(&self) -> PathBuf {
        self.output_root.join("raw_segments")
    }
}

/// Builder for [`CriticConfig`].
pub struct CriticConfigBuilder {
    config: CriticConfig,
}

impl fmt::Debug for CriticConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl CriticConfigBuilder {
    pub fn segment_height(mut self, px: u32) -> Self {
        self.config.segment_height = px;
        self
    }

    pub fn overlap(mut self, px: u32) -> Self {
        self.config.overlap = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_inflight_calls(mut self, n: usize) -> Self {
        self.config.max_inflight_calls = Some(n.max(1));
        self
    }

    pub fn min_segment_chars(mut self, n: usize) -> Self {
        self.config.min_segment_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn qa_temperature(mut self, t: f32) -> Self {
        self.config.qa_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn analysis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.analysis_prompt = Some(prompt.into());
        self
    }

    pub fn viewport_width(mut self, px: u32) -> Self {
        self.config.viewport_width = px;
        self
    }

    pub fn capture_height(mut self, px: u32) -> Self {
        self.config.capture_height = px;
        self
    }

    pub fn device_scale_factor(mut self, factor: u32) -> Self {
        self.config.device_scale_factor = factor.clamp(1, 4);
        self
    }

    pub fn capture_timeout_secs(mut self, secs: u64) -> Self {
        self.config.capture_timeout_secs = secs;
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    pub fn embedding_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.embedding_base_url = url.into();
        self
    }

    pub fn embedding_batch_size(mut self, n: usize) -> Self {
        self.config.embedding_batch_size = n.max(1);
        self
    }

    pub fn embedding_token_limit(mut self, tokens: usize) -> Self {
        self.config.embedding_token_limit = tokens;
        self
    }

    pub fn qa_top_k(mut self, k: usize) -> Self {
        self.config.qa_top_k = k.max(1);
        self
    }

    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_root = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CriticConfig, CriticError> {
        let c = &self.config;
        if c.segment_height == 0 {
            return Err(CriticError::InvalidConfig(
                "Segment height must be ≥ 1".into(),
            ));
        }
        if c.overlap >= c.segment_height {
            return Err(CriticError::InvalidConfig(format!(
                "Overlap ({}) must be smaller than segment height ({})",
                c.overlap, c.segment_height
            )));
        }
        if c.concurrency == 0 {
            return Err(CriticError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.viewport_width == 0 || c.capture_height == 0 {
            return Err(CriticError::InvalidConfig(
                "Viewport width and capture height must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
