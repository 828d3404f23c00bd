//! # site-critic
//!
//! Critique websites with Vision Language Models: capture full-page
//! screenshots, slice them into overlapping segments, have a VLM analyse each
//! segment, and fold the results into one UX report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Capture   headless Chrome full-page PNG over DevTools
//!  ├─ 2. Segment   overlapping slices, dead space dropped (spawn_blocking)
//!  ├─ 3. Analyse   concurrent vision calls, failures kept as notices
//!  ├─ 4. Compile   <category>_websites/<domain>/results.txt
//!  ├─ 5. Load      artifacts → documents (index + report input)
//!  └─ 6. Report    map: critique per segment, reduce: sequential refine
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use site_critic::{
//!     load_corpus, filter_min_length, resolve_provider, CriticConfig, LlmClient, Reporter,
//! };
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CriticConfig::default();
//!     let client = LlmClient::new(resolve_provider(&config)?, &config);
//!
//!     let dirs = BTreeMap::from([("target".to_string(), config.category_dir("target"))]);
//!     let docs = filter_min_length(load_corpus(&dirs).documents, config.min_segment_chars);
//!
//!     let report = Reporter::from_client(client, &config).generate(&docs).await?;
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `site-critic` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! site-critic = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod collect;
pub mod config;
pub mod corpus;
pub mod error;
pub mod index;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod qa;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{compile, parse_artifact, read_artifact, ArtifactBlock, CompiledArtifact};
pub use collect::{load_targets_file, CollectionSummary, Collector, Target};
pub use config::{CriticConfig, CriticConfigBuilder};
pub use corpus::{filter_min_length, load_corpus, write_raw_segments, CorpusLoad};
pub use error::{CriticError, SegmentError};
pub use index::{Embedder, OpenAiEmbedder, VectorIndex};
pub use model::{AnalysisRecord, Document, DocumentMetadata, MappedAnalysis, ReportState, Segment};
pub use pipeline::capture::{ChromeScreenshotSource, ScreenshotSource};
pub use pipeline::llm::{analyze_segments, CallGate, LlmClient, SegmentAnalyzer, VisionSegmentAnalyzer};
pub use pipeline::segment::{segment, DirectorySink, DiscardSink, SegmentSink};
pub use progress::{CritiqueProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::resolve_provider;
pub use qa::{answer_question, Answer, ChatModel, LlmChat};
pub use report::{
    missing_dimensions, CritiqueReport, LlmReportReducer, LlmSegmentCritic, ReportReducer,
    Reporter, SegmentCritic,
};
