//! Map-reduce critique report.
//!
//! ## Stages
//!
//! 1. **Map**: one critique call per document, up to `concurrency` at once.
//!    Results are put back in input order. A failed call only marks its own
//!    item; it is shown in the report and left out of the reduction.
//! 2. **Reduce**: a sequential refine loop. The first analysis seeds the
//!    summary, every later one is merged into it. [`ReportState`] changes
//!    only after a call has returned, so dropping the future mid-call (Ctrl-C)
//!    or a failed step leaves the last complete summary in place, and calling
//!    [`Reporter::reduce_into`] again resumes after the consumed inputs.

use crate::artifact::write_atomic;
use crate::config::CriticConfig;
use crate::corpus::timestamp_slug;
use crate::error::CriticError;
use crate::model::{Document, MappedAnalysis, ReportState};
use crate::pipeline::llm::LlmClient;
use crate::progress::ProgressCallback;
use crate::prompts::{
    initial_report_prompt, refine_report_prompt, segment_critique_prompt, REPORT_DIMENSIONS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ANALYSES_HEADING: &str = "=== FINAL SEGMENT ANALYSES ===";
const SUMMARY_HEADING: &str = "=== FINAL OVERALL CRITIQUE REPORT ===";

// ── Collaborators ────────────────────────────────────────────────────────────

/// Map-stage model: critique one document's text.
#[async_trait]
pub trait SegmentCritic: Send + Sync {
    async fn critique(&self, text: &str) -> Result<String, CriticError>;
}

/// Reduce-stage model.
#[async_trait]
pub trait ReportReducer: Send + Sync {
    /// Seed the summary from the first analysis.
    async fn initial(&self, analysis: &str) -> Result<String, CriticError>;

    /// Merge `analysis` into `summary`.
    async fn refine(&self, summary: &str, analysis: &str) -> Result<String, CriticError>;
}

/// [`SegmentCritic`] backed by a chat model.
#[derive(Debug, Clone)]
pub struct LlmSegmentCritic {
    client: LlmClient,
    temperature: f32,
}

impl LlmSegmentCritic {
    pub fn new(client: LlmClient, config: &CriticConfig) -> Self {
        Self {
            client,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl SegmentCritic for LlmSegmentCritic {
    async fn critique(&self, text: &str) -> Result<String, CriticError> {
        self.client
            .prompt("map", segment_critique_prompt(text), self.temperature)
            .await
            .map_err(|e| CriticError::LlmApiError {
                stage: "map".to_string(),
                message: e.to_string(),
            })
    }
}

/// [`ReportReducer`] backed by a chat model.
#[derive(Debug, Clone)]
pub struct LlmReportReducer {
    client: LlmClient,
    temperature: f32,
}

impl LlmReportReducer {
    pub fn new(client: LlmClient, config: &CriticConfig) -> Self {
        Self {
            client,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl ReportReducer for LlmReportReducer {
    async fn initial(&self, analysis: &str) -> Result<String, CriticError> {
        self.client
            .prompt("reduce", initial_report_prompt(analysis), self.temperature)
            .await
            .map_err(|e| CriticError::LlmApiError {
                stage: "reduce".to_string(),
                message: e.to_string(),
            })
    }

    async fn refine(&self, summary: &str, analysis: &str) -> Result<String, CriticError> {
        self.client
            .prompt(
                "refine",
                refine_report_prompt(summary, analysis),
                self.temperature,
            )
            .await
            .map_err(|e| CriticError::LlmApiError {
                stage: "refine".to_string(),
                message: e.to_string(),
            })
    }
}

// ── Reporter ─────────────────────────────────────────────────────────────────

/// Runs the map and reduce stages.
#[derive(Clone)]
pub struct Reporter {
    critic: Arc<dyn SegmentCritic>,
    reducer: Arc<dyn ReportReducer>,
    concurrency: usize,
    min_segment_chars: usize,
    callback: Option<ProgressCallback>,
}

impl Reporter {
    pub fn new(
        critic: Arc<dyn SegmentCritic>,
        reducer: Arc<dyn ReportReducer>,
        config: &CriticConfig,
    ) -> Self {
        Self {
            critic,
            reducer,
            concurrency: config.concurrency.max(1),
            min_segment_chars: config.min_segment_chars,
            callback: config.progress_callback.clone(),
        }
    }

    /// LLM-backed reporter sharing one client for both stages.
    pub fn from_client(client: LlmClient, config: &CriticConfig) -> Self {
        Self::new(
            Arc::new(LlmSegmentCritic::new(client.clone(), config)),
            Arc::new(LlmReportReducer::new(client, config)),
            config,
        )
    }

    /// Documents long enough to be worth a critique call.
    fn eligible<'a>(&self, docs: &'a [Document]) -> Vec<&'a Document> {
        let kept: Vec<&Document> = docs
            .iter()
            .filter(|d| d.page_content.trim().chars().count() >= self.min_segment_chars)
            .collect();
        if kept.len() < docs.len() {
            debug!(
                "Skipping {} segments shorter than {} characters",
                docs.len() - kept.len(),
                self.min_segment_chars
            );
        }
        kept
    }

    /// Critique every document of at least `min_segment_chars` characters;
    /// output order equals input order.
    pub async fn map(&self, docs: &[Document]) -> Vec<MappedAnalysis> {
        let docs = self.eligible(docs);
        let total = docs.len();
        if let Some(cb) = &self.callback {
            cb.on_map_start(total);
        }
        info!("Map stage: critiquing {} segments", total);

        let critic = &self.critic;
        let callback = self.callback.as_ref();
        let mut mapped: Vec<MappedAnalysis> =
            stream::iter(docs.into_iter().enumerate().map(|(i, doc)| async move {
                let position = i + 1;
                let result = critic.critique(&doc.page_content).await;
                if let Some(cb) = callback {
                    cb.on_map_item(position, total, result.is_err());
                }
                let (text, error) = match result {
                    Ok(text) => {
                        debug!("Segment {}/{} critiqued ({} chars)", position, total, text.len());
                        (text, None)
                    }
                    Err(e) => {
                        warn!(
                            "Segment {}/{} ({} #{}) critique failed: {}",
                            position, total, doc.metadata.website, doc.metadata.segment_index, e
                        );
                        (String::new(), Some(e.to_string()))
                    }
                };
                MappedAnalysis {
                    position,
                    website: doc.metadata.website.clone(),
                    segment_index: doc.metadata.segment_index,
                    text,
                    error,
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        mapped.sort_by_key(|m| m.position);
        mapped
    }

    /// Fold the successful analyses into `state`, skipping the
    /// `state.documents_consumed` already folded in.
    ///
    /// # Errors
    /// - [`CriticError::NoSegments`] when no analysis succeeded
    /// - [`CriticError::ReduceFailed`] when a step fails; `state` then holds
    ///   the summary of the steps before it
    pub async fn reduce_into(
        &self,
        state: &mut ReportState,
        analyses: &[MappedAnalysis],
    ) -> Result<(), CriticError> {
        let inputs: Vec<&MappedAnalysis> = analyses.iter().filter(|a| !a.is_failed()).collect();
        if inputs.is_empty() {
            return Err(CriticError::NoSegments {
                reason: "every segment critique failed".to_string(),
            });
        }
        let total = inputs.len();
        if state.documents_consumed > 0 {
            info!(
                "Reduce stage: resuming after {}/{} analyses",
                state.documents_consumed, total
            );
        }

        for (i, analysis) in inputs.iter().enumerate().skip(state.documents_consumed) {
            let step = i + 1;
            let text = analysis.labeled_text();
            let result = if i == 0 {
                self.reducer.initial(&text).await
            } else {
                self.reducer.refine(&state.running_summary, &text).await
            };

            let summary = result.map_err(|e| CriticError::ReduceFailed {
                step,
                consumed: state.documents_consumed,
                message: e.to_string(),
            })?;

            let missing = missing_dimensions(&summary);
            if !missing.is_empty() {
                warn!(
                    "Reduce step {}/{}: summary no longer covers {}",
                    step,
                    total,
                    missing.join(", ")
                );
            }

            state.running_summary = summary;
            state.documents_consumed = step;
            debug!("Reduce step {}/{} done", step, total);
            if let Some(cb) = &self.callback {
                cb.on_refine_step(step, total);
            }
        }
        Ok(())
    }

    /// Map then reduce `docs` into a complete report.
    pub async fn generate(&self, docs: &[Document]) -> Result<CritiqueReport, CriticError> {
        if self.eligible(docs).is_empty() {
            return Err(CriticError::NoSegments {
                reason: "the corpus is empty after filtering".to_string(),
            });
        }
        let analyses = self.map(docs).await;
        let mut state = ReportState::default();
        self.reduce_into(&mut state, &analyses).await?;
        Ok(CritiqueReport::from_state(analyses, &state))
    }
}

/// Names of the evaluative dimensions `summary` does not mention.
pub fn missing_dimensions(summary: &str) -> Vec<&'static str> {
    let lower = summary.to_lowercase();
    REPORT_DIMENSIONS
        .iter()
        .copied()
        .filter(|dim| !lower.contains(&dim.to_lowercase()))
        .collect()
}

// ── Report ───────────────────────────────────────────────────────────────────

/// The end-to-end report: every map result plus the reduced summary.
#[derive(Debug, Clone)]
pub struct CritiqueReport {
    pub analyses: Vec<MappedAnalysis>,
    pub summary: String,
    pub documents_consumed: usize,
    /// Successful analyses that should have been folded in.
    pub reducible: usize,
    pub generated_at: DateTime<Utc>,
}

impl CritiqueReport {
    /// Build a report from the map results and whatever the reduce stage
    /// produced so far.
    pub fn from_state(analyses: Vec<MappedAnalysis>, state: &ReportState) -> Self {
        let reducible = analyses.iter().filter(|a| !a.is_failed()).count();
        Self {
            analyses,
            summary: state.running_summary.clone(),
            documents_consumed: state.documents_consumed,
            reducible,
            generated_at: Utc::now(),
        }
    }

    /// True when the summary does not cover every successful analysis.
    pub fn is_partial(&self) -> bool {
        self.documents_consumed < self.reducible
    }

    pub fn render(&self) -> String {
        let analyses = self
            .analyses
            .iter()
            .map(MappedAnalysis::labeled_text)
            .collect::<Vec<_>>()
            .join("\n\n");

        let summary = if self.is_partial() {
            format!(
                "[Partial report: {} of {} analyses folded into the summary]\n\n{}",
                self.documents_consumed, self.reducible, self.summary
            )
        } else {
            self.summary.clone()
        };

        [ANALYSES_HEADING, analyses.as_str(), SUMMARY_HEADING, summary.as_str()].join("\n\n")
    }

    /// Write `dir/website_analysis_<timestamp>.txt`.
    pub async fn write_report(&self, dir: &Path) -> Result<PathBuf, CriticError> {
        let path = dir.join(format!("website_analysis_{}.txt", timestamp_slug()));
        write_atomic(&path, &self.render()).await?;
        info!("Report written to {}", path.display());
        Ok(path)
    }
}
