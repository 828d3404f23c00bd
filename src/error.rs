//! Error types for the site-critic library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CriticError`] — **Fatal** for the operation that returned it: a
//!   website could not be captured, an artifact is malformed, a refine step
//!   failed, the provider is not configured. Whole-batch operations catch it
//!   per website so one bad site never aborts its siblings.
//!
//! * [`SegmentError`] — **Non-fatal**: a single segment's vision call failed
//!   but the rest of the page is fine. Stored inside
//!   [`crate::model::AnalysisRecord`] and rendered into the compiled artifact
//!   as a visible failure notice, so "what wasn't analysed" stays auditable.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the site-critic library.
#[derive(Debug, Error)]
pub enum CriticError {
    // ── Capture errors ────────────────────────────────────────────────────
    /// The URL is not an absolute HTTP/HTTPS URL with a host.
    #[error("Invalid website URL '{url}': expected http(s)://host/…")]
    InvalidUrl { url: String },

    /// The screenshot source could not produce an image.
    #[error("Screenshot capture failed for '{url}': {detail}")]
    CaptureFailed { url: String, detail: String },

    /// The captured bytes are not a decodable image.
    #[error("Could not decode screenshot for '{website}': {detail}")]
    ImageDecode { website: String, detail: String },

    /// The image has zero height (or width) and cannot be segmented.
    #[error("Image is empty ({width}x{height}); nothing to segment")]
    EmptyImage { width: u32, height: u32 },

    /// A segment could not be written to its output directory.
    #[error("Failed to write segment {index} to '{path}': {detail}")]
    SegmentWriteFailed {
        index: u32,
        path: PathBuf,
        detail: String,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A text model call failed after all retries.
    #[error("LLM API error during {stage}: {message}")]
    LlmApiError { stage: String, message: String },

    /// A refine step failed; the report cannot be completed.
    ///
    /// `consumed` is how many analyses the running summary already covers.
    #[error("Report reduce step {step} failed after {consumed} analyses: {message}")]
    ReduceFailed {
        step: usize,
        consumed: usize,
        message: String,
    },

    /// Every document was filtered out or failed; there is nothing to report on.
    #[error("No segments to analyse: {reason}")]
    NoSegments { reason: String },

    // ── Artifact / corpus errors ──────────────────────────────────────────
    /// A compiled `results.txt` does not follow the artifact format.
    #[error("Malformed artifact '{path}' (line {line}): {detail}")]
    MalformedArtifact {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    // ── Index errors ──────────────────────────────────────────────────────
    /// The embedding endpoint failed or returned an unusable response.
    #[error("Embedding request failed: {0}")]
    EmbeddingFailed(String),

    /// The similarity index could not be read or written.
    #[error("Vector index error at '{path}': {detail}")]
    IndexIo { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CriticError {
    /// Attach a line number to a [`CriticError::MalformedArtifact`] produced
    /// by the in-memory parser, which does not know the file path.
    pub(crate) fn with_artifact_path(self, path: &std::path::Path) -> Self {
        match self {
            CriticError::MalformedArtifact { line, detail, .. } => {
                CriticError::MalformedArtifact {
                    path: path.to_path_buf(),
                    line,
                    detail,
                }
            }
            other => other,
        }
    }
}

/// A non-fatal error for a single segment.
///
/// Stored alongside [`crate::model::AnalysisRecord`] when a segment fails.
/// The website's analysis continues with the remaining segments.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum SegmentError {
    /// The segment crop could not be encoded for the vision API.
    #[error("Segment {segment}: image encoding failed: {detail}")]
    EncodeFailed { segment: u32, detail: String },

    /// Vision call failed after retries.
    #[error("Segment {segment}: vision call failed after {retries} retries: {detail}")]
    LlmFailed {
        segment: u32,
        retries: u8,
        detail: String,
    },

    /// Vision call timed out.
    #[error("Segment {segment}: vision call timed out after {secs}s")]
    Timeout { segment: u32, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_failed_display() {
        let e = CriticError::ReduceFailed {
            step: 4,
            consumed: 3,
            message: "rate limited".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("step 4"), "got: {msg}");
        assert!(msg.contains("3 analyses"), "got: {msg}");
    }

    #[test]
    fn malformed_artifact_gets_path() {
        let e = CriticError::MalformedArtifact {
            path: PathBuf::new(),
            line: 7,
            detail: "unterminated block".into(),
        }
        .with_artifact_path(std::path::Path::new("target_websites/a.com/results.txt"));
        let msg = e.to_string();
        assert!(msg.contains("a.com/results.txt"), "got: {msg}");
        assert!(msg.contains("line 7"), "got: {msg}");
    }

    #[test]
    fn segment_timeout_display() {
        let e = SegmentError::Timeout {
            segment: 3,
            secs: 60,
        };
        assert!(e.to_string().contains("Segment 3"));
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn segment_error_serialises() {
        let e = SegmentError::LlmFailed {
            segment: 2,
            retries: 3,
            detail: "503".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: SegmentError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
