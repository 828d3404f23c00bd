//! Core data model shared by every pipeline stage.
//!
//! ```text
//! DynamicImage ──segment──▶ Segment ──analyze──▶ AnalysisRecord
//!                                                    │ compile
//!                                                    ▼
//!   ReportState ◀──reduce── MappedAnalysis ◀──map── Document ◀──load── results.txt
//! ```

use crate::error::SegmentError;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A horizontal slice of a full-page screenshot.
///
/// `index` is the 1-based *scan position*: slices dropped as dead space
/// still consume an index, so a sequence of kept segments may skip numbers.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u32,
    /// First pixel row (inclusive).
    pub top: u32,
    /// Last pixel row (exclusive).
    pub bottom: u32,
    pub pixels: DynamicImage,
    /// Where the sink persisted the crop, if it persisted anything.
    pub path: Option<PathBuf>,
}

impl Segment {
    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// File name the segment is stored under, e.g. `segment_3.png`.
    pub fn file_name(&self) -> String {
        segment_file_name(self.index)
    }
}

/// Canonical on-disk name for the segment at scan position `index`.
pub fn segment_file_name(index: u32) -> String {
    format!("segment_{index}.png")
}

/// One segment's vision-model output.
///
/// When the analyzer failed, `text` holds a human-readable failure notice
/// and `error` the structured cause; the record is still compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub segment_index: u32,
    pub website: String,
    pub category: String,
    pub source_path: PathBuf,
    pub processed_at: DateTime<Utc>,
    pub text: String,
    pub error: Option<SegmentError>,
}

impl AnalysisRecord {
    /// Record a successful analysis.
    pub fn analysed(
        segment_index: u32,
        website: impl Into<String>,
        category: impl Into<String>,
        source_path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            segment_index,
            website: website.into(),
            category: category.into(),
            source_path: source_path.into(),
            processed_at: Utc::now(),
            text: text.into(),
            error: None,
        }
    }

    /// Record a failed analysis; `text` becomes the visible failure notice.
    pub fn failed(
        segment_index: u32,
        website: impl Into<String>,
        category: impl Into<String>,
        source_path: impl Into<PathBuf>,
        error: SegmentError,
    ) -> Self {
        let source_path = source_path.into();
        let text = failure_notice(&source_path, &error);
        Self {
            segment_index,
            website: website.into(),
            category: category.into(),
            source_path,
            processed_at: Utc::now(),
            text,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// The segment's file name as recorded in the artifact header.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| segment_file_name(self.segment_index))
    }
}

/// The text stored in place of an analysis when the vision call failed.
pub fn failure_notice(source_path: &std::path::Path, error: &SegmentError) -> String {
    let name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.display().to_string());
    format!("Failed to process {name}: {error}")
}

/// Provenance of a corpus [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub website: String,
    pub category: String,
    /// Path of the artifact the document was parsed from.
    pub source: PathBuf,
    /// Dense 1-based position within its artifact. Canonical downstream.
    pub segment_index: usize,
    /// Scan-position id from the artifact header, when present.
    pub scan_index: Option<u32>,
}

/// One segment's analysis text, as re-read from a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

/// One map-stage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedAnalysis {
    /// 1-based position in the map input.
    pub position: usize,
    pub website: String,
    pub segment_index: usize,
    pub text: String,
    pub error: Option<String>,
}

impl MappedAnalysis {
    pub fn label(&self) -> String {
        format!("--- Analysis for Segment {} ---", self.position)
    }

    /// Label plus body, the form fed to the reducer and printed in the report.
    pub fn labeled_text(&self) -> String {
        match &self.error {
            None => format!("{}\n{}", self.label(), self.text),
            Some(e) => format!("{}\nAnalysis failed: {}", self.label(), e),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Reduce-stage accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportState {
    pub running_summary: String,
    pub documents_consumed: usize,
}

impl ReportState {
    pub fn is_empty(&self) -> bool {
        self.documents_consumed == 0
    }
}
