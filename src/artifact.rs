//! Compiled per-website artifact (`results.txt`): writer and parser.
//!
//! ## Format
//!
//! ```text
//! Folder: example.com
//! Number of segments: 2
//! ================================================================================
//!
//! Segment Identifier: Segment 1
//! Segment ID: 1
//! Filename: segment_1.png
//! Folder: example.com
//! Processed At: 2026-10-17T09:12:44.120Z
//! Status: ok
//! ------------------------------------------------------------
//! <escaped body>
//! ------------------------------------------------------------
//!
//! Segment Identifier: Segment 3
//! ...
//! ```
//!
//! Body lines that could be read as structure (starting with `Segment`,
//! `Folder:` or `\`, or equal to the delimiter) get one leading `\`; the
//! parser strips exactly one. [`parse_artifact`] is the inverse of
//! [`CompiledArtifact::render`]: every body comes back byte-identical.

use crate::error::CriticError;
use crate::model::AnalysisRecord;
use chrono::SecondsFormat;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the compiled artifact inside a website folder.
pub const ARTIFACT_FILE_NAME: &str = "results.txt";

const HEADER_RULE_LEN: usize = 80;
const DELIMITER_LEN: usize = 60;
const ESCAPE: char = '\\';

fn header_rule() -> String {
    "=".repeat(HEADER_RULE_LEN)
}

fn delimiter() -> String {
    "-".repeat(DELIMITER_LEN)
}

/// All analysis records of one website, ready to be written.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub website: String,
    pub category: String,
    /// Sorted by ascending segment index.
    pub records: Vec<AnalysisRecord>,
}

/// Merge a website's records into one artifact. Failed records are kept.
pub fn compile(
    website: impl Into<String>,
    category: impl Into<String>,
    mut records: Vec<AnalysisRecord>,
) -> CompiledArtifact {
    records.sort_by_key(|r| r.segment_index);
    CompiledArtifact {
        website: website.into(),
        category: category.into(),
        records,
    }
}

impl CompiledArtifact {
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }

    /// Render the artifact text.
    pub fn render(&self) -> String {
        let delim = delimiter();
        let mut out = String::new();
        out.push_str(&format!("Folder: {}\n", single_line(&self.website)));
        out.push_str(&format!("Number of segments: {}\n", self.records.len()));
        out.push_str(&header_rule());
        out.push('\n');

        for record in &self.records {
            out.push('\n');
            out.push_str(&format!(
                "Segment Identifier: Segment {}\n",
                record.segment_index
            ));
            out.push_str(&format!("Segment ID: {}\n", record.segment_index));
            out.push_str(&format!("Filename: {}\n", single_line(&record.file_name())));
            out.push_str(&format!("Folder: {}\n", single_line(&self.website)));
            out.push_str(&format!(
                "Processed At: {}\n",
                record
                    .processed_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
            out.push_str(&format!(
                "Status: {}\n",
                if record.is_failed() { "failed" } else { "ok" }
            ));
            out.push_str(&delim);
            out.push('\n');
            for line in record.text.split('\n') {
                out.push_str(&escape_line(line));
                out.push('\n');
            }
            out.push_str(&delim);
            out.push('\n');
        }
        out
    }

    /// Write `results.txt` into `dir` (created if needed), atomically.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, CriticError> {
        let path = dir.join(ARTIFACT_FILE_NAME);
        write_atomic(&path, &self.render()).await?;
        debug!(
            "Wrote {} ({} segments, {} failed)",
            path.display(),
            self.records.len(),
            self.failed_count()
        );
        Ok(path)
    }
}

/// Write `contents` to `path` via a sibling temp file and a rename, creating
/// parent directories first.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), CriticError> {
    let write_err = |source| CriticError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn needs_escape(line: &str) -> bool {
    line.starts_with("Segment")
        || line.starts_with("Folder:")
        || line.starts_with(ESCAPE)
        || line == delimiter()
}

fn escape_line(line: &str) -> String {
    if needs_escape(line) {
        format!("{ESCAPE}{line}")
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> &str {
    line.strip_prefix(ESCAPE).unwrap_or(line)
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// One block of a parsed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBlock {
    /// Header fields in file order.
    pub fields: Vec<(String, String)>,
    /// Unescaped body text.
    pub body: String,
}

impl ArtifactBlock {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Scan-position id from the `Segment ID` header.
    pub fn scan_index(&self) -> Option<u32> {
        self.field("Segment ID").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_failed(&self) -> bool {
        self.field("Status") == Some("failed")
    }
}

/// Parse artifact text back into its blocks.
///
/// The returned error carries the 1-based line number and no path; callers
/// reading from disk attach the path.
pub fn parse_artifact(text: &str) -> Result<Vec<ArtifactBlock>, CriticError> {
    let delim = delimiter();
    let rule = header_rule();
    let malformed = |line: usize, detail: &str| CriticError::MalformedArtifact {
        path: PathBuf::new(),
        line,
        detail: detail.to_string(),
    };

    let lines: Vec<&str> = text.split('\n').collect();
    let mut pos = 0usize;

    // Preamble.
    match lines.first() {
        Some(l) if l.starts_with("Folder:") => {}
        _ => return Err(malformed(1, "missing 'Folder:' preamble")),
    }
    let declared: usize = lines
        .get(1)
        .and_then(|l| l.strip_prefix("Number of segments:"))
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| malformed(2, "missing 'Number of segments:' line"))?;
    if lines.get(2).copied() != Some(rule.as_str()) {
        return Err(malformed(3, "missing header rule"));
    }
    pos += 3;

    let mut blocks = Vec::new();
    while pos < lines.len() {
        let line = lines[pos];
        if line.trim().is_empty() {
            pos += 1;
            continue;
        }
        if !line.starts_with("Segment") {
            return Err(malformed(pos + 1, "expected a 'Segment' header line"));
        }

        // Header fields up to the opening delimiter.
        let mut fields = Vec::new();
        loop {
            let Some(&line) = lines.get(pos) else {
                return Err(malformed(pos + 1, "header without delimiter"));
            };
            pos += 1;
            if line == delim {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(malformed(pos, "header without delimiter"));
            };
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }

        // Body up to the closing delimiter.
        let mut body = Vec::new();
        loop {
            let Some(&line) = lines.get(pos) else {
                return Err(malformed(pos, "unterminated block"));
            };
            pos += 1;
            if line == delim {
                break;
            }
            body.push(unescape_line(line));
        }

        blocks.push(ArtifactBlock {
            fields,
            body: body.join("\n"),
        });
    }

    if blocks.len() != declared {
        return Err(malformed(
            2,
            &format!(
                "declares {declared} segments but contains {}",
                blocks.len()
            ),
        ));
    }
    Ok(blocks)
}

/// Read and parse the artifact at `path`.
pub fn read_artifact(path: &Path) -> Result<Vec<ArtifactBlock>, CriticError> {
    let text = std::fs::read_to_string(path).map_err(|e| CriticError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_artifact(&text).map_err(|e| e.with_artifact_path(path))
}
