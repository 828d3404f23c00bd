//! Corpus loading: compiled artifacts → discrete segment documents.
//!
//! Base directories map a category (`"target"`, `"competitors"`) to the
//! folder holding one subdirectory per website. Traversal is sorted (by
//! category, then by website folder name) so the corpus order, and with it
//! the map-stage numbering, is reproducible.

use crate::artifact::{read_artifact, write_atomic, ARTIFACT_FILE_NAME};
use crate::error::CriticError;
use crate::model::{Document, DocumentMetadata};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An artifact that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArtifact {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of [`load_corpus`].
#[derive(Debug, Clone, Default)]
pub struct CorpusLoad {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedArtifact>,
}

/// Load every `results.txt` under the given base directories.
///
/// Missing base directories and website folders without an artifact are
/// skipped silently. Unreadable or malformed artifacts are skipped with a
/// warning and listed in [`CorpusLoad::skipped`].
pub fn load_corpus(base_dirs: &BTreeMap<String, PathBuf>) -> CorpusLoad {
    let mut load = CorpusLoad::default();

    for (category, base) in base_dirs {
        let Ok(entries) = std::fs::read_dir(base) else {
            debug!("Base directory {} not found, skipping", base.display());
            continue;
        };

        let mut sites: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        sites.sort();

        for site_dir in sites {
            let artifact = site_dir.join(ARTIFACT_FILE_NAME);
            if !artifact.is_file() {
                continue;
            }
            let website = site_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match load_artifact_documents(&artifact, &website, category) {
                Ok(docs) => {
                    debug!("{}: {} documents from {}", website, docs.len(), artifact.display());
                    load.documents.extend(docs);
                }
                Err(e) => {
                    warn!("Skipping artifact {}: {}", artifact.display(), e);
                    load.skipped.push(SkippedArtifact {
                        path: artifact,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "Loaded {} documents ({} artifacts skipped)",
        load.documents.len(),
        load.skipped.len()
    );
    load
}

/// Find every `<category>_websites` directory directly under `root`.
pub fn discover_category_dirs(root: &Path) -> BTreeMap<String, PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return BTreeMap::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            let category = name.strip_suffix("_websites")?;
            (!category.is_empty()).then(|| (category.to_string(), p.clone()))
        })
        .collect()
}

/// Parse one artifact into documents, numbered densely from 1.
pub fn load_artifact_documents(
    path: &Path,
    website: &str,
    category: &str,
) -> Result<Vec<Document>, CriticError> {
    let blocks = read_artifact(path)?;
    let docs = blocks
        .into_iter()
        .filter(|b| !b.body.trim().is_empty())
        .enumerate()
        .map(|(i, block)| Document {
            page_content: block.body.trim().to_string(),
            metadata: DocumentMetadata {
                website: website.to_string(),
                category: category.to_string(),
                source: path.to_path_buf(),
                segment_index: i + 1,
                scan_index: block.scan_index(),
            },
        })
        .collect();
    Ok(docs)
}

/// Drop documents whose trimmed text is shorter than `min_chars` characters.
pub fn filter_min_length(docs: Vec<Document>, min_chars: usize) -> Vec<Document> {
    let before = docs.len();
    let kept: Vec<Document> = docs
        .into_iter()
        .filter(|d| d.page_content.trim().chars().count() >= min_chars)
        .collect();
    if kept.len() < before {
        debug!(
            "Dropped {} documents shorter than {} characters",
            before - kept.len(),
            min_chars
        );
    }
    kept
}

/// Dump `docs` to `dir/raw_segments_<timestamp>.txt` for audit.
pub async fn write_raw_segments(dir: &Path, docs: &[Document]) -> Result<PathBuf, CriticError> {
    let path = dir.join(format!("raw_segments_{}.txt", timestamp_slug()));
    write_atomic(&path, &render_raw_segments(docs)).await?;
    info!("Saved {} raw segments to {}", docs.len(), path.display());
    Ok(path)
}

fn render_raw_segments(docs: &[Document]) -> String {
    let mut out = String::from("=== RAW SEGMENTS FROM RESULTS FILE ===\n\n");
    for (i, doc) in docs.iter().enumerate() {
        let metadata = serde_json::to_string(&doc.metadata)
            .unwrap_or_else(|e| format!("<unserialisable metadata: {e}>"));
        out.push_str(&format!("--- Segment {} ---\n", i + 1));
        out.push_str(&format!("Metadata: {metadata}\n"));
        out.push_str("Content:\n");
        out.push_str(&doc.page_content);
        out.push_str("\n\n");
        out.push_str(&"=".repeat(80));
        out.push_str("\n\n");
    }
    out
}

/// Local-time stamp used in generated file names, e.g. `20261017_091244`.
pub(crate) fn timestamp_slug() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::compile;
    use crate::model::AnalysisRecord;

    fn rec(index: u32, text: &str) -> AnalysisRecord {
        AnalysisRecord::analysed(index, "site", "target", format!("segment_{index}.png"), text)
    }

    async fn write_site(base: &Path, site: &str, records: Vec<AnalysisRecord>) {
        compile(site, "target", records)
            .write_to(&base.join(site))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn loads_sorted_and_densely_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("target_websites");
        write_site(&base, "b.com", vec![rec(1, "b one")]).await;
        write_site(&base, "a.com", vec![rec(1, "a one"), rec(4, "a four")]).await;

        let dirs = BTreeMap::from([("target".to_string(), base.clone())]);
        let load = load_corpus(&dirs);

        let got: Vec<(&str, usize, Option<u32>, &str)> = load
            .documents
            .iter()
            .map(|d| {
                (
                    d.metadata.website.as_str(),
                    d.metadata.segment_index,
                    d.metadata.scan_index,
                    d.page_content.as_str(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("a.com", 1, Some(1), "a one"),
                ("a.com", 2, Some(4), "a four"),
                ("b.com", 1, Some(1), "b one"),
            ]
        );
        assert!(load.skipped.is_empty());
        assert_eq!(load.documents[0].metadata.category, "target");
    }

    #[tokio::test]
    async fn empty_bodies_are_not_documents() {
        let dir = tempfile::tempdir().unwrap();
        write_site(dir.path(), "a.com", vec![rec(1, "  \n "), rec(2, "real")]).await;
        let docs =
            load_artifact_documents(&dir.path().join("a.com/results.txt"), "a.com", "target")
                .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.segment_index, 1);
        assert_eq!(docs[0].metadata.scan_index, Some(2));
    }

    #[tokio::test]
    async fn malformed_artifact_is_skipped_others_load() {
        let dir = tempfile::tempdir().unwrap();
        write_site(dir.path(), "good.com", vec![rec(1, "fine")]).await;
        let bad = dir.path().join("bad.com");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("results.txt"), "not an artifact").unwrap();
        std::fs::create_dir_all(dir.path().join("no-artifact.com")).unwrap();

        let dirs = BTreeMap::from([
            ("target".to_string(), dir.path().to_path_buf()),
            ("competitors".to_string(), dir.path().join("missing")),
        ]);
        let load = load_corpus(&dirs);
        assert_eq!(load.documents.len(), 1);
        assert_eq!(load.skipped.len(), 1);
        assert!(load.skipped[0].path.ends_with("bad.com/results.txt"));
    }

    #[test]
    fn discovers_category_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["target_websites", "competitors_websites", "reports", "_websites"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("x_websites"), "file, not dir").unwrap();
        let found = discover_category_dirs(dir.path());
        let names: Vec<&str> = found.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["competitors", "target"]);
    }

    #[test]
    fn filter_uses_trimmed_char_count() {
        let doc = |text: &str| Document {
            page_content: text.to_string(),
            metadata: DocumentMetadata {
                website: "a.com".into(),
                category: "target".into(),
                source: PathBuf::from("results.txt"),
                segment_index: 1,
                scan_index: None,
            },
        };
        let docs = vec![doc("   short   "), doc(&"é".repeat(10)), doc(&"x".repeat(9))];
        let kept = filter_min_length(docs, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].page_content, "é".repeat(10));
    }

    #[tokio::test]
    async fn raw_segments_dump() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document {
            page_content: "Hero critique".into(),
            metadata: DocumentMetadata {
                website: "a.com".into(),
                category: "target".into(),
                source: PathBuf::from("a.com/results.txt"),
                segment_index: 1,
                scan_index: Some(1),
            },
        };
        let path = write_raw_segments(&dir.path().join("raw_segments"), &[doc])
            .await
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("raw_segments_"));
        assert!(text.starts_with("=== RAW SEGMENTS FROM RESULTS FILE ==="));
        assert!(text.contains("--- Segment 1 ---"));
        assert!(text.contains("\"website\":\"a.com\""));
        assert!(text.contains("Content:\nHero critique"));
    }
}
