//! Website collection: capture → segment → analyse → compile, per website.
//!
//! Every website runs concurrently with its own output folder
//! `<output_root>/<category>_websites/<domain>/`. A failed capture or decode
//! abandons that website only; a failed segment becomes a failure notice in
//! the artifact.

use crate::artifact::compile;
use crate::config::CriticConfig;
use crate::error::CriticError;
use crate::pipeline::capture::{website_dir_name, ScreenshotSource};
use crate::pipeline::llm::{analyze_segments, SegmentAnalyzer};
use crate::pipeline::segment::{segment, DirectorySink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One website to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub category: String,
}

impl Target {
    pub fn new(url: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: category.into(),
        }
    }
}

/// Flatten a `{category: [urls]}` map into targets, categories in order.
pub fn targets_from_map(map: &BTreeMap<String, Vec<String>>) -> Vec<Target> {
    map.iter()
        .flat_map(|(category, urls)| urls.iter().map(move |url| Target::new(url, category)))
        .collect()
}

/// Read a JSON targets file of the form `{"target": [...], "competitors": [...]}`.
pub fn load_targets_file(path: &Path) -> Result<Vec<Target>, CriticError> {
    let text = std::fs::read_to_string(path).map_err(|e| CriticError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let map: BTreeMap<String, Vec<String>> = serde_json::from_str(&text).map_err(|e| {
        CriticError::InvalidConfig(format!("targets file {}: {e}", path.display()))
    })?;
    Ok(targets_from_map(&map))
}

/// A website that was processed to a compiled artifact.
#[derive(Debug, Clone)]
pub struct WebsiteOutcome {
    pub url: String,
    pub website: String,
    pub category: String,
    pub artifact: PathBuf,
    pub analysed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// A website that was abandoned.
#[derive(Debug, Clone)]
pub struct WebsiteFailure {
    pub url: String,
    pub category: String,
    pub error: String,
}

/// Result of [`Collector::process_all`].
#[derive(Debug, Clone, Default)]
pub struct CollectionSummary {
    pub completed: Vec<WebsiteOutcome>,
    pub failures: Vec<WebsiteFailure>,
}

impl CollectionSummary {
    pub fn failed_segments(&self) -> usize {
        self.completed.iter().map(|o| o.failed).sum()
    }
}

/// Drives the per-website pipeline.
#[derive(Clone)]
pub struct Collector {
    source: Arc<dyn ScreenshotSource>,
    analyzer: Arc<dyn SegmentAnalyzer>,
    config: CriticConfig,
}

impl Collector {
    pub fn new(
        source: Arc<dyn ScreenshotSource>,
        analyzer: Arc<dyn SegmentAnalyzer>,
        config: CriticConfig,
    ) -> Self {
        Self {
            source,
            analyzer,
            config,
        }
    }

    /// Folder receiving the segments and artifact of `website`.
    pub fn website_dir(&self, category: &str, website: &str) -> PathBuf {
        self.config.category_dir(category).join(website)
    }

    /// Capture, segment, analyse and compile one website.
    pub async fn process_website(
        &self,
        url: &str,
        category: &str,
    ) -> Result<WebsiteOutcome, CriticError> {
        let start = Instant::now();
        let website = website_dir_name(url)?;
        let callback = self.config.progress_callback.as_ref();
        if let Some(cb) = callback {
            cb.on_website_start(url, category);
        }
        info!("{}: capturing {}", website, url);

        let bytes = self.source.capture(url).await?;

        // ── Decode + segment off the async runtime ──────────────────────
        let dir = self.website_dir(category, &website);
        let (segment_height, overlap) = (self.config.segment_height, self.config.overlap);
        let site = website.clone();
        let segments = tokio::task::spawn_blocking(move || {
            let image =
                image::load_from_memory(&bytes).map_err(|e| CriticError::ImageDecode {
                    website: site,
                    detail: e.to_string(),
                })?;
            let mut sink = DirectorySink::new(dir)?;
            segment(&image, segment_height, overlap, &mut sink)
        })
        .await
        .map_err(|e| CriticError::Internal(format!("segmentation task panicked: {e}")))??;

        info!("{}: {} segments kept", website, segments.len());
        if segments.is_empty() {
            warn!("{}: screenshot is blank, compiling an empty artifact", website);
        }
        if let Some(cb) = callback {
            cb.on_segmented(&website, segments.len());
        }

        // ── Analyse + compile ───────────────────────────────────────────
        let records = analyze_segments(
            self.analyzer.as_ref(),
            &segments,
            &website,
            category,
            &self.config,
        )
        .await;
        let artifact = compile(&website, category, records);
        let failed = artifact.failed_count();
        let analysed = artifact.records.len() - failed;
        let path = artifact
            .write_to(&self.website_dir(category, &website))
            .await?;

        if let Some(cb) = callback {
            cb.on_website_complete(&website, analysed, failed);
        }
        info!(
            "{}: {} analysed, {} failed → {}",
            website,
            analysed,
            failed,
            path.display()
        );

        Ok(WebsiteOutcome {
            url: url.to_string(),
            website,
            category: category.to_string(),
            artifact: path,
            analysed,
            failed,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Process every target concurrently; failures are collected, not raised.
    pub async fn process_all(&self, targets: &[Target]) -> CollectionSummary {
        let results = futures::future::join_all(targets.iter().map(|t| async move {
            (t, self.process_website(&t.url, &t.category).await)
        }))
        .await;

        let mut summary = CollectionSummary::default();
        for (target, result) in results {
            match result {
                Ok(outcome) => summary.completed.push(outcome),
                Err(e) => {
                    warn!("Error processing {}: {}", target.url, e);
                    if let Some(cb) = &self.config.progress_callback {
                        cb.on_website_error(&target.url, &e.to_string());
                    }
                    summary.failures.push(WebsiteFailure {
                        url: target.url.clone(),
                        category: target.category.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Collection finished: {} websites compiled, {} failed",
            summary.completed.len(),
            summary.failures.len()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::read_artifact;
    use crate::error::SegmentError;
    use crate::model::Segment;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    struct PngSource;

    #[async_trait]
    impl ScreenshotSource for PngSource {
        async fn capture(&self, url: &str) -> Result<Vec<u8>, CriticError> {
            if url.contains("down") {
                return Err(CriticError::CaptureFailed {
                    url: url.into(),
                    detail: "net::ERR_NAME_NOT_RESOLVED".into(),
                });
            }
            if url.contains("garbage") {
                return Ok(b"not a png".to_vec());
            }
            let img = RgbImage::from_fn(20, 250, |x, y| Rgb([(y % 200) as u8, x as u8, 7]));
            let mut buf = Vec::new();
            DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            Ok(buf)
        }
    }

    struct FailSecond;

    #[async_trait]
    impl SegmentAnalyzer for FailSecond {
        async fn analyze(&self, segment: &Segment) -> Result<String, SegmentError> {
            if segment.index == 2 {
                Err(SegmentError::Timeout {
                    segment: 2,
                    secs: 120,
                })
            } else {
                Ok(format!("Segment Analysis:\nrows {}..{}", segment.top, segment.bottom))
            }
        }
    }

    fn collector(root: &Path) -> Collector {
        let config = CriticConfig::builder()
            .segment_height(100)
            .overlap(10)
            .output_root(root)
            .build()
            .unwrap();
        Collector::new(Arc::new(PngSource), Arc::new(FailSecond), config)
    }

    #[tokio::test]
    async fn website_is_segmented_analysed_and_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = collector(dir.path())
            .process_website("https://www.a.com/landing", "target")
            .await
            .unwrap();

        assert_eq!(outcome.website, "a.com");
        // 250 rows, height 100, step 90: [0,100) [90,190) [180,250)
        assert_eq!((outcome.analysed, outcome.failed), (2, 1));
        let site = dir.path().join("target_websites").join("a.com");
        for i in 1..=3 {
            assert!(site.join(format!("segment_{i}.png")).is_file());
        }

        let blocks = read_artifact(&outcome.artifact).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].body, "Segment Analysis:\nrows 0..100");
        assert!(blocks[1].is_failed());
        assert!(blocks[1].body.contains("timed out"));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_website() {
        let dir = tempfile::tempdir().unwrap();
        let targets = vec![
            Target::new("https://a.com", "target"),
            Target::new("https://down.example", "competitors"),
            Target::new("https://garbage.example", "competitors"),
            Target::new("not a url", "competitors"),
            Target::new("https://b.com", "competitors"),
        ];
        let summary = collector(dir.path()).process_all(&targets).await;

        let done: Vec<&str> = summary.completed.iter().map(|o| o.website.as_str()).collect();
        assert_eq!(done, vec!["a.com", "b.com"]);
        assert_eq!(summary.failures.len(), 3);
        assert!(summary.failures[0].error.contains("ERR_NAME_NOT_RESOLVED"));
        assert!(summary.failures[1].error.contains("decode"));
        assert_eq!(summary.failed_segments(), 2);
        assert!(dir
            .path()
            .join("competitors_websites/b.com/results.txt")
            .is_file());
    }

    #[test]
    fn targets_file_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(
            &path,
            r#"{"target": ["https://a.com"], "competitors": ["https://b.com", "https://c.com"]}"#,
        )
        .unwrap();
        let targets = load_targets_file(&path).unwrap();
        assert_eq!(
            targets,
            vec![
                Target::new("https://b.com", "competitors"),
                Target::new("https://c.com", "competitors"),
                Target::new("https://a.com", "target"),
            ]
        );
    }
}
