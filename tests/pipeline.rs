//! Integration tests for the collect → load → report pipeline.
//!
//! Screenshots, vision calls and report calls are replaced with in-process
//! fakes, so these run offline:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use site_critic::{
    compile, load_corpus, parse_artifact, segment, AnalysisRecord, Collector, CriticConfig,
    CriticError, DiscardSink, Document, ReportReducer, ReportState, Reporter, ScreenshotSource,
    Segment, SegmentAnalyzer, SegmentCritic, SegmentError, Target,
};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A page with visible content on every row.
fn page(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(y % 251) as u8, (x % 13) as u8, 90])
    }))
}

fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])))
}

fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn doc(index: usize, text: &str) -> Document {
    Document {
        page_content: text.to_string(),
        metadata: site_critic::DocumentMetadata {
            website: "shop.example".into(),
            category: "target".into(),
            source: "target_websites/shop.example/results.txt".into(),
            segment_index: index,
            scan_index: Some(index as u32),
        },
    }
}

/// Serves the same 250-row page for every URL.
struct StaticPage;

#[async_trait]
impl ScreenshotSource for StaticPage {
    async fn capture(&self, _url: &str) -> Result<Vec<u8>, CriticError> {
        Ok(png_bytes(&page(32, 250)))
    }
}

/// Describes each segment; segment 2 of `flaky.example` always fails.
struct Describer;

#[async_trait]
impl SegmentAnalyzer for Describer {
    async fn analyze(&self, segment: &Segment) -> Result<String, SegmentError> {
        let on_flaky = segment
            .path
            .as_deref()
            .is_some_and(|p| p.to_string_lossy().contains("flaky.example"));
        if on_flaky && segment.index == 2 {
            return Err(SegmentError::LlmFailed {
                segment: 2,
                retries: 3,
                detail: "503 Service Unavailable".into(),
            });
        }
        Ok(format!(
            "Segment Analysis:\nLayout of rows {} to {} is clear.",
            segment.top, segment.bottom
        ))
    }
}

/// Critic that answers faster for later documents.
struct SlowFirstCritic;

#[async_trait]
impl SegmentCritic for SlowFirstCritic {
    async fn critique(&self, text: &str) -> Result<String, CriticError> {
        let n: u64 = text.rsplit(' ').next().and_then(|s| s.parse().ok()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(n * 8))).await;
        Ok(format!("critique: {text}"))
    }
}

#[derive(Default)]
struct CountingReducer {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ReportReducer for CountingReducer {
    async fn initial(&self, analysis: &str) -> Result<String, CriticError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(analysis.to_string());
        Ok("Navigation Flow, Brand Consistency, Conversion Funnel, Technical SEO, Emotional Journey".into())
    }

    async fn refine(&self, summary: &str, analysis: &str) -> Result<String, CriticError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(analysis.to_string());
        Ok(format!("{summary} +"))
    }
}

/// Report config that critiques segments of any length.
fn unfiltered() -> CriticConfig {
    CriticConfig::builder().min_segment_chars(0).build().unwrap()
}

fn collector(root: &Path) -> Collector {
    let config = CriticConfig::builder()
        .segment_height(100)
        .overlap(10)
        .output_root(root)
        .build()
        .unwrap();
    Collector::new(Arc::new(StaticPage), Arc::new(Describer), config)
}

// ── Segmentation ─────────────────────────────────────────────────────────────

#[test]
fn page_shorter_than_segment_height_is_one_segment() {
    let segments = segment(&page(40, 120), 2000, 50, &mut DiscardSink).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!((segments[0].index, segments[0].top, segments[0].bottom), (1, 0, 120));
}

#[test]
fn consecutive_segments_share_overlap_and_cover_the_page() {
    let (height, seg_h, overlap) = (1000, 300, 40);
    let segments = segment(&page(16, height), seg_h, overlap, &mut DiscardSink).unwrap();

    let bounds: Vec<(u32, u32)> = segments.iter().map(|s| (s.top, s.bottom)).collect();
    assert_eq!(bounds, vec![(0, 300), (260, 560), (520, 820), (780, 1000)]);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].bottom - pair[1].top, overlap);
        assert_eq!(pair[1].index, pair[0].index + 1);
    }
    assert_eq!(segments.last().unwrap().bottom, height);
    assert!(segments.iter().all(|s| s.height() <= seg_h));
}

#[test]
fn blank_pages_yield_no_segments() {
    for value in [255u8, 0] {
        let segments = segment(&solid(24, 700, value), 200, 20, &mut DiscardSink).unwrap();
        assert!(segments.is_empty(), "solid {value} page produced segments");
    }
}

#[test]
fn invalid_overlap_is_rejected() {
    let err = segment(&page(8, 50), 100, 100, &mut DiscardSink).unwrap_err();
    assert!(matches!(err, CriticError::InvalidConfig(_)));
}

// ── Artifact ─────────────────────────────────────────────────────────────────

#[test]
fn artifact_round_trips_structural_looking_lines() {
    let delimiter_body = format!("before\n{}\nafter", "-".repeat(60));
    let tricky: [&str; 4] = [
        "Segment Analysis:\nPlain body.",
        "Segment 9 looks like a header\nFolder: not a folder\n\\leading backslash",
        delimiter_body.as_str(),
        "",
    ];
    let records: Vec<AnalysisRecord> = tricky
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let index = (i + 1) as u32;
            AnalysisRecord::analysed(index, "a.com", "target", format!("segment_{index}.png"), *text)
        })
        .collect();

    let blocks = parse_artifact(&compile("a.com", "target", records).render()).unwrap();
    let bodies: Vec<&str> = blocks.iter().map(|b| b.body.as_str()).collect();
    assert_eq!(bodies, tricky.to_vec());
}

#[test]
fn artifact_with_wrong_segment_count_is_malformed() {
    let text = compile(
        "a.com",
        "target",
        vec![AnalysisRecord::analysed(1, "a.com", "target", "segment_1.png", "x")],
    )
    .render()
    .replace("Number of segments: 1", "Number of segments: 2");
    let err = parse_artifact(&text).unwrap_err();
    assert!(err.to_string().contains("declares 2 segments but contains 1"));
}

// ── Collection → corpus ──────────────────────────────────────────────────────

#[tokio::test]
async fn two_websites_with_one_failed_segment_load_six_documents() {
    let dir = tempfile::tempdir().unwrap();
    let targets = vec![
        Target::new("https://www.steady.example/", "target"),
        Target::new("https://flaky.example/pricing", "target"),
    ];
    let summary = collector(dir.path()).process_all(&targets).await;
    assert!(summary.failures.is_empty());
    assert_eq!(summary.completed.len(), 2);
    assert_eq!(summary.failed_segments(), 1);

    let dirs = BTreeMap::from([("target".to_string(), dir.path().join("target_websites"))]);
    let load = load_corpus(&dirs);
    assert!(load.skipped.is_empty());
    assert_eq!(load.documents.len(), 6);

    let failed: Vec<&Document> = load
        .documents
        .iter()
        .filter(|d| d.page_content.starts_with("Failed to process segment_2.png"))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].metadata.website, "flaky.example");
    assert!(failed[0].page_content.contains("503 Service Unavailable"));

    let websites: Vec<&str> = load
        .documents
        .iter()
        .map(|d| d.metadata.website.as_str())
        .collect();
    assert_eq!(
        websites,
        vec![
            "flaky.example",
            "flaky.example",
            "flaky.example",
            "steady.example",
            "steady.example",
            "steady.example",
        ]
    );
}

#[tokio::test]
async fn min_length_filter_drops_short_documents() {
    let docs = vec![doc(1, "ok"), doc(2, &"detailed critique ".repeat(10)), doc(3, "   ")];
    let kept = site_critic::filter_min_length(docs, 100);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].metadata.segment_index, 2);
}

// ── Report ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn map_results_keep_corpus_order() {
    let reducer = Arc::new(CountingReducer::default());
    let reporter = Reporter::new(Arc::new(SlowFirstCritic), reducer, &unfiltered());
    let docs: Vec<Document> = (1..=5).map(|i| doc(i, &format!("segment {i}"))).collect();

    let mapped = reporter.map(&docs).await;
    let positions: Vec<usize> = mapped.iter().map(|m| m.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    assert_eq!(mapped[4].text, "critique: segment 5");
}

#[tokio::test]
async fn three_documents_take_three_reduce_calls() {
    let reducer = Arc::new(CountingReducer::default());
    let reporter = Reporter::new(Arc::new(SlowFirstCritic), reducer.clone(), &unfiltered());
    let docs: Vec<Document> = (1..=3).map(|i| doc(i, &format!("segment {i}"))).collect();

    let analyses = reporter.map(&docs).await;
    let mut state = ReportState::default();
    tokio_test::assert_ok!(reporter.reduce_into(&mut state, &analyses).await);

    assert_eq!(reducer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(state.documents_consumed, 3);
    assert!(state.running_summary.ends_with("+ +"));
    let seen = reducer.seen.lock().unwrap();
    assert!(seen[0].starts_with("--- Analysis for Segment 1 ---"));
    assert!(seen[2].contains("critique: segment 3"));
}

#[tokio::test]
async fn empty_corpus_cannot_be_reported() {
    let reporter = Reporter::new(
        Arc::new(SlowFirstCritic),
        Arc::new(CountingReducer::default()),
        &CriticConfig::default(),
    );
    let err = reporter.generate(&[]).await.unwrap_err();
    assert!(matches!(err, CriticError::NoSegments { .. }));
}

#[tokio::test]
async fn report_skips_segments_below_minimum_length() {
    let reducer = Arc::new(CountingReducer::default());
    let reporter = Reporter::new(
        Arc::new(SlowFirstCritic),
        reducer.clone(),
        &CriticConfig::default(),
    );
    let long = format!("{} 1", "Pricing table columns are misaligned.".repeat(4));
    let docs = vec![doc(1, "segment 1"), doc(2, &long), doc(3, "segment 3")];

    let report = reporter.generate(&docs).await.unwrap();
    assert_eq!(report.analyses.len(), 1);
    assert_eq!(report.analyses[0].segment_index, 2);
    assert_eq!(reducer.calls.load(Ordering::SeqCst), 1);
}
