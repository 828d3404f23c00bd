//! Progress-callback trait for collection and report events.
//!
//! Inject an [`Arc<dyn CritiqueProgressCallback>`] via
//! [`crate::config::CriticConfigBuilder::progress_callback`] to receive
//! events as websites are captured, segments analysed, and the report is
//! mapped and refined.
//!
//! # Example
//!
//! ```rust
//! use site_critic::{CritiqueProgressCallback, CriticConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     analysed: AtomicUsize,
//! }
//!
//! impl CritiqueProgressCallback for CountingCallback {
//!     fn on_segment_complete(&self, website: &str, segment: u32, text_len: usize) {
//!         self.analysed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{website} segment {segment}: {text_len} chars");
//!     }
//! }
//!
//! let config = CriticConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { analysed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as work progresses.
///
/// Websites and segments are processed concurrently, so segment and map
/// events may arrive from several tasks at once; implementations must
/// synchronise shared state. Refine events are strictly sequential. All
/// methods default to no-ops.
pub trait CritiqueProgressCallback: Send + Sync {
    /// A website's capture is about to start.
    fn on_website_start(&self, url: &str, category: &str) {
        let _ = (url, category);
    }

    /// The screenshot was sliced; `segments` slices will be analysed.
    fn on_segmented(&self, website: &str, segments: usize) {
        let _ = (website, segments);
    }

    /// One segment was analysed successfully.
    fn on_segment_complete(&self, website: &str, segment: u32, text_len: usize) {
        let _ = (website, segment, text_len);
    }

    /// One segment's analysis failed; the failure notice is recorded.
    fn on_segment_error(&self, website: &str, segment: u32, error: &str) {
        let _ = (website, segment, error);
    }

    /// A website finished (successfully or not).
    fn on_website_complete(&self, website: &str, analysed: usize, failed: usize) {
        let _ = (website, analysed, failed);
    }

    /// A website was abandoned (capture or decode failure).
    fn on_website_error(&self, url: &str, error: &str) {
        let _ = (url, error);
    }

    /// The map stage is about to critique `total` documents.
    fn on_map_start(&self, total: usize) {
        let _ = total;
    }

    /// One map item finished; `failed` tells whether it errored.
    fn on_map_item(&self, position: usize, total: usize, failed: bool) {
        let _ = (position, total, failed);
    }

    /// One reduce step completed; `consumed` analyses are folded in.
    fn on_refine_step(&self, consumed: usize, total: usize) {
        let _ = (consumed, total);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CritiqueProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CriticConfig`].
pub type ProgressCallback = Arc<dyn CritiqueProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        segments_ok: AtomicUsize,
        segments_failed: AtomicUsize,
        refine_steps: AtomicUsize,
    }

    impl CritiqueProgressCallback for TrackingCallback {
        fn on_segment_complete(&self, _website: &str, _segment: u32, _text_len: usize) {
            self.segments_ok.fetch_add(1, Ordering::SeqCst);
        }

        fn on_segment_error(&self, _website: &str, _segment: u32, _error: &str) {
            self.segments_failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_refine_step(&self, _consumed: usize, _total: usize) {
            self.refine_steps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_website_start("https://a.com", "target");
        cb.on_segmented("a.com", 4);
        cb.on_segment_complete("a.com", 1, 42);
        cb.on_segment_error("a.com", 2, "boom");
        cb.on_website_complete("a.com", 3, 1);
        cb.on_map_start(3);
        cb.on_map_item(1, 3, false);
        cb.on_refine_step(1, 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_segment_complete("a.com", 1, 100);
        tracker.on_segment_complete("a.com", 3, 200);
        tracker.on_segment_error("a.com", 4, "timeout");
        tracker.on_refine_step(1, 2);
        tracker.on_refine_step(2, 2);

        assert_eq!(tracker.segments_ok.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.segments_failed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.refine_steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_map_start(10);
        cb.on_map_item(1, 10, true);
    }
}
