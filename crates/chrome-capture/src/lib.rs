//! # chrome-capture
//!
//! Locate a Chrome / Chromium executable and drive it over the DevTools
//! protocol to capture a full-page PNG screenshot of a URL.
//!
//! ## How it works
//!
//! 1. [`find_chrome`] resolves the browser executable once per process:
//!    `CHROME_PATH` first, then the well-known install locations for the
//!    current OS, then a scan of `PATH` for the usual binary names.
//! 2. [`capture_full_page`] launches a headless browser with a private
//!    profile, opens the URL, scrolls through the page one viewport at a
//!    time so lazily loaded content is fetched, scrolls back to the top and
//!    measures the document height.
//! 3. The screenshot is clipped to that height and rendered beyond the
//!    viewport, so the PNG covers the whole page and nothing more. Pages
//!    taller than [`CaptureOptions::max_page_height`] are cut at the cap
//!    with a warning.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrome_capture::{capture_full_page, find_chrome, CaptureOptions};
//!
//! # async fn run() {
//! let chrome = find_chrome().expect("Chrome not installed");
//! let png = capture_full_page(&chrome, "https://example.com", &CaptureOptions::default())
//!     .await
//!     .expect("capture failed");
//! assert!(png.starts_with(b"\x89PNG"));
//! # }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `CHROME_PATH` — path to a Chrome/Chromium executable; skips discovery.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as ClipRect};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable that pins the browser executable.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

/// PNG file signature, used to validate what Chrome returned.
const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by chrome-capture operations.
#[derive(Error, Debug)]
pub enum ChromeCaptureError {
    /// No browser executable could be found.
    #[error(
        "No Chrome/Chromium executable found.\n\
Install Google Chrome or Chromium, or set {CHROME_PATH_ENV}=/path/to/chrome."
    )]
    NotFound,

    /// The scratch profile directory could not be created.
    #[error("Scratch directory error: {0}")]
    ScratchDir(#[source] std::io::Error),

    /// The browser could not be started or never opened its DevTools endpoint.
    #[error("Failed to launch '{}': {detail}", path.display())]
    Launch { path: PathBuf, detail: String },

    /// The capture ran longer than the configured timeout.
    #[error("Capture of '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Navigation, scrolling or the screenshot command failed.
    #[error("Capturing '{url}' failed: {detail}")]
    Failed { url: String, detail: String },

    /// The browser answered but the image is not a PNG.
    #[error("Chrome produced no screenshot for '{url}'")]
    NoScreenshot { url: String },
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Knobs for a single capture.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// CSS viewport width in pixels. Default: 1280.
    pub viewport_width: u32,
    /// CSS viewport height in pixels; also the scroll step. Default: 900.
    pub viewport_height: u32,
    /// Tallest page captured, in CSS pixels. Default: 12000.
    pub max_page_height: u32,
    /// Device pixel ratio. Default: 2.
    pub device_scale_factor: u32,
    /// Pause after each scroll step, in ms. Default: 150.
    pub scroll_pause_ms: u64,
    /// Pause after returning to the top, before the shot, in ms. Default: 1000.
    pub settle_ms: u64,
    /// Wall-clock limit for the whole capture. Default: 90 s.
    pub timeout: Duration,
    /// Pass `--no-sandbox` (needed when running as root in containers). Default: false.
    pub no_sandbox: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 900,
            max_page_height: 12_000,
            device_scale_factor: 2,
            scroll_pause_ms: 150,
            settle_ms: 1_000,
            timeout: Duration::from_secs(90),
            no_sandbox: false,
        }
    }
}

// ── Internal: platform candidates ────────────────────────────────────────────

/// Absolute install locations checked before scanning `PATH`.
fn platform_candidates() -> &'static [&'static str] {
    match std::env::consts::OS {
        "macos" => &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ],
        "windows" => &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ],
        _ => &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ],
    }
}

/// Binary names looked up on `PATH`.
const PATH_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "chrome.exe",
];

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve the browser executable, caching the answer for the process.
///
/// - If `CHROME_PATH` is set and points to an existing file, that path is used.
/// - Otherwise the OS-specific install locations are checked.
/// - Finally every directory on `PATH` is scanned for the usual names.
pub fn find_chrome() -> Result<PathBuf, ChromeCaptureError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve_chrome()?;
    let _ = RESOLVED_PATH.set(path.clone());
    Ok(path)
}

/// Capture the whole of `url` as a PNG using the browser at `chrome`.
///
/// Launch, navigation, scrolling and the screenshot share one
/// `options.timeout` budget. The browser is closed before returning.
pub async fn capture_full_page(
    chrome: &Path,
    url: &str,
    options: &CaptureOptions,
) -> Result<Vec<u8>, ChromeCaptureError> {
    let timed_out = || ChromeCaptureError::Timeout {
        url: url.to_string(),
        secs: options.timeout.as_secs(),
    };
    let launch_err = |detail: String| ChromeCaptureError::Launch {
        path: chrome.to_path_buf(),
        detail,
    };

    let profile = tempfile::tempdir().map_err(ChromeCaptureError::ScratchDir)?;
    let config = browser_config(chrome, profile.path(), options).map_err(launch_err)?;

    let started = Instant::now();
    let (mut browser, mut handler) = tokio::time::timeout(options.timeout, Browser::launch(config))
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| launch_err(e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    let remaining = options.timeout.saturating_sub(started.elapsed());
    let outcome = tokio::time::timeout(remaining, shoot(&browser, url, options)).await;

    if let Err(e) = browser.close().await {
        debug!("Closing browser after {} failed: {}", url, e);
    }
    let _ = browser.wait().await;
    handler_task.abort();

    outcome.map_err(|_| timed_out())?
}

/// Clip height for a page `page_height` CSS pixels tall, and whether the
/// page was cut at `max_page_height`.
pub fn clip_height(page_height: u32, max_page_height: u32) -> (u32, bool) {
    let max = max_page_height.max(1);
    (page_height.clamp(1, max), page_height > max)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn browser_config(
    chrome: &Path,
    profile_dir: &Path,
    options: &CaptureOptions,
) -> Result<BrowserConfig, String> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome)
        .user_data_dir(profile_dir)
        .window_size(options.viewport_width, options.viewport_height)
        .viewport(Viewport {
            width: options.viewport_width,
            height: options.viewport_height,
            device_scale_factor: Some(f64::from(options.device_scale_factor.max(1))),
            ..Viewport::default()
        })
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-gpu")
        .arg("--log-level=3");
    if options.no_sandbox {
        builder = builder.no_sandbox();
    }
    builder.build()
}

async fn shoot(
    browser: &Browser,
    url: &str,
    options: &CaptureOptions,
) -> Result<Vec<u8>, ChromeCaptureError> {
    let failed = |detail: String| ChromeCaptureError::Failed {
        url: url.to_string(),
        detail,
    };

    let page = browser
        .new_page(url)
        .await
        .map_err(|e| failed(e.to_string()))?;
    let page_height = scroll_and_measure(&page, options)
        .await
        .map_err(|e| failed(format!("measuring page height: {e}")))?;

    let (height, truncated) = clip_height(page_height, options.max_page_height);
    if truncated {
        warn!(
            "{} is {}px tall; capturing only the first {}px",
            url, page_height, height
        );
    } else {
        debug!("{} is {}px tall", url, page_height);
    }

    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .clip(ClipRect {
            x: 0.0,
            y: 0.0,
            width: f64::from(options.viewport_width),
            height: f64::from(height),
            scale: 1.0,
        })
        .capture_beyond_viewport(true)
        .build();
    let png = page
        .screenshot(params)
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !png.starts_with(PNG_MAGIC) {
        return Err(ChromeCaptureError::NoScreenshot {
            url: url.to_string(),
        });
    }
    Ok(png)
}

/// Scroll to the bottom (stopping at the cap) and back, returning the
/// final document height in CSS pixels.
async fn scroll_and_measure(page: &Page, options: &CaptureOptions) -> Result<u32, String> {
    let height: f64 = page
        .evaluate(scroll_script(options))
        .await
        .map_err(|e| e.to_string())?
        .into_value()
        .map_err(|e| e.to_string())?;
    if !height.is_finite() || height < 0.0 {
        return Err(format!("page reported height {height}"));
    }
    Ok(height.ceil().min(f64::from(u32::MAX)) as u32)
}

fn scroll_script(options: &CaptureOptions) -> String {
    format!(
        r#"
        (async () => {{
            const pause = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
            const height = () => Math.max(
                document.body ? document.body.scrollHeight : 0,
                document.documentElement ? document.documentElement.scrollHeight : 0
            );
            const step = Math.max(window.innerHeight, {step});
            for (let y = 0; y < Math.min(height(), {max}); y += step) {{
                window.scrollTo(0, y);
                await pause({pause});
            }}
            window.scrollTo(0, 0);
            await pause({settle});
            return height();
        }})()
        "#,
        step = options.viewport_height.max(1),
        max = options.max_page_height,
        pause = options.scroll_pause_ms,
        settle = options.settle_ms,
    )
}

fn resolve_chrome() -> Result<PathBuf, ChromeCaptureError> {
    // 1. Environment variable override.
    if let Ok(env_path) = std::env::var(CHROME_PATH_ENV) {
        let p = PathBuf::from(env_path);
        if p.is_file() {
            return Ok(p);
        }
        warn!(
            "{} '{}' not found; searching for Chrome",
            CHROME_PATH_ENV,
            p.display()
        );
    }

    // 2. Well-known install locations.
    if let Some(p) = platform_candidates()
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
    {
        return Ok(p);
    }

    // 3. PATH scan.
    let path_var = std::env::var_os("PATH").ok_or(ChromeCaptureError::NotFound)?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.is_file())
        .ok_or(ChromeCaptureError::NotFound)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_follows_page_height_below_cap() {
        assert_eq!(clip_height(3_400, 12_000), (3_400, false));
        assert_eq!(clip_height(12_000, 12_000), (12_000, false));
    }

    #[test]
    fn clip_is_cut_at_cap() {
        assert_eq!(clip_height(30_000, 12_000), (12_000, true));
    }

    #[test]
    fn clip_never_empty() {
        assert_eq!(clip_height(0, 12_000), (1, false));
        assert_eq!(clip_height(50, 0), (1, true));
    }

    #[test]
    fn scroll_script_uses_capture_settings() {
        let opts = CaptureOptions {
            viewport_height: 700,
            max_page_height: 9_000,
            scroll_pause_ms: 25,
            settle_ms: 400,
            ..CaptureOptions::default()
        };
        let script = scroll_script(&opts);
        assert!(script.contains("Math.max(window.innerHeight, 700)"));
        assert!(script.contains("Math.min(height(), 9000)"));
        assert!(script.contains("await pause(25)"));
        assert!(script.contains("await pause(400)"));
        assert!(script.trim_end().ends_with("})()"));
    }

    #[test]
    fn browser_config_accepts_options() {
        let opts = CaptureOptions {
            no_sandbox: true,
            ..CaptureOptions::default()
        };
        assert!(browser_config(Path::new("/usr/bin/chromium"), Path::new("/tmp/p"), &opts).is_ok());
    }

    #[test]
    fn platform_candidates_nonempty() {
        assert!(!platform_candidates().is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let err = capture_full_page(
            Path::new("/definitely/not/a/chrome"),
            "https://example.com",
            &CaptureOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChromeCaptureError::Launch { .. }), "got: {err}");
    }

    /// A browser that floods stderr must fail within the deadline, not stall on a full pipe.
    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_browser_does_not_stall_past_the_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chatty-chrome");
        std::fs::write(
            &fake,
            "#!/bin/sh\nhead -c 200000 /dev/zero | tr '\\0' x >&2\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let opts = CaptureOptions {
            timeout: Duration::from_secs(10),
            ..CaptureOptions::default()
        };
        let started = Instant::now();
        let err = capture_full_page(&fake, "https://example.com", &opts)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(15), "took {:?}", started.elapsed());
        assert!(
            matches!(
                err,
                ChromeCaptureError::Launch { .. } | ChromeCaptureError::Timeout { .. }
            ),
            "got: {err}"
        );
    }
}
