//! Screenshot capture: URL → full-page PNG bytes.
//!
//! The browser is a black box behind [`ScreenshotSource`]; tests substitute
//! an in-memory source. [`ChromeScreenshotSource`] drives headless Chrome
//! over DevTools through the `chrome-capture` crate.

use crate::config::CriticConfig;
use crate::error::CriticError;
use async_trait::async_trait;
use chrome_capture::{capture_full_page, find_chrome, CaptureOptions};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Produces the raw image bytes of a full-page screenshot.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn capture(&self, url: &str) -> Result<Vec<u8>, CriticError>;
}

/// Headless Chrome / Chromium screenshots.
#[derive(Debug, Clone)]
pub struct ChromeScreenshotSource {
    chrome: Option<PathBuf>,
    options: CaptureOptions,
}

impl ChromeScreenshotSource {
    /// Build from the capture settings in `config`. The executable is
    /// resolved lazily on the first capture.
    pub fn new(config: &CriticConfig) -> Self {
        Self {
            chrome: None,
            options: CaptureOptions {
                viewport_width: config.viewport_width,
                max_page_height: config.capture_height,
                device_scale_factor: config.device_scale_factor,
                timeout: Duration::from_secs(config.capture_timeout_secs),
                ..CaptureOptions::default()
            },
        }
    }

    /// Use a specific browser executable instead of auto-detection.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome = Some(path.into());
        self
    }

    /// Disable the browser sandbox (root inside containers).
    pub fn with_no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.options.no_sandbox = no_sandbox;
        self
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }
}

#[async_trait]
impl ScreenshotSource for ChromeScreenshotSource {
    async fn capture(&self, url: &str) -> Result<Vec<u8>, CriticError> {
        let capture_err = |detail: String| CriticError::CaptureFailed {
            url: url.to_string(),
            detail,
        };

        let chrome = match &self.chrome {
            Some(path) => path.clone(),
            None => find_chrome().map_err(|e| capture_err(e.to_string()))?,
        };
        debug!("Capturing {} with {}", url, chrome.display());

        let bytes = capture_full_page(&chrome, url, &self.options)
            .await
            .map_err(|e| capture_err(e.to_string()))?;

        info!("Captured {} ({} bytes)", url, bytes.len());
        Ok(bytes)
    }
}

/// Folder name for a website: the URL host, lower-cased, without a
/// trailing dot or a leading `www.`.
///
/// ```rust
/// use site_critic::pipeline::capture::website_dir_name;
/// assert_eq!(website_dir_name("https://www.Example.com/pricing").unwrap(), "example.com");
/// ```
pub fn website_dir_name(url: &str) -> Result<String, CriticError> {
    let invalid = || CriticError::InvalidUrl {
        url: url.to_string(),
    };

    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed
        .host_str()
        .ok_or_else(invalid)?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_strips_www_and_path() {
        assert_eq!(
            website_dir_name("https://www.shop.example.com/a/b?q=1").unwrap(),
            "shop.example.com"
        );
        assert_eq!(website_dir_name("http://example.org").unwrap(), "example.org");
    }

    #[test]
    fn dir_name_drops_port_and_userinfo() {
        assert_eq!(
            website_dir_name("https://user:pw@www.example.com:8443/").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn dir_name_follows_url_parsing() {
        assert_eq!(website_dir_name("https://a.com\\evil/x").unwrap(), "a.com");
        assert_eq!(website_dir_name("HTTPS://www.a.com/").unwrap(), "a.com");
        assert_eq!(website_dir_name("https://www.a.com./").unwrap(), "a.com");
        assert_eq!(website_dir_name("  https://A.com?x=1#top ").unwrap(), "a.com");
    }

    #[test]
    fn dir_name_rejects_non_http() {
        let bad_urls = [
            "ftp://example.com",
            "example.com",
            "https://",
            "mailto:x@a.com",
            "https://./",
        ];
        for bad in bad_urls {
            let err = website_dir_name(bad).unwrap_err();
            assert!(matches!(err, CriticError::InvalidUrl { .. }), "{bad}");
        }
    }

    #[test]
    fn chrome_source_takes_capture_settings() {
        let config = CriticConfig::builder()
            .viewport_width(1440)
            .capture_height(9000)
            .capture_timeout_secs(30)
            .build()
            .unwrap();
        let source = ChromeScreenshotSource::new(&config).with_no_sandbox(true);
        let opts = source.options();
        assert_eq!(opts.viewport_width, 1440);
        assert_eq!(opts.max_page_height, 9000);
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert!(opts.no_sandbox);
    }

    #[tokio::test]
    async fn missing_executable_is_capture_failure() {
        let source = ChromeScreenshotSource::new(&CriticConfig::default())
            .with_executable("/nonexistent/chrome-binary");
        let err = source.capture("https://example.com").await.unwrap_err();
        assert!(matches!(err, CriticError::CaptureFailed { .. }));
    }
}
