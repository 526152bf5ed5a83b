//! Archive run configuration.
//!
//! `ArchiveConfig` carries every knob the CLI exposes and is serialized into
//! each checkpoint so a later phase can be re-invoked with the exact
//! parameters of the run that produced its input.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one archive run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Sitemap entry point, e.g. `https://docs.example.com/sitemap.xml`.
    pub(crate) entry_url: String,

    /// Page carrying the navigation tree widget. When `None`, prep falls
    /// back to the first discovered URL.
    pub(crate) nav_url: Option<String>,

    /// Output directory for checkpoints, per-page artifacts, and combined
    /// documents. Always created before the first write.
    pub(crate) output_dir: PathBuf,

    /// Maximum page fetches in flight. Default: 4.
    pub(crate) max_concurrency: Option<usize>,

    /// Retries per URL after the first failed attempt. Default: 3.
    pub(crate) max_retries: Option<usize>,

    /// Timeout in seconds applied to every navigation/wait. Default: 30.
    pub(crate) timeout_secs: Option<u64>,

    /// Test-mode cap: truncate the discovered URL set to this many entries.
    pub(crate) test_limit: Option<usize>,

    /// Fixed pause in milliseconds before each network attempt.
    pub(crate) request_pause_ms: Option<u64>,

    /// Fraction of fetched pages the navigation ordering must cover before
    /// it is trusted as the primary ordering. Below this, discovery order
    /// takes over for the remainder. Default: 0.5.
    pub(crate) nav_coverage_threshold: Option<f64>,

    /// Run the browser headless. Default: true.
    pub(crate) headless: bool,

    /// Overrides the built-in content selector candidates when set.
    pub(crate) content_selector: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            entry_url: String::new(),
            nav_url: None,
            output_dir: PathBuf::from("./archive"),
            max_concurrency: Some(4),
            max_retries: Some(3),
            timeout_secs: Some(30),
            test_limit: None,
            request_pause_ms: None,
            nav_coverage_threshold: Some(0.5),
            headless: true,
            content_selector: None,
        }
    }
}

impl ArchiveConfig {
    #[must_use]
    pub fn builder() -> ArchiveConfigBuilder {
        ArchiveConfigBuilder::default()
    }

    #[must_use]
    pub fn entry_url(&self) -> &str {
        &self.entry_url
    }

    #[must_use]
    pub fn nav_url(&self) -> Option<&str> {
        self.nav_url.as_deref()
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(4).max(1)
    }

    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(3)
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(30)
    }

    #[must_use]
    pub fn test_limit(&self) -> Option<usize> {
        self.test_limit
    }

    #[must_use]
    pub fn request_pause_ms(&self) -> Option<u64> {
        self.request_pause_ms
    }

    #[must_use]
    pub fn nav_coverage_threshold(&self) -> f64 {
        self.nav_coverage_threshold.unwrap_or(0.5)
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn content_selector(&self) -> Option<&str> {
        self.content_selector.as_deref()
    }
}

/// Builder for [`ArchiveConfig`].
#[derive(Debug, Default)]
pub struct ArchiveConfigBuilder {
    config: ArchiveConfig,
}

impl ArchiveConfigBuilder {
    #[must_use]
    pub fn entry_url(mut self, url: impl Into<String>) -> Self {
        self.config.entry_url = url.into();
        self
    }

    #[must_use]
    pub fn nav_url(mut self, url: impl Into<String>) -> Self {
        self.config.nav_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = Some(n);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, n: usize) -> Self {
        self.config.max_retries = Some(n);
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn test_limit(mut self, limit: usize) -> Self {
        self.config.test_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn request_pause_ms(mut self, ms: u64) -> Self {
        self.config.request_pause_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn nav_coverage_threshold(mut self, threshold: f64) -> Self {
        self.config.nav_coverage_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    #[must_use]
    pub fn content_selector(mut self, selector: impl Into<String>) -> Self {
        self.config.content_selector = Some(selector.into());
        self
    }

    /// Validate and finalize the configuration.
    pub fn build(self) -> anyhow::Result<ArchiveConfig> {
        if self.config.entry_url.is_empty() {
            anyhow::bail!("entry_url is required");
        }
        if !crate::utils::is_valid_url(&self.config.entry_url) {
            anyhow::bail!("entry_url is not a valid http(s) URL: {}", self.config.entry_url);
        }
        if let Some(nav) = &self.config.nav_url
            && !crate::utils::is_valid_url(nav)
        {
            anyhow::bail!("nav_url is not a valid http(s) URL: {nav}");
        }
        if let Some(threshold) = self.config.nav_coverage_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            anyhow::bail!("nav_coverage_threshold must be within 0.0..=1.0, got {threshold}");
        }
        Ok(self.config)
    }
}
