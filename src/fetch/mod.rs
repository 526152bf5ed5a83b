//! Concurrent page fetching with retries and skip-if-cached resumability.
//!
//! All URLs are scheduled at once; a semaphore bounds how many are actually
//! in flight, and a single collector consumes completions, so the shared
//! result map never has concurrent writers. One URL exhausting its retries
//! is logged and omitted; it never aborts the batch. Artifacts are written
//! the moment a page succeeds so an interrupted run resumes for free.

use anyhow::{Context, Result};
use chromiumoxide::Browser;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::utils::url_slug;

/// Base delay for exponential backoff between retry attempts.
const BACKOFF_BASE_MS: u64 = 500;
/// Backoff ceiling; beyond this waiting longer only wastes the run.
const BACKOFF_CAP_MS: u64 = 30_000;

/// Content containers tried in priority order; `body` is the catch-all.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    ".markdown-body",
    ".theme-doc-markdown",
    "#content",
    ".content",
    "body",
];

/// Fetched page content. Created once per URL during fetch and immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    /// Extracted HTML body.
    pub body: String,
    pub markdown: Option<String>,
    /// Path of the on-disk HTML artifact this content is mirrored at.
    pub source_path: PathBuf,
}

/// Structured sidecar persisted next to the HTML artifact so cache recovery
/// never has to re-parse generated output.
#[derive(Debug, Serialize, Deserialize)]
struct PageSidecar {
    url: String,
    title: String,
}

// Returns {title, body} using the first selector whose element has real
// text content.
const EXTRACT_CONTENT_JS: &str = r#"
    (function(selectors) {
        for (const sel of selectors) {
            const el = document.querySelector(sel);
            if (el && el.textContent && el.textContent.trim().length > 0) {
                return { title: document.title || '', body: el.innerHTML };
            }
        }
        return { title: document.title || '', body: '' };
    })"#;

#[derive(Debug, Deserialize)]
struct ExtractedContent {
    title: String,
    body: String,
}

/// Run `attempt` up to `max_retries + 1` times with exponential backoff
/// between failures.
///
/// Generic over the attempt future so retry semantics are testable without
/// a browser.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_retries: usize,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt_number in 0..=max_retries {
        match attempt().await {
            Ok(value) => {
                if attempt_number > 0 {
                    debug!("{label}: succeeded on attempt {}", attempt_number + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(
                    "{label}: attempt {}/{} failed: {e}",
                    attempt_number + 1,
                    max_retries + 1
                );
                last_error = Some(e);
                if attempt_number < max_retries {
                    let delay = backoff_delay(attempt_number);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("{label}: no attempts were made")))
}

/// Delay before the retry following failed attempt `attempt_number`
/// (0-based). Doubles each time, capped at [`BACKOFF_CAP_MS`].
#[must_use]
pub fn backoff_delay(attempt_number: usize) -> Duration {
    let exp = u32::try_from(attempt_number.min(16)).unwrap_or(16);
    let ms = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(exp));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}

/// Result of one fetch batch: what was recovered and what gave up.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub content: HashMap<String, PageContent>,
    pub failed: Vec<String>,
    pub from_cache: usize,
}

/// Fetches every URL under bounded concurrency.
pub struct FetchScheduler<'a> {
    browser: &'a Browser,
    config: &'a ArchiveConfig,
}

impl<'a> FetchScheduler<'a> {
    #[must_use]
    pub fn new(browser: &'a Browser, config: &'a ArchiveConfig) -> Self {
        Self { browser, config }
    }

    /// Fetch all URLs, tolerating partial failure.
    ///
    /// Every URL is scheduled immediately; the semaphore keeps at most
    /// `max_concurrency` in flight. The returned map holds one entry per
    /// URL that succeeded or was recovered from cache. Per-URL fetch
    /// failures are logged and omitted; an artifact that cannot be written
    /// aborts the whole batch, since every further write would fail the
    /// same way.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<FetchBatch, ArchiveError> {
        let semaphore = Semaphore::new(self.config.max_concurrency());
        let mut tasks = FuturesUnordered::new();

        for url in urls {
            let semaphore = &semaphore;
            tasks.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let outcome = self.fetch_one(url).await;
                (url.clone(), outcome)
            });
        }

        let mut batch = FetchBatch::default();
        while let Some((url, outcome)) = tasks.next().await {
            match outcome {
                Ok((content, cached)) => {
                    if cached {
                        batch.from_cache += 1;
                    }
                    batch.content.insert(url, content);
                }
                Err(e @ ArchiveError::Persistence { .. }) => return Err(e),
                Err(e) => {
                    warn!("Giving up on {url}: {e}");
                    batch.failed.push(url);
                }
            }
        }

        info!(
            "Fetch batch complete: {} ok ({} from cache), {} failed",
            batch.content.len(),
            batch.from_cache,
            batch.failed.len()
        );
        Ok(batch)
    }

    /// Fetch a single URL: cache recovery first, then retried navigation.
    /// The bool is true when the content came from cache.
    async fn fetch_one(&self, url: &str) -> Result<(PageContent, bool), ArchiveError> {
        let slug = url_slug(url);

        if let Some(cached) = load_cached(self.config.output_dir(), url, &slug).await {
            debug!("Cache hit for {url} (slug {slug})");
            return Ok((cached, true));
        }

        let max_retries = self.config.max_retries();
        let content = retry_with_backoff(url, max_retries, || async {
            if let Some(pause_ms) = self.config.request_pause_ms() {
                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
            }
            self.fetch_fresh(url, &slug).await
        })
        .await
        .map_err(|e| ArchiveError::Fetch {
            url: url.to_string(),
            attempts: max_retries + 1,
            reason: e.to_string(),
        })?;

        persist_artifacts(self.config.output_dir(), &slug, &content).await?;

        Ok((content, false))
    }

    async fn fetch_fresh(&self, url: &str, slug: &str) -> Result<PageContent> {
        let timeout = Duration::from_secs(self.config.timeout_secs());
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("creating page")?;

        let result = async {
            tokio::time::timeout(timeout, page.goto(url))
                .await
                .map_err(|_| anyhow::anyhow!("navigation to {url} timed out"))?
                .with_context(|| format!("navigation to {url} failed"))?;
            let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;

            let selectors = self.selector_candidates();
            let expr = format!(
                "{EXTRACT_CONTENT_JS}({})",
                serde_json::to_string(&selectors).expect("selector list serializes")
            );
            let extracted: ExtractedContent = tokio::time::timeout(timeout, page.evaluate(expr))
                .await
                .map_err(|_| anyhow::anyhow!("content extraction timed out for {url}"))?
                .context("content extraction failed")?
                .into_value()
                .context("parsing extracted content")?;

            Ok::<_, anyhow::Error>(extracted)
        }
        .await;

        if let Err(e) = page.close().await {
            debug!("Page close failed: {e}");
        }
        let extracted = result?;

        // An empty extraction still occupies its slot so downstream
        // assembly never silently loses a URL.
        let (title, body) = if extracted.body.trim().is_empty() {
            warn!("No content extracted from {url}; emitting placeholder");
            let title = if extracted.title.is_empty() {
                slug.to_string()
            } else {
                extracted.title
            };
            (title, "<p>(no content extracted)</p>".to_string())
        } else {
            let title = if extracted.title.is_empty() {
                slug.to_string()
            } else {
                extracted.title
            };
            (title, extracted.body)
        };

        let markdown = match htmd::convert(&body) {
            Ok(md) => Some(md),
            Err(e) => {
                warn!("Markdown conversion failed for {url}: {e}");
                None
            }
        };

        Ok(PageContent {
            url: url.to_string(),
            title,
            body,
            markdown,
            source_path: html_artifact_path(self.config.output_dir(), slug),
        })
    }

    fn selector_candidates(&self) -> Vec<String> {
        let mut selectors: Vec<String> = Vec::with_capacity(CONTENT_SELECTORS.len() + 1);
        if let Some(custom) = self.config.content_selector() {
            selectors.push(custom.to_string());
        }
        selectors.extend(CONTENT_SELECTORS.iter().map(|s| (*s).to_string()));
        selectors
    }
}

fn html_artifact_path(output_dir: &Path, slug: &str) -> PathBuf {
    output_dir.join("html").join(format!("{slug}.html"))
}

fn markdown_artifact_path(output_dir: &Path, slug: &str) -> PathBuf {
    output_dir.join("md").join(format!("{slug}.md"))
}

fn sidecar_path(output_dir: &Path, slug: &str) -> PathBuf {
    output_dir.join("meta").join(format!("{slug}.json"))
}

/// Write the per-page artifacts, classifying any write failure as a fatal
/// persistence error: a full or unwritable disk fails every later page the
/// same way, and the phase must not report success with content missing.
async fn persist_artifacts(
    output_dir: &Path,
    slug: &str,
    content: &PageContent,
) -> Result<(), ArchiveError> {
    save_artifacts(output_dir, slug, content)
        .await
        .map_err(|source| ArchiveError::Persistence {
            path: html_artifact_path(output_dir, slug).display().to_string(),
            source,
        })
}

/// Recover previously fetched content from on-disk artifacts.
///
/// Requires both the HTML artifact and its sidecar; any read or parse
/// failure returns `None` so the caller falls through to a real fetch.
pub async fn load_cached(output_dir: &Path, url: &str, slug: &str) -> Option<PageContent> {
    let html_path = html_artifact_path(output_dir, slug);
    let meta_path = sidecar_path(output_dir, slug);

    let body = tokio::fs::read_to_string(&html_path).await.ok()?;
    let meta_raw = tokio::fs::read_to_string(&meta_path).await.ok()?;
    let sidecar: PageSidecar = match serde_json::from_str(&meta_raw) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            warn!("Corrupt sidecar {} ({e}); re-fetching", meta_path.display());
            return None;
        }
    };
    if sidecar.url != url {
        // Slug collision between two different URLs; the artifact belongs
        // to the other one.
        warn!(
            "Sidecar URL mismatch for slug {slug}: expected {url}, found {}",
            sidecar.url
        );
        return None;
    }

    let markdown = tokio::fs::read_to_string(markdown_artifact_path(output_dir, slug))
        .await
        .ok();

    Some(PageContent {
        url: url.to_string(),
        title: sidecar.title,
        body,
        markdown,
        source_path: html_path,
    })
}

/// Write the per-page artifacts: HTML body, markdown rendering, and the
/// sidecar used by cache recovery.
pub async fn save_artifacts(output_dir: &Path, slug: &str, content: &PageContent) -> Result<()> {
    let html_path = html_artifact_path(output_dir, slug);
    let meta_path = sidecar_path(output_dir, slug);

    for path in [&html_path, &meta_path] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    tokio::fs::write(&html_path, &content.body)
        .await
        .with_context(|| format!("writing {}", html_path.display()))?;

    let sidecar = PageSidecar {
        url: content.url.clone(),
        title: content.title.clone(),
    };
    let meta_json = serde_json::to_string_pretty(&sidecar).context("serializing sidecar")?;
    tokio::fs::write(&meta_path, meta_json)
        .await
        .with_context(|| format!("writing {}", meta_path.display()))?;

    if let Some(markdown) = &content.markdown {
        let md_path = markdown_artifact_path(output_dir, slug);
        if let Some(parent) = md_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&md_path, markdown)
            .await
            .with_context(|| format!("writing {}", md_path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert!(backoff_delay(3) > backoff_delay(2));
        assert_eq!(backoff_delay(20), Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_on_final_allowed_attempt() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff("test", 3, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    anyhow::bail!("transient");
                }
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff("test", 2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("always fails") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn artifacts_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://docs.example.com/guide/intro";
        let slug = url_slug(url);
        let content = PageContent {
            url: url.to_string(),
            title: "Intro".to_string(),
            body: "<h1>Intro</h1><p>Welcome.</p>".to_string(),
            markdown: Some("# Intro\n\nWelcome.".to_string()),
            source_path: dir.path().join("html").join(format!("{slug}.html")),
        };

        save_artifacts(dir.path(), &slug, &content).await.unwrap();
        let recovered = load_cached(dir.path(), url, &slug).await.unwrap();

        assert_eq!(recovered.title, content.title);
        assert_eq!(recovered.body, content.body);
        assert_eq!(recovered.markdown, content.markdown);
        assert_eq!(recovered.url, url);
    }

    #[tokio::test]
    async fn cache_miss_on_url_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://docs.example.com/a";
        let slug = url_slug(url);
        let content = PageContent {
            url: url.to_string(),
            title: "A".to_string(),
            body: "<p>a</p>".to_string(),
            markdown: None,
            source_path: dir.path().join("html").join(format!("{slug}.html")),
        };
        save_artifacts(dir.path(), &slug, &content).await.unwrap();

        assert!(load_cached(dir.path(), "https://docs.example.com/other", &slug)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn artifact_write_failure_is_fatal_persistence() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the output directory should be makes every
        // artifact write fail.
        let blocked = dir.path().join("out");
        tokio::fs::write(&blocked, "not a directory").await.unwrap();

        let content = PageContent {
            url: "https://docs.example.com/a".to_string(),
            title: "A".to_string(),
            body: "<p>a</p>".to_string(),
            markdown: None,
            source_path: blocked.join("html").join("a.html"),
        };

        let err = persist_artifacts(&blocked, "a", &content).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Persistence { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn cache_miss_on_corrupt_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://docs.example.com/b";
        let slug = url_slug(url);
        tokio::fs::create_dir_all(dir.path().join("html")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("meta")).await.unwrap();
        tokio::fs::write(dir.path().join("html").join(format!("{slug}.html")), "<p>b</p>")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("meta").join(format!("{slug}.json")), "{not json")
            .await
            .unwrap();

        assert!(load_cached(dir.path(), url, &slug).await.is_none());
    }
}
