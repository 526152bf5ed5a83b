//! Three-phase resumable pipeline: prep → fetch → build.
//!
//! Each phase is a pure function of its own configuration plus the prior
//! phase's checkpoint file. No in-process state crosses a phase boundary,
//! which is what lets an interrupted multi-hour run be resumed by
//! re-invoking `fetch` alone. Checkpoints are written exactly once per
//! invocation by a single writer at phase end.

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::assemble::{assemble, render_nav_html, render_nav_markdown};
use crate::browser_setup::BrowserSession;
use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::fetch::{FetchScheduler, PageContent};
use crate::navigation::{NavTree, NavigationExtractor};
use crate::sitemap::SitemapResolver;
use crate::utils::{site_origin, url_slug};

pub const PREP_CHECKPOINT: &str = "prep.json";
pub const FETCH_CHECKPOINT: &str = "fetch.json";

/// Output of the prep phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepCheckpoint {
    pub config: ArchiveConfig,
    pub timestamp: String,
    /// Discovered URL set, first-seen order.
    pub urls: Vec<String>,
    pub navigation: NavTree,
}

/// One page's content as persisted in the fetch checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub title: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

/// Output of the fetch phase.
///
/// Invariant: every key of `content` originated from `urls`; `navigation`
/// may cover a strict subset of `urls` (orphans are expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchCheckpoint {
    pub config: ArchiveConfig,
    pub timestamp: String,
    /// Successfully fetched URLs, in discovery order.
    pub urls: Vec<String>,
    pub content: HashMap<String, ContentRecord>,
    pub navigation: NavTree,
}

fn write_checkpoint<T: Serialize>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let persist = |source: anyhow::Error| ArchiveError::Persistence {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))
            .map_err(persist)?;
    }
    let json = serde_json::to_string_pretty(value)
        .context("serializing checkpoint")
        .map_err(persist)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing {}", path.display()))
        .map_err(persist)?;
    info!("Checkpoint written: {}", path.display());
    Ok(())
}

fn read_checkpoint<T: DeserializeOwned>(path: &Path) -> Result<T, ArchiveError> {
    let persist = |source: anyhow::Error| ArchiveError::Persistence {
        path: path.display().to_string(),
        source,
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))
        .map_err(persist)?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))
        .map_err(persist)
}

/// Composes discovery, navigation extraction, fetching, and assembly into
/// independently re-runnable phases.
pub struct ArchivePipeline {
    config: ArchiveConfig,
}

impl ArchivePipeline {
    #[must_use]
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.config.output_dir().join(name)
    }

    /// Phase 1: discover the URL set and extract the navigation tree.
    ///
    /// Discovery yielding zero URLs is fatal. Navigation extraction failing
    /// is not: the pipeline proceeds with an empty tree and assembly falls
    /// back to discovery order.
    pub async fn prep(&self) -> Result<PrepCheckpoint, ArchiveError> {
        let entry_url = self.config.entry_url().to_string();
        info!("prep: resolving sitemap from {entry_url}");

        let session = BrowserSession::launch(self.config.headless()).await?;

        let result = self.prep_with_browser(&session, &entry_url).await;
        if let Err(e) = session.close().await {
            warn!("Browser session close failed: {e}");
        }
        let checkpoint = result?;

        write_checkpoint(&self.checkpoint_path(PREP_CHECKPOINT), &checkpoint)?;
        info!(
            "prep summary: {} URLs discovered, {} top-level navigation items",
            checkpoint.urls.len(),
            checkpoint.navigation.items.len()
        );
        Ok(checkpoint)
    }

    async fn prep_with_browser(
        &self,
        session: &BrowserSession,
        entry_url: &str,
    ) -> Result<PrepCheckpoint, ArchiveError> {
        let resolver = SitemapResolver::new(
            session.browser(),
            self.config.timeout_secs(),
            self.config.test_limit(),
        )?;
        let urls = resolver.resolve(entry_url).await;
        if urls.is_empty() {
            return Err(ArchiveError::Discovery {
                entry_url: entry_url.to_string(),
            });
        }

        let nav_url = self
            .config
            .nav_url()
            .map(str::to_string)
            .unwrap_or_else(|| urls[0].clone());
        let origin = site_origin(&nav_url)?;

        let extractor = NavigationExtractor::new(session.browser(), self.config.timeout_secs());
        let navigation = match extractor.extract(&nav_url, &origin).await {
            Ok(tree) => tree,
            Err(e) => {
                // Non-fatal per the error model: assembly has an orphan
                // fallback for exactly this case.
                let err = ArchiveError::Navigation {
                    nav_url: nav_url.clone(),
                    reason: e.to_string(),
                };
                warn!("{err}; using empty tree");
                NavTree::default()
            }
        };

        Ok(PrepCheckpoint {
            config: self.config.clone(),
            timestamp: Utc::now().to_rfc3339(),
            urls,
            navigation,
        })
    }

    /// Phase 2: fetch every URL from the prep checkpoint.
    pub async fn fetch(&self) -> Result<FetchCheckpoint, ArchiveError> {
        let prep: PrepCheckpoint = read_checkpoint(&self.checkpoint_path(PREP_CHECKPOINT))?;

        let mut urls = prep.urls;
        if let Some(limit) = self.config.test_limit()
            && urls.len() > limit
        {
            info!("fetch: test mode, capping {} URLs to {limit}", urls.len());
            urls.truncate(limit);
        }
        info!("fetch: {} URLs to fetch", urls.len());

        let session = BrowserSession::launch(self.config.headless()).await?;
        let batch = {
            let scheduler = FetchScheduler::new(session.browser(), &self.config);
            scheduler.fetch_all(&urls).await
        };
        if let Err(e) = session.close().await {
            warn!("Browser session close failed: {e}");
        }
        let batch = batch?;

        // Successful keys keep discovery order so later phases stay
        // deterministic without re-sorting.
        let successful: Vec<String> = urls
            .iter()
            .filter(|u| batch.content.contains_key(*u))
            .cloned()
            .collect();
        let content: HashMap<String, ContentRecord> = batch
            .content
            .into_iter()
            .map(|(url, page)| {
                (
                    url,
                    ContentRecord {
                        title: page.title,
                        html: page.body,
                        markdown: page.markdown,
                    },
                )
            })
            .collect();

        let checkpoint = FetchCheckpoint {
            config: self.config.clone(),
            timestamp: Utc::now().to_rfc3339(),
            urls: successful,
            content,
            navigation: prep.navigation,
        };
        write_checkpoint(&self.checkpoint_path(FETCH_CHECKPOINT), &checkpoint)?;

        info!(
            "fetch summary: {} fetched ({} from cache), {} failed of {} total",
            checkpoint.content.len(),
            batch.from_cache,
            batch.failed.len(),
            urls.len()
        );
        Ok(checkpoint)
    }

    /// Phase 3: assemble combined documents from the fetch checkpoint.
    pub async fn build(&self) -> Result<(), ArchiveError> {
        let fetch: FetchCheckpoint = read_checkpoint(&self.checkpoint_path(FETCH_CHECKPOINT))?;

        // Checkpoint invariant: content keys originate from urls. A
        // violation means a hand-edited file; drop the strays.
        let mut content: HashMap<String, PageContent> = HashMap::with_capacity(fetch.content.len());
        for (url, record) in fetch.content {
            if !fetch.urls.contains(&url) {
                warn!("Checkpoint content key {url} is not in its URL set; skipping");
                continue;
            }
            let slug = url_slug(&url);
            content.insert(
                url.clone(),
                PageContent {
                    url,
                    title: record.title,
                    body: record.html,
                    markdown: record.markdown,
                    source_path: self
                        .config
                        .output_dir()
                        .join("html")
                        .join(format!("{slug}.html")),
                },
            );
        }

        let docs = assemble(
            &content,
            &fetch.navigation,
            &fetch.urls,
            self.config.nav_coverage_threshold(),
        );

        let out = self.config.output_dir();
        self.write_output(&out.join("all_docs.html"), &docs.combined_html)?;
        self.write_output(&out.join("all_docs.md"), &docs.combined_markdown)?;

        let nav_json = serde_json::to_string_pretty(&fetch.navigation)
            .context("serializing navigation tree")?;
        self.write_output(&out.join("nav.json"), &nav_json)?;
        self.write_output(&out.join("nav.html"), &render_nav_html(&fetch.navigation))?;
        self.write_output(&out.join("nav.md"), &render_nav_markdown(&fetch.navigation))?;

        info!(
            "build summary: {} pages assembled into {}",
            content.len(),
            out.join("all_docs.html").display()
        );
        Ok(())
    }

    /// End-to-end: prep, then fetch against the just-written prep
    /// checkpoint, then build against the just-written fetch checkpoint.
    pub async fn all(&self) -> Result<(), ArchiveError> {
        self.prep().await?;
        self.fetch().await?;
        self.build().await
    }

    fn write_output(&self, path: &Path, body: &str) -> Result<(), ArchiveError> {
        std::fs::write(path, body)
            .with_context(|| format!("writing {}", path.display()))
            .map_err(|source| ArchiveError::Persistence {
                path: path.display().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::NavNode;

    fn sample_config(dir: &Path) -> ArchiveConfig {
        ArchiveConfig::builder()
            .entry_url("https://docs.example.com/sitemap.xml")
            .output_dir(dir)
            .build()
            .unwrap()
    }

    #[test]
    fn prep_checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = PrepCheckpoint {
            config: sample_config(dir.path()),
            timestamp: Utc::now().to_rfc3339(),
            urls: vec!["https://docs.example.com/a".to_string()],
            navigation: NavTree {
                items: vec![NavNode {
                    title: "A".to_string(),
                    link: Some("https://docs.example.com/a".to_string()),
                    children: vec![],
                }],
            },
        };

        let path = dir.path().join(PREP_CHECKPOINT);
        write_checkpoint(&path, &checkpoint).unwrap();
        let back: PrepCheckpoint = read_checkpoint(&path).unwrap();
        assert_eq!(back.urls, checkpoint.urls);
        assert_eq!(back.navigation, checkpoint.navigation);
    }

    #[test]
    fn fetch_checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = HashMap::new();
        content.insert(
            "https://docs.example.com/a".to_string(),
            ContentRecord {
                title: "A".to_string(),
                html: "<p>a</p>".to_string(),
                markdown: Some("a".to_string()),
            },
        );
        let checkpoint = FetchCheckpoint {
            config: sample_config(dir.path()),
            timestamp: Utc::now().to_rfc3339(),
            urls: vec!["https://docs.example.com/a".to_string()],
            content,
            navigation: NavTree::default(),
        };

        let path = dir.path().join(FETCH_CHECKPOINT);
        write_checkpoint(&path, &checkpoint).unwrap();
        let back: FetchCheckpoint = read_checkpoint(&path).unwrap();
        assert_eq!(back.urls, checkpoint.urls);
        assert_eq!(back.content.len(), 1);
        assert_eq!(back.content["https://docs.example.com/a"].title, "A");
    }

    #[test]
    fn read_checkpoint_reports_persistence_failure() {
        let missing = Path::new("/nonexistent/prep.json");
        let result: Result<PrepCheckpoint, _> = read_checkpoint(missing);
        match result {
            Err(ArchiveError::Persistence { .. }) => {}
            other => panic!("expected persistence failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn build_runs_from_checkpoint_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());

        let mut content = HashMap::new();
        for (url, title) in [
            ("https://docs.example.com/intro", "Intro"),
            ("https://docs.example.com/api", "API"),
        ] {
            content.insert(
                url.to_string(),
                ContentRecord {
                    title: title.to_string(),
                    html: format!("<p>{title}</p>"),
                    markdown: Some(title.to_string()),
                },
            );
        }
        let checkpoint = FetchCheckpoint {
            config: config.clone(),
            timestamp: Utc::now().to_rfc3339(),
            urls: vec![
                "https://docs.example.com/intro".to_string(),
                "https://docs.example.com/api".to_string(),
            ],
            content,
            navigation: NavTree {
                items: vec![NavNode {
                    title: "API".to_string(),
                    link: Some("https://docs.example.com/api".to_string()),
                    children: vec![],
                }],
            },
        };
        write_checkpoint(&dir.path().join(FETCH_CHECKPOINT), &checkpoint).unwrap();

        // No prep phase ran in this process; build works from the file.
        let pipeline = ArchivePipeline::new(config);
        pipeline.build().await.unwrap();

        let html = std::fs::read_to_string(dir.path().join("all_docs.html")).unwrap();
        assert!(html.contains("<h1>API</h1>"));
        assert!(html.contains("<h1>Intro</h1>"));
        // Nav-ordered page comes first.
        assert!(html.find("<h1>API</h1>").unwrap() < html.find("<h1>Intro</h1>").unwrap());

        let md = std::fs::read_to_string(dir.path().join("all_docs.md")).unwrap();
        assert!(md.contains("# Table of Contents"));
        assert!(std::fs::read_to_string(dir.path().join("nav.json")).is_ok());
        assert!(std::fs::read_to_string(dir.path().join("nav.html")).is_ok());
        assert!(std::fs::read_to_string(dir.path().join("nav.md")).is_ok());
    }

    #[tokio::test]
    async fn build_drops_content_not_in_url_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());

        let mut content = HashMap::new();
        content.insert(
            "https://docs.example.com/stray".to_string(),
            ContentRecord {
                title: "Stray".to_string(),
                html: "<p>stray</p>".to_string(),
                markdown: None,
            },
        );
        content.insert(
            "https://docs.example.com/kept".to_string(),
            ContentRecord {
                title: "Kept".to_string(),
                html: "<p>kept</p>".to_string(),
                markdown: None,
            },
        );
        let checkpoint = FetchCheckpoint {
            config: config.clone(),
            timestamp: Utc::now().to_rfc3339(),
            urls: vec!["https://docs.example.com/kept".to_string()],
            content,
            navigation: NavTree::default(),
        };
        write_checkpoint(&dir.path().join(FETCH_CHECKPOINT), &checkpoint).unwrap();

        ArchivePipeline::new(config).build().await.unwrap();
        let html = std::fs::read_to_string(dir.path().join("all_docs.html")).unwrap();
        assert!(html.contains("Kept"));
        assert!(!html.contains("stray"));
    }
}
