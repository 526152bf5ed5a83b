//! Multi-strategy sitemap discovery.
//!
//! Documentation hosts range from plain static servers to aggressively
//! bot-filtered CDNs, so URL discovery cascades through strategies of
//! increasing desperation: a rendered fetch, a rendered fetch with stealth
//! measures, a plain HTTP GET, the `Sitemap:` directives of `robots.txt`,
//! and finally a search-engine cache mirror. The first strategy yielding a
//! non-empty URL set wins; every failure is logged and swallowed.

use anyhow::{Context, Result};
use chromiumoxide::Browser;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use crate::stealth;
use crate::utils::{is_valid_url, site_origin};

/// Nested sitemap indexes deeper than this are treated as malformed.
const MAX_INDEX_DEPTH: u8 = 3;

static LOC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<loc>\s*([^<\s][^<]*?)\s*</loc>").expect("loc regex is valid")
});

/// A parsed sitemap document: either an index of nested sitemaps or a flat
/// set of page URLs.
#[derive(Debug, PartialEq, Eq)]
pub enum SitemapDoc {
    Index(Vec<String>),
    Urls(Vec<String>),
}

/// Strip an HTML viewer wrapper from a sitemap response.
///
/// Some servers serve sitemap XML inside an HTML page (browser XML viewers,
/// Cloudflare interstitials that echo the body). The XML payload is located
/// either in a `<pre>` block or by scanning for the first root element.
#[must_use]
pub fn unwrap_xml_viewer(body: &str) -> String {
    let looks_like_html = body.trim_start().to_ascii_lowercase().starts_with("<!doctype html")
        || body.trim_start().to_ascii_lowercase().starts_with("<html");
    if !looks_like_html {
        return body.to_string();
    }

    let document = Html::parse_document(body);
    if let Ok(pre) = Selector::parse("pre") {
        for el in document.select(&pre) {
            let text: String = el.text().collect();
            if text.contains("<urlset") || text.contains("<sitemapindex") || text.contains("<loc>")
            {
                return text;
            }
        }
    }

    // No preformatted block: slice from the first root element if present.
    for marker in ["<urlset", "<sitemapindex"] {
        if let Some(pos) = body.find(marker) {
            return body[pos..].to_string();
        }
    }

    body.to_string()
}

/// Parse a sitemap body into either an index or a flat URL set.
///
/// Structured parsing walks `<sitemap><loc>` / `<url><loc>` pairs; when that
/// yields nothing a tolerant regex scan over bare `<loc>` tags is the last
/// resort (malformed XML in the wild is common).
#[must_use]
pub fn parse_sitemap(body: &str) -> SitemapDoc {
    let xml = unwrap_xml_viewer(body);
    let is_index = xml.contains("<sitemapindex");

    let mut locs: Vec<String> = LOC_REGEX
        .captures_iter(&xml)
        .map(|cap| cap[1].trim().to_string())
        .filter(|loc| is_valid_url(loc))
        .collect();
    dedup_preserving_order(&mut locs);

    if is_index {
        SitemapDoc::Index(locs)
    } else {
        SitemapDoc::Urls(locs)
    }
}

/// Extract every `Sitemap:` directive from a robots.txt body.
#[must_use]
pub fn parse_robots_sitemaps(body: &str) -> Vec<String> {
    let mut sitemaps: Vec<String> = body
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("Sitemap:")
                .or_else(|| line.strip_prefix("sitemap:"))?;
            let url = rest.trim();
            is_valid_url(url).then(|| url.to_string())
        })
        .collect();
    dedup_preserving_order(&mut sitemaps);
    sitemaps
}

fn dedup_preserving_order(urls: &mut Vec<String>) {
    let mut seen = HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
}

/// Final filtering applied to a winning strategy's URL set: validity,
/// first-seen de-duplication, then the optional test-mode cap.
fn apply_url_filters(mut urls: Vec<String>, test_limit: Option<usize>) -> Vec<String> {
    urls.retain(|u| is_valid_url(u));
    dedup_preserving_order(&mut urls);
    if let Some(limit) = test_limit
        && urls.len() > limit
    {
        info!("Test mode: truncating {} URLs to {limit}", urls.len());
        urls.truncate(limit);
    }
    urls
}

/// Recursively resolve a sitemap over plain HTTP, following index nesting.
///
/// This is the fast path when the target has no anti-bot protection, and is
/// also the shared recursion for nested indexes regardless of transport.
pub fn resolve_via_http<'a>(
    client: &'a reqwest::Client,
    url: &'a str,
    depth: u8,
) -> BoxFuture<'a, Result<Vec<String>>> {
    Box::pin(async move {
        if depth > MAX_INDEX_DEPTH {
            anyhow::bail!("sitemap index nesting exceeded {MAX_INDEX_DEPTH} levels at {url}");
        }
        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }
        let body = response.text().await.context("reading sitemap body")?;

        match parse_sitemap(&body) {
            SitemapDoc::Urls(urls) => Ok(urls),
            SitemapDoc::Index(nested) => {
                let mut all = Vec::new();
                for nested_url in nested {
                    match resolve_via_http(client, &nested_url, depth + 1).await {
                        Ok(urls) => all.extend(urls),
                        Err(e) => warn!("Nested sitemap {nested_url} failed: {e}"),
                    }
                }
                dedup_preserving_order(&mut all);
                Ok(all)
            }
        }
    })
}

/// Discovers the full content URL set from a sitemap entry point.
pub struct SitemapResolver<'a> {
    browser: &'a Browser,
    http: reqwest::Client,
    timeout: Duration,
    test_limit: Option<usize>,
}

impl<'a> SitemapResolver<'a> {
    pub fn new(browser: &'a Browser, timeout_secs: u64, test_limit: Option<usize>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(stealth::DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            browser,
            http,
            timeout: Duration::from_secs(timeout_secs),
            test_limit,
        })
    }

    /// Try every strategy in order and return the first non-empty URL set.
    ///
    /// An empty result means all strategies were exhausted; the caller
    /// treats that as fatal.
    pub async fn resolve(&self, entry_url: &str) -> Vec<String> {
        type Strategy<'s> = (&'static str, BoxFuture<'s, Result<Vec<String>>>);

        let strategies: Vec<Strategy<'_>> = vec![
            ("rendered", Box::pin(self.resolve_rendered(entry_url, false, 0))),
            ("rendered+stealth", Box::pin(self.resolve_rendered(entry_url, true, 0))),
            ("plain-get", Box::pin(resolve_via_http(&self.http, entry_url, 0))),
            ("robots-txt", Box::pin(self.resolve_via_robots(entry_url))),
            ("cache-mirror", Box::pin(self.resolve_via_cache_mirror(entry_url))),
        ];

        for (name, strategy) in strategies {
            debug!("Sitemap strategy '{name}' starting for {entry_url}");
            match strategy.await {
                Ok(urls) if !urls.is_empty() => {
                    let urls = self.finalize(urls);
                    info!("Sitemap strategy '{name}' found {} URLs", urls.len());
                    return urls;
                }
                Ok(_) => debug!("Sitemap strategy '{name}' found no URLs"),
                Err(e) => warn!("Sitemap strategy '{name}' failed: {e}"),
            }
        }

        Vec::new()
    }

    fn finalize(&self, urls: Vec<String>) -> Vec<String> {
        apply_url_filters(urls, self.test_limit)
    }

    /// Strategy 1/2: full browser render of the sitemap URL, optionally with
    /// stealth measures, recursing into nested indexes the same way.
    fn resolve_rendered(
        &self,
        url: &str,
        stealthy: bool,
        depth: u8,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        let url = url.to_string();
        Box::pin(async move {
            if depth > MAX_INDEX_DEPTH {
                anyhow::bail!("sitemap index nesting exceeded {MAX_INDEX_DEPTH} levels at {url}");
            }
            let body = self.fetch_rendered(&url, stealthy).await?;
            match parse_sitemap(&body) {
                SitemapDoc::Urls(urls) => Ok(urls),
                SitemapDoc::Index(nested) => {
                    let mut all = Vec::new();
                    for nested_url in nested {
                        match self.resolve_rendered(&nested_url, stealthy, depth + 1).await {
                            Ok(urls) => all.extend(urls),
                            Err(e) => warn!("Nested sitemap {nested_url} failed: {e}"),
                        }
                    }
                    dedup_preserving_order(&mut all);
                    Ok(all)
                }
            }
        })
    }

    async fn fetch_rendered(&self, url: &str, stealthy: bool) -> Result<String> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("creating page")?;

        let result = async {
            if stealthy {
                stealth::apply_stealth(&page).await?;
                stealth::set_user_agent(&page, stealth::random_user_agent()).await?;

                // Warm up session state at the site root before hitting the
                // sitemap directly; bot filters key on cold first requests.
                let origin = site_origin(url)?;
                tokio::time::timeout(self.timeout, page.goto(origin.as_str()))
                    .await
                    .map_err(|_| anyhow::anyhow!("warm-up navigation timed out"))?
                    .context("warm-up navigation failed")?;
                let _ = tokio::time::timeout(self.timeout, page.wait_for_navigation()).await;
                if let Err(e) = stealth::casual_scroll(&page).await {
                    debug!("Warm-up scroll failed (continuing): {e}");
                }
                stealth::human_pause(400, 1200).await;
            }

            tokio::time::timeout(self.timeout, page.goto(url))
                .await
                .map_err(|_| anyhow::anyhow!("navigation to {url} timed out"))?
                .with_context(|| format!("navigation to {url} failed"))?;
            let _ = tokio::time::timeout(self.timeout, page.wait_for_navigation()).await;

            page.content()
                .await
                .with_context(|| format!("reading content of {url}"))
        }
        .await;

        if let Err(e) = page.close().await {
            debug!("Page close failed: {e}");
        }
        result
    }

    /// Strategy 4: fetch robots.txt, then resolve each `Sitemap:` directive
    /// through the rendered strategy.
    async fn resolve_via_robots(&self, entry_url: &str) -> Result<Vec<String>> {
        let origin = site_origin(entry_url)?;
        let robots_url = format!("{origin}/robots.txt");

        let body = self
            .http
            .get(&robots_url)
            .send()
            .await
            .with_context(|| format!("GET {robots_url} failed"))?
            .text()
            .await
            .context("reading robots.txt")?;

        let sitemaps = parse_robots_sitemaps(&body);
        if sitemaps.is_empty() {
            anyhow::bail!("robots.txt lists no sitemaps");
        }
        debug!("robots.txt lists {} sitemap(s)", sitemaps.len());

        let mut all = Vec::new();
        for sitemap_url in sitemaps {
            match self.resolve_rendered(&sitemap_url, false, 0).await {
                Ok(urls) => all.extend(urls),
                Err(e) => warn!("robots.txt sitemap {sitemap_url} failed: {e}"),
            }
        }
        dedup_preserving_order(&mut all);
        Ok(all)
    }

    /// Strategy 5: last resort, read the entry URL out of a search-engine
    /// cache mirror.
    async fn resolve_via_cache_mirror(&self, entry_url: &str) -> Result<Vec<String>> {
        let mirror_url =
            format!("https://webcache.googleusercontent.com/search?q=cache:{entry_url}");
        let body = self.fetch_rendered(&mirror_url, true).await?;
        match parse_sitemap(&body) {
            SitemapDoc::Urls(urls) | SitemapDoc::Index(urls) => Ok(urls),
        }
    }
}
