//! Navigation-tree extraction from a rendered documentation page.
//!
//! The sidebar on modern doc sites is a virtual-scrolling tree widget: only
//! visible rows exist in the DOM, collapsed branches hide their children,
//! and a consent overlay may be eating clicks. Extraction therefore runs a
//! stateful sequence against a live page: dismiss consent, stabilize the
//! virtual scroller until every row has materialized, expand collapsed
//! branches (re-stabilizing after each pass), then rebuild the hierarchy
//! from the flattened rows.
//!
//! Every part of that sequence that can be pure is pure: the stabilization
//! decision ([`ScrollStabilizer`]) and the tree reconstruction
//! ([`build_tree`]) are driven by plain values so tests run without a
//! browser.

use anyhow::{Context, Result};
use chromiumoxide::{Browser, Page};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::resolve_href;

mod consent;
pub use consent::{ConsentTactic, dismiss_consent};

/// Upper bound on stabilization scroll attempts per cycle.
const MAX_SCROLL_ATTEMPTS: usize = 40;
/// Height must be unchanged for this many consecutive samples.
const STABLE_SAMPLES: usize = 3;
/// Upper bound on expand+stabilize cycles.
const MAX_EXPAND_PASSES: usize = 6;
/// Collapsed icons clicked per batch before a settle pause.
const EXPAND_BATCH_SIZE: usize = 8;
/// Pause between scroll samples and expansion batches.
const SETTLE_MS: u64 = 150;

/// Tree container selectors, most specific first.
const TREE_SELECTORS: &[&str] = &["[role='tree']", ".virtual-tree, [data-virtual-scroller]"];

/// Generic navigation containers for fallback extraction.
const FALLBACK_NAV_SELECTORS: &[&str] = &[
    "nav[aria-label='docs']",
    "aside nav",
    "[role='navigation']",
    ".sidebar",
    ".toc",
    "nav",
];

/// Breadcrumb regions, the last-resort fallback.
const BREADCRUMB_SELECTORS: &[&str] = &["[aria-label='breadcrumb']", ".breadcrumbs", ".breadcrumb"];

/// Collapsed-branch indicators clicked by the expansion loop. Every entry
/// must match only branches that are still closed: an entry that also
/// matches expanded ones (e.g. a bare `summary`) re-toggles them on every
/// pass and the zero-hit termination never fires.
const COLLAPSED_TOGGLE_SELECTOR: &str = "[aria-expanded='false'], .collapsed > .toggle, \
     .tree-toggle[data-state='closed'], details:not([open]) > summary, .chevron-right";

/// One node of the navigation hierarchy. A node without a link is a pure
/// grouping header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavNode {
    pub title: String,
    pub link: Option<String>,
    #[serde(default)]
    pub children: Vec<NavNode>,
}

/// The full table-of-contents tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavTree {
    pub items: Vec<NavNode>,
}

impl NavTree {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pre-order traversal over all nodes.
    pub fn walk<'t>(&'t self, mut visit: impl FnMut(&'t NavNode)) {
        fn inner<'t>(nodes: &'t [NavNode], visit: &mut impl FnMut(&'t NavNode)) {
            for node in nodes {
                visit(node);
                inner(&node.children, visit);
            }
        }
        inner(&self.items, &mut visit);
    }
}

/// A flattened tree row as read out of the DOM, nesting encoded as depth.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlatRow {
    pub depth: usize,
    pub title: String,
    pub href: Option<String>,
}

/// Rebuild the hierarchy from flattened rows using a stack of open ancestors.
///
/// For each row: pop while the row's depth is ≤ the top-of-stack depth, then
/// the row becomes a child of the new top (or a root) and is pushed. Hrefs
/// are resolved absolute against `origin`; rows with no href become grouping
/// headers.
#[must_use]
pub fn build_tree(rows: Vec<FlatRow>, origin: &str) -> NavTree {
    fn attach(roots: &mut Vec<NavNode>, stack: &mut [(usize, NavNode)], node: NavNode) {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    let mut roots: Vec<NavNode> = Vec::new();
    let mut stack: Vec<(usize, NavNode)> = Vec::new();

    for row in rows {
        let title = row.title.trim().to_string();
        if title.is_empty() {
            continue;
        }
        let link = row.href.as_deref().and_then(|h| resolve_href(origin, h));
        let node = NavNode {
            title,
            link,
            children: Vec::new(),
        };

        while let Some((top_depth, _)) = stack.last() {
            if row.depth <= *top_depth {
                let (_, finished) = stack.pop().expect("stack checked non-empty");
                attach(&mut roots, &mut stack, finished);
            } else {
                break;
            }
        }
        stack.push((row.depth, node));
    }

    while let Some((_, finished)) = stack.pop() {
        attach(&mut roots, &mut stack, finished);
    }

    NavTree { items: roots }
}

/// One sample of a scroll container's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollProbe {
    pub scroll_height: f64,
    pub scroll_top: f64,
    pub client_height: f64,
}

impl ScrollProbe {
    #[must_use]
    pub fn at_bottom(&self) -> bool {
        self.scroll_top + self.client_height >= self.scroll_height - 2.0
    }
}

/// Decides when a virtual scroller has finished materializing rows.
///
/// Stable means the scroll height was unchanged for [`STABLE_SAMPLES`]
/// consecutive observations AND the bottom has been reached. Feeding this
/// from a mock sample sequence is how the contract is tested.
#[derive(Debug)]
pub struct ScrollStabilizer {
    required: usize,
    stable_count: usize,
    last_height: Option<f64>,
}

impl Default for ScrollStabilizer {
    fn default() -> Self {
        Self::new(STABLE_SAMPLES)
    }
}

impl ScrollStabilizer {
    #[must_use]
    pub fn new(required: usize) -> Self {
        Self {
            required,
            stable_count: 0,
            last_height: None,
        }
    }

    /// Observe one sample; returns true once the container is stable.
    pub fn observe(&mut self, probe: &ScrollProbe) -> bool {
        match self.last_height {
            Some(prev) if (prev - probe.scroll_height).abs() < f64::EPSILON => {
                self.stable_count += 1;
            }
            _ => self.stable_count = 1,
        }
        self.last_height = Some(probe.scroll_height);
        self.stable_count >= self.required && probe.at_bottom()
    }
}

// Scrolls the container by an increment and reports its geometry.
const SCROLL_STEP_JS: &str = r"
    (function(selector, step) {
        const el = document.querySelector(selector) || document.scrollingElement;
        el.scrollTop = el.scrollTop + step;
        return {
            scrollHeight: el.scrollHeight,
            scrollTop: el.scrollTop,
            clientHeight: el.clientHeight
        };
    })";

// Clicks up to `limit` collapsed-branch indicators and reports how many were
// clicked. The indicator selector comes in from [`COLLAPSED_TOGGLE_SELECTOR`].
const EXPAND_BATCH_JS: &str = r"
    (function(selector, toggleSelector, limit) {
        const root = document.querySelector(selector) || document;
        const candidates = root.querySelectorAll(toggleSelector);
        let clicked = 0;
        for (const el of candidates) {
            if (clicked >= limit) break;
            try { el.click(); clicked++; } catch (e) {}
        }
        return clicked;
    })";

// Reads the flattened rows in document order. Depth comes from aria-level
// when present, otherwise from counting indent-marker elements in the row.
const COLLECT_ROWS_JS: &str = r#"
    (function(selector) {
        const root = document.querySelector(selector);
        if (!root) return [];
        const rows = root.querySelectorAll("[role='treeitem'], li, .tree-row");
        const out = [];
        for (const row of rows) {
            const level = row.getAttribute('aria-level');
            let depth;
            if (level !== null) {
                depth = Math.max(0, parseInt(level, 10) - 1);
            } else {
                depth = row.querySelectorAll(':scope > .indent, :scope > .tree-indent').length;
            }
            const anchor = row.querySelector(':scope a[href], :scope > a');
            const label = row.querySelector(':scope .label, :scope .tree-label');
            const title = (label ? label.textContent : row.textContent) || '';
            const firstLine = title.split('\n').map(s => s.trim()).find(s => s.length > 0) || '';
            if (!firstLine) continue;
            out.push({
                depth: depth,
                title: firstLine,
                href: anchor ? anchor.getAttribute('href') : null
            });
        }
        return out;
    })"#;

// Flattens every link inside a container into depth-0 rows.
const FLATTEN_LINKS_JS: &str = r#"
    (function(selector) {
        const root = document.querySelector(selector);
        if (!root) return [];
        const out = [];
        for (const a of root.querySelectorAll('a[href]')) {
            const title = (a.textContent || '').trim();
            if (!title) continue;
            out.push({ depth: 0, title: title, href: a.getAttribute('href') });
        }
        return out;
    })"#;

/// Extracts the navigation tree from one rendered page.
pub struct NavigationExtractor<'a> {
    browser: &'a Browser,
    timeout: Duration,
}

impl<'a> NavigationExtractor<'a> {
    #[must_use]
    pub fn new(browser: &'a Browser, timeout_secs: u64) -> Self {
        Self {
            browser,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Drive the page through consent dismissal, scroll stabilization, and
    /// branch expansion, then reconstruct the tree.
    ///
    /// A page without a recognizable tree widget degrades to flattened
    /// generic-navigation extraction; total failure yields an error the
    /// caller downgrades to an empty tree.
    pub async fn extract(&self, nav_url: &str, origin: &str) -> Result<NavTree> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("creating navigation page")?;

        let result = self.extract_on_page(&page, nav_url, origin).await;

        if let Err(e) = page.close().await {
            debug!("Navigation page close failed: {e}");
        }
        result
    }

    async fn extract_on_page(&self, page: &Page, nav_url: &str, origin: &str) -> Result<NavTree> {
        tokio::time::timeout(self.timeout, page.goto(nav_url))
            .await
            .map_err(|_| anyhow::anyhow!("navigation to {nav_url} timed out"))?
            .with_context(|| format!("navigation to {nav_url} failed"))?;
        let _ = tokio::time::timeout(self.timeout, page.wait_for_navigation()).await;

        dismiss_consent(page).await;

        let Some(container) = self.find_tree_container(page).await else {
            warn!("No tree container found on {nav_url}, using fallback extraction");
            return self.fallback_extract(page, origin).await;
        };
        debug!("Tree container matched: {container}");

        self.stabilize(page, container).await?;
        self.expand_all(page, container).await?;

        let rows = self.collect_rows(page, container).await?;
        info!("Collected {} navigation rows", rows.len());
        if rows.is_empty() {
            return self.fallback_extract(page, origin).await;
        }
        Ok(build_tree(rows, origin))
    }

    async fn find_tree_container(&self, page: &Page) -> Option<&'static str> {
        for selector in TREE_SELECTORS {
            if page.find_element(*selector).await.is_ok() {
                return Some(selector);
            }
        }
        None
    }

    /// Scroll the container in increasing increments until its height stops
    /// growing and the bottom is reached, bounded by [`MAX_SCROLL_ATTEMPTS`].
    async fn stabilize(&self, page: &Page, container: &str) -> Result<()> {
        let mut stabilizer = ScrollStabilizer::default();
        for attempt in 0..MAX_SCROLL_ATTEMPTS {
            // Increments grow so long trees are covered without making
            // short ones overshoot their lazy-render window.
            let step = 300 + attempt * 100;
            let expr = format!("{SCROLL_STEP_JS}({:?}, {step})", container);
            let probe: ScrollProbe = page
                .evaluate(expr)
                .await
                .context("scroll probe evaluation failed")?
                .into_value()
                .context("parsing scroll probe")?;

            if stabilizer.observe(&probe) {
                debug!("Scroll stabilized after {} attempts", attempt + 1);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_MS)).await;
        }
        warn!("Scroll stabilization hit attempt bound ({MAX_SCROLL_ATTEMPTS}); proceeding");
        Ok(())
    }

    /// Expand collapsed branches in batches, re-stabilizing after each pass
    /// because expansion reveals new virtualized rows.
    async fn expand_all(&self, page: &Page, container: &str) -> Result<()> {
        for pass in 0..MAX_EXPAND_PASSES {
            let mut clicked_in_pass = 0usize;
            loop {
                let expr = format!(
                    "{EXPAND_BATCH_JS}({:?}, {:?}, {EXPAND_BATCH_SIZE})",
                    container, COLLAPSED_TOGGLE_SELECTOR
                );
                let clicked: usize = page
                    .evaluate(expr)
                    .await
                    .context("expand batch evaluation failed")?
                    .into_value()
                    .context("parsing expand batch count")?;
                clicked_in_pass += clicked;
                if clicked < EXPAND_BATCH_SIZE {
                    break;
                }
                // Let the widget re-render between batches; the next scan
                // sees fresh DOM.
                tokio::time::sleep(Duration::from_millis(SETTLE_MS)).await;
            }

            if clicked_in_pass == 0 {
                debug!("Expansion complete after {pass} pass(es)");
                return Ok(());
            }
            debug!("Expansion pass {pass} clicked {clicked_in_pass} toggles");
            self.stabilize(page, container).await?;
        }
        warn!("Expansion hit pass bound ({MAX_EXPAND_PASSES}); tree may be partially expanded");
        Ok(())
    }

    async fn collect_rows(&self, page: &Page, container: &str) -> Result<Vec<FlatRow>> {
        let expr = format!("{COLLECT_ROWS_JS}({:?})", container);
        page.evaluate(expr)
            .await
            .context("row collection evaluation failed")?
            .into_value()
            .context("parsing navigation rows")
    }

    /// No tree widget on the page: flatten a generic navigation container,
    /// then a breadcrumb region, else return an empty tree.
    async fn fallback_extract(&self, page: &Page, origin: &str) -> Result<NavTree> {
        for selector in FALLBACK_NAV_SELECTORS {
            let expr = format!("{FLATTEN_LINKS_JS}({:?})", selector);
            let rows: Vec<FlatRow> = match page.evaluate(expr).await {
                Ok(value) => value.into_value().unwrap_or_default(),
                Err(e) => {
                    debug!("Fallback selector {selector} failed: {e}");
                    continue;
                }
            };
            if !rows.is_empty() {
                info!("Fallback extraction via '{selector}' found {} links", rows.len());
                return Ok(build_tree(rows, origin));
            }
        }

        for selector in BREADCRUMB_SELECTORS {
            let expr = format!("{FLATTEN_LINKS_JS}({:?})", selector);
            let rows: Vec<FlatRow> = match page.evaluate(expr).await {
                Ok(value) => value.into_value().unwrap_or_default(),
                Err(_) => continue,
            };
            if !rows.is_empty() {
                info!("Breadcrumb fallback found {} links", rows.len());
                return Ok(build_tree(rows, origin));
            }
        }

        warn!("All navigation fallbacks empty; returning empty tree");
        Ok(NavTree::default())
    }
}
