//! Anti-bot hardening for rendered fetches.
//!
//! Documentation hosts sitting behind CDN bot filters reject obvious
//! automation. The measures here are deliberately mild: spoofed navigator
//! properties injected before any page script runs, a rotating user agent,
//! and human-ish pauses/scrolls used by the stealth sitemap strategy.

use anyhow::Result;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use log::debug;
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const USER_AGENTS: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
];

// Injected before any page script runs. Covers the checks CDN bot filters
// actually perform: webdriver flag, plugin enumeration, language list,
// chrome runtime presence, and WebGL vendor strings.
const EVASION_SCRIPT: &str = r"
    Object.defineProperty(navigator, 'webdriver', { get: () => false });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    if (!window.chrome) { window.chrome = {}; }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: () => ({
                onMessage: { addListener: () => {}, removeListener: () => {} },
                postMessage: () => {}
            })
        };
    }
    const mockPlugins = [
        { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
        { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
        { name: 'Native Client', filename: 'internal-nacl-plugin' }
    ];
    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const plugins = {};
            mockPlugins.forEach((p, i) => { plugins[i] = p; plugins[p.name] = p; });
            Object.defineProperty(plugins, 'length', { value: mockPlugins.length });
            return plugins;
        }
    });
    if (window.WebGLRenderingContext) {
        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = new Proxy(getParameter, {
            apply: (target, ctx, args) => {
                const param = (args && args[0]) || null;
                if (param === 37445) { return 'Intel Inc.'; }
                if (param === 37446) { return 'Intel Iris OpenGL Engine'; }
                return Reflect.apply(target, ctx, args);
            }
        });
    }
";

/// Pick a user agent at random from the rotation pool.
#[must_use]
pub fn random_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Install evasion scripts so they run before any document script on every
/// navigation of this page.
pub async fn apply_stealth(page: &Page) -> Result<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams {
        source: EVASION_SCRIPT.to_string(),
        include_command_line_api: None,
        world_name: None,
        run_immediately: None,
    })
    .await?;
    debug!("Stealth script installed");
    Ok(())
}

/// Override the page's user agent at the network layer.
pub async fn set_user_agent(page: &Page, user_agent: &str) -> Result<()> {
    page.execute(SetUserAgentOverrideParams {
        user_agent: user_agent.to_string(),
        accept_language: Some("en-US,en;q=0.9".to_string()),
        platform: None,
        user_agent_metadata: None,
    })
    .await?;
    Ok(())
}

/// Sleep a random duration within `[min_ms, max_ms]`.
pub async fn human_pause(min_ms: u64, max_ms: u64) {
    let ms = rand::rng().random_range(min_ms..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Scroll the page a few random increments with pauses in between, the way
/// a reader skimming a page would.
pub async fn casual_scroll(page: &Page) -> Result<()> {
    let steps = rand::rng().random_range(2..=4);
    for _ in 0..steps {
        let delta = rand::rng().random_range(200..=600);
        page.evaluate(format!("window.scrollBy(0, {delta});"))
            .await?;
        human_pause(150, 450).await;
    }
    Ok(())
}
