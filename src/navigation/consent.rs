//! Consent-overlay dismissal tactics.
//!
//! Cookie banners intercept the clicks the tree expander needs, so each
//! extraction starts by trying a prioritized list of dismissal tactics and
//! stops at the first that reports success. All of them failing is fine;
//! extraction proceeds and simply risks some clicks being swallowed.

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::Page;
use log::{debug, warn};

/// Known consent-manager accept buttons, most specific first.
const CONSENT_BUTTON_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[data-cookiebanner='accept_button']",
    ".cc-allow",
    "#cookie-accept",
];

const ACCEPT_TEXT_JS: &str = r#"
    (function() {
        const pattern = /^(accept|accept all|agree|i agree|got it|allow all)$/i;
        for (const btn of document.querySelectorAll('button, [role="button"]')) {
            const text = (btn.textContent || '').trim();
            if (pattern.test(text)) { btn.click(); return true; }
        }
        return false;
    })()"#;

const FORCE_HIDE_JS: &str = r#"
    (function() {
        const selectors = [
            '[id*="cookie"]', '[class*="cookie-banner"]', '[id*="consent"]',
            '[class*="consent"]', '[aria-label*="cookie"]'
        ];
        let hidden = 0;
        for (const sel of selectors) {
            for (const el of document.querySelectorAll(sel)) {
                const style = window.getComputedStyle(el);
                if (style.position === 'fixed' || style.position === 'sticky') {
                    el.style.setProperty('display', 'none', 'important');
                    hidden++;
                }
            }
        }
        return hidden > 0;
    })()"#;

/// One way of getting a consent overlay out of the way.
#[async_trait]
pub trait ConsentTactic: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt dismissal; `Ok(true)` means the overlay was handled.
    async fn attempt(&self, page: &Page) -> Result<bool>;
}

struct KnownButtonClick;

#[async_trait]
impl ConsentTactic for KnownButtonClick {
    fn name(&self) -> &'static str {
        "known-button"
    }

    async fn attempt(&self, page: &Page) -> Result<bool> {
        for selector in CONSENT_BUTTON_SELECTORS {
            if let Ok(element) = page.find_element(*selector).await {
                element.click().await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

struct AcceptTextClick;

#[async_trait]
impl ConsentTactic for AcceptTextClick {
    fn name(&self) -> &'static str {
        "accept-text"
    }

    async fn attempt(&self, page: &Page) -> Result<bool> {
        let clicked: bool = page.evaluate(ACCEPT_TEXT_JS).await?.into_value()?;
        Ok(clicked)
    }
}

struct ForceHideOverlay;

#[async_trait]
impl ConsentTactic for ForceHideOverlay {
    fn name(&self) -> &'static str {
        "force-hide"
    }

    async fn attempt(&self, page: &Page) -> Result<bool> {
        let hidden: bool = page.evaluate(FORCE_HIDE_JS).await?.into_value()?;
        Ok(hidden)
    }
}

struct EscapeKey;

#[async_trait]
impl ConsentTactic for EscapeKey {
    fn name(&self) -> &'static str {
        "escape-key"
    }

    async fn attempt(&self, page: &Page) -> Result<bool> {
        page.evaluate(
            r"(function() {
                document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape' }));
                return true;
            })()",
        )
        .await?;
        // Escape is fire-and-forget; claim success so the cascade stops
        // here only as the final tactic.
        Ok(true)
    }
}

/// Try each tactic in priority order, stopping at the first success.
/// Failure of every tactic is logged and otherwise ignored.
pub async fn dismiss_consent(page: &Page) {
    let tactics: Vec<Box<dyn ConsentTactic>> = vec![
        Box::new(KnownButtonClick),
        Box::new(AcceptTextClick),
        Box::new(ForceHideOverlay),
        Box::new(EscapeKey),
    ];

    for tactic in tactics {
        match tactic.attempt(page).await {
            Ok(true) => {
                debug!("Consent dismissed via '{}'", tactic.name());
                return;
            }
            Ok(false) => debug!("Consent tactic '{}' found nothing", tactic.name()),
            Err(e) => warn!("Consent tactic '{}' failed: {e}", tactic.name()),
        }
    }
    debug!("No consent tactic succeeded; continuing anyway");
}
