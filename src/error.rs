//! Pipeline-facing error types.
//!
//! Only two of these abort a phase: `Discovery` (no URLs means there is
//! nothing to archive) and `Persistence` (a checkpoint that cannot be
//! written leaves nothing valid for the next phase). Navigation and fetch
//! failures are absorbed at the narrowest scope and degrade the output
//! instead of failing the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Every sitemap strategy was exhausted without finding a single URL.
    #[error("sitemap discovery failed for {entry_url}: no URLs found after all strategies")]
    Discovery { entry_url: String },

    /// The navigation tree could not be extracted at all. Callers recover
    /// with an empty tree; this variant exists for reporting.
    #[error("navigation extraction failed for {nav_url}: {reason}")]
    Navigation { nav_url: String, reason: String },

    /// A single page exhausted its retries. Recorded per URL, never fatal
    /// to a batch.
    #[error("fetch failed for {url} after {attempts} attempts: {reason}")]
    Fetch {
        url: String,
        attempts: usize,
        reason: String,
    },

    /// A checkpoint or artifact could not be written or read back.
    #[error("persistence failure at {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Environment failures outside the four pipeline classes, e.g. the
    /// browser refusing to launch.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArchiveError {
    /// True for conditions that must abort the current phase with a
    /// non-zero exit.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Discovery { .. } | Self::Persistence { .. } | Self::Other(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_discovery_and_persistence_class_failures_are_fatal() {
        assert!(ArchiveError::Discovery {
            entry_url: "https://docs.example.com/sitemap.xml".to_string(),
        }
        .is_fatal());
        assert!(ArchiveError::Persistence {
            path: "archive/fetch.json".to_string(),
            source: anyhow::anyhow!("disk full"),
        }
        .is_fatal());
        assert!(ArchiveError::Other(anyhow::anyhow!("browser launch failed")).is_fatal());

        assert!(!ArchiveError::Navigation {
            nav_url: "https://docs.example.com/docs".to_string(),
            reason: "no container".to_string(),
        }
        .is_fatal());
        assert!(!ArchiveError::Fetch {
            url: "https://docs.example.com/a".to_string(),
            attempts: 4,
            reason: "timed out".to_string(),
        }
        .is_fatal());
    }
}
