//! docpack: converts a live documentation site into a consolidated offline
//! archive by discovering its URL set, extracting its navigation tree,
//! fetching each page, and assembling ordered combined documents.

pub mod assemble;
pub mod browser_setup;
pub mod config;
pub mod error;
pub mod fetch;
pub mod navigation;
pub mod pipeline;
pub mod sitemap;
pub mod stealth;
pub mod utils;

pub use assemble::{AssembledDocs, assemble, ordered_urls};
pub use browser_setup::BrowserSession;
pub use config::{ArchiveConfig, ArchiveConfigBuilder};
pub use error::ArchiveError;
pub use fetch::{FetchBatch, FetchScheduler, PageContent, retry_with_backoff};
pub use navigation::{FlatRow, NavNode, NavTree, NavigationExtractor, ScrollStabilizer, build_tree};
pub use pipeline::{ArchivePipeline, FetchCheckpoint, PrepCheckpoint};
pub use sitemap::{SitemapDoc, SitemapResolver, parse_robots_sitemaps, parse_sitemap};

/// Run the full prep → fetch → build pipeline with the given configuration.
pub async fn archive(config: ArchiveConfig) -> Result<(), ArchiveError> {
    let pipeline = ArchivePipeline::new(config);
    pipeline.all().await
}
