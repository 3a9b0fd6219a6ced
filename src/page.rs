use crate::errors::Result;
use crate::extract::{ListingSnapshot, extract};
use crate::listing::Listing;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

/// Selectors for search-result cards, most specific first.
pub const LISTING_SELECTORS: &[&str] = &[
    r#"a[href*="marketplace/item"]"#,
    r#"[aria-label="Search results"] [role="article"]"#,
    r#"[role="article"]"#,
    r#"[data-pagelet*="Marketplace"] a"#,
    r#"div[style*="border-radius"] a"#,
];

/// One rendered search-result card.
#[async_trait]
pub trait ListingNode: Send + Sync {
    /// Captures everything the field extractor needs. Individual lookups that
    /// fail are recorded as absent instead of failing the capture.
    async fn snapshot(&self) -> ListingSnapshot;
}

/// A rendered marketplace page driven by some browser backend.
#[async_trait]
pub trait MarketplacePage: Send + Sync {
    type Node: ListingNode;

    /// Navigates to `url` and resolves once the page reports it has loaded.
    async fn goto(&mut self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Number of elements matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    async fn listing_nodes(&self, selector: &str) -> Result<Vec<Self::Node>>;

    /// Serialized DOM of the current page.
    async fn source(&self) -> Result<String>;

    /// PNG screenshot, if the backend can render one.
    async fn screenshot(&self) -> Result<Option<Vec<u8>>>;

    /// Ends the session and releases backend resources.
    async fn close(self) -> Result<()>;
}

/// Something that can open marketplace pages.
#[async_trait]
pub trait Browser: Send {
    type Page: MarketplacePage;

    async fn launch(&mut self) -> Result<Self::Page>;
}

/// Extracts every listing on `page` using the first selector that matches.
///
/// Returns the selector that matched, or `None` with an empty batch when none
/// of [`LISTING_SELECTORS`] found anything.
pub async fn collect_listings<P: MarketplacePage>(page: &P) -> (Option<&'static str>, Vec<Listing>) {
    for &selector in LISTING_SELECTORS {
        let nodes = match page.listing_nodes(selector).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Selector {} failed: {}", selector, e);
                continue;
            }
        };
        if nodes.is_empty() {
            info!("Selector {} not found", selector);
            continue;
        }
        info!("Found {} items with selector: {}", nodes.len(), selector);
        let listings = futures::stream::iter(&nodes)
            .then(|node| async move { extract(&node.snapshot().await) })
            .collect::<Vec<_>>()
            .await;
        return (Some(selector), listings);
    }
    warn!("No listings found with any of the known selectors");
    (None, Vec::new())
}
