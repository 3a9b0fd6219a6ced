//! Static-HTML page backend.
//!
//! Serves pages from captured HTML instead of a live browser. Used to replay
//! diagnostic snapshots and to drive the monitor in tests.

use crate::errors::{MonitorError, Result};
use crate::extract::{
    FRAGMENT_SELECTOR, GEOCODE_SELECTOR, ListingSnapshot, PRICE_SELECTOR, TITLE_SELECTOR,
};
use crate::page::{Browser, ListingNode, MarketplacePage};
use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

lazy_static! {
    static ref TITLE: Selector = Selector::parse(TITLE_SELECTOR).unwrap();
    static ref PRICE: Selector = Selector::parse(PRICE_SELECTOR).unwrap();
    static ref GEOCODE: Selector = Selector::parse(GEOCODE_SELECTOR).unwrap();
    static ref FRAGMENT: Selector = Selector::parse(FRAGMENT_SELECTOR).unwrap();
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
}

#[derive(Debug, Default)]
struct Document {
    url: String,
    html: String,
    /// Documents served by successive `goto` calls.
    upcoming: VecDeque<String>,
}

/// A page whose DOM is a fixed HTML string.
///
/// Each `goto` moves to the next queued document, if any, and otherwise keeps
/// the current one. Clones share the same document, which lets a test change
/// what the page shows while the monitor is waiting on it.
#[derive(Debug, Clone, Default)]
pub struct HtmlPage {
    doc: Arc<Mutex<Document>>,
}

impl HtmlPage {
    /// A page already showing `html` at `url`.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            doc: Arc::new(Mutex::new(Document {
                url: url.into(),
                html: html.into(),
                upcoming: VecDeque::new(),
            })),
        }
    }

    /// A blank page that serves `documents` one per navigation.
    pub fn scripted<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            doc: Arc::new(Mutex::new(Document {
                url: "about:blank".to_string(),
                html: String::new(),
                upcoming: documents.into_iter().map(Into::into).collect(),
            })),
        }
    }

    /// Swaps the current DOM in place, as client-side rendering would.
    pub fn replace(&self, html: impl Into<String>) {
        self.lock().html = html.into();
    }

    /// Changes the reported URL without loading anything.
    pub fn set_url(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        // A poisoned lock only means a test panicked mid-update.
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn html(&self) -> String {
        self.lock().html.clone()
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| MonitorError::Selector(selector.to_string()))
}

/// Inner text of an element, whitespace collapsed.
fn inner_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(inner_text)
}

/// Metadata JSON from the element itself or its nearest qualifying ancestor.
fn closest_metadata(element: ElementRef<'_>) -> Option<String> {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .find_map(|el| {
            let value = el.value();
            value.attr("data-bt").or_else(|| {
                value
                    .attr("data-store")
                    .filter(|store| store.contains("location"))
            })
        })
        .map(str::to_string)
}

fn snapshot_of(element: ElementRef<'_>) -> ListingSnapshot {
    let value = element.value();
    let href = value.attr("href").map(str::to_string).or_else(|| {
        element
            .select(&ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string)
    });
    ListingSnapshot {
        href,
        title_text: first_text(element, &TITLE),
        price_text: first_text(element, &PRICE),
        geocode_text: first_text(element, &GEOCODE),
        aria_label: value.attr("aria-label").map(str::to_string),
        fragments: element.select(&FRAGMENT).map(inner_text).collect(),
        anchor_text: Some(inner_text(element)),
        metadata: closest_metadata(element),
    }
}

/// Captures every card matching `selector` in `html`.
pub fn snapshots(html: &str, selector: &str) -> Result<Vec<ListingSnapshot>> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document.select(&selector).map(snapshot_of).collect())
}

/// Number of elements matching `selector` in `html`.
pub fn count(html: &str, selector: &str) -> Result<usize> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&selector).count())
}

/// A card pre-captured from static HTML.
#[derive(Debug, Clone)]
pub struct HtmlNode(ListingSnapshot);

#[async_trait]
impl ListingNode for HtmlNode {
    async fn snapshot(&self) -> ListingSnapshot {
        self.0.clone()
    }
}

#[async_trait]
impl MarketplacePage for HtmlPage {
    type Node = HtmlNode;

    async fn goto(&mut self, url: &str) -> Result<()> {
        let mut doc = self.lock();
        doc.url = url.to_string();
        if let Some(next) = doc.upcoming.pop_front() {
            doc.html = next;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        count(&self.html(), selector)
    }

    async fn listing_nodes(&self, selector: &str) -> Result<Vec<HtmlNode>> {
        Ok(snapshots(&self.html(), selector)?
            .into_iter()
            .map(HtmlNode)
            .collect())
    }

    async fn source(&self) -> Result<String> {
        Ok(self.html())
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Hands out the same [`HtmlPage`] on every launch.
#[derive(Debug, Clone, Default)]
pub struct HtmlBrowser {
    page: HtmlPage,
}

impl HtmlBrowser {
    pub fn new(page: HtmlPage) -> Self {
        Self { page }
    }
}

#[async_trait]
impl Browser for HtmlBrowser {
    type Page = HtmlPage;

    async fn launch(&mut self) -> Result<HtmlPage> {
        Ok(self.page.clone())
    }
}
