use crate::config::Config;
use crate::diagnostics::{Checkpoint, Diagnostics};
use crate::diff::diff;
use crate::errors::{MonitorError, Result};
use crate::listing::Listing;
use crate::login::{self, ConsoleSignals, LoginSignal};
use crate::notify::Notifier;
use crate::page::{Browser, MarketplacePage, collect_listings};
use crate::store::{ListingStore, StoreKind};
use chrono::Local;
use std::fs;
use strum::Display;
use tracing::{debug, error, info, warn};

/// Phases of a monitoring cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
pub enum MonitorState {
    #[default]
    Idle,
    Navigating,
    DetectingLogin,
    WaitingForManualLogin,
    Extracting,
    Diffing,
    Notifying,
    Reconciling,
    Sleeping,
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Selector that located the listing cards, if any did.
    pub selector: Option<&'static str>,
    /// Every listing on the page.
    pub extracted: Vec<Listing>,
    /// Listings not seen before this cycle.
    pub fresh: Vec<Listing>,
    /// Set when the cycle had to wait for a manual login.
    pub login: Option<LoginSignal>,
}

/// Drives the check → diff → notify → reconcile cycle against a browser.
pub struct Monitor<B: Browser> {
    config: Config,
    search_url: String,
    browser: B,
    store: ListingStore,
    notifier: Notifier,
    diagnostics: Diagnostics,
    console: ConsoleSignals,
    state: MonitorState,
}

impl<B: Browser> Monitor<B> {
    /// Prepares data directories and listing files.
    ///
    /// Failing here is fatal, unlike any failure inside a cycle.
    pub fn new(
        config: Config,
        browser: B,
        notifier: Notifier,
        console: ConsoleSignals,
    ) -> color_eyre::Result<Self> {
        let search_url = config.search_url()?.to_string();
        let store = ListingStore::new(&config.data_dir);
        store.init()?;
        let assets_dir = config.assets_dir();
        fs::create_dir_all(&assets_dir).map_err(|e| MonitorError::io(&assets_dir, e))?;
        Ok(Self {
            diagnostics: Diagnostics::new(assets_dir),
            search_url,
            config,
            browser,
            store,
            notifier,
            console,
            state: MonitorState::Idle,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    fn transition(&mut self, next: MonitorState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    /// Checks forever, sleeping the configured interval between cycles.
    pub async fn run(&mut self) -> color_eyre::Result<()> {
        let recovered = self.store.reconcile()?;
        if !recovered.is_empty() {
            info!(
                "Recovered {} listings left over from an interrupted check",
                recovered.len()
            );
        }
        loop {
            self.run_once().await;
            self.transition(MonitorState::Sleeping);
            let now = Local::now();
            let next = now + self.config.interval();
            info!(
                "done checking marketplace {}, will run next {}",
                now.format("%Y-%m-%d %H:%M:%S"),
                next.format("%Y-%m-%d %H:%M:%S")
            );
            tokio::time::sleep(self.config.interval()).await;
        }
    }

    /// Runs one full cycle. Errors are logged and yield `None`; the store is
    /// reconciled either way.
    pub async fn run_once(&mut self) -> Option<CycleReport> {
        let outcome = match self.browser.launch().await {
            Ok(mut page) => {
                let outcome = self.check(&mut page).await;
                if outcome.is_err() {
                    self.diagnostics.capture(&page, Checkpoint::ErrorPage).await;
                }
                if let Err(e) = page.close().await {
                    warn!("Error closing browser: {}", e);
                }
                outcome
            }
            Err(e) => Err(e),
        };

        self.transition(MonitorState::Reconciling);
        if let Err(e) = self.store.reconcile() {
            error!("Failed to reconcile listing store: {}", e);
        }
        self.transition(MonitorState::Idle);

        match outcome {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Error during check: {}", e);
                None
            }
        }
    }

    async fn navigate(&mut self, page: &mut B::Page) -> Result<()> {
        self.transition(MonitorState::Navigating);
        let timeout = self.config.page_load_timeout();
        tokio::time::timeout(timeout, page.goto(&self.search_url))
            .await
            .map_err(|_| MonitorError::PageLoadTimeout(timeout))??;
        debug!("Page loaded, waiting for content to stabilize");
        tokio::time::sleep(self.config.settle()).await;
        Ok(())
    }

    async fn check(&mut self, page: &mut B::Page) -> Result<CycleReport> {
        let seen = self.store.load(StoreKind::Seen)?;
        self.navigate(page).await?;

        self.transition(MonitorState::DetectingLogin);
        let probe = login::probe(&*page).await?;
        let mut login_signal = None;
        if probe.is_login_wall() {
            info!("Login wall detected: {:?}", probe);
            self.diagnostics.capture(&*page, Checkpoint::LoginPage).await;
            self.transition(MonitorState::WaitingForManualLogin);
            login::print_login_banner(self.config.login_timeout());
            let waited = login::wait_for_manual_login(
                &*page,
                &mut self.console,
                self.config.login_timeout(),
                self.config.login_poll(),
            )
            .await;
            match waited {
                Ok(signal) => {
                    info!("Login detected ({}), returning to search results", signal);
                    login_signal = Some(signal);
                    self.navigate(page).await?;
                }
                Err(e) => {
                    self.diagnostics.capture(&*page, Checkpoint::LoginFailed).await;
                    return Err(e);
                }
            }
        }
        self.diagnostics.capture(&*page, Checkpoint::InitialPage).await;

        self.transition(MonitorState::Extracting);
        let (selector, extracted) = collect_listings(&*page).await;
        if selector.is_none() {
            self.diagnostics
                .capture(&*page, Checkpoint::MarketplaceDebug)
                .await;
        }

        self.transition(MonitorState::Diffing);
        self.store.save(StoreKind::New, &extracted)?;
        let fresh = diff(&extracted, &seen);

        self.transition(MonitorState::Notifying);
        if fresh.is_empty() {
            self.notifier.no_new_items();
        } else {
            self.notifier.notify(&fresh).await;
        }

        Ok(CycleReport {
            selector,
            extracted,
            fresh,
            login: login_signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::{HtmlBrowser, HtmlNode, HtmlPage};
    use crate::notify::DesktopAlert;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default, Clone)]
    struct RecordingAlert(Arc<Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl DesktopAlert for RecordingAlert {
        async fn send(&self, title: &str, _body: &str) -> color_eyre::Result<()> {
            self.0.lock().unwrap().push(title.to_string());
            Ok(())
        }
    }

    struct FailingBrowser;

    #[async_trait::async_trait]
    impl Browser for FailingBrowser {
        type Page = HtmlPage;

        async fn launch(&mut self) -> Result<HtmlPage> {
            Err(MonitorError::Launch("geckodriver not found".into()))
        }
    }

    /// Serves an [`HtmlPage`] whose navigation never completes.
    #[derive(Clone)]
    struct StalledPage(HtmlPage);

    #[async_trait::async_trait]
    impl MarketplacePage for StalledPage {
        type Node = HtmlNode;

        async fn goto(&mut self, _url: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            self.0.current_url().await
        }

        async fn count(&self, selector: &str) -> Result<usize> {
            self.0.count(selector).await
        }

        async fn listing_nodes(&self, selector: &str) -> Result<Vec<HtmlNode>> {
            self.0.listing_nodes(selector).await
        }

        async fn source(&self) -> Result<String> {
            self.0.source().await
        }

        async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }

    struct StalledBrowser(HtmlPage);

    #[async_trait::async_trait]
    impl Browser for StalledBrowser {
        type Page = StalledPage;

        async fn launch(&mut self) -> Result<StalledPage> {
            Ok(StalledPage(self.0.clone()))
        }
    }

    fn results(links: &[&str]) -> String {
        let cards: String = links
            .iter()
            .map(|link| {
                format!(
                    r#"<a href="https://www.facebook.com/marketplace/item/{link}/">
                         <span>Item {link}</span><span>PHP 1,000</span><span>Pasig, Metro Manila</span>
                       </a>"#
                )
            })
            .collect();
        format!(r#"<div aria-label="Search results">{cards}</div>"#)
    }

    fn link(id: &str) -> String {
        format!("https://www.facebook.com/marketplace/item/{id}/")
    }

    fn config(dir: &std::path::Path) -> Config {
        let file = dir.join("mpwatch.toml");
        fs::write(
            &file,
            format!(
                r#"
                data_dir = "{}"
                settle_ms = 0
                login_timeout_ms = 200
                login_poll_ms = 10
                page_load_timeout_ms = 200
                "#,
                dir.join("data").display()
            ),
        )
        .unwrap();
        Config::new(Some(&file)).unwrap()
    }

    fn monitor<B: Browser>(
        dir: &std::path::Path,
        browser: B,
    ) -> (Monitor<B>, RecordingAlert, tokio::sync::mpsc::UnboundedSender<()>) {
        let alert = RecordingAlert::default();
        let notifier = Notifier::new("macbook", Some(Box::new(alert.clone())));
        let (sender, console) = ConsoleSignals::channel();
        let monitor = Monitor::new(config(dir), browser, notifier, console).unwrap();
        (monitor, alert, sender)
    }

    #[tokio::test]
    async fn test_new_listing_is_reported_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let page = HtmlPage::scripted([results(&["a", "b"])]);
        let (mut monitor, alert, _console) = monitor(dir.path(), HtmlBrowser::new(page));
        monitor
            .store()
            .save(StoreKind::Seen, &[Listing::new(link("a"))])
            .unwrap();

        let report = monitor.run_once().await.unwrap();

        assert_eq!(report.extracted.len(), 2);
        assert_eq!(
            report.fresh.iter().map(|l| l.link.clone()).collect::<Vec<_>>(),
            vec![link("b")]
        );
        assert_eq!(report.login, None);
        assert_eq!(*alert.0.lock().unwrap(), vec!["1 new macbook items found!"]);

        let seen = monitor.store().load(StoreKind::Seen).unwrap();
        assert_eq!(
            seen.iter().map(|l| l.link.clone()).collect::<Vec<_>>(),
            vec![link("a"), link("b")]
        );
        assert_eq!(seen[1].title.as_deref(), Some("Item b"));
        assert!(monitor.store().load(StoreKind::New).unwrap().is_empty());
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_second_cycle_finds_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let page = HtmlPage::new("about:blank", results(&["a", "b"]));
        let (mut monitor, alert, _console) = monitor(dir.path(), HtmlBrowser::new(page));

        let first = monitor.run_once().await.unwrap();
        let second = monitor.run_once().await.unwrap();

        assert_eq!(first.fresh.len(), 2);
        assert!(second.fresh.is_empty());
        assert_eq!(alert.0.lock().unwrap().len(), 1);
        assert_eq!(monitor.store().load(StoreKind::Seen).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_login_wall_waits_for_console_then_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let wall = r#"<form><input type="password"></form>"#;
        let page = HtmlPage::scripted([wall.to_string(), results(&["a"])]);
        let (mut monitor, _alert, console) = monitor(dir.path(), HtmlBrowser::new(page));
        console.send(()).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = console.send(());
        });

        let report = monitor.run_once().await.unwrap();

        assert_eq!(report.login, Some(LoginSignal::Console));
        assert_eq!(report.fresh.len(), 1);
        let assets = dir.path().join("data").join("assets");
        assert!(assets.join("login_page.html").exists());
    }

    #[tokio::test]
    async fn test_login_timeout_fails_cycle_but_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let wall = r#"<form><input type="password"></form>"#;
        let page = HtmlPage::new("about:blank", wall);
        let (mut monitor, alert, _console) = monitor(dir.path(), HtmlBrowser::new(page));
        monitor
            .store()
            .save(StoreKind::Seen, &[Listing::new(link("a"))])
            .unwrap();

        assert!(monitor.run_once().await.is_none());

        assert!(alert.0.lock().unwrap().is_empty());
        assert_eq!(monitor.store().load(StoreKind::Seen).unwrap().len(), 1);
        let assets = dir.path().join("data").join("assets");
        assert!(assets.join("login_failed.html").exists());
        assert!(assets.join("error_page.html").exists());
    }

    #[tokio::test]
    async fn test_page_load_timeout_fails_cycle_and_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let page = HtmlPage::new("about:blank", "<p>loading</p>");
        let (mut monitor, alert, _console) = monitor(dir.path(), StalledBrowser(page));
        monitor
            .store()
            .save(StoreKind::Seen, &[Listing::new("a")])
            .unwrap();
        monitor
            .store()
            .save(StoreKind::New, &[Listing::new("b")])
            .unwrap();

        let started = std::time::Instant::now();
        assert!(monitor.run_once().await.is_none());

        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(alert.0.lock().unwrap().is_empty());
        let error_page = dir.path().join("data/assets/error_page.html");
        assert_eq!(fs::read_to_string(error_page).unwrap(), "<p>loading</p>");
        assert_eq!(
            monitor.store().load(StoreKind::Seen).unwrap(),
            vec![Listing::new("a"), Listing::new("b")]
        );
        assert!(monitor.store().load(StoreKind::New).unwrap().is_empty());
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_launch_failure_still_recovers_pending_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, _alert, _console) = monitor(dir.path(), FailingBrowser);
        monitor
            .store()
            .save(StoreKind::Seen, &[Listing::new("a")])
            .unwrap();
        monitor
            .store()
            .save(StoreKind::New, &[Listing::new("a"), Listing::new("b")])
            .unwrap();

        assert!(monitor.run_once().await.is_none());

        assert_eq!(
            monitor.store().load(StoreKind::Seen).unwrap(),
            vec![Listing::new("a"), Listing::new("b")]
        );
        assert!(monitor.store().load(StoreKind::New).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_results_capture_debug_page() {
        let dir = tempfile::tempdir().unwrap();
        let page = HtmlPage::new("about:blank", "<main><p>No results</p></main>");
        let (mut monitor, alert, console) = monitor(dir.path(), HtmlBrowser::new(page));
        // A page without item links looks walled until the operator confirms.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = console.send(());
        });

        let report = monitor.run_once().await.unwrap();

        assert_eq!(report.selector, None);
        assert!(report.extracted.is_empty());
        assert!(alert.0.lock().unwrap().is_empty());
        assert!(
            dir.path()
                .join("data/assets/marketplace_debug.html")
                .exists()
        );
    }
}
