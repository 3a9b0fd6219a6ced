//! WebDriver page backend: geckodriver + Firefox with a persistent profile.

use crate::config::Config;
use crate::errors::{MonitorError, Result};
use crate::extract::{
    FRAGMENT_SELECTOR, GEOCODE_SELECTOR, ListingSnapshot, METADATA_SELECTOR, PRICE_SELECTOR,
    TITLE_SELECTOR,
};
use crate::page::{Browser, ListingNode, MarketplacePage};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Files a browser leaves in its profile to claim exclusive use of it.
pub const PROFILE_LOCKS: &[&str] = &["lock", ".parentlock", "parent.lock", "SingletonLock"];

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);
const WINDOW_SIZE: (u32, u32) = (1280, 800);

/// Launches WebDriver sessions against the configured profile.
#[derive(Debug, Clone)]
pub struct WebBrowser {
    webdriver_url: String,
    geckodriver: String,
    profile_dir: PathBuf,
    headless: bool,
}

impl WebBrowser {
    pub fn new(config: &Config) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            geckodriver: config.geckodriver.clone(),
            profile_dir: config.profile_dir(),
            headless: config.headless,
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, Value> {
        let mut args = vec![
            "-profile".to_string(),
            self.profile_dir.display().to_string(),
        ];
        if self.headless {
            args.push("-headless".to_string());
        }
        let mut caps = serde_json::Map::new();
        caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
        caps
    }

    fn spawn_driver(&self) -> Result<Option<Child>> {
        if self.geckodriver.is_empty() {
            return Ok(None);
        }
        let port = url::Url::parse(&self.webdriver_url)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(4444);
        info!("Starting {} on port {}", self.geckodriver, port);
        let child = Command::new(&self.geckodriver)
            .args(["--port", &port.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonitorError::Launch(format!("{}: {}", self.geckodriver, e)))?;
        Ok(Some(child))
    }

    async fn connect(&self) -> Result<Client> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities());
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match builder.connect(&self.webdriver_url).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!("webdriver connect attempt {} failed: {}", attempt, e);
                    last_error = Some(e.to_string());
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }
        Err(MonitorError::Launch(last_error.unwrap_or_default()))
    }
}

#[async_trait]
impl Browser for WebBrowser {
    type Page = WebPage;

    async fn launch(&mut self) -> Result<WebPage> {
        fs::create_dir_all(&self.profile_dir)
            .map_err(|e| MonitorError::io(&self.profile_dir, e))?;
        release_profile(&self.profile_dir).await;

        let mut driver = self.spawn_driver()?;
        info!("Connecting to webdriver at {}", self.webdriver_url);
        let client = match self.connect().await {
            Ok(client) => client,
            Err(e) => {
                if let Some(child) = driver.as_mut() {
                    let _ = child.kill().await;
                }
                return Err(e);
            }
        };
        if let Err(e) = client.set_window_size(WINDOW_SIZE.0, WINDOW_SIZE.1).await {
            debug!("could not resize window: {}", e);
        }
        info!("Webdriver client connected");
        Ok(WebPage { client, driver })
    }
}

/// Clears leftovers from a previous session that would block a new one.
pub async fn release_profile(profile_dir: &Path) {
    let removed = remove_stale_locks(profile_dir);
    if removed > 0 {
        info!("Removed {} stale browser lock file(s)", removed);
    }
    let terminated = terminate_orphans(profile_dir);
    if terminated > 0 {
        info!("Terminated {} orphaned browser process(es)", terminated);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// Deletes [`PROFILE_LOCKS`] from `profile_dir`. Returns how many were removed.
pub fn remove_stale_locks(profile_dir: &Path) -> usize {
    PROFILE_LOCKS
        .iter()
        .map(|name| profile_dir.join(name))
        // Lock files are often dangling symlinks, so `exists` is not enough.
        .filter(|path| fs::symlink_metadata(path).is_ok())
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not remove lock file {}: {}", path.display(), e);
                false
            }
        })
        .count()
}

/// Whether a NUL-separated `/proc/<pid>/cmdline` mentions `profile_dir`.
pub fn cmdline_references(cmdline: &[u8], profile_dir: &Path) -> bool {
    let needle = profile_dir.to_string_lossy();
    !needle.is_empty()
        && cmdline
            .split(|b| *b == 0)
            .any(|arg| String::from_utf8_lossy(arg).contains(needle.as_ref()))
}

#[cfg(target_os = "linux")]
fn terminate_orphans(profile_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir("/proc") else {
        return 0;
    };
    let own_pid = std::process::id();
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .filter(|pid| {
            fs::read(format!("/proc/{pid}/cmdline"))
                .is_ok_and(|cmdline| cmdline_references(&cmdline, profile_dir))
        })
        .filter(|pid| {
            debug!("terminating orphaned browser process {}", pid);
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe { libc::kill(*pid as libc::pid_t, libc::SIGTERM) == 0 }
        })
        .count()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn terminate_orphans(profile_dir: &Path) -> usize {
    std::process::Command::new("pkill")
        .arg("-f")
        .arg(profile_dir)
        .status()
        .map(|status| usize::from(status.success()))
        .unwrap_or(0)
}

#[cfg(not(unix))]
fn terminate_orphans(_profile_dir: &Path) -> usize {
    0
}

/// A live WebDriver session.
#[derive(Debug)]
pub struct WebPage {
    client: Client,
    driver: Option<Child>,
}

#[async_trait]
impl MarketplacePage for WebPage {
    type Node = WebNode;

    async fn goto(&mut self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.client.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.client.find_all(Locator::Css(selector)).await?.len())
    }

    async fn listing_nodes(&self, selector: &str) -> Result<Vec<WebNode>> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        Ok(elements
            .into_iter()
            .map(|element| WebNode {
                client: self.client.clone(),
                element,
            })
            .collect())
    }

    async fn source(&self) -> Result<String> {
        Ok(self.client.source().await?)
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.client.screenshot().await?))
    }

    async fn close(mut self) -> Result<()> {
        info!("Closing browser session");
        let closed = self.client.close().await;
        if let Some(mut child) = self.driver.take() {
            if let Err(e) = child.kill().await {
                warn!("Could not stop geckodriver: {}", e);
            }
        }
        closed?;
        Ok(())
    }
}

/// One search-result card in a live session.
#[derive(Debug, Clone)]
pub struct WebNode {
    client: Client,
    element: Element,
}

const CLOSEST_METADATA_JS: &str = r#"
const el = arguments[0].closest(arguments[1]);
if (!el) { return null; }
return el.getAttribute('data-bt') || el.getAttribute('data-store');
"#;

impl WebNode {
    async fn child_text(&self, selector: &str) -> Option<String> {
        let child = self.element.find(Locator::Css(selector)).await.ok()?;
        child.text().await.ok()
    }

    async fn href(&self) -> Option<String> {
        if let Ok(Some(href)) = self.element.prop("href").await {
            return Some(href);
        }
        let anchor = self.element.find(Locator::Css("a[href]")).await.ok()?;
        anchor.prop("href").await.ok().flatten()
    }

    async fn fragments(&self) -> Vec<String> {
        let Ok(children) = self.element.find_all(Locator::Css(FRAGMENT_SELECTOR)).await else {
            return Vec::new();
        };
        let mut texts = Vec::with_capacity(children.len());
        for child in children {
            texts.push(child.text().await.unwrap_or_default());
        }
        texts
    }

    async fn metadata(&self) -> Option<String> {
        let element = serde_json::to_value(&self.element).ok()?;
        let value = self
            .client
            .execute(CLOSEST_METADATA_JS, vec![element, json!(METADATA_SELECTOR)])
            .await
            .map_err(|e| debug!("metadata lookup failed: {}", e))
            .ok()?;
        value.as_str().map(str::to_string)
    }
}

#[async_trait]
impl ListingNode for WebNode {
    async fn snapshot(&self) -> ListingSnapshot {
        ListingSnapshot {
            href: self.href().await,
            title_text: self.child_text(TITLE_SELECTOR).await,
            price_text: self.child_text(PRICE_SELECTOR).await,
            geocode_text: self.child_text(GEOCODE_SELECTOR).await,
            aria_label: self.element.attr("aria-label").await.ok().flatten(),
            fragments: self.fragments().await,
            anchor_text: self.element.text().await.ok(),
            metadata: self.metadata().await,
        }
    }
}
