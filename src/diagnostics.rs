use crate::page::MarketplacePage;
use std::path::PathBuf;
use strum::Display;
use tracing::{info, warn};

/// Points in a cycle where the page is captured for later inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Checkpoint {
    LoginPage,
    LoginFailed,
    InitialPage,
    MarketplaceDebug,
    ErrorPage,
}

/// Writes screenshots and HTML snapshots to the assets directory.
///
/// Capturing is advisory: failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn html_path(&self, checkpoint: Checkpoint) -> PathBuf {
        self.dir.join(format!("{checkpoint}.html"))
    }

    pub fn screenshot_path(&self, checkpoint: Checkpoint) -> PathBuf {
        self.dir.join(format!("{checkpoint}.png"))
    }

    pub async fn capture<P: MarketplacePage>(&self, page: &P, checkpoint: Checkpoint) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Could not create {}: {}", self.dir.display(), e);
            return;
        }

        match page.screenshot().await {
            Ok(Some(png)) => {
                let path = self.screenshot_path(checkpoint);
                match tokio::fs::write(&path, png).await {
                    Ok(()) => info!("Screenshot saved to {}", path.display()),
                    Err(e) => warn!("Could not write {}: {}", path.display(), e),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not take {} screenshot: {}", checkpoint, e),
        }

        match page.source().await {
            Ok(html) => {
                let path = self.html_path(checkpoint);
                if let Err(e) = tokio::fs::write(&path, html).await {
                    warn!("Could not write {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Could not read {} page source: {}", checkpoint, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::HtmlPage;

    #[test]
    fn test_checkpoint_file_names() {
        let diagnostics = Diagnostics::new("/tmp/assets");
        assert_eq!(
            diagnostics.html_path(Checkpoint::MarketplaceDebug),
            PathBuf::from("/tmp/assets/marketplace_debug.html")
        );
        assert_eq!(
            diagnostics.screenshot_path(Checkpoint::LoginFailed),
            PathBuf::from("/tmp/assets/login_failed.png")
        );
    }

    #[tokio::test]
    async fn test_capture_writes_html_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("assets"));
        let page = HtmlPage::new("about:blank", "<p>hello</p>");
        diagnostics.capture(&page, Checkpoint::InitialPage).await;
        let html = std::fs::read_to_string(diagnostics.html_path(Checkpoint::InitialPage)).unwrap();
        assert_eq!(html, "<p>hello</p>");
        assert!(!diagnostics.screenshot_path(Checkpoint::InitialPage).exists());
    }
}
