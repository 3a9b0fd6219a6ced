use crate::listing::Listing;
use async_trait::async_trait;
use chrono::Local;
use color_eyre::eyre::{Result, eyre};
use crossterm::style::{Stylize, style};
use std::fmt::Write as _;
use tokio::process::Command;
use tracing::{info, warn};

const BELL: char = '\x07';
const RULE: &str = "============================================";

/// Platform desktop notification dispatch.
#[async_trait]
pub trait DesktopAlert: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<()>;
}

/// Dispatches through `osascript` on macOS and `notify-send` elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAlert;

impl SystemAlert {
    pub fn boxed() -> Box<dyn DesktopAlert> {
        Box::new(Self)
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl DesktopAlert for SystemAlert {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        let output = if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\" sound name \"Ping\"",
                escape_applescript(body),
                escape_applescript(title)
            );
            Command::new("osascript").arg("-e").arg(script).output().await?
        } else {
            Command::new("notify-send").arg(title).arg(body).output().await?
        };
        if !output.status.success() {
            return Err(eyre!(
                "notification command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Title and body of the desktop alert for `listings`.
pub fn alert_summary(query: &str, listings: &[Listing]) -> (String, String) {
    let title = format!("{} new {} items found!", listings.len(), query);
    let mut body = listings
        .iter()
        .take(3)
        .map(Listing::display_title)
        .collect::<Vec<_>>()
        .join(", ");
    if listings.len() > 3 {
        let _ = write!(body, " and {} more...", listings.len() - 3);
    }
    (title, body)
}

/// Console block announcing `listings`.
pub fn render_alert(query: &str, listings: &[Listing]) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}{BELL}",
        style("🔔 ALERT! NEW MARKETPLACE ITEMS FOUND! 🔔")
            .black()
            .on_green()
            .bold()
    );
    let _ = writeln!(out, "{}", style(RULE).yellow().bold());
    let _ = writeln!(
        out,
        "{} Found {} new items for \"{}\":",
        style(format!("[{now}]")).cyan(),
        style(listings.len()).red().bold(),
        query
    );
    let _ = writeln!(out, "{}", style(RULE).yellow());
    for (index, listing) in listings.iter().enumerate() {
        let _ = writeln!(
            out,
            "{} {}",
            style(format!("{}.", index + 1)).green(),
            style(listing.price.as_deref().unwrap_or("")).yellow()
        );
        let _ = writeln!(
            out,
            "   {}",
            style(listing.title.as_deref().unwrap_or("No Title"))
                .cyan()
                .bold()
        );
        let _ = writeln!(
            out,
            "   {}",
            style(format!(
                "Location: {}",
                listing.location.as_deref().unwrap_or("No Location")
            ))
            .magenta()
        );
        let _ = writeln!(out, "   {}", style(&listing.link).blue().underlined());
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "{BELL}{BELL}{}", style(RULE).yellow());
    out
}

/// Announces new listings on the console and the desktop.
pub struct Notifier {
    query: String,
    alert: Option<Box<dyn DesktopAlert>>,
}

impl Notifier {
    pub fn new(query: impl Into<String>, alert: Option<Box<dyn DesktopAlert>>) -> Self {
        Self {
            query: query.into(),
            alert,
        }
    }

    /// Prints and dispatches an alert for `listings`. Never fails; dispatch
    /// errors are logged.
    pub async fn notify(&self, listings: &[Listing]) {
        if listings.is_empty() {
            return;
        }
        print!("{}", render_alert(&self.query, listings));
        info!("Found {} new items for \"{}\"", listings.len(), self.query);

        let Some(alert) = &self.alert else {
            return;
        };
        let (title, body) = alert_summary(&self.query, listings);
        match alert.send(&title, &body).await {
            Ok(()) => info!("Desktop notification sent"),
            Err(e) => warn!("Error sending desktop notification: {}", e),
        }
    }

    pub fn no_new_items(&self) {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        println!(
            "{}",
            style(format!("[{now}] No new items for \"{}\".", self.query)).dim()
        );
        info!("No new items for \"{}\"", self.query);
    }
}
