use crate::browser::WebBrowser;
use crate::cli::Cli;
use crate::config::Config;
use crate::html::HtmlPage;
use crate::login::ConsoleSignals;
use crate::monitor::Monitor;
use crate::notify::{Notifier, SystemAlert};
use clap::Parser;
use color_eyre::eyre::WrapErr;
use std::path::Path;
use tracing::{error, info};

pub mod browser;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod diff;
pub mod errors;
pub mod extract;
pub mod html;
pub mod listing;
pub mod logging;
pub mod login;
pub mod monitor;
pub mod notify;
pub mod page;
pub mod store;

/// Prints the listings found in a saved results page.
async fn replay(file: &Path) -> color_eyre::Result<()> {
    let html = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("could not read {}", file.display()))?;
    let page = HtmlPage::new(format!("file://{}", file.display()), html);
    let (selector, listings) = page::collect_listings(&page).await;
    match selector {
        Some(selector) => info!("Matched {} listings with {}", listings.len(), selector),
        None => info!("No listing selector matched {}", file.display()),
    }
    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    errors::init()?;
    let args = Cli::parse();
    let mut config = Config::new(args.config.as_deref())?;
    args.apply(&mut config);
    logging::init(&config.data_dir)?;
    info!("Starting up");

    if let Some(file) = &args.replay {
        return replay(file).await;
    }

    info!(
        "Watching for \"{}\" every {:?}, data in {}",
        config.query,
        config.interval(),
        config.data_dir.display()
    );
    let browser = WebBrowser::new(&config);
    let alert = config.desktop_alerts.then(SystemAlert::boxed);
    let notifier = Notifier::new(config.query.clone(), alert);
    let mut monitor = Monitor::new(config, browser, notifier, ConsoleSignals::spawn())?;

    let result = if args.once {
        monitor.store().reconcile()?;
        monitor.run_once().await;
        Ok(())
    } else {
        tokio::select! {
            result = monitor.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                Ok(())
            }
        }
    };
    if let Err(ref err) = result {
        error!("Error: {}", err);
    }
    info!("Shutting down");
    result
}
