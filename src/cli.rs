use crate::config::{Config, get_config_dir, get_data_dir};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
    /// Config file to load on top of the defaults
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Search term to watch
    #[arg(short, long, value_name = "QUERY")]
    pub query: Option<String>,

    /// Milliseconds to wait between checks
    #[arg(short, long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_alerts: bool,

    /// Run a single check and exit
    #[arg(long)]
    pub once: bool,

    /// Extract listings from a saved HTML page and print them as JSON
    #[arg(long, value_name = "FILE", conflicts_with = "once")]
    pub replay: Option<PathBuf>,
}

impl Cli {
    /// Applies flags that override the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(query) = &self.query {
            config.query = query.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }
        if self.headless {
            config.headless = true;
        }
        if self.no_alerts {
            config.desktop_alerts = false;
        }
    }
}

const VERSION_MESSAGE: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

pub fn version() -> String {
    let author = clap::crate_authors!();

    let config_dir_path = get_config_dir().display().to_string();
    let data_dir_path = get_data_dir().display().to_string();

    format!(
        "\
{VERSION_MESSAGE}

Authors: {author}

Config directory: {config_dir_path}
Data directory: {data_dir_path}"
    )
}
