use config::FileFormat;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path, path::PathBuf, time::Duration};
use url::Url;

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub static ref DATA_FOLDER: Option<PathBuf> =
        env::var(format!("{}_DATA", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
    pub static ref CONFIG_FOLDER: Option<PathBuf> =
        env::var(format!("{}_CONFIG", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
}

const CONFIG_FILES: &[(&str, FileFormat)] = &[
    ("config.json5", FileFormat::Json5),
    ("config.json", FileFormat::Json),
    ("config.yaml", FileFormat::Yaml),
    ("config.toml", FileFormat::Toml),
    ("config.ini", FileFormat::Ini),
];

/// Runtime settings for the monitor.
///
/// Layered from built-in defaults, an optional config file, `MPWATCH_*`
/// environment variables and finally command-line flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Search term.
    pub query: String,
    /// Time between the end of one check and the start of the next.
    pub interval_ms: u64,
    /// Marketplace search endpoint; the query is appended as parameters.
    pub base_url: String,
    pub sort_by: String,
    /// Where the listing files and the log live.
    pub data_dir: PathBuf,
    /// Screenshots and HTML snapshots. Defaults to `<data_dir>/assets`.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    /// Persistent browser profile. Defaults to `<data_dir>/profile`.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    pub webdriver_url: String,
    /// Driver binary spawned for each session; empty to use an already
    /// running server at `webdriver_url`.
    pub geckodriver: String,
    pub headless: bool,
    pub page_load_timeout_ms: u64,
    /// Pause after navigation so lazily rendered cards can appear.
    pub settle_ms: u64,
    pub login_timeout_ms: u64,
    pub login_poll_ms: u64,
    pub desktop_alerts: bool,
}

impl Config {
    pub fn new(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let data_dir = get_data_dir();
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("query", "macbook")?
            .set_default("interval_ms", 10 * 60 * 1000_i64)?
            .set_default("base_url", "https://www.facebook.com/marketplace/search/")?
            .set_default("sort_by", "creation_time_descend")?
            .set_default("data_dir", data_dir.to_string_lossy().to_string())?
            .set_default("webdriver_url", "http://localhost:4444")?
            .set_default("geckodriver", "geckodriver")?
            .set_default("headless", false)?
            .set_default("page_load_timeout_ms", 30_000_i64)?
            .set_default("settle_ms", 5_000_i64)?
            .set_default("login_timeout_ms", 5 * 60 * 1000_i64)?
            .set_default("login_poll_ms", 1_000_i64)?
            .set_default("desktop_alerts", true)?;

        for (name, format) in CONFIG_FILES {
            builder = builder.add_source(
                config::File::from(config_dir.join(name))
                    .format(*format)
                    .required(false),
            );
        }
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(PROJECT_NAME.as_str()));

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects periods that must be non-zero.
    fn validate(&self) -> Result<(), config::ConfigError> {
        for (key, value) in [
            ("login_poll_ms", self.login_poll_ms),
            ("page_load_timeout_ms", self.page_load_timeout_ms),
        ] {
            if value == 0 {
                return Err(config::ConfigError::Message(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// The search results page for [`Config::query`].
    pub fn search_url(&self) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.base_url,
            &[("query", self.query.as_str()), ("sortBy", self.sort_by.as_str())],
        )
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("assets"))
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("profile"))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn login_poll(&self) -> Duration {
        Duration::from_millis(self.login_poll_ms)
    }
}

pub fn get_data_dir() -> PathBuf {
    if let Some(s) = DATA_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn get_config_dir() -> PathBuf {
    if let Some(s) = CONFIG_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "rottedfm", env!("CARGO_PKG_NAME"))
}
