use crate::config;
use color_eyre::Result;
use lazy_static::lazy_static;
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

lazy_static! {
    pub static ref LOG_ENV: String = format!("{}_LOG", config::PROJECT_NAME.clone());
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn env_filter() -> Result<EnvFilter> {
    let env_filter = EnvFilter::builder().with_default_directive(tracing::Level::INFO.into());
    let env_filter = env_filter
        .try_from_env()
        .or_else(|_| env_filter.with_env_var(LOG_ENV.clone()).from_env())?;
    Ok(env_filter)
}

/// Logs to `<data_dir>/mpwatch.log` and, more tersely, to stderr.
pub fn init(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join(LOG_FILE.clone());
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let file_subscriber = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter()?);
    let console_subscriber = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter()?);
    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(console_subscriber)
        .with(ErrorLayer::default())
        .try_init()?;
    Ok(())
}
