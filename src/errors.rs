use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Failures scoped to a single monitoring cycle.
///
/// None of these terminate the process: the monitor logs them, captures
/// diagnostics and waits for the next cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("page did not finish loading within {0:?}")]
    PageLoadTimeout(Duration),

    #[error("manual login was not completed within {0:?}")]
    LoginTimeout(Duration),

    #[error("failed to launch browser session: {0}")]
    Launch(String),

    #[error("webdriver command failed: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not hold a listing array: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MonitorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Installs the eyre report handler and a panic hook that logs before exiting.
pub fn init() -> color_eyre::Result<()> {
    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .panic_section(format!(
            "This is a bug. Consider reporting it to the {} maintainers.",
            env!("CARGO_PKG_NAME")
        ))
        .capture_span_trace_by_default(false)
        .display_location_section(false)
        .display_env_section(false)
        .into_hooks();
    eyre_hook.install()?;
    std::panic::set_hook(Box::new(move |panic_info| {
        #[cfg(not(debug_assertions))]
        {
            use human_panic::{Metadata, handle_dump, print_msg};
            let metadata = Metadata::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                .authors(env!("CARGO_PKG_AUTHORS").replace(':', ", "));
            let file_path = handle_dump(&metadata, panic_info);
            if let Err(e) = print_msg(file_path, &metadata) {
                eprintln!("failed to print panic message: {e}");
            }
            eprintln!("{}", panic_hook.panic_report(panic_info));
        }
        let msg = format!("{}", panic_hook.panic_report(panic_info));
        error!("Error: {}", strip_ansi_escapes::strip_str(msg));

        #[cfg(debug_assertions)]
        {
            better_panic::Settings::auto()
                .most_recent_first(false)
                .lineno_suffix(true)
                .verbosity(better_panic::Verbosity::Full)
                .create_panic_handler()(panic_info);
        }

        std::process::exit(libc::EXIT_FAILURE);
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failing_path() {
        let err = MonitorError::io(
            "/tmp/data/seen_items.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "could not access /tmp/data/seen_items.json: denied"
        );
    }

    #[test]
    fn test_timeouts_report_their_bound() {
        let err = MonitorError::LoginTimeout(Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "manual login was not completed within 300s"
        );
    }
}
