use crate::errors::{MonitorError, Result};
use crate::page::MarketplacePage;
use derive_deref::{Deref, DerefMut};
use std::io::BufRead;
use std::thread;
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const PASSWORD_INPUT: &str = r#"input[type="password"]"#;
pub const EMAIL_INPUT: &str = r#"input[name="email"], input[type="email"]"#;
pub const ITEM_ANCHOR: &str = r#"a[href*="marketplace/item"]"#;

const MIN_POLL: Duration = Duration::from_millis(1);

/// What the login detector saw on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageProbe {
    pub password_inputs: usize,
    pub email_inputs: usize,
    pub item_anchors: usize,
}

impl PageProbe {
    /// A page is walled if it asks for credentials or shows no listings at all.
    pub fn is_login_wall(&self) -> bool {
        self.password_inputs > 0 || self.email_inputs > 0 || self.item_anchors == 0
    }
}

pub async fn probe<P: MarketplacePage>(page: &P) -> Result<PageProbe> {
    Ok(PageProbe {
        password_inputs: page.count(PASSWORD_INPUT).await?,
        email_inputs: page.count(EMAIL_INPUT).await?,
        item_anchors: page.count(ITEM_ANCHOR).await?,
    })
}

/// Why a manual-login wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoginSignal {
    /// The operator pressed ENTER.
    #[strum(to_string = "console input")]
    Console,
    /// The page navigated away from the login form.
    #[strum(to_string = "navigation")]
    Navigated,
    /// The page now shows listings and no login form.
    #[strum(to_string = "login form cleared")]
    WallCleared,
}

/// ENTER presses read from stdin.
#[derive(Debug, Deref, DerefMut)]
pub struct ConsoleSignals(mpsc::UnboundedReceiver<()>);

impl ConsoleSignals {
    /// Starts a reader thread forwarding each stdin line as a signal.
    ///
    /// The thread is detached: a blocked stdin read must not keep the
    /// runtime from shutting down.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = ConsoleTask { sender };
        if let Err(e) = thread::Builder::new()
            .name("console".to_string())
            .spawn(move || task.run(std::io::stdin().lock()))
        {
            warn!("could not start console reader, ENTER will be ignored: {}", e);
        }
        Self(receiver)
    }

    /// A signal source fed by the caller instead of stdin.
    pub fn channel() -> (mpsc::UnboundedSender<()>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self(receiver))
    }

    /// Discards presses made before the current wait began.
    fn drain(&mut self) {
        while self.try_recv().is_ok() {}
    }
}

struct ConsoleTask {
    sender: mpsc::UnboundedSender<()>,
}

impl ConsoleTask {
    fn run(self, input: impl BufRead) {
        for line in input.lines() {
            match line {
                Ok(_) => {
                    if self.sender.send(()).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("failed to read stdin: {}", e);
                    return;
                }
            }
        }
        debug!("stdin closed, console login signal unavailable");
    }
}

/// Blocks until the operator finishes logging in.
///
/// Wakes on the first of: a console signal, the page URL changing, or the
/// page no longer looking like a login wall (checked every `poll`). Fails with
/// [`MonitorError::LoginTimeout`] once `timeout` elapses. A zero `poll` is
/// treated as the shortest supported period.
pub async fn wait_for_manual_login<P: MarketplacePage>(
    page: &P,
    console: &mut ConsoleSignals,
    timeout: Duration,
    poll: Duration,
) -> Result<LoginSignal> {
    console.drain();
    let start_url = page.current_url().await.ok();

    let watch_page = async {
        let mut ticker = tokio::time::interval(poll.max(MIN_POLL));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match page.current_url().await {
                Ok(url) if start_url.as_ref().is_some_and(|start| *start != url) => {
                    info!("Page navigated to {}", url);
                    return LoginSignal::Navigated;
                }
                Ok(_) => {}
                Err(e) => debug!("could not read page url: {}", e),
            }
            match probe(page).await {
                Ok(probe) if !probe.is_login_wall() => return LoginSignal::WallCleared,
                Ok(_) => {}
                Err(e) => debug!("could not probe page: {}", e),
            }
        }
    };

    let wait = async {
        tokio::select! {
            Some(()) = console.recv() => LoginSignal::Console,
            signal = watch_page => signal,
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| MonitorError::LoginTimeout(timeout))
}

pub fn print_login_banner(timeout: Duration) {
    println!();
    println!("=== MANUAL LOGIN REQUIRED ===");
    println!("Please log in to the marketplace in the opened browser window.");
    println!("Do NOT close the browser window; it is closed automatically after the check.");
    println!(
        "Once you can see the marketplace, press ENTER here to continue (waiting up to {} minutes).",
        timeout.as_secs().div_ceil(60)
    );
    println!();
}
