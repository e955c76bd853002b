//! Scoped headless browser sessions
//!
//! Every resolution launches its own Chromium and tears it down again, so a
//! crashed or wedged browser can never outlive the candidate it was serving.
//! [`BrowserSession::close`] is the orderly path; `Drop` covers cancellation.

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{create_browser_config, Config, ScoutError};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(config: &Config) -> Result<Self, ScoutError> {
        let profile_dir = std::env::temp_dir().join(format!(
            "screenshot-scout-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            ScoutError::BrowserLaunchFailed(format!("Failed to create profile dir: {e}"))
        })?;

        let browser_config = match create_browser_config(config, &profile_dir) {
            Ok(browser_config) => browser_config,
            Err(e) => {
                remove_profile(&profile_dir);
                return Err(e);
            }
        };

        let (browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile(&profile_dir);
                return Err(ScoutError::BrowserLaunchFailed(e.to_string()));
            }
        };

        // The CDP handler is a stream that must be polled for the browser to
        // make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
            debug!("Browser handler stream ended");
        });

        Ok(Self {
            browser: Some(browser),
            handler,
            profile_dir,
        })
    }

    pub async fn open(&self, url: &str) -> Result<Page, ScoutError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ScoutError::Page("browser already closed".to_string()))?;
        browser
            .new_page(url)
            .await
            .map_err(|e| ScoutError::Navigation(format!("{url}: {e}")))
    }

    /// Shut the browser down and wait for the process to exit.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            match timeout(CLOSE_TIMEOUT, browser.close()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Browser close failed: {}", e),
                Err(_) => warn!("Browser close timed out after {:?}", CLOSE_TIMEOUT),
            }
            if timeout(CLOSE_TIMEOUT, browser.wait()).await.is_err() {
                warn!("Browser did not exit, killing it");
                if let Some(Err(e)) = browser.kill().await {
                    warn!("Failed to kill browser: {}", e);
                }
            }
        }
        // Drop aborts the handler and removes the profile.
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let _ = browser.kill().await;
                    });
                }
                Err(_) => drop(browser),
            }
        }
        self.handler.abort();
        remove_profile(&self.profile_dir);
    }
}

fn remove_profile(profile_dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(profile_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(
                "Could not remove browser profile {}: {}",
                profile_dir.display(),
                e
            );
        }
    }
}
