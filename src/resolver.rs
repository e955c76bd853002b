//! Candidate page to image URL resolution
//!
//! [`BrowserResolver`] renders the candidate's page in a throwaway headless
//! browser and reads the `src` of the screenshot element. Every way of not
//! finding an image, including browser failures, comes back as `Ok(None)`;
//! only failures outside the browser work itself surface as errors.

use async_trait::async_trait;
use chromiumoxide::page::Page;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::{BrowserSession, Candidate, Config, Metrics, ScoutError};

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Absolute URL of the image behind `candidate`, if there is one.
    async fn resolve(&self, candidate: &Candidate) -> Result<Option<String>, ScoutError>;
}

pub struct BrowserResolver {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl BrowserResolver {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    async fn extract(&self, page_url: &str) -> Result<Option<String>, ScoutError> {
        let session = BrowserSession::launch(&self.config).await?;
        let result = self.extract_with(&session, page_url).await;
        session.close().await;
        result
    }

    async fn extract_with(
        &self,
        session: &BrowserSession,
        page_url: &str,
    ) -> Result<Option<String>, ScoutError> {
        let page = session.open(page_url).await?;
        let src = self.wait_for_image_src(&page).await;
        if let Err(e) = page.close().await {
            debug!("Closing page {} failed: {}", page_url, e);
        }

        let Some(src) = src? else {
            return Ok(None);
        };

        let Some(image_url) = normalize_image_url(&self.config.origin, &src) else {
            debug!("Unusable image source {:?} on {}", src, page_url);
            return Ok(None);
        };

        if is_placeholder(&image_url, &self.config.placeholder_markers) {
            debug!("Placeholder image on {}: {}", page_url, image_url);
            return Ok(None);
        }

        Ok(Some(image_url))
    }

    /// Poll for the image element until it shows up or the timeout passes.
    async fn wait_for_image_src(&self, page: &Page) -> Result<Option<String>, ScoutError> {
        let selector = self.config.image_selector.as_str();
        let wait = async {
            loop {
                if let Ok(element) = page.find_element(selector).await {
                    return element.attribute("src").await;
                }
                sleep(ELEMENT_POLL_INTERVAL).await;
            }
        };

        match timeout(self.config.resolve_timeout, wait).await {
            Ok(Ok(src)) => Ok(src.filter(|s| !s.trim().is_empty())),
            Ok(Err(e)) => Err(ScoutError::Page(e.to_string())),
            Err(_) => {
                debug!(
                    "{} did not appear within {:?}",
                    selector, self.config.resolve_timeout
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Resolver for BrowserResolver {
    async fn resolve(&self, candidate: &Candidate) -> Result<Option<String>, ScoutError> {
        let page_url = self.config.page_url(candidate.as_str());
        let start = Instant::now();

        let outcome = match self.extract(&page_url).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Resolving {} failed: {}", page_url, e);
                None
            }
        };

        self.metrics.record_resolution(start.elapsed(), outcome.is_some());
        match &outcome {
            Some(image_url) => info!("{} resolved to {}", candidate, image_url),
            None => info!("No image behind {}", candidate),
        }
        Ok(outcome)
    }
}

/// Turn an `src` attribute into an absolute URL.
///
/// Protocol-relative sources get `https:`, root-relative ones are joined to
/// `origin`, absolute http(s) URLs pass through. Anything else is rejected.
pub fn normalize_image_url(origin: &str, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }

    let absolute = if let Some(rest) = src.strip_prefix("//") {
        format!("https://{rest}")
    } else if src.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), src)
    } else {
        src.to_string()
    };

    match Url::parse(&absolute) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Some(url.to_string())
        }
        _ => None,
    }
}

pub fn is_placeholder(image_url: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| image_url.contains(marker.as_str()))
}
