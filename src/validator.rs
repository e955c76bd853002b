use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{Config, ScoutError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    /// Whether `url` answers with a success status right now.
    async fn validate(&self, url: &str) -> bool;
}

/// Liveness check with a HEAD request.
///
/// The resolver can pick up the URL of an image the host has already
/// removed; this is what keeps those from being announced.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    client: Client,
}

impl HttpValidator {
    pub fn new(config: Arc<Config>) -> Result<Self, ScoutError> {
        Self::with_timeout(config.validate_timeout, config.user_agent.as_deref())
    }

    pub fn with_timeout(timeout: Duration, user_agent: Option<&str>) -> Result<Self, ScoutError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("{} is live ({})", url, response.status());
                true
            }
            Ok(response) => {
                info!("{} is not live: {}", url, response.status());
                false
            }
            Err(e) => {
                warn!("Liveness check for {} failed: {}", url, e);
                false
            }
        }
    }
}
