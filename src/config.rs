//! Configuration management with serde serialization/deserialization
//!
//! A single immutable [`Config`] is loaded at startup, wrapped in an `Arc` and
//! handed to every component at construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{validate_url, ScoutError};

/// Main configuration structure for the scout
///
/// The three credential fields match the `config.json` layout used by the
/// deployed bot; everything else has a working default.
///
/// # Examples
///
/// ```rust
/// use screenshot_scout::Config;
///
/// let config = Config {
///     homeserver_url: "https://matrix.example.org".to_string(),
///     user_id: "@scout:example.org".to_string(),
///     password: "hunter2".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.suffix_length, 5);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Matrix homeserver base URL
    pub homeserver_url: String,

    /// Fully-qualified Matrix user id used to log in
    pub user_id: String,

    /// Password for `user_id`
    pub password: String,

    /// Origin of the screenshot host (default: `https://prnt.sc`)
    ///
    /// Candidate pages live at `{origin}/{candidate}` and root-relative image
    /// sources are resolved against it.
    pub origin: String,

    /// Constant first character of every candidate (default: `s`)
    pub candidate_prefix: char,

    /// Number of random lowercase letters after the prefix (default: 5)
    pub suffix_length: usize,

    /// Append-only log of every candidate ever tried (default: `tried.txt`)
    pub store_path: PathBuf,

    /// CSS selector of the screenshot image element
    pub image_selector: String,

    /// Substrings identifying the host's "image removed" placeholder
    ///
    /// An extracted URL containing any of these is treated as no resource.
    pub placeholder_markers: Vec<String>,

    /// How long to wait for the image element to appear (default: 5 seconds)
    pub resolve_timeout: Duration,

    /// Timeout for the HEAD liveness check (default: 5 seconds)
    pub validate_timeout: Duration,

    /// Lower bound of the randomized pause after an announcement
    pub cooldown_min: Duration,

    /// Upper bound of the randomized pause after an announcement
    pub cooldown_max: Duration,

    /// Pause after a candidate that resolved to nothing (default: 1 second)
    pub skip_delay: Duration,

    /// Pause after an iteration failed unexpectedly (default: 30 seconds)
    pub failure_backoff: Duration,

    /// Long-poll timeout for chat sync requests (default: 30 seconds)
    pub sync_timeout: Duration,

    /// Address of the liveness endpoint (default: `0.0.0.0:8080`)
    pub health_bind: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for page loads
    pub user_agent: Option<String>,

    /// Browser window width in pixels
    pub window_width: u32,

    /// Browser window height in pixels
    pub window_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            homeserver_url: String::new(),
            user_id: String::new(),
            password: String::new(),
            origin: "https://prnt.sc".to_string(),
            candidate_prefix: 's',
            suffix_length: 5,
            store_path: PathBuf::from("tried.txt"),
            image_selector: "#screenshot-image".to_string(),
            placeholder_markers: vec![
                "st.prntscr.com".to_string(),
                "0_173a7b_211be8ff".to_string(),
            ],
            resolve_timeout: Duration::from_secs(5),
            validate_timeout: Duration::from_secs(5),
            cooldown_min: Duration::from_secs(3),
            cooldown_max: Duration::from_secs(7),
            skip_delay: Duration::from_secs(1),
            failure_backoff: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(30),
            health_bind: "0.0.0.0:8080".to_string(),
            chrome_path: None,
            user_agent: None,
            window_width: 1280,
            window_height: 900,
        }
    }
}

impl Config {
    /// Read a JSON config file. Missing optional fields take their defaults.
    pub async fn load(path: &Path) -> Result<Self, ScoutError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ScoutError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// The page URL probed for `candidate`.
    pub fn page_url(&self, candidate: &str) -> String {
        format!("{}/{}", self.origin.trim_end_matches('/'), candidate)
    }

    pub fn has_credentials(&self) -> bool {
        !self.homeserver_url.is_empty() && !self.user_id.is_empty() && !self.password.is_empty()
    }
}

/// Check the settings that would otherwise fail deep inside the pipeline.
///
/// Credentials are only required when `require_credentials` is set, so the
/// one-shot commands work without a chat account.
pub fn validate_config(config: &Config, require_credentials: bool) -> Result<(), ScoutError> {
    if validate_url(&config.origin).is_err() {
        return Err(ScoutError::Configuration(format!(
            "origin must be an http(s) URL, got {:?}",
            config.origin
        )));
    }

    if config.suffix_length == 0 {
        return Err(ScoutError::Configuration(
            "suffix length must be greater than 0".to_string(),
        ));
    }

    if !config.candidate_prefix.is_ascii_alphanumeric() {
        return Err(ScoutError::Configuration(format!(
            "candidate prefix must be ASCII alphanumeric, got {:?}",
            config.candidate_prefix
        )));
    }

    if config.image_selector.trim().is_empty() {
        return Err(ScoutError::Configuration(
            "image selector must not be empty".to_string(),
        ));
    }

    if config.resolve_timeout.is_zero() || config.validate_timeout.is_zero() {
        return Err(ScoutError::Configuration(
            "timeouts must be greater than 0".to_string(),
        ));
    }

    if config.cooldown_min > config.cooldown_max {
        return Err(ScoutError::Configuration(
            "cooldown_min must not exceed cooldown_max".to_string(),
        ));
    }

    if config.window_width == 0 || config.window_height == 0 {
        return Err(ScoutError::Configuration(
            "window dimensions must be greater than 0".to_string(),
        ));
    }

    if require_credentials {
        if !config.has_credentials() {
            return Err(ScoutError::Configuration(
                "homeserver_url, user_id and password are required".to_string(),
            ));
        }
        if validate_url(&config.homeserver_url).is_err() {
            return Err(ScoutError::Configuration(format!(
                "homeserver_url must be an http(s) URL, got {:?}",
                config.homeserver_url
            )));
        }
    }

    Ok(())
}

/// Generate Chrome command-line arguments for one headless session
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--disable-plugins".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        format!("--window-size={},{}", config.window_width, config.window_height),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

/// Browser config for one session whose profile lives in `profile_dir`.
pub fn create_browser_config(
    config: &Config,
    profile_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, ScoutError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.window_width, config.window_height)
        .user_data_dir(profile_dir)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScoutError::BrowserLaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() -> Config {
        Config {
            homeserver_url: "https://matrix.example.org".to_string(),
            user_id: "@scout:example.org".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.origin, "https://prnt.sc");
        assert_eq!(config.candidate_prefix, 's');
        assert_eq!(config.suffix_length, 5);
        assert_eq!(config.resolve_timeout, Duration::from_secs(5));
        assert_eq!(config.validate_timeout, Duration::from_secs(5));
        assert_eq!(config.failure_backoff, Duration::from_secs(30));
        assert_eq!(config.skip_delay, Duration::from_secs(1));
        assert!(config.cooldown_min <= config.cooldown_max);
    }

    #[test]
    fn test_page_url() {
        let mut config = Config::default();
        assert_eq!(config.page_url("sabcde"), "https://prnt.sc/sabcde");
        config.origin = "https://img.example/".to_string();
        assert_eq!(config.page_url("sabcde"), "https://img.example/sabcde");
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{
            "homeserver_url": "https://matrix.example.org",
            "user_id": "@scout:example.org",
            "password": "secret"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.has_credentials());
        assert_eq!(config.store_path, PathBuf::from("tried.txt"));
        assert_eq!(config.image_selector, "#screenshot-image");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"suffix_length": 6, "candidate_prefix": "x"}"#).unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.suffix_length, 6);
        assert_eq!(config.candidate_prefix, 'x');
        assert!(!config.has_credentials());

        let missing = Config::load(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ScoutError::Configuration(_))));
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&with_credentials(), true).is_ok());
        assert!(validate_config(&Config::default(), false).is_ok());
        assert!(validate_config(&Config::default(), true).is_err());

        let bad_origin = Config {
            origin: "ftp://prnt.sc".to_string(),
            ..with_credentials()
        };
        assert!(validate_config(&bad_origin, true).is_err());

        let bad_cooldown = Config {
            cooldown_min: Duration::from_secs(10),
            cooldown_max: Duration::from_secs(2),
            ..with_credentials()
        };
        assert!(validate_config(&bad_cooldown, true).is_err());

        let zero_suffix = Config {
            suffix_length: 0,
            ..with_credentials()
        };
        assert!(validate_config(&zero_suffix, true).is_err());
    }

    #[test]
    fn test_browser_config_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            chrome_path: Some("/usr/bin/chromium".to_string()),
            ..Default::default()
        };
        assert!(create_browser_config(&config, dir.path()).is_ok());
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config {
            user_agent: Some("scout/1.0".to_string()),
            ..Default::default()
        };
        let args = get_chrome_args(&config);

        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--window-size=1280,900".to_string()));
        assert!(args.contains(&"--user-agent=scout/1.0".to_string()));
    }
}
