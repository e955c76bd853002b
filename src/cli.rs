use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::{
    install_prometheus, serve_health, validate_config, BrowserResolver, Candidate,
    CandidateGenerator, ChatTransport, Config, DedupStore, HealthState, HttpValidator,
    MatrixSession, Metrics, Notifier, Pipeline, Resolver, ResolverWorker, ScoutError, Validator,
};

const WORKER_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "screenshot-scout")]
#[command(about = "Probes a screenshot host for public images and relays them to chat rooms")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, default_value = "config.json", help = "Configuration file path")]
    pub config: PathBuf,

    #[arg(long, help = "Dedup log path (overrides store_path)")]
    pub store: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Health endpoint bind address")]
    pub health_bind: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the probing service until interrupted
    Run,

    /// Resolve and validate a single identifier without recording it
    Probe {
        #[arg(help = "Identifier to probe, e.g. sabcde")]
        candidate: String,
    },

    /// Validate the configuration file
    CheckConfig,

    /// Show how many identifiers have been tried
    Stats,
}

impl Cli {
    /// Load the config file and apply command-line overrides.
    ///
    /// A missing file is only fatal for `run`; the other commands fall back
    /// to defaults.
    pub async fn load_config(&self) -> Result<Config, ScoutError> {
        let mut config = match Config::load(&self.config).await {
            Ok(config) => config,
            Err(e) if !matches!(self.command, Commands::Run) => {
                warn!("{}; using defaults", e);
                Config::default()
            }
            Err(e) => return Err(e),
        };

        if let Some(store) = &self.store {
            config.store_path = store.clone();
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(health_bind) = &self.health_bind {
            config.health_bind = health_bind.clone();
        }

        validate_config(&config, matches!(self.command, Commands::Run))?;
        Ok(config)
    }
}

pub struct CliRunner {
    pub config: Arc<Config>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(
        &self,
        command: Commands,
        shutdown: broadcast::Sender<()>,
    ) -> Result<(), ScoutError> {
        match command {
            Commands::Run => self.run_service(shutdown).await,
            Commands::Probe { candidate } => self.probe(Candidate::new(candidate)).await,
            Commands::CheckConfig => {
                self.show_config();
                Ok(())
            }
            Commands::Stats => {
                self.show_stats();
                Ok(())
            }
        }
    }

    pub async fn run_service(&self, shutdown: broadcast::Sender<()>) -> Result<(), ScoutError> {
        // Subscribe everything up front; a signal sent before a receiver
        // exists is lost.
        let mut startup_shutdown = shutdown.subscribe();
        let health_shutdown = shutdown.subscribe();
        let sync_shutdown = shutdown.subscribe();
        let pipeline_shutdown = shutdown.subscribe();

        let prometheus = match install_prometheus() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        };
        let metrics = Arc::new(Metrics::new());

        let health_bind = self.config.health_bind.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_health(&health_bind, HealthState::new(prometheus), health_shutdown).await {
                error!("Health endpoint stopped: {}", e);
            }
        });

        let session = Arc::new(MatrixSession::new(self.config.clone())?);
        if !session.connect(&mut startup_shutdown).await? {
            if session.is_logged_in() {
                session.logout().await;
            }
            return Ok(());
        }
        tokio::spawn(session.clone().run_sync_loop(sync_shutdown));

        let browser = Arc::new(BrowserResolver::new(self.config.clone(), metrics.clone()));
        let mut worker = ResolverWorker::spawn(browser);

        let transport: Arc<dyn ChatTransport> = session.clone();
        let pipeline = Pipeline::new(
            self.config.clone(),
            DedupStore::open(&self.config.store_path),
            CandidateGenerator::new(&self.config),
            Arc::new(worker.handle()),
            Arc::new(HttpValidator::new(self.config.clone())?),
            Notifier::new(transport, metrics.clone()),
            metrics,
        );

        pipeline.run(pipeline_shutdown).await;

        worker.shutdown(WORKER_GRACE).await;
        session.logout().await;
        Ok(())
    }

    pub async fn probe(&self, candidate: Candidate) -> Result<(), ScoutError> {
        let metrics = Arc::new(Metrics::new());
        let resolver = BrowserResolver::new(self.config.clone(), metrics);
        let validator = HttpValidator::new(self.config.clone())?;

        println!("Probing {}", self.config.page_url(candidate.as_str()));
        match resolver.resolve(&candidate).await? {
            Some(url) => {
                let live = validator.validate(&url).await;
                println!("  Image: {url}");
                println!("  Live: {}", if live { "yes" } else { "no" });
            }
            None => println!("  No image found"),
        }
        Ok(())
    }

    pub fn show_config(&self) {
        let config = &self.config;
        println!("Configuration is valid:");
        println!("  Origin: {}", config.origin);
        println!(
            "  Candidates: '{}' + {} letters",
            config.candidate_prefix, config.suffix_length
        );
        println!("  Store: {}", config.store_path.display());
        println!("  Selector: {}", config.image_selector);
        println!(
            "  Cooldown: {:?}..={:?}, skip {:?}, back-off {:?}",
            config.cooldown_min, config.cooldown_max, config.skip_delay, config.failure_backoff
        );
        println!(
            "  Chat: {}",
            if config.has_credentials() {
                format!("{} on {}", config.user_id, config.homeserver_url)
            } else {
                "not configured".to_string()
            }
        );
    }

    pub fn show_stats(&self) {
        let store = DedupStore::open(&self.config.store_path);
        let space = CandidateGenerator::new(&self.config).space_size();
        let coverage = if space > 0 {
            store.len() as f64 / space as f64 * 100.0
        } else {
            0.0
        };
        println!("Tried identifiers: {}", store.len());
        println!("Identifier space: {space}");
        println!("Coverage: {coverage:.4}%");

        let modified = std::fs::metadata(&self.config.store_path).and_then(|m| m.modified());
        if let Ok(modified) = modified {
            let modified: DateTime<Local> = modified.into();
            println!("Last recorded: {}", modified.format("%Y-%m-%d %H:%M:%S"));
        }
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "screenshot-scout",
            "--config",
            "bot.json",
            "--store",
            "seen.txt",
            "--verbose",
            "run",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("bot.json"));
        assert_eq!(cli.store, Some(PathBuf::from("seen.txt")));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn test_parse_probe() {
        let cli = Cli::try_parse_from(["screenshot-scout", "probe", "sabcde"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        match cli.command {
            Commands::Probe { candidate } => assert_eq!(candidate, "sabcde"),
            _ => panic!("expected probe"),
        }
    }

    #[tokio::test]
    async fn test_missing_config_only_fatal_for_run() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let missing = missing.to_str().unwrap();

        let stats = Cli::try_parse_from(["screenshot-scout", "--config", missing, "stats"]).unwrap();
        assert!(stats.load_config().await.is_ok());

        let run = Cli::try_parse_from(["screenshot-scout", "--config", missing, "run"]).unwrap();
        assert!(run.load_config().await.is_err());
    }

    #[tokio::test]
    async fn test_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"homeserver_url": "https://matrix.example.org", "user_id": "@s:example.org", "password": "p"}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "screenshot-scout",
            "--config",
            path.to_str().unwrap(),
            "--store",
            "other.txt",
            "--health-bind",
            "127.0.0.1:9000",
            "run",
        ])
        .unwrap();
        let config = cli.load_config().await.unwrap();
        assert_eq!(config.store_path, PathBuf::from("other.txt"));
        assert_eq!(config.health_bind, "127.0.0.1:9000");
    }
}
