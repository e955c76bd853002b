//! # Screenshot Scout
//!
//! Guesses short screenshot-host identifiers, renders each page in headless
//! Chrome, checks that the image it points at is live, and relays the hits to
//! every Matrix room the bot has joined.
//!
//! ## Pipeline
//!
//! ```text
//! generate -> resolve -> validate -> notify -> cooldown
//!    |           |           |                   ^
//!    |           +- nothing -+---- skip_delay ---+
//!    +-- any error or panic ------ failure_backoff
//! ```
//!
//! Every generated identifier is appended to the dedup log before it is
//! resolved, so a crash never causes an identifier to be tried twice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_scout::{CandidateGenerator, Config, DedupStore};
//!
//! let config = Config::default();
//! let mut store = DedupStore::open(&config.store_path);
//! let mut generator = CandidateGenerator::new(&config);
//! let candidate = generator.next(&mut store);
//! println!("{}", config.page_url(candidate.as_str()));
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshot-scout --config config.json run
//! screenshot-scout probe sabcde
//! screenshot-scout stats
//! ```

/// Configuration and browser launch settings
pub mod config;

/// Error types and severity classification
pub mod error;

/// Append-only log of every identifier ever tried
pub mod store;

/// Random identifier generation
pub mod generator;

/// Scoped headless browser sessions
pub mod browser;

/// Page rendering and image URL extraction
pub mod resolver;

/// Dedicated task that serialises resolutions
pub mod worker;

/// Image liveness checks
pub mod validator;

/// Announcement formatting and fan-out
pub mod notifier;

/// Matrix client-server session
pub mod matrix;

/// The probing loop
pub mod pipeline;

/// Command-line interface implementation
pub mod cli;

/// Counters and the Prometheus recorder
pub mod metrics;

/// Keep-alive HTTP endpoint
pub mod health;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use browser::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use generator::*;
pub use health::*;
pub use matrix::*;
pub use metrics::*;
pub use notifier::*;
pub use pipeline::*;
pub use resolver::*;
pub use store::*;
pub use utils::*;
pub use validator::*;
pub use worker::*;
