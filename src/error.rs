use std::time::Duration;
use thiserror::Error;

use crate::{Candidate, Stage};

#[derive(Debug, Clone, Error)]
pub enum ScoutError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Chat protocol error: {0}")]
    Protocol(String),

    #[error("Delivery to {room} failed: {reason}")]
    Delivery { room: String, reason: String },

    #[error("Resolver worker unavailable")]
    WorkerUnavailable,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ScoutError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScoutError::Timeout(_) => ErrorSeverity::Low,
            ScoutError::Delivery { .. } => ErrorSeverity::Low,
            ScoutError::Configuration(_) => ErrorSeverity::High,
            ScoutError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            ScoutError::WorkerUnavailable => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

/// An error that escaped one pipeline iteration, tagged with where it happened.
#[derive(Debug, Clone, Error)]
#[error("{stage:?} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    pub candidate: Option<Candidate>,
    pub error: ScoutError,
}

impl StageFailure {
    pub fn new(stage: Stage, candidate: Option<Candidate>, error: ScoutError) -> Self {
        Self {
            stage,
            candidate,
            error,
        }
    }
}

impl From<std::io::Error> for ScoutError {
    fn from(err: std::io::Error) -> Self {
        ScoutError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScoutError {
    fn from(err: serde_json::Error) -> Self {
        ScoutError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ScoutError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScoutError::Network(format!("timed out: {err}"))
        } else {
            ScoutError::Network(err.to_string())
        }
    }
}

impl From<chromiumoxide::error::CdpError> for ScoutError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScoutError::Page(err.to_string())
    }
}
