//! Durable memory of every candidate ever tried
//!
//! The in-memory set is the working copy; the append-only log next to it is
//! what survives a restart. A candidate is appended to the log before the
//! caller ever sees it.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::Candidate;

#[derive(Debug)]
pub struct DedupStore {
    path: Option<PathBuf>,
    seen: HashSet<String>,
}

impl DedupStore {
    /// Load the log at `path` into memory. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seen = load(&path);
        info!(
            "Dedup store {} loaded with {} tried candidates",
            path.display(),
            seen.len()
        );
        Self {
            path: Some(path),
            seen,
        }
    }

    /// A store with no backing file, for one-shot commands and tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.seen.contains(candidate)
    }

    /// Remember `candidate` for good.
    ///
    /// The log append happens first. If it fails the error is logged and the
    /// in-memory record still stands for the rest of this process.
    pub fn record(&mut self, candidate: &Candidate) {
        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, candidate.as_str()) {
                error!(
                    "Failed to append {} to {}: {}",
                    candidate,
                    path.display(),
                    e
                );
            }
        }
        self.seen.insert(candidate.as_str().to_string());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Read a candidate log, one identifier per line.
///
/// A missing file is an empty set. Read errors are logged and whatever was
/// read up to that point is kept.
pub fn load(path: &Path) -> HashSet<String> {
    let mut seen = HashSet::new();

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No dedup log at {}, starting empty", path.display());
            return seen;
        }
        Err(e) => {
            warn!("Could not open dedup log {}: {}", path.display(), e);
            return seen;
        }
    };

    for (index, line) in BufReader::new(file).lines().enumerate() {
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    seen.insert(trimmed.to_string());
                }
            }
            Err(e) => {
                warn!(
                    "Stopped reading {} at line {}: {}",
                    path.display(),
                    index + 1,
                    e
                );
                break;
            }
        }
    }

    seen
}

fn append_line(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    // One write call per record keeps concurrent appenders from interleaving.
    file.write_all(format!("{value}\n").as_bytes())?;
    file.flush()
}
