use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Config, DedupStore};

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// A guessed short identifier on the screenshot host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces candidates that the [`DedupStore`] has never seen.
///
/// Sampling retries without a cap: once most of the identifier space has
/// been tried, `next` can spin for a long time, and on a fully exhausted
/// space it never returns. That is accepted; a cap would change which
/// identifiers are reachable.
pub struct CandidateGenerator {
    prefix: char,
    suffix_length: usize,
    rng: StdRng,
    last_collisions: u64,
}

impl CandidateGenerator {
    pub fn new(config: &Config) -> Self {
        Self::with_rng(
            config.candidate_prefix,
            config.suffix_length,
            StdRng::from_entropy(),
        )
    }

    /// Deterministic generator, for reproducible runs and tests.
    pub fn seeded(config: &Config, seed: u64) -> Self {
        Self::with_rng(
            config.candidate_prefix,
            config.suffix_length,
            StdRng::seed_from_u64(seed),
        )
    }

    pub fn with_rng(prefix: char, suffix_length: usize, rng: StdRng) -> Self {
        Self {
            prefix,
            suffix_length,
            rng,
            last_collisions: 0,
        }
    }

    /// Draw the next untried candidate and record it before returning it.
    pub fn next(&mut self, store: &mut DedupStore) -> Candidate {
        let mut collisions = 0u64;
        loop {
            let candidate = self.sample();
            if store.contains(candidate.as_str()) {
                collisions += 1;
                debug!("Candidate {} already tried, resampling", candidate);
                continue;
            }
            if collisions > 0 {
                debug!("Found fresh candidate after {} collisions", collisions);
            }
            self.last_collisions = collisions;
            store.record(&candidate);
            return candidate;
        }
    }

    fn sample(&mut self) -> Candidate {
        let mut value = String::with_capacity(self.suffix_length + 1);
        value.push(self.prefix);
        for _ in 0..self.suffix_length {
            let index = self.rng.gen_range(0..ALPHABET.len());
            value.push(ALPHABET[index] as char);
        }
        Candidate(value)
    }

    /// How many already-tried values the last `next` call drew and discarded.
    pub fn last_collisions(&self) -> u64 {
        self.last_collisions
    }

    /// Number of distinct candidates this generator can produce.
    pub fn space_size(&self) -> u128 {
        (ALPHABET.len() as u128).saturating_pow(self.suffix_length as u32)
    }
}
