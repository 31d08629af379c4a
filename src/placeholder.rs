//! Placeholder generation.
//!
//! Two policies, picked once per deployment through `placeholderPolicy`:
//!
//! - [`PlaceholderPolicy::Deterministic`] hashes a kind-tagged real value, so
//!   the same input yields the same placeholder without any stored state.
//! - [`PlaceholderPolicy::Random`] draws uniformly and relies on the store to
//!   keep the result stable across sessions.
//!
//! Both retry until the candidate is outside the caller's used set.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ip::PLACEHOLDER_IP_PREFIX;

/// Domain under which every hostname placeholder lives.
pub const PLACEHOLDER_HOST_DOMAIN: &str = "example.test";

/// Upper bound on attempts before giving up on a single value.
const MAX_ATTEMPTS: u32 = 4096;

const HOST_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const HOST_TOKEN_LEN: usize = 8;

/// How placeholders are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderPolicy {
    #[default]
    Deterministic,
    Random,
}

/// Which namespace a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Ip,
    Hostname,
}

impl ValueKind {
    const fn tag(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Hostname => "host",
        }
    }
}

/// Produces placeholders under a fixed policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderGenerator {
    policy: PlaceholderPolicy,
}

impl PlaceholderGenerator {
    #[must_use]
    pub const fn new(policy: PlaceholderPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> PlaceholderPolicy {
        self.policy
    }

    /// Generate a placeholder for `real` that is not in `used`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlaceholderExhausted`] if no free candidate turns up
    /// within the attempt bound.
    pub fn generate(&self, kind: ValueKind, real: &str, used: &HashSet<String>) -> Result<String> {
        for attempt in 0..MAX_ATTEMPTS {
            let candidate = match self.policy {
                PlaceholderPolicy::Deterministic => deterministic(kind, real, attempt),
                PlaceholderPolicy::Random => random(kind),
            };
            if !used.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::PlaceholderExhausted {
            value: real.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

fn digest(kind: ValueKind, real: &str, attempt: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(kind.tag().as_bytes());
    hasher.update(b":");
    hasher.update(real.as_bytes());
    if attempt > 0 {
        hasher.update(format!("#{attempt}").as_bytes());
    }
    hasher.finalize().into()
}

/// Octet in [1, 254], avoiding network and broadcast values.
fn octet(byte: u8) -> u8 {
    byte % 254 + 1
}

fn format_ip(b: u8, c: u8, d: u8) -> String {
    format!("{PLACEHOLDER_IP_PREFIX}.{b}.{c}.{d}")
}

fn format_host(token: &str) -> String {
    format!("host-{token}.{PLACEHOLDER_HOST_DOMAIN}")
}

/// Deterministic placeholder for `real`, no collision check.
///
/// This is what the stateless IPv4 fallback uses.
#[must_use]
pub fn deterministic(kind: ValueKind, real: &str, attempt: u32) -> String {
    let hash = digest(kind, real, attempt);
    match kind {
        ValueKind::Ip => format_ip(octet(hash[0]), octet(hash[1]), octet(hash[2])),
        ValueKind::Hostname => {
            let token: String = hash[..HOST_TOKEN_LEN]
                .iter()
                .map(|b| char::from(HOST_ALPHABET[usize::from(*b) % HOST_ALPHABET.len()]))
                .collect();
            format_host(&token)
        }
    }
}

fn random(kind: ValueKind) -> String {
    let mut rng = rand::rng();
    match kind {
        ValueKind::Ip => format_ip(
            rng.random_range(1..=254),
            rng.random_range(1..=254),
            rng.random_range(1..=254),
        ),
        ValueKind::Hostname => {
            let token: String = (0..HOST_TOKEN_LEN)
                .map(|_| char::from(HOST_ALPHABET[rng.random_range(0..HOST_ALPHABET.len())]))
                .collect();
            format_host(&token)
        }
    }
}
