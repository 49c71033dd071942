//! Content digests and expected-hash verification

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha2::{Digest, Sha224, Sha256};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha224,
    Sha256,
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha224" | "sha-224" => Ok(Self::Sha224),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(format!("unknown hash algorithm: {}", s)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha224 => write!(f, "sha224"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Running digest over transferred bytes
#[derive(Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha224(Sha224),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha224 => Self::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Md5(_) => HashAlgorithm::Md5,
            Self::Sha224(_) => HashAlgorithm::Sha224,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Lowercase hex digest; the hasher starts over afterwards
    pub fn finalize_reset(&mut self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize_reset()),
            Self::Sha224(h) => hex::encode(h.finalize_reset()),
            Self::Sha256(h) => hex::encode(h.finalize_reset()),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hasher").field(&self.algorithm()).finish()
    }
}

/// Tally of digests checked against the expected values
#[derive(Debug, Clone, Default)]
pub struct Verification {
    expected: Vec<String>,
    pub runs: u64,
    pub correct: u64,
    pub errors: u64,
}

impl Verification {
    pub fn new(expected: Vec<String>) -> Self {
        Self {
            expected,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.expected.is_empty()
    }

    /// Compare the digest of loop `index` with its expected value, cycling
    /// through the list. Returns `None` when nothing is expected.
    pub fn check(&mut self, index: u64, digest: &str) -> Option<bool> {
        if self.expected.is_empty() {
            return None;
        }

        let expected = &self.expected[(index % self.expected.len() as u64) as usize];
        self.runs += 1;
        let ok = expected.eq_ignore_ascii_case(digest);
        if ok {
            self.correct += 1;
            info!("Hash verification: correct ({})", digest);
        } else {
            self.errors += 1;
            error!(
                "Hash verification: ERROR expected {} got {}",
                expected, digest
            );
        }
        Some(ok)
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runs: {} correct: {} errors: {}",
            self.runs, self.correct, self.errors
        )
    }
}
