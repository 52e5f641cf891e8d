//! Handle - opaque, stable identity for every primary record
//!
//! A handle is unique within its object type and never changes over the
//! lifetime of the record. Generated handles are 24 hex characters derived
//! from a BLAKE3 hash of the current time, the process id and a counter.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

const MAX_HANDLE_LEN: usize = 100;
const GENERATED_LEN: usize = 24;

static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of a primary record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Wrap a string as a handle without validation
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Parse a handle supplied from outside (CLI, import files)
    ///
    /// Handles must be non-empty, at most 100 characters, and free of
    /// whitespace and control characters.
    pub fn parse(handle: &str) -> Result<Self> {
        if handle.is_empty() {
            return Err(Error::InvalidHandle("handle must not be empty".to_string()));
        }
        if handle.len() > MAX_HANDLE_LEN {
            return Err(Error::InvalidHandle(format!(
                "handle longer than {} characters",
                MAX_HANDLE_LEN
            )));
        }
        if handle.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidHandle(format!("{:?} contains whitespace", handle)));
        }
        Ok(Self(handle.to_string()))
    }

    /// Generate a fresh handle
    pub fn generate() -> Self {
        let counter = HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&counter.to_le_bytes());
        let hex = hasher.finalize().to_hex();

        Self(hex.as_str()[..GENERATED_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
