//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::init::LinearBackoff;
use crate::jobs::KeyEncoding;

/// Default wait for the engine to finish startup.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `source` tag stamped on every engine request.
pub const DEFAULT_SOURCE: &str = "vaultbridge";

/// How the initializer retries runs that fail with a lock error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockRetryPolicy {
    /// Retries after the first run.
    pub max_retries: usize,
    /// Delay unit; retry `n` waits `n * step_ms`.
    pub step_ms: u64,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            step_ms: 300,
        }
    }
}

impl LockRetryPolicy {
    /// Builds the backoff schedule for this policy.
    #[must_use]
    pub const fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(Duration::from_millis(self.step_ms), self.max_retries)
    }
}

/// Configuration for a session with the vault engine.
///
/// Every field has a default, so a config file only needs to carry what it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Directory the engine keeps its stores in. Also the job queue root.
    pub storage_path: PathBuf,
    /// Opens the engine's core store read-only.
    pub read_only: bool,
    /// Tag stamped into the `source` field of every request.
    pub source: String,
    /// Milliseconds to wait for engine startup.
    pub ready_timeout_ms: u64,
    /// Retry schedule for lock errors during initialization.
    pub lock_retry: LockRetryPolicy,
    /// How the master `hashedPassword` decodes into the job queue key.
    pub key_encoding: KeyEncoding,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::new(),
            read_only: true,
            source: DEFAULT_SOURCE.to_string(),
            ready_timeout_ms: u64::try_from(DEFAULT_READY_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            lock_retry: LockRetryPolicy::default(),
            key_encoding: KeyEncoding::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration rooted at `storage_path`.
    #[must_use]
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Parses a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Serialization`] if the document is not valid.
    pub fn from_json(json: &str) -> VaultResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the file cannot be read and
    /// [`VaultError::Serialization`] if it is not valid.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::io(format!("Failed to read config '{}'", path.display()), e)
        })?;
        Self::from_json(&raw)
    }
}
