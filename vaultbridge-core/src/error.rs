use thiserror::Error;

/// Result type for vault session and job queue operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Error outputs from `VaultBridge`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum VaultError {
    /// The engine has not finished its startup sequence.
    #[error("not_initialized")]
    NotInitialized,
    /// The transport to the engine is absent or has been torn down.
    #[error("transport_unavailable")]
    TransportUnavailable,
    /// The engine replied with an error that is not a lock condition.
    #[error("engine_error: {0}")]
    EngineError(String),
    /// The storage engine is held by another process.
    #[error("vault_locked")]
    VaultLocked,
    /// The engine did not become ready in time.
    #[error("timeout")]
    Timeout,
    /// Engine startup reported a failure.
    #[error("initialization_failed: {0}")]
    InitializationFailed(String),
    /// Key material is not exactly 32 bytes or could not be decoded.
    #[error("invalid_key: {0}")]
    InvalidKey(String),
    /// The presented input is not valid for the requested operation.
    #[error("invalid_input: {0}")]
    InvalidInput(String),
    /// The authentication tag did not verify.
    ///
    /// This covers a wrong key, corrupted ciphertext and truncated input alike.
    #[error("authentication_failed")]
    AuthenticationFailed,
    /// The job file is structurally invalid.
    #[error("corrupt_file: {0}")]
    CorruptFile(String),
    /// Unexpected error serializing information.
    #[error("serialization_error: {0}")]
    Serialization(String),
    /// Reading from or writing to the engine channel failed.
    #[error("channel_error: {0}")]
    Channel(#[source] std::io::Error),
    /// Filesystem failure while persisting or reading queue artifacts.
    #[error("io_failure: {context}")]
    IoFailure {
        /// What the store was doing when the failure happened.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl VaultError {
    /// Wraps an I/O error with a short description of the failed step.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoFailure {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for the one error kind the initializer retries on.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::VaultLocked)
    }

    /// Returns `true` when the engine never finished starting up.
    #[must_use]
    pub fn is_initialization_failure(&self) -> bool {
        match self {
            Self::InitializationFailed(_) | Self::NotInitialized => true,
            Self::EngineError(message) => is_initialization_message(message),
            _ => false,
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(source: std::io::Error) -> Self {
        Self::io("unexpected i/o", source)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Substrings the storage engine uses when another process holds its lock.
const LOCK_PATTERNS: [&str; 6] = [
    "elocked",
    "lock hold by current process",
    "file descriptor could not be locked",
    "no record locks available",
    "database is locked",
    "cannot acquire lock",
];

/// Returns `true` when an engine message describes a lock held elsewhere.
///
/// Matching is case-insensitive so every layer agrees on what counts as a
/// lock error.
#[must_use]
pub fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    LOCK_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Returns `true` when an engine message reports a failed startup.
#[must_use]
pub fn is_initialization_message(message: &str) -> bool {
    message.to_lowercase().contains("initialization")
}

/// Maps a raw engine error message onto the error taxonomy.
#[must_use]
pub fn classify_engine_error(message: impl Into<String>) -> VaultError {
    let message = message.into();
    if is_lock_message(&message) {
        VaultError::VaultLocked
    } else {
        VaultError::EngineError(message)
    }
}
