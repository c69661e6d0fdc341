//! Engine startup and application state derivation.
//!
//! [`InitializationCoordinator::initialize`] waits for the engine, asks it
//! for the master vault, active vault and encryption state, and folds the
//! answers into a [`VaultInitState`]. A run that hits a lock held by another
//! process is repeated as a whole with linear backoff.

mod backoff;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::Retryable;
use strum::Display;

use crate::config::{ClientConfig, LockRetryPolicy};
use crate::error::{VaultError, VaultResult};
use crate::session::{
    EncryptionInit, MasterPasswordEncryption, SessionClient, Transport, VaultStatus,
    MASTER_PASSWORD_KEY,
};

pub use backoff::{LinearBackoff, LinearBackoffIter};

/// What the application may show after startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct VaultInitState {
    /// A master password exists.
    pub has_password_set: bool,
    /// The master vault is open.
    pub is_logged_in: bool,
    /// An active vault is open as well.
    pub is_vault_open: bool,
}

/// Terminal classification of a failed initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum InitErrorKind {
    /// The engine did not become ready in time.
    Timeout,
    /// The lock stayed held through every retry.
    VaultLocked,
    /// Engine startup failed.
    InitializationFailed,
    /// Any other client or engine failure.
    VaultClientError,
}

impl InitErrorKind {
    /// Maps an error onto its terminal classification.
    #[must_use]
    pub fn classify(error: &VaultError) -> Self {
        match error {
            VaultError::Timeout => Self::Timeout,
            VaultError::VaultLocked => Self::VaultLocked,
            e if e.is_initialization_failure() => Self::InitializationFailed,
            _ => Self::VaultClientError,
        }
    }
}

/// Initialization gave up.
#[derive(Debug, thiserror::Error)]
#[error("initialization failed ({kind}) after {attempts} attempt(s): {source}")]
pub struct InitFailure {
    /// Terminal classification.
    pub kind: InitErrorKind,
    /// Error from the last attempt.
    #[source]
    pub source: VaultError,
    /// Runs attempted, the first included.
    pub attempts: usize,
    /// Best-effort answer to "is a password configured", `false` when even
    /// that could not be determined.
    pub password_set: bool,
}

/// Drives startup over a [`SessionClient`].
///
/// Holds no state between calls. Callers must not start a second
/// [`Self::initialize`] while one is outstanding.
#[derive(Debug)]
pub struct InitializationCoordinator<'a, T: Transport> {
    client: &'a SessionClient<T>,
    ready_timeout: Duration,
    retry: LockRetryPolicy,
}

impl<'a, T: Transport> InitializationCoordinator<'a, T> {
    /// Coordinator using the timeout and retry policy from `config`.
    #[must_use]
    pub const fn new(client: &'a SessionClient<T>, config: &ClientConfig) -> Self {
        Self {
            client,
            ready_timeout: config.ready_timeout(),
            retry: config.lock_retry,
        }
    }

    /// Waits for the engine and derives the application state.
    ///
    /// # Errors
    ///
    /// Returns an [`InitFailure`] once retries are exhausted or a non-lock
    /// error occurs.
    pub async fn initialize(&self) -> Result<VaultInitState, InitFailure> {
        let attempts = AtomicUsize::new(0);

        let outcome = (|| async {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.run_once().await
        })
        .retry(self.retry.backoff())
        .when(VaultError::is_locked)
        .notify(|err: &VaultError, delay: Duration| {
            tracing::warn!(?delay, "vault is locked by another process, retrying: {err}");
        })
        .await;

        match outcome {
            Ok(state) => {
                tracing::info!(
                    has_password_set = state.has_password_set,
                    is_logged_in = state.is_logged_in,
                    is_vault_open = state.is_vault_open,
                    "vault initialized"
                );
                Ok(state)
            }
            Err(source) => {
                let kind = InitErrorKind::classify(&source);
                let password_set = self.check_password_set().await;
                let attempts = attempts.load(Ordering::Relaxed);
                tracing::error!(%kind, attempts, password_set, "vault initialization failed: {source}");
                Err(InitFailure {
                    kind,
                    source,
                    attempts,
                    password_set,
                })
            }
        }
    }

    async fn run_once(&self) -> VaultResult<VaultInitState> {
        tokio::time::timeout(self.ready_timeout, self.client.wait_until_ready())
            .await
            .map_err(|_| VaultError::Timeout)??;

        let vaults = self.client.vaults_get_status().await?;
        let is_logged_in = vaults.is_open();
        let is_vault_open = if is_logged_in {
            self.client.active_vault_get_status().await?.is_open()
        } else {
            false
        };
        let encryption = self.resolve_master_encryption(&vaults).await?;

        Ok(VaultInitState {
            has_password_set: encryption.is_some(),
            is_logged_in,
            is_vault_open,
        })
    }

    /// Finds the wrapped master secret.
    ///
    /// Reads the master vault when it is open, then falls back to the
    /// encryption store. Lock errors always propagate.
    async fn resolve_master_encryption(
        &self,
        vaults: &VaultStatus,
    ) -> VaultResult<Option<MasterPasswordEncryption>> {
        if vaults.is_open() {
            if let Some(found) = self.client.master_encryption().await? {
                return Ok(Some(found));
            }
        }

        match self.encryption_store_record().await {
            Ok(found) => Ok(found),
            Err(e) if e.is_locked() => Err(e),
            Err(e) => {
                tracing::debug!("encryption store unavailable: {e}");
                Ok(None)
            }
        }
    }

    async fn encryption_store_record(&self) -> VaultResult<Option<MasterPasswordEncryption>> {
        let status = self.client.encryption_get_status().await?;
        if !status.status && self.client.encryption_init().await? == EncryptionInit::SharedInstance
        {
            return Err(VaultError::VaultLocked);
        }
        let record = self.client.encryption_get(MASTER_PASSWORD_KEY).await?;
        Ok(MasterPasswordEncryption::from_response(&record))
    }

    async fn check_password_set(&self) -> bool {
        let found = async {
            let vaults = self.client.vaults_get_status().await?;
            self.resolve_master_encryption(&vaults).await
        }
        .await;
        matches!(found, Ok(Some(_)))
    }
}
