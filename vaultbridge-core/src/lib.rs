//! `vaultbridge-core` lets a read-only or sandboxed process work with a vault
//! engine it cannot write to directly.
//!
//! It has two halves:
//!
//! - [`session`]: the request/reply protocol to the engine process, with
//!   one-at-a-time execution, uniform error classification and a
//!   lock-aware startup coordinator in [`init`].
//! - [`jobs`]: an encrypted, file-backed queue of deferred writes that a
//!   privileged process drains later.
//!
//! The queue key is the master `hashedPassword`, fetched through the session
//! once the vault is unlocked:
//!
//! ```rust,ignore
//! let client = SessionClient::new(transport, &config);
//! client.bootstrap().await?;
//! let state = InitializationCoordinator::new(&client, &config).initialize().await?;
//! if state.is_logged_in {
//!     let key = client.job_queue_key(config.key_encoding).await?;
//!     let store = JobQueueStore::new(JobPaths::under_root(&config.storage_path));
//!     JobCreator::new(store).create_add_passkey_job(&key, registration, form)?;
//! }
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod error;
pub use error::*;

pub mod config;
pub use config::{ClientConfig, LockRetryPolicy};

pub mod init;
pub use init::{InitErrorKind, InitFailure, InitializationCoordinator, VaultInitState};

pub mod jobs;
pub use jobs::{JobCreator, JobKey, JobPaths, JobQueueStore, KeyEncoding};

pub mod logger;

pub mod session;
pub use session::{Command, Response, SessionClient, Transport};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("vaultbridge_core");
