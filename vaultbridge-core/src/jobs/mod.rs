//! Encrypted deferred-write job queue.
//!
//! A read-only process records write intents here; a privileged process
//! later drains and applies them. The queue lives in one encrypted file that
//! is rewritten as a whole on every change.

mod creator;
pub mod crypto;
mod drain;
pub mod format;
mod lock;
mod paths;
mod store;
mod types;

pub use creator::{JobCreator, NewAttachment, PasskeyForm, PasskeyRegistration};
pub use crypto::{JobKey, KeyEncoding};
pub use drain::{drain, DrainReport, JobHandler, STALE_CLAIM_AFTER};
pub use format::JobFileHeader;
pub use lock::{QueueLock, QueueLockGuard};
pub use paths::JobPaths;
pub use store::JobQueueStore;
pub use types::{
    now_millis, AddPasskeyPayload, Job, JobAttachment, JobStatus, JobType, PasskeyCredential,
    RelyingParty, UpdatePasskeyPayload, UserEntity, DEFAULT_MAX_RETRIES,
};
