//! Producer side: turns a finished passkey registration into a queued job.

use uuid::Uuid;

use crate::error::VaultResult;

use super::crypto::JobKey;
use super::store::JobQueueStore;
use super::types::{
    now_millis, AddPasskeyPayload, Job, JobAttachment, JobType, PasskeyCredential, RelyingParty,
    UpdatePasskeyPayload, UserEntity,
};

/// A passkey registration that completed in the read-only process.
#[derive(Debug, Clone)]
pub struct PasskeyRegistration {
    /// Vault the credential should land in.
    pub vault_id: String,
    /// Relying party the credential is for.
    pub relying_party: RelyingParty,
    /// Account at the relying party.
    pub user: UserEntity,
    /// The credential itself.
    pub credential: PasskeyCredential,
}

/// A file the user attached in the save form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Original file name.
    pub name: String,
    /// Raw contents.
    pub data: Vec<u8>,
}

/// Optional record fields from the save form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasskeyForm {
    /// Record title.
    pub title: Option<String>,
    /// Free-form note.
    pub note: Option<String>,
    /// Target folder.
    pub folder: Option<String>,
    /// Sites the record applies to.
    pub websites: Vec<String>,
    /// Files to store with the record.
    pub attachments: Vec<NewAttachment>,
}

/// Builds jobs and appends them to a [`JobQueueStore`].
#[derive(Debug, Clone)]
pub struct JobCreator {
    store: JobQueueStore,
}

impl JobCreator {
    /// Creator writing to `store`.
    #[must_use]
    pub const fn new(store: JobQueueStore) -> Self {
        Self { store }
    }

    /// Queues a new record holding the passkey and returns the job id.
    ///
    /// The queue lock is held from the first attachment write until the job
    /// is appended, so a drain that empties the queue cannot remove the new
    /// blobs before the job that references them lands.
    ///
    /// # Errors
    ///
    /// Propagates store and crypto errors; nothing is appended on failure.
    pub fn create_add_passkey_job(
        &self,
        key: &JobKey,
        registration: PasskeyRegistration,
        form: PasskeyForm,
    ) -> VaultResult<String> {
        let lock = self.store.lock()?;
        let _guard = lock.lock()?;

        let attachments = form
            .attachments
            .iter()
            .map(|attachment| self.store_attachment(attachment))
            .collect::<VaultResult<Vec<_>>>()?;

        let payload = AddPasskeyPayload {
            relying_party: registration.relying_party,
            user: registration.user,
            credential: registration.credential,
            created_at: now_millis(),
            record_id: Uuid::new_v4().to_string(),
            title: form.title,
            note: form.note,
            folder: form.folder,
            websites: (!form.websites.is_empty()).then_some(form.websites),
            attachments,
        };

        let job = Job::with_payload(JobType::AddPasskey, registration.vault_id, &payload)?;
        let job_id = job.id.clone();
        self.store.append_job_locked(job, key)?;
        Ok(job_id)
    }

    /// Queues attaching the passkey to `existing_record_id` and returns the
    /// job id.
    ///
    /// # Errors
    ///
    /// Propagates store and crypto errors.
    pub fn create_update_passkey_job(
        &self,
        key: &JobKey,
        existing_record_id: impl Into<String>,
        registration: PasskeyRegistration,
        note: Option<String>,
    ) -> VaultResult<String> {
        let payload = UpdatePasskeyPayload {
            existing_record_id: existing_record_id.into(),
            relying_party: registration.relying_party,
            user: registration.user,
            credential: registration.credential,
            created_at: now_millis(),
            vault_id: registration.vault_id.clone(),
            note,
            attachments: Vec::new(),
            keep_attachment_ids: Vec::new(),
        };

        let job = Job::with_payload(JobType::UpdatePasskey, registration.vault_id, &payload)?;
        let job_id = job.id.clone();
        self.store.append_job(job, key)?;
        Ok(job_id)
    }

    fn store_attachment(&self, attachment: &NewAttachment) -> VaultResult<JobAttachment> {
        let id = Uuid::new_v4().to_string();
        let relative_path = self
            .store
            .save_attachment(&attachment.data, &id, &attachment.name)?;
        Ok(JobAttachment {
            id,
            name: attachment.name.clone(),
            relative_path,
        })
    }
}
