//! Jobs and their payloads as they appear inside the decrypted job file.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::VaultResult;

/// Default retry budget for a new job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Current time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Kind of write a job asks the privileged process to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum JobType {
    /// Store a newly registered passkey as a new record.
    AddPasskey,
    /// Attach a passkey to an existing record.
    UpdatePasskey,
}

/// Lifecycle state of a job. Only the consumer moves a job past `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum JobStatus {
    /// Waiting for a consumer.
    Pending,
    /// Picked up by a consumer.
    InProgress,
    /// Applied; removed on the next rewrite.
    Completed,
    /// Retry budget exhausted.
    Failed,
}

/// A deferred write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique id (UUID v4).
    pub id: String,
    /// What to do.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Where in its lifecycle the job is.
    pub status: JobStatus,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds. Absent on read means `created_at`.
    #[serde(default)]
    pub updated_at: u64,
    /// Failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Attempts allowed before the job is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Target vault.
    pub vault_id: String,
    /// Type-specific payload, opaque to the queue.
    pub payload: Map<String, Value>,
    /// Last failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// New pending job with a fresh id and default retry budget.
    #[must_use]
    pub fn new(job_type: JobType, vault_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            vault_id: vault_id.into(),
            payload,
            error: None,
        }
    }

    /// Builds a job from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::Serialization`] if the payload does not
    /// serialize to a JSON object.
    pub fn with_payload<P: Serialize>(
        job_type: JobType,
        vault_id: impl Into<String>,
        payload: &P,
    ) -> VaultResult<Self> {
        let value = serde_json::to_value(payload)?;
        let Value::Object(map) = value else {
            return Err(crate::VaultError::Serialization(
                "job payload must be a JSON object".to_string(),
            ));
        };
        Ok(Self::new(job_type, vault_id, map))
    }

    /// Decodes the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::Serialization`] if the payload does not
    /// match `P`.
    pub fn payload_as<P: for<'de> Deserialize<'de>>(&self) -> VaultResult<P> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    fn touch(&mut self) {
        self.updated_at = now_millis().max(self.created_at);
    }

    /// Moves the job to `status`.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.touch();
    }

    /// Records a failed attempt and picks the next status.
    ///
    /// The job goes back to `Pending` while attempts remain, otherwise to
    /// `Failed`.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.error = Some(error.into());
        self.status = if self.retry_count >= self.max_retries {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        };
        self.touch();
    }

    /// Fills in fields that older writers may have left out.
    pub(crate) fn normalize(&mut self) {
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }
    }
}

/// Reference to a blob stored next to the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAttachment {
    /// Unique id; also the blob's file stem.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// File name inside the attachments folder.
    pub relative_path: String,
}

/// Relying party the credential was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelyingParty {
    /// Relying party identifier, usually a domain.
    pub rp_id: String,
    /// Display name of the relying party.
    pub rp_name: String,
}

/// Account the credential belongs to at the relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Opaque user handle, base64url.
    pub user_id: String,
    /// Account name, often an email address.
    pub user_name: String,
    /// Human-friendly account name.
    pub user_display_name: String,
}

/// A finished passkey credential. Every value is pre-encoded by the caller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyCredential {
    /// Credential id, base64url.
    pub credential_id: String,
    /// COSE public key, base64url.
    pub public_key: String,
    /// PKCS#8 private key, base64url. Never logged.
    pub private_key: String,
    /// Client data from the registration ceremony.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Attestation object, base64url.
    pub attestation_object: String,
    /// Authenticator data, base64url.
    pub authenticator_data: String,
    /// COSE algorithm identifier, `-7` for ES256.
    pub algorithm: i32,
    /// Transports the authenticator advertised.
    #[serde(default)]
    pub transports: Vec<String>,
}

impl std::fmt::Debug for PasskeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeyCredential")
            .field("credential_id", &self.credential_id)
            .field("private_key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("transports", &self.transports)
            .finish_non_exhaustive()
    }
}

/// Payload of an [`JobType::AddPasskey`] job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPasskeyPayload {
    /// Relying party, flattened into the payload.
    #[serde(flatten)]
    pub relying_party: RelyingParty,
    /// Account, flattened into the payload.
    #[serde(flatten)]
    pub user: UserEntity,
    /// Credential, flattened into the payload.
    #[serde(flatten)]
    pub credential: PasskeyCredential,
    /// Unix milliseconds when the registration finished.
    pub created_at: u64,
    /// Id the new record gets in the vault.
    pub record_id: String,
    /// Record title from the save form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Target folder, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Sites the record applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websites: Option<Vec<String>>,
    /// Blobs saved next to the job file.
    #[serde(default)]
    pub attachments: Vec<JobAttachment>,
}

/// Payload of an [`JobType::UpdatePasskey`] job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasskeyPayload {
    /// Record the passkey is attached to.
    pub existing_record_id: String,
    /// Relying party, flattened into the payload.
    #[serde(flatten)]
    pub relying_party: RelyingParty,
    /// Account, flattened into the payload.
    #[serde(flatten)]
    pub user: UserEntity,
    /// Credential, flattened into the payload.
    #[serde(flatten)]
    pub credential: PasskeyCredential,
    /// Unix milliseconds when the registration finished.
    pub created_at: u64,
    /// Vault holding the record.
    pub vault_id: String,
    /// Replacement note, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// New blobs saved next to the job file.
    #[serde(default)]
    pub attachments: Vec<JobAttachment>,
    /// Existing attachments to keep on the record.
    #[serde(default)]
    pub keep_attachment_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        let mut job = Job::new(JobType::AddPasskey, "vault-1", Map::new());
        job.error = None;
        let value = serde_json::to_value(&job).expect("serialize");
        assert_eq!(value["type"], "ADD_PASSKEY");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["vaultId"], "vault-1");
        assert_eq!(value["maxRetries"], 3);
        assert!(value.get("error").is_none());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let mut job: Job = serde_json::from_value(json!({
            "id": "j1",
            "type": "UPDATE_PASSKEY",
            "status": "IN_PROGRESS",
            "createdAt": 1_700_000_000_000_u64,
            "vaultId": "v",
            "payload": {}
        }))
        .expect("deserialize");
        job.normalize();
        assert_eq!(job.updated_at, 1_700_000_000_000);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.error, None);
    }

    #[test]
    fn test_record_failure_walks_to_failed() {
        let mut job = Job::new(JobType::AddPasskey, "v", Map::new());
        job.set_status(JobStatus::InProgress);
        job.record_failure("boom");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        job.record_failure("boom");
        job.record_failure("still boom");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.error.as_deref(), Some("still boom"));
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_job_type_parses_from_cli_spelling() {
        assert_eq!("add_passkey".parse::<JobType>().ok(), Some(JobType::AddPasskey));
        assert_eq!(JobType::UpdatePasskey.to_string(), "UPDATE_PASSKEY");
    }

    #[test]
    fn test_add_payload_is_flat() {
        let payload = AddPasskeyPayload {
            relying_party: RelyingParty {
                rp_id: "example.com".into(),
                rp_name: "Example".into(),
            },
            user: UserEntity {
                user_id: "dXNlcg".into(),
                user_name: "user@example.com".into(),
                user_display_name: "User".into(),
            },
            credential: PasskeyCredential {
                credential_id: "Y3JlZA".into(),
                public_key: "pk".into(),
                private_key: "sk".into(),
                client_data_json: "cdj".into(),
                attestation_object: "att".into(),
                authenticator_data: "ad".into(),
                algorithm: -7,
                transports: vec!["internal".into()],
            },
            created_at: 1,
            record_id: "r1".into(),
            title: Some("Example".into()),
            note: None,
            folder: None,
            websites: None,
            attachments: vec![],
        };
        let job = Job::with_payload(JobType::AddPasskey, "v", &payload).expect("job");
        assert_eq!(job.payload["rpId"], "example.com");
        assert_eq!(job.payload["clientDataJSON"], "cdj");
        assert_eq!(job.payload["algorithm"], -7);
        assert!(job.payload.get("note").is_none());

        let back: AddPasskeyPayload = job.payload_as().expect("decode");
        assert_eq!(back, payload);
    }

    #[test]
    fn test_credential_debug_hides_private_key() {
        let credential = PasskeyCredential {
            credential_id: "id".into(),
            public_key: "pk".into(),
            private_key: "super-secret".into(),
            client_data_json: String::new(),
            attestation_object: String::new(),
            authenticator_data: String::new(),
            algorithm: -7,
            transports: vec![],
        };
        assert!(!format!("{credential:?}").contains("super-secret"));
    }
}
