//! Typed engine operations.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{VaultError, VaultResult};
use crate::jobs::{JobKey, KeyEncoding};

use super::{params, Command, Response, SessionClient, Transport};

/// Record holding the wrapped master secret in the master vault.
pub const MASTER_ENCRYPTION_KEY: &str = "masterEncryption";
/// Record holding the master password in the encryption store.
pub const MASTER_PASSWORD_KEY: &str = "masterPassword";
/// Key prefix of vault entries in the master vault.
pub const DEFAULT_VAULT_FILTER: &str = "vault/";
/// Key prefix of records in an active vault.
pub const DEFAULT_RECORD_FILTER: &str = "record/";

/// Initialization state of the master or active vault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultStatus {
    /// The vault is open.
    pub is_initialized: bool,
    /// The vault is closed; always `!is_initialized`.
    pub is_locked: bool,
    /// Id of the open vault, if reported.
    pub id: Option<String>,
}

impl VaultStatus {
    fn from_response(response: &Response) -> Self {
        let is_initialized = response.flag("status");
        Self {
            is_initialized,
            is_locked: !is_initialized,
            id: response.get_str("id").map(str::to_string),
        }
    }

    /// Initialized and not locked.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.is_initialized && !self.is_locked
    }
}

/// State of the engine's encryption store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionStatus {
    /// The store is initialized.
    pub status: bool,
    /// A key is loaded.
    pub has_key: bool,
}

/// Outcome of initializing the encryption store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionInit {
    /// This process initialized it.
    Initialized,
    /// Another process holds it; it is initialized, but not by us.
    SharedInstance,
}

/// The wrapped master secret.
///
/// `hashed_password` doubles as the job queue key once decoded.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterPasswordEncryption {
    /// Wrapped secret.
    pub ciphertext: String,
    /// Nonce used to wrap it.
    pub nonce: String,
    /// Password salt.
    pub salt: String,
    /// Password hash, when the engine exposes it.
    pub hashed_password: Option<String>,
}

impl MasterPasswordEncryption {
    /// Reads the record; `None` unless ciphertext, nonce and salt are all set.
    #[must_use]
    pub fn from_response(response: &Response) -> Option<Self> {
        Some(Self {
            ciphertext: response.get_str("ciphertext")?.to_string(),
            nonce: response.get_str("nonce")?.to_string(),
            salt: response.get_str("salt")?.to_string(),
            hashed_password: response.get_str("hashedPassword").map(str::to_string),
        })
    }

    /// Decodes `hashed_password` into the job queue key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidKey`] if the hash is missing or does not
    /// decode to 32 bytes.
    pub fn job_key(&self, encoding: KeyEncoding) -> VaultResult<JobKey> {
        let hashed = self
            .hashed_password
            .as_deref()
            .ok_or_else(|| VaultError::InvalidKey("hashedPassword is missing".to_string()))?;
        JobKey::from_encoded(hashed, encoding)
    }
}

impl std::fmt::Debug for MasterPasswordEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterPasswordEncryption")
            .field("ciphertext", &"[REDACTED]")
            .field("nonce", &self.nonce)
            .field("salt", &self.salt)
            .field(
                "hashed_password",
                &self.hashed_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Encryption block of a vault entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEncryption {
    /// Wrapped vault key.
    pub ciphertext: String,
    /// Nonce the key was wrapped with.
    pub nonce: String,
    /// Hash of the vault password, if stored.
    #[serde(default)]
    pub hashed_password: Option<String>,
    /// Salt for key derivation.
    #[serde(default)]
    pub salt: Option<String>,
}

/// A vault listed in the master vault.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    /// Vault id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Schema version.
    #[serde(default)]
    pub version: Option<u32>,
    /// Unix milliseconds.
    #[serde(default)]
    pub created_at: Option<u64>,
    /// Unix milliseconds.
    #[serde(default)]
    pub updated_at: Option<u64>,
    /// Key material, when the vault has its own.
    #[serde(default)]
    pub encryption: Option<VaultEncryption>,
}

fn secret_b64(secret: &SecretString) -> Zeroizing<String> {
    Zeroizing::new(STANDARD.encode(secret.expose_secret().as_bytes()))
}

fn list_items(response: &Response) -> Vec<Map<String, Value>> {
    response
        .first_array(&["array", "vaults", "data"])
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

impl<T: Transport> SessionClient<T> {
    /// Points the engine at its storage directory.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn set_storage_path(&self, path: &Path) -> VaultResult<()> {
        self.send(
            Command::StoragePathSet,
            params([("path", json!(path.to_string_lossy()))]),
        )
        .await
        .map(drop)
    }

    /// Configures the engine's core store.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn set_core_store_options(&self, read_only: bool) -> VaultResult<()> {
        self.send(
            Command::SetCoreStoreOptions,
            params([("coreStoreOptions", json!({ "readOnly": read_only }))]),
        )
        .await
        .map(drop)
    }

    /// Status of the master vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn vaults_get_status(&self) -> VaultResult<VaultStatus> {
        let response = self.send(Command::MasterVaultGetStatus, None).await?;
        Ok(VaultStatus::from_response(&response))
    }

    /// Reads one record from the master vault. A missing record is empty.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn vaults_get(&self, key: &str) -> VaultResult<Response> {
        self.send(Command::MasterVaultGet, params([("key", json!(key))]))
            .await
    }

    /// Lists master vault entries whose keys start with `filter_key`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn vaults_list(&self, filter_key: &str) -> VaultResult<Vec<Map<String, Value>>> {
        let response = self
            .send(
                Command::MasterVaultList,
                params([("filterKey", json!(filter_key))]),
            )
            .await?;
        Ok(list_items(&response))
    }

    /// Lists vaults. Entries without an id or a name are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn list_vaults(&self) -> VaultResult<Vec<Vault>> {
        let vaults = self
            .vaults_list(DEFAULT_VAULT_FILTER)
            .await?
            .into_iter()
            .filter_map(|entry| serde_json::from_value(Value::Object(entry)).ok())
            .collect();
        Ok(vaults)
    }

    /// Closes the master vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn vaults_close(&self) -> VaultResult<()> {
        self.send(Command::MasterVaultClose, None).await.map(drop)
    }

    /// Opens vault `id`, optionally with its decrypted key.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn active_vault_init(
        &self,
        id: &str,
        encryption_key: Option<&SecretString>,
    ) -> VaultResult<Response> {
        let mut data = Map::new();
        data.insert("id".into(), json!(id));
        if let Some(key) = encryption_key {
            data.insert("encryptionKey".into(), json!(key.expose_secret()));
        }
        self.send(Command::ActiveVaultInit, Some(data)).await
    }

    /// Status of the active vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn active_vault_get_status(&self) -> VaultResult<VaultStatus> {
        let response = self.send(Command::ActiveVaultGetStatus, None).await?;
        Ok(VaultStatus::from_response(&response))
    }

    /// Closes the active vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn active_vault_close(&self) -> VaultResult<()> {
        self.send(Command::ActiveVaultClose, None).await.map(drop)
    }

    /// Lists active vault records whose keys start with `filter_key`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn active_vault_list(
        &self,
        filter_key: &str,
    ) -> VaultResult<Vec<Map<String, Value>>> {
        let response = self
            .send(
                Command::ActiveVaultList,
                params([("filterKey", json!(filter_key))]),
            )
            .await?;
        Ok(list_items(&response))
    }

    /// Reads one record from the active vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn active_vault_get(&self, key: &str) -> VaultResult<Response> {
        self.send(Command::ActiveVaultGet, params([("key", json!(key))]))
            .await
    }

    /// Initializes the encryption store.
    ///
    /// A lock error means another process already holds the store and is
    /// reported as [`EncryptionInit::SharedInstance`].
    ///
    /// # Errors
    ///
    /// Propagates every other engine error.
    pub async fn encryption_init(&self) -> VaultResult<EncryptionInit> {
        match self.send(Command::EncryptionInit, None).await {
            Ok(_) => Ok(EncryptionInit::Initialized),
            Err(VaultError::VaultLocked) => Ok(EncryptionInit::SharedInstance),
            Err(e) => Err(e),
        }
    }

    /// Status of the encryption store.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn encryption_get_status(&self) -> VaultResult<EncryptionStatus> {
        let response = self.send(Command::EncryptionGetStatus, None).await?;
        Ok(EncryptionStatus {
            status: response.flag("status"),
            has_key: response.flag("hasKey"),
        })
    }

    /// Reads one record from the encryption store.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn encryption_get(&self, key: &str) -> VaultResult<Response> {
        self.send(Command::EncryptionGet, params([("key", json!(key))]))
            .await
    }

    /// Closes the encryption store.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn encryption_close(&self) -> VaultResult<()> {
        self.send(Command::EncryptionClose, None).await.map(drop)
    }

    /// Hashes a password with the engine's KDF.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EngineError`] if the reply carries no hash.
    pub async fn hash_password(&self, password: &SecretString) -> VaultResult<String> {
        let encoded = secret_b64(password);
        let response = self
            .send(
                Command::EncryptionHashPassword,
                params([("password", json!(encoded.as_str()))]),
            )
            .await?;
        response
            .first_str(&["hashedPassword", "value"])
            .map(str::to_string)
            .ok_or_else(|| VaultError::EngineError("hash reply carries no hash".to_string()))
    }

    /// Derives the vault decryption key from `password` and `salt`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EngineError`] if the reply carries no key.
    pub async fn get_decryption_key(
        &self,
        salt: &str,
        password: &SecretString,
    ) -> VaultResult<String> {
        let encoded = secret_b64(password);
        let response = self
            .send(
                Command::EncryptionGetDecryptionKey,
                params([("salt", json!(salt)), ("password", json!(encoded.as_str()))]),
            )
            .await?;
        response
            .first_str(&["value", "key", "hashedPassword"])
            .map(str::to_string)
            .ok_or_else(|| VaultError::EngineError("key reply carries no key".to_string()))
    }

    /// Unwraps a vault key.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn decrypt_vault_key(
        &self,
        ciphertext: &str,
        nonce: &str,
        hashed_password: &str,
    ) -> VaultResult<Response> {
        self.send(
            Command::EncryptionDecryptVaultKey,
            params([
                ("ciphertext", json!(ciphertext)),
                ("nonce", json!(nonce)),
                ("hashedPassword", json!(hashed_password)),
            ]),
        )
        .await
    }

    /// Unlocks with the master password.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn init_with_password(&self, password: &SecretString) -> VaultResult<Response> {
        let encoded = secret_b64(password);
        self.send(
            Command::MasterPasswordInitWithPassword,
            params([("password", json!(encoded.as_str()))]),
        )
        .await
    }

    /// Unlocks with previously wrapped credentials.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn init_with_credentials(
        &self,
        ciphertext: &str,
        nonce: &str,
        hashed_password: &str,
    ) -> VaultResult<Response> {
        self.send(
            Command::MasterPasswordInitWithCredentials,
            params([
                ("ciphertext", json!(ciphertext)),
                ("nonce", json!(nonce)),
                ("hashedPassword", json!(hashed_password)),
            ]),
        )
        .await
    }

    /// Reads the `masterEncryption` record from the master vault.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn master_encryption(&self) -> VaultResult<Option<MasterPasswordEncryption>> {
        let response = self.vaults_get(MASTER_ENCRYPTION_KEY).await?;
        Ok(MasterPasswordEncryption::from_response(&response))
    }

    /// Fetches the job queue key from the unlocked master vault.
    ///
    /// # Errors
    ///
    /// - Engine errors from the read.
    /// - [`VaultError::InvalidKey`] if the record or its hash is missing or
    ///   does not decode to 32 bytes.
    pub async fn job_queue_key(&self, encoding: KeyEncoding) -> VaultResult<JobKey> {
        let response = self.vaults_get(MASTER_ENCRYPTION_KEY).await?;
        let hashed = response
            .get_str("hashedPassword")
            .ok_or_else(|| VaultError::InvalidKey("hashedPassword is missing".to_string()))?;
        JobKey::from_encoded(hashed, encoding)
    }
}
