use serde::Serialize;
use serde_json::{Map, Value};
use strum::{Display, EnumIter};

/// Engine opcodes.
///
/// The numeric values are the wire protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u16)]
pub enum Command {
    /// Points the engine at its storage directory. Bootstrap.
    StoragePathSet = 1,
    /// Opens the master vault.
    MasterVaultInit = 2,
    /// Reports whether the master vault is open.
    MasterVaultGetStatus = 3,
    /// Reads one record from the master vault.
    MasterVaultGet = 4,
    /// Closes the master vault.
    MasterVaultClose = 5,
    /// Writes a record to the master vault.
    MasterVaultAdd = 6,
    /// Lists master vault records under a key prefix.
    MasterVaultList = 7,
    /// Stores a file in the active vault.
    ActiveVaultFileAdd = 8,
    /// Removes a file from the active vault.
    ActiveVaultFileRemove = 9,
    /// Reads a file from the active vault.
    ActiveVaultFileGet = 10,
    /// Opens a vault as the active one.
    ActiveVaultInit = 11,
    /// Reports whether an active vault is open.
    ActiveVaultGetStatus = 12,
    /// Closes the active vault.
    ActiveVaultClose = 13,
    /// Writes a record to the active vault.
    ActiveVaultAdd = 14,
    /// Removes a record from the active vault.
    ActiveVaultRemove = 15,
    /// Lists active vault records under a key prefix.
    ActiveVaultList = 16,
    /// Reads one record from the active vault.
    ActiveVaultGet = 17,
    /// Creates a pairing invite for the active vault.
    ActiveVaultCreateInvite = 18,
    /// Revokes a pairing invite.
    ActiveVaultDeleteInvite = 19,
    /// Joins a vault through an invite.
    PairActiveVault = 20,
    /// Subscribes to vault updates.
    InitListener = 21,
    /// Update notification.
    OnUpdate = 22,
    /// Opens the encryption store.
    EncryptionInit = 23,
    /// Reports whether the encryption store is open.
    EncryptionGetStatus = 24,
    /// Reads one record from the encryption store.
    EncryptionGet = 25,
    /// Writes a record to the encryption store.
    EncryptionAdd = 26,
    /// Closes the encryption store.
    EncryptionClose = 27,
    /// Hashes a password.
    EncryptionHashPassword = 28,
    /// Wraps a vault key with a hashed password.
    EncryptionEncryptVaultKeyWithHashedPassword = 29,
    /// Encrypts a vault with a derived key.
    EncryptionEncryptVaultWithKey = 30,
    /// Unwraps a vault key.
    EncryptionDecryptVaultKey = 31,
    /// Derives the decryption key from a salt and password.
    EncryptionGetDecryptionKey = 32,
    /// Closes every open store.
    CloseAllInstances = 33,
    /// Cancels a pending pairing.
    CancelPairActiveVault = 34,
    /// Sets the master password.
    MasterPasswordCreate = 43,
    /// Unlocks with the master password.
    MasterPasswordInitWithPassword = 44,
    /// Changes the master password.
    MasterPasswordUpdate = 45,
    /// Unlocks with stored wrapped credentials.
    MasterPasswordInitWithCredentials = 46,
    /// Sets core store options such as read-only. Bootstrap.
    SetCoreStoreOptions = 49,
}

impl Command {
    /// Wire value.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Commands that run while the engine is still starting up.
    #[must_use]
    pub const fn is_bootstrap(self) -> bool {
        matches!(self, Self::StoragePathSet | Self::SetCoreStoreOptions)
    }
}

/// Request envelope as written to the transport.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a> {
    command: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Map<String, Value>>,
    source: &'a str,
}

impl<'a> Envelope<'a> {
    pub(crate) const fn new(
        command: Command,
        data: Option<&'a Map<String, Value>>,
        source: &'a str,
    ) -> Self {
        Self {
            command: command.code(),
            data,
            source,
        }
    }
}
