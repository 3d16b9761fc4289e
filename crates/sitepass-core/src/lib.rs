pub mod model;
pub mod vault;

pub const APP_NAME: &str = "sitepass";

pub use model::{LoginRecord, ModelError, VAULT_CHECK, VaultPayload};
pub use sitepass_storage::{SALT_LEN, StorageError};
pub use vault::{
    CredentialVault, KEY_LEN, VaultError, decrypt_token, derive_key, encrypt_token,
};
