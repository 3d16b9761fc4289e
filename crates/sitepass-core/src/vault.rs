use std::path::{Path, PathBuf};

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use sha2::Sha256;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroize;

use sitepass_storage::{self as storage, SALT_LEN, StorageError};

use crate::model::{LoginRecord, ModelError, VaultPayload};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const AEAD_TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 480_000;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("wrong master password or tampered vault")]
    WrongPassword,
    #[error("vault decrypted but failed its integrity check")]
    CorruptVault,
    #[error("encryption failed")]
    EncryptionFailure,
    #[error("randomness source failed")]
    RandomFailure,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Stretches the master password into a 256-bit key. Deterministic for a
/// given password and salt; the password is NFKC normalized first so that
/// visually identical inputs derive the same key.
#[must_use]
pub fn derive_key(master_password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut normalized: String = master_password.nfkc().collect();
    let mut key = [0_u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(normalized.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    normalized.zeroize();
    key
}

/// Produces a self-describing token `nonce || ciphertext+tag` with a fresh
/// random nonce, decryptable with only the same key.
pub fn encrypt_token(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let nonce = random_bytes::<NONCE_LEN>()?;
    let cipher = XChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| VaultError::EncryptionFailure)?;

    let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&ciphertext);
    Ok(token)
}

/// Rejects any wrong-key, altered, or truncated token. The error is
/// deliberately uniform: nothing distinguishes a wrong key from tampering.
pub fn decrypt_token(key: &[u8; KEY_LEN], token: &[u8]) -> Result<Vec<u8>, VaultError> {
    if token.len() < NONCE_LEN + AEAD_TAG_LEN {
        return Err(VaultError::WrongPassword);
    }
    let (nonce, ciphertext) = token.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::WrongPassword)
}

fn random_bytes<const N: usize>() -> Result<[u8; N], VaultError> {
    let mut out = [0_u8; N];
    getrandom::fill(&mut out).map_err(|_| VaultError::RandomFailure)?;
    Ok(out)
}

/// One unlocked vault session: the derived key and decrypted login list for
/// a single vault file. Every mutation re-encrypts the whole payload and
/// atomically overwrites the file before returning. Dropping the session is
/// the only way back to locked; the key and resident passwords are zeroized.
#[derive(Debug)]
pub struct CredentialVault {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
    payload: VaultPayload,
}

impl CredentialVault {
    /// Creates a fresh vault at `path` and returns it unlocked. Overwrites
    /// unconditionally; the caller decides whether a vault already exists.
    pub fn create(path: &Path, master_password: &str) -> Result<Self, VaultError> {
        let salt = random_bytes::<SALT_LEN>()?;
        let key = derive_key(master_password, &salt);
        let vault = Self {
            path: path.to_path_buf(),
            salt,
            key,
            payload: VaultPayload::new(&salt),
        };
        vault.persist()?;
        Ok(vault)
    }

    /// Unlocks the vault at `path`. `WrongPassword` when authenticated
    /// decryption rejects the supplied password; `CorruptVault` when the
    /// plaintext is not our structure, the sentinel differs, or the inner
    /// salt does not match the file header.
    pub fn open(path: &Path, master_password: &str) -> Result<Self, VaultError> {
        let (salt, token) = storage::read_vault(path)?;
        let mut key = derive_key(master_password, &salt);

        let mut plaintext = match decrypt_token(&key, &token) {
            Ok(value) => value,
            Err(error) => {
                key.zeroize();
                return Err(error);
            }
        };
        let decoded = VaultPayload::from_json(&plaintext);
        plaintext.zeroize();

        let payload = match decoded {
            Ok(value) => value,
            Err(_) => {
                key.zeroize();
                return Err(VaultError::CorruptVault);
            }
        };
        if !payload.check_passes() || payload.salt_bytes() != Some(salt) {
            key.zeroize();
            return Err(VaultError::CorruptVault);
        }

        Ok(Self {
            path: path.to_path_buf(),
            salt,
            key,
            payload,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    #[must_use]
    pub fn get_all_logins(&self) -> &[LoginRecord] {
        &self.payload.logins
    }

    #[must_use]
    pub fn login_count(&self) -> usize {
        self.payload.login_count()
    }

    /// All usernames saved for `origin` (exact string match).
    #[must_use]
    pub fn find_usernames(&self, origin: &str) -> Vec<String> {
        self.payload.usernames_for(origin)
    }

    /// The password saved for `(origin, username)`, exact match on both.
    #[must_use]
    pub fn find_password(&self, origin: &str, username: &str) -> Option<&str> {
        self.payload.password_for(origin, username)
    }

    /// Upserts a login and persists before returning. On a persistence
    /// failure the in-memory and on-disk state diverge; the error must reach
    /// the caller so it can retry or alert.
    pub fn save_password(
        &mut self,
        origin: &str,
        username: &str,
        password: &str,
    ) -> Result<(), VaultError> {
        self.payload.upsert_login(origin, username, password);
        self.persist()
    }

    /// Removes the matching login, if any, and persists. Absence is a no-op,
    /// not an error.
    pub fn delete_password(&mut self, origin: &str, username: &str) -> Result<(), VaultError> {
        self.payload.remove_login(origin, username);
        self.persist()
    }

    fn persist(&self) -> Result<(), VaultError> {
        let mut plaintext = self.payload.to_json()?;
        let token = encrypt_token(&self.key, &plaintext);
        plaintext.zeroize();
        storage::write_vault(&self.path, &self.salt, &token?)?;
        Ok(())
    }
}

impl Drop for CredentialVault {
    fn drop(&mut self) {
        self.key.zeroize();
        for login in &mut self.payload.logins {
            login.password.zeroize();
        }
    }
}
