use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use thiserror::Error;

/// Length of the raw random salt stored at the front of every vault file.
pub const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("vault file not found")]
    NotFound,
    #[error("vault file truncated: {len} bytes, expected at least {SALT_LEN}")]
    Truncated { len: usize },
    #[error("vault file locked by another process")]
    Locked,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct VaultLock {
    vault_path: PathBuf,
    _lock_file: File,
}

impl VaultLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.vault_path
    }
}

#[must_use]
pub fn vault_exists(path: &Path) -> bool {
    path.is_file()
}

/// Reads a vault file and splits it into the 16-byte salt header and the
/// authenticated-encryption token that follows it.
pub fn read_vault(path: &Path) -> Result<([u8; SALT_LEN], Vec<u8>), StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound);
        }
        Err(error) => return Err(StorageError::Io(error)),
    };
    split_container(&bytes)
}

pub fn split_container(bytes: &[u8]) -> Result<([u8; SALT_LEN], Vec<u8>), StorageError> {
    if bytes.len() < SALT_LEN {
        return Err(StorageError::Truncated { len: bytes.len() });
    }
    let mut salt = [0_u8; SALT_LEN];
    salt.copy_from_slice(&bytes[..SALT_LEN]);
    Ok((salt, bytes[SALT_LEN..].to_vec()))
}

/// Persists `salt || token` as the complete vault file content, holding the
/// advisory lock for the duration of the write.
pub fn write_vault(path: &Path, salt: &[u8; SALT_LEN], token: &[u8]) -> Result<(), StorageError> {
    let lock = acquire_vault_lock(path)?;
    write_vault_with_lock(&lock, salt, token)
}

pub fn write_vault_with_lock(
    lock: &VaultLock,
    salt: &[u8; SALT_LEN],
    token: &[u8],
) -> Result<(), StorageError> {
    let mut bytes = Vec::with_capacity(SALT_LEN + token.len());
    bytes.extend_from_slice(salt);
    bytes.extend_from_slice(token);
    write_vault_atomic(lock.path(), &bytes)
}

pub fn acquire_vault_lock(path: &Path) -> Result<VaultLock, StorageError> {
    let lock_path = lock_file_path(path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => Ok(VaultLock {
            vault_path: path.to_path_buf(),
            _lock_file: lock_file,
        }),
        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => Err(StorageError::Locked),
        Err(error) => Err(StorageError::Io(error)),
    }
}

fn lock_file_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("vault");
    path.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.lock"))
}

// A half-written vault must never become the current one: write to a fresh
// temp file in the same directory, fsync, then rename over the target.
fn write_vault_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)?;

    let temp_file = parent_dir.join(format!(
        ".{}.{}.tmp",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("vault"),
        unique_suffix()
    ));

    let mut handle = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_file)?;
    set_secure_permissions(&temp_file)?;
    handle.write_all(bytes)?;
    handle.sync_all()?;
    drop(handle);

    fs::rename(&temp_file, path)?;
    set_secure_permissions(path)?;

    if let Ok(directory_handle) = OpenOptions::new().read(true).open(parent_dir) {
        let _ = directory_handle.sync_all();
    }

    Ok(())
}

fn unique_suffix() -> u128 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (u128::from(std::process::id()) << 64) | nanos
}

fn set_secure_permissions(_path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{
        SALT_LEN, StorageError, acquire_vault_lock, lock_file_path, read_vault, split_container,
        vault_exists, write_vault, write_vault_with_lock,
    };

    fn temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "sitepass-storage-tests-{}-{file_name}",
            std::process::id()
        ))
    }

    #[test]
    fn writes_and_splits_vault_file() {
        let path = temp_path("vault.spv");
        let salt = [7_u8; SALT_LEN];
        let token = b"opaque-token-bytes";
        write_vault(&path, &salt, token).expect("write should succeed");

        let (loaded_salt, loaded_token) = read_vault(&path).expect("read should succeed");
        fs::remove_file(path).expect("cleanup should succeed");

        assert_eq!(loaded_salt, salt);
        assert_eq!(loaded_token, token);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let path = temp_path("does-not-exist.spv");
        let result = read_vault(&path);
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[test]
    fn short_file_reports_truncated() {
        let path = temp_path("short.spv");
        fs::write(&path, b"0123456789").expect("seed write");
        let result = read_vault(&path);
        let _ = fs::remove_file(path);
        assert!(matches!(result, Err(StorageError::Truncated { len: 10 })));
    }

    #[test]
    fn empty_token_is_preserved() {
        let salt = [1_u8; SALT_LEN];
        let (loaded_salt, token) = split_container(&salt).expect("exactly a salt header");
        assert_eq!(loaded_salt, salt);
        assert!(token.is_empty());
    }

    #[test]
    fn returns_locked_when_lock_is_held() {
        let path = temp_path("locked.spv");
        let lock_path = lock_file_path(&path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).expect("create lock parent");
        }
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .expect("open lock file");
        fs2::FileExt::try_lock_exclusive(&lock_file).expect("lock must succeed");

        let result = write_vault(&path, &[0_u8; SALT_LEN], b"token");
        fs2::FileExt::unlock(&lock_file).expect("unlock lock file");

        assert!(matches!(result, Err(StorageError::Locked)));
        let _ = fs::remove_file(lock_path);
    }

    #[test]
    fn write_vault_with_lock_succeeds_when_lock_is_held() {
        let path = temp_path("write-with-lock.spv");
        let lock = acquire_vault_lock(&path).expect("acquire vault lock");
        let salt = [9_u8; SALT_LEN];
        write_vault_with_lock(&lock, &salt, b"token").expect("write with lock should succeed");

        let (loaded_salt, token) = read_vault(&path).expect("read should succeed");
        assert_eq!(loaded_salt, salt);
        assert_eq!(token, b"token");
        assert!(vault_exists(&path));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn atomic_write_leaves_no_temp_residue() {
        let dir = temp_path("atomic-dir");
        fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("vault.spv");
        write_vault(&path, &[3_u8; SALT_LEN], b"token").expect("write should succeed");

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".tmp"))
            })
            .collect();
        assert!(leftovers.is_empty());

        let _ = fs::remove_dir_all(dir);
    }
}
