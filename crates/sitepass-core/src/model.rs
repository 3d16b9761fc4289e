use data_encoding::BASE64URL;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sitepass_storage::SALT_LEN;

/// Known plaintext marker confirming that decryption produced our structure.
pub const VAULT_CHECK: &str = "VaultOK";

const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("payload encoding failed")]
    EncodeFailure,
    #[error("payload decoding failed")]
    DecodeFailure,
    #[error("payload exceeds size limit")]
    PayloadTooLarge,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRecord {
    /// Site identifier, stored and matched as an opaque string. The JSON
    /// field stays `url` for compatibility with existing consumers.
    #[serde(rename = "url")]
    pub origin: String,
    pub username: String,
    pub password: String,
}

/// The plaintext structure the vault ciphertext decrypts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultPayload {
    /// URL-safe base64 of the container salt, duplicated inside the payload
    /// so the save routine never has to re-read the file header.
    #[serde(rename = "salt")]
    pub salt_b64: String,
    pub check: String,
    #[serde(default)]
    pub logins: Vec<LoginRecord>,
}

impl VaultPayload {
    #[must_use]
    pub fn new(salt: &[u8; SALT_LEN]) -> Self {
        Self {
            salt_b64: BASE64URL.encode(salt),
            check: VAULT_CHECK.to_owned(),
            logins: Vec::new(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(ModelError::PayloadTooLarge);
        }
        serde_json::from_slice(bytes).map_err(|_| ModelError::DecodeFailure)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ModelError> {
        let output = serde_json::to_vec(self).map_err(|_| ModelError::EncodeFailure)?;
        if output.len() > MAX_PAYLOAD_BYTES {
            return Err(ModelError::PayloadTooLarge);
        }
        Ok(output)
    }

    #[must_use]
    pub fn check_passes(&self) -> bool {
        self.check == VAULT_CHECK
    }

    /// The salt duplicated inside the payload, decoded back to raw bytes.
    /// `None` when the field is not valid base64 of the expected length.
    #[must_use]
    pub fn salt_bytes(&self) -> Option<[u8; SALT_LEN]> {
        let decoded = BASE64URL.decode(self.salt_b64.as_bytes()).ok()?;
        decoded.try_into().ok()
    }

    /// At most one record per `(origin, username)` pair: any existing match
    /// is removed before the new record is appended.
    pub fn upsert_login(&mut self, origin: &str, username: &str, password: &str) {
        self.logins
            .retain(|login| !(login.origin == origin && login.username == username));
        self.logins.push(LoginRecord {
            origin: origin.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
        });
    }

    /// Removes the record matching `(origin, username)` exactly. Returns
    /// whether anything was removed; absence is not an error.
    pub fn remove_login(&mut self, origin: &str, username: &str) -> bool {
        let before = self.logins.len();
        self.logins
            .retain(|login| !(login.origin == origin && login.username == username));
        self.logins.len() != before
    }

    #[must_use]
    pub fn usernames_for(&self, origin: &str) -> Vec<String> {
        self.logins
            .iter()
            .filter(|login| login.origin == origin)
            .map(|login| login.username.clone())
            .collect()
    }

    #[must_use]
    pub fn password_for(&self, origin: &str, username: &str) -> Option<&str> {
        self.logins
            .iter()
            .find(|login| login.origin == origin && login.username == username)
            .map(|login| login.password.as_str())
    }

    #[must_use]
    pub fn login_count(&self) -> usize {
        self.logins.len()
    }
}

#[cfg(test)]
mod tests {
    use sitepass_storage::SALT_LEN;

    use super::{ModelError, VAULT_CHECK, VaultPayload};

    fn payload_with_salt() -> VaultPayload {
        VaultPayload::new(&[0xA5; SALT_LEN])
    }

    #[test]
    fn new_payload_carries_sentinel_and_empty_logins() {
        let payload = payload_with_salt();
        assert!(payload.check_passes());
        assert_eq!(payload.login_count(), 0);
        assert_eq!(payload.salt_bytes(), Some([0xA5; SALT_LEN]));
    }

    #[test]
    fn json_uses_compatible_field_names() {
        let mut payload = payload_with_salt();
        payload.upsert_login("https://a.com", "alice", "p@ss");
        let bytes = payload.to_json().expect("encode should succeed");
        let text = String::from_utf8(bytes).expect("json is utf-8");

        assert!(text.contains("\"salt\":"));
        assert!(text.contains("\"check\":\"VaultOK\""));
        assert!(text.contains("\"url\":\"https://a.com\""));
        assert!(!text.contains("origin"));
    }

    #[test]
    fn decodes_payload_without_logins_field() {
        let raw = format!(
            "{{\"salt\":\"{}\",\"check\":\"{VAULT_CHECK}\"}}",
            data_encoding::BASE64URL.encode(&[1_u8; SALT_LEN])
        );
        let payload = VaultPayload::from_json(raw.as_bytes()).expect("decode should succeed");
        assert!(payload.logins.is_empty());
    }

    #[test]
    fn rejects_non_json_bytes() {
        let result = VaultPayload::from_json(b"\xFF\xFE not json");
        assert!(matches!(result, Err(ModelError::DecodeFailure)));
    }

    #[test]
    fn upsert_replaces_matching_pair_only() {
        let mut payload = payload_with_salt();
        payload.upsert_login("https://a.com", "alice", "one");
        payload.upsert_login("https://a.com", "bob", "two");
        payload.upsert_login("https://a.com", "alice", "three");

        assert_eq!(payload.login_count(), 2);
        assert_eq!(payload.password_for("https://a.com", "alice"), Some("three"));
        assert_eq!(payload.password_for("https://a.com", "bob"), Some("two"));
    }

    #[test]
    fn remove_login_reports_absence() {
        let mut payload = payload_with_salt();
        payload.upsert_login("https://a.com", "alice", "one");

        assert!(!payload.remove_login("https://a.com", "nobody"));
        assert_eq!(payload.login_count(), 1);
        assert!(payload.remove_login("https://a.com", "alice"));
        assert_eq!(payload.login_count(), 0);
    }

    #[test]
    fn usernames_match_origin_exactly() {
        let mut payload = payload_with_salt();
        payload.upsert_login("https://a.com", "alice", "one");
        payload.upsert_login("https://a.com", "bob", "two");
        payload.upsert_login("https://a.com/login", "carol", "three");

        let names = payload.usernames_for("https://a.com");
        assert_eq!(names, vec!["alice".to_owned(), "bob".to_owned()]);
        assert!(payload.usernames_for("https://b.com").is_empty());
    }

    #[test]
    fn empty_password_is_distinct_from_absent() {
        let mut payload = payload_with_salt();
        payload.upsert_login("https://a.com", "alice", "");

        assert_eq!(payload.password_for("https://a.com", "alice"), Some(""));
        assert_eq!(payload.password_for("https://a.com", "bob"), None);
    }

    #[test]
    fn salt_bytes_rejects_bad_base64() {
        let mut payload = payload_with_salt();
        payload.salt_b64 = "not base64 at all".to_owned();
        assert_eq!(payload.salt_bytes(), None);

        payload.salt_b64 = data_encoding::BASE64URL.encode(&[0_u8; 8]);
        assert_eq!(payload.salt_bytes(), None);
    }
}
