use sha3::{Digest, Sha3_256};
use uuid::Uuid;

/// Salted SHA3-256 of a password, hex encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected: &str) -> bool {
    hash_password(password, salt) == expected
}

/// Download token for an object. Derived from the content so every
/// re-upload of different bytes yields a new public URL.
pub fn content_token(bytes: &[u8]) -> String {
    let digest = Sha3_256::digest(bytes);
    hex::encode(&digest[..16])
}

/// Random identifier used for uids, salts and session tokens.
pub fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_depends_on_salt() {
        let first = hash_password("secret", "salt-a");
        assert_eq!(first.len(), 64);
        assert_ne!(first, hash_password("secret", "salt-b"));
        assert!(verify_password("secret", "salt-a", &first));
        assert!(!verify_password("Secret", "salt-a", &first));
    }

    #[test]
    fn content_token_tracks_content() {
        assert_eq!(content_token(b"abc"), content_token(b"abc"));
        assert_ne!(content_token(b"abc"), content_token(b"abd"));
        assert_eq!(content_token(b"").len(), 32);
    }
}
