use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix carried by every account credential so leaked keys are easy to grep for.
pub const API_KEY_PREFIX: &str = "rtcb_sk_";

/// Hashes an account API key for storage and lookup.
///
/// Only the hex-encoded SHA-256 digest is persisted. The key itself is shown
/// once, when the account is created, and cannot be recovered afterwards.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generates a fresh account API key with 192 bits of entropy.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}

/// Builds a withdrawal id of the form `<prefix>_<unix seconds>_<8 hex chars>`.
pub fn generate_withdrawal_id(prefix: &str, now_secs: i64) -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}_{}_{}", prefix, now_secs, hex::encode(bytes))
}

/// Random identity for a settlement worker instance, used as the lease holder.
pub fn generate_holder_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("sweep-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_hash_is_deterministic_and_trimmed() {
        let key = "rtcb_sk_0011223344";
        assert_eq!(hash_api_key(key), hash_api_key(&format!("  {}\n", key)));
        assert_eq!(hash_api_key(key).len(), 64);
        assert_ne!(hash_api_key(key), hash_api_key("rtcb_sk_0011223345"));
    }

    #[test]
    fn test_generated_api_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_eq!(a.len(), API_KEY_PREFIX.len() + 48);
        assert_ne!(a, b);
    }

    #[test]
    fn test_withdrawal_id_shape() {
        let id = generate_withdrawal_id("bwd", 1_700_000_000);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "bwd");
        assert_eq!(parts[1], "1700000000");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
