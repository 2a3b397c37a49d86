//! Device and user code generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// Consonants only: no vowels (no accidental words), no 0/O, 1/I/L lookalikes.
pub const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
pub const USER_CODE_LEN: usize = 8;

/// 256 bits of entropy.
const DEVICE_CODE_BYTES: usize = 32;

pub(crate) fn random_url_safe(byte_count: usize) -> String {
    let mut buf = vec![0u8; byte_count];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

pub fn generate_device_code() -> String {
    random_url_safe(DEVICE_CODE_BYTES)
}

/// Canonical (undashed) user code, e.g. `BCDFGHJK`.
pub fn generate_user_code() -> String {
    let mut rng = OsRng;
    (0..USER_CODE_LEN)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Human-facing form, `XXXX-XXXX`.
pub fn display_user_code(canonical: &str) -> String {
    if canonical.len() == USER_CODE_LEN && canonical.is_ascii() {
        let (head, tail) = canonical.split_at(USER_CODE_LEN / 2);
        format!("{head}-{tail}")
    } else {
        canonical.to_string()
    }
}

/// Normalize typed input: uppercase, drop spaces and dashes.
///
/// Returns `None` when the result cannot be a code we issued, so lookups on
/// garbage never reach the store.
pub fn normalize_user_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let valid = normalized.len() == USER_CODE_LEN
        && normalized.bytes().all(|b| USER_CODE_ALPHABET.contains(&b));
    valid.then_some(normalized)
}

/// Short non-reversible handle for a device code, safe to log.
pub fn fingerprint(device_code: &str) -> String {
    let digest = Sha256::digest(device_code.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Hex SHA-256, used as a storage file name.
pub(crate) fn storage_key(device_code: &str) -> String {
    let digest = Sha256::digest(device_code.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
