use std::fmt;

use serde::{Deserialize, Serialize};

use super::codes::random_url_safe;

const KEY_PREFIX: &str = "kg-";
const KEY_BYTES: usize = 32;

/// API key minted when a device authorization is approved.
///
/// `Debug` and `Display` never print the secret; use [`IssuedKey::expose`]
/// at the single point where it is handed to the polling client.
///
/// # Example
/// ```
/// use keygate::device::IssuedKey;
///
/// let key = IssuedKey::mint();
/// assert!(key.expose().starts_with("kg-"));
/// assert_eq!(format!("{key:?}"), "IssuedKey(***)");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuedKey(String);

impl IssuedKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh key from the OS-seeded CSPRNG.
    pub fn mint() -> Self {
        Self(format!("{KEY_PREFIX}{}", random_url_safe(KEY_BYTES)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IssuedKey(***)")
    }
}

impl fmt::Display for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
