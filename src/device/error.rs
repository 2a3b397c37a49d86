use thiserror::Error;

use super::store::StoreError;

/// Failures of [`DeviceAuthService::start`](super::DeviceAuthService::start).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Could not allocate unique codes after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of [`DeviceAuthService::approve`](super::DeviceAuthService::approve).
///
/// None of these variants carry key material.
#[derive(Debug, Error)]
pub enum ApproveError {
    #[error("Unknown user code")]
    UnknownUserCode,
    #[error("Code already used")]
    AlreadyUsed,
    #[error("Code expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}
