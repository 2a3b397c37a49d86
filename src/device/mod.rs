//! Device authorization flow: code issuing, approval, polling and expiry.

pub mod clock;
pub mod codes;
pub mod credential;
pub mod error;
pub mod file_store;
pub mod messages;
pub mod reaper;
pub mod record;
pub mod service;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use credential::IssuedKey;
pub use error::{ApproveError, StartError};
pub use file_store::FileAuthorizationStore;
pub use messages::{
    ApproveRequest, ApproveResponse, ErrorBody, ErrorCode, PollOutcome, PollRequest, PollResponse,
    PollStatus, StartRequest, StartResponse,
};
pub use reaper::{ExpiryReaper, SweepReport};
pub use record::{AuthorizationStatus, DeviceAuthorization, Transition};
pub use service::{ApprovalView, DeviceAuthService, FlowSettings};
pub use store::{AuthorizationStore, CasOutcome, MemoryAuthorizationStore, StoreError};
