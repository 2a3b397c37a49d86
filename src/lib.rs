//! Keygate: device-authorization login for command-line tools.
//!
//! A CLI asks the server to [`start`](device::DeviceAuthService::start) a
//! login and shows the returned user code. A human approves that code in a
//! browser, and the CLI's next [`poll`](device::DeviceAuthService::poll)
//! receives a freshly minted API key exactly once.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use keygate::device::{DeviceAuthService, MemoryAuthorizationStore, PollOutcome};
//!
//! let service = DeviceAuthService::new(Arc::new(MemoryAuthorizationStore::new()));
//! let session = service.start(Some("laptop")).unwrap();
//! service.approve(&session.user_code).unwrap();
//!
//! assert!(matches!(service.poll(&session.device_code).unwrap(), PollOutcome::Approved { .. }));
//! assert_eq!(service.poll(&session.device_code).unwrap(), PollOutcome::Consumed);
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
