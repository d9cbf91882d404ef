//! XPBoard Session Validity
//!
//! This crate decides whether the stored bearer token is still usable:
//! - Token decoding and expiry checks
//! - The persistent storage slot holding `token` and `user`
//! - A monitor that re-checks on a timer and on storage/focus events and
//!   emits a redirect-to-login intent when the session is gone

pub mod monitor;
pub mod storage;
pub mod token;

pub use monitor::{
    Clock, LogNavigator, MonitorConfig, MonitorHandle, Navigator, SystemClock, Trigger,
    ValidityMonitor,
};
pub use storage::{
    FileStorage, MemoryStorage, StorageError, StorageEvent, StorageOrigin, TOKEN_KEY,
    TokenStorage, USER_KEY,
};
pub use token::{TokenError, TokenStatus};
