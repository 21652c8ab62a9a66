//! Foundational low-level utilities shared across notegram crates.
//!
//! Provides the atomic file-write helper used for session persistence and the
//! time utilities used by pending-action and continuation expiry checks.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix};
