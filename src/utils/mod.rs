//! Shared utility functions for the bridge.
//!
//! Currently holds the bounded retry helper used for callback delivery.

pub mod retry;

pub use retry::{retry_async, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
