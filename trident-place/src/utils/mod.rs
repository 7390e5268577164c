//! Utility helpers

pub mod retry;

pub use retry::retry_on_conflict;
