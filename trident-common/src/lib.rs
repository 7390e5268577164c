//! # Trident Common Library
//!
//! Shared code for the trident placement tools including:
//! - Database bootstrap, models and the persistence gateway
//! - Configuration loading
//! - Join-time parsing and wallet normalisation

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod wallet;

pub use error::{Error, Result};
