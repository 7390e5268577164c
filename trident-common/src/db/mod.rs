//! Database bootstrap, models and the persistence gateway

pub mod gateway;
pub mod init;
pub mod models;

pub use gateway::*;
pub use init::*;
pub use models::*;
