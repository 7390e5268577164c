//! Member storage through the persistence gateway

pub mod members;
