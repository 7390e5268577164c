//! Ternary placement: closure index and placement engine

pub mod closure;
pub mod engine;

pub use closure::{ClosureIndex, ClosureReport, DepthMismatch};
pub use engine::{PlacementEngine, PlacementOutcome};
