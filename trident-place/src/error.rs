//! Error types for placement and import

use thiserror::Error;
use trident_common::db::{GatewayError, MemberId};

/// Placement failure kinds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    /// Sponsor identity does not resolve to an existing member
    #[error("unknown sponsor {0}")]
    UnknownSponsor(MemberId),

    /// Sponsor exists but is not part of any tree yet
    #[error("sponsor {0} is not placed in any tree")]
    UnplacedSponsor(MemberId),

    /// Member to place does not exist
    #[error("unknown member {0}")]
    UnknownMember(MemberId),

    /// Member already has a placement (or is a root)
    #[error("member {0} is already placed")]
    AlreadyPlaced(MemberId),

    /// Subtree scan found no node with free capacity
    #[error("no available slot in the subtree of sponsor {sponsor_id}")]
    NoAvailableSlot { sponsor_id: MemberId },

    /// Every position at the chosen parent was claimed by concurrent writers
    #[error("all positions under {parent_id} were claimed concurrently ({attempts} commit attempts)")]
    PlacementConflict { parent_id: MemberId, attempts: u32 },

    /// Storage failure unrelated to slot claims
    #[error("gateway failure: {0}")]
    Gateway(#[from] GatewayError),
}

impl PlacementError {
    /// Only slot races are worth re-running candidate selection for
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlacementError::PlacementConflict { .. })
    }
}

/// Per-record import failure; the batch continues past these
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("referrer {referrer} could not be resolved to a placed member")]
    UnknownSponsor { referrer: String },

    #[error("activation order {0} appears more than once in the input")]
    DuplicateActivation(i64),

    #[error("activation order {activation_order} is not after the stored maximum {stored_max}")]
    OutOfOrder { activation_order: i64, stored_max: i64 },

    #[error("wallet {wallet} was already imported with activation order {stored_activation}, not {activation_order}")]
    WalletReused {
        wallet: String,
        activation_order: i64,
        stored_activation: i64,
    },

    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("storage failure: {0}")]
    Gateway(#[from] GatewayError),
}

/// CSV loading failure
#[derive(Error, Debug)]
pub enum RecordsError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("required column not found (accepted names: {0})")]
    MissingColumn(String),
}
