//! trident-place - ternary placement engine and member import
//!
//! Places referred members into capacity-bounded ternary trees, keeping a
//! transitive closure index current with every placement, and imports member
//! exports in activation order.

pub mod audit;
pub mod db;
pub mod error;
pub mod import;
pub mod placement;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use trident_common::db::{init_database, load_setting_i64, SqliteGateway, DEFAULT_MAX_PLACEMENT_ATTEMPTS};

pub use error::{ImportError, PlacementError, RecordsError};
pub use placement::{ClosureIndex, PlacementEngine, PlacementOutcome};

/// Open (or create) the database and wrap it in a gateway
pub async fn open_gateway(db_path: &Path) -> trident_common::Result<Arc<SqliteGateway>> {
    let pool = init_database(db_path).await?;
    Ok(Arc::new(SqliteGateway::new(pool)))
}

/// Stored `max_placement_attempts` setting
pub async fn stored_placement_attempts(gateway: &SqliteGateway) -> trident_common::Result<i64> {
    load_setting_i64(
        gateway.pool(),
        "max_placement_attempts",
        DEFAULT_MAX_PLACEMENT_ATTEMPTS,
    )
    .await
}
