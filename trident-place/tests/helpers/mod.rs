//! Shared test utilities
//!
//! Each test gets its own temporary database; the TempDir must be kept alive
//! for the duration of the test.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use trident_common::db::{Gateway, MemberId, SqliteGateway};
use trident_place::db::members::{self, NewMember};
use trident_place::import::MemberRecord;
use trident_place::{PlacementEngine, PlacementOutcome};

/// One minute in milliseconds; test members join one minute apart
pub const MINUTE_MS: i64 = 60_000;

/// Create temporary test database with schema applied
pub async fn create_test_gateway() -> (TempDir, Arc<SqliteGateway>) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_trident.db");
    let gateway = trident_place::open_gateway(&db_path).await.unwrap();
    (temp_dir, gateway)
}

/// Create a root member
pub async fn add_root(gateway: &dyn Gateway, wallet: &str, order: i64) -> MemberId {
    members::create_member(
        gateway,
        &NewMember {
            wallet: wallet.to_string(),
            activation_order: order,
            joined_at_ms: order * MINUTE_MS,
            is_root: true,
        },
    )
    .await
    .unwrap()
}

/// Create an unplaced member joining `order` minutes after the epoch
pub async fn add_member(gateway: &dyn Gateway, wallet: &str, order: i64) -> MemberId {
    add_member_joined(gateway, wallet, order, order * MINUTE_MS).await
}

/// Create an unplaced member with an explicit join time
pub async fn add_member_joined(gateway: &dyn Gateway, wallet: &str, order: i64, joined_at_ms: i64) -> MemberId {
    members::create_member(
        gateway,
        &NewMember {
            wallet: wallet.to_string(),
            activation_order: order,
            joined_at_ms,
            is_root: false,
        },
    )
    .await
    .unwrap()
}

/// Create a member and place it under `sponsor`
pub async fn add_and_place(
    engine: &PlacementEngine,
    gateway: &dyn Gateway,
    sponsor: MemberId,
    wallet: &str,
    order: i64,
) -> (MemberId, PlacementOutcome) {
    let id = add_member(gateway, wallet, order).await;
    let outcome = engine.place(sponsor, id).await.unwrap();
    (id, outcome)
}

/// All edges as (parent, child, position), ordered by child
pub async fn edges(gateway: &SqliteGateway) -> Vec<(i64, i64, i64)> {
    sqlx::query_as("SELECT parent_id, child_id, position FROM placements ORDER BY child_id")
        .fetch_all(gateway.pool())
        .await
        .unwrap()
}

/// Closure-completeness violations: edges (p, c) with an entry (a, p, d)
/// but no entry (a, c, d + 1)
pub async fn closure_gaps(gateway: &SqliteGateway) -> i64 {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM placements e
        JOIN member_closure ap ON ap.descendant_id = e.parent_id
        LEFT JOIN member_closure ac
            ON ac.ancestor_id = ap.ancestor_id
           AND ac.descendant_id = e.child_id
           AND ac.depth = ap.depth + 1
        WHERE ac.ancestor_id IS NULL
        "#,
    )
    .fetch_one(gateway.pool())
    .await
    .unwrap()
}

/// Build a member record as it would come out of a CSV export
pub fn record(order: i64, wallet: &str, referrer: &str) -> MemberRecord {
    MemberRecord {
        row: order as usize + 1,
        wallet: wallet.to_string(),
        referrer: referrer.to_string(),
        activation_order: order,
        joined_at: None,
    }
}
