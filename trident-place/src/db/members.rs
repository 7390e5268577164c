//! Member repository
//!
//! All access goes through the [`Gateway`] seam so the placement core and
//! the import driver share one view of storage.

use trident_common::db::{
    ClosureEntry, Gateway, GatewayError, Member, MemberId, Placement, Position, Row, Statement,
};

const MEMBER_COLUMNS: &str = "id, wallet, activation_order, joined_at_ms, root_id, sponsor_id";

/// Member to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewMember {
    pub wallet: String,
    pub activation_order: i64,
    pub joined_at_ms: i64,
    /// Roots are self-referring origins of their own tree
    pub is_root: bool,
}

/// Create a member together with its self closure entry.
///
/// Roots get `root_id = id` in the same unit; everyone else stays unplaced
/// until the placement engine commits.
pub async fn create_member(gateway: &dyn Gateway, new: &NewMember) -> Result<MemberId, GatewayError> {
    let mut writes = vec![
        Statement::new(
            "INSERT INTO members (wallet, activation_order, joined_at_ms) VALUES (?, ?, ?)",
        )
        .bind(new.wallet.as_str())
        .bind(new.activation_order)
        .bind(new.joined_at_ms),
        Statement::new(
            r#"
            INSERT OR IGNORE INTO member_closure (ancestor_id, descendant_id, depth)
            SELECT id, id, 0 FROM members WHERE wallet = ?
            "#,
        )
        .bind(new.wallet.as_str()),
    ];

    if new.is_root {
        writes.push(
            Statement::new("UPDATE members SET root_id = id WHERE wallet = ?")
                .bind(new.wallet.as_str()),
        );
    }

    gateway.execute_atomic(&writes).await?;

    let member = find_by_wallet(gateway, &new.wallet).await?.ok_or_else(|| {
        GatewayError::Failure(format!("member {} missing after insert", new.wallet))
    })?;

    tracing::debug!(
        member = %member.id,
        activation = new.activation_order,
        root = new.is_root,
        "Created member"
    );

    Ok(member.id)
}

/// Load member by internal identity
pub async fn load_member(gateway: &dyn Gateway, id: MemberId) -> Result<Option<Member>, GatewayError> {
    let sql = format!("SELECT {} FROM members WHERE id = ?", MEMBER_COLUMNS);
    gateway
        .query_first(&Statement::new(sql).bind(id))
        .await?
        .map(|row| member_from_row(&row))
        .transpose()
}

/// Load member by wallet (case-insensitive)
pub async fn find_by_wallet(gateway: &dyn Gateway, wallet: &str) -> Result<Option<Member>, GatewayError> {
    let sql = format!("SELECT {} FROM members WHERE wallet = ?", MEMBER_COLUMNS);
    gateway
        .query_first(&Statement::new(sql).bind(wallet.trim()))
        .await?
        .map(|row| member_from_row(&row))
        .transpose()
}

/// All members in activation order
pub async fn all_members(gateway: &dyn Gateway) -> Result<Vec<Member>, GatewayError> {
    let sql = format!("SELECT {} FROM members ORDER BY activation_order", MEMBER_COLUMNS);
    gateway
        .query(&Statement::new(sql))
        .await?
        .iter()
        .map(member_from_row)
        .collect()
}

/// Highest stored activation order
pub async fn max_activation_order(gateway: &dyn Gateway) -> Result<Option<i64>, GatewayError> {
    let row = gateway
        .query_first(&Statement::new("SELECT MAX(activation_order) FROM members"))
        .await?;
    match row {
        Some(row) => row.opt_int(0),
        None => Ok(None),
    }
}

/// Highest activation order among members already in a tree
pub async fn max_placed_activation_order(gateway: &dyn Gateway) -> Result<Option<i64>, GatewayError> {
    let row = gateway
        .query_first(&Statement::new(
            "SELECT MAX(activation_order) FROM members WHERE root_id IS NOT NULL",
        ))
        .await?;
    match row {
        Some(row) => row.opt_int(0),
        None => Ok(None),
    }
}

pub async fn member_count(gateway: &dyn Gateway) -> Result<i64, GatewayError> {
    let row = gateway
        .query_first(&Statement::new("SELECT COUNT(*) FROM members"))
        .await?;
    row.map(|r| r.int(0)).transpose().map(|v| v.unwrap_or(0))
}

/// Placement edge holding `child`, if any
pub async fn parent_of(gateway: &dyn Gateway, child: MemberId) -> Result<Option<Placement>, GatewayError> {
    gateway
        .query_first(
            &Statement::new("SELECT parent_id, child_id, position FROM placements WHERE child_id = ?")
                .bind(child),
        )
        .await?
        .map(|row| placement_from_row(&row))
        .transpose()
}

/// Direct children ordered by position
pub async fn children_of(gateway: &dyn Gateway, parent: MemberId) -> Result<Vec<Placement>, GatewayError> {
    gateway
        .query(
            &Statement::new(
                "SELECT parent_id, child_id, position FROM placements WHERE parent_id = ? ORDER BY position",
            )
            .bind(parent),
        )
        .await?
        .iter()
        .map(placement_from_row)
        .collect()
}

/// Strict ancestors from the closure index, nearest first
pub async fn ancestors_of(gateway: &dyn Gateway, member: MemberId) -> Result<Vec<ClosureEntry>, GatewayError> {
    gateway
        .query(
            &Statement::new(
                r#"
                SELECT ancestor_id, descendant_id, depth FROM member_closure
                WHERE descendant_id = ? AND depth > 0
                ORDER BY depth
                "#,
            )
            .bind(member),
        )
        .await?
        .iter()
        .map(closure_from_row)
        .collect()
}

/// Number of descendants (excluding self) in the closure index
pub async fn descendant_count(gateway: &dyn Gateway, member: MemberId) -> Result<i64, GatewayError> {
    let row = gateway
        .query_first(
            &Statement::new(
                "SELECT COUNT(*) FROM member_closure WHERE ancestor_id = ? AND depth > 0",
            )
            .bind(member),
        )
        .await?;
    row.map(|r| r.int(0)).transpose().map(|v| v.unwrap_or(0))
}

pub(crate) fn member_from_row(row: &Row) -> Result<Member, GatewayError> {
    Ok(Member {
        id: row.member_id(0)?,
        wallet: row.text(1)?,
        activation_order: row.int(2)?,
        joined_at_ms: row.int(3)?,
        root_id: row.opt_member_id(4)?,
        sponsor_id: row.opt_member_id(5)?,
    })
}

pub(crate) fn placement_from_row(row: &Row) -> Result<Placement, GatewayError> {
    let raw_position = row.int(2)?;
    let position = Position::new(raw_position)
        .ok_or_else(|| GatewayError::Failure(format!("invalid stored position {}", raw_position)))?;

    Ok(Placement {
        parent_id: row.member_id(0)?,
        child_id: row.member_id(1)?,
        position,
    })
}

pub(crate) fn closure_from_row(row: &Row) -> Result<ClosureEntry, GatewayError> {
    Ok(ClosureEntry {
        ancestor_id: row.member_id(0)?,
        descendant_id: row.member_id(1)?,
        depth: row.int(2)?,
    })
}
