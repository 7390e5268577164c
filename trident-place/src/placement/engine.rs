//! Placement engine
//!
//! Decides where a new member goes under its sponsor and commits the edge,
//! the closure fan-out and the member's ancestry pointers as one unit.
//!
//! **Algorithm:**
//! 1. Sponsor has fewer than three children: place directly under the sponsor.
//! 2. Otherwise take the first node of the sponsor's BFS frontier
//!    (depth, join time, identity ascending).
//! 3. Claim the lowest free position at that parent. A uniqueness conflict on
//!    (parent, position) re-reads the parent's positions and tries the next
//!    free one; once all three are gone the attempt ends in
//!    `PlacementConflict` without re-running candidate selection.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use trident_common::db::{Gateway, MemberId, Position, Statement, MAX_CHILDREN};

use super::closure::ClosureIndex;
use crate::db::members;
use crate::error::PlacementError;

/// Committed placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacementOutcome {
    pub member_id: MemberId,
    pub sponsor_id: MemberId,
    pub parent_id: MemberId,
    pub position: Position,
    /// Depth of the chosen parent below the sponsor (0 = direct)
    pub parent_depth: i64,
    /// Commit attempts used, including the successful one
    pub attempts: u32,
}

impl PlacementOutcome {
    /// Placed somewhere other than directly under the sponsor
    pub fn is_spillover(&self) -> bool {
        self.parent_id != self.sponsor_id
    }
}

/// Result of one commit attempt
enum CommitAttempt {
    Committed,
    /// (parent, position) was claimed first by someone else
    PositionTaken,
}

/// Placement engine
pub struct PlacementEngine {
    gateway: Arc<dyn Gateway>,
    closure: ClosureIndex,
}

impl PlacementEngine {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        let closure = ClosureIndex::new(gateway.clone());
        Self { gateway, closure }
    }

    pub fn closure(&self) -> &ClosureIndex {
        &self.closure
    }

    /// Place `member_id` in the tree of `sponsor_id`.
    ///
    /// Both members must exist; the sponsor must already be placed (or be a
    /// root) and the member must not be.
    pub async fn place(
        &self,
        sponsor_id: MemberId,
        member_id: MemberId,
    ) -> Result<PlacementOutcome, PlacementError> {
        let gateway = self.gateway.as_ref();

        let sponsor = members::load_member(gateway, sponsor_id)
            .await?
            .ok_or(PlacementError::UnknownSponsor(sponsor_id))?;
        if !sponsor.is_placed() {
            return Err(PlacementError::UnplacedSponsor(sponsor_id));
        }

        let member = members::load_member(gateway, member_id)
            .await?
            .ok_or(PlacementError::UnknownMember(member_id))?;
        if member.is_placed() || members::parent_of(gateway, member_id).await?.is_some() {
            return Err(PlacementError::AlreadyPlaced(member_id));
        }

        let (parent_id, parent_depth) = self.select_parent(sponsor_id).await?;
        let (position, attempts) = self.commit(sponsor_id, member_id, parent_id).await?;

        let outcome = PlacementOutcome {
            member_id,
            sponsor_id,
            parent_id,
            position,
            parent_depth,
            attempts,
        };

        if outcome.is_spillover() {
            info!(
                member = %member_id,
                sponsor = %sponsor_id,
                parent = %parent_id,
                position = %position,
                depth = parent_depth + 1,
                "Placed by spillover"
            );
        } else {
            debug!(
                member = %member_id,
                sponsor = %sponsor_id,
                position = %position,
                "Placed directly under sponsor"
            );
        }

        Ok(outcome)
    }

    /// Parent for the next member under `sponsor_id`, with its depth below the sponsor
    async fn select_parent(&self, sponsor_id: MemberId) -> Result<(MemberId, i64), PlacementError> {
        let direct = self.closure.child_count(sponsor_id).await?;
        if direct < MAX_CHILDREN as i64 {
            return Ok((sponsor_id, 0));
        }

        match self.closure.next_free_node(sponsor_id).await? {
            Some(node) => {
                debug!(
                    sponsor = %sponsor_id,
                    candidate = %node.node_id,
                    depth = node.depth,
                    children = node.child_count,
                    "Sponsor full, spilling over"
                );
                Ok((node.node_id, node.depth))
            }
            None => Err(PlacementError::NoAvailableSlot { sponsor_id }),
        }
    }

    /// Claim a position at `parent_id`, retrying on position conflicts
    async fn commit(
        &self,
        sponsor_id: MemberId,
        member_id: MemberId,
        parent_id: MemberId,
    ) -> Result<(Position, u32), PlacementError> {
        let max_attempts = MAX_CHILDREN as u32;
        let mut attempt = 0u32;

        loop {
            let occupied = self.closure.occupied_positions(parent_id).await?;
            let Some(position) = Position::lowest_free(&occupied) else {
                warn!(
                    member = %member_id,
                    parent = %parent_id,
                    attempts = attempt,
                    "Every position at the chosen parent is taken"
                );
                return Err(PlacementError::PlacementConflict {
                    parent_id,
                    attempts: attempt,
                });
            };

            attempt += 1;
            match self.try_commit(sponsor_id, member_id, parent_id, position).await? {
                CommitAttempt::Committed => return Ok((position, attempt)),
                CommitAttempt::PositionTaken if attempt < max_attempts => {
                    warn!(
                        member = %member_id,
                        parent = %parent_id,
                        position = %position,
                        attempt,
                        "Position claimed concurrently, retrying"
                    );
                }
                CommitAttempt::PositionTaken => {
                    return Err(PlacementError::PlacementConflict {
                        parent_id,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    async fn try_commit(
        &self,
        sponsor_id: MemberId,
        member_id: MemberId,
        parent_id: MemberId,
        position: Position,
    ) -> Result<CommitAttempt, PlacementError> {
        let writes = Self::commit_statements(sponsor_id, member_id, parent_id, position);

        match self.gateway.execute_atomic(&writes).await {
            Ok(()) => Ok(CommitAttempt::Committed),
            Err(err) if err.violates("placements.position") => Ok(CommitAttempt::PositionTaken),
            Err(err) if err.violates("placements.child_id") => {
                Err(PlacementError::AlreadyPlaced(member_id))
            }
            Err(err) => Err(PlacementError::Gateway(err)),
        }
    }

    /// The four effects of a placement, in commit order
    fn commit_statements(
        sponsor_id: MemberId,
        member_id: MemberId,
        parent_id: MemberId,
        position: Position,
    ) -> Vec<Statement> {
        let mut writes = vec![Statement::new(
            "INSERT INTO placements (parent_id, child_id, position) VALUES (?, ?, ?)",
        )
        .bind(parent_id)
        .bind(member_id)
        .bind(position)];

        writes.extend(ClosureIndex::fanout_statements(parent_id, member_id));

        writes.push(
            Statement::new(
                r#"
                UPDATE members
                SET root_id = (SELECT root_id FROM members WHERE id = ?),
                    sponsor_id = ?
                WHERE id = ?
                "#,
            )
            .bind(parent_id)
            .bind(sponsor_id)
            .bind(member_id),
        );

        writes
    }
}
