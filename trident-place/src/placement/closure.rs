//! Closure index maintenance
//!
//! `member_closure` holds one row per (ancestor, descendant) pair including
//! self pairs at depth 0, so subtree and ancestry questions are answered by a
//! single indexed scan. Capacity facts (child counts, free positions, the
//! BFS frontier) are always derived from committed `placements` rows and
//! never cached.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use trident_common::db::{
    ClosureEntry, FrontierNode, Gateway, GatewayError, MemberId, Position, Statement, MAX_CHILDREN,
};

use crate::db::members;

/// Frontier query; callers append `LIMIT` as needed
const FRONTIER_SQL: &str = r#"
    SELECT node_id, depth, joined_at_ms, child_count FROM (
        SELECT c.descendant_id AS node_id,
               c.depth AS depth,
               m.joined_at_ms AS joined_at_ms,
               m.id AS member_id,
               (SELECT COUNT(*) FROM placements p WHERE p.parent_id = c.descendant_id) AS child_count
        FROM member_closure c
        JOIN members m ON m.id = c.descendant_id
        WHERE c.ancestor_id = ?
    )
    WHERE child_count < ?
    ORDER BY depth ASC, joined_at_ms ASC, member_id ASC
"#;

/// Read side of the closure index plus the fan-out write statements
#[derive(Clone)]
pub struct ClosureIndex {
    gateway: Arc<dyn Gateway>,
}

impl ClosureIndex {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Number of placement edges with `node` as parent (0..=3)
    pub async fn child_count(&self, node: MemberId) -> Result<i64, GatewayError> {
        let row = self
            .gateway
            .query_first(&Statement::new("SELECT COUNT(*) FROM placements WHERE parent_id = ?").bind(node))
            .await?;
        row.map(|r| r.int(0)).transpose().map(|v| v.unwrap_or(0))
    }

    /// Positions already taken under `node`, ascending
    pub async fn occupied_positions(&self, node: MemberId) -> Result<Vec<Position>, GatewayError> {
        let rows = self
            .gateway
            .query(
                &Statement::new("SELECT position FROM placements WHERE parent_id = ? ORDER BY position")
                    .bind(node),
            )
            .await?;

        rows.iter()
            .map(|row| {
                let raw = row.int(0)?;
                Position::new(raw)
                    .ok_or_else(|| GatewayError::Failure(format!("invalid stored position {}", raw)))
            })
            .collect()
    }

    /// Every node reachable from `root` (inclusive, depth 0) with free
    /// capacity, ordered by depth, then join time, then identity.
    pub async fn subtree_frontier(&self, root: MemberId) -> Result<Vec<FrontierNode>, GatewayError> {
        self.frontier(root, None).await
    }

    /// First node of [`subtree_frontier`](Self::subtree_frontier)
    pub async fn next_free_node(&self, root: MemberId) -> Result<Option<FrontierNode>, GatewayError> {
        Ok(self.frontier(root, Some(1)).await?.into_iter().next())
    }

    async fn frontier(&self, root: MemberId, limit: Option<usize>) -> Result<Vec<FrontierNode>, GatewayError> {
        let mut sql = FRONTIER_SQL.to_string();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = self
            .gateway
            .query(&Statement::new(sql).bind(root).bind(MAX_CHILDREN as i64))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FrontierNode {
                    node_id: row.member_id(0)?,
                    depth: row.int(1)?,
                    joined_at_ms: row.int(2)?,
                    child_count: row.int(3)?,
                })
            })
            .collect()
    }

    /// Closure writes for attaching `child` under `parent`.
    ///
    /// The self entry is idempotent. The fan-out copies every ancestor row of
    /// `parent` (its self row included) one level deeper for `child`, and is
    /// evaluated inside the commit so it sees the parent's committed ancestry.
    pub fn fanout_statements(parent: MemberId, child: MemberId) -> Vec<Statement> {
        vec![
            Statement::new(
                "INSERT OR IGNORE INTO member_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, 0)",
            )
            .bind(child)
            .bind(child),
            Statement::new(
                r#"
                INSERT INTO member_closure (ancestor_id, descendant_id, depth)
                SELECT ancestor_id, ?, depth + 1 FROM member_closure WHERE descendant_id = ?
                "#,
            )
            .bind(child)
            .bind(parent),
        ]
    }

    /// Recompute the closure from placement edges and compare it with the
    /// stored index. Also checks capacity and root pointers.
    pub async fn verify(&self) -> Result<ClosureReport, GatewayError> {
        let gateway = self.gateway.as_ref();
        let all_members = members::all_members(gateway).await?;

        let placement_rows = gateway
            .query(&Statement::new("SELECT parent_id, child_id, position FROM placements"))
            .await?;
        let placements = placement_rows
            .iter()
            .map(members::placement_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let closure_rows = gateway
            .query(&Statement::new(
                "SELECT ancestor_id, descendant_id, depth FROM member_closure",
            ))
            .await?;
        let stored: HashMap<(MemberId, MemberId), i64> = closure_rows
            .iter()
            .map(members::closure_from_row)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| ((e.ancestor_id, e.descendant_id), e.depth))
            .collect();

        let mut report = ClosureReport {
            members_checked: all_members.len(),
            placements_checked: placements.len(),
            entries_checked: stored.len(),
            ..Default::default()
        };

        let mut parent_of: HashMap<MemberId, MemberId> = HashMap::new();
        let mut positions: BTreeMap<MemberId, Vec<Position>> = BTreeMap::new();
        for edge in &placements {
            parent_of.insert(edge.child_id, edge.parent_id);
            positions.entry(edge.parent_id).or_default().push(edge.position);
        }

        for (parent, used) in &positions {
            let distinct: BTreeSet<_> = used.iter().collect();
            if used.len() > MAX_CHILDREN || distinct.len() != used.len() {
                report.over_capacity.push(*parent);
            }
        }

        let root_of: HashMap<MemberId, Option<MemberId>> =
            all_members.iter().map(|m| (m.id, m.root_id)).collect();

        let mut expected: HashMap<(MemberId, MemberId), i64> = HashMap::new();
        for member in &all_members {
            expected.insert((member.id, member.id), 0);

            let mut seen = BTreeSet::from([member.id]);
            let mut current = member.id;
            let mut depth = 0;
            while let Some(&parent) = parent_of.get(&current) {
                if !seen.insert(parent) {
                    report.cycles.push(member.id);
                    break;
                }
                depth += 1;
                expected.insert((parent, member.id), depth);
                current = parent;
            }

            // Placed members inherit their parent's root
            if let Some(&parent) = parent_of.get(&member.id) {
                let parent_root = root_of.get(&parent).copied().flatten();
                if member.root_id.is_none() || member.root_id != parent_root {
                    report.root_mismatches.push(member.id);
                }
            }
        }

        for (&(ancestor_id, descendant_id), &depth) in &expected {
            match stored.get(&(ancestor_id, descendant_id)) {
                None => report.missing.push(ClosureEntry {
                    ancestor_id,
                    descendant_id,
                    depth,
                }),
                Some(&actual) if actual != depth => report.wrong_depth.push(DepthMismatch {
                    ancestor_id,
                    descendant_id,
                    expected: depth,
                    actual,
                }),
                Some(_) => {}
            }
        }

        for (&(ancestor_id, descendant_id), &depth) in &stored {
            if !expected.contains_key(&(ancestor_id, descendant_id)) {
                report.unexpected.push(ClosureEntry {
                    ancestor_id,
                    descendant_id,
                    depth,
                });
            }
        }

        report.missing.sort();
        report.unexpected.sort();
        report
            .wrong_depth
            .sort_by_key(|m| (m.ancestor_id, m.descendant_id));

        Ok(report)
    }
}

/// Stored closure row whose depth disagrees with the edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthMismatch {
    pub ancestor_id: MemberId,
    pub descendant_id: MemberId,
    pub expected: i64,
    pub actual: i64,
}

/// Outcome of [`ClosureIndex::verify`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClosureReport {
    pub members_checked: usize,
    pub placements_checked: usize,
    pub entries_checked: usize,
    /// Entries implied by edges but absent from the index
    pub missing: Vec<ClosureEntry>,
    /// Indexed entries no edge path explains
    pub unexpected: Vec<ClosureEntry>,
    pub wrong_depth: Vec<DepthMismatch>,
    /// Parents with more than three edges or repeated positions
    pub over_capacity: Vec<MemberId>,
    /// Placed members whose root pointer differs from their parent's
    pub root_mismatches: Vec<MemberId>,
    pub cycles: Vec<MemberId>,
}

impl ClosureReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.wrong_depth.is_empty()
            && self.over_capacity.is_empty()
            && self.root_mismatches.is_empty()
            && self.cycles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trident_common::db::SqlValue;

    #[test]
    fn test_fanout_statements_shape() {
        let writes = ClosureIndex::fanout_statements(MemberId(4), MemberId(9));

        assert_eq!(writes.len(), 2);
        assert!(writes[0].sql.contains("INSERT OR IGNORE"));
        assert_eq!(writes[0].params, vec![SqlValue::Integer(9), SqlValue::Integer(9)]);
        assert!(writes[1].sql.contains("depth + 1"));
        assert_eq!(writes[1].params, vec![SqlValue::Integer(9), SqlValue::Integer(4)]);
    }

    #[test]
    fn test_empty_report_is_consistent() {
        assert!(ClosureReport::default().is_consistent());

        let report = ClosureReport {
            cycles: vec![MemberId(1)],
            ..Default::default()
        };
        assert!(!report.is_consistent());
    }
}
