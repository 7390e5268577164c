//! Database models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of children a member can hold
pub const MAX_CHILDREN: usize = 3;

/// Internal member identity (`members.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Child slot under a parent, always 1..=3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u8);

impl Position {
    /// All slots in ascending order
    pub const ALL: [Position; MAX_CHILDREN] = [Position(1), Position(2), Position(3)];

    /// Validate a raw slot number
    pub fn new(raw: i64) -> Option<Self> {
        match raw {
            1..=3 => Some(Position(raw as u8)),
            _ => None,
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Lowest slot not in `occupied`
    pub fn lowest_free(occupied: &[Position]) -> Option<Position> {
        Self::ALL.into_iter().find(|p| !occupied.contains(p))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Member row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub wallet: String,
    pub activation_order: i64,
    pub joined_at_ms: i64,
    /// Root of the tree this member belongs to; `None` until placed
    pub root_id: Option<MemberId>,
    /// Original referrer; `None` for roots
    pub sponsor_id: Option<MemberId>,
}

impl Member {
    /// Root members refer to themselves
    pub fn is_root(&self) -> bool {
        self.root_id == Some(self.id)
    }

    /// Placed members (and roots) carry a root pointer
    pub fn is_placed(&self) -> bool {
        self.root_id.is_some()
    }
}

/// Placement edge: `child` occupies `position` under `parent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub parent_id: MemberId,
    pub child_id: MemberId,
    pub position: Position,
}

/// Closure index row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClosureEntry {
    pub ancestor_id: MemberId,
    pub descendant_id: MemberId,
    pub depth: i64,
}

/// Node with free child capacity, as returned by frontier scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierNode {
    pub node_id: MemberId,
    /// Distance from the scanned subtree root
    pub depth: i64,
    pub joined_at_ms: i64,
    pub child_count: i64,
}
