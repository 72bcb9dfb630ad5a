//! # Domain Models
//!
//! These structs represent the core entities of the scoring platform.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// A fresh time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Identifies a registered member.
    UserId
);
entity_id!(PostId);
entity_id!(VoteId);
entity_id!(CommentId);
entity_id!(AchievementId);

/// A registered member and their cached standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Unique, compared case-insensitively
    pub username: String,
    /// Unique, compared case-insensitively
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub avatar: Option<String>,
    /// Lifetime score; may go negative
    pub total_score: i64,
    /// 1-based position from the last ranking run, 0 when unranked.
    /// A cached snapshot, not derived live from `total_score`.
    pub rank: u32,
    pub posts_count: u32,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// A freshly registered user: no score, no rank, no posts.
    pub fn new(username: String, email: String, password_hash: String, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            username,
            email,
            password_hash,
            avatar: None,
            total_score: 0,
            rank: 0,
            posts_count: 0,
            joined_at,
        }
    }

    pub fn is_ranked(&self) -> bool {
        self.rank > 0
    }
}

/// A daily submission. `score` is per-cycle and is zeroed by the daily reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    pub score: i64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Polarity of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// +1 for `Up`, -1 for `Down`.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            other => Err(DomainError::Validation(format!("unknown vote direction '{other}'"))),
        }
    }
}

/// One voter's standing opinion on one post. At most one per (voter, post).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub voter_id: UserId,
    pub post_id: PostId,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

/// One resolved vote transition, applied by the store as a single unit: the
/// vote row moves from `from` to `to`, the post score by `post_delta` and the
/// author's total by `author_delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteChange {
    pub voter_id: UserId,
    pub post_id: PostId,
    /// Id given to the row when `from` is empty and `to` is not.
    pub vote_id: VoteId,
    pub from: Option<Direction>,
    pub to: Option<Direction>,
    pub post_delta: i64,
    pub author_delta: i64,
    pub at: DateTime<Utc>,
}

/// A reply on a post. Replies to other comments reference their parent by id;
/// the tree is an arena keyed by `CommentId`, never a linked object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author_id: UserId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

/// A permanent badge. Append-only; at most one per (user, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub unlocked_at: DateTime<Utc>,
}

/// Bearer credential handed out by the identity adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}
