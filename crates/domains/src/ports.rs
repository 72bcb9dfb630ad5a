//! # Ports
//!
//! Contracts the engine consumes. Storage and identity adapters implement
//! these; the engine only ever sees the traits.
//!
//! Score and counter fields are never written by read-modify-write from the
//! caller. Adapters expose atomic primitives (`VoteRepository::apply`,
//! `PostRepository::create_first_of_day`, `adjust_score`, `reset_all_scores`)
//! so concurrent writers cannot lose each other's updates, and a write that
//! touches several rows lands in full or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::{
    Achievement, Comment, CommentId, IssuedToken, Post, PostId, User, UserId, Vote, VoteChange,
};

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn exists_by_username(&self, username: &str) -> Result<bool>;
    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    /// Fails with `Conflict` if the username or email is already taken.
    async fn create(&self, user: User) -> Result<User>;

    /// Atomically adds `delta` to the user's total score.
    async fn adjust_score(&self, id: UserId, delta: i64) -> Result<User>;

    async fn list_all(&self) -> Result<Vec<User>>;

    /// All users by total score descending.
    async fn list_by_score_desc(&self) -> Result<Vec<User>>;

    /// Publishes a full rank assignment. Readers observe either the previous
    /// assignment or this one, never a mix.
    async fn publish_ranks(&self, ranks: &[(UserId, u32)]) -> Result<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>>;

    /// Stores the post and bumps its author's `posts_count` as one unit.
    ///
    /// Fails with `Conflict(ALREADY_POSTED_TODAY)` if the author already has
    /// a post created in `[day_start, day_end)`, and with `NotFound` if the
    /// author does not exist. On failure nothing is written. The check holds
    /// across every writer of the store, not just this process.
    async fn create_first_of_day(
        &self,
        post: Post,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Post>;

    /// Zeroes every post's per-cycle score; returns how many rows changed.
    async fn reset_all_scores(&self) -> Result<u64>;

    /// All posts by score descending, newest first among equals.
    async fn list_by_score_desc(&self) -> Result<Vec<Post>>;

    /// An author's posts, newest first.
    async fn list_by_author(&self, author_id: UserId) -> Result<Vec<Post>>;

    /// An author's posts created in `[start, end)`.
    async fn list_by_author_between(
        &self,
        author_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Post>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VoteRepository: Send + Sync {
    async fn find(&self, voter_id: UserId, post_id: PostId) -> Result<Option<Vote>>;

    /// Applies a vote transition in one unit: the vote row, the post score
    /// and the author's total. Returns the post as updated.
    ///
    /// Fails with `Conflict` if the stored direction is not `change.from`
    /// (another writer got there first) and with `NotFound` if the post or
    /// its author is missing. On failure nothing is written.
    async fn apply(&self, change: &VoteChange) -> Result<Post>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn find_by_id(&self, id: CommentId) -> Result<Option<Comment>>;
    async fn create(&self, comment: Comment) -> Result<Comment>;

    /// Comments on a post in creation order.
    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>>;

    /// Direct replies to a comment in creation order.
    async fn list_replies(&self, parent_id: CommentId) -> Result<Vec<Comment>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AchievementRepository: Send + Sync {
    /// A user's achievements, most recently unlocked first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Achievement>>;

    /// Fails with `Conflict` if the user already holds one with this name.
    async fn create(&self, achievement: Achievement) -> Result<Achievement>;
}

/// One-way password hashing used at registration and login.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Issues and resolves opaque bearer credentials.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedToken>;
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<UserId>;
}

/// Source of "now". Swapped for a manual clock in tests.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
