//! Repository wrappers that delegate to the in-memory store but can stall or
//! fail on demand, for driving the engine through store outages and races.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    DomainError, Post, PostId, PostRepository, Result, User, UserId, UserRepository, Vote,
    VoteChange, VoteRepository,
};
use storage_adapters::InMemoryStore;

fn outage() -> DomainError {
    DomainError::Storage("connection reset by peer".into())
}

/// Posts that can stall the daily score reset or fail the next create.
pub struct FaultyPosts {
    inner: Arc<InMemoryStore>,
    reset_stall: Duration,
    fail_next_create: AtomicBool,
}

impl FaultyPosts {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self { inner, reset_stall: Duration::ZERO, fail_next_create: AtomicBool::new(false) }
    }

    pub fn stalling_reset(mut self, stall: Duration) -> Self {
        self.reset_stall = stall;
        self
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PostRepository for FaultyPosts {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>> {
        PostRepository::find_by_id(&*self.inner, id).await
    }

    async fn create_first_of_day(
        &self,
        post: Post,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Post> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.create_first_of_day(post, day_start, day_end).await
    }

    async fn reset_all_scores(&self) -> Result<u64> {
        tokio::time::sleep(self.reset_stall).await;
        self.inner.reset_all_scores().await
    }

    async fn list_by_score_desc(&self) -> Result<Vec<Post>> {
        PostRepository::list_by_score_desc(&*self.inner).await
    }

    async fn list_by_author(&self, author_id: UserId) -> Result<Vec<Post>> {
        self.inner.list_by_author(author_id).await
    }

    async fn list_by_author_between(
        &self,
        author_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        self.inner.list_by_author_between(author_id, start, end).await
    }
}

/// Votes whose next `apply` can be made to fail before it reaches the store.
pub struct FaultyVotes {
    inner: Arc<InMemoryStore>,
    fail_next_apply: AtomicBool,
}

impl FaultyVotes {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self { inner, fail_next_apply: AtomicBool::new(false) }
    }

    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoteRepository for FaultyVotes {
    async fn find(&self, voter_id: UserId, post_id: PostId) -> Result<Option<Vote>> {
        self.inner.find(voter_id, post_id).await
    }

    async fn apply(&self, change: &VoteChange) -> Result<Post> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.apply(change).await
    }
}

/// Users whose leaderboard read and rank publish take a fixed extra delay.
/// Counts the publishes that actually reached the store.
pub struct SlowUsers {
    inner: Arc<InMemoryStore>,
    list_delay: Duration,
    publish_delay: Duration,
    published: AtomicUsize,
}

impl SlowUsers {
    pub fn new(inner: Arc<InMemoryStore>, list_delay: Duration, publish_delay: Duration) -> Self {
        Self { inner, list_delay, publish_delay, published: AtomicUsize::new(0) }
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserRepository for SlowUsers {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        UserRepository::find_by_id(&*self.inner, id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.inner.find_by_username(username).await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        self.inner.exists_by_username(username).await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        self.inner.exists_by_email(email).await
    }

    async fn create(&self, user: User) -> Result<User> {
        UserRepository::create(&*self.inner, user).await
    }

    async fn adjust_score(&self, id: UserId, delta: i64) -> Result<User> {
        self.inner.adjust_score(id, delta).await
    }

    async fn list_all(&self) -> Result<Vec<User>> {
        self.inner.list_all().await
    }

    async fn list_by_score_desc(&self) -> Result<Vec<User>> {
        tokio::time::sleep(self.list_delay).await;
        UserRepository::list_by_score_desc(&*self.inner).await
    }

    async fn publish_ranks(&self, ranks: &[(UserId, u32)]) -> Result<()> {
        tokio::time::sleep(self.publish_delay).await;
        self.inner.publish_ranks(ranks).await?;
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
