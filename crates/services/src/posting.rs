//! Posting gate and post reads.
//!
//! One post per author per local calendar day. The day runs from local
//! midnight to the next local midnight at a fixed UTC offset, so 23:59 and
//! 00:01 fall on different days.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use domains::{
    Achievement, Clock, DomainError, Post, PostId, PostRepository, UserId, UserRepository,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::achievements::AchievementEvaluator;
use crate::locks::KeyedLocks;

/// `[start, end)` of the local day containing `now`, expressed in UTC.
pub fn local_day_window(now: DateTime<Utc>, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let start = (local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc();
    (start, start + Duration::hours(24))
}

/// Input for [`PostService::create_post`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Trims tags, drops empty ones and repeats, keeps first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}

/// Result of a successful [`PostService::create_post`].
#[derive(Debug, Clone)]
pub struct CreatedPost {
    pub post: Post,
    pub unlocked: Vec<Achievement>,
}

pub struct PostService {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    achievements: Arc<AchievementEvaluator>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    author_locks: KeyedLocks<UserId>,
}

impl PostService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        achievements: Arc<AchievementEvaluator>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self { users, posts, achievements, clock, offset, author_locks: KeyedLocks::new() }
    }

    /// Whether `author_id` has no post yet in the local day containing `now`.
    pub async fn can_post(&self, author_id: UserId, now: DateTime<Utc>) -> Result<bool, DomainError> {
        let (start, end) = local_day_window(now, self.offset);
        let today = self.posts.list_by_author_between(author_id, start, end).await?;
        Ok(today.is_empty())
    }

    /// Creates a post if the author has not posted today, bumps their post
    /// count in the same store write and grants any achievements that unlocks.
    #[instrument(skip(self, new_post), fields(author = %author_id))]
    pub async fn create_post(&self, author_id: UserId, new_post: NewPost) -> Result<CreatedPost, DomainError> {
        let title = new_post.title.trim().to_string();
        let content = new_post.content.trim().to_string();
        if title.is_empty() {
            return Err(DomainError::Validation("title must not be empty".into()));
        }
        if content.is_empty() {
            return Err(DomainError::Validation("content must not be empty".into()));
        }

        if self.users.find_by_id(author_id).await?.is_none() {
            return Err(DomainError::not_found("user", author_id));
        }

        let post = {
            // The store enforces the daily limit on its own; this only keeps
            // one author's requests from racing each other in this process.
            let _author = self.author_locks.lock(author_id).await;
            let now = self.clock.now();
            let (day_start, day_end) = local_day_window(now, self.offset);

            let draft = Post {
                id: PostId::new(),
                author_id,
                title,
                content,
                score: 0,
                tags: normalize_tags(new_post.tags),
                created_at: now,
                updated_at: now,
            };
            self.posts.create_first_of_day(draft, day_start, day_end).await.inspect_err(|err| {
                if err.reason() == "already_posted_today" {
                    warn!("second post in one day rejected");
                }
            })?
        };

        info!(post_id = %post.id, "post created");
        let unlocked = self.achievements.evaluate_user(author_id).await?;
        Ok(CreatedPost { post, unlocked })
    }

    pub async fn get_post(&self, post_id: PostId) -> Result<Post, DomainError> {
        self.posts
            .find_by_id(post_id)
            .await?
            .ok_or_else(|| DomainError::not_found("post", post_id))
    }

    /// Every post, highest score first.
    pub async fn all_posts(&self) -> Result<Vec<Post>, DomainError> {
        self.posts.list_by_score_desc().await
    }

    pub async fn top_posts(&self, limit: usize) -> Result<Vec<Post>, DomainError> {
        let mut posts = self.posts.list_by_score_desc().await?;
        posts.truncate(limit);
        Ok(posts)
    }

    /// An author's posts, newest first.
    pub async fn posts_by_author(&self, author_id: UserId) -> Result<Vec<Post>, DomainError> {
        self.posts.list_by_author(author_id).await
    }
}
