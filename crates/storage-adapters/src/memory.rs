//! # In-memory Content Store
//!
//! Every table is a `DashMap`, so each row sits behind its shard lock and
//! score changes are applied in place under that lock. Ranks live in their
//! own table that is replaced wholesale on publish: readers see the old
//! assignment or the new one, never half of each.
//!
//! Writes that span tables take their row locks in one fixed order (vote
//! slot, post row, author row) and check every precondition before the first
//! mutation, so a failed write leaves no partial state behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    Achievement, AchievementRepository, Comment, CommentId, CommentRepository, DomainError, Post,
    PostId, PostRepository, Result, User, UserId, UserRepository, Vote, VoteChange,
    VoteRepository, ALREADY_POSTED_TODAY,
};
use tracing::debug;

type RankTable = Arc<HashMap<UserId, u32>>;

#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<UserId, User>,
    usernames: DashMap<String, UserId>,
    emails: DashMap<String, UserId>,
    ranks: RwLock<RankTable>,
    posts: DashMap<PostId, Post>,
    /// Serialises the once-per-day check with the insert it guards.
    post_gate: Mutex<()>,
    votes: DashMap<(UserId, PostId), Vote>,
    comments: DashMap<CommentId, Comment>,
    achievements: DashMap<UserId, Vec<Achievement>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rank_table(&self) -> Result<RankTable> {
        self.ranks
            .read()
            .map(|table| Arc::clone(&table))
            .map_err(|_| DomainError::Invariant("rank table lock poisoned".into()))
    }

    fn with_rank(table: &RankTable, mut user: User) -> User {
        user.rank = table.get(&user.id).copied().unwrap_or(0);
        user
    }

    fn ranked(&self, user: User) -> Result<User> {
        Ok(Self::with_rank(&self.rank_table()?, user))
    }

    fn snapshot_users(&self) -> Result<Vec<User>> {
        let table = self.rank_table()?;
        Ok(self
            .users
            .iter()
            .map(|entry| Self::with_rank(&table, entry.value().clone()))
            .collect())
    }
}

fn key(s: &str) -> String {
    s.trim().to_lowercase()
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let user = self.users.get(&id).map(|u| u.value().clone());
        user.map(|u| self.ranked(u)).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let id = self.usernames.get(&key(username)).map(|id| *id);
        match id {
            Some(id) => UserRepository::find_by_id(self, id).await,
            None => Ok(None),
        }
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        Ok(self.usernames.contains_key(&key(username)))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        Ok(self.emails.contains_key(&key(email)))
    }

    async fn create(&self, user: User) -> Result<User> {
        let username = key(&user.username);
        let email = key(&user.email);

        match self.usernames.entry(username.clone()) {
            Entry::Occupied(_) => return Err(DomainError::Conflict("username already exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }
        match self.emails.entry(email) {
            Entry::Occupied(_) => {
                self.usernames.remove(&username);
                return Err(DomainError::Conflict("email already exists".into()));
            }
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        let mut stored = user;
        stored.rank = 0;
        self.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn adjust_score(&self, id: UserId, delta: i64) -> Result<User> {
        let updated = {
            let mut user = self.users.get_mut(&id).ok_or_else(|| DomainError::not_found("user", id))?;
            user.total_score += delta;
            user.clone()
        };
        self.ranked(updated)
    }

    async fn list_all(&self) -> Result<Vec<User>> {
        let mut users = self.snapshot_users()?;
        users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn list_by_score_desc(&self) -> Result<Vec<User>> {
        let mut users = self.snapshot_users()?;
        users.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then_with(|| a.joined_at.cmp(&b.joined_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(users)
    }

    async fn publish_ranks(&self, ranks: &[(UserId, u32)]) -> Result<()> {
        let staged: HashMap<UserId, u32> = ranks.iter().copied().collect();
        let mut table = self
            .ranks
            .write()
            .map_err(|_| DomainError::Invariant("rank table lock poisoned".into()))?;
        *table = Arc::new(staged);
        debug!(users = ranks.len(), "rank table swapped");
        Ok(())
    }
}

#[async_trait]
impl PostRepository for InMemoryStore {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.posts.get(&id).map(|p| p.value().clone()))
    }

    async fn create_first_of_day(
        &self,
        post: Post,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Post> {
        let _gate = self
            .post_gate
            .lock()
            .map_err(|_| DomainError::Invariant("post gate lock poisoned".into()))?;

        let taken = self.posts.iter().any(|p| {
            p.author_id == post.author_id && p.created_at >= day_start && p.created_at < day_end
        });
        if taken {
            return Err(DomainError::Conflict(ALREADY_POSTED_TODAY.to_string()));
        }

        let slot = match self.posts.entry(post.id) {
            Entry::Occupied(_) => return Err(DomainError::Conflict(format!("post {} already exists", post.id))),
            Entry::Vacant(slot) => slot,
        };
        let mut author = self
            .users
            .get_mut(&post.author_id)
            .ok_or_else(|| DomainError::not_found("user", post.author_id))?;

        slot.insert(post.clone());
        author.posts_count += 1;
        Ok(post)
    }

    async fn reset_all_scores(&self) -> Result<u64> {
        let mut changed = 0;
        for mut post in self.posts.iter_mut() {
            if post.score != 0 {
                post.score = 0;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_by_score_desc(&self) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = self.posts.iter().map(|p| p.value().clone()).collect();
        posts.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| b.created_at.cmp(&a.created_at)));
        Ok(posts)
    }

    async fn list_by_author(&self, author_id: UserId) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .posts
            .iter()
            .filter(|p| p.author_id == author_id)
            .map(|p| p.value().clone())
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn list_by_author_between(
        &self,
        author_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        Ok(self
            .posts
            .iter()
            .filter(|p| p.author_id == author_id && p.created_at >= start && p.created_at < end)
            .map(|p| p.value().clone())
            .collect())
    }
}

#[async_trait]
impl VoteRepository for InMemoryStore {
    async fn find(&self, voter_id: UserId, post_id: PostId) -> Result<Option<Vote>> {
        Ok(self.votes.get(&(voter_id, post_id)).map(|v| v.value().clone()))
    }

    async fn apply(&self, change: &VoteChange) -> Result<Post> {
        let slot = self.votes.entry((change.voter_id, change.post_id));
        let stored = match &slot {
            Entry::Occupied(held) => Some(held.get().direction),
            Entry::Vacant(_) => None,
        };
        if stored != change.from {
            return Err(DomainError::Conflict(format!(
                "vote changed concurrently: expected {:?}, found {:?}",
                change.from, stored
            )));
        }

        let mut post = self
            .posts
            .get_mut(&change.post_id)
            .ok_or_else(|| DomainError::not_found("post", change.post_id))?;
        let author_id = post.author_id;
        let mut author = self
            .users
            .get_mut(&author_id)
            .ok_or_else(|| DomainError::not_found("user", author_id))?;

        match (slot, change.to) {
            (Entry::Occupied(mut held), Some(direction)) => held.get_mut().direction = direction,
            (Entry::Occupied(held), None) => {
                held.remove();
            }
            (Entry::Vacant(empty), Some(direction)) => {
                empty.insert(Vote {
                    id: change.vote_id,
                    voter_id: change.voter_id,
                    post_id: change.post_id,
                    direction,
                    created_at: change.at,
                });
            }
            (Entry::Vacant(_), None) => {}
        }
        post.score += change.post_delta;
        author.total_score += change.author_delta;
        Ok(post.clone())
    }
}

#[async_trait]
impl CommentRepository for InMemoryStore {
    async fn find_by_id(&self, id: CommentId) -> Result<Option<Comment>> {
        Ok(self.comments.get(&id).map(|c| c.value().clone()))
    }

    async fn create(&self, comment: Comment) -> Result<Comment> {
        self.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>> {
        Ok(sorted_comments(self.comments.iter().filter(|c| c.post_id == post_id).map(|c| c.value().clone())))
    }

    async fn list_replies(&self, parent_id: CommentId) -> Result<Vec<Comment>> {
        Ok(sorted_comments(
            self.comments
                .iter()
                .filter(|c| c.parent_id == Some(parent_id))
                .map(|c| c.value().clone()),
        ))
    }
}

fn sorted_comments(comments: impl Iterator<Item = Comment>) -> Vec<Comment> {
    let mut comments: Vec<Comment> = comments.collect();
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    comments
}

#[async_trait]
impl AchievementRepository for InMemoryStore {
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Achievement>> {
        let mut held = self.achievements.get(&user_id).map(|a| a.value().clone()).unwrap_or_default();
        held.sort_by(|a, b| b.unlocked_at.cmp(&a.unlocked_at));
        Ok(held)
    }

    async fn create(&self, achievement: Achievement) -> Result<Achievement> {
        let mut held = self.achievements.entry(achievement.user_id).or_default();
        if held.iter().any(|a| a.name == achievement.name) {
            return Err(DomainError::Conflict(format!("achievement '{}' already granted", achievement.name)));
        }
        held.push(achievement.clone());
        Ok(achievement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{AchievementId, Direction, VoteId};

    fn user(name: &str) -> User {
        User::new(name.into(), format!("{name}@example.com"), "hash".into(), Utc::now())
    }

    fn post(author_id: UserId, created_at: DateTime<Utc>) -> Post {
        Post {
            id: PostId::new(),
            author_id,
            title: "title".into(),
            content: "content".into(),
            score: 0,
            tags: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_username_and_email_are_unique_case_insensitively() {
        let store = InMemoryStore::new();
        UserRepository::create(&store, user("Ada")).await.unwrap();

        let other = User::new("ada".into(), "other@example.com".into(), String::new(), Utc::now());
        let dup_name = UserRepository::create(&store, other).await;
        assert!(matches!(dup_name, Err(DomainError::Conflict(_))));

        let bob = User::new("bob".into(), "ADA@example.com".into(), String::new(), Utc::now());
        let dup_email = UserRepository::create(&store, bob).await;
        assert!(matches!(dup_email, Err(DomainError::Conflict(_))));
        // The failed attempt must not leave its username reserved.
        assert!(!store.exists_by_username("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_ranks_come_from_the_published_table() {
        let store = InMemoryStore::new();
        let a = UserRepository::create(&store, user("a")).await.unwrap();
        let b = UserRepository::create(&store, user("b")).await.unwrap();
        assert_eq!(UserRepository::find_by_id(&store, a.id).await.unwrap().unwrap().rank, 0);

        store.publish_ranks(&[(b.id, 1), (a.id, 2)]).await.unwrap();
        assert_eq!(UserRepository::find_by_id(&store, a.id).await.unwrap().unwrap().rank, 2);
        assert_eq!(UserRepository::find_by_id(&store, b.id).await.unwrap().unwrap().rank, 1);

        // A score change alone does not move the cached rank.
        let a = UserRepository::adjust_score(&store, a.id, 50).await.unwrap();
        assert_eq!(a.rank, 2);
    }

    fn first_vote(voter_id: UserId, post_id: PostId, direction: Direction) -> VoteChange {
        VoteChange {
            voter_id,
            post_id,
            vote_id: VoteId::new(),
            from: None,
            to: Some(direction),
            post_delta: direction.sign(),
            author_delta: direction.sign(),
            at: Utc::now(),
        }
    }

    fn whole_day() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - chrono::Duration::hours(12), now + chrono::Duration::hours(12))
    }

    async fn seeded_post(store: &InMemoryStore, name: &str) -> (User, Post) {
        let author = UserRepository::create(store, user(name)).await.unwrap();
        let (start, end) = whole_day();
        let post = store.create_first_of_day(post(author.id, Utc::now()), start, end).await.unwrap();
        (author, post)
    }

    #[tokio::test]
    async fn test_concurrent_votes_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let (author, target) = seeded_post(&store, "author").await;
        let post_id = target.id;

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let direction = if i % 4 == 0 { Direction::Down } else { Direction::Up };
                store.apply(&first_vote(UserId::new(), post_id, direction)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = PostRepository::find_by_id(&*store, target.id).await.unwrap().unwrap();
        assert_eq!(stored.score, 48 - 16);
        let author = UserRepository::find_by_id(&*store, author.id).await.unwrap().unwrap();
        assert_eq!(author.total_score, 48 - 16);
    }

    #[tokio::test]
    async fn test_reset_counts_only_changed_posts() {
        let store = InMemoryStore::new();
        let (_, scored) = seeded_post(&store, "scored").await;
        seeded_post(&store, "quiet").await;
        store.apply(&first_vote(UserId::new(), scored.id, Direction::Up)).await.unwrap();

        assert_eq!(store.reset_all_scores().await.unwrap(), 1);
        assert_eq!(PostRepository::find_by_id(&store, scored.id).await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn test_vote_row_follows_each_transition() {
        let store = InMemoryStore::new();
        let (author, target) = seeded_post(&store, "author").await;
        let voter = UserId::new();
        let cast = first_vote(voter, target.id, Direction::Up);
        store.apply(&cast).await.unwrap();

        let flip = VoteChange {
            vote_id: VoteId::new(),
            from: Some(Direction::Up),
            to: Some(Direction::Down),
            post_delta: -2,
            author_delta: -2,
            ..cast.clone()
        };
        let post = store.apply(&flip).await.unwrap();
        assert_eq!(post.score, -1);
        let flipped = store.find(voter, target.id).await.unwrap().unwrap();
        assert_eq!(flipped.id, cast.vote_id);
        assert_eq!(flipped.direction, Direction::Down);

        let retract = VoteChange { from: Some(Direction::Down), to: None, post_delta: 1, author_delta: 1, ..cast };
        assert_eq!(store.apply(&retract).await.unwrap().score, 0);
        assert!(store.find(voter, target.id).await.unwrap().is_none());
        assert_eq!(UserRepository::find_by_id(&store, author.id).await.unwrap().unwrap().total_score, 0);
    }

    #[tokio::test]
    async fn test_stale_vote_change_is_rejected_whole() {
        let store = InMemoryStore::new();
        let (author, target) = seeded_post(&store, "author").await;
        let voter = UserId::new();
        store.apply(&first_vote(voter, target.id, Direction::Up)).await.unwrap();

        // A second "first" vote for the same pair was computed from a stale read.
        let stale = first_vote(voter, target.id, Direction::Down);
        assert!(matches!(store.apply(&stale).await, Err(DomainError::Conflict(_))));

        assert_eq!(store.find(voter, target.id).await.unwrap().unwrap().direction, Direction::Up);
        assert_eq!(PostRepository::find_by_id(&store, target.id).await.unwrap().unwrap().score, 1);
        assert_eq!(UserRepository::find_by_id(&store, author.id).await.unwrap().unwrap().total_score, 1);
    }

    #[tokio::test]
    async fn test_vote_on_missing_post_stores_no_row() {
        let store = InMemoryStore::new();
        let voter = UserId::new();
        let missing = PostId::new();

        let err = store.apply(&first_vote(voter, missing, Direction::Up)).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));
        assert!(store.find(voter, missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_post_insert_and_counter_move_together() {
        let store = InMemoryStore::new();
        let author = UserRepository::create(&store, user("author")).await.unwrap();
        let (start, end) = whole_day();

        store.create_first_of_day(post(author.id, Utc::now()), start, end).await.unwrap();
        let again = store.create_first_of_day(post(author.id, Utc::now()), start, end).await;
        assert_eq!(again.unwrap_err(), DomainError::Conflict(ALREADY_POSTED_TODAY.into()));
        assert_eq!(UserRepository::find_by_id(&store, author.id).await.unwrap().unwrap().posts_count, 1);
        assert_eq!(store.list_by_author(author.id).await.unwrap().len(), 1);

        // The next day's window is open again.
        let tomorrow = end + chrono::Duration::hours(1);
        store
            .create_first_of_day(post(author.id, tomorrow), end, end + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(UserRepository::find_by_id(&store, author.id).await.unwrap().unwrap().posts_count, 2);

        let ghost = UserId::new();
        let err = store.create_first_of_day(post(ghost, Utc::now()), start, end).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "user", .. }));
        assert!(store.list_by_author(ghost).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_posts_admit_exactly_one() {
        let store = Arc::new(InMemoryStore::new());
        let author_id = UserRepository::create(&*store, user("eager")).await.unwrap().id;
        let (start, end) = whole_day();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create_first_of_day(post(author_id, Utc::now()), start, end).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(err) => assert_eq!(err.reason(), "already_posted_today"),
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(UserRepository::find_by_id(&*store, author_id).await.unwrap().unwrap().posts_count, 1);
        assert_eq!(store.list_by_author(author_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_achievement_names_are_unique_per_user() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let grant = |name: &str| Achievement {
            id: AchievementId::new(),
            user_id: owner,
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            unlocked_at: Utc::now(),
        };
        AchievementRepository::create(&store, grant("First Post")).await.unwrap();
        assert!(matches!(
            AchievementRepository::create(&store, grant("First Post")).await,
            Err(DomainError::Conflict(_))
        ));
        AchievementRepository::create(&store, grant("Rank 1")).await.unwrap();
        assert_eq!(store.list_for_user(owner).await.unwrap().len(), 2);
    }
}
