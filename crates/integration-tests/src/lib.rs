//! Shared fixtures for the scenario tests: an engine over the in-memory
//! store, driven by a clock the test advances by hand.

pub mod faults;

use std::sync::{Arc, Mutex};

use auth_adapters::{Argon2PasswordHasher, SessionTokenIssuer};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use domains::{Clock, Post, PostId, User, UserId, UserRepository};
use services::{EngineOptions, Identity, NewPost, Repositories, ScoringEngine};
use storage_adapters::InMemoryStore;

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Noon UTC on an ordinary day.
pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// UTC days and a rank timeout no healthy in-memory run comes near.
pub fn default_options() -> EngineOptions {
    EngineOptions { rank_timeout: std::time::Duration::from_secs(5), ..EngineOptions::default() }
}

pub struct TestHarness {
    pub engine: ScoringEngine,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_offset(FixedOffset::east_opt(0).unwrap())
    }

    pub fn with_offset(day_offset: FixedOffset) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let options = EngineOptions { day_offset, ..default_options() };
        Self::with_repositories(store.clone(), Repositories::from_store(store), options)
    }

    /// Engine over custom repositories; `store` stays reachable for seeding.
    pub fn with_repositories(store: Arc<InMemoryStore>, repos: Repositories, options: EngineOptions) -> Self {
        let clock = Arc::new(ManualClock::at(start_of_test()));
        let identity = Identity {
            hasher: Arc::new(Argon2PasswordHasher::new()),
            tokens: Arc::new(SessionTokenIssuer::new(Duration::hours(24))),
        };
        let engine = ScoringEngine::new(repos, identity, clock.clone(), options);
        Self { engine, store, clock }
    }

    /// Seeds a user straight into the store. Each call advances the clock a
    /// second so join order is deterministic.
    pub async fn user(&self, name: &str) -> User {
        self.clock.advance(Duration::seconds(1));
        let user = User::new(name.to_string(), format!("{name}@example.com"), String::new(), self.clock.now());
        UserRepository::create(&*self.store, user).await.unwrap()
    }

    pub async fn post(&self, author: UserId) -> Post {
        self.engine
            .create_post(
                author,
                NewPost { title: "Daily insight".into(), content: "Something worth sharing".into(), tags: vec![] },
            )
            .await
            .unwrap()
            .post
    }

    pub async fn reload(&self, id: UserId) -> User {
        self.engine.accounts.find_user(id).await.unwrap()
    }

    pub async fn reload_post(&self, id: PostId) -> Post {
        self.engine.posts.get_post(id).await.unwrap()
    }

    /// Asserts ranks are exactly 1..=n following descending total score.
    pub async fn assert_ranks_follow_scores(&self) {
        let mut users = UserRepository::list_all(&*self.store).await.unwrap();
        users.sort_by_key(|u| u.rank);
        let ranks: Vec<u32> = users.iter().map(|u| u.rank).collect();
        let expected: Vec<u32> = (1..=users.len() as u32).collect();
        assert_eq!(ranks, expected, "ranks must be a permutation of 1..=n");
        for pair in users.windows(2) {
            assert!(
                pair[0].total_score >= pair[1].total_score,
                "{} (rank {}, score {}) above {} (rank {}, score {})",
                pair[0].username,
                pair[0].rank,
                pair[0].total_score,
                pair[1].username,
                pair[1].rank,
                pair[1].total_score,
            );
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
