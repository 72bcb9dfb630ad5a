//! # services
//!
//! The scoring engine: vote resolution, the posting gate, ranking,
//! achievements and the daily reset, plus comment and account services.
//! Everything here talks to storage and identity only through the ports in
//! `domains`.

pub mod accounts;
pub mod achievements;
pub mod comments;
pub mod daily_reset;
pub mod locks;
pub mod posting;
pub mod ranking;
pub mod votes;

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use domains::{
    Achievement, AchievementRepository, Clock, CommentRepository, Direction, DomainError,
    PasswordHasher, PostId, PostRepository, TokenIssuer, User, UserId, UserRepository,
    VoteRepository,
};

pub use accounts::{AccountService, LeaderboardEntry, UserProfile};
pub use achievements::{AchievementEvaluator, AchievementRule, CATALOGUE};
pub use comments::CommentService;
pub use daily_reset::{next_reset_after, DailyResetOrchestrator, ResetError, ResetOutcome, ResetStep};
pub use posting::{local_day_window, CreatedPost, NewPost, PostService};
pub use ranking::RankingEngine;
pub use votes::{VoteResolution, VoteService, VoteTransition};

/// Tunables the engine needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Offset used for the posting day boundary
    pub day_offset: FixedOffset,
    /// Upper bound on one full rank recomputation
    pub rank_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            day_offset: Utc.fix(),
            rank_timeout: Duration::from_secs(10),
        }
    }
}

/// The Content Store as seen by the engine.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub votes: Arc<dyn VoteRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub achievements: Arc<dyn AchievementRepository>,
}

impl Repositories {
    /// Uses one store object for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository
            + PostRepository
            + VoteRepository
            + CommentRepository
            + AchievementRepository
            + 'static,
    {
        Self {
            users: store.clone(),
            posts: store.clone(),
            votes: store.clone(),
            comments: store.clone(),
            achievements: store,
        }
    }
}

/// Identity Store collaborators.
#[derive(Clone)]
pub struct Identity {
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: Arc<dyn TokenIssuer>,
}

/// Public surface of the engine, wired once at startup and shared.
pub struct ScoringEngine {
    pub votes: VoteService,
    pub posts: PostService,
    pub ranking: Arc<RankingEngine>,
    pub achievements: Arc<AchievementEvaluator>,
    pub daily_reset: DailyResetOrchestrator,
    pub comments: CommentService,
    pub accounts: AccountService,
}

impl ScoringEngine {
    pub fn new(repos: Repositories, identity: Identity, clock: Arc<dyn Clock>, options: EngineOptions) -> Self {
        let ranking = Arc::new(RankingEngine::new(repos.users.clone(), options.rank_timeout));
        let achievements = Arc::new(AchievementEvaluator::new(
            repos.users.clone(),
            repos.achievements.clone(),
            clock.clone(),
        ));

        Self {
            votes: VoteService::new(
                repos.users.clone(),
                repos.posts.clone(),
                repos.votes.clone(),
                ranking.clone(),
                achievements.clone(),
                clock.clone(),
            ),
            posts: PostService::new(
                repos.users.clone(),
                repos.posts.clone(),
                achievements.clone(),
                clock.clone(),
                options.day_offset,
            ),
            daily_reset: DailyResetOrchestrator::new(repos.posts.clone(), ranking.clone(), achievements.clone()),
            comments: CommentService::new(
                repos.users.clone(),
                repos.posts.clone(),
                repos.comments.clone(),
                clock.clone(),
            ),
            accounts: AccountService::new(
                repos.users,
                repos.achievements,
                identity.hasher,
                identity.tokens,
                clock,
            ),
            ranking,
            achievements,
        }
    }

    pub async fn resolve_vote(
        &self,
        voter_id: UserId,
        post_id: PostId,
        direction: Direction,
    ) -> Result<VoteResolution, DomainError> {
        self.votes.resolve_vote(voter_id, post_id, direction).await
    }

    pub async fn create_post(&self, author_id: UserId, new_post: NewPost) -> Result<CreatedPost, DomainError> {
        self.posts.create_post(author_id, new_post).await
    }

    pub async fn recompute_ranks(&self) -> Result<usize, DomainError> {
        self.ranking.recompute_ranks().await
    }

    pub async fn evaluate(&self, user: &User) -> Result<Vec<Achievement>, DomainError> {
        self.achievements.evaluate(user).await
    }

    pub async fn evaluate_all(&self) -> Result<Vec<Achievement>, DomainError> {
        self.achievements.evaluate_all().await
    }

    pub async fn run_daily_reset(&self) -> Result<ResetOutcome, ResetError> {
        self.daily_reset.run_daily_reset().await
    }
}
