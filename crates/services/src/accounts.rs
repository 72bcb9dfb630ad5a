//! Accounts, credentials, leaderboard and profiles.

use std::sync::Arc;

use domains::{
    Achievement, AchievementRepository, Clock, DomainError, IssuedToken, PasswordHasher,
    TokenIssuer, User, UserId, UserRepository,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::ranking::rank_order;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub score: i64,
    pub rank: u32,
    pub posts_count: u32,
}

impl From<&User> for LeaderboardEntry {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            score: user.total_score,
            rank: user.rank,
            posts_count: user.posts_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub user: User,
    /// Most recently unlocked first
    pub achievements: Vec<Achievement>,
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    achievements: Arc<dyn AchievementRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        achievements: Arc<dyn AchievementRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { users, achievements, hasher, tokens, clock }
    }

    #[instrument(skip(self, email, password))]
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User, DomainError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(DomainError::Validation("username must not be empty".into()));
        }
        if !email.contains('@') {
            return Err(DomainError::Validation("email is not valid".into()));
        }
        if password.is_empty() {
            return Err(DomainError::Validation("password must not be empty".into()));
        }
        if self.users.exists_by_username(username).await? || self.users.exists_by_email(email).await? {
            return Err(DomainError::Conflict("username or email already exists".into()));
        }

        let hash = self.hasher.hash(password)?;
        // The store re-checks uniqueness atomically; a racing registration gets Conflict there.
        let user = self
            .users
            .create(User::new(username.to_string(), email.to_string(), hash, self.clock.now()))
            .await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Exchanges a username and password for a bearer credential.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<IssuedToken, DomainError> {
        let user = self.users.find_by_username(username.trim()).await?;
        match user {
            Some(user) if self.hasher.verify(password, &user.password_hash) => {
                self.tokens.issue(&user, self.clock.now())
            }
            _ => {
                warn!("failed login");
                Err(DomainError::Unauthorized("invalid username or password".into()))
            }
        }
    }

    /// Resolves a bearer credential to the user it was issued for.
    pub fn resolve_token(&self, token: &str) -> Result<UserId, DomainError> {
        self.tokens.resolve(token, self.clock.now())
    }

    pub async fn find_user(&self, user_id: UserId) -> Result<User, DomainError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", user_id))
    }

    /// Top `limit` users by total score, same tie-break as ranking.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, DomainError> {
        let mut users = self.users.list_by_score_desc().await?;
        users.sort_by(rank_order);
        Ok(users.iter().take(limit).map(LeaderboardEntry::from).collect())
    }

    pub async fn profile(&self, user_id: UserId) -> Result<UserProfile, DomainError> {
        let user = self.find_user(user_id).await?;
        let achievements = self.achievements.list_for_user(user_id).await?;
        Ok(UserProfile { user, achievements })
    }
}
