//! Achievement evaluator.
//!
//! A fixed catalogue of threshold rules. Each rule is checked on its own and
//! granted at most once per user by name; grants are never revoked, even if
//! the triggering stat later drops.

use std::collections::HashSet;
use std::sync::Arc;

use domains::{
    Achievement, AchievementId, AchievementRepository, Clock, DomainError, User, UserId,
    UserRepository,
};
use tracing::{info, instrument, warn};

pub struct AchievementRule {
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    trigger: fn(&User) -> bool,
}

impl AchievementRule {
    pub fn applies_to(&self, user: &User) -> bool {
        (self.trigger)(user)
    }
}

// Rank-based rules ignore rank 0, which means "not ranked yet".
pub static CATALOGUE: &[AchievementRule] = &[
    AchievementRule {
        name: "First Post",
        description: "Created your first post",
        icon: "🎯",
        trigger: |u| u.posts_count >= 1,
    },
    AchievementRule {
        name: "Century Club",
        description: "Reached 100 total score",
        icon: "💯",
        trigger: |u| u.total_score >= 100,
    },
    AchievementRule {
        name: "High Scorer",
        description: "Reached 500 total score",
        icon: "🌟",
        trigger: |u| u.total_score >= 500,
    },
    AchievementRule {
        name: "Score Master",
        description: "Reached 1000 total score",
        icon: "👑",
        trigger: |u| u.total_score >= 1000,
    },
    AchievementRule {
        name: "Prolific Poster",
        description: "Created 10 posts",
        icon: "📝",
        trigger: |u| u.posts_count >= 10,
    },
    AchievementRule {
        name: "Post Master",
        description: "Created 50 posts",
        icon: "📚",
        trigger: |u| u.posts_count >= 50,
    },
    AchievementRule {
        name: "Top Performer",
        description: "Achieved top 3 rank",
        icon: "🏆",
        trigger: |u| u.is_ranked() && u.rank <= 3,
    },
    AchievementRule {
        name: "Rank 1",
        description: "Achieved the #1 rank",
        icon: "👑",
        trigger: |u| u.rank == 1,
    },
];

/// Rules the user qualifies for but does not hold yet.
pub fn pending_rules(user: &User, held: &HashSet<&str>) -> Vec<&'static AchievementRule> {
    CATALOGUE
        .iter()
        .filter(|rule| rule.applies_to(user) && !held.contains(rule.name))
        .collect()
}

pub struct AchievementEvaluator {
    users: Arc<dyn UserRepository>,
    achievements: Arc<dyn AchievementRepository>,
    clock: Arc<dyn Clock>,
}

impl AchievementEvaluator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        achievements: Arc<dyn AchievementRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { users, achievements, clock }
    }

    /// Grants every newly applicable achievement to `user`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn evaluate(&self, user: &User) -> Result<Vec<Achievement>, DomainError> {
        let held = self.achievements.list_for_user(user.id).await?;
        let held: HashSet<&str> = held.iter().map(|a| a.name.as_str()).collect();

        let mut granted = Vec::new();
        for rule in pending_rules(user, &held) {
            let achievement = Achievement {
                id: AchievementId::new(),
                user_id: user.id,
                name: rule.name.to_string(),
                description: rule.description.to_string(),
                icon: rule.icon.to_string(),
                unlocked_at: self.clock.now(),
            };
            match self.achievements.create(achievement).await {
                Ok(saved) => {
                    info!(user = %user.username, achievement = rule.name, "achievement unlocked");
                    granted.push(saved);
                }
                // A concurrent evaluation got there first; the grant still stands once.
                Err(DomainError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(granted)
    }

    /// Re-reads the user and evaluates the fresh stats.
    pub async fn evaluate_user(&self, user_id: UserId) -> Result<Vec<Achievement>, DomainError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", user_id))?;
        self.evaluate(&user).await
    }

    /// Evaluates every user. A failure for one user is logged and does not
    /// stop the pass; the first such error is returned once all users ran.
    #[instrument(skip(self))]
    pub async fn evaluate_all(&self) -> Result<Vec<Achievement>, DomainError> {
        let users = self.users.list_all().await?;
        let mut granted = Vec::new();
        let mut first_error = None;

        for user in &users {
            match self.evaluate(user).await {
                Ok(mut new) => granted.append(&mut new),
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "achievement evaluation failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(users = users.len(), granted = granted.len(), "achievement pass complete");
                Ok(granted)
            }
        }
    }
}
