//! Vote resolution.
//!
//! A (voter, post) pair moves between three states: no vote, UP, DOWN.
//! Casting the held direction again retracts it; casting the other direction
//! flips it in place. The post score follows the ledger exactly, so replaying
//! the same actions from the same start always lands on the same score.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use domains::{
    Clock, Direction, DomainError, Post, PostId, PostRepository, UserId, UserRepository,
    VoteChange, VoteId, VoteRepository,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::achievements::AchievementEvaluator;
use crate::locks::KeyedLocks;
use crate::ranking::RankingEngine;

/// What a single vote action does to the stored vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No prior vote: record one.
    Cast(Direction),
    /// Same direction again: remove the vote.
    Retract(Direction),
    /// Opposite direction: swing the existing vote.
    Flip { from: Direction, to: Direction },
}

impl VoteTransition {
    pub fn between(existing: Option<Direction>, requested: Direction) -> Self {
        match existing {
            None => VoteTransition::Cast(requested),
            Some(held) if held == requested => VoteTransition::Retract(held),
            Some(held) => VoteTransition::Flip { from: held, to: requested },
        }
    }

    /// Change to the post's score.
    pub fn post_delta(self) -> i64 {
        match self {
            VoteTransition::Cast(d) => d.sign(),
            VoteTransition::Retract(d) => -d.sign(),
            VoteTransition::Flip { to, .. } => 2 * to.sign(),
        }
    }

    /// Change to the author's total score: the sign of the post delta.
    /// A flip moves the post by two but the author by one.
    pub fn author_delta(self) -> i64 {
        self.post_delta().signum()
    }

    /// Direction stored after the transition, if any.
    pub fn resulting(self) -> Option<Direction> {
        match self {
            VoteTransition::Cast(d) => Some(d),
            VoteTransition::Retract(_) => None,
            VoteTransition::Flip { to, .. } => Some(to),
        }
    }

    /// Direction stored before the transition, if any.
    pub fn prior(self) -> Option<Direction> {
        match self {
            VoteTransition::Cast(_) => None,
            VoteTransition::Retract(d) => Some(d),
            VoteTransition::Flip { from, .. } => Some(from),
        }
    }

    /// The store write for this transition on one (voter, post) pair.
    pub fn change(self, voter_id: UserId, post_id: PostId, at: DateTime<Utc>) -> VoteChange {
        VoteChange {
            voter_id,
            post_id,
            vote_id: VoteId::new(),
            from: self.prior(),
            to: self.resulting(),
            post_delta: self.post_delta(),
            author_delta: self.author_delta(),
            at,
        }
    }
}

/// Result of [`VoteService::resolve_vote`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteResolution {
    pub post: Post,
    /// Change applied to the post's score
    pub score_delta: i64,
    /// The voter's standing vote after this action
    pub vote: Option<Direction>,
}

pub struct VoteService {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    votes: Arc<dyn VoteRepository>,
    ranking: Arc<RankingEngine>,
    achievements: Arc<AchievementEvaluator>,
    clock: Arc<dyn Clock>,
    pair_locks: KeyedLocks<(UserId, PostId)>,
}

impl VoteService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        votes: Arc<dyn VoteRepository>,
        ranking: Arc<RankingEngine>,
        achievements: Arc<AchievementEvaluator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { users, posts, votes, ranking, achievements, clock, pair_locks: KeyedLocks::new() }
    }

    /// Applies one vote action and its knock-on effects. The vote row, post
    /// score and author total land together through [`VoteRepository::apply`];
    /// the full re-rank and the author's achievement pass follow.
    #[instrument(skip(self), fields(voter = %voter_id, post = %post_id, direction = %direction))]
    pub async fn resolve_vote(
        &self,
        voter_id: UserId,
        post_id: PostId,
        direction: Direction,
    ) -> Result<VoteResolution, DomainError> {
        if self.users.find_by_id(voter_id).await?.is_none() {
            return Err(DomainError::not_found("user", voter_id));
        }
        if self.posts.find_by_id(post_id).await?.is_none() {
            return Err(DomainError::not_found("post", post_id));
        }

        let (post, transition) = {
            let _pair = self.pair_locks.lock((voter_id, post_id)).await;

            let existing = self.votes.find(voter_id, post_id).await?.map(|v| v.direction);
            let transition = VoteTransition::between(existing, direction);
            let post = self.votes.apply(&transition.change(voter_id, post_id, self.clock.now())).await?;
            (post, transition)
        };

        info!(
            transition = ?transition,
            score_delta = transition.post_delta(),
            post_score = post.score,
            "vote resolved"
        );

        self.ranking.recompute_ranks().await?;
        self.achievements.evaluate_user(post.author_id).await?;

        Ok(VoteResolution { score_delta: transition.post_delta(), vote: transition.resulting(), post })
    }
}
