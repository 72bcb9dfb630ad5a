//! Daily reset orchestrator.
//!
//! Runs once per cycle, strictly in order:
//! 1. zero every post's per-cycle score
//! 2. recompute all ranks
//! 3. evaluate achievements for every user
//!
//! A failing step aborts the run. Completed steps are not rolled back and
//! there is no retry; the next scheduled run starts fresh. A trigger that
//! arrives while a run is in flight is skipped, not queued.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use domains::{DomainError, PostRepository};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::achievements::AchievementEvaluator;
use crate::ranking::RankingEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    ResetPostScores,
    RecomputeRanks,
    EvaluateAchievements,
}

impl fmt::Display for ResetStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResetStep::ResetPostScores => "reset-post-scores",
            ResetStep::RecomputeRanks => "recompute-ranks",
            ResetStep::EvaluateAchievements => "evaluate-achievements",
        })
    }
}

#[derive(Error, Debug)]
pub enum ResetError {
    #[error("daily reset failed at step {step}: {source}")]
    StepFailed {
        step: ResetStep,
        #[source]
        source: DomainError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Completed { posts_reset: u64, users_ranked: usize, achievements_granted: usize },
    /// Another run was still in flight.
    Skipped,
}

/// Clears the running flag however the run ends, including cancellation.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DailyResetOrchestrator {
    posts: Arc<dyn PostRepository>,
    ranking: Arc<RankingEngine>,
    achievements: Arc<AchievementEvaluator>,
    running: AtomicBool,
}

impl DailyResetOrchestrator {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        ranking: Arc<RankingEngine>,
        achievements: Arc<AchievementEvaluator>,
    ) -> Self {
        Self { posts, ranking, achievements, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[instrument(skip(self))]
    pub async fn run_daily_reset(&self) -> Result<ResetOutcome, ResetError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("daily reset already running, skipping trigger");
            return Ok(ResetOutcome::Skipped);
        }
        let _running = RunningGuard(&self.running);

        info!("starting daily reset");

        let posts_reset = step(ResetStep::ResetPostScores, self.posts.reset_all_scores().await)?;
        info!(posts = posts_reset, "post scores reset");

        let users_ranked = step(ResetStep::RecomputeRanks, self.ranking.recompute_all().await)?;

        let granted = step(ResetStep::EvaluateAchievements, self.achievements.evaluate_all().await)?;

        info!(posts_reset, users_ranked, achievements = granted.len(), "daily reset complete");
        Ok(ResetOutcome::Completed { posts_reset, users_ranked, achievements_granted: granted.len() })
    }
}

fn step<T>(step: ResetStep, result: Result<T, DomainError>) -> Result<T, ResetError> {
    result.map_err(|source| {
        error!(step = %step, error = %source, "daily reset aborted");
        ResetError::StepFailed { step, source }
    })
}

/// The first instant strictly after `now` whose local wall-clock time at
/// `offset` equals `at`.
pub fn next_reset_after(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset);
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
    let today = (local_now.date_naive().and_time(at) - shift).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
