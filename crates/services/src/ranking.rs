//! Ranking engine.
//!
//! Owns the rank table. A run reads every user, orders them, then publishes
//! the whole assignment in one step through `UserRepository::publish_ranks`.
//! Runs are serialized and bounded by a deadline; a run that misses the
//! deadline publishes nothing.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use domains::{DomainError, User, UserId, UserRepository};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Orders users for ranking: total score descending, then earlier join,
/// then lower id. Total and deterministic regardless of store order.
pub fn rank_order(a: &User, b: &User) -> Ordering {
    b.total_score
        .cmp(&a.total_score)
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Assigns 1-based ranks. Every user gets a distinct rank.
pub fn assign_ranks(users: &[User]) -> Vec<(UserId, u32)> {
    let mut ordered: Vec<&User> = users.iter().collect();
    ordered.sort_by(|a, b| rank_order(a, b));
    ordered
        .into_iter()
        .enumerate()
        .map(|(position, user)| (user.id, position as u32 + 1))
        .collect()
}

pub struct RankingEngine {
    users: Arc<dyn UserRepository>,
    timeout: Duration,
    run_lock: Mutex<()>,
}

impl RankingEngine {
    pub fn new(users: Arc<dyn UserRepository>, timeout: Duration) -> Self {
        Self { users, timeout, run_lock: Mutex::new(()) }
    }

    /// Recomputes every user's rank from current total scores.
    ///
    /// Returns the number of users ranked.
    #[instrument(skip(self))]
    pub async fn recompute_ranks(&self) -> Result<usize, DomainError> {
        let _run = self.run_lock.lock().await;

        let outcome = tokio::time::timeout(self.timeout, async {
            let users = self.users.list_by_score_desc().await?;
            let ranks = assign_ranks(&users);
            self.users.publish_ranks(&ranks).await?;
            Ok::<usize, DomainError>(ranks.len())
        })
        .await;

        match outcome {
            Ok(Ok(count)) => {
                debug!(users = count, "ranks published");
                Ok(count)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "rank recomputation timed out");
                Err(DomainError::Timeout("rank recomputation".to_string()))
            }
        }
    }

    /// Same as [`recompute_ranks`](Self::recompute_ranks) but logged at info;
    /// used by scheduled full passes.
    pub async fn recompute_all(&self) -> Result<usize, DomainError> {
        let count = self.recompute_ranks().await?;
        info!(users = count, "full rank recomputation complete");
        Ok(count)
    }
}
