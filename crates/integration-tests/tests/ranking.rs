use std::sync::Arc;
use std::time::Duration;

use domains::{Direction, DomainError, UserRepository};
use integration_tests::faults::SlowUsers;
use integration_tests::{default_options, TestHarness};
use services::{EngineOptions, Repositories};
use storage_adapters::InMemoryStore;
use tokio_test::assert_err;

/// An engine with a 10ms rank budget over a users table slowed as given.
fn slow_ranking(list_delay: Duration, publish_delay: Duration) -> (TestHarness, Arc<SlowUsers>) {
    let store = Arc::new(InMemoryStore::new());
    let users = Arc::new(SlowUsers::new(store.clone(), list_delay, publish_delay));
    let mut repos = Repositories::from_store(store.clone());
    repos.users = users.clone();
    let options = EngineOptions { rank_timeout: Duration::from_millis(10), ..default_options() };
    (TestHarness::with_repositories(store, repos, options), users)
}

#[tokio::test]
async fn test_ranks_follow_total_score_after_votes() {
    let h = TestHarness::new();
    let low = h.user("low").await;
    let high = h.user("high").await;
    let voters = [h.user("v1").await, h.user("v2").await];

    let high_post = h.post(high.id).await;
    let low_post = h.post(low.id).await;
    for voter in &voters {
        h.engine.resolve_vote(voter.id, high_post.id, Direction::Up).await.unwrap();
    }
    h.engine.resolve_vote(voters[0].id, low_post.id, Direction::Up).await.unwrap();

    assert_eq!(h.reload(high.id).await.rank, 1);
    assert_eq!(h.reload(low.id).await.rank, 2);
    h.assert_ranks_follow_scores().await;
}

#[tokio::test]
async fn test_ties_go_to_the_earlier_member() {
    let h = TestHarness::new();
    let older = h.user("older").await;
    let newer = h.user("newer").await;

    h.engine.recompute_ranks().await.unwrap();
    assert_eq!(h.reload(older.id).await.rank, 1);
    assert_eq!(h.reload(newer.id).await.rank, 2);

    // Tie at 5 each: join order still decides.
    h.store.adjust_score(newer.id, 5).await.unwrap();
    h.store.adjust_score(older.id, 5).await.unwrap();
    h.engine.recompute_ranks().await.unwrap();
    assert_eq!(h.reload(older.id).await.rank, 1);

    h.store.adjust_score(newer.id, 1).await.unwrap();
    h.engine.recompute_ranks().await.unwrap();
    assert_eq!(h.reload(newer.id).await.rank, 1);
    assert_eq!(h.reload(older.id).await.rank, 2);
}

#[tokio::test]
async fn test_new_member_is_unranked_until_recompute() {
    let h = TestHarness::new();
    let user = h.user("fresh").await;
    assert_eq!(user.rank, 0);
    assert!(!h.reload(user.id).await.is_ranked());

    assert_eq!(h.engine.recompute_ranks().await.unwrap(), 1);
    assert_eq!(h.reload(user.id).await.rank, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_partial_assignment() {
    let h = Arc::new(TestHarness::new());
    for i in 0..12 {
        let user = h.user(&format!("member{i}")).await;
        h.store.adjust_score(user.id, (i * 7 % 5) as i64).await.unwrap();
    }
    h.engine.recompute_ranks().await.unwrap();

    let writer = {
        let h = h.clone();
        tokio::spawn(async move {
            let users = h.store.list_all().await.unwrap();
            for (i, user) in users.iter().enumerate() {
                h.store.adjust_score(user.id, (i as i64 % 3) - 1).await.unwrap();
                h.engine.recompute_ranks().await.unwrap();
            }
        })
    };

    for _ in 0..50 {
        let mut ranks: Vec<u32> = h.store.list_all().await.unwrap().iter().map(|u| u.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=12).collect::<Vec<u32>>());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    h.assert_ranks_follow_scores().await;
}

#[tokio::test]
async fn test_leaderboard_matches_ranks() {
    let h = TestHarness::new();
    let a = h.user("a").await;
    let b = h.user("b").await;
    let c = h.user("c").await;
    h.store.adjust_score(b.id, 10).await.unwrap();
    h.store.adjust_score(c.id, 4).await.unwrap();
    h.engine.recompute_ranks().await.unwrap();

    let board = h.engine.accounts.leaderboard(10).await.unwrap();
    let order: Vec<_> = board.iter().map(|e| (e.username.as_str(), e.rank)).collect();
    assert_eq!(order, vec![("b", 1), ("c", 2), ("a", 3)]);
    assert_eq!(board[2].user_id, a.id);
}

#[tokio::test]
async fn test_slow_leaderboard_read_times_out_without_publishing() {
    let (h, users) = slow_ranking(Duration::from_millis(250), Duration::ZERO);
    let member = h.user("member").await;

    let err = assert_err!(h.engine.recompute_ranks().await);
    assert!(matches!(err, DomainError::Timeout(_)));
    assert_eq!(err.reason(), "timeout");
    assert_eq!(users.published(), 0);
    assert_eq!(h.reload(member.id).await.rank, 0);
}

#[tokio::test]
async fn test_slow_publish_times_out_and_keeps_previous_ranks() {
    let (h, users) = slow_ranking(Duration::ZERO, Duration::from_millis(250));
    let first = h.user("first").await;
    let second = h.user("second").await;
    h.store.publish_ranks(&[(first.id, 1), (second.id, 2)]).await.unwrap();
    h.store.adjust_score(second.id, 10).await.unwrap();

    let err = assert_err!(h.engine.recompute_ranks().await);
    assert!(matches!(err, DomainError::Timeout(_)));
    assert_eq!(users.published(), 0);
    assert_eq!(h.reload(first.id).await.rank, 1);
    assert_eq!(h.reload(second.id).await.rank, 2);
}
