use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domains::{Direction, UserId, UserRepository};
use integration_tests::faults::FaultyPosts;
use integration_tests::{default_options, TestHarness};
use services::{Repositories, ResetOutcome};
use storage_adapters::InMemoryStore;

#[tokio::test]
async fn test_reset_zeroes_posts_but_keeps_totals() {
    let h = TestHarness::new();
    let author = h.user("author").await;
    let rival = h.user("rival").await;
    let post = h.post(author.id).await;

    let mut voters = Vec::new();
    for i in 0..7 {
        voters.push(h.user(&format!("voter{i}")).await);
    }
    for voter in &voters {
        h.engine.resolve_vote(voter.id, post.id, Direction::Up).await.unwrap();
    }
    UserRepository::adjust_score(&*h.store, rival.id, 3).await.unwrap();
    assert_eq!(h.reload_post(post.id).await.score, 7);

    let outcome = h.engine.run_daily_reset().await.unwrap();
    let ResetOutcome::Completed { posts_reset, users_ranked, .. } = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(posts_reset, 1);
    assert_eq!(users_ranked, 9);

    assert_eq!(h.reload_post(post.id).await.score, 0);
    assert_eq!(h.reload(author.id).await.total_score, 7);
    assert_eq!(h.reload(author.id).await.rank, 1);
    assert_eq!(h.reload(rival.id).await.rank, 2);
    h.assert_ranks_follow_scores().await;
    assert!(!h.engine.daily_reset.is_running());
}

#[tokio::test]
async fn test_reset_grants_pending_achievements() {
    let h = TestHarness::new();
    let user = h.user("quiet").await;
    UserRepository::adjust_score(&*h.store, user.id, 100).await.unwrap();

    let outcome = h.engine.run_daily_reset().await.unwrap();
    assert!(matches!(outcome, ResetOutcome::Completed { achievements_granted: 3, .. }));
    let profile = h.engine.accounts.profile(user.id).await.unwrap();
    let mut names: Vec<_> = profile.achievements.iter().map(|a| a.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Century Club", "Rank 1", "Top Performer"]);
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let mut repos = Repositories::from_store(store.clone());
    repos.posts = Arc::new(FaultyPosts::new(store.clone()).stalling_reset(Duration::from_millis(200)));
    let h = Arc::new(TestHarness::with_repositories(store, repos, default_options()));

    let author = h.user("author").await;
    h.post(author.id).await;

    let first = {
        let h = h.clone();
        tokio::spawn(async move { h.engine.run_daily_reset().await })
    };
    while !h.engine.daily_reset.is_running() {
        tokio::task::yield_now().await;
    }

    let second = h.engine.run_daily_reset().await.unwrap();
    assert_eq!(second, ResetOutcome::Skipped);

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, ResetOutcome::Completed { .. }));
    assert!(!h.engine.daily_reset.is_running());

    // The flag is released, so the next cycle runs normally.
    let third = h.engine.run_daily_reset().await.unwrap();
    assert!(matches!(third, ResetOutcome::Completed { posts_reset: 0, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_votes_racing_resets_keep_author_totals_exact() {
    let h = Arc::new(TestHarness::new());
    let mut posts = Vec::new();
    for i in 0..3 {
        let author = h.user(&format!("author{i}")).await;
        posts.push(h.post(author.id).await);
    }
    let mut voters = Vec::new();
    for i in 0..8 {
        voters.push(h.user(&format!("voter{i}")).await.id);
    }

    let mut vote_tasks = Vec::new();
    for (i, voter) in voters.iter().copied().enumerate() {
        for post in &posts {
            let h = h.clone();
            let post_id = post.id;
            let actions = if i % 3 == 0 {
                [Direction::Down, Direction::Up, Direction::Up]
            } else {
                [Direction::Up, Direction::Down, Direction::Down]
            };
            vote_tasks.push(tokio::spawn(async move {
                let mut resolutions = Vec::new();
                for direction in actions {
                    resolutions.push(h.engine.resolve_vote(voter, post_id, direction).await.unwrap());
                }
                resolutions
            }));
        }
    }
    let reset_tasks: Vec<_> = (0..3)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.engine.run_daily_reset().await })
        })
        .collect();

    // An author's total moves by the sign of each post delta, reset or not.
    let mut expected: HashMap<UserId, i64> = HashMap::new();
    for task in vote_tasks {
        for resolution in task.await.unwrap() {
            *expected.entry(resolution.post.author_id).or_default() += resolution.score_delta.signum();
        }
    }
    for task in reset_tasks {
        task.await.unwrap().unwrap();
    }

    for post in &posts {
        let total = h.reload(post.author_id).await.total_score;
        assert_eq!(total, expected[&post.author_id], "author of {}", post.id);
        assert_eq!(total, 2);
    }
    h.assert_ranks_follow_scores().await;
}
