//! Long-poll watch scenarios: wakeup on matching commits, timeouts,
//! concurrent-push conflicts, subscription races and shutdown.
mod utils;

use std::time::{Duration, Instant};

use dogma_internal::internal::command::Command;
use dogma_internal::model::{
    Author, Change, CommitMessage, EntryContent, PathPattern, Query, Revision,
};
use serde_json::json;
use utils::{PROJECT, REPO, envelope, setup};

/// A parked repository watcher wakes promptly when a matching commit lands.
#[tokio::test]
async fn test_watch_wakes_on_push() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let watcher = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.watch_repo(
                Revision::from(0),
                &PathPattern::all(),
                Duration::from_secs(10),
            )
            .await
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    ctx.push("wake", vec![Change::upsert_json("/a.json", json!(1))])
        .await
        .unwrap();

    let woken = watcher.await.unwrap().unwrap();
    assert_eq!(woken, Some(Revision::from(1)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// A watcher with no matching commit completes with the no-change sentinel
/// once its timeout expires.
#[tokio::test]
async fn test_watch_timeout() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let started = Instant::now();
    let result = repo
        .watch_repo(
            Revision::from(0),
            &PathPattern::all(),
            Duration::from_millis(300),
        )
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// A commit that lands before the watch call is still observed: the watcher
/// catches up instead of parking past it.
#[tokio::test]
async fn test_watch_catches_up_past_known_commits() {
    let ctx = setup().await;
    ctx.push("one", vec![Change::upsert_json("/a.json", json!(1))])
        .await
        .unwrap();
    ctx.push("two", vec![Change::upsert_json("/a.json", json!(2))])
        .await
        .unwrap();

    let repo = ctx.repo().await;
    let woken = repo
        .watch_repo(
            Revision::from(0),
            &PathPattern::all(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    // Multiple commits happened since the last known revision; the watcher
    // gets the latest matching one, never a stale revision.
    assert_eq!(woken, Some(Revision::from(2)));
}

/// Watchers only wake for commits matching their path pattern.
#[tokio::test]
async fn test_watch_pattern_filtering() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let watcher = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.watch_repo(
                Revision::from(0),
                &PathPattern::new("/conf/**").unwrap(),
                Duration::from_secs(10),
            )
            .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.push("miss", vec![Change::upsert_json("/other.json", json!(1))])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.push("hit", vec![Change::upsert_json("/conf/a.json", json!(2))])
        .await
        .unwrap();

    assert_eq!(watcher.await.unwrap().unwrap(), Some(Revision::from(2)));
}

/// A file watcher completes only when the query result changes, and carries
/// the projected content of the new head.
#[tokio::test]
async fn test_watch_file_query() {
    let ctx = setup().await;
    ctx.push(
        "seed",
        vec![Change::upsert_json("/conf.json", json!({"port": 1, "note": "x"}))],
    )
    .await
    .unwrap();

    let repo = ctx.repo().await;
    let query = Query::of_json_path("/conf.json", vec!["$.port".to_string()]).unwrap();
    let watcher = tokio::spawn({
        let repo = repo.clone();
        let query = query.clone();
        async move {
            repo.watch_file(Revision::from(1), &query, Duration::from_secs(10))
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Changes the file but not the projected value: the watcher stays parked.
    ctx.push(
        "irrelevant",
        vec![Change::upsert_json("/conf.json", json!({"port": 1, "note": "y"}))],
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!watcher.is_finished());

    ctx.push(
        "relevant",
        vec![Change::upsert_json("/conf.json", json!({"port": 2, "note": "y"}))],
    )
    .await
    .unwrap();

    let entry = watcher.await.unwrap().unwrap().expect("watch completed");
    assert_eq!(entry.revision, Revision::from(3));
    assert_eq!(entry.content, EntryContent::Json(json!(2)));
}

/// Two pushes race from the same base: exactly one commits, the other
/// fails with change-conflict.
#[tokio::test]
async fn test_concurrent_push_conflict() {
    let ctx = setup().await;
    for i in 1..=3 {
        ctx.push(&format!("seed {i}"), vec![Change::upsert_json("/s.json", json!(i))])
            .await
            .unwrap();
    }
    let repo = ctx.repo().await;
    let base = repo.head();

    let push_a = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.push(
                base,
                Author::new("a", "a@example.com"),
                CommitMessage::summary_only("A"),
                vec![Change::upsert_json("/x.json", json!("A"))],
            )
            .await
        }
    });
    let push_b = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.push(
                base,
                Author::new("b", "b@example.com"),
                CommitMessage::summary_only("B"),
                vec![Change::upsert_json("/x.json", json!("B"))],
            )
            .await
        }
    });

    let results = [push_a.await.unwrap(), push_b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loss = results.iter().find(|r| r.is_err()).unwrap();
    assert_eq!(loss.as_ref().unwrap_err().kind(), "change-conflict");
    assert_eq!(repo.head(), Revision::from(4));
}

/// Sequential watches never observe the same revision twice and always see
/// strictly increasing revisions.
#[tokio::test]
async fn test_watch_monotonic_wakeups() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let collector = tokio::spawn({
        let repo = repo.clone();
        async move {
            let mut seen = Vec::new();
            let mut last_known = Revision::from(0);
            while last_known.as_i64() < 3 {
                match repo
                    .watch_repo(last_known, &PathPattern::all(), Duration::from_secs(5))
                    .await
                    .unwrap()
                {
                    Some(revision) => {
                        seen.push(revision.as_i64());
                        last_known = revision;
                    }
                    None => break,
                }
            }
            seen
        }
    });

    for i in 1..=3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.push(&format!("c{i}"), vec![Change::upsert_json("/a.json", json!(i))])
            .await
            .unwrap();
    }

    let seen = collector.await.unwrap();
    // Strictly increasing, no duplicate deliveries, and the newest commit
    // is always the last thing observed.
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&3));
}

/// Removing the repository cancels parked watchers with a typed error.
#[tokio::test]
async fn test_remove_cancels_watchers() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let watcher = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.watch_repo(
                Revision::from(0),
                &PathPattern::all(),
                Duration::from_secs(10),
            )
            .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    ctx.applier
        .submit(envelope(Command::RemoveRepository {
            project: PROJECT.to_string(),
            name: REPO.to_string(),
        }))
        .await
        .unwrap();

    let err = watcher.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "repository-not-found");
}

/// Shutdown cancels every parked watcher with shutting-down and later
/// watch attempts are refused.
#[tokio::test]
async fn test_shutdown_cancels_watchers() {
    let ctx = setup().await;
    let repo = ctx.repo().await;

    let watcher = tokio::spawn({
        let repo = repo.clone();
        async move {
            repo.watch_repo(
                Revision::from(0),
                &PathPattern::all(),
                Duration::from_secs(10),
            )
            .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    ctx.applier.stop().await;

    let err = watcher.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "shutting-down");

    let err = repo
        .watch_repo(
            Revision::from(0),
            &PathPattern::all(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "shutting-down");
}

/// A watcher whose last-known revision is ahead of the head is rejected.
#[tokio::test]
async fn test_watch_future_revision_rejected() {
    let ctx = setup().await;
    let repo = ctx.repo().await;
    let err = repo
        .watch_repo(
            Revision::from(5),
            &PathPattern::all(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "revision-not-found");
}
