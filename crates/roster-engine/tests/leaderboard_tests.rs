use pretty_assertions::assert_eq;
use roster_engine::{EngineError, LeaderboardRequest, PREVIOUS_RANK_DEPTH};
use roster_model::{EntityId, Metric, RankChange};
use roster_test_utils::{december, ids, january, numbered_ids, Harness, ScriptedBackend};
use std::time::Duration;

fn team() -> ScriptedBackend {
    ScriptedBackend::new()
        .with_listing(Metric::Received, &["A", "B", "C", "D"])
        .with_named(&["A", "B", "C", "D"])
        .with_period_count("A", Metric::Received, january(), 4)
        .with_period_count("B", Metric::Received, january(), 9)
        .with_period_count("C", Metric::Received, january(), 4)
        .with_period_count("A", Metric::Received, december(), 10)
        .with_period_count("B", Metric::Received, december(), 1)
        .with_period_count("D", Metric::Received, december(), 3)
}

#[tokio::test]
async fn ranks_resolves_and_drops_zero_counts() {
    let h = Harness::new(team());

    let board = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Received, january(), 10))
        .await
        .unwrap();

    let rows: Vec<(usize, &str, u64, &str)> = board
        .rows
        .iter()
        .map(|r| (r.rank, r.id.as_str(), r.count, r.record.display_name.as_str()))
        .collect();
    assert_eq!(
        rows,
        vec![(1, "B", 9, "Name B"), (2, "A", 4, "Name A"), (3, "C", 4, "Name C")]
    );
    assert_eq!(board.total, 17);
    assert!(!board.is_partial());
    assert!(board.rows.iter().all(|r| r.change.is_none()));
    assert_eq!(h.backend.list_call_count(), 1);
}

#[tokio::test]
async fn top_n_truncates_and_only_ranked_ids_are_resolved() {
    let h = Harness::new(team());

    let board = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Received, january(), 1))
        .await
        .unwrap();

    assert_eq!(board.rows.len(), 1);
    assert_eq!(board.rows[0].id, EntityId::from("B"));
    assert_eq!(h.backend.batch_calls(), vec![ids(&["B"])]);
}

#[tokio::test]
async fn rank_changes_against_previous_period() {
    let h = Harness::new(team());

    let board = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Received, january(), 10).with_previous(december()))
        .await
        .unwrap();

    let changes: Vec<(&str, Option<RankChange>)> = board
        .rows
        .iter()
        .map(|r| (r.id.as_str(), r.change))
        .collect();
    // december ranking: A 1, D 2, B 3
    assert_eq!(
        changes,
        vec![
            ("B", Some(RankChange::Up(2))),
            ("A", Some(RankChange::Down(1))),
            ("C", Some(RankChange::New)),
        ]
    );
}

#[tokio::test]
async fn listing_failure_is_a_hard_error() {
    let h = Harness::new(team().failing_listing());

    let err = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Received, january(), 10))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Listing { metric: Metric::Received, .. }));
    assert!(err.is_retryable());
    assert_eq!(h.backend.aggregate_call_count(), 0);
}

#[tokio::test]
async fn failed_counts_mark_board_partial() {
    let h = Harness::new(team().failing_aggregate("B"));

    let board = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Received, january(), 10))
        .await
        .unwrap();

    assert!(board.is_partial());
    assert_eq!(board.failed, ids(&["B"]));
    assert_eq!(board.rows[0].id.as_str(), "A");
}

#[tokio::test]
async fn cancelled_session_discards_results() {
    let h = Harness::new(team().with_latency(Duration::from_millis(5)));
    let session = h.engine.session();
    let other = h.engine.session();

    let canceller = session.clone();
    let request = LeaderboardRequest::new(Metric::Received, january(), 10);
    let (result, ()) = futures::join!(session.leaderboard(&request), async move {
        tokio::time::sleep(Duration::from_millis(7)).await;
        canceller.cancel();
    });

    assert!(result.unwrap_err().is_cancelled());
    assert!(session.resolve_one(&EntityId::from("A")).await.unwrap_err().is_cancelled());

    let board = other.leaderboard(&request).await.unwrap();
    assert_eq!(board.rows.len(), 3);
}

#[tokio::test]
async fn rank_below_previous_depth_counts_as_new() {
    let listed = numbered_ids(PREVIOUS_RANK_DEPTH + 1);
    let names: Vec<&str> = listed.iter().map(EntityId::as_str).collect();
    let mut backend = ScriptedBackend::new()
        .with_listing(Metric::Given, &names)
        .with_named(&names);
    for (position, id) in names.iter().enumerate() {
        let earlier = 500 - u64::try_from(position).unwrap();
        backend = backend.with_period_count(id, Metric::Given, december(), earlier);
    }
    let last = names[PREVIOUS_RANK_DEPTH];
    backend = backend
        .with_period_count(last, Metric::Given, january(), 50)
        .with_period_count("U0", Metric::Given, january(), 20);
    let h = Harness::new(backend);

    let board = h
        .engine
        .leaderboard(&LeaderboardRequest::new(Metric::Given, january(), 5).with_previous(december()))
        .await
        .unwrap();

    let changes: Vec<(&str, Option<RankChange>)> = board
        .rows
        .iter()
        .map(|r| (r.id.as_str(), r.change))
        .collect();
    assert_eq!(
        changes,
        vec![(last, Some(RankChange::New)), ("U0", Some(RankChange::Down(1)))]
    );
}

#[tokio::test]
async fn shutdown_cancels_every_session() {
    let h = Harness::new(team());
    let first = h.engine.session();
    let second = h.engine.session();

    h.engine.shutdown();

    assert!(h.engine.is_shut_down());
    assert!(first.is_cancelled());
    assert!(second.is_cancelled());
    let request = LeaderboardRequest::new(Metric::Received, january(), 10);
    assert!(first.leaderboard(&request).await.unwrap_err().is_cancelled());
    assert!(h.engine.session().is_cancelled());

    // the engine itself keeps serving
    assert_eq!(h.engine.leaderboard(&request).await.unwrap().rows.len(), 3);
}
