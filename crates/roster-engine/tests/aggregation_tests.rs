use pretty_assertions::assert_eq;
use roster_engine::{AggregateQuery, CancellationToken, EngineConfig};
use roster_model::{EntityId, Metric};
use roster_test_utils::{ids, numbered_ids, range, Harness, ScriptedBackend};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn twenty_three_ids_at_concurrency_five() {
    let all = numbered_ids(23);
    let mut backend = ScriptedBackend::new().with_latency(Duration::from_millis(3));
    for (i, id) in all.iter().enumerate() {
        backend = backend.with_count(id.as_str(), Metric::Received, i as u64);
    }
    let h = Harness::new(backend);

    let report = h
        .engine
        .aggregate(&all, Metric::Received, range("2024-01-01", "2024-01-31"))
        .await;

    assert_eq!(h.backend.aggregate_call_count(), 23);
    assert!(h.backend.peak_in_flight() <= 5);
    assert_eq!(report.counts.len(), 23);
    assert_eq!(report.counts["U22"], 22);
    assert!(report.is_complete());
}

#[tokio::test]
async fn failing_id_counts_zero_and_is_ranked_out() {
    let h = Harness::new(
        ScriptedBackend::new()
            .with_count("A", Metric::Given, 5)
            .with_count("B", Metric::Given, 9)
            .failing_aggregate("B"),
    );

    let report = h
        .engine
        .aggregate(&ids(&["A", "B"]), Metric::Given, range("2026-01-01", "2026-03-31"))
        .await;

    let expected: HashMap<EntityId, u64> = [(EntityId::from("A"), 5), (EntityId::from("B"), 0)].into_iter().collect();
    assert_eq!(report.counts, expected);
    assert!(report.failed.contains("B"));

    let top = report.top(1);
    assert_eq!(top.len(), 1);
    assert_eq!((top[0].id.as_str(), top[0].count), ("A", 5));
}

#[tokio::test]
async fn metric_and_range_select_the_counter() {
    let jan = range("2024-01-01", "2024-01-31");
    let feb = range("2024-02-01", "2024-02-29");
    let h = Harness::new(
        ScriptedBackend::new()
            .with_count("A", Metric::Given, 1)
            .with_count("A", Metric::Received, 2)
            .with_period_count("A", Metric::Received, feb, 7),
    );
    let a = ids(&["A"]);

    assert_eq!(h.engine.aggregate(&a, Metric::Given, jan).await.counts["A"], 1);
    assert_eq!(h.engine.aggregate(&a, Metric::Received, jan).await.counts["A"], 2);
    assert_eq!(h.engine.aggregate(&a, Metric::Received, feb).await.counts["A"], 7);
}

#[tokio::test]
async fn configured_concurrency_applies() {
    let all = numbered_ids(10);
    let h = Harness::with_config(
        ScriptedBackend::new().with_latency(Duration::from_millis(2)),
        EngineConfig::default().with_aggregate_concurrency(2),
    );

    h.engine
        .aggregate(&all, Metric::Given, range("2024-01-01", "2024-01-02"))
        .await;

    assert_eq!(h.backend.aggregate_call_count(), 10);
    assert!(h.backend.peak_in_flight() <= 2);
}

#[tokio::test]
async fn cancelled_query_stops_claiming() {
    let all = numbered_ids(30);
    let h = Harness::new(ScriptedBackend::new().with_latency(Duration::from_millis(5)));
    let cancel = CancellationToken::new();
    let query = AggregateQuery::new(all, Metric::Given, range("2024-01-01", "2024-01-31"))
        .with_concurrency(3);

    let stopper = cancel.clone();
    let (report, ()) = futures::join!(h.engine.aggregate_query(&query, &cancel), async move {
        tokio::time::sleep(Duration::from_millis(7)).await;
        stopper.cancel();
    });

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert!(h.backend.aggregate_call_count() < 30);
    assert_eq!(report.counts.len(), h.backend.aggregate_call_count());
}
