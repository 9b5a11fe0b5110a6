//! Integration tests for request dispatch across mock engines.

use crate::mock_infrastructure::{account_query, MockCluster, MockEngine};
use multiclient_core::{
    engine::{DispatchError, DispatchPolicy, EngineError, ErrorKind},
    types::{BroadcastOptions, BroadcastPolicy, CallOutcome, DispatchMode, Request},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine_name(response: &multiclient_core::types::Response) -> String {
    response
        .payload()
        .and_then(|payload| payload.get("engine"))
        .and_then(|engine| engine.as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_single_prefers_healthy_engine() {
    let cluster =
        MockCluster::new(vec![MockEngine::new("a"), MockEngine::new("b").with_height(100)]);
    cluster.probe_all().await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::Single, None)
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.engine_id(), Some(cluster.ids[1]));
    assert_eq!(engine_name(&response), "b");
    assert_eq!(cluster.engines[0].calls(), 0, "unprobed engine should not be tried first");
}

#[tokio::test]
async fn test_single_is_stable_on_unchanged_pool() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100),
        MockEngine::new("c").with_height(100),
    ]);
    cluster.probe_all().await;

    let mut served = Vec::new();
    for _ in 0..3 {
        let response = cluster
            .client
            .submit(account_query("EQA"), DispatchMode::Single, None)
            .await
            .expect("dispatch should succeed");
        served.push(response.engine_id());
    }

    assert!(served.iter().all(|id| *id == served[0]));
}

#[tokio::test]
async fn test_single_falls_through_to_next_engine() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a")
            .with_height(100)
            .with_failure(EngineError::Unreachable("reset".to_string())),
        MockEngine::new("b").with_height(100),
    ]);
    cluster.probe_all().await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::Single, None)
        .await
        .expect("second engine should answer");

    match response {
        multiclient_core::types::Response::Single { engine_id, attempts, .. } => {
            assert_eq!(engine_id, cluster.ids[1]);
            assert_eq!(attempts, 2);
        }
        other => panic!("expected single response, got {other:?}"),
    }
    assert_eq!(cluster.engines[0].calls(), 1);
}

#[tokio::test]
async fn test_single_reports_every_failure_within_budget() {
    let failing = |name: &str| {
        MockEngine::new(name)
            .with_height(100)
            .with_failure(EngineError::Protocol("malformed".to_string()))
    };
    let cluster = MockCluster::with_policy(
        vec![failing("a"), failing("b"), failing("c")],
        DispatchPolicy { retry_budget: 2, ..crate::mock_infrastructure::test_policy() },
    );
    cluster.probe_all().await;

    let error = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::Single, None)
        .await
        .expect_err("all engines fail");

    match error {
        DispatchError::AllEnginesFailed { failures } => {
            assert_eq!(failures.len(), 2, "retry budget caps the attempts");
            assert!(failures.iter().all(|failure| failure.kind == ErrorKind::Protocol));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(cluster.engines[2].calls(), 0);
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("slow").with_height(100).with_latency(Duration::from_millis(500)),
        MockEngine::new("fast").with_height(100),
    ]);
    cluster.probe_all().await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::Single, Some(Duration::from_millis(50)))
        .await
        .expect("fast engine should answer after the slow one times out");

    assert_eq!(engine_name(&response), "fast");
}

#[tokio::test]
async fn test_round_robin_alternates_between_healthy_engines() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100),
    ]);
    cluster.probe_all().await;

    let mut served = Vec::new();
    for _ in 0..4 {
        let response = cluster
            .client
            .submit(account_query("EQA"), DispatchMode::RoundRobin, None)
            .await
            .expect("dispatch should succeed");
        served.push(engine_name(&response));
    }

    assert_ne!(served[0], served[1]);
    assert_eq!(served[0], served[2]);
    assert_eq!(served[1], served[3]);
    assert_eq!(cluster.engines[0].calls(), 2);
    assert_eq!(cluster.engines[1].calls(), 2);
}

#[tokio::test]
async fn test_round_robin_skips_non_healthy_engines_while_healthy_exist() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("lagging").with_height(50),
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100),
    ]);
    // The lagging engine is classified against the best height seen so far.
    cluster.probe(1, 1).await;
    cluster.probe(2, 1).await;
    cluster.probe(0, 1).await;

    for _ in 0..4 {
        cluster
            .client
            .submit(account_query("EQA"), DispatchMode::RoundRobin, None)
            .await
            .expect("dispatch should succeed");
    }

    assert_eq!(cluster.engines[0].calls(), 0);
    assert_eq!(cluster.engines[1].calls() + cluster.engines[2].calls(), 4);
}

#[tokio::test]
async fn test_broadcast_first_success_returns_fastest_and_cancels_rest() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("slow").with_height(100).with_latency(Duration::from_millis(300)),
        MockEngine::new("fast").with_height(100).with_latency(Duration::from_millis(10)),
    ]);
    cluster.probe_all().await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::FirstSuccess), None)
        .await
        .expect("fast engine should win");

    assert_eq!(response.engine_id(), Some(cluster.ids[1]));
    assert_eq!(cluster.engines[0].calls(), 1, "slow engine should have been called");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cluster.engines[0].completed(), 0, "losing call should be cancelled");
}

#[tokio::test]
async fn test_broadcast_first_success_skips_failures() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("broken")
            .with_height(100)
            .with_failure(EngineError::Unreachable("reset".to_string())),
        MockEngine::new("ok").with_height(100).with_latency(Duration::from_millis(30)),
    ]);
    cluster.probe_all().await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::FirstSuccess), None)
        .await
        .expect("second engine should answer");

    assert_eq!(engine_name(&response), "ok");
}

#[tokio::test]
async fn test_broadcast_all_results_reports_timeouts_per_engine() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("slow").with_height(100).with_latency(Duration::from_millis(500)),
        MockEngine::new("fast").with_height(100),
        MockEngine::new("broken")
            .with_height(100)
            .with_failure(EngineError::Protocol("bad reply".to_string())),
    ]);
    cluster.probe_all().await;

    let request =
        Request::new(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults))
            .with_timeout(Duration::from_millis(50));
    let response = cluster.client.send(&request).await.expect("all results never fails");

    let outcomes = response.outcomes().expect("broadcast response");
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.get(cluster.ids[0]), Some(&CallOutcome::Timeout));
    assert!(outcomes.get(cluster.ids[1]).is_some_and(CallOutcome::is_success));
    assert_eq!(outcomes.get(cluster.ids[2]), Some(&CallOutcome::Failure(ErrorKind::Protocol)));
}

#[tokio::test]
async fn test_broadcast_limit_targets_best_ranked_engines() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("unprobed"),
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100),
    ]);
    cluster.probe(1, 1).await;
    cluster.probe(2, 1).await;

    let mode = DispatchMode::Broadcast(BroadcastOptions {
        policy: Some(BroadcastPolicy::AllResults),
        limit: Some(2),
    });
    let response =
        cluster.client.submit(account_query("EQA"), mode, None).await.expect("broadcast");

    let outcomes = response.outcomes().expect("broadcast response");
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.get(cluster.ids[0]).is_none());
    assert_eq!(cluster.engines[0].calls(), 0);
}

#[tokio::test]
async fn test_broadcast_excludes_dead_engines() {
    let cluster =
        MockCluster::new(vec![MockEngine::new("dead"), MockEngine::new("a").with_height(100)]);
    cluster.probe(0, 3).await;
    cluster.probe(1, 1).await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults), None)
        .await
        .expect("broadcast");

    let outcomes = response.outcomes().expect("broadcast response");
    assert_eq!(outcomes.ids().collect::<Vec<_>>(), vec![cluster.ids[1]]);
}

#[tokio::test]
async fn test_broadcast_on_all_dead_pool_uses_fallback_engine() {
    let cluster = MockCluster::new(vec![MockEngine::new("a"), MockEngine::new("b")]);
    cluster.probe(0, 3).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    cluster.probe(1, 3).await;

    let single = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::Single, None)
        .await
        .expect("fallback engine answers single dispatch");
    assert_eq!(single.engine_id(), Some(cluster.ids[0]));

    let first = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::FirstSuccess), None)
        .await
        .expect("fallback engine answers broadcast");
    assert_eq!(first.engine_id(), Some(cluster.ids[0]));

    let all = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults), None)
        .await
        .expect("fallback engine answers broadcast");
    let outcomes = all.outcomes().expect("broadcast response");
    assert_eq!(outcomes.ids().collect::<Vec<_>>(), vec![cluster.ids[0]]);
    assert_eq!(cluster.engines[1].calls(), 0);
}

#[tokio::test]
async fn test_broadcast_prefers_probed_engines_over_unknown() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("unprobed"),
        MockEngine::new("a").with_height(100),
    ]);
    cluster.probe(1, 1).await;

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults), None)
        .await
        .expect("broadcast");

    let outcomes = response.outcomes().expect("broadcast response");
    assert_eq!(outcomes.ids().collect::<Vec<_>>(), vec![cluster.ids[1]]);
    assert_eq!(cluster.engines[0].calls(), 0);
}

#[tokio::test]
async fn test_broadcast_reaches_unprobed_engines_when_nothing_is_healthy() {
    let cluster = MockCluster::new(vec![MockEngine::new("a"), MockEngine::new("b")]);

    let response = cluster
        .client
        .submit(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults), None)
        .await
        .expect("broadcast");

    assert_eq!(response.outcomes().map(|outcomes| outcomes.len()), Some(2));
}

#[tokio::test]
async fn test_archival_requests_only_reach_archival_engines() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("pruned").with_height(100),
        MockEngine::new("archive").with_height(100).archival(),
    ]);
    cluster.probe_all().await;

    for _ in 0..3 {
        let request = Request::new(account_query("EQA"), DispatchMode::RoundRobin).archival_only();
        let response = cluster.client.send(&request).await.expect("archive engine answers");
        assert_eq!(engine_name(&response), "archive");
    }
    assert_eq!(cluster.engines[0].calls(), 0);
}

#[tokio::test]
async fn test_archival_request_without_archival_engines_is_pool_empty() {
    let cluster = MockCluster::new(vec![MockEngine::new("pruned").with_height(100)]);
    cluster.probe_all().await;

    let request = Request::new(account_query("EQA"), DispatchMode::Single).archival_only();
    let error = cluster.client.send(&request).await.expect_err("no archival engine");
    assert_eq!(error, DispatchError::PoolEmpty);
}

#[tokio::test]
async fn test_pinned_request_uses_only_listed_engines() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100),
    ]);
    cluster.probe_all().await;

    let request =
        Request::new(account_query("EQA"), DispatchMode::Single).pinned_to(vec![cluster.ids[1]]);
    let response = cluster.client.send(&request).await.expect("pinned engine answers");
    assert_eq!(response.engine_id(), Some(cluster.ids[1]));
}

#[tokio::test]
async fn test_empty_pool_is_reported() {
    let cluster = MockCluster::new(Vec::new());

    for mode in [
        DispatchMode::Single,
        DispatchMode::RoundRobin,
        DispatchMode::broadcast(BroadcastPolicy::AllResults),
    ] {
        let error =
            cluster.client.submit(account_query("EQA"), mode, None).await.expect_err("empty");
        assert_eq!(error, DispatchError::PoolEmpty);
    }
}

#[tokio::test]
async fn test_caller_cancellation_aborts_dispatch() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100).with_latency(Duration::from_secs(1)),
        MockEngine::new("b").with_height(100).with_latency(Duration::from_secs(1)),
    ]);
    cluster.probe_all().await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let request =
        Request::new(account_query("EQA"), DispatchMode::broadcast(BroadcastPolicy::AllResults));
    let error = cluster.client.send_with_cancel(&request, &cancel).await.expect_err("cancelled");

    assert_eq!(error, DispatchError::Cancelled);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.engines[0].completed() + cluster.engines[1].completed(), 0);
}

#[tokio::test]
async fn test_concurrent_dispatches_complete_independently() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100).with_latency(Duration::from_millis(20)),
        MockEngine::new("b").with_height(100).with_latency(Duration::from_millis(20)),
    ]);
    cluster.probe_all().await;

    let requests = (0..10).map(|i| {
        let client = cluster.client.clone();
        async move {
            client.submit(account_query(&format!("EQ{i}")), DispatchMode::RoundRobin, None).await
        }
    });
    let results = futures::future::join_all(requests).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(cluster.engines[0].calls() + cluster.engines[1].calls(), 10);
    assert!(cluster.client.pool_status().iter().all(|status| status.in_flight == 0));
}
