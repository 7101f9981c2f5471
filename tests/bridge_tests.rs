use callosum::event_store::{DurableEventStore, InMemoryEventStore};
use callosum::stream::BackpressureConfig;
use callosum::{CorpusCallosum, MessagePayload, MessagePriority, TractType};
use std::sync::Arc;
use std::time::Duration;

fn json_payload(value: serde_json::Value) -> MessagePayload {
    MessagePayload::Json(value)
}

async fn route_simple(bridge: &CorpusCallosum, source: TractType, dest: TractType) -> i64 {
    bridge
        .route_message(
            source,
            dest,
            MessagePriority::Normal,
            json_payload(serde_json::json!("x")),
            1,
        )
        .await
}

#[tokio::test]
async fn simple_route_and_deliver() {
    let bridge = Arc::new(CorpusCallosum::new().with_event_store(Box::new(InMemoryEventStore::default())));
    bridge.start().await.unwrap();

    let mut feed = bridge.subscribe("consumer-1", TractType::External).await;

    let id = bridge
        .route_message(
            TractType::Internal,
            TractType::External,
            MessagePriority::Normal,
            json_payload(serde_json::json!("x")),
            1,
        )
        .await;
    assert!(id >= 0);

    let delivered = tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("delivery should not hang")
        .expect("one message expected");
    match &delivered.payload {
        MessagePayload::Json(v) => assert_eq!(v, &serde_json::json!("x")),
        other => panic!("unexpected payload: {:?}", other),
    }

    let stats = bridge.get_stats().await;
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.messages_to_external, 1);
    assert_eq!(stats.message_loss_count, 0);

    feed.cancel().await;
    bridge.stop().await;
}

#[tokio::test]
async fn message_ids_are_monotonic() {
    let bridge = CorpusCallosum::new();
    bridge.start().await.unwrap();

    let mut last = -1;
    for _ in 0..50 {
        let id = route_simple(&bridge, TractType::Internal, TractType::External).await;
        assert!(id > last);
        last = id;
    }
    bridge.stop().await;
}

#[tokio::test]
async fn backpressure_delivers_everything_in_order() {
    let bridge = Arc::new(CorpusCallosum::with_configs(
        BackpressureConfig::default(),
        Default::default(),
    ));
    bridge.start().await.unwrap();

    let mut feed = bridge.subscribe("slow-consumer", TractType::External).await;

    for i in 0..20 {
        let id = bridge
            .route_message(
                TractType::Internal,
                TractType::External,
                MessagePriority::Normal,
                json_payload(serde_json::json!({ "n": i })),
                0,
            )
            .await;
        assert!(id >= 0, "message {} should route", i);
    }

    let mut seen = Vec::new();
    for _ in 0..20 {
        let message = tokio::time::timeout(Duration::from_secs(2), feed.next())
            .await
            .expect("delivery should not hang")
            .expect("expected a message");
        seen.push(message.id);
    }
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    assert_eq!(seen, sorted, "per-subscriber order must equal publish order");

    let stats = bridge.get_stats().await;
    assert_eq!(stats.total_messages, 20);
    assert_eq!(stats.message_loss_count, 0);

    feed.cancel().await;
    bridge.stop().await;
}

#[tokio::test]
async fn buffer_overflow_counts_loss() {
    let bridge = CorpusCallosum::with_configs(
        BackpressureConfig {
            buffer_size: 10,
            ..Default::default()
        },
        Default::default(),
    );
    // No subscriber and no distributor ticks draining anything.

    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(route_simple(&bridge, TractType::Internal, TractType::External).await);
    }

    assert!(ids[..10].iter().all(|id| *id >= 0));
    assert_eq!(ids[10], -1);
    assert_eq!(ids[11], -1);

    let stats = bridge.get_stats().await;
    assert_eq!(stats.total_messages, 10);
    assert_eq!(stats.message_loss_count, 2);
}

#[tokio::test]
async fn balanced_dialogue_produces_emergence() {
    let bridge = CorpusCallosum::new().with_event_store(Box::new(InMemoryEventStore::default()));
    bridge.start().await.unwrap();

    for _ in 0..60 {
        assert!(route_simple(&bridge, TractType::Internal, TractType::External).await >= 0);
        assert!(route_simple(&bridge, TractType::External, TractType::Internal).await >= 0);
    }

    let stats = bridge.get_stats().await;
    assert_eq!(stats.total_messages, 120);

    let metrics = bridge.get_consciousness_metrics().await.unwrap();
    assert!(metrics.dialogue_balance_ratio >= 0.9);
    assert!(metrics.emergence_score > 0.5);
    assert!(metrics.balanced_dialogue_events > 0);

    let events = bridge.get_emergence_events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.pattern_type == "balanced_dialogue"));

    bridge.stop().await;
}

#[tokio::test]
async fn unbalanced_traffic_stays_silent() {
    let bridge = CorpusCallosum::new().with_event_store(Box::new(InMemoryEventStore::default()));
    bridge.start().await.unwrap();

    for _ in 0..60 {
        assert!(route_simple(&bridge, TractType::Internal, TractType::External).await >= 0);
    }

    let metrics = bridge.get_consciousness_metrics().await.unwrap();
    assert_eq!(metrics.dialogue_balance_ratio, 0.0);
    assert_eq!(metrics.emergence_score, 0.0);
    assert!(bridge.get_emergence_events().is_empty());

    bridge.stop().await;
}

#[tokio::test]
async fn replay_projection_is_strictly_increasing() {
    let bridge = CorpusCallosum::new().with_event_store(Box::new(InMemoryEventStore::default()));
    bridge.start().await.unwrap();

    for _ in 0..30 {
        route_simple(&bridge, TractType::Internal, TractType::External).await;
    }

    let replayed = bridge
        .replay_history(None, None)
        .expect("event store attached")
        .collect()
        .await;
    assert_eq!(replayed.len(), 30);
    for window in replayed.windows(2) {
        assert!(window[1].message_id > window[0].message_id);
    }

    bridge.stop().await;
}

#[tokio::test]
async fn routing_survives_unwritable_event_log() {
    let dir = tempfile::tempdir().unwrap();
    // Make the "parent directory" a regular file so every disk write fails.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let store = DurableEventStore::new(blocker.join("events.jsonl"), 1000);

    let bridge = CorpusCallosum::new().with_event_store(Box::new(store));
    bridge.start().await.unwrap();

    for _ in 0..10 {
        let id = route_simple(&bridge, TractType::Internal, TractType::External).await;
        assert!(id >= 0, "routing must not depend on the durable backend");
    }
    // Metrics still aggregate in memory.
    let metrics = bridge.get_consciousness_metrics().await.unwrap();
    assert_eq!(metrics.total_messages, 10);

    bridge.stop().await;
}

#[tokio::test]
async fn reset_stats_zeroes_counters() {
    let bridge = CorpusCallosum::new();
    bridge.start().await.unwrap();
    route_simple(&bridge, TractType::Internal, TractType::External).await;

    bridge.reset_stats().await;
    let stats = bridge.get_stats().await;
    assert_eq!(stats.total_messages, 0);
    assert_eq!(stats.message_loss_count, 0);

    bridge.stop().await;
}
