use cac_core::{ComponentId, NamedEvent, PropagationConfig};
use cac_propagation::{
    BusEvent, MessageFilter, PropagateOptions, PropagationBus, Subscription, Topology,
};
use cac_test_utils::{drain_events, RecordingHandler};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn bus() -> PropagationBus {
    PropagationBus::new(PropagationConfig::default().with_retries(0, Duration::ZERO))
}

#[tokio::test]
async fn subscribers_see_messages_in_priority_order() {
    let bus = bus();
    let handler = Arc::new(RecordingHandler::new());
    bus.subscribe(Subscription::new("mcp", handler.clone()));

    for (change_type, priority) in [("low", 1), ("high", 5), ("mid", 3)] {
        bus.propagate(change_type, json!({}), PropagateOptions::broadcast().with_priority(priority))
            .unwrap();
    }
    let report = bus.drain_once().await;

    assert_eq!(report.delivered, 3);
    assert_eq!(handler.change_types(), vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn expired_messages_reach_nobody() {
    let bus = bus();
    let handler = Arc::new(RecordingHandler::new());
    bus.subscribe(Subscription::new("mcp", handler.clone()));
    let mut events = bus.events().subscribe();

    bus.propagate("stale", json!(null), PropagateOptions::broadcast().with_ttl(Duration::ZERO))
        .unwrap();
    let report = bus.drain_once().await;

    assert_eq!(report.expired, 1);
    assert!(handler.is_empty());
    let names: Vec<_> = drain_events(&mut events).iter().map(NamedEvent::name).collect();
    assert_eq!(names, vec!["message-queued", "message-expired"]);
}

#[tokio::test]
async fn one_failing_subscriber_does_not_block_others() {
    let bus = bus();
    let healthy = Arc::new(RecordingHandler::new());
    let broken = Arc::new(RecordingHandler::failing());
    bus.subscribe(Subscription::new("a", healthy.clone()));
    bus.subscribe(Subscription::new("b", broken.clone()));
    let mut events = bus.events().subscribe();

    bus.propagate("schema", json!({"v": 2}), PropagateOptions::broadcast())
        .unwrap();
    let report = bus.drain_once().await;

    assert_eq!(report.failed, 1);
    assert_eq!(healthy.len(), 1);
    assert_eq!(broken.len(), 1);
    let failed: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            BusEvent::MessageFailed { component_id, .. } => Some(component_id),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![ComponentId::new("b")]);
}

#[tokio::test]
async fn filters_and_targets_narrow_delivery() {
    let bus = bus();
    let schema_only = Arc::new(RecordingHandler::new());
    let everything = Arc::new(RecordingHandler::new());
    bus.subscribe(
        Subscription::new("a", schema_only.clone())
            .with_filter(MessageFilter::new().change_type("schema")),
    );
    bus.subscribe(Subscription::new("b", everything.clone()));

    bus.propagate("schema", json!({}), PropagateOptions::broadcast()).unwrap();
    bus.propagate("config", json!({}), PropagateOptions::broadcast()).unwrap();
    bus.propagate("config", json!({}), PropagateOptions::targeted(["a"])).unwrap();
    bus.drain_once().await;

    assert_eq!(schema_only.change_types(), vec!["schema"]);
    assert_eq!(everything.change_types(), vec!["schema", "config"]);
}

#[tokio::test]
async fn hierarchical_messages_follow_topology() {
    let topology = Topology::new().with_edge("gateway", ["auth", "cache"]);
    let bus = PropagationBus::with_topology(PropagationConfig::default(), topology);
    let auth = Arc::new(RecordingHandler::new());
    let cache = Arc::new(RecordingHandler::new());
    let unrelated = Arc::new(RecordingHandler::new());
    bus.subscribe(Subscription::new("auth", auth.clone()));
    bus.subscribe(Subscription::new("cache", cache.clone()));
    bus.subscribe(Subscription::new("billing", unrelated.clone()));

    bus.propagate("route-change", json!({}), PropagateOptions::hierarchical("gateway"))
        .unwrap();
    let report = bus.drain_once().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(auth.len(), 1);
    assert_eq!(cache.len(), 1);
    assert!(unrelated.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_loop_delivers_until_shutdown() {
    let bus = Arc::new(bus());
    let handler = Arc::new(RecordingHandler::new());
    bus.subscribe(Subscription::new("mcp", handler.clone()));
    let (tx, rx) = watch::channel(false);
    let task = bus.spawn_drain_loop(rx);

    bus.propagate("tick", json!({}), PropagateOptions::broadcast()).unwrap();
    tokio::time::sleep(bus.config().drain_interval() * 3).await;
    assert_eq!(handler.len(), 1);

    tx.send(true).unwrap();
    task.await.unwrap();
    bus.propagate("late", json!({}), PropagateOptions::broadcast()).unwrap();
    tokio::time::sleep(bus.config().drain_interval() * 3).await;
    assert_eq!(bus.queue_len(), 1);
}
