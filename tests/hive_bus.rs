use chrono::{Duration as ChronoDuration, Utc};
use hivegate::config::HiveConfig;
use hivegate::hive::{HiveBus, HiveEvent, LivenessStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_silent_subsystem_stops_counting() {
    let bus = HiveBus::with_defaults();
    bus.register("a").await;
    bus.register("b").await;

    let now = Utc::now();
    bus.heartbeat_at("a", 0.8, now).await;
    bus.heartbeat_at("b", 0.4, now).await;
    assert!(approx(bus.coherence().await, 0.6));

    // b goes quiet past the stale threshold, a keeps reporting
    let later = now + ChronoDuration::seconds(11);
    bus.heartbeat_at("a", 0.8, later).await;
    let transitions = bus.sweep_at(later).await;

    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].id, "b");
    assert_eq!(transitions[0].to, LivenessStatus::Stale);

    let state = bus.snapshot().await;
    assert!(approx(state.hive_mind_coherence, 0.8));
    assert_eq!(state.active_ids, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_snapshot_sweeps_lazily() {
    let bus = HiveBus::with_defaults();
    bus.register("a").await;
    bus.register("b").await;
    bus.heartbeat("a", 0.9).await;
    bus.heartbeat_at("b", 0.1, Utc::now() - ChronoDuration::seconds(120))
        .await;

    // No explicit sweep: the read applies the decay itself
    let state = bus.snapshot().await;
    assert_eq!(state.get("b").unwrap().status, LivenessStatus::Offline);
    assert_eq!(state.get("b").unwrap().weight, 0.0);
    assert!(approx(state.hive_mind_coherence, 0.9));
}

#[tokio::test]
async fn test_stale_weight_factor_keeps_partial_vote() {
    let bus = HiveBus::new(HiveConfig {
        stale_weight_factor: 0.5,
        ..HiveConfig::default()
    });
    bus.register("a").await;
    bus.register("b").await;

    let now = Utc::now();
    bus.heartbeat_at("a", 1.0, now).await;
    bus.heartbeat_at("b", 0.0, now - ChronoDuration::seconds(20))
        .await;
    bus.sweep_at(now).await;

    // a weight 1.0, b weight 0.5
    let state = bus.snapshot().await;
    assert!(approx(state.hive_mind_coherence, 1.0 / 1.5));
}

#[tokio::test]
async fn test_heartbeat_revives_offline_subsystem() {
    let bus = HiveBus::with_defaults();
    bus.register_with_weight("a", 2.0).await;
    bus.heartbeat_at("a", 0.5, Utc::now() - ChronoDuration::seconds(300))
        .await;
    assert_eq!(
        bus.snapshot().await.get("a").unwrap().status,
        LivenessStatus::Offline
    );

    bus.heartbeat("a", 0.7).await;

    let state = bus.snapshot().await;
    let entry = state.get("a").unwrap();
    assert_eq!(entry.status, LivenessStatus::Active);
    assert_eq!(entry.weight, 2.0);
    assert!(approx(state.hive_mind_coherence, 0.7));
}

#[tokio::test]
async fn test_unknown_heartbeat_is_noop() {
    let bus = HiveBus::with_defaults();
    bus.heartbeat("ghost", 0.9).await;

    assert!(bus.is_empty().await);
    assert_eq!(bus.coherence().await, 0.0);
    assert_eq!(bus.stats().heartbeats_rejected, 1);
}

#[tokio::test]
async fn test_assistance_request_reaches_subscriber() {
    let bus = HiveBus::with_defaults();
    let mut rx = bus.subscribe();

    bus.request_assistance("risk", "sentiment", "need fresh read");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        HiveEvent::Message(msg) => {
            assert!(msg.is_for("sentiment"));
            assert!(!msg.is_for("momentum"));
            assert_eq!(msg.assistance_reason(), Some("need fresh read"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_without_subscribers_is_dropped() {
    let bus = HiveBus::with_defaults();
    bus.broadcast("a", "ping", serde_json::json!({}));

    let stats = bus.stats();
    assert_eq!(stats.messages_dropped, 1);
    assert_eq!(stats.messages_published, 0);
}

#[tokio::test]
async fn test_panicking_listener_keeps_getting_snapshots() {
    let bus = HiveBus::with_defaults();
    let flaky_seen = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));

    let flaky_counter = flaky_seen.clone();
    let _flaky = bus.subscribe_fn("flaky", move |event| {
        if matches!(event, HiveEvent::State(_)) {
            // Only the first snapshot blows up
            if flaky_counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("listener bug");
            }
        }
    });
    let counter = seen.clone();
    let _good = bus.subscribe_fn("good", move |event| {
        if matches!(event, HiveEvent::State(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    bus.register("a").await;
    bus.heartbeat("a", 0.5).await;
    bus.heartbeat("a", 0.6).await;

    for _ in 0..50 {
        if seen.load(Ordering::SeqCst) >= 3 && flaky_seen.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(flaky_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = HiveBus::with_defaults();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let handle = bus.subscribe_fn("counting", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    handle.unsubscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    bus.register("a").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_aggregate_stays_in_unit_range_for_random_sequences() {
    let ids = ["a", "b", "c", "d", "e"];
    let weights = [0.0, 0.5, 1.0, 7.0, 1e300, f64::MAX, f64::INFINITY, f64::NAN, -3.0];
    let coherences = [0.0, 0.3, 1.0, 2.5, -1.0, f64::NAN, f64::INFINITY];

    for seed in 0..32u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let bus = HiveBus::new(HiveConfig {
            stale_weight_factor: 0.5,
            ..HiveConfig::default()
        });
        let start = Utc::now();

        for step in 0..200i64 {
            let id = ids[rng.gen_range(0..ids.len())];
            let at = start + ChronoDuration::seconds(step);
            match rng.gen_range(0..5) {
                0 => {
                    let weight = weights[rng.gen_range(0..weights.len())];
                    bus.register_with_weight(id, weight).await;
                }
                1 => bus.unregister(id).await,
                2 => {
                    bus.sweep_at(at + ChronoDuration::seconds(rng.gen_range(0..120)))
                        .await;
                }
                _ => {
                    let coherence = coherences[rng.gen_range(0..coherences.len())];
                    bus.heartbeat_at(id, coherence, at).await;
                }
            }

            let state = bus.snapshot().await;
            let agg = state.hive_mind_coherence;
            assert!(
                (0.0..=1.0).contains(&agg),
                "seed {} step {}: aggregate {} out of range",
                seed,
                step,
                agg
            );
            for entry in state.subsystems.values() {
                assert!(entry.weight.is_finite() && entry.weight >= 0.0);
            }
        }
    }
}
