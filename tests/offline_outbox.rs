use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sos_core::capabilities::{DeliveryError, KeyValueStore, KvKey, MemoryKvStore};
use sos_core::testing::{RecordingDelivery, ScriptedGeolocation, TestPlatform};
use sos_core::{
    AlertOrchestrator, AlertPayload, AlertQueue, AlertSource, ConnectivityMonitor, LatLon,
    RelayConfig, TriggerOutcome,
};

async fn wait_until_drained(queue: &AlertQueue) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue was not drained after reconnect");
}

#[tokio::test]
async fn full_offline_to_online_flow() {
    let platform = TestPlatform::new(
        ScriptedGeolocation::fixed(10.0, 20.0),
        RecordingDelivery::succeeding(),
    );
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let sos = Arc::new(
        AlertOrchestrator::new(
            RelayConfig::default(),
            platform.capabilities(),
            connectivity.clone(),
        )
        .unwrap(),
    );
    let _listener = sos.listen_for_reconnects().unwrap();

    // 1. Offline: both triggers are queued, nothing hits the network
    assert_eq!(sos.trigger_manual().await.unwrap(), TriggerOutcome::Queued);
    assert_eq!(sos.trigger(AlertSource::Ai).await.unwrap(), TriggerOutcome::Queued);
    assert_eq!(platform.delivery.attempt_count(), 0);

    let queued = sos.queue().pending().await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].source(), AlertSource::Manual);
    assert_eq!(queued[1].source(), AlertSource::Ai);

    // 2. Persisted slot is a plain JSON array under the well-known key
    let key = KvKey::new("sos_alert_queue").unwrap();
    let raw = platform.kv.get(&key).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value.as_array().map(Vec::len), Some(2));
    assert_eq!(value[0]["location"]["lat"], 10.0);

    // 3. Go online: the listener drains in enqueue order
    connectivity.set_online(true);
    wait_until_drained(sos.queue()).await;

    assert_eq!(platform.delivery.attempts(), queued);
}

#[tokio::test]
async fn failed_drain_waits_for_next_reconnect() {
    let platform = TestPlatform::new(
        ScriptedGeolocation::fixed(10.0, 20.0),
        RecordingDelivery::succeeding(),
    );
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let sos = Arc::new(
        AlertOrchestrator::new(
            RelayConfig::default(),
            platform.capabilities(),
            connectivity.clone(),
        )
        .unwrap(),
    );
    sos.trigger_manual().await.unwrap();

    // 1. Backend unreachable during the first reconnect
    platform.delivery.set_should_fail(true);
    let report = sos.flush_queue().await.unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(sos.queue().len().await.unwrap(), 1);

    // 2. Second reconnect succeeds
    platform.delivery.set_should_fail(false);
    let report = sos.flush_queue().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(sos.queue().is_empty().await.unwrap());
    assert_eq!(platform.delivery.attempt_count(), 2);
}

#[tokio::test]
async fn corrupt_persisted_queue_does_not_block_new_alerts() {
    let platform = TestPlatform::new(
        ScriptedGeolocation::fixed(10.0, 20.0),
        RecordingDelivery::succeeding(),
    );
    let key = KvKey::new("sos_alert_queue").unwrap();
    platform.kv.set(&key, "{not json".into()).await.unwrap();
    let sos = AlertOrchestrator::new(
        RelayConfig::default(),
        platform.capabilities(),
        Arc::new(ConnectivityMonitor::new(false)),
    )
    .unwrap();

    assert!(sos.queue().is_empty().await.unwrap());
    sos.trigger_manual().await.unwrap();
    assert_eq!(sos.queue().len().await.unwrap(), 1);
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::test]
async fn queue_survives_restart_on_sqlite() {
    use sos_core::capabilities::SqliteKvStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");
    let key = KvKey::new("sos_alert_queue").unwrap();
    let alert = AlertPayload::new(
        LatLon::new(1.0, 2.0).unwrap(),
        AlertSource::Manual,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
    );

    {
        let store = Arc::new(SqliteKvStore::open(&path).unwrap());
        let queue = AlertQueue::new(store, key.clone());
        queue.enqueue(alert.clone()).await.unwrap();
    }

    let store = Arc::new(SqliteKvStore::open(&path).unwrap());
    let queue = AlertQueue::new(store, key);
    assert_eq!(queue.pending().await.unwrap(), vec![alert]);
}

fn alert(n: usize) -> AlertPayload {
    AlertPayload::new(
        LatLon::new((n % 90) as f64, 0.0).unwrap(),
        if n % 2 == 0 {
            AlertSource::Manual
        } else {
            AlertSource::Ai
        },
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(n as i64),
    )
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #[test]
    fn drain_delivers_each_alert_once_in_order(count in 0usize..40) {
        let (attempts, left) = run(async {
            let queue = AlertQueue::new(
                Arc::new(MemoryKvStore::new()),
                KvKey::new("sos_alert_queue").unwrap(),
            );
            for n in 0..count {
                queue.enqueue(alert(n)).await.unwrap();
            }
            let client = RecordingDelivery::succeeding();
            queue.drain(&client).await.unwrap();
            (client.attempts(), queue.len().await.unwrap())
        });

        prop_assert_eq!(attempts, (0..count).map(alert).collect::<Vec<_>>());
        prop_assert_eq!(left, 0);
    }

    #[test]
    fn drain_retains_exactly_the_failed_subset(
        failing in prop::collection::vec(any::<bool>(), 0..40)
    ) {
        let failed: HashSet<usize> = failing
            .iter()
            .enumerate()
            .filter_map(|(n, fail)| fail.then_some(n))
            .collect();
        let expected: Vec<_> = (0..failing.len())
            .filter(|n| failed.contains(n))
            .map(alert)
            .collect();

        let left = run(async {
            let queue = AlertQueue::new(
                Arc::new(MemoryKvStore::new()),
                KvKey::new("sos_alert_queue").unwrap(),
            );
            for n in 0..failing.len() {
                queue.enqueue(alert(n)).await.unwrap();
            }
            let rejected: Vec<_> = failed.iter().copied().map(alert).collect();
            let client = RecordingDelivery::with_rule(move |p| {
                if rejected.contains(p) {
                    Err(DeliveryError::Status(503))
                } else {
                    Ok(())
                }
            });
            queue.drain(&client).await.unwrap();
            queue.pending().await.unwrap()
        });

        prop_assert_eq!(left, expected);
    }
}
