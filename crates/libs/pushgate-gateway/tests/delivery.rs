use std::io::Write;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use pushgate_gateway::forwarder::SubscriptionForwarder;
use pushgate_gateway::notify;
use pushgate_gateway::{spawn_delivery, GatewayConfig, NotificationSink};
use pushgate_ipc::{
    Backend, MemoryBackend, Notification, Subscription, SubscriptionConfig, SubscriptionListener,
    SubscriptionMode,
};
use serde_json::Value;
use tokio::sync::oneshot;

fn lost_updates(notifications: &[Notification], handle: &str) -> Vec<u64> {
    notifications
        .iter()
        .filter(|notification| notification.handle("subId") == Some(handle))
        .map(|notification| {
            notification
                .arguments
                .get("lostUpdates")
                .and_then(Value::as_u64)
                .expect("lostUpdates")
        })
        .collect()
}

#[test]
fn per_handle_order_survives_concurrent_callbacks() {
    let backend = MemoryBackend::new().expect("memory backend");
    let (notifier, mut stream) = notify::channel();

    let raise = |handle: &'static str| {
        let subscription: Arc<dyn Subscription> = backend
            .create_subscription(SubscriptionConfig::new(SubscriptionMode::Raw))
            .expect("subscription");
        let forwarder = SubscriptionForwarder::new(handle, &subscription, &notifier);
        thread::spawn(move || {
            for n in 0..200u32 {
                forwarder.on_item_lost_updates(None, 1, n);
            }
            drop(subscription);
        })
    };
    let first = raise("s1");
    let second = raise("s2");
    first.join().expect("s1 thread");
    second.join().expect("s2 thread");
    drop(notifier);

    let all: Vec<Notification> = std::iter::from_fn(|| stream.try_recv()).collect();
    for handle in ["s1", "s2"] {
        let expected: Vec<u64> = (0..200).collect();
        assert_eq!(lost_updates(&all, handle), expected, "order for {handle}");
    }
}

struct CollectingSink {
    wanted: usize,
    seen: Vec<String>,
    done: Option<oneshot::Sender<Vec<String>>>,
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn deliver(&mut self, notification: Notification) -> std::io::Result<()> {
        self.seen.push(notification.event);
        if self.seen.len() == self.wanted {
            if let Some(done) = self.done.take() {
                let _ = done.send(self.seen.clone());
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn delivery_task_hands_events_to_the_sink_in_order() {
    let backend = MemoryBackend::new().expect("memory backend");
    let (notifier, stream) = notify::channel();
    let (done, collected) = oneshot::channel();
    let sink = CollectingSink {
        wanted: 3,
        seen: Vec::new(),
        done: Some(done),
    };
    let task = spawn_delivery(stream, sink);

    let subscription: Arc<dyn Subscription> = backend
        .create_subscription(SubscriptionConfig::new(SubscriptionMode::Merge))
        .expect("subscription");
    let forwarder = SubscriptionForwarder::new("s1", &subscription, &notifier);
    forwarder.on_subscription();
    forwarder.on_end_of_snapshot(Some("item1"), 1);
    forwarder.on_unsubscription();

    let events = collected.await.expect("sink finished");
    assert_eq!(
        events,
        vec![
            "SubscriptionListener.onSubscription",
            "SubscriptionListener.onEndOfSnapshot",
            "SubscriptionListener.onUnsubscription",
        ]
    );
    drop(forwarder);
    drop(notifier);
    task.await.expect("delivery task");
}

#[test]
fn config_loads_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "synthetic_handle_prefix = \"srv-\"\nlenient_client_lookup = true\nlog_filter = \"debug\""
    )
    .expect("write config");

    let config = GatewayConfig::from_path(file.path()).expect("config");
    assert_eq!(config.synthetic_handle_prefix, "srv-");
    assert!(config.lenient_client_lookup);
    assert_eq!(config.log_filter, "debug");
    assert_eq!(
        config.command_buffer,
        GatewayConfig::default().command_buffer
    );
}

#[test]
fn config_rejects_unknown_keys() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "synthetic_prefix = \"srv-\"").expect("write config");

    let err = GatewayConfig::from_path(file.path()).expect_err("unknown key");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
