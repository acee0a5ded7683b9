use std::sync::Arc;
use std::time::Duration;

use pushgate_gateway::registry::Entry;
use pushgate_gateway::{Gateway, GatewayConfig, NotificationStream};
use pushgate_ipc::{
    ArgBag, Backend, CommandRequest, CommandResponse, MemoryBackend, Notification,
    SubscriptionConfig, SubscriptionMode,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);
const SERVER: &str = "http://push.example.com";

struct Harness {
    gateway: Gateway,
    backend: Arc<MemoryBackend>,
    stream: NotificationStream,
}

impl Harness {
    fn new() -> Self {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
        let backend = Arc::new(MemoryBackend::new().expect("memory backend"));
        let backend_dyn: Arc<dyn Backend> = backend.clone();
        let (gateway, stream) = Gateway::new(GatewayConfig::default(), backend_dyn);
        Self {
            gateway,
            backend,
            stream,
        }
    }

    fn call(&self, command: &str, arguments: Value) -> CommandResponse {
        let arguments = ArgBag::from_value(arguments).expect("arguments object");
        self.gateway
            .dispatch(CommandRequest::new(command, arguments))
    }

    fn ok(&self, command: &str, arguments: Value) -> Value {
        match self.call(command, arguments) {
            CommandResponse::Success { payload } => payload,
            other => panic!("{command} failed: {other:?}"),
        }
    }

    /// Skips notifications until one matches.
    async fn expect(&mut self, matches: impl Fn(&Notification) -> bool) -> Notification {
        loop {
            let next = tokio::time::timeout(WAIT, self.stream.recv())
                .await
                .expect("timed out waiting for a notification")
                .expect("notification stream closed");
            if matches(&next) {
                return next;
            }
        }
    }
}

fn status_is(notification: &Notification, event: &str, status: &str) -> bool {
    notification.event == event
        && notification.arguments.get("status").and_then(Value::as_str) == Some(status)
}

#[tokio::test]
async fn create_connect_and_status_events_carry_the_client_handle() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );

    let duplicate = harness.call("Client.create", json!({ "id": "c1" }));
    assert_eq!(duplicate.error_code(), Some("ALREADY_EXISTS"));
    assert_eq!(harness.backend.clients().len(), 1);

    harness.ok("Client.connect", json!({ "id": "c1" }));
    let connected = harness
        .expect(|n| status_is(n, "ClientListener.onStatusChange", "CONNECTED:WS-STREAMING"))
        .await;
    assert_eq!(connected.handle("id"), Some("c1"));
    assert_eq!(
        harness.ok("Client.getStatus", json!({ "id": "c1" })),
        json!("CONNECTED:WS-STREAMING")
    );
}

#[tokio::test]
async fn connect_applies_details_and_options_first() {
    let mut harness = Harness::new();
    harness.ok("Client.create", json!({ "id": "c1" }));

    let refused = harness.call("Client.connect", json!({ "id": "c1" }));
    assert_eq!(refused.error_code(), Some("ILLEGAL_STATE"));

    harness.ok(
        "Client.connect",
        json!({
            "id": "c1",
            "connectionDetails": { "serverAddress": SERVER, "user": "alice" },
            "connectionOptions": { "forcedTransport": "HTTP-POLLING", "idleTimeout": 19000 },
        }),
    );
    harness
        .expect(|n| status_is(n, "ClientListener.onStatusChange", "CONNECTED:HTTP-POLLING"))
        .await;
}

#[tokio::test]
async fn subscribe_while_active_is_rejected_before_any_backend_call() {
    let harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    let subscription = json!({
        "id": "s1",
        "mode": "MERGE",
        "items": ["item1"],
        "fields": ["bid"],
    });
    harness.ok(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": subscription }),
    );
    assert_eq!(harness.backend.call_count("subscribe"), 1);

    let again = harness.call(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": { "id": "s1", "fields": ["ask"] } }),
    );
    assert_eq!(again.error_code(), Some("INVALID_STATE"));
    assert_eq!(harness.backend.call_count("subscribe"), 1);
    assert_eq!(harness.backend.call_count("configure_subscription"), 0);
}

#[tokio::test]
async fn known_inactive_subscription_is_merged_then_subscribed() {
    let harness = Harness::new();
    harness.ok("Client.create", json!({ "id": "c1" }));

    let mut config = SubscriptionConfig::new(SubscriptionMode::Merge);
    config.items = Some(vec!["item1".to_string()]);
    config.fields = Some(vec!["bid".to_string()]);
    let subscription = harness
        .backend
        .create_subscription(config)
        .expect("subscription");
    harness.gateway.registry().with(|maps| {
        maps.subscriptions
            .create(
                "s1",
                Entry::requested(Arc::clone(&subscription), Some("c1")),
            )
            .expect("register");
    });

    let wrong_mode = harness.call(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": { "id": "s1", "mode": "DISTINCT" } }),
    );
    assert_eq!(wrong_mode.error_code(), Some("INVALID_ARGUMENT"));

    harness.ok(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": { "id": "s1", "fields": ["bid", "ask"] } }),
    );
    let merged = subscription.config();
    assert_eq!(merged.items, Some(vec!["item1".to_string()]));
    assert_eq!(
        merged.fields,
        Some(vec!["bid".to_string(), "ask".to_string()])
    );
    assert!(subscription.is_active());
    assert_eq!(
        harness.ok("Client.getSubscriptions", json!({ "id": "c1" })),
        json!(["s1"])
    );
}

#[tokio::test]
async fn failed_subscribe_leaves_no_handle_behind() {
    let harness = Harness::new();
    harness.ok("Client.create", json!({ "id": "c1" }));

    let invalid = harness.call(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": { "id": "s1", "mode": "MERGE", "items": ["item1"] } }),
    );
    assert_eq!(invalid.error_code(), Some("ILLEGAL_ARGUMENT"));
    let lookup = harness.call("Subscription.isActive", json!({ "subId": "s1" }));
    assert_eq!(lookup.error_code(), Some("HANDLE_NOT_FOUND"));
}

#[tokio::test]
async fn subscription_events_and_unsubscribe() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok("Client.connect", json!({ "id": "c1" }));
    harness
        .expect(|n| status_is(n, "ClientListener.onStatusChange", "CONNECTED:WS-STREAMING"))
        .await;

    let subscription = json!({
        "id": "s1",
        "mode": "COMMAND",
        "items": ["portfolio"],
        "fields": ["key", "command", "qty"],
    });
    harness.ok(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": subscription }),
    );
    let subscribed = harness
        .expect(|n| n.event == "SubscriptionListener.onSubscription")
        .await;
    assert_eq!(subscribed.handle("subId"), Some("s1"));
    assert_eq!(subscribed.arguments.get("keyPosition"), Some(&json!(1)));
    assert_eq!(subscribed.arguments.get("commandPosition"), Some(&json!(2)));

    assert_eq!(
        harness.ok("Subscription.isSubscribed", json!({ "subId": "s1" })),
        json!(true)
    );
    harness.ok("Client.unsubscribe", json!({ "id": "c1", "subId": "s1" }));
    let ended = harness
        .expect(|n| n.event == "SubscriptionListener.onUnsubscription")
        .await;
    assert_eq!(ended.handle("subId"), Some("s1"));

    let gone = harness.call("Subscription.isActive", json!({ "subId": "s1" }));
    assert_eq!(gone.error_code(), Some("HANDLE_NOT_FOUND"));
}

#[tokio::test]
async fn message_outcome_is_stamped_with_the_message_handle() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok(
        "Client.sendMessage",
        json!({ "id": "c1", "message": "hello", "msgId": "m1" }),
    );

    let aborted = harness
        .expect(|n| n.event == "ClientMessageListener.onAbort")
        .await;
    assert_eq!(aborted.handle("msgId"), Some("m1"));
    assert_eq!(
        aborted.arguments.get("originalMessage"),
        Some(&json!("hello"))
    );
}

#[tokio::test]
async fn second_registration_while_first_is_in_flight_is_rejected() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d1", "deviceToken": "token-1" }),
    );

    let second = harness.call(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d2", "deviceToken": "token-2" }),
    );
    assert_eq!(second.error_code(), Some("INVALID_STATE"));
    assert_eq!(harness.backend.call_count("register_for_mpn"), 1);

    harness.ok("Client.connect", json!({ "id": "c1" }));
    let registered = harness
        .expect(|n| n.event == "MpnDeviceListener.onRegistered")
        .await;
    assert_eq!(registered.handle("mpnDevId"), Some("d1"));
    assert_eq!(
        registered.arguments.get("deviceToken"),
        Some(&json!("token-1"))
    );

    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d2", "deviceToken": "token-2" }),
    );
    assert_eq!(harness.backend.call_count("register_for_mpn"), 2);
}

#[tokio::test]
async fn clean_resources_forgets_handles_and_counts_them() {
    let harness = Harness::new();
    harness.ok("Client.create", json!({ "id": "c1" }));
    let subscription = json!({ "id": "s1", "mode": "RAW", "items": ["item1"], "fields": ["f"] });
    harness.ok(
        "Client.subscribe",
        json!({ "id": "c1", "subscription": subscription }),
    );

    let counts = harness.ok(
        "Client.cleanResources",
        json!({ "clientIds": ["c1", "ghost"], "subIds": ["s1"], "mpnSubIds": ["nope"] }),
    );
    assert_eq!(
        counts,
        json!({ "clients": 1, "subscriptions": 1, "mpnDevices": 0, "mpnSubscriptions": 0 })
    );
    let gone = harness.call("Client.getStatus", json!({ "id": "c1" }));
    assert_eq!(gone.error_code(), Some("HANDLE_NOT_FOUND"));

    harness.ok("Client.create", json!({ "id": "c1" }));
    assert_eq!(harness.backend.clients().len(), 2);
}

#[tokio::test]
async fn builder_produces_a_format_usable_by_subscribe_mpn() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok("Client.connect", json!({ "id": "c1" }));
    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d1", "deviceToken": "token-1" }),
    );
    harness
        .expect(|n| n.event == "MpnDeviceListener.onRegistered")
        .await;

    let format = harness.ok(
        "MpnBuilder.build",
        json!({ "title": "Quote", "body": "${last}" }),
    );
    let subscription = json!({
        "id": "ms1",
        "mode": "MERGE",
        "items": ["item1"],
        "fields": ["last"],
        "notificationFormat": format,
        "trigger": "Double.parseDouble(${last}) > 10",
    });
    harness.ok(
        "Client.subscribeMpn",
        json!({ "id": "c1", "subscription": subscription }),
    );
    let active = harness
        .expect(|n| status_is(n, "MpnSubscriptionListener.onStatusChanged", "SUBSCRIBED"))
        .await;
    assert_eq!(active.handle("mpnSubId"), Some("ms1"));
    let server_id = active.arguments.get("subscriptionId");
    assert!(server_id.and_then(Value::as_str).is_some());
}

#[tokio::test]
async fn reserved_prefix_is_refused_for_frontend_handles() {
    let harness = Harness::new();
    harness.ok("Client.create", json!({ "id": "c1" }));
    let subscription = json!({
        "id": "mpnsub-server7",
        "mode": "MERGE",
        "items": ["item1"],
        "fields": ["last"],
        "notificationFormat": "{}",
    });
    let refused = harness.call(
        "Client.subscribeMpn",
        json!({ "id": "c1", "subscription": subscription }),
    );
    assert_eq!(refused.error_code(), Some("INVALID_ARGUMENT"));
    assert_eq!(harness.backend.call_count("subscribe_mpn"), 0);
}

#[tokio::test]
async fn registering_another_device_retires_the_previous_one() {
    let mut harness = Harness::new();
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok("Client.connect", json!({ "id": "c1" }));
    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d1", "deviceToken": "token-1" }),
    );
    harness
        .expect(|n| {
            n.event == "MpnDeviceListener.onRegistered" && n.handle("mpnDevId") == Some("d1")
        })
        .await;
    let first = harness.backend.clients()[0].device().expect("first device");

    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d2", "deviceToken": "token-2" }),
    );
    harness
        .expect(|n| {
            n.event == "MpnDeviceListener.onRegistered" && n.handle("mpnDevId") == Some("d2")
        })
        .await;
    let second = harness.backend.clients()[0].device().expect("second device");

    let devices: Vec<String> = harness.gateway.registry().with(|maps| {
        maps.devices
            .iter()
            .map(|(handle, _)| handle.to_owned())
            .collect()
    });
    assert_eq!(devices, vec!["d2".to_string()]);

    // Failures are delivered in order: d1 reporting nothing before d2 shows
    // its forwarder is gone.
    first.reject_registration(1, "stale");
    second.reject_registration(2, "current");
    let failed = harness
        .expect(|n| n.event == "MpnDeviceListener.onRegistrationFailed")
        .await;
    assert_eq!(failed.handle("mpnDevId"), Some("d2"));
    assert_eq!(failed.arguments.get("errorCode"), Some(&json!(2)));
}

/// Connected client `c1` with device `d1` and active MPN subscriptions.
async fn with_mpn_subscriptions(harness: &mut Harness, handles: &[&str]) {
    harness.ok(
        "Client.create",
        json!({ "id": "c1", "serverAddress": SERVER }),
    );
    harness.ok("Client.connect", json!({ "id": "c1" }));
    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d1", "deviceToken": "token-1" }),
    );
    harness
        .expect(|n| n.event == "MpnDeviceListener.onRegistered")
        .await;
    for handle in handles {
        let subscription = json!({
            "id": handle,
            "mode": "MERGE",
            "items": [format!("item-{handle}")],
            "fields": ["last"],
            "notificationFormat": "{}",
        });
        harness.ok(
            "Client.subscribeMpn",
            json!({ "id": "c1", "subscription": subscription }),
        );
        harness
            .expect(|n| {
                status_is(n, "MpnSubscriptionListener.onStatusChanged", "SUBSCRIBED")
                    && n.handle("mpnSubId") == Some(*handle)
            })
            .await;
    }
}

fn mpn_handles(harness: &Harness) -> Vec<String> {
    harness.gateway.registry().with(|maps| {
        maps.mpn_subscriptions
            .iter()
            .map(|(handle, _)| handle.to_owned())
            .collect()
    })
}

#[tokio::test]
async fn unsubscribe_mpn_forgets_the_handle() {
    let mut harness = Harness::new();
    with_mpn_subscriptions(&mut harness, &["ms1", "ms2"]).await;

    harness.ok(
        "Client.unsubscribeMpn",
        json!({ "id": "c1", "mpnSubId": "ms1" }),
    );
    let ended = harness
        .expect(|n| status_is(n, "MpnSubscriptionListener.onStatusChanged", "UNKNOWN"))
        .await;
    assert_eq!(ended.handle("mpnSubId"), Some("ms1"));
    assert_eq!(mpn_handles(&harness), vec!["ms2".to_string()]);

    let gone = harness.call(
        "MpnSubscription.setTriggerExpression",
        json!({ "mpnSubId": "ms1", "trigger": null }),
    );
    assert_eq!(gone.error_code(), Some("HANDLE_NOT_FOUND"));
    let again = harness.call(
        "Client.unsubscribeMpn",
        json!({ "id": "c1", "mpnSubId": "ms1" }),
    );
    assert_eq!(again.error_code(), Some("HANDLE_NOT_FOUND"));
    assert_eq!(harness.backend.call_count("unsubscribe_mpn"), 1);
}

#[tokio::test]
async fn bulk_mpn_unsubscribe_keeps_handles_for_the_final_events() {
    let mut harness = Harness::new();
    with_mpn_subscriptions(&mut harness, &["ms1", "ms2"]).await;

    harness.ok(
        "Client.unsubscribeMpnSubscriptions",
        json!({ "id": "c1", "filter": "SUBSCRIBED" }),
    );
    let mut ended = Vec::new();
    for _ in 0..2 {
        let notification = harness
            .expect(|n| status_is(n, "MpnSubscriptionListener.onStatusChanged", "UNKNOWN"))
            .await;
        ended.push(notification.handle("mpnSubId").map(str::to_owned));
    }
    ended.sort();
    assert_eq!(
        ended,
        vec![Some("ms1".to_string()), Some("ms2".to_string())]
    );
    assert_eq!(
        mpn_handles(&harness),
        vec!["ms1".to_string(), "ms2".to_string()]
    );

    let refused = harness.call(
        "Client.unsubscribeMpnSubscriptions",
        json!({ "id": "c1", "filter": "EVERYTHING" }),
    );
    assert_eq!(refused.error_code(), Some("INVALID_ARGUMENT"));
}
