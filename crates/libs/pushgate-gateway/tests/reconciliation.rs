use std::sync::Arc;

use pushgate_gateway::{Gateway, GatewayConfig, NotificationStream};
use pushgate_ipc::{
    ArgBag, Backend, BufferSize, CommandRequest, CommandResponse, MaxFrequency, MemoryBackend,
    MpnSubscription, MpnSubscriptionConfig, MpnSubscriptionSnapshot, SubscriptionMode,
};
use serde_json::{json, Value};

struct Harness {
    gateway: Gateway,
    backend: Arc<MemoryBackend>,
    _stream: NotificationStream,
}

impl Harness {
    fn new(config: GatewayConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new().expect("memory backend"));
        let backend_dyn: Arc<dyn Backend> = backend.clone();
        let (gateway, stream) = Gateway::new(config, backend_dyn);
        Self {
            gateway,
            backend,
            _stream: stream,
        }
    }

    fn ok(&self, command: &str, arguments: Value) -> Value {
        let arguments = ArgBag::from_value(arguments).expect("arguments object");
        let response = self
            .gateway
            .dispatch(CommandRequest::new(command, arguments));
        match response {
            CommandResponse::Success { payload } => payload,
            other => panic!("{command} failed: {other:?}"),
        }
    }

    /// Creates client `handle` and plants a server-side subscription on it.
    fn client_with_seed(&self, handle: &str, subscription_id: Option<&str>) {
        self.ok("Client.create", json!({ "id": handle }));
        let client = self.backend.clients().pop().expect("backend client");
        client.seed_mpn_subscription(alert_config(), subscription_id);
    }
}

fn alert_config() -> MpnSubscriptionConfig {
    let mut config = MpnSubscriptionConfig::new(SubscriptionMode::Merge);
    config.items = Some(vec!["item1".to_string()]);
    config.fields = Some(vec!["last_price".to_string()]);
    config.notification_format = Some(r#"{"android":{}}"#.to_string());
    config.trigger_expression = Some("${last_price} > 10".to_string());
    config
}

fn snapshots(payload: &Value) -> Vec<MpnSubscriptionSnapshot> {
    serde_json::from_value(payload["extra"].clone()).expect("snapshot list")
}

fn known(payload: &Value) -> Vec<String> {
    serde_json::from_value(payload["result"].clone()).expect("handle list")
}

#[test]
fn repeated_queries_do_not_duplicate_handles() {
    let harness = Harness::new(GatewayConfig::default());
    harness.client_with_seed("c1", Some("X1"));

    let first = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert!(known(&first).is_empty());
    let discovered = snapshots(&first);
    assert_eq!(discovered.len(), 1);
    let snapshot = &discovered[0];
    assert!(snapshot.id.starts_with("mpnsub-server"));
    assert_eq!(snapshot.subscription_id.as_deref(), Some("X1"));
    assert_eq!(snapshot.status, "SUBSCRIBED");
    assert_eq!(
        snapshot.actual_trigger.as_deref(),
        Some("${last_price} > 10")
    );
    assert_eq!(first["extra"][0]["group"], Value::Null);

    let second = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(known(&second), vec![snapshot.id.clone()]);
    assert!(snapshots(&second).is_empty());

    let count = harness
        .gateway
        .registry()
        .with(|maps| maps.mpn_subscriptions.len());
    assert_eq!(count, 1);
}

#[test]
fn same_server_id_under_two_clients_gets_two_handles() {
    let harness = Harness::new(GatewayConfig::default());
    harness.client_with_seed("c1", Some("X1"));
    harness.client_with_seed("c2", Some("X1"));

    let for_c1 = snapshots(&harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" })));
    let for_c2 = snapshots(&harness.ok("Client.getMpnSubscriptions", json!({ "id": "c2" })));
    assert_eq!(for_c1.len(), 1);
    assert_eq!(for_c2.len(), 1);
    assert_ne!(for_c1[0].id, for_c2[0].id);

    let again = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(known(&again), vec![for_c1[0].id.clone()]);
    assert!(snapshots(&again).is_empty());
}

#[test]
fn unconfirmed_subscriptions_wait_for_their_id() {
    let harness = Harness::new(GatewayConfig::default());
    harness.ok("Client.create", json!({ "id": "c1" }));
    let client = harness.backend.clients().pop().expect("backend client");
    let pending = client.seed_mpn_subscription(alert_config(), None);

    let before = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(before, json!({ "result": [], "extra": [] }));

    pending.confirm_id("X9");
    let after = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(snapshots(&after).len(), 1);
}

#[test]
fn find_reports_unknown_discovered_and_known() {
    let harness = Harness::new(GatewayConfig::default());
    harness.client_with_seed("c1", Some("X1"));

    let missing = harness.ok(
        "Client.findMpnSubscription",
        json!({ "id": "c1", "subscriptionId": "nope" }),
    );
    assert_eq!(missing, json!({}));

    let discovered = harness.ok(
        "Client.findMpnSubscription",
        json!({ "id": "c1", "subscriptionId": "X1" }),
    );
    let snapshot: MpnSubscriptionSnapshot =
        serde_json::from_value(discovered["extra"].clone()).expect("snapshot");

    let known = harness.ok(
        "Client.findMpnSubscription",
        json!({ "id": "c1", "subscriptionId": "X1" }),
    );
    assert_eq!(known, json!({ "result": snapshot.id }));
}

#[test]
fn configured_prefix_names_discovered_handles() {
    let config = GatewayConfig {
        synthetic_handle_prefix: "srv-".to_string(),
        ..GatewayConfig::default()
    };
    let harness = Harness::new(config);
    harness.client_with_seed("c1", Some("X1"));

    let found = snapshots(&harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" })));
    assert!(found[0].id.starts_with("srv-"));
}

#[test]
fn coalescing_subscribe_leaves_one_handle_per_server_id() {
    let harness = Harness::new(GatewayConfig::default());
    harness.client_with_seed("c1", Some("X1"));
    let first = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(snapshots(&first).len(), 1);

    harness.ok(
        "Client.registerForMpn",
        json!({ "id": "c1", "mpnDevId": "d1", "deviceToken": "token-1" }),
    );
    let subscription = json!({
        "id": "z1",
        "mode": "MERGE",
        "items": ["item1"],
        "fields": ["last_price"],
        "notificationFormat": r#"{"android":{}}"#,
        "trigger": "${last_price} > 10",
    });
    harness.ok(
        "Client.subscribeMpn",
        json!({ "id": "c1", "subscription": subscription, "coalescing": true }),
    );

    let handles: Vec<String> = harness.gateway.registry().with(|maps| {
        maps.mpn_subscriptions
            .iter()
            .map(|(handle, _)| handle.to_owned())
            .collect()
    });
    assert_eq!(handles, vec!["z1".to_string()]);

    let second = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    assert_eq!(second, json!({ "result": ["z1"], "extra": [] }));
}

#[test]
fn discovered_snapshot_survives_a_round_trip() {
    let harness = Harness::new(GatewayConfig::default());
    harness.ok("Client.create", json!({ "id": "c1" }));
    let client = harness.backend.clients().pop().expect("backend client");
    let mut config = MpnSubscriptionConfig::new(SubscriptionMode::Distinct);
    config.items = Some(vec!["news".to_string()]);
    config.fields = Some(vec!["headline".to_string(), "ts".to_string()]);
    config.data_adapter = Some("NEWS".to_string());
    config.requested_buffer_size = Some(BufferSize::Limited(5));
    config.requested_max_frequency = Some(MaxFrequency::Unfiltered);
    let seeded = client.seed_mpn_subscription(config, Some("X3"));

    let payload = harness.ok("Client.getMpnSubscriptions", json!({ "id": "c1" }));
    let wire = payload["extra"][0].clone();
    let fields = wire.as_object().expect("snapshot object");
    assert_eq!(fields.len(), 16);
    assert_eq!(fields.get("actualNotificationFormat"), Some(&Value::Null));
    assert_eq!(fields.get("actualTrigger"), Some(&Value::Null));

    let parsed: MpnSubscriptionSnapshot =
        serde_json::from_value(wire.clone()).expect("snapshot");
    let expected = MpnSubscriptionSnapshot {
        id: parsed.id.clone(),
        mode: SubscriptionMode::Distinct,
        items: Some(vec!["news".to_string()]),
        fields: Some(vec!["headline".to_string(), "ts".to_string()]),
        group: None,
        schema: None,
        data_adapter: Some("NEWS".to_string()),
        buffer_size: Some(BufferSize::Limited(5)),
        requested_max_frequency: Some(MaxFrequency::Unfiltered),
        notification_format: None,
        trigger: None,
        actual_notification_format: None,
        actual_trigger: None,
        status_ts: seeded.status_timestamp(),
        status: "SUBSCRIBED".to_string(),
        subscription_id: Some("X3".to_string()),
    };
    assert!(parsed.id.starts_with("mpnsub-server"));
    assert_eq!(parsed, expected);
    assert_eq!(serde_json::to_value(&parsed).expect("serialize"), wire);
}
