//! Event forwarders.
//!
//! One forwarder binds one handle to one backend object. Every callback is
//! turned into a named-argument bag, stamped with the handle under the
//! listener's fixed key, and handed to the [`Notifier`]. Forwarders hold the
//! backend object weakly: property-change callbacks read the current value
//! back from it at forwarding time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use pushgate_ipc::{
    ArgBag, ClientListener, ClientMessageListener, Handle, ItemUpdate, ListenerId, MpnDevice,
    MpnDeviceListener, MpnSubscription, MpnSubscriptionListener, Notification, PushClient,
    Subscription, SubscriptionListener, SubscriptionMode,
};
use serde_json::{json, Value};

use crate::notify::Notifier;
use crate::registry::Registry;

/// Handle key stamped on `ClientListener` notifications.
pub const CLIENT_KEY: &str = "id";
/// Handle key stamped on `SubscriptionListener` notifications.
pub const SUBSCRIPTION_KEY: &str = "subId";
/// Handle key stamped on `ClientMessageListener` notifications.
pub const MESSAGE_KEY: &str = "msgId";
/// Handle key stamped on `MpnDeviceListener` notifications.
pub const DEVICE_KEY: &str = "mpnDevId";
/// Handle key stamped on `MpnSubscriptionListener` notifications.
pub const MPN_SUBSCRIPTION_KEY: &str = "mpnSubId";

struct Core {
    listener: &'static str,
    key: &'static str,
    handle: Handle,
    notifier: Notifier,
    closed: AtomicBool,
}

impl Core {
    fn new(
        listener: &'static str,
        key: &'static str,
        handle: &str,
        notifier: &Notifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            listener,
            key,
            handle: handle.to_owned(),
            notifier: notifier.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Builds and sends one notification. Never fails and never panics into
    /// the backend thread that called us.
    fn emit(&self, event: &str, fill: impl FnOnce(&mut ArgBag)) {
        if self.closed.load(Ordering::Acquire) {
            log::debug!(
                "{}.{event} for torn-down {} dropped",
                self.listener,
                self.handle
            );
            return;
        }
        let mut arguments = ArgBag::new();
        fill(&mut arguments);
        arguments.insert(self.key, self.handle.clone());
        self.notifier
            .notify(Notification::new(format!("{}.{event}", self.listener), arguments));
    }

    fn emit_bare(&self, event: &str) {
        self.emit(event, |_| {});
    }

    fn emit_error(&self, event: &str, code: i32, message: &str) {
        self.emit(event, |args| {
            args.insert("errorCode", code)
                .insert("errorMessage", message);
        });
    }
}

/// Ties a forwarder to the registry entry of its handle.
///
/// Closing it makes the forwarder drop everything that still arrives, for
/// backend objects that keep a torn-down listener around.
pub struct Attachment {
    listener: ListenerId,
    core: Arc<Core>,
}

impl Attachment {
    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn close(&self) {
        self.core.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct ClientForwarder {
    core: Arc<Core>,
    client: Weak<dyn PushClient>,
}

impl ClientForwarder {
    pub fn new(handle: &str, client: &Arc<dyn PushClient>, notifier: &Notifier) -> Self {
        Self {
            core: Core::new("ClientListener", CLIENT_KEY, handle, notifier),
            client: Arc::downgrade(client),
        }
    }

    /// Registers a forwarder on `client` and returns its attachment.
    pub fn attach(handle: &str, client: &Arc<dyn PushClient>, notifier: &Notifier) -> Attachment {
        let forwarder = Arc::new(Self::new(handle, client, notifier));
        let core = Arc::clone(&forwarder.core);
        Attachment {
            listener: client.add_listener(forwarder),
            core,
        }
    }

    fn property_value(&self, property: &str) -> Option<Value> {
        let client = self.client.upgrade()?;
        let value = match property {
            "serverInstanceAddress" => json!(client.connection_details().server_instance_address),
            "serverSocketName" => json!(client.connection_details().server_socket_name),
            "clientIp" => json!(client.connection_details().client_ip),
            "sessionId" => json!(client.connection_details().session_id),
            "realMaxBandwidth" => json!(client.connection_options().real_max_bandwidth),
            "idleTimeout" => json!(client.connection_options().idle_timeout),
            "keepaliveInterval" => json!(client.connection_options().keepalive_interval),
            "pollingInterval" => json!(client.connection_options().polling_interval),
            _ => return None,
        };
        Some(value)
    }
}

impl ClientListener for ClientForwarder {
    fn on_status_change(&self, status: &str) {
        self.core.emit("onStatusChange", |args| {
            args.insert("status", status);
        });
    }

    fn on_server_error(&self, code: i32, message: &str) {
        self.core.emit_error("onServerError", code, message);
    }

    fn on_property_change(&self, property: &str) {
        let value = self.property_value(property);
        self.core.emit("onPropertyChange", |args| {
            args.insert("property", property);
            if let Some(value) = value {
                args.insert("value", value);
            }
        });
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

pub struct SubscriptionForwarder {
    core: Arc<Core>,
    subscription: Weak<dyn Subscription>,
}

impl SubscriptionForwarder {
    pub fn new(handle: &str, subscription: &Arc<dyn Subscription>, notifier: &Notifier) -> Self {
        Self {
            core: Core::new("SubscriptionListener", SUBSCRIPTION_KEY, handle, notifier),
            subscription: Arc::downgrade(subscription),
        }
    }

    pub fn attach(
        handle: &str,
        subscription: &Arc<dyn Subscription>,
        notifier: &Notifier,
    ) -> Attachment {
        let forwarder = Arc::new(Self::new(handle, subscription, notifier));
        let core = Arc::clone(&forwarder.core);
        Attachment {
            listener: subscription.add_listener(forwarder),
            core,
        }
    }

    fn item(args: &mut ArgBag, item_name: Option<&str>, item_pos: u32) {
        args.insert("itemName", item_name)
            .insert("itemPos", item_pos);
    }
}

impl SubscriptionListener for SubscriptionForwarder {
    fn on_clear_snapshot(&self, item_name: Option<&str>, item_pos: u32) {
        self.core.emit("onClearSnapshot", |args| {
            Self::item(args, item_name, item_pos);
        });
    }

    fn on_command_second_level_item_lost_updates(&self, lost_updates: u32, key: &str) {
        self.core.emit("onCommandSecondLevelItemLostUpdates", |args| {
            args.insert("lostUpdates", lost_updates).insert("key", key);
        });
    }

    fn on_command_second_level_subscription_error(&self, code: i32, message: &str, key: &str) {
        self.core.emit("onCommandSecondLevelSubscriptionError", |args| {
            args.insert("code", code)
                .insert("message", message)
                .insert("key", key);
        });
    }

    fn on_end_of_snapshot(&self, item_name: Option<&str>, item_pos: u32) {
        self.core.emit("onEndOfSnapshot", |args| {
            Self::item(args, item_name, item_pos);
        });
    }

    fn on_item_lost_updates(&self, item_name: Option<&str>, item_pos: u32, lost_updates: u32) {
        self.core.emit("onItemLostUpdates", |args| {
            Self::item(args, item_name, item_pos);
            args.insert("lostUpdates", lost_updates);
        });
    }

    fn on_item_update(&self, update: &ItemUpdate) {
        self.core.emit("onItemUpdate", |args| {
            Self::item(args, update.item_name.as_deref(), update.item_pos);
            args.insert("isSnapshot", update.snapshot);
            if let Some(changed) = update.changed_fields() {
                args.insert("changedFields", json!(changed));
            }
            if let Some(fields) = update.fields() {
                args.insert("fields", json!(fields));
            }
            if let Some(json_fields) = update.json_fields() {
                args.insert("jsonFields", json!(json_fields));
            }
            let changed_by_position = update.changed_fields_by_position();
            args.insert("changedFieldsByPosition", json!(changed_by_position));
            args.insert("fieldsByPosition", json!(update.fields_by_position()));
            let json_by_position = update.json_fields_by_position();
            args.insert("jsonFieldsByPosition", json!(json_by_position));
        });
    }

    fn on_subscription(&self) {
        let positions = self
            .subscription
            .upgrade()
            .filter(|subscription| subscription.config().mode == SubscriptionMode::Command)
            .map(|subscription| (subscription.command_position(), subscription.key_position()));
        self.core.emit("onSubscription", |args| {
            if let Some((command, key)) = positions {
                match (command, key) {
                    (Ok(command), Ok(key)) => {
                        args.insert("commandPosition", command)
                            .insert("keyPosition", key);
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        log::debug!("command positions unavailable: {err}");
                    }
                }
            }
        });
    }

    fn on_subscription_error(&self, code: i32, message: &str) {
        self.core.emit_error("onSubscriptionError", code, message);
    }

    fn on_unsubscription(&self) {
        self.core.emit_bare("onUnsubscription");
    }

    fn on_real_max_frequency(&self, frequency: Option<&str>) {
        self.core.emit("onRealMaxFrequency", |args| {
            args.insert("frequency", frequency);
        });
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Listener for one `sendMessage` call. It has no registry entry and lives as
/// long as the backend keeps it.
pub struct MessageForwarder {
    core: Arc<Core>,
}

impl MessageForwarder {
    pub fn new(msg_id: &str, notifier: &Notifier) -> Self {
        Self {
            core: Core::new("ClientMessageListener", MESSAGE_KEY, msg_id, notifier),
        }
    }

    fn original(args: &mut ArgBag, original_message: &str) {
        args.insert("originalMessage", original_message);
    }
}

impl ClientMessageListener for MessageForwarder {
    fn on_abort(&self, original_message: &str, sent_on_network: bool) {
        self.core.emit("onAbort", |args| {
            Self::original(args, original_message);
            args.insert("sentOnNetwork", sent_on_network);
        });
    }

    fn on_deny(&self, original_message: &str, code: i32, message: &str) {
        self.core.emit("onDeny", |args| {
            Self::original(args, original_message);
            args.insert("errorCode", code)
                .insert("errorMessage", message);
        });
    }

    fn on_discarded(&self, original_message: &str) {
        self.core
            .emit("onDiscarded", |args| Self::original(args, original_message));
    }

    fn on_error(&self, original_message: &str) {
        self.core
            .emit("onError", |args| Self::original(args, original_message));
    }

    fn on_processed(&self, original_message: &str, response: &str) {
        self.core.emit("onProcessed", |args| {
            Self::original(args, original_message);
            args.insert("response", response);
        });
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

/// Also settles the in-flight registration of its handle once the backend
/// answers the registration either way.
pub struct DeviceForwarder {
    core: Arc<Core>,
    device: Weak<dyn MpnDevice>,
    registry: Weak<Registry>,
}

impl DeviceForwarder {
    pub fn new(
        handle: &str,
        device: &Arc<dyn MpnDevice>,
        notifier: &Notifier,
        registry: &Arc<Registry>,
    ) -> Self {
        Self {
            core: Core::new("MpnDeviceListener", DEVICE_KEY, handle, notifier),
            device: Arc::downgrade(device),
            registry: Arc::downgrade(registry),
        }
    }

    pub fn attach(
        handle: &str,
        device: &Arc<dyn MpnDevice>,
        notifier: &Notifier,
        registry: &Arc<Registry>,
    ) -> Attachment {
        let forwarder = Arc::new(Self::new(handle, device, notifier, registry));
        let core = Arc::clone(&forwarder.core);
        Attachment {
            listener: device.add_listener(forwarder),
            core,
        }
    }

    fn settle(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.with(|maps| maps.settle_registration(&self.core.handle));
        }
    }
}

impl MpnDeviceListener for DeviceForwarder {
    fn on_registered(&self) {
        self.settle();
        let device = self.device.upgrade();
        self.core.emit("onRegistered", |args| {
            if let Some(device) = device {
                args.insert("applicationId", device.application_id())
                    .insert("deviceId", device.device_id())
                    .insert("deviceToken", device.device_token())
                    .insert("platform", device.platform())
                    .insert("previousDeviceToken", device.previous_device_token());
            }
        });
    }

    fn on_suspended(&self) {
        self.core.emit_bare("onSuspended");
    }

    fn on_resumed(&self) {
        self.core.emit_bare("onResumed");
    }

    fn on_status_changed(&self, status: &str, timestamp: i64) {
        self.core.emit("onStatusChanged", |args| {
            args.insert("status", status).insert("timestamp", timestamp);
        });
    }

    fn on_registration_failed(&self, code: i32, message: &str) {
        self.settle();
        self.core.emit_error("onRegistrationFailed", code, message);
    }

    fn on_subscriptions_updated(&self) {
        self.core.emit_bare("onSubscriptionsUpdated");
    }
}

// ── MPN subscriptions ─────────────────────────────────────────────────────────

pub struct MpnSubscriptionForwarder {
    core: Arc<Core>,
    subscription: Weak<dyn MpnSubscription>,
}

impl MpnSubscriptionForwarder {
    pub fn new(
        handle: &str,
        subscription: &Arc<dyn MpnSubscription>,
        notifier: &Notifier,
    ) -> Self {
        Self {
            core: Core::new(
                "MpnSubscriptionListener",
                MPN_SUBSCRIPTION_KEY,
                handle,
                notifier,
            ),
            subscription: Arc::downgrade(subscription),
        }
    }

    pub fn attach(
        handle: &str,
        subscription: &Arc<dyn MpnSubscription>,
        notifier: &Notifier,
    ) -> Attachment {
        let forwarder = Arc::new(Self::new(handle, subscription, notifier));
        let core = Arc::clone(&forwarder.core);
        Attachment {
            listener: subscription.add_listener(forwarder),
            core,
        }
    }

    fn property_value(&self, property: &str) -> Option<Value> {
        let subscription = self.subscription.upgrade()?;
        let value = match property {
            "status_timestamp" => json!(subscription.status_timestamp()),
            "mode" => json!(subscription.config().mode),
            "adapter" => json!(subscription.config().data_adapter),
            "group" => json!(subscription.config().group),
            "schema" => json!(subscription.config().schema),
            "notification_format" => json!(subscription.actual_notification_format()),
            "trigger" => json!(subscription.actual_trigger_expression()),
            "requested_buffer_size" => json!(subscription.config().requested_buffer_size),
            "requested_max_frequency" => json!(subscription.config().requested_max_frequency),
            _ => return None,
        };
        Some(value)
    }
}

impl MpnSubscriptionListener for MpnSubscriptionForwarder {
    fn on_subscription(&self) {
        self.core.emit_bare("onSubscription");
    }

    fn on_unsubscription(&self) {
        self.core.emit_bare("onUnsubscription");
    }

    fn on_subscription_error(&self, code: i32, message: &str) {
        self.core.emit_error("onSubscriptionError", code, message);
    }

    fn on_unsubscription_error(&self, code: i32, message: &str) {
        self.core.emit_error("onUnsubscriptionError", code, message);
    }

    fn on_triggered(&self) {
        self.core.emit_bare("onTriggered");
    }

    fn on_status_changed(&self, status: &str, timestamp: i64) {
        let subscription_id = match status {
            "UNKNOWN" => None,
            _ => self
                .subscription
                .upgrade()
                .and_then(|subscription| subscription.subscription_id()),
        };
        self.core.emit("onStatusChanged", |args| {
            args.insert("status", status)
                .insert("timestamp", timestamp)
                .insert("subscriptionId", subscription_id);
        });
    }

    fn on_property_changed(&self, property: &str) {
        let value = self.property_value(property);
        self.core.emit("onPropertyChanged", |args| {
            args.insert("property", property);
            if let Some(value) = value {
                args.insert("value", value);
            }
        });
    }

    fn on_modification_error(&self, code: i32, message: &str, property: &str) {
        self.core.emit("onModificationError", |args| {
            args.insert("errorCode", code)
                .insert("errorMessage", message)
                .insert("propertyName", property);
        });
    }
}
