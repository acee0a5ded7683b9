use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Listeners, Shared};
use crate::error::BackendError;
use crate::traits::listeners::{MpnDeviceListener, MpnSubscriptionListener};
use crate::traits::{MpnDevice, MpnSubscription};
use crate::types::*;

pub(crate) const STATUS_UNKNOWN: &str = "UNKNOWN";
pub(crate) const STATUS_SUBSCRIBED: &str = "SUBSCRIBED";
pub(crate) const STATUS_TRIGGERED: &str = "TRIGGERED";

// ── Subscriptions ─────────────────────────────────────────────────────────────

struct MpnSubscriptionState {
    config: MpnSubscriptionConfig,
    actual_trigger: Option<String>,
    actual_format: Option<String>,
    status: String,
    status_ts: i64,
    subscription_id: Option<String>,
    active: bool,
    /// Created by the server; activation is the server's business.
    server_side: bool,
}

struct MpnSubscriptionInner {
    shared: Arc<Shared>,
    listeners: Listeners<dyn MpnSubscriptionListener>,
    state: Mutex<MpnSubscriptionState>,
}

/// In-memory [`MpnSubscription`]. Clones share the same object.
#[derive(Clone)]
pub struct MemoryMpnSubscription {
    inner: Arc<MpnSubscriptionInner>,
}

impl MemoryMpnSubscription {
    pub(crate) fn new(shared: Arc<Shared>, config: MpnSubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(MpnSubscriptionInner {
                shared,
                listeners: Listeners::new(),
                state: Mutex::new(MpnSubscriptionState {
                    config,
                    actual_trigger: None,
                    actual_format: None,
                    status: STATUS_UNKNOWN.to_string(),
                    status_ts: 0,
                    subscription_id: None,
                    active: false,
                    server_side: false,
                }),
            }),
        }
    }

    pub(crate) fn from_dyn(subscription: &Arc<dyn MpnSubscription>) -> Result<Self, BackendError> {
        subscription
            .as_any()
            .downcast_ref::<Self>()
            .cloned()
            .ok_or_else(|| {
                BackendError::illegal_argument("MpnSubscription belongs to another backend")
            })
    }

    fn state(&self) -> MutexGuard<'_, MpnSubscriptionState> {
        self.inner
            .state
            .lock()
            .expect("mpn subscription state mutex poisoned")
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state().active = active;
    }

    /// Marks the object as already living on the server, without callbacks.
    pub(crate) fn seed(&self, subscription_id: Option<&str>) {
        let now = self.inner.shared.now_millis();
        let mut state = self.state();
        state.active = true;
        state.server_side = true;
        state.actual_trigger = state.config.trigger_expression.clone();
        state.actual_format = state.config.notification_format.clone();
        if let Some(id) = subscription_id {
            state.subscription_id = Some(id.to_string());
            state.status = STATUS_SUBSCRIBED.to_string();
            state.status_ts = now;
        }
    }

    pub(crate) fn adopt_id(&self, subscription_id: String) {
        self.state().subscription_id = Some(subscription_id);
    }

    /// Confirms the server identity of a seeded subscription.
    pub fn confirm_id(&self, subscription_id: &str) {
        let mut state = self.state();
        state.subscription_id = Some(subscription_id.to_string());
        if state.status == STATUS_UNKNOWN {
            state.status = STATUS_SUBSCRIBED.to_string();
        }
    }

    pub(crate) fn matches(&self, filter: MpnFilter) -> bool {
        let state = self.state();
        match filter {
            MpnFilter::All => true,
            MpnFilter::Subscribed => state.status == STATUS_SUBSCRIBED,
            MpnFilter::Triggered => state.status == STATUS_TRIGGERED,
        }
    }

    pub(crate) fn has_notification_format(&self) -> bool {
        self.state().config.notification_format.is_some()
    }

    pub(crate) fn same_target(&self, other: &Self) -> bool {
        let config = self.config();
        other.state().config.same_target(&config)
    }

    /// Server activation. Runs on the event thread.
    pub(crate) fn activate(&self) {
        let (status, timestamp) = {
            let mut state = self.state();
            if !state.active || state.server_side || state.status == STATUS_SUBSCRIBED {
                return;
            }
            if state.subscription_id.is_none() {
                state.subscription_id = Some(format!("M{:04}", self.inner.shared.next_serial()));
            }
            state.actual_trigger = state.config.trigger_expression.clone();
            state.actual_format = state.config.notification_format.clone();
            state.status = STATUS_SUBSCRIBED.to_string();
            state.status_ts = self.inner.shared.now_millis();
            (state.status.clone(), state.status_ts)
        };
        self.inner.listeners.each(|listener| {
            listener.on_status_changed(&status, timestamp);
            listener.on_subscription();
        });
    }

    /// Server deactivation. Runs on the event thread.
    pub(crate) fn deactivate(&self) {
        let timestamp = {
            let mut state = self.state();
            state.status = STATUS_UNKNOWN.to_string();
            state.status_ts = self.inner.shared.now_millis();
            state.status_ts
        };
        self.inner.listeners.each(|listener| {
            listener.on_status_changed(STATUS_UNKNOWN, timestamp);
            listener.on_unsubscription();
        });
    }

    /// Fires the trigger as if the server evaluated it to true.
    pub fn trigger(&self) {
        let this = self.clone();
        self.inner.shared.events.post(move || {
            let timestamp = {
                let mut state = this.state();
                state.status = STATUS_TRIGGERED.to_string();
                state.status_ts = this.inner.shared.now_millis();
                state.status_ts
            };
            this.inner.listeners.each(|listener| {
                listener.on_status_changed(STATUS_TRIGGERED, timestamp);
                listener.on_triggered();
            });
        });
    }

    fn modify(&self, property: &'static str, apply: impl FnOnce(&mut MpnSubscriptionState)) {
        let live = {
            let mut state = self.state();
            apply(&mut *state);
            state.active && state.status != STATUS_UNKNOWN
        };
        if live {
            let this = self.clone();
            self.inner.shared.events.post(move || {
                {
                    let mut state = this.state();
                    if property == "trigger" {
                        state.actual_trigger = state.config.trigger_expression.clone();
                    } else {
                        state.actual_format = state.config.notification_format.clone();
                    }
                }
                this.inner
                    .listeners
                    .each(|listener| listener.on_property_changed(property));
            });
        }
    }
}

impl MpnSubscription for MemoryMpnSubscription {
    fn add_listener(&self, listener: Arc<dyn MpnSubscriptionListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn config(&self) -> MpnSubscriptionConfig {
        self.state().config.clone()
    }

    fn configure(&self, patch: MpnSubscriptionPatch) -> Result<(), BackendError> {
        self.inner.shared.record("configure_mpn_subscription");
        let mut state = self.state();
        if state.active {
            return Err(BackendError::illegal_state("Cannot modify an active MpnSubscription"));
        }
        state.config.apply(patch);
        Ok(())
    }

    fn set_trigger_expression(&self, trigger: Option<String>) -> Result<(), BackendError> {
        self.inner.shared.record("set_trigger_expression");
        self.modify("trigger", |state| state.config.trigger_expression = trigger);
        Ok(())
    }

    fn set_notification_format(&self, format: String) -> Result<(), BackendError> {
        self.inner.shared.record("set_notification_format");
        if format.trim().is_empty() {
            return Err(BackendError::illegal_argument("Notification format must not be empty"));
        }
        self.modify("notification_format", |state| {
            state.config.notification_format = Some(format)
        });
        Ok(())
    }

    fn actual_trigger_expression(&self) -> Option<String> {
        self.state().actual_trigger.clone()
    }

    fn actual_notification_format(&self) -> Option<String> {
        self.state().actual_format.clone()
    }

    fn status(&self) -> String {
        self.state().status.clone()
    }

    fn status_timestamp(&self) -> i64 {
        self.state().status_ts
    }

    fn subscription_id(&self) -> Option<String> {
        self.state().subscription_id.clone()
    }

    fn is_active(&self) -> bool {
        self.state().active
    }

    fn is_subscribed(&self) -> bool {
        let state = self.state();
        state.status == STATUS_SUBSCRIBED || state.status == STATUS_TRIGGERED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

struct DeviceState {
    token: String,
    previous_token: Option<String>,
    application_id: Option<String>,
    device_id: Option<String>,
    status: String,
    status_ts: i64,
    registered: bool,
    suspended: bool,
}

struct DeviceInner {
    shared: Arc<Shared>,
    listeners: Listeners<dyn MpnDeviceListener>,
    state: Mutex<DeviceState>,
}

/// In-memory [`MpnDevice`]. Clones share the same object.
#[derive(Clone)]
pub struct MemoryMpnDevice {
    inner: Arc<DeviceInner>,
}

impl MemoryMpnDevice {
    pub(crate) fn new(shared: Arc<Shared>, token: &str) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                shared,
                listeners: Listeners::new(),
                state: Mutex::new(DeviceState {
                    token: token.to_string(),
                    previous_token: None,
                    application_id: None,
                    device_id: None,
                    status: STATUS_UNKNOWN.to_string(),
                    status_ts: 0,
                    registered: false,
                    suspended: false,
                }),
            }),
        }
    }

    pub(crate) fn from_dyn(device: &Arc<dyn MpnDevice>) -> Result<Self, BackendError> {
        device
            .as_any()
            .downcast_ref::<Self>()
            .cloned()
            .ok_or_else(|| BackendError::illegal_argument("MpnDevice belongs to another backend"))
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner
            .state
            .lock()
            .expect("mpn device state mutex poisoned")
    }

    pub(crate) fn same_device(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Server registration. Runs on the event thread.
    pub(crate) fn complete_registration(&self) {
        let timestamp = {
            let mut state = self.state();
            if state.device_id.is_none() {
                state.device_id = Some(format!("D{:04}", self.inner.shared.next_serial()));
            }
            state.application_id = Some("pushgate.memory".to_string());
            state.status = "REGISTERED".to_string();
            state.status_ts = self.inner.shared.now_millis();
            state.registered = true;
            state.status_ts
        };
        self.inner.listeners.each(|listener| {
            listener.on_status_changed("REGISTERED", timestamp);
            listener.on_registered();
            listener.on_subscriptions_updated();
        });
    }

    /// Rejects the pending registration as if the server refused the token.
    pub fn reject_registration(&self, code: i32, message: &str) {
        let this = self.clone();
        let message = message.to_string();
        self.inner.shared.events.post(move || {
            this.state().registered = false;
            this.inner
                .listeners
                .each(|listener| listener.on_registration_failed(code, &message));
        });
    }

    /// Replaces the token, as when the platform rotates it.
    pub fn rotate_token(&self, token: &str) {
        let mut state = self.state();
        let previous = std::mem::replace(&mut state.token, token.to_string());
        state.previous_token = Some(previous);
    }
}

impl MpnDevice for MemoryMpnDevice {
    fn add_listener(&self, listener: Arc<dyn MpnDeviceListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn application_id(&self) -> Option<String> {
        self.state().application_id.clone()
    }

    fn device_id(&self) -> Option<String> {
        self.state().device_id.clone()
    }

    fn device_token(&self) -> String {
        self.state().token.clone()
    }

    fn previous_device_token(&self) -> Option<String> {
        self.state().previous_token.clone()
    }

    fn platform(&self) -> String {
        "Google".to_string()
    }

    fn status(&self) -> String {
        self.state().status.clone()
    }

    fn status_timestamp(&self) -> i64 {
        self.state().status_ts
    }

    fn is_registered(&self) -> bool {
        self.state().registered
    }

    fn is_suspended(&self) -> bool {
        self.state().suspended
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
