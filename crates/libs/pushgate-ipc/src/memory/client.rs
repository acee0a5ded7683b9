use std::sync::{Arc, Mutex, MutexGuard};

use super::{Listeners, MemoryMpnDevice, MemoryMpnSubscription, MemorySubscription, Shared};
use crate::error::BackendError;
use crate::traits::listeners::{ClientListener, ClientMessageListener};
use crate::traits::*;
use crate::types::*;

const DISCONNECTED: &str = "DISCONNECTED";

const VALID_TRANSPORTS: &[&str] =
    &["WS", "HTTP", "WS-STREAMING", "HTTP-STREAMING", "WS-POLLING", "HTTP-POLLING"];

type PendingMessage = (OutgoingMessage, Option<Arc<dyn ClientMessageListener>>);

struct ClientState {
    details: ConnectionDetails,
    options: ConnectionOptions,
    status: String,
    subscriptions: Vec<(MemorySubscription, Arc<dyn Subscription>)>,
    device: Option<MemoryMpnDevice>,
    mpn_subscriptions: Vec<(MemoryMpnSubscription, Arc<dyn MpnSubscription>)>,
    pending_messages: Vec<PendingMessage>,
}

impl ClientState {
    fn connected(&self) -> bool {
        self.status.starts_with("CONNECTED:")
    }

    fn device_registered(&self) -> bool {
        self.device
            .as_ref()
            .is_some_and(|device| device.is_registered())
    }
}

struct ClientInner {
    shared: Arc<Shared>,
    listeners: Listeners<dyn ClientListener>,
    state: Mutex<ClientState>,
}

/// In-memory [`PushClient`]. Clones share the same session.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<ClientInner>,
}

impl MemoryClient {
    pub(crate) fn new(shared: Arc<Shared>, details: ConnectionDetailsPatch) -> Self {
        let mut initial = ConnectionDetails::default();
        initial.apply(details);
        Self {
            inner: Arc::new(ClientInner {
                shared,
                listeners: Listeners::new(),
                state: Mutex::new(ClientState {
                    details: initial,
                    options: ConnectionOptions::default(),
                    status: DISCONNECTED.to_string(),
                    subscriptions: Vec::new(),
                    device: None,
                    mpn_subscriptions: Vec::new(),
                    pending_messages: Vec::new(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.inner
            .state
            .lock()
            .expect("client state mutex poisoned")
    }

    fn record(&self, call: &str) {
        self.inner.shared.record(call);
    }

    fn post(&self, job: impl FnOnce(&MemoryClient) + Send + 'static) {
        let this = self.clone();
        self.inner.shared.events.post(move || job(&this));
    }

    fn set_status(&self, status: &str) {
        self.state().status = status.to_string();
        self.inner
            .listeners
            .each(|listener| listener.on_status_change(status));
    }

    fn established_status(&self) -> &'static str {
        match self.state().options.forced_transport.as_deref() {
            Some("HTTP") | Some("HTTP-STREAMING") => "CONNECTED:HTTP-STREAMING",
            Some("HTTP-POLLING") => "CONNECTED:HTTP-POLLING",
            Some("WS-POLLING") => "CONNECTED:WS-POLLING",
            _ => "CONNECTED:WS-STREAMING",
        }
    }

    /// Session establishment. Runs on the event thread.
    fn establish_session(&self) {
        self.set_status("CONNECTING");
        {
            let serial = self.inner.shared.next_serial();
            let mut state = self.state();
            state.details.session_id = Some(format!("S{serial:08x}"));
            state.details.client_ip = Some("127.0.0.1".to_string());
            state.details.server_socket_name = Some("Memory Push Server".to_string());
            state.details.server_instance_address = state.details.server_address.clone();
            state.options.real_max_bandwidth =
                Some(state.options.requested_max_bandwidth.to_string());
        }
        for property in [
            "sessionId",
            "clientIp",
            "serverSocketName",
            "serverInstanceAddress",
            "realMaxBandwidth",
        ] {
            self.inner
                .listeners
                .each(|listener| listener.on_property_change(property));
        }
        self.set_status("CONNECTED:STREAM-SENSING");
        self.set_status(self.established_status());
        self.activate_pending();
    }

    /// Brings every pending object up once a session and device exist. Runs
    /// on the event thread.
    fn activate_pending(&self) {
        let (subscriptions, device, messages) = {
            let mut state = self.state();
            if !state.connected() {
                return;
            }
            let subscriptions: Vec<MemorySubscription> = state
                .subscriptions
                .iter()
                .map(|(memory, _)| memory.clone())
                .collect();
            let device = state
                .device
                .clone()
                .filter(|device| !device.is_registered());
            (subscriptions, device, std::mem::take(&mut state.pending_messages))
        };
        for subscription in subscriptions {
            subscription.confirm();
        }
        if let Some(device) = device {
            device.complete_registration();
        }
        self.activate_mpn();
        for (message, listener) in messages {
            if let Some(listener) = listener {
                listener.on_processed(&message.message, "");
            }
        }
    }

    fn activate_mpn(&self) {
        let pending: Vec<MemoryMpnSubscription> = {
            let state = self.state();
            if !state.connected() || !state.device_registered() {
                return;
            }
            state
                .mpn_subscriptions
                .iter()
                .map(|(memory, _)| memory.clone())
                .collect()
        };
        for subscription in pending {
            subscription.activate();
        }
    }

    fn teardown_session(&self) {
        let subscriptions: Vec<MemorySubscription> = {
            let mut state = self.state();
            if state.status == DISCONNECTED {
                return;
            }
            state.details.session_id = None;
            state.details.client_ip = None;
            state.details.server_instance_address = None;
            state.options.real_max_bandwidth = None;
            state
                .subscriptions
                .iter()
                .map(|(memory, _)| memory.clone())
                .collect()
        };
        for subscription in subscriptions {
            subscription.revoke();
        }
        self.set_status(DISCONNECTED);
    }

    /// Creates a subscription that exists only on the server side, as if a
    /// previous session or another application had created it.
    ///
    /// With `subscription_id` unset the server has not confirmed it yet.
    pub fn seed_mpn_subscription(
        &self,
        config: MpnSubscriptionConfig,
        subscription_id: Option<&str>,
    ) -> MemoryMpnSubscription {
        let memory = MemoryMpnSubscription::new(Arc::clone(&self.inner.shared), config);
        memory.seed(subscription_id);
        let object: Arc<dyn MpnSubscription> = Arc::new(memory.clone());
        self.state()
            .mpn_subscriptions
            .push((memory.clone(), object));
        memory
    }

    /// Reports a server-side error on the session.
    pub fn raise_server_error(&self, code: i32, message: &str) {
        let message = message.to_string();
        self.post(move |client| {
            client
                .inner
                .listeners
                .each(|listener| listener.on_server_error(code, &message));
        });
    }

    /// Device handed to the last `register_for_mpn`.
    pub fn device(&self) -> Option<MemoryMpnDevice> {
        self.state().device.clone()
    }

    /// Subscription objects in the order they were handed to `subscribe`.
    pub fn memory_subscriptions(&self) -> Vec<MemorySubscription> {
        self.state()
            .subscriptions
            .iter()
            .map(|(memory, _)| memory.clone())
            .collect()
    }
}

impl PushClient for MemoryClient {
    fn add_listener(&self, listener: Arc<dyn ClientListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn connection_details(&self) -> ConnectionDetails {
        self.state().details.clone()
    }

    fn update_connection_details(&self, patch: ConnectionDetailsPatch) -> Result<(), BackendError> {
        self.record("update_connection_details");
        if let Some(Some(address)) = &patch.server_address {
            if !(address.starts_with("http://") || address.starts_with("https://")) {
                return Err(BackendError::illegal_argument(format!(
                    "The given server address has not a valid scheme: {address}"
                )));
            }
        }
        self.state().details.apply(patch);
        Ok(())
    }

    fn connection_options(&self) -> ConnectionOptions {
        self.state().options.clone()
    }

    fn update_connection_options(&self, patch: ConnectionOptionsPatch) -> Result<(), BackendError> {
        self.record("update_connection_options");
        if let Some(Some(transport)) = &patch.forced_transport {
            if !VALID_TRANSPORTS.contains(&transport.as_str()) {
                return Err(BackendError::illegal_argument(format!(
                    "The given value is not valid. Use one of: {}",
                    VALID_TRANSPORTS.join(", ")
                )));
            }
        }
        self.state().options.apply(patch);
        Ok(())
    }

    fn connect(&self) -> Result<(), BackendError> {
        self.record("connect");
        {
            let state = self.state();
            if state.details.server_address.is_none() {
                return Err(BackendError::illegal_state(
                    "Configure the server address before trying to connect",
                ));
            }
            if state.status != DISCONNECTED {
                return Ok(());
            }
        }
        self.post(MemoryClient::establish_session);
        Ok(())
    }

    fn disconnect(&self) {
        self.record("disconnect");
        self.post(MemoryClient::teardown_session);
    }

    fn status(&self) -> String {
        self.state().status.clone()
    }

    fn subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), BackendError> {
        self.record("subscribe");
        let memory = MemorySubscription::from_dyn(&subscription)?;
        if subscription.is_active() {
            return Err(BackendError::illegal_state("Cannot subscribe to an active Subscription"));
        }
        memory.validate()?;
        memory.set_active(true);
        let connected = {
            let mut state = self.state();
            state.subscriptions.push((memory.clone(), subscription));
            state.connected()
        };
        if connected {
            self.inner.shared.events.post(move || memory.confirm());
        }
        Ok(())
    }

    fn unsubscribe(&self, subscription: &Arc<dyn Subscription>) -> Result<(), BackendError> {
        self.record("unsubscribe");
        let memory = {
            let mut state = self.state();
            let position = state
                .subscriptions
                .iter()
                .position(|(_, held)| same_object(held, subscription))
                .ok_or_else(|| {
                    BackendError::illegal_state("Cannot unsubscribe from an inactive Subscription")
                })?;
            state.subscriptions.remove(position).0
        };
        memory.set_active(false);
        self.inner.shared.events.post(move || memory.revoke());
        Ok(())
    }

    fn subscriptions(&self) -> Vec<Arc<dyn Subscription>> {
        self.state()
            .subscriptions
            .iter()
            .map(|(_, object)| Arc::clone(object))
            .collect()
    }

    fn send_message(
        &self,
        message: OutgoingMessage,
        listener: Option<Arc<dyn ClientMessageListener>>,
    ) -> Result<(), BackendError> {
        self.record("send_message");
        let mut state = self.state();
        if state.connected() {
            drop(state);
            self.inner.shared.events.post(move || {
                if let Some(listener) = listener {
                    listener.on_processed(&message.message, "");
                }
            });
        } else if message.enqueue_while_disconnected {
            state.pending_messages.push((message, listener));
        } else {
            drop(state);
            self.inner.shared.events.post(move || {
                if let Some(listener) = listener {
                    listener.on_abort(&message.message, false);
                }
            });
        }
        Ok(())
    }

    fn register_for_mpn(&self, device: Arc<dyn MpnDevice>) -> Result<(), BackendError> {
        self.record("register_for_mpn");
        let memory = MemoryMpnDevice::from_dyn(&device)?;
        let connected = {
            let mut state = self.state();
            let replaced = state
                .device
                .as_ref()
                .is_some_and(|held| !held.same_device(&memory));
            if replaced {
                log::debug!("memory client replaces its registered mpn device");
            }
            state.device = Some(memory.clone());
            state.connected()
        };
        if connected {
            self.post(move |client| {
                memory.complete_registration();
                client.activate_mpn();
            });
        }
        Ok(())
    }

    fn subscribe_mpn(
        &self,
        subscription: Arc<dyn MpnSubscription>,
        coalescing: bool,
    ) -> Result<(), BackendError> {
        self.record("subscribe_mpn");
        let memory = MemoryMpnSubscription::from_dyn(&subscription)?;
        if subscription.is_active() {
            return Err(BackendError::illegal_state(
                "Cannot subscribe to an active MpnSubscription",
            ));
        }
        if !memory.has_notification_format() {
            return Err(BackendError::illegal_argument("Specify property 'notificationFormat'"));
        }
        let ready = {
            let mut state = self.state();
            if state.device.is_none() {
                return Err(BackendError::illegal_state("No MPN device registered"));
            }
            if coalescing {
                let existing = state
                    .mpn_subscriptions
                    .iter()
                    .position(|(held, _)| held.same_target(&memory) && held.is_subscribed());
                if let Some(position) = existing {
                    let (held, _) = state.mpn_subscriptions.remove(position);
                    held.set_active(false);
                    if let Some(id) = held.subscription_id() {
                        memory.adopt_id(id);
                    }
                }
            }
            memory.set_active(true);
            state.mpn_subscriptions.push((memory.clone(), subscription));
            state.connected() && state.device_registered()
        };
        if ready {
            self.inner.shared.events.post(move || memory.activate());
        }
        Ok(())
    }

    fn unsubscribe_mpn(
        &self,
        subscription: &Arc<dyn MpnSubscription>,
    ) -> Result<(), BackendError> {
        self.record("unsubscribe_mpn");
        let memory = {
            let mut state = self.state();
            let position = state
                .mpn_subscriptions
                .iter()
                .position(|(_, held)| same_object(held, subscription))
                .ok_or_else(|| {
                    BackendError::illegal_state(
                        "Cannot unsubscribe from an inactive MpnSubscription",
                    )
                })?;
            state.mpn_subscriptions.remove(position).0
        };
        memory.set_active(false);
        self.inner.shared.events.post(move || memory.deactivate());
        Ok(())
    }

    fn unsubscribe_mpn_subscriptions(&self, filter: MpnFilter) -> Result<(), BackendError> {
        self.record("unsubscribe_mpn_subscriptions");
        let removed: Vec<MemoryMpnSubscription> = {
            let mut state = self.state();
            if state.device.is_none() {
                return Err(BackendError::illegal_state("No MPN device registered"));
            }
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.mpn_subscriptions)
                .into_iter()
                .partition(|(memory, _)| memory.matches(filter));
            state.mpn_subscriptions = kept;
            removed.into_iter().map(|(memory, _)| memory).collect()
        };
        for memory in removed {
            memory.set_active(false);
            self.inner.shared.events.post(move || memory.deactivate());
        }
        Ok(())
    }

    fn mpn_subscriptions(&self, filter: MpnFilter) -> Vec<Arc<dyn MpnSubscription>> {
        self.state()
            .mpn_subscriptions
            .iter()
            .filter(|(memory, _)| memory.matches(filter))
            .map(|(_, object)| Arc::clone(object))
            .collect()
    }

    fn find_mpn_subscription(&self, subscription_id: &str) -> Option<Arc<dyn MpnSubscription>> {
        self.state()
            .mpn_subscriptions
            .iter()
            .find(|(memory, _)| memory.subscription_id().as_deref() == Some(subscription_id))
            .map(|(_, object)| Arc::clone(object))
    }
}
