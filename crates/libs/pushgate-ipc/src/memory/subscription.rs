use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{Listeners, Shared};
use crate::error::BackendError;
use crate::traits::listeners::SubscriptionListener;
use crate::traits::Subscription;
use crate::types::*;

struct SubscriptionState {
    config: SubscriptionConfig,
    active: bool,
    subscribed: bool,
    /// Latest values per item position.
    values: BTreeMap<u32, Vec<Option<String>>>,
    /// Latest values per (item position, key), COMMAND mode only.
    command_values: BTreeMap<(u32, String), Vec<Option<String>>>,
}

struct SubscriptionInner {
    shared: Arc<Shared>,
    listeners: Listeners<dyn SubscriptionListener>,
    state: Mutex<SubscriptionState>,
}

/// In-memory [`Subscription`]. Clones share the same object.
#[derive(Clone)]
pub struct MemorySubscription {
    inner: Arc<SubscriptionInner>,
}

impl MemorySubscription {
    pub(crate) fn new(shared: Arc<Shared>, config: SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                shared,
                listeners: Listeners::new(),
                state: Mutex::new(SubscriptionState {
                    config,
                    active: false,
                    subscribed: false,
                    values: BTreeMap::new(),
                    command_values: BTreeMap::new(),
                }),
            }),
        }
    }

    pub(crate) fn from_dyn(subscription: &Arc<dyn Subscription>) -> Result<Self, BackendError> {
        subscription
            .as_any()
            .downcast_ref::<Self>()
            .cloned()
            .ok_or_else(|| {
                BackendError::illegal_argument("Subscription belongs to another backend")
            })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SubscriptionState> {
        self.inner
            .state
            .lock()
            .expect("subscription state mutex poisoned")
    }

    /// Checks what the library checks before accepting a subscribe request.
    pub(crate) fn validate(&self) -> Result<(), BackendError> {
        let state = self.state();
        if state.config.items.is_none() && state.config.group.is_none() {
            return Err(BackendError::illegal_argument("Specify property 'items' or 'group'"));
        }
        if state.config.fields.is_none() && state.config.schema.is_none() {
            return Err(BackendError::illegal_argument("Specify property 'fields' or 'schema'"));
        }
        Ok(())
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state().active = active;
    }

    /// Server confirmation. Runs on the event thread.
    pub(crate) fn confirm(&self) {
        {
            let mut state = self.state();
            if !state.active || state.subscribed {
                return;
            }
            state.subscribed = true;
        }
        self.inner
            .listeners
            .each(|listener| listener.on_subscription());
    }

    /// Server-side end of the subscription. Runs on the event thread.
    pub(crate) fn revoke(&self) {
        {
            let mut state = self.state();
            if !state.subscribed {
                return;
            }
            state.subscribed = false;
        }
        self.inner
            .listeners
            .each(|listener| listener.on_unsubscription());
    }

    /// Delivers a real-time update as if it came from the server.
    pub fn push_update(&self, update: ItemUpdate) {
        let this = self.clone();
        self.inner.shared.events.post(move || {
            {
                let mut state = this.state();
                if !state.subscribed {
                    return;
                }
                let key = match state.config.mode {
                    SubscriptionMode::Command => state
                        .config
                        .field_position("key")
                        .and_then(|pos| update.value(&FieldRef::Position(pos)))
                        .map(str::to_owned),
                    _ => None,
                };
                match key {
                    Some(key) => {
                        state
                            .command_values
                            .insert((update.item_pos, key), update.values.clone());
                    }
                    None => {
                        state.values.insert(update.item_pos, update.values.clone());
                    }
                }
            }
            this.inner
                .listeners
                .each(|listener| listener.on_item_update(&update));
        });
    }

    /// Reports a server-side rejection; the subscription stays active.
    pub fn reject(&self, code: i32, message: &str) {
        let this = self.clone();
        let message = message.to_string();
        self.inner.shared.events.post(move || {
            this.state().subscribed = false;
            this.inner
                .listeners
                .each(|listener| listener.on_subscription_error(code, &message));
        });
    }

    fn resolve(&self, item: &ItemRef, field: &FieldRef) -> Result<(u32, u32), BackendError> {
        let state = self.state();
        let item_pos = match item {
            ItemRef::Position(pos) => *pos,
            ItemRef::Name(name) => state.config.item_position(name).ok_or_else(|| {
                BackendError::illegal_argument(format!("Unknown item name: {name}"))
            })?,
        };
        let field_pos = match field {
            FieldRef::Position(pos) => *pos,
            FieldRef::Name(name) => state.config.field_position(name).ok_or_else(|| {
                BackendError::illegal_argument(format!("Unknown field name: {name}"))
            })?,
        };
        Ok((item_pos, field_pos))
    }

    fn command_field(&self, name: &str, schema_default: u32) -> Result<u32, BackendError> {
        let state = self.state();
        if state.config.mode != SubscriptionMode::Command {
            return Err(BackendError::illegal_state(
                "This Subscription was not initialized in COMMAND mode",
            ));
        }
        if state.config.fields.is_some() {
            return state.config.field_position(name).ok_or_else(|| {
                BackendError::illegal_state(format!("The field list has no '{name}' field"))
            });
        }
        if state.subscribed {
            Ok(schema_default)
        } else {
            Err(BackendError::illegal_state(
                "The position is known only once a schema-based Subscription is subscribed",
            ))
        }
    }
}

fn pick(values: Option<&Vec<Option<String>>>, field_pos: u32) -> Option<String> {
    let index = usize::try_from(field_pos).ok()?.checked_sub(1)?;
    values?.get(index)?.clone()
}

impl Subscription for MemorySubscription {
    fn add_listener(&self, listener: Arc<dyn SubscriptionListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn config(&self) -> SubscriptionConfig {
        self.state().config.clone()
    }

    fn configure(&self, patch: SubscriptionPatch) -> Result<(), BackendError> {
        self.inner.shared.record("configure_subscription");
        let mut state = self.state();
        if state.active {
            return Err(BackendError::illegal_state("Cannot modify an active Subscription"));
        }
        state.config.apply(patch);
        Ok(())
    }

    fn set_requested_max_frequency(
        &self,
        frequency: Option<MaxFrequency>,
    ) -> Result<(), BackendError> {
        self.inner.shared.record("set_requested_max_frequency");
        let subscribed = {
            let mut state = self.state();
            if state.active && frequency == Some(MaxFrequency::Unfiltered) {
                return Err(BackendError::illegal_state(
                    "Cannot change the frequency of an active Subscription to unfiltered",
                ));
            }
            state.config.requested_max_frequency = frequency;
            state.subscribed
        };
        if subscribed {
            let this = self.clone();
            let granted = frequency.map(|frequency| frequency.to_string());
            self.inner.shared.events.post(move || {
                this.inner
                    .listeners
                    .each(|listener| listener.on_real_max_frequency(granted.as_deref()));
            });
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state().active
    }

    fn is_subscribed(&self) -> bool {
        self.state().subscribed
    }

    fn command_position(&self) -> Result<u32, BackendError> {
        self.command_field("command", 2)
    }

    fn key_position(&self) -> Result<u32, BackendError> {
        self.command_field("key", 1)
    }

    fn value(&self, item: &ItemRef, field: &FieldRef) -> Result<Option<String>, BackendError> {
        let (item_pos, field_pos) = self.resolve(item, field)?;
        Ok(pick(self.state().values.get(&item_pos), field_pos))
    }

    fn command_value(
        &self,
        item: &ItemRef,
        key: &str,
        field: &FieldRef,
    ) -> Result<Option<String>, BackendError> {
        self.command_field("key", 1)?;
        let (item_pos, field_pos) = self.resolve(item, field)?;
        let state = self.state();
        let values = state.command_values.get(&(item_pos, key.to_string()));
        Ok(pick(values, field_pos))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
