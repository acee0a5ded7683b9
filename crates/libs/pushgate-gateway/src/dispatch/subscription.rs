use std::sync::Arc;

use pushgate_ipc::{
    ArgBag, FieldRef, GatewayError, HandleKind, ItemRef, MaxFrequency, SubscriptionConfig,
    SubscriptionMode, SubscriptionPatch,
};
use serde_json::json;

use super::{done, required, roll_back, Dispatcher, Outcome};
use crate::forwarder::SubscriptionForwarder;
use crate::registry::Entry;

fn patch(requested: &ArgBag) -> Result<SubscriptionPatch, GatewayError> {
    Ok(SubscriptionPatch {
        items: requested.str_list("items")?,
        group: requested.str("group")?,
        fields: requested.str_list("fields")?,
        schema: requested.str("schema")?,
        data_adapter: requested.nullable_str("dataAdapter")?,
        requested_buffer_size: requested.nullable_parsed("bufferSize")?,
        requested_snapshot: requested.nullable_parsed("snapshot")?,
        requested_max_frequency: requested.nullable_parsed("requestedMaxFrequency")?,
        selector: requested.nullable_str("selector")?,
        command_second_level_data_adapter: requested.nullable_str("dataAdapter2")?,
        command_second_level_fields: requested.str_list("fields2")?,
        command_second_level_field_schema: requested.str("schema2")?,
    })
}

impl Dispatcher {
    /// `Client.subscribe`. An existing inactive handle is reconfigured in
    /// place; a new handle gets a fresh backend subscription.
    pub(super) fn subscribe(&self, args: &ArgBag) -> Outcome {
        let (client_handle, client) = self.lookup_client(args)?;
        let requested = required(args.bag("subscription")?, "subscription")?;
        let handle = requested.require_str("id")?;
        let mode = requested.parsed::<SubscriptionMode>("mode")?;
        let patch = patch(&requested)?;

        let existing = self
            .registry
            .with(|maps| maps.subscriptions.object(&handle).ok());
        if let Some(subscription) = existing {
            if subscription.is_active() {
                return Err(GatewayError::invalid_state(format!(
                    "subscription {handle} is active"
                )));
            }
            let current = subscription.config().mode;
            if mode.is_some_and(|mode| mode != current) {
                return Err(GatewayError::invalid_argument(
                    "mode",
                    format!("subscription {handle} was created in {current} mode"),
                ));
            }
            subscription.configure(patch)?;
            self.registry.with(|maps| {
                if let Ok(entry) = maps.subscriptions.get_mut(&handle) {
                    entry.owner = Some(client_handle.clone());
                }
            });
            client.subscribe(subscription)?;
            return done();
        }

        let mut config = SubscriptionConfig::new(required(mode, "mode")?);
        config.apply(patch);
        let subscription = self.backend.create_subscription(config)?;
        let attachment = SubscriptionForwarder::attach(&handle, &subscription, &self.notifier);
        let entry = Entry::requested(Arc::clone(&subscription), Some(&client_handle))
            .with_attachment(attachment);
        self.registry
            .with(|maps| maps.subscriptions.create(&handle, entry))?;

        if let Err(err) = client.subscribe(subscription) {
            roll_back(
                &self.registry,
                HandleKind::Subscription,
                &handle,
                |maps| &mut maps.subscriptions,
                |subscription, listener| subscription.remove_listener(listener),
            );
            return Err(err.into());
        }
        done()
    }

    /// `Client.unsubscribe`. The handle is forgotten once the backend accepts;
    /// its forwarder stays attached for the final `onUnsubscription`.
    pub(super) fn unsubscribe(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let handle = args.require_str("subId")?;
        let subscription = self.lookup_subscription(&handle)?;
        client.unsubscribe(&subscription)?;
        self.registry
            .with(|maps| maps.subscriptions.remove(&handle))?;
        done()
    }

    pub(super) fn subscription_command(&self, operation: &str, args: &ArgBag) -> Outcome {
        const OPERATIONS: &[&str] = &[
            "getCommandPosition",
            "getKeyPosition",
            "setRequestedMaxFrequency",
            "isActive",
            "isSubscribed",
            "getValue",
            "getCommandValue",
        ];
        if !OPERATIONS.contains(&operation) {
            return Ok(None);
        }
        let handle = args.require_str("subId")?;
        let subscription = self.lookup_subscription(&handle)?;
        let payload = match operation {
            "getCommandPosition" => json!(subscription.command_position()?),
            "getKeyPosition" => json!(subscription.key_position()?),
            "setRequestedMaxFrequency" => {
                let frequency = args.parsed::<MaxFrequency>("newVal")?;
                subscription.set_requested_max_frequency(frequency)?;
                return done();
            }
            "isActive" => json!(subscription.is_active()),
            "isSubscribed" => json!(subscription.is_subscribed()),
            "getValue" => {
                let (item, field) = item_and_field(args)?;
                json!(subscription.value(&item, &field)?)
            }
            "getCommandValue" => {
                let (item, field) = item_and_field(args)?;
                let key = args.require_str("key")?;
                json!(subscription.command_value(&item, &key, &field)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }
}

fn item_and_field(args: &ArgBag) -> Result<(ItemRef, FieldRef), GatewayError> {
    let item = required(args.parsed::<ItemRef>("item")?, "item")?;
    let field = required(args.parsed::<FieldRef>("field")?, "field")?;
    Ok((item, field))
}
