use std::sync::Arc;

use pushgate_ipc::{
    ArgBag, GatewayError, HandleKind, MpnFilter, MpnSubscription, MpnSubscriptionConfig,
    MpnSubscriptionPatch, SubscriptionMode,
};
use serde_json::json;

use super::{done, required, roll_back, Dispatcher, Outcome};
use crate::forwarder::{DeviceForwarder, MpnSubscriptionForwarder};
use crate::registry::Entry;

fn patch(requested: &ArgBag) -> Result<MpnSubscriptionPatch, GatewayError> {
    Ok(MpnSubscriptionPatch {
        items: requested.str_list("items")?,
        group: requested.str("group")?,
        fields: requested.str_list("fields")?,
        schema: requested.str("schema")?,
        data_adapter: requested.nullable_str("dataAdapter")?,
        requested_buffer_size: requested.nullable_parsed("bufferSize")?,
        requested_max_frequency: requested.nullable_parsed("requestedMaxFrequency")?,
        trigger_expression: requested.nullable_str("trigger")?,
        notification_format: requested.str("notificationFormat")?,
    })
}

impl Dispatcher {
    /// `Client.registerForMpn`. One registration per client may be in flight;
    /// a device handle that already exists is registered again as is. A
    /// client has one device slot: once the backend accepts, any other device
    /// handle the client owns is retired.
    pub(super) fn register_for_mpn(&self, args: &ArgBag) -> Outcome {
        let (client_handle, client) = self.lookup_client(args)?;
        let device_handle = args.require_str("mpnDevId")?;

        let (pending, existing) = self.registry.with(|maps| {
            (
                maps.registration_in_flight(&client_handle)
                    .map(str::to_owned),
                maps.devices.object(&device_handle).ok(),
            )
        });
        if let Some(pending) = pending {
            return Err(GatewayError::invalid_state(format!(
                "registration of mpn device {pending} for client {client_handle} is in flight"
            )));
        }

        let created = existing.is_none();
        let device = match existing {
            Some(device) => device,
            None => {
                let token = args.require_str("deviceToken")?;
                let device = self.backend.create_mpn_device(&token)?;
                let attachment = DeviceForwarder::attach(
                    &device_handle,
                    &device,
                    &self.notifier,
                    &self.registry,
                );
                let entry = Entry::requested(Arc::clone(&device), Some(&client_handle))
                    .with_attachment(attachment);
                self.registry
                    .with(|maps| maps.devices.create(&device_handle, entry))?;
                device
            }
        };

        // A device the server already knows answers at once; only a fresh
        // registration is tracked.
        let tracked = !device.is_registered();
        self.registry.with(|maps| {
            if let Ok(entry) = maps.devices.get_mut(&device_handle) {
                entry.owner = Some(client_handle.clone());
            }
            if tracked {
                maps.begin_registration(&device_handle);
            }
        });

        if let Err(err) = client.register_for_mpn(device) {
            self.registry
                .with(|maps| maps.settle_registration(&device_handle));
            if created {
                roll_back(
                    &self.registry,
                    HandleKind::MpnDevice,
                    &device_handle,
                    |maps| &mut maps.devices,
                    |device, listener| device.remove_listener(listener),
                );
            }
            return Err(err.into());
        }

        let replaced = self
            .registry
            .with(|maps| maps.take_other_devices(&client_handle, &device_handle));
        for (handle, entry) in replaced {
            entry.retire(|device, listener| device.remove_listener(listener));
            log::debug!("client {client_handle}: mpn device {handle} replaced by {device_handle}");
        }
        done()
    }

    /// `Client.subscribeMpn`, with the same reuse rules as `Client.subscribe`.
    pub(super) fn subscribe_mpn(&self, args: &ArgBag) -> Outcome {
        let (client_handle, client) = self.lookup_client(args)?;
        let requested = required(args.bag("subscription")?, "subscription")?;
        let handle = requested.require_str("id")?;
        let mode = requested.parsed::<SubscriptionMode>("mode")?;
        let coalescing = args.bool("coalescing")?.unwrap_or(false);
        let patch = patch(&requested)?;

        let existing = self
            .registry
            .with(|maps| maps.mpn_subscriptions.object(&handle).ok());
        if let Some(subscription) = existing {
            if subscription.is_active() {
                return Err(GatewayError::invalid_state(format!(
                    "mpn subscription {handle} is active"
                )));
            }
            let current = subscription.config().mode;
            if mode.is_some_and(|mode| mode != current) {
                return Err(GatewayError::invalid_argument(
                    "mode",
                    format!("mpn subscription {handle} was created in {current} mode"),
                ));
            }
            subscription.configure(patch)?;
            self.registry.with(|maps| {
                if let Ok(entry) = maps.mpn_subscriptions.get_mut(&handle) {
                    entry.owner = Some(client_handle.clone());
                }
            });
            client.subscribe_mpn(Arc::clone(&subscription), coalescing)?;
            self.settle_coalescing(&client_handle, &handle, coalescing, subscription.as_ref());
            return done();
        }

        if handle.starts_with(self.reconciler.prefix()) {
            return Err(GatewayError::invalid_argument(
                "subscription.id",
                format!(
                    "handles starting with {:?} are reserved",
                    self.reconciler.prefix()
                ),
            ));
        }
        let mut config = MpnSubscriptionConfig::new(required(mode, "mode")?);
        config.apply(patch);
        let subscription = self.backend.create_mpn_subscription(config)?;
        let attachment = MpnSubscriptionForwarder::attach(&handle, &subscription, &self.notifier);
        let entry = Entry::requested(Arc::clone(&subscription), Some(&client_handle))
            .with_attachment(attachment);
        self.registry
            .with(|maps| maps.mpn_subscriptions.create(&handle, entry))?;

        if let Err(err) = client.subscribe_mpn(Arc::clone(&subscription), coalescing) {
            roll_back(
                &self.registry,
                HandleKind::MpnSubscription,
                &handle,
                |maps| &mut maps.mpn_subscriptions,
                |subscription, listener| subscription.remove_listener(listener),
            );
            return Err(err.into());
        }
        self.settle_coalescing(&client_handle, &handle, coalescing, subscription.as_ref());
        done()
    }

    /// A coalescing subscribe may take over the server id of an older
    /// subscription; the client keeps only the handle it just subscribed.
    fn settle_coalescing(
        &self,
        client: &str,
        handle: &str,
        coalescing: bool,
        subscription: &dyn MpnSubscription,
    ) {
        if !coalescing {
            return;
        }
        if let Some(id) = subscription.subscription_id() {
            self.reconciler.retire_duplicates(client, handle, &id);
        }
    }

    pub(super) fn unsubscribe_mpn(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let handle = args.require_str("mpnSubId")?;
        let subscription = self.lookup_mpn_subscription(&handle)?;
        client.unsubscribe_mpn(&subscription)?;
        self.registry
            .with(|maps| maps.mpn_subscriptions.remove(&handle))?;
        done()
    }

    /// Handles stay registered so their forwarders deliver the unsubscriptions.
    pub(super) fn unsubscribe_mpn_subscriptions(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let filter = args.parsed::<MpnFilter>("filter")?.unwrap_or_default();
        client.unsubscribe_mpn_subscriptions(filter)?;
        done()
    }

    pub(super) fn mpn_subscriptions(&self, args: &ArgBag) -> Outcome {
        let (client_handle, client) = self.lookup_client(args)?;
        let filter = args.parsed::<MpnFilter>("filter")?.unwrap_or_default();
        let candidates = client.mpn_subscriptions(filter);
        let outcome = self.reconciler.reconcile(&client_handle, candidates);
        Ok(Some(outcome.into_payload()))
    }

    /// `{}` when the server has no such subscription, `{"result": handle}` when
    /// the frontend already knows it, `{"extra": snapshot}` when it was
    /// just discovered.
    pub(super) fn find_mpn_subscription(&self, args: &ArgBag) -> Outcome {
        let (client_handle, client) = self.lookup_client(args)?;
        let subscription_id = args.require_str("subscriptionId")?;
        let Some(candidate) = client.find_mpn_subscription(&subscription_id) else {
            return Ok(Some(json!({})));
        };
        let mut outcome = self.reconciler.reconcile(&client_handle, vec![candidate]);
        let payload = match (outcome.known.pop(), outcome.discovered.pop()) {
            (Some(handle), _) => json!({ "result": handle }),
            (None, Some(snapshot)) => json!({ "extra": snapshot }),
            (None, None) => json!({}),
        };
        Ok(Some(payload))
    }

    pub(super) fn mpn_subscription_command(&self, operation: &str, args: &ArgBag) -> Outcome {
        if !matches!(operation, "setTriggerExpression" | "setNotificationFormat") {
            return Ok(None);
        }
        let handle = args.require_str("mpnSubId")?;
        let subscription = self.lookup_mpn_subscription(&handle)?;
        match operation {
            "setTriggerExpression" => {
                subscription.set_trigger_expression(args.str("trigger")?)?;
                done()
            }
            "setNotificationFormat" => {
                let format = args.require_str("notificationFormat")?;
                subscription.set_notification_format(format)?;
                done()
            }
            _ => Ok(None),
        }
    }
}
