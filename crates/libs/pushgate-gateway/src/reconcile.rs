//! Matches backend-reported MPN subscriptions against the registry.
//!
//! A candidate is *known* when the registry already holds it for the same
//! client: first by object identity, then by confirmed server id. Anything
//! else is *discovered*: it gets a synthetic handle and a forwarder, and its
//! full state is returned once. A client never keeps two entries for one
//! server id; the entry holding the live object wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pushgate_ipc::{same_object, Handle, MpnSubscription, MpnSubscriptionSnapshot};
use serde_json::{json, Value};

use crate::forwarder::MpnSubscriptionForwarder;
use crate::notify::Notifier;
use crate::registry::{Entry, Registry};

/// Process-wide, so synthetic handles never repeat even across gateways.
static SYNTHETIC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mints the next synthetic handle under `prefix`.
pub fn mint_handle(prefix: &str) -> Handle {
    format!(
        "{prefix}{}",
        SYNTHETIC_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug, Default, PartialEq)]
pub struct Reconciliation {
    pub known: Vec<Handle>,
    pub discovered: Vec<MpnSubscriptionSnapshot>,
}

impl Reconciliation {
    /// `{"result": [handle…], "extra": [snapshot…]}`
    pub fn into_payload(self) -> Value {
        json!({ "result": self.known, "extra": self.discovered })
    }
}

/// Where a candidate stands relative to the registry.
enum Standing {
    Known(Handle),
    /// Held under a handle another client owns.
    Foreign(Handle),
    Unknown,
}

pub struct Reconciler {
    registry: Arc<Registry>,
    notifier: Notifier,
    prefix: String,
}

impl Reconciler {
    pub fn new(registry: Arc<Registry>, notifier: Notifier, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            notifier,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn reconcile(
        &self,
        client: &str,
        candidates: Vec<Arc<dyn MpnSubscription>>,
    ) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        for candidate in candidates {
            let Some(id) = candidate.subscription_id() else {
                log::warn!("client {client}: mpn subscription without a server id skipped");
                continue;
            };
            match self.standing(client, &candidate, &id) {
                Standing::Known(handle) => {
                    if !outcome.known.contains(&handle) {
                        outcome.known.push(handle);
                    }
                }
                Standing::Foreign(handle) => {
                    log::warn!("client {client}: {id} is held as {handle} by another client");
                }
                Standing::Unknown => {
                    if let Some(snapshot) = self.adopt(client, &id, candidate) {
                        outcome.discovered.push(snapshot);
                    }
                }
            }
        }
        outcome
    }

    /// Retires every entry of `client` other than `keep` that still claims
    /// server id `id`, and returns their handles.
    pub fn retire_duplicates(&self, client: &str, keep: &str, id: &str) -> Vec<Handle> {
        let stale: Vec<Handle> = self
            .owned_by(client)
            .into_iter()
            .filter(|(handle, object)| {
                handle != keep && object.subscription_id().as_deref() == Some(id)
            })
            .map(|(handle, _)| handle)
            .collect();
        for handle in &stale {
            let removed = self
                .registry
                .with(|maps| maps.mpn_subscriptions.remove(handle).ok());
            if let Some(entry) = removed {
                entry.retire(|subscription, listener| subscription.remove_listener(listener));
                log::debug!("client {client}: {handle} retired, {id} is now {keep}");
            }
        }
        stale
    }

    fn standing(&self, client: &str, candidate: &Arc<dyn MpnSubscription>, id: &str) -> Standing {
        let held = self.registry.with(|maps| {
            maps.mpn_subscriptions
                .find(|_, entry| same_object(&entry.object, candidate))
                .map(|(handle, entry)| (handle.to_owned(), entry.is_owned_by(client)))
        });
        match held {
            Some((handle, true)) => {
                self.retire_duplicates(client, &handle, id);
                return Standing::Known(handle);
            }
            Some((handle, false)) => return Standing::Foreign(handle),
            None => {}
        }
        // Server ids are read outside the lock: they come from backend objects.
        self.owned_by(client)
            .into_iter()
            .find(|(_, object)| object.subscription_id().as_deref() == Some(id))
            .map_or(Standing::Unknown, |(handle, _)| Standing::Known(handle))
    }

    fn adopt(
        &self,
        client: &str,
        id: &str,
        candidate: Arc<dyn MpnSubscription>,
    ) -> Option<MpnSubscriptionSnapshot> {
        let handle = mint_handle(&self.prefix);
        let attachment = MpnSubscriptionForwarder::attach(&handle, &candidate, &self.notifier);
        let entry = Entry::discovered(Arc::clone(&candidate), client).with_attachment(attachment);
        let refused = self
            .registry
            .with(|maps| maps.mpn_subscriptions.try_create(&handle, entry).err());
        if let Some((err, entry)) = refused {
            // Registered concurrently under another handle.
            entry.retire(|subscription, listener| subscription.remove_listener(listener));
            log::warn!("client {client}: server subscription {id} not adopted: {err}");
            return None;
        }
        log::debug!("client {client}: server subscription {id} adopted as {handle}");
        Some(snapshot(&handle, candidate.as_ref()))
    }

    fn owned_by(&self, client: &str) -> Vec<(Handle, Arc<dyn MpnSubscription>)> {
        self.registry.with(|maps| {
            maps.mpn_subscriptions
                .iter()
                .filter(|(_, entry)| entry.is_owned_by(client))
                .map(|(handle, entry)| (handle.to_owned(), Arc::clone(&entry.object)))
                .collect()
        })
    }
}

/// Full state of `subscription` as seen right now.
pub fn snapshot(handle: &str, subscription: &dyn MpnSubscription) -> MpnSubscriptionSnapshot {
    let config = subscription.config();
    MpnSubscriptionSnapshot {
        id: handle.to_owned(),
        mode: config.mode,
        items: config.items,
        fields: config.fields,
        group: config.group,
        schema: config.schema,
        data_adapter: config.data_adapter,
        buffer_size: config.requested_buffer_size,
        requested_max_frequency: config.requested_max_frequency,
        notification_format: config.notification_format,
        trigger: config.trigger_expression,
        actual_notification_format: subscription.actual_notification_format(),
        actual_trigger: subscription.actual_trigger_expression(),
        status_ts: subscription.status_timestamp(),
        status: subscription.status(),
        subscription_id: subscription.subscription_id(),
    }
}
