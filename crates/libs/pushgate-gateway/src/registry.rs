//! Handle registry.
//!
//! Four independent maps, one per object kind, behind a single mutex. The
//! lock is only reachable through [`Registry::with`], which keeps every
//! critical section a plain in-memory map operation: callers copy the `Arc`s
//! they need out of the closure and talk to the backend afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use pushgate_ipc::{
    same_object, GatewayError, Handle, HandleKind, ListenerId, MpnDevice, MpnSubscription,
    PushClient, Subscription,
};

use crate::forwarder::Attachment;

/// How an entry came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Issued by a frontend command.
    Requested,
    /// Found through a backend query and given a synthetic handle.
    Discovered,
}

pub struct Entry<U: ?Sized> {
    pub object: Arc<U>,
    /// Client handle that owns this entry, for subscription-like kinds.
    pub owner: Option<Handle>,
    pub origin: Origin,
    attachment: Option<Attachment>,
}

impl<U: ?Sized> Entry<U> {
    pub fn requested(object: Arc<U>, owner: Option<&str>) -> Self {
        Self {
            object,
            owner: owner.map(str::to_owned),
            origin: Origin::Requested,
            attachment: None,
        }
    }

    pub fn discovered(object: Arc<U>, owner: &str) -> Self {
        Self {
            object,
            owner: Some(owner.to_owned()),
            origin: Origin::Discovered,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn take_attachment(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    pub fn is_owned_by(&self, client: &str) -> bool {
        self.owner.as_deref() == Some(client)
    }

    /// Closes the forwarder and detaches it from the backend object.
    ///
    /// Calls the backend: only use on an entry already taken out of the
    /// registry.
    pub fn retire(mut self, remove_listener: impl FnOnce(&U, ListenerId) -> bool) {
        if let Some(attachment) = self.take_attachment() {
            attachment.close();
            remove_listener(self.object.as_ref(), attachment.listener());
        }
    }
}

/// Handle → entry map for one object kind.
pub struct HandleMap<U: ?Sized> {
    kind: HandleKind,
    entries: BTreeMap<Handle, Entry<U>>,
}

impl<U: ?Sized> HandleMap<U> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Fails if `handle` is taken, or if the same backend object is already
    /// registered under another handle.
    pub fn create(&mut self, handle: &str, entry: Entry<U>) -> Result<(), GatewayError> {
        self.try_create(handle, entry).map_err(|(err, _)| err)
    }

    /// Like [`HandleMap::create`], but hands a refused entry back so its
    /// forwarder can be detached.
    pub fn try_create(
        &mut self,
        handle: &str,
        entry: Entry<U>,
    ) -> Result<(), (GatewayError, Entry<U>)> {
        if self.entries.contains_key(handle) {
            return Err((GatewayError::already_exists(self.kind, handle), entry));
        }
        if let Some(existing) = self.handle_of(&entry.object) {
            let err = GatewayError::already_exists(self.kind, existing);
            return Err((err, entry));
        }
        self.entries.insert(handle.to_owned(), entry);
        Ok(())
    }

    pub fn get(&self, handle: &str) -> Result<&Entry<U>, GatewayError> {
        self.entries
            .get(handle)
            .ok_or_else(|| GatewayError::not_found(self.kind, handle))
    }

    pub fn get_mut(&mut self, handle: &str) -> Result<&mut Entry<U>, GatewayError> {
        let kind = self.kind;
        self.entries
            .get_mut(handle)
            .ok_or_else(|| GatewayError::not_found(kind, handle))
    }

    /// Copies the object out so the caller can release the lock.
    pub fn object(&self, handle: &str) -> Result<Arc<U>, GatewayError> {
        self.get(handle).map(|entry| Arc::clone(&entry.object))
    }

    /// Legacy lookup: fabricates an entry on a miss instead of failing.
    pub fn get_or_create_default(
        &mut self,
        handle: &str,
        factory: impl FnOnce() -> Entry<U>,
    ) -> &Entry<U> {
        let kind = self.kind;
        self.entries.entry(handle.to_owned()).or_insert_with(|| {
            log::warn!("{kind} handle {handle} was not created; fabricating a default");
            factory()
        })
    }

    pub fn remove(&mut self, handle: &str) -> Result<Entry<U>, GatewayError> {
        self.entries
            .remove(handle)
            .ok_or_else(|| GatewayError::not_found(self.kind, handle))
    }

    /// Removes and returns every entry matching `predicate`.
    pub fn remove_where(
        &mut self,
        predicate: impl Fn(&str, &Entry<U>) -> bool,
    ) -> Vec<(Handle, Entry<U>)> {
        let handles: Vec<Handle> = self
            .iter()
            .filter(|(handle, entry)| predicate(*handle, *entry))
            .map(|(handle, _)| handle.to_owned())
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| {
                let entry = self.entries.remove(&handle)?;
                Some((handle, entry))
            })
            .collect()
    }

    /// Linear scan for the first entry matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&str, &Entry<U>) -> bool) -> Option<(&str, &Entry<U>)> {
        self.iter()
            .find(|(handle, entry)| predicate(*handle, *entry))
    }

    /// Handle of the entry holding exactly this backend object.
    pub fn handle_of(&self, object: &Arc<U>) -> Option<&str> {
        self.find(|_, entry| same_object(&entry.object, object))
            .map(|(handle, _)| handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry<U>)> {
        self.entries
            .iter()
            .map(|(handle, entry)| (handle.as_str(), entry))
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct RegistryMaps {
    pub clients: HandleMap<dyn PushClient>,
    pub subscriptions: HandleMap<dyn Subscription>,
    pub mpn_subscriptions: HandleMap<dyn MpnSubscription>,
    pub devices: HandleMap<dyn MpnDevice>,
    /// Device handles whose registration has not been answered yet.
    in_flight: BTreeSet<Handle>,
}

impl RegistryMaps {
    fn new() -> Self {
        Self {
            clients: HandleMap::new(HandleKind::Client),
            subscriptions: HandleMap::new(HandleKind::Subscription),
            mpn_subscriptions: HandleMap::new(HandleKind::MpnSubscription),
            devices: HandleMap::new(HandleKind::MpnDevice),
            in_flight: BTreeSet::new(),
        }
    }

    pub fn client(&self, handle: &str) -> Result<Arc<dyn PushClient>, GatewayError> {
        self.clients.object(handle)
    }

    pub fn begin_registration(&mut self, device: &str) {
        self.in_flight.insert(device.to_owned());
    }

    /// Returns `false` if no registration was in flight for `device`.
    pub fn settle_registration(&mut self, device: &str) -> bool {
        self.in_flight.remove(device)
    }

    /// In-flight device registration owned by `client`, if any.
    pub fn registration_in_flight(&self, client: &str) -> Option<&str> {
        self.in_flight
            .iter()
            .find(|device| {
                self.devices
                    .get(device)
                    .map(|entry| entry.is_owned_by(client))
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }

    /// Takes every device entry `client` owns except `keep` out of the
    /// registry. A client has one registration slot.
    pub fn take_other_devices(
        &mut self,
        client: &str,
        keep: &str,
    ) -> Vec<(Handle, Entry<dyn MpnDevice>)> {
        let taken = self
            .devices
            .remove_where(|handle, entry| handle != keep && entry.is_owned_by(client));
        for (handle, _) in &taken {
            self.in_flight.remove(handle);
        }
        taken
    }
}

/// The registry shared by the dispatcher and the forwarders.
pub struct Registry {
    maps: Mutex<RegistryMaps>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(RegistryMaps::new()),
        }
    }

    /// Runs `f` under the registry lock. Never call the backend from `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut RegistryMaps) -> R) -> R {
        let mut maps = self.maps.lock().expect("registry mutex poisoned");
        f(&mut *maps)
    }
}
