use std::sync::Arc;

use pushgate_ipc::{
    ArgBag, ClientMessageListener, ConnectionDetailsPatch, Handle, ListenerId, OutgoingMessage,
};
use serde_json::json;

use super::connection::{details_patch, options_patch};
use super::{done, required, Dispatcher, Outcome};
use crate::forwarder::MessageForwarder;
use crate::registry::{Entry, HandleMap};

impl Dispatcher {
    pub(super) fn client_command(&self, operation: &str, args: &ArgBag) -> Outcome {
        match operation {
            "create" => self.create_client(args),
            "connect" => self.connect(args),
            "disconnect" => {
                let (_, client) = self.lookup_client(args)?;
                client.disconnect();
                done()
            }
            "getStatus" => {
                let (_, client) = self.lookup_client(args)?;
                Ok(Some(json!(client.status())))
            }
            "subscribe" => self.subscribe(args),
            "unsubscribe" => self.unsubscribe(args),
            "getSubscriptions" => self.subscriptions(args),
            "sendMessage" => self.send_message(args),
            "registerForMpn" => self.register_for_mpn(args),
            "subscribeMpn" => self.subscribe_mpn(args),
            "unsubscribeMpn" => self.unsubscribe_mpn(args),
            "unsubscribeMpnSubscriptions" => self.unsubscribe_mpn_subscriptions(args),
            "getMpnSubscriptions" => self.mpn_subscriptions(args),
            "findMpnSubscription" => self.find_mpn_subscription(args),
            "addCookies" => {
                let uri = args.require_str("uri")?;
                let cookies = required(args.str_list("cookies")?, "cookies")?;
                self.backend.add_cookies(&uri, cookies)?;
                done()
            }
            "getCookies" => {
                let uri = args.str("uri")?;
                Ok(Some(json!(self.backend.cookies(uri.as_deref()))))
            }
            "cleanResources" => self.clean_resources(args),
            _ => Ok(None),
        }
    }

    fn create_client(&self, args: &ArgBag) -> Outcome {
        let handle = args.require_str("id")?;
        self.registry
            .with(|maps| Self::ensure_absent(&maps.clients, &handle))?;
        let details = ConnectionDetailsPatch {
            server_address: args.nullable_str("serverAddress")?,
            adapter_set: args.nullable_str("adapterSet")?,
            ..ConnectionDetailsPatch::default()
        };
        let entry = self.new_client(&handle, details);
        self.registry
            .with(|maps| maps.clients.create(&handle, entry))?;
        log::debug!("client {handle} created");
        done()
    }

    /// Applies the optional detail and option bags, then connects.
    fn connect(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let details = match args.bag("connectionDetails")? {
            Some(bag) => details_patch(&bag)?,
            None => ConnectionDetailsPatch::default(),
        };
        let options = match args.bag("connectionOptions")? {
            Some(bag) => Some(options_patch(&bag)?),
            None => None,
        };
        if !details.is_empty() {
            client.update_connection_details(details)?;
        }
        if let Some(options) = options.filter(|patch| !patch.is_empty()) {
            client.update_connection_options(options)?;
        }
        client.connect()?;
        done()
    }

    fn subscriptions(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let held = client.subscriptions();
        let handles: Vec<Handle> = self.registry.with(|maps| {
            held.iter()
                .filter_map(|object| maps.subscriptions.handle_of(object).map(str::to_owned))
                .collect()
        });
        Ok(Some(json!(handles)))
    }

    fn send_message(&self, args: &ArgBag) -> Outcome {
        let (_, client) = self.lookup_client(args)?;
        let mut message = OutgoingMessage::new(args.require_str("message")?);
        message.sequence = args.str("sequence")?;
        if let Some(delay) = args.int("delayTimeout")? {
            message.delay_timeout = delay;
        }
        message.enqueue_while_disconnected = args
            .bool("enqueueWhileDisconnected")?
            .unwrap_or(false);
        let listener = args.str("msgId")?.map(|msg_id| {
            let forwarder = MessageForwarder::new(&msg_id, &self.notifier);
            Arc::new(forwarder) as Arc<dyn ClientMessageListener>
        });
        client.send_message(message, listener)?;
        done()
    }

    /// Forgets the named handles and detaches their forwarders. Unknown
    /// handles are ignored.
    fn clean_resources(&self, args: &ArgBag) -> Outcome {
        let client_ids = args.str_list("clientIds")?.unwrap_or_default();
        let sub_ids = args.str_list("subIds")?.unwrap_or_default();
        let device_ids = args.str_list("mpnDevIds")?.unwrap_or_default();
        let mpn_sub_ids = args.str_list("mpnSubIds")?.unwrap_or_default();

        let (clients, subscriptions, devices, mpn_subscriptions) = self.registry.with(|maps| {
            for device in &device_ids {
                maps.settle_registration(device);
            }
            (
                take(&mut maps.clients, &client_ids),
                take(&mut maps.subscriptions, &sub_ids),
                take(&mut maps.devices, &device_ids),
                take(&mut maps.mpn_subscriptions, &mpn_sub_ids),
            )
        });

        Ok(Some(json!({
            "clients": detach(clients, |client, id| client.remove_listener(id)),
            "subscriptions": detach(subscriptions, |subscription, id| {
                subscription.remove_listener(id)
            }),
            "mpnDevices": detach(devices, |device, id| device.remove_listener(id)),
            "mpnSubscriptions": detach(mpn_subscriptions, |subscription, id| {
                subscription.remove_listener(id)
            }),
        })))
    }
}

fn take<U: ?Sized>(map: &mut HandleMap<U>, handles: &[String]) -> Vec<Entry<U>> {
    handles
        .iter()
        .filter_map(|handle| match map.remove(handle) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("clean resources: {err}");
                None
            }
        })
        .collect()
}

/// Closes and detaches each entry's forwarder. Returns how many entries
/// were dropped.
fn detach<U: ?Sized>(entries: Vec<Entry<U>>, remove: impl Fn(&U, ListenerId) -> bool) -> usize {
    let count = entries.len();
    for entry in entries {
        entry.retire(&remove);
    }
    count
}
