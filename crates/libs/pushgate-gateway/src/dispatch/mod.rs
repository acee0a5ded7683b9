//! Command dispatcher.
//!
//! `Component.Operation` is split on the first dot, routed to the component's
//! handler and then to the operation. Every handler returns
//! `Ok(None)` for an operation it does not know, which becomes
//! [`CommandResponse::NotImplemented`].
//!
//! Handles are resolved and state preconditions checked before any mutating
//! backend call. The registry lock is never held across a backend call.

mod builder;
mod client;
mod connection;
mod mpn;
mod subscription;

use std::sync::Arc;

use pushgate_ipc::{
    ArgBag, Backend, CommandRequest, CommandResponse, ConnectionDetailsPatch, GatewayError,
    Handle, HandleKind, ListenerId, MpnSubscription, PushClient, Subscription,
};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::forwarder::ClientForwarder;
use crate::notify::Notifier;
use crate::reconcile::Reconciler;
use crate::registry::{Entry, HandleMap, Registry, RegistryMaps};

/// `Ok(None)` means the operation is unknown.
type Outcome = Result<Option<Value>, GatewayError>;

/// Success with a `null` payload.
fn done() -> Outcome {
    Ok(Some(Value::Null))
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, GatewayError> {
    value.ok_or_else(|| GatewayError::invalid_argument(name, "is required"))
}

pub struct Dispatcher {
    config: GatewayConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    notifier: Notifier,
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig, backend: Arc<dyn Backend>, notifier: Notifier) -> Self {
        let registry = Arc::new(Registry::new());
        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            notifier.clone(),
            config.synthetic_handle_prefix.clone(),
        );
        Self {
            config,
            backend,
            registry,
            notifier,
            reconciler,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        let CommandRequest { command, arguments } = request;
        log::debug!(
            "accepting {command} {:?}",
            arguments.keys().collect::<Vec<_>>()
        );

        let outcome = match command.split_once('.') {
            Some((component, operation)) => self.route(component, operation, &arguments),
            None => Ok(None),
        };
        match outcome {
            Ok(Some(payload)) => CommandResponse::success(payload),
            Ok(None) => {
                log::error!("unknown command {command}");
                CommandResponse::NotImplemented
            }
            Err(err) => {
                if err.is_operational() {
                    log::warn!("{command} rejected by backend: {err}");
                } else {
                    log::debug!("{command} failed: {err}");
                }
                err.into()
            }
        }
    }

    fn route(&self, component: &str, operation: &str, args: &ArgBag) -> Outcome {
        match component {
            "Client" | "LightstreamerClient" => self.client_command(operation, args),
            "ConnectionDetails" => self.connection_details_command(operation, args),
            "ConnectionOptions" => self.connection_options_command(operation, args),
            "Subscription" => self.subscription_command(operation, args),
            "MpnSubscription" => self.mpn_subscription_command(operation, args),
            "MpnBuilder" | "AndroidMpnBuilder" => builder::command(operation, args),
            _ => Ok(None),
        }
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    /// Resolves the client named by `id`.
    fn lookup_client(&self, args: &ArgBag) -> Result<(Handle, Arc<dyn PushClient>), GatewayError> {
        let handle = args.require_str("id")?;
        let found = self.registry.with(|maps| maps.client(&handle));
        match found {
            Ok(client) => Ok((handle, client)),
            Err(err) if !self.config.lenient_client_lookup => Err(err),
            Err(_) => {
                let fresh = self.new_client(&handle, ConnectionDetailsPatch::default());
                let client = self.registry.with(|maps| {
                    Arc::clone(&maps.clients.get_or_create_default(&handle, || fresh).object)
                });
                Ok((handle, client))
            }
        }
    }

    fn lookup_subscription(&self, handle: &str) -> Result<Arc<dyn Subscription>, GatewayError> {
        self.registry.with(|maps| maps.subscriptions.object(handle))
    }

    fn lookup_mpn_subscription(
        &self,
        handle: &str,
    ) -> Result<Arc<dyn MpnSubscription>, GatewayError> {
        self.registry
            .with(|maps| maps.mpn_subscriptions.object(handle))
    }

    /// Backend client with its forwarder attached, ready to register.
    fn new_client(&self, handle: &str, details: ConnectionDetailsPatch) -> Entry<dyn PushClient> {
        let client = self.backend.create_client(details);
        let attachment = ClientForwarder::attach(handle, &client, &self.notifier);
        Entry::requested(client, None).with_attachment(attachment)
    }

    fn ensure_absent<U: ?Sized>(map: &HandleMap<U>, handle: &str) -> Result<(), GatewayError> {
        if map.contains(handle) {
            return Err(GatewayError::already_exists(map.kind(), handle));
        }
        Ok(())
    }
}

/// Removes a just-registered entry after its activation failed and detaches
/// its forwarder.
fn roll_back<U: ?Sized>(
    registry: &Registry,
    kind: HandleKind,
    handle: &str,
    select: impl FnOnce(&mut RegistryMaps) -> &mut HandleMap<U>,
    remove_listener: impl FnOnce(&U, ListenerId) -> bool,
) {
    let removed = registry.with(|maps| select(maps).remove(handle).ok());
    match removed {
        Some(entry) => {
            entry.retire(remove_listener);
            log::debug!("{kind} {handle} rolled back");
        }
        None => log::warn!("{kind} {handle} vanished before roll-back"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify;
    use pushgate_ipc::MemoryBackend;
    use serde_json::json;

    fn dispatcher(config: GatewayConfig) -> (Dispatcher, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new().expect("backend"));
        let (notifier, _stream) = notify::channel();
        let backend_dyn: Arc<dyn Backend> = backend.clone();
        (Dispatcher::new(config, backend_dyn, notifier), backend)
    }

    fn call(dispatcher: &Dispatcher, command: &str, arguments: Value) -> CommandResponse {
        let arguments = ArgBag::from_value(arguments).expect("object");
        dispatcher.dispatch(CommandRequest::new(command, arguments))
    }

    #[test]
    fn unknown_component_and_operation_are_not_implemented() {
        let (dispatcher, _) = dispatcher(GatewayConfig::default());
        assert_eq!(
            call(&dispatcher, "Bogus.create", json!({})),
            CommandResponse::NotImplemented
        );
        assert_eq!(
            call(&dispatcher, "Client.bogus", json!({})),
            CommandResponse::NotImplemented
        );
        assert_eq!(
            call(&dispatcher, "NoDot", json!({})),
            CommandResponse::NotImplemented
        );
        assert_eq!(
            call(
                &dispatcher,
                "Client.setLoggerProvider",
                json!({ "level": 1 }),
            ),
            CommandResponse::NotImplemented
        );
    }

    #[test]
    fn strict_lookup_fails_closed() {
        let (dispatcher, backend) = dispatcher(GatewayConfig::default());
        let response = call(&dispatcher, "Client.disconnect", json!({ "id": "ghost" }));
        assert_eq!(response.error_code(), Some("HANDLE_NOT_FOUND"));
        assert!(backend.clients().is_empty());
    }

    #[test]
    fn lenient_lookup_fabricates_a_client() {
        let config = GatewayConfig {
            lenient_client_lookup: true,
            ..GatewayConfig::default()
        };
        let (dispatcher, backend) = dispatcher(config);
        let response = call(&dispatcher, "Client.getStatus", json!({ "id": "ghost" }));
        assert_eq!(response.payload(), Some(&json!("DISCONNECTED")));
        assert_eq!(backend.clients().len(), 1);

        call(&dispatcher, "Client.getStatus", json!({ "id": "ghost" }));
        assert_eq!(backend.clients().len(), 1);
    }

    #[test]
    fn missing_handle_argument_is_invalid_argument() {
        let (dispatcher, _) = dispatcher(GatewayConfig::default());
        let response = call(&dispatcher, "Client.connect", json!({}));
        assert_eq!(response.error_code(), Some("INVALID_ARGUMENT"));
    }
}
