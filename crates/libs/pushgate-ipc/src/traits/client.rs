use std::sync::Arc;

use crate::error::BackendError;
use crate::traits::listeners::{ClientListener, ClientMessageListener};
use crate::traits::{MpnDevice, MpnSubscription, Subscription};
use crate::types::*;

/// A push-messaging client: one logical session with a server.
///
/// Calls never block on the network. Their outcome is reported later through
/// the listeners attached to the client and to the objects passed in.
pub trait PushClient: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn ClientListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn connection_details(&self) -> ConnectionDetails;

    fn update_connection_details(&self, patch: ConnectionDetailsPatch) -> Result<(), BackendError>;

    fn connection_options(&self) -> ConnectionOptions;

    fn update_connection_options(&self, patch: ConnectionOptionsPatch) -> Result<(), BackendError>;

    /// Fails when no server address has been configured.
    fn connect(&self) -> Result<(), BackendError>;

    fn disconnect(&self);

    /// Library status string, e.g. `DISCONNECTED` or `CONNECTED:WS-STREAMING`.
    fn status(&self) -> String;

    /// Activates the subscription. Fails if it is already active.
    fn subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), BackendError>;

    fn unsubscribe(&self, subscription: &Arc<dyn Subscription>) -> Result<(), BackendError>;

    /// Subscriptions currently held active by this client.
    fn subscriptions(&self) -> Vec<Arc<dyn Subscription>>;

    fn send_message(
        &self,
        message: OutgoingMessage,
        listener: Option<Arc<dyn ClientMessageListener>>,
    ) -> Result<(), BackendError>;

    fn register_for_mpn(&self, device: Arc<dyn MpnDevice>) -> Result<(), BackendError>;

    /// With `coalescing`, an existing server-side subscription with the same
    /// target is reused instead of creating a new one.
    fn subscribe_mpn(
        &self,
        subscription: Arc<dyn MpnSubscription>,
        coalescing: bool,
    ) -> Result<(), BackendError>;

    fn unsubscribe_mpn(&self, subscription: &Arc<dyn MpnSubscription>)
        -> Result<(), BackendError>;

    fn unsubscribe_mpn_subscriptions(&self, filter: MpnFilter) -> Result<(), BackendError>;

    /// MPN subscriptions known to the server for the registered device,
    /// including ones this client never created.
    fn mpn_subscriptions(&self, filter: MpnFilter) -> Vec<Arc<dyn MpnSubscription>>;

    fn find_mpn_subscription(&self, subscription_id: &str) -> Option<Arc<dyn MpnSubscription>>;
}
