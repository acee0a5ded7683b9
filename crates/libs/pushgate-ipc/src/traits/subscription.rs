use std::any::Any;
use std::sync::Arc;

use crate::error::BackendError;
use crate::traits::listeners::SubscriptionListener;
use crate::types::*;

/// A real-time item subscription.
pub trait Subscription: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn SubscriptionListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn config(&self) -> SubscriptionConfig;

    /// Fails while the subscription is active.
    fn configure(&self, patch: SubscriptionPatch) -> Result<(), BackendError>;

    /// Allowed on an active subscription; the server answers with
    /// `on_real_max_frequency`.
    fn set_requested_max_frequency(
        &self,
        frequency: Option<MaxFrequency>,
    ) -> Result<(), BackendError>;

    /// Handed to a client's `subscribe` and not yet unsubscribed.
    fn is_active(&self) -> bool;

    /// Confirmed by the server.
    fn is_subscribed(&self) -> bool;

    /// COMMAND mode only.
    fn command_position(&self) -> Result<u32, BackendError>;

    /// COMMAND mode only.
    fn key_position(&self) -> Result<u32, BackendError>;

    fn value(&self, item: &ItemRef, field: &FieldRef) -> Result<Option<String>, BackendError>;

    fn command_value(
        &self,
        item: &ItemRef,
        key: &str,
        field: &FieldRef,
    ) -> Result<Option<String>, BackendError>;

    fn as_any(&self) -> &dyn Any;
}
