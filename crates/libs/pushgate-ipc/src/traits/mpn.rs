use std::any::Any;
use std::sync::Arc;

use crate::error::BackendError;
use crate::traits::listeners::{MpnDeviceListener, MpnSubscriptionListener};
use crate::types::*;

/// A subscription whose updates are delivered as mobile push notifications.
pub trait MpnSubscription: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn MpnSubscriptionListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Requested configuration.
    fn config(&self) -> MpnSubscriptionConfig;

    /// Fails while the subscription is active.
    fn configure(&self, patch: MpnSubscriptionPatch) -> Result<(), BackendError>;

    /// May be changed on an active subscription.
    fn set_trigger_expression(&self, trigger: Option<String>) -> Result<(), BackendError>;

    /// May be changed on an active subscription.
    fn set_notification_format(&self, format: String) -> Result<(), BackendError>;

    /// Trigger as confirmed by the server.
    fn actual_trigger_expression(&self) -> Option<String>;

    /// Format as confirmed by the server.
    fn actual_notification_format(&self) -> Option<String>;

    fn status(&self) -> String;

    fn status_timestamp(&self) -> i64;

    /// Server-assigned identity, `None` until the server confirms it.
    fn subscription_id(&self) -> Option<String>;

    fn is_active(&self) -> bool;

    fn is_subscribed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// The device a client registers to receive push notifications.
pub trait MpnDevice: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn MpnDeviceListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn application_id(&self) -> Option<String>;

    fn device_id(&self) -> Option<String>;

    fn device_token(&self) -> String;

    fn previous_device_token(&self) -> Option<String>;

    fn platform(&self) -> String;

    fn status(&self) -> String;

    fn status_timestamp(&self) -> i64;

    fn is_registered(&self) -> bool;

    fn is_suspended(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}
