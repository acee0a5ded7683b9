//! Callback interfaces raised by the backend library.
//!
//! The backend may invoke these from any of its internal threads. None of
//! them return a value: a listener has no way to push a failure back into the
//! library.

use crate::types::ItemUpdate;

pub trait ClientListener: Send + Sync {
    fn on_status_change(&self, status: &str);

    fn on_server_error(&self, code: i32, message: &str);

    /// Carries only the property name; read the value from the client.
    fn on_property_change(&self, property: &str);
}

pub trait SubscriptionListener: Send + Sync {
    fn on_clear_snapshot(&self, item_name: Option<&str>, item_pos: u32);

    fn on_command_second_level_item_lost_updates(&self, lost_updates: u32, key: &str);

    fn on_command_second_level_subscription_error(&self, code: i32, message: &str, key: &str);

    fn on_end_of_snapshot(&self, item_name: Option<&str>, item_pos: u32);

    fn on_item_lost_updates(&self, item_name: Option<&str>, item_pos: u32, lost_updates: u32);

    fn on_item_update(&self, update: &ItemUpdate);

    fn on_subscription(&self);

    fn on_subscription_error(&self, code: i32, message: &str);

    fn on_unsubscription(&self);

    fn on_real_max_frequency(&self, frequency: Option<&str>);
}

/// Outcome callbacks for a single `send_message` call.
pub trait ClientMessageListener: Send + Sync {
    fn on_abort(&self, original_message: &str, sent_on_network: bool);

    fn on_deny(&self, original_message: &str, code: i32, message: &str);

    fn on_discarded(&self, original_message: &str);

    fn on_error(&self, original_message: &str);

    fn on_processed(&self, original_message: &str, response: &str);
}

pub trait MpnDeviceListener: Send + Sync {
    fn on_registered(&self);

    fn on_suspended(&self);

    fn on_resumed(&self);

    fn on_status_changed(&self, status: &str, timestamp: i64);

    fn on_registration_failed(&self, code: i32, message: &str);

    fn on_subscriptions_updated(&self);
}

pub trait MpnSubscriptionListener: Send + Sync {
    fn on_subscription(&self);

    fn on_unsubscription(&self);

    fn on_subscription_error(&self, code: i32, message: &str);

    fn on_unsubscription_error(&self, code: i32, message: &str);

    fn on_triggered(&self);

    fn on_status_changed(&self, status: &str, timestamp: i64);

    /// Carries only the property name; read the value from the subscription.
    fn on_property_changed(&self, property: &str);

    fn on_modification_error(&self, code: i32, message: &str, property: &str);
}
