mod client;
pub mod listeners;
mod mpn;
mod subscription;

use std::sync::Arc;

pub use client::PushClient;
pub use mpn::{MpnDevice, MpnSubscription};
pub use subscription::Subscription;

use crate::error::BackendError;
use crate::types::{ConnectionDetailsPatch, MpnSubscriptionConfig, SubscriptionConfig};

/// Factory for every backend object kind, plus process-wide state the
/// library keeps outside any client.
///
/// Use `Arc<dyn Backend>` as the handle type.
pub trait Backend: Send + Sync {
    fn create_client(&self, details: ConnectionDetailsPatch) -> Arc<dyn PushClient>;

    fn create_subscription(
        &self,
        config: SubscriptionConfig,
    ) -> Result<Arc<dyn Subscription>, BackendError>;

    fn create_mpn_subscription(
        &self,
        config: MpnSubscriptionConfig,
    ) -> Result<Arc<dyn MpnSubscription>, BackendError>;

    fn create_mpn_device(&self, device_token: &str) -> Result<Arc<dyn MpnDevice>, BackendError>;

    fn add_cookies(&self, uri: &str, cookies: Vec<String>) -> Result<(), BackendError>;

    fn cookies(&self, uri: Option<&str>) -> Vec<String>;
}

/// Identity comparison for shared backend objects behind trait objects.
///
/// Compares data pointers only, so two `Arc`s to the same object match even
/// when they were coerced through different vtables.
pub fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
