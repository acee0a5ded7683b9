//! Boundary contract for the pushgate facade.
//!
//! This crate defines what crosses the line between a frontend that only
//! holds string handles and a backend push-messaging client library that
//! owns the real objects. It provides:
//!
//! - **Argument bags** ([`ArgBag`]) with typed accessors for command inputs
//! - **Protocol types** for commands, responses, and notifications
//! - **Capability traits** describing the backend client library
//! - **`GatewayError`** with a stable wire code per failure class
//! - **`MemoryBackend`**, an in-process backend that raises callbacks on its
//!   own thread, used by tests and by the `pushgated` driver
//!
//! # Trait layout
//!
//! - [`Backend`]: factory for every backend object kind
//! - [`PushClient`]: connection, subscription, messaging, and MPN entry points
//! - [`Subscription`]: a real-time item subscription
//! - [`MpnSubscription`] / [`MpnDevice`]: mobile push notification objects
//! - Listener traits: one per callback family, see [`traits::listeners`]

pub mod args;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use args::{ArgBag, ArgValue};
pub use error::{BackendError, GatewayError};
pub use memory::MemoryBackend;
pub use traits::listeners::{
    ClientListener, ClientMessageListener, MpnDeviceListener, MpnSubscriptionListener,
    SubscriptionListener,
};
pub use traits::{same_object, Backend, MpnDevice, MpnSubscription, PushClient, Subscription};
pub use types::*;
