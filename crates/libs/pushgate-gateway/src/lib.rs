//! Gateway between a handle-holding frontend and a push-messaging backend.
//!
//! The frontend names every backend object by a string handle it chose. The
//! gateway keeps the handle-to-object maps, routes `Component.Operation`
//! commands to the right object, turns backend callbacks into notifications
//! stamped with the owning handle, and adopts MPN subscriptions the server
//! knows about but the frontend never asked for.
//!
//! ```text
//! frontend ──CommandRequest──▶ Dispatcher ──▶ Backend objects
//!     ▲                           │                 │
//!     └──── NotificationStream ◀──┴── forwarders ◀──┘ (callbacks)
//! ```
//!
//! Use [`Gateway::spawn`] to run commands on a task, or
//! [`Gateway::dispatch`] to call synchronously.

pub mod config;
pub mod dispatch;
pub mod forwarder;
pub mod notify;
pub mod reconcile;
pub mod registry;
pub mod service;

pub use config::GatewayConfig;
pub use dispatch::Dispatcher;
pub use notify::{spawn_delivery, NotificationSink, NotificationStream, Notifier};
pub use registry::Registry;
pub use service::{Gateway, GatewayHandle, ServiceError};
