//! In-process backend.
//!
//! Behaves like a push client library talking to a well-behaved server: state
//! changes are applied and callbacks raised on a dedicated event thread, in
//! the order the library would produce them. Every mutating call is recorded
//! so tests can assert that the gateway did, or did not, reach the backend.

mod client;
mod mpn;
mod subscription;

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

pub use client::MemoryClient;
pub use mpn::{MemoryMpnDevice, MemoryMpnSubscription};
pub use subscription::MemorySubscription;

use crate::error::BackendError;
use crate::traits::*;
use crate::types::*;

type Job = Box<dyn FnOnce() + Send>;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Serial queue of callback jobs drained by the event thread.
#[derive(Clone)]
pub(crate) struct EventQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl EventQueue {
    fn start() -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new()
            .name("pushgate-memory-events".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
            })?;
        Ok(Self { tx })
    }

    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            log::debug!("memory backend event thread stopped; callback dropped");
        }
    }
}

/// State shared by every object created from one [`MemoryBackend`].
pub(crate) struct Shared {
    pub(crate) events: EventQueue,
    calls: Mutex<Vec<String>>,
    serial: AtomicU64,
}

impl Shared {
    pub(crate) fn record(&self, call: &str) {
        self.calls
            .lock()
            .expect("call log mutex poisoned")
            .push(call.to_string());
    }

    /// Process-unique counter used for server-assigned identifiers.
    pub(crate) fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Listener set attached to one backend object.
pub(crate) struct Listeners<L: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> Listeners<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("listeners mutex poisoned")
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().expect("listeners mutex poisoned");
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Calls `f` on every listener without holding the listener lock, so a
    /// listener may read back into the object that raised the callback.
    pub(crate) fn each(&self, f: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = self
            .entries
            .lock()
            .expect("listeners mutex poisoned")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            f(&listener);
        }
    }
}

/// In-memory [`Backend`].
pub struct MemoryBackend {
    shared: Arc<Shared>,
    clients: Mutex<Vec<MemoryClient>>,
    cookies: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryBackend {
    /// Starts the event thread. Fails only if the thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            events: EventQueue::start()?,
            calls: Mutex::new(Vec::new()),
            serial: AtomicU64::new(1),
        });
        Ok(Self {
            shared,
            clients: Mutex::new(Vec::new()),
            cookies: Mutex::new(BTreeMap::new()),
        })
    }

    /// Every mutating call received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.shared
            .calls
            .lock()
            .expect("call log mutex poisoned")
            .clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        let calls = self.shared.calls.lock().expect("call log mutex poisoned");
        calls
            .iter()
            .filter(|recorded| recorded.as_str() == call)
            .count()
    }

    /// Clients created through [`Backend::create_client`], in creation order.
    pub fn clients(&self) -> Vec<MemoryClient> {
        self.clients.lock().expect("clients mutex poisoned").clone()
    }
}

impl Backend for MemoryBackend {
    fn create_client(&self, details: ConnectionDetailsPatch) -> Arc<dyn PushClient> {
        let client = MemoryClient::new(Arc::clone(&self.shared), details);
        self.clients
            .lock()
            .expect("clients mutex poisoned")
            .push(client.clone());
        Arc::new(client)
    }

    fn create_subscription(
        &self,
        config: SubscriptionConfig,
    ) -> Result<Arc<dyn Subscription>, BackendError> {
        Ok(Arc::new(MemorySubscription::new(Arc::clone(&self.shared), config)))
    }

    fn create_mpn_subscription(
        &self,
        config: MpnSubscriptionConfig,
    ) -> Result<Arc<dyn MpnSubscription>, BackendError> {
        Ok(Arc::new(MemoryMpnSubscription::new(Arc::clone(&self.shared), config)))
    }

    fn create_mpn_device(&self, device_token: &str) -> Result<Arc<dyn MpnDevice>, BackendError> {
        if device_token.trim().is_empty() {
            return Err(BackendError::illegal_argument("Device token must not be empty"));
        }
        Ok(Arc::new(MemoryMpnDevice::new(Arc::clone(&self.shared), device_token)))
    }

    fn add_cookies(&self, uri: &str, cookies: Vec<String>) -> Result<(), BackendError> {
        self.shared.record("add_cookies");
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(BackendError::illegal_argument(format!("Malformed URI: {uri}")));
        }
        self.cookies
            .lock()
            .expect("cookies mutex poisoned")
            .entry(uri.to_string())
            .or_default()
            .extend(cookies);
        Ok(())
    }

    fn cookies(&self, uri: Option<&str>) -> Vec<String> {
        let cookies = self.cookies.lock().expect("cookies mutex poisoned");
        match uri {
            Some(uri) => cookies.get(uri).cloned().unwrap_or_default(),
            None => cookies.values().flatten().cloned().collect(),
        }
    }
}
