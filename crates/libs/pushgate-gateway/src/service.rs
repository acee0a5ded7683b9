//! Single-task command loop.
//!
//! Commands queue on a bounded channel and are dispatched one at a time, in
//! arrival order. Each caller gets its response on a `oneshot`.

use std::sync::Arc;

use pushgate_ipc::{Backend, CommandRequest, CommandResponse};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::notify::{self, NotificationStream};
use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("gateway service stopped")]
    Closed,
}

type Call = (CommandRequest, oneshot::Sender<CommandResponse>);

pub struct Gateway {
    dispatcher: Dispatcher,
    command_buffer: usize,
}

impl Gateway {
    /// Builds the gateway and the stream its notifications come out of.
    pub fn new(config: GatewayConfig, backend: Arc<dyn Backend>) -> (Self, NotificationStream) {
        let (notifier, stream) = notify::channel();
        let command_buffer = config.command_buffer();
        let dispatcher = Dispatcher::new(config, backend, notifier);
        let gateway = Self {
            dispatcher,
            command_buffer,
        };
        (gateway, stream)
    }

    /// Dispatches on the caller's thread.
    pub fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        self.dispatcher.dispatch(request)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }

    /// Moves the gateway onto its own task. The task ends once every
    /// [`GatewayHandle`] is dropped.
    pub fn spawn(self) -> GatewayHandle {
        let (tx, mut rx) = mpsc::channel::<Call>(self.command_buffer);
        let task = tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let response = self.dispatcher.dispatch(request);
                if reply.send(response).is_err() {
                    log::debug!("caller went away before its response");
                }
            }
            log::debug!("gateway command channel closed");
        });
        GatewayHandle {
            tx,
            task: Arc::new(task),
        }
    }
}

#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Call>,
    task: Arc<JoinHandle<()>>,
}

impl GatewayHandle {
    pub async fn call(&self, request: CommandRequest) -> Result<CommandResponse, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| ServiceError::Closed)?;
        reply_rx.await.map_err(|_| ServiceError::Closed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
