//! Line-delimited JSON framing for stdin/stdout.
//!
//! Inbound: `{"id": …, "command": "Component.Operation", "arguments": {…}}`.
//! Outbound: `{"type": "response", "id": …, "response": {…}}` or
//! `{"type": "notification", "event": …, "arguments": {…}}`.

use std::sync::Arc;

use async_trait::async_trait;
use pushgate_gateway::NotificationSink;
use pushgate_ipc::{ArgBag, CommandRequest, CommandResponse, GatewayError, Notification};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    arguments: ArgBag,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundFrame {
    Response {
        id: Value,
        response: CommandResponse,
    },
    Notification { event: String, arguments: ArgBag },
}

impl From<Notification> for OutboundFrame {
    fn from(notification: Notification) -> Self {
        Self::Notification {
            event: notification.event,
            arguments: notification.arguments,
        }
    }
}

/// Splits a line into its correlation id and request. A line that is not a
/// request yields the response to send back instead.
pub fn parse_line(line: &str) -> Result<(Value, CommandRequest), OutboundFrame> {
    match serde_json::from_str::<InboundFrame>(line) {
        Ok(frame) => Ok((frame.id, CommandRequest::new(frame.command, frame.arguments))),
        Err(err) => {
            let error = GatewayError::invalid_argument("frame", err.to_string());
            Err(OutboundFrame::Response {
                id: Value::Null,
                response: error.into(),
            })
        }
    }
}

/// Serializes frames onto one shared writer, one line each.
pub struct FrameWriter<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub async fn write(&self, frame: &OutboundFrame) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Mutex<W>> {
        &self.out
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> NotificationSink for FrameWriter<W> {
    async fn deliver(&mut self, notification: Notification) -> std::io::Result<()> {
        self.write(&notification.into()).await
    }
}
