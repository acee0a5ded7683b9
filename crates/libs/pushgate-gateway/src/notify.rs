use async_trait::async_trait;
use pushgate_ipc::Notification;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Creates the single outgoing notification channel.
pub fn channel() -> (Notifier, NotificationStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, NotificationStream { rx })
}

/// Sending half, cloned into every forwarder. Safe to use from any thread.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Fire-and-forget. A closed channel drops the notification.
    pub fn notify(&self, notification: Notification) {
        if let Err(err) = self.tx.send(notification) {
            log::debug!("notification channel closed; dropped {}", err.0.event);
        }
    }
}

/// Receiving half. Notifications come out in the order they were sent.
#[derive(Debug)]
pub struct NotificationStream {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationStream {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// Frontend side of the notification channel.
#[async_trait]
pub trait NotificationSink: Send {
    async fn deliver(&mut self, notification: Notification) -> std::io::Result<()>;
}

/// Drains `stream` into `sink` until every [`Notifier`] is gone.
///
/// A failed delivery is logged and skipped; later notifications still go out.
pub fn spawn_delivery<S>(mut stream: NotificationStream, mut sink: S) -> JoinHandle<()>
where
    S: NotificationSink + 'static,
{
    tokio::spawn(async move {
        while let Some(notification) = stream.recv().await {
            let event = notification.event.clone();
            if let Err(err) = sink.deliver(notification).await {
                log::warn!("failed to deliver {event}: {err}");
            }
        }
        log::debug!("notification stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_ipc::ArgBag;
    use std::io;

    struct FlakySink {
        delivered: Vec<String>,
        calls: usize,
        done: Option<tokio::sync::oneshot::Sender<Vec<String>>>,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn deliver(&mut self, notification: Notification) -> io::Result<()> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "frontend busy"));
            }
            self.delivered.push(notification.event);
            if self.calls == 3 {
                if let Some(done) = self.done.take() {
                    let _ = done.send(self.delivered.clone());
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_the_stream() {
        let (notifier, stream) = channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let sink = FlakySink {
            delivered: Vec::new(),
            calls: 0,
            done: Some(done_tx),
        };
        let task = spawn_delivery(stream, sink);

        for event in ["A.first", "A.second", "A.third"] {
            notifier.notify(Notification::new(event, ArgBag::new()));
        }
        let delivered = done_rx.await.expect("sink finished");
        assert_eq!(
            delivered,
            vec!["A.first".to_string(), "A.third".to_string()]
        );

        drop(notifier);
        task.await.expect("delivery task");
    }

    #[test]
    fn notify_after_close_is_silent() {
        let (notifier, stream) = channel();
        drop(stream);
        notifier.notify(Notification::new("A.late", ArgBag::new()));
    }
}
