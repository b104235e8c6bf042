use std::sync::Arc;

use ads::{Notification, NotificationSink};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{SessionLogger, SubscriptionRegistry, Update};

/// Turns notification packets into updates on the session's delivery channel.
///
/// Runs inside the transport's Rx task. When the channel is full it waits, which stops the socket
/// from being read and pushes back on the PLC.
pub struct Demultiplexer {
    registry: Arc<SubscriptionRegistry>,
    updates: mpsc::Sender<Update>,
    closing: CancellationToken,
    logger: SessionLogger,
}

impl Demultiplexer {
    /// Creates the demultiplexer and the receiving end of its channel, which holds up to
    /// `capacity` updates (at least one).
    pub fn channel(
        registry: Arc<SubscriptionRegistry>,
        capacity: usize,
        closing: CancellationToken,
        logger: SessionLogger,
    ) -> (Self, mpsc::Receiver<Update>) {
        let (updates, receiver) = mpsc::channel(capacity.max(1));
        let demux = Demultiplexer {
            registry,
            updates,
            closing,
            logger,
        };
        (demux, receiver)
    }

    fn decode(&self, notification: Notification) -> Vec<Update> {
        let mut updates = Vec::with_capacity(notification.sample_count());
        for stamp in notification.stamps {
            let timestamp = stamp.unix_nanos();
            for sample in stamp.samples {
                let subscription = match self.registry.lookup(sample.handle) {
                    Some(subscription) => subscription,
                    None => {
                        session_log!(
                            self.logger,
                            Debug,
                            "discarding sample for unknown handle {:#x}",
                            sample.handle
                        );
                        continue;
                    }
                };

                let binding = subscription.binding;
                match binding.decode(&sample.data) {
                    Ok(value) => updates.push(Update {
                        symbol: binding.name.clone(),
                        value,
                        timestamp: Some(timestamp),
                    }),
                    Err(error) => session_log!(
                        self.logger,
                        Warn,
                        "dropping sample for {}: {}",
                        binding.name,
                        error
                    ),
                }
            }
        }
        updates
    }

    /// Returns `false` once the session is closing or the receiver is gone.
    async fn publish(&mut self, notification: Notification) -> bool {
        for update in self.decode(notification) {
            tokio::select! {
                _ = self.closing.cancelled() => return false,
                sent = self.updates.send(update) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl NotificationSink for Demultiplexer {
    fn deliver(&mut self, notification: Notification) -> BoxFuture<'_, bool> {
        Box::pin(self.publish(notification))
    }
}
