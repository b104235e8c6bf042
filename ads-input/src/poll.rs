use std::sync::Arc;
use std::time::Duration;

use ads::Client;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{Error, ErrorKind, Result, SessionLogger, SymbolBinding, Update};

/// Reads every configured symbol once per batch, then waits out the poll interval.
pub struct PollScheduler<'a> {
    client: &'a Client,
    bindings: &'a [Arc<SymbolBinding>],
    interval: Duration,
    logger: &'a SessionLogger,
}

impl<'a> PollScheduler<'a> {
    pub fn new(
        client: &'a Client,
        bindings: &'a [Arc<SymbolBinding>],
        interval: Duration,
        logger: &'a SessionLogger,
    ) -> Self {
        PollScheduler {
            client,
            bindings,
            interval,
            logger,
        }
    }

    /// Returns one update per symbol that could be read, in configuration order.
    ///
    /// Both the reads and the interval sleep give way to `cancel` and `closing`; the batch read
    /// so far is then discarded.
    pub async fn read_batch(
        &self,
        cancel: &CancellationToken,
        closing: &CancellationToken,
    ) -> Result<Vec<Update>> {
        let updates = tokio::select! {
            _ = cancel.cancelled() => return Err(ErrorKind::Cancelled.into()),
            _ = closing.cancelled() => return Err(ErrorKind::Cancelled.into()),
            updates = self.read_all() => updates?,
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ErrorKind::Cancelled.into()),
            _ = closing.cancelled() => Err(ErrorKind::Cancelled.into()),
            _ = tokio::time::sleep(self.interval) => Ok(updates),
        }
    }

    async fn read_all(&self) -> Result<Vec<Update>> {
        let mut updates = Vec::with_capacity(self.bindings.len());
        for binding in self.bindings {
            match self.read_one(binding).await {
                Ok(update) => updates.push(update),
                Err(error) => {
                    if self.client.is_closed() {
                        return Err(ErrorKind::TransportClosed.into());
                    }
                    session_log!(
                        self.logger,
                        Warn,
                        "omitting {} from batch: {}",
                        binding.name,
                        error
                    );
                }
            }
        }

        if updates.is_empty() {
            return Err(ErrorKind::ReadFailed.into());
        }
        Ok(updates)
    }

    async fn read_one(&self, binding: &SymbolBinding) -> Result<Update> {
        let data = self
            .client
            .read(binding.index_group, binding.index_offset, binding.size)
            .await?;
        let value = binding.decode(&data).map_err(Error::from)?;
        Ok(Update {
            symbol: binding.name.clone(),
            value,
            timestamp: Utc::now().timestamp_nanos_opt(),
        })
    }
}
