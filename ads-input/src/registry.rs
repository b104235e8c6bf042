use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ads::{Client, NotificationAttributes, NotificationHandle, TransmissionMode};

use crate::{ErrorKind, Result, SessionLogger, SymbolBinding};

/// An active PLC notification and the configured symbol it belongs to.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Position of the symbol in the configuration.
    pub slot: usize,
    pub binding: Arc<SymbolBinding>,
}

#[derive(Default)]
struct Inner {
    by_handle: HashMap<NotificationHandle, Subscription>,
    by_slot: HashMap<usize, NotificationHandle>,
}

/// Owns every notification handle the PLC has issued to this session.
///
/// The maps are only mutated while connecting and closing; the Rx task reads them for every
/// sample.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribes `binding` for on-change delivery, releasing any handle previously held for
    /// the same slot.
    pub async fn register(
        &self,
        client: &Client,
        logger: &SessionLogger,
        slot: usize,
        binding: Arc<SymbolBinding>,
        cycle_time: Duration,
        max_delay: Duration,
    ) -> Result<NotificationHandle> {
        let prior = self.remove_slot(slot);
        if let Some(handle) = prior {
            if let Err(error) = client.delete_device_notification(handle).await {
                session_log!(
                    logger,
                    Warn,
                    "failed to release handle {:#x} for {}: {}",
                    handle,
                    binding.name,
                    error
                );
            }
        }

        let attributes = NotificationAttributes {
            length: binding.size,
            transmission_mode: TransmissionMode::ServerOnChange,
            max_delay,
            cycle_time,
        };
        let handle = client
            .add_device_notification(binding.index_group, binding.index_offset, attributes)
            .await
            .map_err(|inner| ErrorKind::NotificationRegistrationFailed {
                symbol: binding.name.clone(),
                inner,
            })?;

        let name = binding.name.clone();
        if let Some(existing) = self.insert(handle, slot, binding) {
            // The PLC reissued a live handle; the older subscription can no longer be told apart.
            session_log!(
                logger,
                Warn,
                "handle {:#x} for {} was already held by {}",
                handle,
                name,
                existing.binding.name
            );
        }
        session_log!(logger, Debug, "subscribed {} as handle {:#x}", name, handle);
        Ok(handle)
    }

    pub(crate) fn insert(
        &self,
        handle: NotificationHandle,
        slot: usize,
        binding: Arc<SymbolBinding>,
    ) -> Option<Subscription> {
        let mut inner = self.lock();
        inner.by_slot.insert(slot, handle);
        inner.by_handle.insert(handle, Subscription { slot, binding })
    }

    fn remove_slot(&self, slot: usize) -> Option<NotificationHandle> {
        let mut inner = self.lock();
        let handle = inner.by_slot.remove(&slot)?;
        inner.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn lookup(&self, handle: NotificationHandle) -> Option<Subscription> {
        self.lock().by_handle.get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles in configuration order.
    pub fn handles(&self) -> Vec<NotificationHandle> {
        let inner = self.lock();
        let mut slots: Vec<_> = inner.by_slot.iter().map(|(slot, handle)| (*slot, *handle)).collect();
        slots.sort_unstable();
        slots.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Deletes every notification on the PLC. Each handle is removed from the registry before
    /// the delete is sent, so none is released twice; failures are logged and skipped.
    ///
    /// Returns the number of handles the PLC confirmed.
    pub async fn release_all(&self, client: &Client, logger: &SessionLogger) -> usize {
        let subscriptions: Vec<_> = {
            let mut inner = self.lock();
            inner.by_slot.clear();
            let mut drained: Vec<_> = inner.by_handle.drain().collect();
            drained.sort_unstable_by_key(|(_, subscription)| subscription.slot);
            drained
        };

        let mut released = 0;
        for (handle, subscription) in subscriptions {
            match client.delete_device_notification(handle).await {
                Ok(()) => {
                    released += 1;
                    session_log!(
                        logger,
                        Debug,
                        "released handle {:#x} for {}",
                        handle,
                        subscription.binding.name
                    );
                }
                Err(error) => session_log!(
                    logger,
                    Warn,
                    "failed to release handle {:#x} for {}: {}",
                    handle,
                    subscription.binding.name,
                    error
                ),
            }
        }
        released
    }
}
