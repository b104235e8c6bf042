use std::collections::HashMap;
use std::hash::Hash;
use std::result::Result;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

type Senders<Id, Success, Error> = HashMap<Id, oneshot::Sender<Result<Success, Error>>>;

/// Maintains a mapping from request IDs to the channels on which to send their response.
pub struct Awaiting<Id, Success, Error> {
    map: Arc<Mutex<Senders<Id, Success, Error>>>,
}

impl<Id, Success, Error> Awaiting<Id, Success, Error>
where
    Id: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            map: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Senders<Id, Success, Error>> {
        // A panic while holding the lock can only happen inside HashMap itself, so the map is
        // still consistent.
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `false` without registering when the receiver has already been dropped.
    pub fn register(&self, id: Id, sender: oneshot::Sender<Result<Success, Error>>) -> bool {
        let mut map = self.lock();
        if sender.is_closed() {
            return false;
        }
        map.insert(id, sender);
        true
    }

    pub fn deregister(&self, id: &Id) -> Option<oneshot::Sender<Result<Success, Error>>> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes `result` to whoever registered `id`. Returns the result if nobody did.
    pub fn send(&self, id: &Id, result: Result<Success, Error>) -> Option<Result<Success, Error>> {
        match self.deregister(id) {
            Some(sender) => {
                let _ = sender.send(result);
                None
            }
            None => Some(result),
        }
    }

    /// Fails every outstanding request with an error produced by `error`, leaving the map empty.
    pub fn fail_all<F>(&self, error: F) -> usize
    where
        F: Fn() -> Error,
    {
        let senders: Vec<_> = self.lock().drain().map(|(_, sender)| sender).collect();
        let count = senders.len();
        for sender in senders {
            let _ = sender.send(Err(error()));
        }
        count
    }
}

impl<Id, Success, Error> Default for Awaiting<Id, Success, Error>
where
    Id: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Id, Success, Error> Clone for Awaiting<Id, Success, Error> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Table = Awaiting<u32, &'static str, String>;

    #[tokio::test]
    async fn routes_result_to_registered_receiver() {
        let awaiting = Table::new();
        let (sender, receiver) = oneshot::channel();
        assert!(awaiting.register(7, sender));

        assert!(awaiting.send(&7, Ok("pong")).is_none());
        assert_eq!(receiver.await.unwrap(), Ok("pong"));
        assert!(awaiting.is_empty());
    }

    #[test]
    fn refuses_sender_whose_receiver_is_gone() {
        let awaiting = Table::new();
        let (sender, receiver) = oneshot::channel();
        drop(receiver);

        assert!(!awaiting.register(3, sender));
        assert!(awaiting.is_empty());
    }

    #[test]
    fn unregistered_result_is_handed_back() {
        let awaiting = Table::new();
        assert_eq!(awaiting.send(&1, Ok("stray")), Some(Ok("stray")));
    }

    #[tokio::test]
    async fn fail_all_drains_every_waiter() {
        let awaiting = Table::new();
        let (first, first_rx) = oneshot::channel();
        let (second, second_rx) = oneshot::channel();
        awaiting.register(1, first);
        awaiting.register(2, second);

        assert_eq!(awaiting.fail_all(|| "closed".to_string()), 2);
        assert!(awaiting.is_empty());
        assert_eq!(first_rx.await.unwrap(), Err("closed".to_string()));
        assert_eq!(second_rx.await.unwrap(), Err("closed".to_string()));
    }
}
