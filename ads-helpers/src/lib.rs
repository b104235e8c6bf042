pub mod awaiting;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Atomic counter that generates u32 invoke IDs, wrapping on overflow.
#[derive(Clone)]
pub struct IncrementingId(Arc<AtomicU32>);

impl IncrementingId {
    pub fn new() -> Self {
        // Some routers treat an invoke ID of zero as "no reply expected".
        Self(Arc::new(AtomicU32::new(1)))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IncrementingId {
    fn default() -> Self {
        Self::new()
    }
}
