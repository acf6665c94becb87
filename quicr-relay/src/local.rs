use std::sync::{Arc, Mutex, MutexGuard};

use quicr_core::fanout::SourceRegistry;

/// Shared handle to the relay's source registry (`spec.md` §4.8): every
/// connection's control streams publish into and subscribe from the same
/// set of caches.
#[derive(Clone, Default)]
pub struct Locals {
    registry: Arc<Mutex<SourceRegistry>>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, SourceRegistry> {
        self.registry.lock().unwrap()
    }
}
