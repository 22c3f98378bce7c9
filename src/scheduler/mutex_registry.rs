use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-module exclusion locks, created on first use.
///
/// Only modules flagged `serial_across_profiles` ever ask for a lock, so the
/// map stays small. Lives for one scheduler invocation.
#[derive(Debug, Default)]
pub struct ModuleMutexRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ModuleMutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `module`. Concurrent first calls get the same instance.
    pub fn get(&self, module: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(module) {
            return existing.clone();
        }
        self.locks
            .entry(module.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive use of `module`
    pub async fn lock(&self, module: &str) -> OwnedMutexGuard<()> {
        self.get(module).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
