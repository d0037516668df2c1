//! Per-module serialization of ingests.
//!
//! One mutex per escaped module path, created on first use and kept for the
//! lifetime of the store. Module paths are few compared to requests, so the
//! map never needs pruning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};

#[derive(Debug, Default)]
pub struct ModuleLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock slot for an escaped module path.
    pub fn slot(&self, escaped_path: &str) -> Arc<Mutex<()>> {
        self.slots
            .lock()
            .entry(escaped_path.to_string())
            .or_default()
            .clone()
    }
}

/// Wait up to `wait` for `slot`, failing with `Conflict` on timeout.
pub fn acquire<'a>(
    slot: &'a Mutex<()>,
    module_path: &str,
    wait: Duration,
) -> Result<MutexGuard<'a, ()>> {
    slot.try_lock_for(wait).ok_or_else(|| StoreError::Conflict {
        path: module_path.to_string(),
    })
}
