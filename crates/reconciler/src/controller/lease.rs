//! Per-key exclusive leases: at most one pass per function at a time.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError};

use fnflow_api::ObjectKey;

/// Held leases, each with a dirty flag set when another acquire was refused.
#[derive(Debug, Default)]
pub struct LeaseMap {
    held: Mutex<HashMap<ObjectKey, bool>>,
}

impl LeaseMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `key`, or mark it dirty if someone else holds it.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, key: &ObjectKey) -> Option<Lease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = true;
                None
            }
            Entry::Vacant(entry) => {
                entry.insert(false);
                Some(Lease {
                    map: Arc::clone(self),
                    key: key.clone(),
                    released: false,
                })
            }
        }
    }

    #[must_use]
    pub fn is_held(&self, key: &ObjectKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Returns the dirty flag.
    fn release(&self, key: &ObjectKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .unwrap_or(false)
    }
}

/// Exclusive right to run a pass for one key. Released on drop.
#[derive(Debug)]
pub struct Lease {
    map: Arc<LeaseMap>,
    key: ObjectKey,
    released: bool,
}

impl Lease {
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Release and report whether the key was requested while held.
    #[must_use]
    pub fn release(mut self) -> bool {
        self.released = true;
        self.map.release(&self.key)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            self.map.release(&self.key);
        }
    }
}
