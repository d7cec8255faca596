//! Shared counting bus
//!
//! Counters are created on first use and then incremented without taking a
//! write lock. A bus created with [`CountBus::local`] forwards every
//! increment to its parent, so a per-operation bus can roll up into a
//! process-wide one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Monotonic named counters
#[derive(Debug, Default)]
pub struct CountBus {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    parent: Option<Arc<CountBus>>,
}

impl CountBus {
    /// Creates an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child bus whose increments also land on `parent`
    pub fn local(parent: &Arc<CountBus>) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(parent)),
        }
    }

    /// Adds one to `key`
    pub fn inc(&self, key: &str) {
        self.add(key, 1);
    }

    /// Adds `n` to `key`
    pub fn add(&self, key: &str, n: u64) {
        self.counter(key).fetch_add(n, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add(key, n);
        }
    }

    /// Current value of `key`, zero if never touched
    pub fn get(&self, key: &str) -> u64 {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        counters
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        counters
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    fn counter(&self, key: &str) -> Arc<AtomicU64> {
        {
            let counters = self
                .counters
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(key) {
                return Arc::clone(counter);
            }
        }

        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(counters.entry(key.to_string()).or_default())
    }
}
