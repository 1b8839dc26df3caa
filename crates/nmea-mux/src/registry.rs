//! Copy-on-write registries of running components.
//!
//! Dispatch iterates over a snapshot of the registry taken without blocking
//! writers for longer than a pointer swap. Each entry carries a gate so that
//! once [`Slot::close`] returns, no callback into the component is running or
//! will ever start again.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

/// One registered component and its identity.
pub struct Slot<T: ?Sized> {
    descriptor: Value,
    item: Arc<T>,
    open: RwLock<bool>,
}

impl<T: ?Sized> Slot<T> {
    fn new(descriptor: Value, item: Arc<T>) -> Self {
        Self {
            descriptor,
            item,
            open: RwLock::new(true),
        }
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    fn gate(&self) -> RwLockReadGuard<'_, bool> {
        self.open.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gate_mut(&self) -> RwLockWriteGuard<'_, bool> {
        self.open.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self) -> bool {
        *self.gate()
    }

    /// Run `f` against the component unless it has been closed.
    ///
    /// Must not be nested on the same slot.
    pub fn call<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let open = self.gate();
        if *open {
            Some(f(&self.item))
        } else {
            None
        }
    }

    /// Close the gate, waiting for in-flight callbacks.
    ///
    /// Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        let mut open = self.gate_mut();
        std::mem::replace(&mut *open, false)
    }
}

/// Ordered set of slots, unique by descriptor.
pub struct Registry<T: ?Sized> {
    slots: RwLock<Arc<Vec<Arc<Slot<T>>>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current membership, in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Slot<T>>>> {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Append an entry. Returns `None` when the descriptor is already present.
    pub fn insert(&self, descriptor: Value, item: Arc<T>) -> Option<Arc<Slot<T>>> {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots.iter().any(|s| s.descriptor == descriptor) {
            return None;
        }
        let slot = Arc::new(Slot::new(descriptor, item));
        let mut next: Vec<Arc<Slot<T>>> = slots.to_vec();
        next.push(slot.clone());
        *slots = Arc::new(next);
        Some(slot)
    }

    /// Detach the entry with this descriptor. The caller closes it.
    pub fn remove(&self, descriptor: &Value) -> Option<Arc<Slot<T>>> {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = slots.iter().position(|s| &s.descriptor == descriptor)?;
        let mut next: Vec<Arc<Slot<T>>> = slots.to_vec();
        let removed = next.remove(index);
        *slots = Arc::new(next);
        Some(removed)
    }

    /// Detach every entry, in registration order.
    pub fn drain(&self) -> Vec<Arc<Slot<T>>> {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let all = slots.to_vec();
        *slots = Arc::new(Vec::new());
        all
    }

    pub fn descriptors(&self) -> Vec<Value> {
        self.snapshot()
            .iter()
            .map(|s| s.descriptor.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_insert_rejects_duplicates() {
        let registry: Registry<str> = Registry::new();
        assert!(registry.insert(json!({"port": 7001}), Arc::from("a")).is_some());
        assert!(registry.insert(json!({"port": 7001}), Arc::from("b")).is_none());
        assert!(registry.insert(json!({"port": 7002}), Arc::from("c")).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_removal() {
        let registry: Registry<str> = Registry::new();
        registry.insert(json!(1), Arc::from("a"));
        registry.insert(json!(2), Arc::from("b"));
        let before = registry.snapshot();
        assert!(registry.remove(&json!(1)).is_some());
        assert_eq!(before.len(), 2);
        assert_eq!(registry.descriptors(), vec![json!(2)]);
        assert!(registry.remove(&json!(1)).is_none());
    }

    #[test]
    fn test_closed_slot_rejects_calls() {
        let registry: Registry<str> = Registry::new();
        let slot = registry.insert(json!(1), Arc::from("a")).unwrap();
        assert_eq!(slot.call(|s| s.len()), Some(1));
        assert!(slot.close());
        assert!(!slot.close());
        assert_eq!(slot.call(|s| s.len()), None);
    }

    #[test]
    fn test_close_waits_for_in_flight_call() {
        let registry: Registry<AtomicUsize> = Registry::new();
        let slot = registry
            .insert(json!(1), Arc::new(AtomicUsize::new(0)))
            .unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let worker = {
            let slot = slot.clone();
            thread::spawn(move || {
                slot.call(|n| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    n.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        entered_rx.recv().unwrap();
        slot.close();
        // The in-flight call completed before close returned.
        assert_eq!(slot.item().load(Ordering::SeqCst), 1);
        assert!(worker.join().unwrap().is_some());
    }
}
