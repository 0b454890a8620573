use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

/// Server side session-id cache.
///
/// Shared between every session of a server, so implementations must be
/// safe for concurrent calls. Values are opaque serialized session state.
pub trait SessionStore: Send + Sync + fmt::Debug {
    fn store(&self, id: &[u8], data: Vec<u8>);

    fn fetch(&self, id: &[u8]) -> Option<Vec<u8>>;

    fn delete(&self, id: &[u8]);
}

/// Bounded in-memory store. The oldest entry is evicted when full.
pub struct MemorySessionStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Vec<u8>, Vec<u8>>,
    order: VecDeque<Vec<u8>>,
}

impl MemorySessionStore {
    pub fn new(capacity: usize) -> Self {
        MemorySessionStore {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn store(&self, id: &[u8], data: Vec<u8>) {
        let mut inner = self.lock();
        if inner.entries.insert(id.to_vec(), data).is_none() {
            inner.order.push_back(id.to_vec());
        }
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            trace!("Evict session {:02x?}", &oldest[..oldest.len().min(4)]);
            inner.entries.remove(&oldest);
        }
    }

    fn fetch(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.lock().entries.get(id).cloned()
    }

    fn delete(&self, id: &[u8]) {
        let mut inner = self.lock();
        if inner.entries.remove(id).is_some() {
            inner.order.retain(|k| k != id);
        }
    }
}

impl fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_fetch_delete() {
        let s = MemorySessionStore::new(8);
        s.store(b"a", vec![1]);
        assert_eq!(s.fetch(b"a"), Some(vec![1]));
        s.store(b"a", vec![2]);
        assert_eq!(s.fetch(b"a"), Some(vec![2]));
        assert_eq!(s.len(), 1);
        s.delete(b"a");
        assert!(s.fetch(b"a").is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn evicts_oldest() {
        let s = MemorySessionStore::new(2);
        s.store(b"a", vec![1]);
        s.store(b"b", vec![2]);
        s.store(b"c", vec![3]);
        assert!(s.fetch(b"a").is_none());
        assert!(s.fetch(b"b").is_some());
        assert!(s.fetch(b"c").is_some());
    }

    #[test]
    fn shared_between_threads() {
        let s = std::sync::Arc::new(MemorySessionStore::new(1000));
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let s = s.clone();
                std::thread::spawn(move || {
                    for i in 0..50u8 {
                        s.store(&[t, i], vec![i]);
                        assert_eq!(s.fetch(&[t, i]), Some(vec![i]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.len(), 200);
    }
}
