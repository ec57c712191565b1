//! Versioned, copy-on-write resource tables.
//!
//! Each xDS resource kind is held in a [`Cache`]: a name-sorted vector behind a
//! mutex, paired with a monotone version counter. Writers install whole new
//! collections; readers take snapshot copies. Discovery streams register
//! single-shot waiters that fire when the version advances past the version
//! they last served, which gives natural coalescing: a slow stream that misses
//! versions `v` and `v+1` observes only `v+1`.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A named resource that can live in a [`Cache`].
pub trait Resource: Clone + PartialEq + Send + Sync + 'static {
    /// The name the cache orders and deduplicates by.
    fn name(&self) -> &str;
}

/// A sorted, versioned table of resources of one kind.
///
/// There is a single writer (the event handler) and any number of readers;
/// readers never block the writer beyond the snapshot copy.
#[derive(Debug)]
pub struct Cache<T> {
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    /// Sorted by `Resource::name`.
    values: Vec<T>,
    version: u64,
    waiters: Vec<oneshot::Sender<u64>>,
}

// === impl Cache ===

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                values: Vec::new(),
                version: 0,
                waiters: Vec::new(),
            }),
        }
    }
}

impl<T: Resource> Cache<T> {
    /// Returns a snapshot copy of the cache contents, sorted by name.
    pub fn values(&self) -> Vec<T> {
        self.inner.lock().values.clone()
    }

    /// Returns the current version.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Inserts `entry`, replacing any entry with the same name.
    ///
    /// No-op (no version bump, no notification) when the cache already holds
    /// an identical entry.
    pub fn add(&self, entry: T) {
        let mut inner = self.inner.lock();
        match inner
            .values
            .binary_search_by(|e| e.name().cmp(entry.name()))
        {
            Ok(i) => {
                if inner.values[i] == entry {
                    return;
                }
                inner.values[i] = entry;
            }
            Err(i) => inner.values.insert(i, entry),
        }
        inner.bump();
    }

    /// Removes the named entry. No-op when absent.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Ok(i) = inner.values.binary_search_by(|e| e.name().cmp(name)) {
            inner.values.remove(i);
            inner.bump();
        }
    }

    /// Atomically replaces the cache contents with `collection`.
    ///
    /// The collection is sorted by name and compared with the current
    /// contents; if nothing changed the version is left alone and no waiter
    /// is woken.
    pub fn update(&self, mut collection: Vec<T>) {
        collection.sort_by(|a, b| a.name().cmp(b.name()));
        let mut inner = self.inner.lock();
        if inner.values == collection {
            return;
        }
        inner.values = collection;
        inner.bump();
    }

    /// Registers interest in versions after `last_known_version`.
    ///
    /// The returned receiver resolves with the cache version exactly once:
    /// immediately if the cache is already past `last_known_version`,
    /// otherwise on the next change. Waiters re-register after consuming.
    pub fn register(&self, last_known_version: u64) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.version > last_known_version {
            // Receiver in hand, this cannot fail.
            let _ = tx.send(inner.version);
        } else {
            inner.waiters.push(tx);
        }
        rx
    }
}

// === impl Inner ===

impl<T> Inner<T> {
    fn bump(&mut self) {
        self.version += 1;
        // Single-shot broadcast: every queued waiter gets the new version
        // exactly once. Dead receivers are dropped silently.
        for tx in self.waiters.drain(..) {
            let _ = tx.send(self.version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Entry(&'static str, u32);

    impl Resource for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn values_are_sorted_and_deduplicated() {
        let cache = Cache::default();
        cache.add(Entry("b", 1));
        cache.add(Entry("a", 1));
        cache.add(Entry("b", 2));
        assert_eq!(cache.values(), vec![Entry("a", 1), Entry("b", 2)]);
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let cache = Cache::default();
        assert_eq!(cache.version(), 0);
        cache.add(Entry("a", 1));
        assert_eq!(cache.version(), 1);
        cache.update(vec![Entry("a", 2), Entry("b", 1)]);
        assert_eq!(cache.version(), 2);
        cache.remove("b");
        assert_eq!(cache.version(), 3);
    }

    #[test]
    fn identical_updates_do_not_bump() {
        let cache = Cache::default();
        cache.update(vec![Entry("a", 1), Entry("b", 1)]);
        let v = cache.version();
        // Same contents, different order: still a no-op.
        cache.update(vec![Entry("b", 1), Entry("a", 1)]);
        cache.add(Entry("a", 1));
        assert_eq!(cache.version(), v);
    }

    #[test]
    fn insert_twice_is_idempotent() {
        let cache = Cache::default();
        cache.add(Entry("a", 1));
        let values = cache.values();
        let version = cache.version();
        cache.add(Entry("a", 1));
        assert_eq!(cache.values(), values);
        assert_eq!(cache.version(), version);
    }

    #[test]
    fn insert_remove_round_trips() {
        let cache = Cache::default();
        cache.update(vec![Entry("a", 1)]);
        let before = cache.values();
        cache.add(Entry("b", 1));
        cache.remove("b");
        assert_eq!(cache.values(), before);
        // Removing something that was never there changes nothing.
        let version = cache.version();
        cache.remove("zzz");
        assert_eq!(cache.version(), version);
    }

    #[tokio::test]
    async fn register_signals_immediately_when_behind() {
        let cache = Cache::default();
        cache.add(Entry("a", 1));
        let rx = cache.register(0);
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn register_waits_for_the_next_change() {
        let cache: Cache<Entry> = Cache::default();
        let mut rx = cache.register(0);
        assert!(rx.try_recv().is_err());
        cache.add(Entry("a", 1));
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn waiters_are_single_shot() {
        let cache = Cache::default();
        let rx = cache.register(0);
        cache.add(Entry("a", 1));
        cache.add(Entry("b", 1));
        // The waiter saw exactly one value: whichever version was current
        // when the broadcast that woke it fired.
        assert_eq!(rx.await.unwrap(), 1);
        // Re-registering picks up the newer version immediately.
        let rx = cache.register(1);
        assert_eq!(rx.await.unwrap(), 2);
    }
}
