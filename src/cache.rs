//! Keyed query cache with invalidation and optimistic-write support.
//!
//! Entries are stored as JSON values under a [`QueryKey`]. Keys are segment
//! lists and most operations address them by prefix, so `["feed"]` reaches
//! every cached feed page. Invalidation marks entries stale and broadcasts a
//! [`CacheEvent`] so views know to refetch; the next [`QueryCache::fetch`]
//! for a stale key goes back to the backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

/// Keys used across the client.
pub mod keys {
    use super::QueryKey;

    pub fn profiles() -> QueryKey {
        QueryKey::new(["profile"])
    }
    pub fn current_profile() -> QueryKey {
        QueryKey::new(["profile", "current"])
    }
    pub fn profile(username_or_id: &str) -> QueryKey {
        QueryKey::new(["profile", username_or_id])
    }
    pub fn feeds() -> QueryKey {
        QueryKey::new(["feed"])
    }
    pub fn feed(limit: usize, offset: usize) -> QueryKey {
        QueryKey::new(["feed".to_string(), limit.to_string(), offset.to_string()])
    }
    pub fn explore(limit: usize) -> QueryKey {
        QueryKey::new(["explore".to_string(), limit.to_string()])
    }
    pub fn posts() -> QueryKey {
        QueryKey::new(["posts"])
    }
    pub fn user_posts(user_id: &str) -> QueryKey {
        QueryKey::new(["posts", "user", user_id])
    }
    pub fn comments(post_id: &str) -> QueryKey {
        QueryKey::new(["comments", post_id])
    }
    pub fn stories() -> QueryKey {
        QueryKey::new(["stories"])
    }
    pub fn following(user_id: &str) -> QueryKey {
        QueryKey::new(["following", user_id])
    }
    pub fn conversations() -> QueryKey {
        QueryKey::new(["conversations"])
    }
    pub fn messages(counterpart: &str) -> QueryKey {
        QueryKey::new(["messages", counterpart])
    }
    pub fn notifications() -> QueryKey {
        QueryKey::new(["notifications"])
    }
    pub fn saved() -> QueryKey {
        QueryKey::new(["saved"])
    }
    pub fn suggestions(limit: usize) -> QueryKey {
        QueryKey::new(["suggestions".to_string(), limit.to_string()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Value,
    stale: bool,
    updated_at: Instant,
}

/// Prior values of every key matched by a [`QueryCache::snapshot`] call.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(QueryKey, Value)>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine: nothing is watching the cache.
        let _ = self.events.send(event);
    }

    /// Cached value for `key`, stale or not. `None` if absent or if it does
    /// not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let data = self.lock().get(key).map(|e| e.data.clone())?;
        serde_json::from_value(data).ok()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().get(key).map(|e| e.stale).unwrap_or(true)
    }

    /// When the entry was last written.
    pub fn updated_at(&self, key: &QueryKey) -> Option<Instant> {
        self.lock().get(key).map(|e| e.updated_at)
    }

    /// Store fresh data for `key`.
    pub fn set<T: Serialize>(&self, key: &QueryKey, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                crate::tlog!("cache: cannot store {}: {}", key, e);
                return;
            }
        };
        self.lock().insert(
            key.clone(),
            Entry {
                data,
                stale: false,
                updated_at: Instant::now(),
            },
        );
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Modify the cached value in place. Returns `false` when the key is
    /// absent or holds something other than `T`. Staleness is preserved.
    pub fn update<T, F>(&self, key: &QueryKey, f: F) -> bool
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let changed = {
            let mut entries = self.lock();
            match entries.get_mut(key) {
                Some(entry) => write_through(entry, f),
                None => false,
            }
        };
        if changed {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        changed
    }

    /// Apply `f` to every entry under `prefix` that decodes as `T`. Returns
    /// how many entries changed.
    pub fn update_matching<T, F>(&self, prefix: &QueryKey, mut f: F) -> usize
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T),
    {
        let changed: Vec<QueryKey> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .filter_map(|(key, entry)| write_through(entry, &mut f).then(|| key.clone()))
                .collect()
        };
        let count = changed.len();
        for key in changed {
            self.emit(CacheEvent::Updated(key));
        }
        count
    }

    /// Capture every entry under `prefix` so it can be put back later.
    pub fn snapshot(&self, prefix: &QueryKey) -> Snapshot {
        let entries = self
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.data.clone()))
            .collect();
        Snapshot { entries }
    }

    /// Put snapshotted values back.
    pub fn restore(&self, snapshot: Snapshot) {
        let keys: Vec<QueryKey> = {
            let mut entries = self.lock();
            snapshot
                .entries
                .into_iter()
                .map(|(key, data)| {
                    let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                        data: Value::Null,
                        stale: false,
                        updated_at: Instant::now(),
                    });
                    entry.data = data;
                    entry.updated_at = Instant::now();
                    key
                })
                .collect()
        };
        for key in keys {
            self.emit(CacheEvent::Updated(key));
        }
    }

    /// Mark everything under `prefix` stale. Returns how many entries matched.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let matched: Vec<QueryKey> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| {
                    entry.stale = true;
                    key.clone()
                })
                .collect()
        };
        let count = matched.len();
        for key in matched {
            self.emit(CacheEvent::Invalidated(key));
        }
        count
    }

    pub fn remove(&self, prefix: &QueryKey) {
        self.lock().retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Cached data when fresh, otherwise the fetcher's result (which is then
    /// cached). Fetch errors leave the cache untouched.
    pub fn fetch<T, E, F>(&self, key: &QueryKey, fetcher: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if !self.is_stale(key) {
            if let Some(cached) = self.get::<T>(key) {
                return Ok(cached);
            }
        }
        let data = fetcher()?;
        self.set(key, &data);
        Ok(data)
    }
}

fn write_through<T, F>(entry: &mut Entry, f: F) -> bool
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
{
    let Ok(mut value) = serde_json::from_value::<T>(entry.data.clone()) else {
        return false;
    };
    f(&mut value);
    match serde_json::to_value(&value) {
        Ok(data) => {
            entry.data = data;
            entry.updated_at = Instant::now();
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let page = keys::feed(20, 0);
        assert!(page.starts_with(&keys::feeds()));
        assert!(!keys::feeds().starts_with(&page));
        assert!(!keys::messages("bob").starts_with(&keys::messages("bobby")));
        assert_eq!(page.to_string(), "feed:20:0");
    }

    #[test]
    fn fetch_uses_fresh_data_and_refetches_after_invalidation() {
        let cache = QueryCache::new();
        let key = keys::stories();
        let mut calls = 0;

        let first: Result<Vec<u32>, ()> = cache.fetch(&key, || {
            calls += 1;
            Ok(vec![1])
        });
        assert_eq!(first, Ok(vec![1]));

        let second: Result<Vec<u32>, ()> = cache.fetch(&key, || {
            calls += 1;
            Ok(vec![2])
        });
        assert_eq!(second, Ok(vec![1]));
        assert_eq!(calls, 1);

        assert_eq!(cache.invalidate(&key), 1);
        assert!(cache.is_stale(&key));
        let third: Result<Vec<u32>, ()> = cache.fetch(&key, || {
            calls += 1;
            Ok(vec![3])
        });
        assert_eq!(third, Ok(vec![3]));
        assert_eq!(calls, 2);
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn remove_drops_a_prefix() {
        let cache = QueryCache::new();
        cache.set(&keys::messages("a"), &vec![1]);
        cache.set(&keys::messages("b"), &vec![2]);
        cache.set(&keys::conversations(), &vec![3]);
        assert!(cache.updated_at(&keys::messages("a")).is_some());

        cache.remove(&QueryKey::new(["messages"]));
        assert!(!cache.contains(&keys::messages("a")));
        assert!(cache.updated_at(&keys::messages("b")).is_none());
        assert!(cache.contains(&keys::conversations()));
    }

    #[test]
    fn fetch_errors_are_not_cached() {
        let cache = QueryCache::new();
        let key = keys::saved();
        let failed: Result<Vec<u32>, &str> = cache.fetch(&key, || Err("offline"));
        assert_eq!(failed, Err("offline"));
        assert!(!cache.contains(&key));
    }

    #[test]
    fn update_matching_and_restore() {
        let cache = QueryCache::new();
        cache.set(&keys::feed(20, 0), &vec![1, 2]);
        cache.set(&keys::feed(20, 20), &vec![3]);
        cache.set(&keys::explore(30), &vec![9]);

        let snapshot = cache.snapshot(&keys::feeds());
        assert_eq!(snapshot.len(), 2);

        let changed = cache.update_matching::<Vec<i32>, _>(&keys::feeds(), |v| v.push(0));
        assert_eq!(changed, 2);
        assert_eq!(cache.get::<Vec<i32>>(&keys::feed(20, 20)), Some(vec![3, 0]));
        assert_eq!(cache.get::<Vec<i32>>(&keys::explore(30)), Some(vec![9]));

        cache.restore(snapshot);
        assert_eq!(cache.get::<Vec<i32>>(&keys::feed(20, 0)), Some(vec![1, 2]));
        assert_eq!(cache.get::<Vec<i32>>(&keys::feed(20, 20)), Some(vec![3]));
    }

    #[test]
    fn update_of_missing_key_is_a_no_op() {
        let cache = QueryCache::new();
        assert!(!cache.update::<Vec<i32>, _>(&keys::saved(), |v| v.clear()));
    }

    #[test]
    fn invalidation_is_broadcast() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        cache.set(&keys::conversations(), &Vec::<u8>::new());
        cache.invalidate(&keys::conversations());
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Updated(keys::conversations()));
        assert_eq!(
            rx.try_recv().unwrap(),
            CacheEvent::Invalidated(keys::conversations())
        );
    }
}
