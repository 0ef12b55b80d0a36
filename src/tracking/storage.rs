use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::Slug;

/// A string key-value store holding client-side tracking state.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// The two stores a visitor carries: `session` lives as long as the browsing session, `local`
/// survives across sessions.
#[derive(Debug, Clone)]
pub struct Storage {
    pub session: Arc<dyn KeyValueStore>,
    pub local: Arc<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(session: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>) -> Self {
        Self { session, local }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// A fresh session for the same visitor: session state is gone, local state is kept.
    pub fn with_new_session(&self) -> Self {
        Self::new(Arc::new(MemoryStore::new()), self.local.clone())
    }
}

pub fn viewed_key(slug: &Slug) -> String {
    format!("viewed_{slug}")
}

pub fn last_view_key(slug: &Slug) -> String {
    format!("lastView_{slug}")
}

pub fn view_count_key(slug: &Slug) -> String {
    format!("viewCount_{slug}")
}

/// The last view count observed for `slug`, ignoring values that do not parse.
pub fn cached_count(store: &dyn KeyValueStore, slug: &Slug) -> Option<u64> {
    store.get(&view_count_key(slug))?.parse().ok()
}

pub fn cache_count(store: &dyn KeyValueStore, slug: &Slug, count: u64) {
    store.set(&view_count_key(slug), count.to_string());
}
