use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Thread-safe in-memory cache for decoded API responses, keyed by
/// `(group, identity)`. Entries live until [`Cache::reset`]; there is no
/// TTL. Mutation responses are never stored here.
#[derive(Debug, Default)]
pub struct Cache {
    inner: Mutex<HashMap<String, serde_json::Value>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_group<T: DeserializeOwned>(&self, key: &str, group: &str) -> Option<T> {
        let map = self.lock();
        let value = map.get(&group_key(key, group))?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn set_group<T: Serialize>(&self, key: &str, group: &str, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.lock().insert(group_key(key, group), v);
        }
    }

    /// Drop every entry. Called at teardown.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn group_key(key: &str, group: &str) -> String {
    format!("{group}:{key}")
}
