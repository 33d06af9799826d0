use super::{parse_counter, KvStore, StoreResult};
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

/// Process-local store. Per-key atomicity comes from the shard locks of `DashMap`.
#[derive(Default)]
pub struct MemoryStore {
    scalars: DashMap<String, String>,
    hashes: DashMap<String, FxHashMap<String, String>>,
    sets: DashMap<String, FxHashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.scalars.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.scalars.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn incr(&self, key: &str) -> StoreResult<u64> {
        let mut entry = self
            .scalars
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());
        let next = parse_counter(key, entry.value())? + 1;
        *entry.value_mut() = next.to_string();
        Ok(next)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let removed = match self.hashes.get_mut(key) {
            Some(mut hash) => hash.remove(field).is_some(),
            None => false,
        };
        if removed {
            self.hashes.remove_if(key, |_, hash| hash.is_empty());
        }
        Ok(removed)
    }

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .hashes
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<()> {
        self.scalars.retain(|k, _| !k.starts_with(prefix));
        self.hashes.retain(|k, _| !k.starts_with(prefix));
        self.sets.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
