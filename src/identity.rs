//! Title identity and redirect state on top of a [`KvStore`].
//!
//! Every per-kind map (`page`, `redirect`, `category`) is sharded the same way: the
//! first [`SHARD_PREFIX_LEN`](crate::config::SHARD_PREFIX_LEN) hex characters of the
//! title hash select the hash key, the remainder is the field.

use crate::config::{CATEGORY_COUNTER, PAGE_COUNTER, UNUSED_CATEGORY_IDS};
use crate::models::TitleHash;
use crate::store::{KvStore, MemoryStore, SledStore, StoreError, StoreResult};
use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};

pub const PAGE_MAP: &str = "page";
pub const REDIRECT_MAP: &str = "redirect";
pub const CATEGORY_MAP: &str = "category";
const SUMMARY_PREFIX: &str = "s:count:";
const CLAIM_PREFIX: &str = "claim:";

/// Store address of `hash` in the `kind` map: `("{kind}:{prefix}", remainder)`.
pub fn shard_key<'a>(kind: &str, hash: &'a TitleHash) -> (String, &'a str) {
    let (prefix, rest) = hash.split();
    (format!("{kind}:{prefix}"), rest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Page,
    Category,
}

impl Counter {
    pub fn key(self) -> &'static str {
        match self {
            Counter::Page => PAGE_COUNTER,
            Counter::Category => CATEGORY_COUNTER,
        }
    }
}

/// First-occurrence markers kept per title hash, one set family per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Article titles that already received a page id.
    PageId,
    /// Articles whose adjacency records are already written.
    Linked,
}

impl Claim {
    fn prefix(self) -> &'static str {
        match self {
            Claim::PageId => "claim:page",
            Claim::Linked => "claim:linked",
        }
    }
}

/// Shared handle passed to every stage. All state lives in the backing store.
pub struct IdentityStore {
    kv: Box<dyn KvStore>,
}

impl IdentityStore {
    pub fn new(kv: impl KvStore + 'static) -> Self {
        Self { kv: Box::new(kv) }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn open_sled(path: &Path) -> Result<Self> {
        Ok(Self::new(SledStore::open(path)?))
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    fn get_id(&self, kind: &str, hash: &TitleHash) -> StoreResult<Option<u32>> {
        let (key, field) = shard_key(kind, hash);
        match self.kv.hget(&key, field)? {
            Some(raw) => parse_id(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_page_id(&self, hash: &TitleHash, id: u32) -> StoreResult<()> {
        let (key, field) = shard_key(PAGE_MAP, hash);
        self.kv.hset(&key, field, &id.to_string())
    }

    pub fn get_page_id(&self, hash: &TitleHash) -> StoreResult<Option<u32>> {
        self.get_id(PAGE_MAP, hash)
    }

    pub fn set_redirect(&self, hash: &TitleHash, target: &TitleHash) -> StoreResult<()> {
        let (key, field) = shard_key(REDIRECT_MAP, hash);
        self.kv.hset(&key, field, target.as_str())
    }

    pub fn get_redirect(&self, hash: &TitleHash) -> StoreResult<Option<TitleHash>> {
        let (key, field) = shard_key(REDIRECT_MAP, hash);
        match self.kv.hget(&key, field)? {
            Some(raw) => TitleHash::parse(&raw)
                .map(Some)
                .ok_or(StoreError::Corrupt { key, value: raw }),
            None => Ok(None),
        }
    }

    pub fn clear_redirect(&self, hash: &TitleHash) -> StoreResult<bool> {
        let (key, field) = shard_key(REDIRECT_MAP, hash);
        self.kv.hdel(&key, field)
    }

    pub fn get_category_id(&self, hash: &TitleHash) -> StoreResult<Option<u32>> {
        self.get_id(CATEGORY_MAP, hash)
    }

    /// Returns the id of category `name`, allocating one on first sight.
    ///
    /// Concurrent first sightings all reserve a counter value, but only one
    /// set-if-absent wins; the others record their reservation as unused.
    pub fn get_or_create_category_id(&self, name: &str, hash: &TitleHash) -> StoreResult<u32> {
        if let Some(id) = self.get_category_id(hash)? {
            return Ok(id);
        }
        let reserved = self.next_counter(Counter::Category)?;
        let (key, field) = shard_key(CATEGORY_MAP, hash);
        if self.kv.hsetnx(&key, field, &reserved.to_string())? {
            return Ok(reserved);
        }

        self.kv.sadd(UNUSED_CATEGORY_IDS, &reserved.to_string())?;
        info!(category = name, unused_id = reserved, "Lost category id race");
        self.get_category_id(hash)?
            .ok_or_else(|| StoreError::Vanished {
                key,
                field: field.to_string(),
            })
    }

    /// Marks `hash` in the `claim` family. Only the first caller for a hash gets `true`.
    pub fn claim(&self, claim: Claim, hash: &TitleHash) -> StoreResult<bool> {
        let (key, member) = shard_key(claim.prefix(), hash);
        self.kv.sadd(&key, member)
    }

    pub fn clear_claims(&self, claim: Claim) -> StoreResult<()> {
        self.kv.delete_prefix(&format!("{}:", claim.prefix()))
    }

    pub fn next_counter(&self, counter: Counter) -> StoreResult<u32> {
        let value = self.kv.incr(counter.key())?;
        u32::try_from(value).map_err(|_| StoreError::IdOverflow {
            counter: counter.key().to_string(),
        })
    }

    pub fn counter_value(&self, counter: Counter) -> StoreResult<u64> {
        match self.kv.get(counter.key())? {
            Some(raw) => crate::store::parse_counter(counter.key(), &raw),
            None => Ok(0),
        }
    }

    /// Drops every identity map, the unused-id set and all claims, then zeroes both counters.
    pub fn reset(&self) -> StoreResult<()> {
        for kind in [PAGE_MAP, REDIRECT_MAP, CATEGORY_MAP] {
            self.kv.delete_prefix(&format!("{kind}:"))?;
        }
        self.kv.delete_prefix(UNUSED_CATEGORY_IDS)?;
        self.kv.delete_prefix(SUMMARY_PREFIX)?;
        self.kv.delete_prefix(CLAIM_PREFIX)?;
        for counter in [Counter::Page, Counter::Category] {
            self.kv.set(counter.key(), "0")?;
        }
        debug!("Identity store reset");
        Ok(())
    }

    /// Every pending `(source, target)` redirect edge, ordered by source shard.
    pub fn all_redirect_entries(&self) -> StoreResult<Vec<(TitleHash, TitleHash)>> {
        let shard_prefix = format!("{REDIRECT_MAP}:");
        let mut entries = Vec::new();
        for key in self.kv.keys(&shard_prefix)? {
            let prefix = &key[shard_prefix.len()..];
            let mut shard = self.kv.hgetall(&key)?;
            shard.sort();
            for (field, value) in shard {
                let source =
                    TitleHash::from_parts(prefix, &field).ok_or_else(|| StoreError::Corrupt {
                        key: key.clone(),
                        value: field.clone(),
                    })?;
                let target = TitleHash::parse(&value).ok_or_else(|| StoreError::Corrupt {
                    key: key.clone(),
                    value: value.clone(),
                })?;
                entries.push((source, target));
            }
        }
        Ok(entries)
    }

    pub fn unused_category_ids(&self) -> StoreResult<Vec<u32>> {
        let mut ids = self
            .kv
            .smembers(UNUSED_CATEGORY_IDS)?
            .iter()
            .map(|raw| parse_id(UNUSED_CATEGORY_IDS, raw))
            .collect::<StoreResult<Vec<_>>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn record_count(&self, name: &str, value: u64) -> StoreResult<()> {
        self.kv.set(&format!("{SUMMARY_PREFIX}{name}"), &value.to_string())
    }

    pub fn count(&self, name: &str) -> StoreResult<Option<u64>> {
        let key = format!("{SUMMARY_PREFIX}{name}");
        match self.kv.get(&key)? {
            Some(raw) => crate::store::parse_counter(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.kv.flush()
    }
}

fn parse_id(key: &str, raw: &str) -> StoreResult<u32> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::title_to_hash_id;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn backends() -> Vec<IdentityStore> {
        vec![
            IdentityStore::in_memory(),
            IdentityStore::new(SledStore::temporary().unwrap()),
        ]
    }

    #[test]
    fn shard_key_splits_hash() {
        let hash = title_to_hash_id("abc");
        assert_eq!(shard_key(PAGE_MAP, &hash), ("page:ba78".to_string(), "16bf8f01cfea"));
    }

    #[test]
    fn page_ids_roundtrip() {
        for store in backends() {
            let hash = title_to_hash_id("Rust");
            assert_eq!(store.get_page_id(&hash).unwrap(), None);
            store.set_page_id(&hash, 42).unwrap();
            assert_eq!(store.get_page_id(&hash).unwrap(), Some(42));
            assert_eq!(store.get_page_id(&title_to_hash_id("rust")).unwrap(), None);
        }
    }

    #[test]
    fn redirects_set_get_clear() {
        for store in backends() {
            let source = title_to_hash_id("UK");
            let target = title_to_hash_id("United Kingdom");
            store.set_redirect(&source, &target).unwrap();
            assert_eq!(store.get_redirect(&source).unwrap(), Some(target.clone()));
            assert_eq!(
                store.all_redirect_entries().unwrap(),
                vec![(source.clone(), target)]
            );
            assert!(store.clear_redirect(&source).unwrap());
            assert!(!store.clear_redirect(&source).unwrap());
            assert_eq!(store.get_redirect(&source).unwrap(), None);
            assert!(store.all_redirect_entries().unwrap().is_empty());
        }
    }

    #[test]
    fn counters_are_independent() {
        for store in backends() {
            store.reset().unwrap();
            assert_eq!(store.next_counter(Counter::Page).unwrap(), 1);
            assert_eq!(store.next_counter(Counter::Page).unwrap(), 2);
            assert_eq!(store.next_counter(Counter::Category).unwrap(), 1);
            assert_eq!(store.counter_value(Counter::Page).unwrap(), 2);
        }
    }

    #[test]
    fn counter_overflow_is_reported() {
        let store = IdentityStore::in_memory();
        store.kv().set(PAGE_COUNTER, &u32::MAX.to_string()).unwrap();
        assert!(matches!(
            store.next_counter(Counter::Page),
            Err(StoreError::IdOverflow { .. })
        ));
    }

    #[test]
    fn category_ids_are_stable() {
        for store in backends() {
            store.reset().unwrap();
            let foo = title_to_hash_id("Foo");
            let bar = title_to_hash_id("Bar");
            assert_eq!(store.get_or_create_category_id("Foo", &foo).unwrap(), 1);
            assert_eq!(store.get_or_create_category_id("Bar", &bar).unwrap(), 2);
            assert_eq!(store.get_or_create_category_id("Foo", &foo).unwrap(), 1);
            assert!(store.unused_category_ids().unwrap().is_empty());
        }
    }

    #[test]
    fn lost_race_records_unused_id() {
        let store = IdentityStore::in_memory();
        store.reset().unwrap();
        let hash = title_to_hash_id("Contested");
        // A competing writer reserved id 1 and won the set-if-absent.
        let winner = store.next_counter(Counter::Category).unwrap();
        let (key, field) = shard_key(CATEGORY_MAP, &hash);
        assert!(store.kv().hsetnx(&key, field, &winner.to_string()).unwrap());

        // Simulate a caller whose initial lookup missed before the winner wrote.
        let reserved = store.next_counter(Counter::Category).unwrap();
        assert!(!store.kv().hsetnx(&key, field, &reserved.to_string()).unwrap());
        store.kv().sadd(UNUSED_CATEGORY_IDS, &reserved.to_string()).unwrap();

        assert_eq!(store.get_or_create_category_id("Contested", &hash).unwrap(), winner);
        assert_eq!(store.unused_category_ids().unwrap(), vec![reserved]);
    }

    #[test]
    fn concurrent_category_creation_agrees() {
        for store in backends() {
            store.reset().unwrap();
            let store = Arc::new(store);
            let barrier = Arc::new(Barrier::new(8));
            let hash = title_to_hash_id("Race");
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    let hash = hash.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        store.get_or_create_category_id("Race", &hash).unwrap()
                    })
                })
                .collect();
            let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert!(ids.iter().all(|&id| id == ids[0]));

            let unused = store.unused_category_ids().unwrap();
            let allocated = store.counter_value(Counter::Category).unwrap();
            assert_eq!(allocated, unused.len() as u64 + 1);
            assert!(!unused.contains(&ids[0]));
        }
    }

    #[test]
    fn reset_clears_maps_and_counters() {
        for store in backends() {
            let hash = title_to_hash_id("Gone");
            store.set_page_id(&hash, 9).unwrap();
            store.set_redirect(&hash, &title_to_hash_id("Elsewhere")).unwrap();
            store.get_or_create_category_id("Gone", &hash).unwrap();
            store.record_count("Pages", 3).unwrap();
            store.reset().unwrap();
            assert_eq!(store.get_page_id(&hash).unwrap(), None);
            assert_eq!(store.get_redirect(&hash).unwrap(), None);
            assert_eq!(store.get_category_id(&hash).unwrap(), None);
            assert_eq!(store.count("Pages").unwrap(), None);
            assert_eq!(store.counter_value(Counter::Category).unwrap(), 0);
        }
    }

    #[test]
    fn claims_admit_first_caller_only() {
        for store in backends() {
            store.reset().unwrap();
            let hash = title_to_hash_id("Twice");
            assert!(store.claim(Claim::PageId, &hash).unwrap());
            assert!(!store.claim(Claim::PageId, &hash).unwrap());
            assert!(store.claim(Claim::Linked, &hash).unwrap());

            store.clear_claims(Claim::Linked).unwrap();
            assert!(store.claim(Claim::Linked, &hash).unwrap());
            assert!(!store.claim(Claim::PageId, &hash).unwrap());

            store.reset().unwrap();
            assert!(store.claim(Claim::PageId, &hash).unwrap());
        }
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        for store in backends() {
            store.reset().unwrap();
            let store = Arc::new(store);
            let barrier = Arc::new(Barrier::new(8));
            let hash = title_to_hash_id("Duplicate");
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    let hash = hash.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        store.claim(Claim::PageId, &hash).unwrap()
                    })
                })
                .collect();
            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn summary_counts() {
        let store = IdentityStore::in_memory();
        store.record_count("Pages", 12).unwrap();
        assert_eq!(store.count("Pages").unwrap(), Some(12));
        assert_eq!(store.kv().get("s:count:Pages").unwrap().as_deref(), Some("12"));
    }
}
