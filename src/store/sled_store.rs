use super::{parse_counter, KvStore, StoreError, StoreResult};
use anyhow::{Context, Result};
use sled::{Batch, Db, IVec, Tree};
use std::path::Path;

const FIELD_SEPARATOR: u8 = 0;

/// Durable store on an embedded sled database.
///
/// Hash fields and set members live in their own trees under `key \0 field`, so a
/// prefix scan over `key \0` enumerates one hash and a plain prefix scan enumerates keys.
pub struct SledStore {
    db: Db,
    scalars: Tree,
    hashes: Tree,
    sets: Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("Failed to open identity store: {:?}", path))?;
        Self::from_db(db)
    }

    /// Store removed from disk when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to create temporary identity store")?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            scalars: db.open_tree("scalars")?,
            hashes: db.open_tree("hashes")?,
            sets: db.open_tree("sets")?,
            db,
        })
    }
}

fn compound_key(key: &str, field: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + field.len() + 1);
    out.extend_from_slice(key.as_bytes());
    out.push(FIELD_SEPARATOR);
    out.extend_from_slice(field.as_bytes());
    out
}

fn hash_prefix(key: &str) -> Vec<u8> {
    compound_key(key, "")
}

fn decode(key: &[u8], value: &[u8]) -> StoreResult<String> {
    String::from_utf8(value.to_vec()).map_err(|_| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        value: String::from_utf8_lossy(value).into_owned(),
    })
}

fn split_compound(raw: &[u8]) -> StoreResult<(String, String)> {
    let sep = memchr::memchr(FIELD_SEPARATOR, raw).ok_or_else(|| StoreError::Corrupt {
        key: String::from_utf8_lossy(raw).into_owned(),
        value: String::new(),
    })?;
    Ok((decode(raw, &raw[..sep])?, decode(raw, &raw[sep + 1..])?))
}

fn delete_matching(tree: &Tree, prefix: &[u8]) -> StoreResult<()> {
    let mut batch = Batch::default();
    for entry in tree.scan_prefix(prefix).keys() {
        batch.remove(entry?);
    }
    tree.apply_batch(batch)?;
    Ok(())
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.scalars
            .get(key)?
            .map(|v| decode(key.as_bytes(), &v))
            .transpose()
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.scalars.insert(key, value.as_bytes())?;
        Ok(())
    }

    fn incr(&self, key: &str) -> StoreResult<u64> {
        loop {
            let current: Option<IVec> = self.scalars.get(key)?;
            let next = match &current {
                Some(raw) => parse_counter(key, &decode(key.as_bytes(), raw)?)? + 1,
                None => 1,
            };
            let swapped = self.scalars.compare_and_swap(
                key,
                current,
                Some(next.to_string().into_bytes()),
            )?;
            if swapped.is_ok() {
                return Ok(next);
            }
        }
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let k = compound_key(key, field);
        self.hashes.get(&k)?.map(|v| decode(&k, &v)).transpose()
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .insert(compound_key(key, field), value.as_bytes())?;
        Ok(())
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let swapped = self.hashes.compare_and_swap(
            compound_key(key, field),
            None as Option<&[u8]>,
            Some(value.as_bytes()),
        )?;
        Ok(swapped.is_ok())
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hashes.remove(compound_key(key, field))?.is_some())
    }

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let prefix = hash_prefix(key);
        let mut out = Vec::new();
        for entry in self.hashes.scan_prefix(&prefix) {
            let (k, v) = entry?;
            out.push((decode(&k, &k[prefix.len()..])?, decode(&k, &v)?));
        }
        Ok(out)
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for entry in self.hashes.scan_prefix(prefix.as_bytes()).keys() {
            let (key, _) = split_compound(&entry?)?;
            if keys.last() != Some(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .sets
            .insert(compound_key(key, member), IVec::default())?
            .is_none())
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let prefix = hash_prefix(key);
        self.sets
            .scan_prefix(&prefix)
            .keys()
            .map(|k| {
                let k = k?;
                decode(&k, &k[prefix.len()..])
            })
            .collect()
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<()> {
        for tree in [&self.scalars, &self.hashes, &self.sets] {
            delete_matching(tree, prefix.as_bytes())?;
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
