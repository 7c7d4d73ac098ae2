//! In-memory store implementation.
//!
//! [`MemoryStore`] keeps every logical database in a `BTreeMap` behind a
//! [`parking_lot::RwLock`]. It is primarily intended for tests and
//! development, but implements the full [`KvStore`] contract, including
//! atomic [`multi`](KvStore::multi) batches.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::{StoreError, StoreResult},
    store::{DbIndex, KvCommand, KvStore},
};

/// A stored value: a key holds either a hash or a set, never both.
#[derive(Debug, Clone)]
enum Entry {
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
}

type Database = BTreeMap<String, Entry>;

/// In-memory [`KvStore`] backend.
///
/// # Cloning
///
/// `MemoryStore` is cheaply cloneable via [`Arc`]; all clones share the
/// same underlying databases. Tests typically keep one clone to inspect
/// state directly while handing another to the registries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    dbs: Arc<RwLock<HashMap<DbIndex, Database>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType { key: key.to_string() }
    }

    /// Runs `f` against the hash at `key`, creating it when `create` is set.
    /// Fails with [`StoreError::WrongType`] when the key holds a set.
    fn with_hash<T>(
        db: &mut Database,
        key: &str,
        create: bool,
        f: impl FnOnce(Option<&mut BTreeMap<String, String>>) -> T,
    ) -> StoreResult<T> {
        match db.get_mut(key) {
            Some(Entry::Hash(hash)) => Ok(f(Some(hash))),
            Some(Entry::Set(_)) => Err(Self::wrong_type(key)),
            None if create => {
                let Entry::Hash(hash) = db
                    .entry(key.to_string())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()))
                else {
                    return Err(Self::wrong_type(key));
                };
                Ok(f(Some(hash)))
            }
            None => Ok(f(None)),
        }
    }

    fn with_set<T>(
        db: &mut Database,
        key: &str,
        create: bool,
        f: impl FnOnce(Option<&mut BTreeSet<String>>) -> T,
    ) -> StoreResult<T> {
        match db.get_mut(key) {
            Some(Entry::Set(set)) => Ok(f(Some(set))),
            Some(Entry::Hash(_)) => Err(Self::wrong_type(key)),
            None if create => {
                let Entry::Set(set) = db
                    .entry(key.to_string())
                    .or_insert_with(|| Entry::Set(BTreeSet::new()))
                else {
                    return Err(Self::wrong_type(key));
                };
                Ok(f(Some(set)))
            }
            None => Ok(f(None)),
        }
    }

    /// Applies one batch command. Caller holds the write lock, which is what
    /// makes a [`multi`](KvStore::multi) batch atomic.
    fn apply(db: &mut Database, command: &KvCommand) -> StoreResult<u64> {
        match command {
            KvCommand::SAdd { key, member } => Self::with_set(db, key, true, |set| {
                let set = set.expect("set was just created");
                u64::from(set.insert(member.clone()))
            }),
            KvCommand::SRem { key, member } => Self::with_set(db, key, false, |set| match set {
                Some(set) => u64::from(set.remove(member)),
                None => 0,
            }),
            KvCommand::HDel { key, field } => Self::with_hash(db, key, false, |hash| match hash {
                Some(hash) => u64::from(hash.remove(field).is_some()),
                None => 0,
            }),
            KvCommand::Del { key } => Ok(u64::from(db.remove(key).is_some())),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hget(&self, db: DbIndex, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, false, |hash| {
            hash.and_then(|h| h.get(field).cloned())
        })
    }

    async fn hmget(
        &self,
        db: DbIndex,
        key: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<String>>> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, false, |hash| match hash {
            Some(hash) => fields.iter().map(|f| hash.get(f).cloned()).collect(),
            None => vec![None; fields.len()],
        })
    }

    async fn hset(&self, db: DbIndex, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, true, |hash| {
            let hash = hash.expect("hash was just created");
            hash.insert(field.to_string(), value.to_string()).is_none()
        })
    }

    async fn hsetnx(&self, db: DbIndex, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, true, |hash| {
            let hash = hash.expect("hash was just created");
            if hash.contains_key(field) {
                false
            } else {
                hash.insert(field.to_string(), value.to_string());
                true
            }
        })
    }

    async fn hdel(&self, db: DbIndex, key: &str, field: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        let removed = Self::with_hash(db, key, false, |hash| match hash {
            Some(hash) => hash.remove(field).is_some(),
            None => false,
        })?;
        // An emptied hash key disappears, matching store semantics.
        if let Some(Entry::Hash(hash)) = db.get(key) {
            if hash.is_empty() {
                db.remove(key);
            }
        }
        Ok(removed)
    }

    async fn hkeys(&self, db: DbIndex, key: &str) -> StoreResult<Vec<String>> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, false, |hash| match hash {
            Some(hash) => hash.keys().cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn hlen(&self, db: DbIndex, key: &str) -> StoreResult<u64> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_hash(db, key, false, |hash| match hash {
            Some(hash) => hash.len() as u64,
            None => 0,
        })
    }

    async fn smembers(&self, db: DbIndex, key: &str) -> StoreResult<Vec<String>> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_set(db, key, false, |set| match set {
            Some(set) => set.iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn sadd(&self, db: DbIndex, key: &str, member: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Self::with_set(db, key, true, |set| {
            let set = set.expect("set was just created");
            set.insert(member.to_string())
        })
    }

    async fn srem(&self, db: DbIndex, key: &str, member: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        let removed = Self::with_set(db, key, false, |set| match set {
            Some(set) => set.remove(member),
            None => false,
        })?;
        if let Some(Entry::Set(set)) = db.get(key) {
            if set.is_empty() {
                db.remove(key);
            }
        }
        Ok(removed)
    }

    async fn del(&self, db: DbIndex, key: &str) -> StoreResult<bool> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        Ok(db.remove(key).is_some())
    }

    async fn multi(&self, db: DbIndex, commands: Vec<KvCommand>) -> StoreResult<Vec<u64>> {
        let mut dbs = self.dbs.write();
        let db = dbs.entry(db).or_default();
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            replies.push(Self::apply(db, command)?);
        }
        Ok(replies)
    }
}
