//! Store client trait definition.
//!
//! [`KvStore`] is the seam between the registries and the shared persistent
//! store. Implementations are expected to be thread-safe (`Send + Sync`)
//! and cheap to share behind an `Arc`.

use async_trait::async_trait;

use crate::error::StoreResult;

/// Logical database index within the shared store.
///
/// Templates, certificates and signatures all live in the same logical
/// database as the layergroups they protect.
pub type DbIndex = u32;

/// A write command that can participate in an atomic batch.
///
/// See [`KvStore::multi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCommand {
    /// Add a member to a set.
    SAdd { key: String, member: String },
    /// Remove a member from a set.
    SRem { key: String, member: String },
    /// Delete a field from a hash.
    HDel { key: String, field: String },
    /// Delete a whole key.
    Del { key: String },
}

/// Abstract client for a key-value store with hash and set values.
///
/// Every operation is addressed by `(db, key)`. All operations are async
/// boundaries; a multi-step mutation that must not be observed partially
/// applied goes through [`multi`](KvStore::multi) instead of sequential
/// single commands.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a single hash field. `Ok(None)` when the key or field is absent.
    async fn hget(&self, db: DbIndex, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Reads several hash fields in one round-trip, preserving field order.
    /// Absent fields yield `None` in the corresponding position.
    async fn hmget(
        &self,
        db: DbIndex,
        key: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<String>>>;

    /// Writes a hash field unconditionally. Returns `true` when the field
    /// was newly created, `false` when an existing value was overwritten.
    async fn hset(&self, db: DbIndex, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Writes a hash field only if it does not exist yet. Returns whether
    /// the field was set. The check and the write are a single atomic step.
    async fn hsetnx(&self, db: DbIndex, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Deletes a hash field. Returns whether the field existed.
    async fn hdel(&self, db: DbIndex, key: &str, field: &str) -> StoreResult<bool>;

    /// Lists all field names of a hash. Empty for an absent key.
    async fn hkeys(&self, db: DbIndex, key: &str) -> StoreResult<Vec<String>>;

    /// Counts the fields of a hash. Zero for an absent key.
    async fn hlen(&self, db: DbIndex, key: &str) -> StoreResult<u64>;

    /// Lists all members of a set. Empty for an absent key.
    async fn smembers(&self, db: DbIndex, key: &str) -> StoreResult<Vec<String>>;

    /// Adds a member to a set. Returns whether the member was new.
    async fn sadd(&self, db: DbIndex, key: &str, member: &str) -> StoreResult<bool>;

    /// Removes a member from a set. Returns whether the member existed.
    async fn srem(&self, db: DbIndex, key: &str, member: &str) -> StoreResult<bool>;

    /// Deletes a whole key. Returns whether the key existed.
    async fn del(&self, db: DbIndex, key: &str) -> StoreResult<bool>;

    /// Executes a batch of write commands atomically: no concurrent
    /// operation observes a partially applied batch. Replies are the
    /// per-command affected counts, in command order.
    async fn multi(&self, db: DbIndex, commands: Vec<KvCommand>) -> StoreResult<Vec<u64>>;
}
