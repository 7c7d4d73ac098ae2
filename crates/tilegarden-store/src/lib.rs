//! Key-value store client for the Tilegarden map control plane.
//!
//! The template and signature registries persist their state in a shared
//! key-value store addressed by logical database index. This crate defines
//! the [`KvStore`] trait covering the command surface those registries need
//! (hash maps, sets, and atomic multi-command batches), plus
//! [`MemoryStore`], an in-memory implementation used for development and
//! tests. Connection pooling and retry policy live behind the trait; the
//! registries never see individual connections.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{DbIndex, KvCommand, KvStore};
