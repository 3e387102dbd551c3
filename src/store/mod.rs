//! Value store module.
//!
//! Holds the polymorphic [`value::Value`] type with its dual-encoding
//! collection variants, the per-key [`locks::KeyLockManager`], the glob
//! matcher behind KEYS, and the sharded [`db::Database`]/[`db::StorageEngine`]
//! that ties them together. Generalizes the teacher's `storage::engine`
//! module (a single scalar `Entry` type behind a sharded map) to the full
//! tagged-union value model.

pub mod db;
pub mod glob;
pub mod locks;
pub mod value;

pub use db::{Database, StorageEngine, StoreError, StoreResult};
pub use value::Value;
