//! Pluggable state storage for the key-lifecycle engines.
//!
//! All shared mutable state in this crate (incident map, rotation-session
//! table, baseline store, isolation sets) lives behind the [`StateStore`]
//! trait rather than in process-wide singletons. Tests substitute in-memory
//! stores; deployments can substitute durable or distributed ones.
//!
//! The contract is per-record atomicity: operations on different keys may
//! run fully in parallel, while read-modify-write cycles against the same
//! key serialize so concurrent callers cannot lose updates.

mod errors;
mod in_memory;

pub use errors::StoreError;
pub use in_memory::InMemoryStore;

use crate::Result;

/// A keyed store of records with atomic per-record read-modify-write.
///
/// Object safety is deliberate: engines hold `Arc<dyn StateStore<V>>` so the
/// backing implementation is an injection point, not a type parameter.
pub trait StateStore<V: Clone + Send + Sync>: Send + Sync {
    /// Create a record under `key`, failing with [`StoreError::DuplicateKey`]
    /// if one already exists.
    fn insert_new(&self, key: &str, value: V) -> Result<()>;

    /// Return a cloned snapshot of the record, if present.
    fn get(&self, key: &str) -> Option<V>;

    /// Whether a record exists under `key`.
    fn contains(&self, key: &str) -> bool;

    /// Atomically mutate the record under `key`.
    ///
    /// Returns `false` without invoking `f` when the key is absent. The
    /// record's lock is held for the duration of `f`, so two concurrent
    /// updates to one key observe each other's effects.
    fn update(&self, key: &str, f: &mut dyn FnMut(&mut V)) -> bool;

    /// Atomically mutate the record under `key`, creating it from `default`
    /// first when absent.
    fn update_or_insert(&self, key: &str, default: &mut dyn FnMut() -> V, f: &mut dyn FnMut(&mut V));

    /// Remove the record under `key`, returning it if present.
    fn remove(&self, key: &str) -> Option<V>;

    /// Number of records currently stored.
    fn len(&self) -> usize;

    /// Whether the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys currently present.
    fn keys(&self) -> Vec<String>;

    /// Cloned snapshot of every record.
    fn snapshot(&self) -> Vec<(String, V)>;
}
