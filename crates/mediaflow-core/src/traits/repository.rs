//! Generic repository trait for record persistence.

use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;

use crate::result::AppResult;

/// A persisted domain record with an identity and a status.
pub trait Record: Clone + Send + Sync + 'static {
    /// Primary key type.
    type Id: Copy + Eq + Hash + Display + Send + Sync + 'static;
    /// Lifecycle status type.
    type Status: Copy + Eq + Send + Sync + 'static;

    /// Return the primary key.
    fn record_id(&self) -> Self::Id;

    /// Return the current status.
    fn record_status(&self) -> Self::Status;
}

/// Generic CRUD repository trait.
///
/// Each record type gets a strongly typed repository. The pipeline only
/// relies on the fields it reads and writes, never on a storage schema.
#[async_trait]
pub trait Repository<E: Record>: Send + Sync + 'static {
    /// Find a record by its primary key.
    async fn find_by_id(&self, id: &E::Id) -> AppResult<Option<E>>;

    /// Find every record currently in the given status.
    async fn find_by_status(&self, status: E::Status) -> AppResult<Vec<E>>;

    /// Create a new record and return it.
    async fn create(&self, record: &E) -> AppResult<E>;

    /// Replace an existing record and return the stored version.
    async fn update(&self, record: &E) -> AppResult<E>;

    /// Delete a record by its primary key. Returns `true` if deleted.
    async fn delete(&self, id: &E::Id) -> AppResult<bool>;

    /// Count all records.
    async fn count(&self) -> AppResult<u64>;
}
