//! In-process repository backed by a concurrent map.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use mediaflow_core::error::AppError;
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::repository::{Record, Repository};

/// Repository keeping every record in memory.
pub struct MemoryRepository<E: Record> {
    records: DashMap<E::Id, E>,
    name: &'static str,
}

impl<E: Record> MemoryRepository<E> {
    /// Create an empty repository. `name` is used in errors and logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            records: DashMap::new(),
            name,
        }
    }

    /// Return every record matching a predicate.
    pub fn find_where(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Remove every record matching a predicate, returning the removed ids.
    pub fn purge_where(&self, predicate: impl Fn(&E) -> bool) -> Vec<E::Id> {
        let ids: Vec<E::Id> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        for id in &ids {
            self.records.remove(id);
        }
        if !ids.is_empty() {
            debug!(repository = self.name, count = ids.len(), "Purged records");
        }
        ids
    }
}

impl<E: Record> fmt::Debug for MemoryRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("name", &self.name)
            .field("records", &self.records.len())
            .finish()
    }
}

#[async_trait]
impl<E: Record> Repository<E> for MemoryRepository<E> {
    async fn find_by_id(&self, id: &E::Id) -> AppResult<Option<E>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_status(&self, status: E::Status) -> AppResult<Vec<E>> {
        Ok(self.find_where(|record| record.record_status() == status))
    }

    async fn create(&self, record: &E) -> AppResult<E> {
        let id = record.record_id();
        match self.records.entry(id) {
            Entry::Occupied(_) => Err(AppError::conflict(format!(
                "{} {id} already exists",
                self.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record.clone())
            }
        }
    }

    async fn update(&self, record: &E) -> AppResult<E> {
        let id = record.record_id();
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                *entry = record.clone();
                Ok(record.clone())
            }
            None => Err(AppError::not_found(format!("{} {id} not found", self.name))),
        }
    }

    async fn delete(&self, id: &E::Id) -> AppResult<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mediaflow_core::error::ErrorKind;
    use mediaflow_core::types::{ArtifactRef, OperationKind, TransformParams};
    use mediaflow_entity::job::{Job, JobPriority, JobStatus, NewJob};

    fn job() -> Job {
        Job::new(
            NewJob {
                batch_id: None,
                input: ArtifactRef::new("in/a.wav"),
                kind: OperationKind::new(OperationKind::AUDIO_CONVERT),
                params: TransformParams::new(),
                priority: JobPriority::Normal,
                webhook: None,
                tenant_id: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_find_update() {
        let repo = MemoryRepository::<Job>::new("job");
        let mut job = job();
        repo.create(&job).await.expect("create");

        job.begin_attempt(1, Utc::now()).expect("start");
        repo.update(&job).await.expect("update");

        let found = repo.find_by_id(&job.id).await.expect("find").expect("present");
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(repo.find_by_status(JobStatus::Processing).await.expect("q").len(), 1);
        assert!(repo.find_by_status(JobStatus::Pending).await.expect("q").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let repo = MemoryRepository::<Job>::new("job");
        let job = job();
        repo.create(&job).await.expect("create");
        let err = repo.create(&job).await.expect_err("duplicate");
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = MemoryRepository::<Job>::new("job");
        let err = repo.update(&job()).await.expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_purge_where() {
        let repo = MemoryRepository::<Job>::new("job");
        let mut done = job();
        done.cancel(Utc::now()).expect("cancel");
        repo.create(&done).await.expect("create");
        repo.create(&job()).await.expect("create");

        let purged = repo.purge_where(|j| j.status.is_terminal());
        assert_eq!(purged, vec![done.id]);
        assert_eq!(repo.count().await.expect("count"), 1);
        assert!(!repo.delete(&done.id).await.expect("delete"));
    }
}
