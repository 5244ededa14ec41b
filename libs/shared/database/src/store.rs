use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A row that can live in a table keyed by its id.
pub trait Record: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> Uuid;
}

/// A stored row together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: Uuid },

    #[error("{table} row {id} already exists")]
    AlreadyExists { table: &'static str, id: Uuid },

    #[error("{table} row {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        table: &'static str,
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence boundary for one logical table.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn insert(&self, record: T) -> Result<Versioned<T>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Versioned<T>>, StoreError>;

    /// Replaces the row only if it is still at `expected_version`.
    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected_version: u64,
        record: T,
    ) -> Result<Versioned<T>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<Option<T>, StoreError>;

    async fn list(&self) -> Result<Vec<Versioned<T>>, StoreError>;
}

pub struct InMemoryTable<T: Record> {
    name: &'static str,
    rows: RwLock<HashMap<Uuid, Versioned<T>>>,
}

impl<T: Record> InMemoryTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Copies every row out, ordered by id so snapshots are stable.
    pub async fn snapshot(&self) -> Vec<Versioned<T>> {
        let rows = self.rows.read().await;
        let mut out: Vec<Versioned<T>> = rows.values().cloned().collect();
        out.sort_by_key(|row| row.record.id());
        out
    }

    /// Replaces the table contents with previously snapshotted rows.
    pub async fn restore(&self, snapshot: Vec<Versioned<T>>) {
        let mut rows = self.rows.write().await;
        rows.clear();
        for row in snapshot {
            rows.insert(row.record.id(), row);
        }
        debug!("Restored {} rows into {}", rows.len(), self.name);
    }
}

#[async_trait]
impl<T: Record> Repository<T> for InMemoryTable<T> {
    async fn insert(&self, record: T) -> Result<Versioned<T>, StoreError> {
        let id = record.id();
        let mut rows = self.rows.write().await;

        if rows.contains_key(&id) {
            return Err(StoreError::AlreadyExists { table: self.name, id });
        }

        let row = Versioned { version: 1, record };
        rows.insert(id, row.clone());
        debug!("Inserted {} row {}", self.name, id);
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Versioned<T>>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected_version: u64,
        record: T,
    ) -> Result<Versioned<T>, StoreError> {
        let mut rows = self.rows.write().await;

        let current = rows
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: self.name, id })?;

        if current.version != expected_version {
            warn!(
                "Rejected stale write to {} row {} (expected v{}, found v{})",
                self.name, id, expected_version, current.version
            );
            return Err(StoreError::VersionConflict {
                table: self.name,
                id,
                expected: expected_version,
                actual: current.version,
            });
        }

        current.version += 1;
        current.record = record;
        Ok(current.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        let removed = self.rows.write().await.remove(&id).map(|row| row.record);
        if removed.is_some() {
            debug!("Deleted {} row {}", self.name, id);
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<Versioned<T>>, StoreError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Uuid,
        body: String,
    }

    impl Record for Note {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    fn note(body: &str) -> Note {
        Note { id: Uuid::new_v4(), body: body.to_string() }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let table = InMemoryTable::new("notes");
        let row = table.insert(note("first")).await.unwrap();
        assert_eq!(row.version, 1);

        let fetched = table.get(row.record.id).await.unwrap().unwrap();
        assert_eq!(fetched, row);

        assert_matches!(
            table.insert(row.record.clone()).await,
            Err(StoreError::AlreadyExists { table: "notes", .. })
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let table = InMemoryTable::new("notes");
        let row = table.insert(note("draft")).await.unwrap();
        let id = row.record.id;

        let mut edited = row.record.clone();
        edited.body = "edited".to_string();
        let updated = table.compare_and_swap(id, 1, edited).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut stale = row.record.clone();
        stale.body = "lost update".to_string();
        assert_matches!(
            table.compare_and_swap(id, 1, stale).await,
            Err(StoreError::VersionConflict { expected: 1, actual: 2, .. })
        );

        let current = table.get(id).await.unwrap().unwrap();
        assert_eq!(current.record.body, "edited");
    }

    #[tokio::test]
    async fn test_compare_and_swap_missing_row() {
        let table: InMemoryTable<Note> = InMemoryTable::new("notes");
        let missing = note("ghost");
        assert_matches!(
            table.compare_and_swap(missing.id, 1, missing.clone()).await,
            Err(StoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_delete_and_restore() {
        let table = InMemoryTable::new("notes");
        let a = table.insert(note("a")).await.unwrap();
        table.insert(note("b")).await.unwrap();

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 2);

        assert!(table.delete(a.record.id).await.unwrap().is_some());
        assert!(table.delete(a.record.id).await.unwrap().is_none());
        assert_eq!(table.len().await, 1);

        table.restore(snapshot).await;
        assert_eq!(table.len().await, 2);
        assert!(table.get(a.record.id).await.unwrap().is_some());
    }
}
