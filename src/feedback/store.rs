//! Persistence for ratings and feedback.
//!
//! Handlers only see the [`RecordStore`] trait. [`MemoryStore`] keeps records
//! for the life of the process; [`JsonLinesStore`] appends one JSON object
//! per line to a file and reads them all back on listing.

use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only record storage shared by request handlers.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn append(&self, record: T) -> Result<(), StoreError>;

    /// All records in insertion order.
    async fn list_all(&self) -> Result<Vec<T>, StoreError>;
}

/// Process-local store.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: RwLock<Vec<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn append(&self, record: T) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().await.clone())
    }
}

/// File-backed store: one JSON document per line, appended in place.
///
/// A missing file lists as empty. Lines that no longer decode are skipped
/// with a warning rather than failing the listing.
#[derive(Debug)]
pub struct JsonLinesStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonLinesStore<T> {
    /// Prepares a store at `path`, creating its parent directories.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> RecordStore<T> for JsonLinesStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn append(&self, record: T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<T>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping unreadable record"
                ),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u32,
        text: String,
    }

    fn note(id: u32) -> Note {
        Note {
            id,
            text: format!("note {id}"),
        }
    }

    #[tokio::test]
    async fn memory_store_keeps_order() {
        let store = MemoryStore::new();
        for id in 0..3 {
            store.append(note(id)).await.unwrap();
        }
        assert_eq!(store.list_all().await.unwrap(), vec![note(0), note(1), note(2)]);
    }

    #[tokio::test]
    async fn json_lines_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.jsonl");

        let store = JsonLinesStore::<Note>::open(&path).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
        store.append(note(1)).await.unwrap();
        store.append(note(2)).await.unwrap();
        drop(store);

        let reopened = JsonLinesStore::<Note>::open(&path).await.unwrap();
        reopened.append(note(3)).await.unwrap();
        assert_eq!(
            reopened.list_all().await.unwrap(),
            vec![note(1), note(2), note(3)]
        );
    }

    #[tokio::test]
    async fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");
        std::fs::write(&path, "{\"id\":1,\"text\":\"note 1\"}\nnot json\n\n").unwrap();

        let store = JsonLinesStore::<Note>::open(&path).await.unwrap();
        store.append(note(2)).await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![note(1), note(2)]);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            JsonLinesStore::<Note>::open(dir.path().join("notes.jsonl"))
                .await
                .unwrap(),
        );

        let tasks: Vec<_> = (0..20)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(note(id)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut ids: Vec<_> = store.list_all().await.unwrap().into_iter().map(|n| n.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stores_are_usable_as_trait_objects() {
        let store: Arc<dyn RecordStore<Note>> = Arc::new(MemoryStore::new());
        store.append(note(7)).await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }
}
