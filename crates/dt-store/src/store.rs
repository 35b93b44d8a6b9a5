// store.rs — JsonFileStore: one JSON file per record.
//
// Layout: `<store_dir>/<record_id>.json`. Writes go to a sibling temp file
// and are renamed into place, so a reader never observes a half-written
// record. Mutations that depend on the current contents of a record
// (status transitions, counters, revert stamps) go through `update_if`,
// which holds the store lock across read → check → write.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

/// Anything that can be persisted in a [`JsonFileStore`].
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// The unique id the record is filed under.
    fn record_id(&self) -> Uuid;
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    /// The predicate held; the mutated record was written and is returned.
    Updated(T),
    /// The predicate did not hold; nothing was written. Carries the record
    /// as currently stored.
    Rejected(T),
    /// No record with that id exists.
    Missing,
}

impl<T> UpdateOutcome<T> {
    /// The updated record, if the update was applied.
    pub fn updated(self) -> Option<T> {
        match self {
            UpdateOutcome::Updated(record) => Some(record),
            _ => None,
        }
    }
}

/// Directory-backed record store.
pub struct JsonFileStore<T> {
    store_dir: PathBuf,
    write_lock: Mutex<()>,
    _records: PhantomData<fn() -> T>,
}

impl<T: Record> JsonFileStore<T> {
    /// Create a new store backed by the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| StoreError::IoError {
            path: store_dir.clone(),
            source,
        })?;
        Ok(Self {
            store_dir,
            write_lock: Mutex::new(()),
            _records: PhantomData,
        })
    }

    /// Directory the records live in.
    pub fn dir(&self) -> &Path {
        &self.store_dir
    }

    /// Persist a new record. Fails if a record with the same id exists.
    pub fn insert(&self, record: &T) -> Result<(), StoreError> {
        let _guard = self.lock();
        let id = record.record_id();
        if self.record_file(id).exists() {
            return Err(StoreError::AlreadyExists(id));
        }
        self.write_record(record)
    }

    /// Persist a record, overwriting any existing one with the same id.
    pub fn save(&self, record: &T) -> Result<(), StoreError> {
        let _guard = self.lock();
        self.write_record(record)
    }

    /// Get a record by id.
    pub fn get(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        let path = self.record_file(id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_record(&path).map(Some)
    }

    /// List every record in the store, in no particular order.
    ///
    /// Files that fail to parse are skipped with a warning rather than
    /// failing the whole listing.
    pub fn list(&self) -> Result<Vec<T>, StoreError> {
        let entries = fs::read_dir(&self.store_dir).map_err(|source| StoreError::IoError {
            path: self.store_dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::IoError {
                path: self.store_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match self.read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable record: {}", e),
            }
        }
        Ok(records)
    }

    /// List records matching a predicate.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>, StoreError> {
        Ok(self.list()?.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Apply `mutate` to the stored record only if `predicate` holds for it.
    ///
    /// The read, the predicate check and the write happen under the store
    /// lock, so two callers racing on the same record cannot both see the
    /// pre-mutation state.
    pub fn update_if<P, M>(
        &self,
        id: Uuid,
        predicate: P,
        mutate: M,
    ) -> Result<UpdateOutcome<T>, StoreError>
    where
        P: FnOnce(&T) -> bool,
        M: FnOnce(&mut T),
    {
        let _guard = self.lock();
        let path = self.record_file(id);
        if !path.exists() {
            return Ok(UpdateOutcome::Missing);
        }
        let mut record = self.read_record(&path)?;
        if !predicate(&record) {
            return Ok(UpdateOutcome::Rejected(record));
        }
        mutate(&mut record);
        self.write_record(&record)?;
        Ok(UpdateOutcome::Updated(record))
    }

    /// Unconditional read-modify-write. Returns `None` if the record is absent.
    pub fn update<M>(&self, id: Uuid, mutate: M) -> Result<Option<T>, StoreError>
    where
        M: FnOnce(&mut T),
    {
        Ok(self.update_if(id, |_| true, mutate)?.updated())
    }

    /// Delete a record. Returns whether anything was removed.
    pub fn remove(&self, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.lock();
        let path = self.record_file(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| StoreError::IoError { path, source })?;
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_record(&self, path: &Path) -> Result<T, StoreError> {
        let json = fs::read_to_string(path).map_err(|source| StoreError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_record(&self, record: &T) -> Result<(), StoreError> {
        let path = self.record_file(record.record_id());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json).map_err(|source| StoreError::IoError {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::IoError { path, source })?;
        Ok(())
    }

    fn record_file(&self, id: Uuid) -> PathBuf {
        self.store_dir.join(format!("{}.json", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: Uuid,
        state: String,
        hits: u32,
    }

    impl Record for Counter {
        fn record_id(&self) -> Uuid {
            self.id
        }
    }

    fn counter(state: &str) -> Counter {
        Counter {
            id: Uuid::new_v4(),
            state: state.to_string(),
            hits: 0,
        }
    }

    #[test]
    fn insert_and_get() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path().join("counters")).unwrap();

        let c = counter("open");
        store.insert(&c).unwrap();

        assert_eq!(store.get(c.id).unwrap(), Some(c));
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn insert_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path()).unwrap();

        let c = counter("open");
        store.insert(&c).unwrap();
        let err = store.insert(&c).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == c.id));
    }

    #[test]
    fn update_if_applies_only_when_predicate_holds() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path()).unwrap();
        let c = counter("open");
        store.insert(&c).unwrap();

        let first = store
            .update_if(c.id, |r| r.state == "open", |r| r.state = "closed".into())
            .unwrap();
        assert!(matches!(first, UpdateOutcome::Updated(ref r) if r.state == "closed"));

        let second = store
            .update_if(c.id, |r| r.state == "open", |r| r.state = "reopened".into())
            .unwrap();
        assert!(matches!(second, UpdateOutcome::Rejected(ref r) if r.state == "closed"));
        assert_eq!(store.get(c.id).unwrap().unwrap().state, "closed");
    }

    #[test]
    fn update_if_missing_record() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path()).unwrap();
        let outcome = store.update_if(Uuid::new_v4(), |_| true, |_| {}).unwrap();
        assert_eq!(outcome, UpdateOutcome::Missing);
    }

    #[test]
    fn concurrent_conditional_updates_apply_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonFileStore::<Counter>::new(dir.path()).unwrap());
        let c = counter("pending");
        store.insert(&c).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .update_if(c.id, |r| r.state == "pending", |r| r.state = "done".into())
                        .unwrap()
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, UpdateOutcome::Updated(_)))
            .count();
        assert_eq!(applied, 1);
    }

    #[test]
    fn unconditional_update_increments() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path()).unwrap();
        let c = counter("open");
        store.insert(&c).unwrap();

        store.update(c.id, |r| r.hits += 1).unwrap();
        let updated = store.update(c.id, |r| r.hits += 1).unwrap().unwrap();
        assert_eq!(updated.hits, 2);
        assert!(store.update(Uuid::new_v4(), |r| r.hits += 1).unwrap().is_none());
    }

    #[test]
    fn list_filter_and_remove() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::<Counter>::new(dir.path()).unwrap();
        let a = counter("open");
        let b = counter("closed");
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        // Stray files are ignored.
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        let open = store.filter(|r| r.state == "open").unwrap();
        assert_eq!(open, vec![a.clone()]);

        assert!(store.remove(a.id).unwrap());
        assert!(!store.remove(a.id).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters");
        let c = counter("open");
        {
            let store = JsonFileStore::<Counter>::new(&path).unwrap();
            store.insert(&c).unwrap();
        }
        let store = JsonFileStore::<Counter>::new(&path).unwrap();
        assert_eq!(store.get(c.id).unwrap(), Some(c));
    }
}
