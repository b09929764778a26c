//! Resource access entry store
//!
//! Persists one capability record per `(resource, user)`. Every operation is
//! atomic at single-entry granularity; `delete_all_for_resource` and
//! `delete_all_for_user` are atomic as a whole.
//!
//! Two backends share the same table logic:
//! - [`MemoryEntryStore`] keeps tables in process memory
//! - [`FileEntryStore`] additionally writes a JSON snapshot after each mutation.
//!   Every mutation reloads the file under an exclusive file lock first, so
//!   several processes can share one file. Reads answer from the state seen
//!   at open or at this process's last mutation.

pub mod tables;

use crate::access_control::capabilities::{Capabilities, Capability, LevelMatch};
use crate::access_control::types::{EntryId, ResourceRef, UserId};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tables::{EntryTables, Snapshot};
use tracing::debug;

/// A persisted access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub id: EntryId,
    pub resource: ResourceRef,
    pub user: UserId,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessEntry {
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.allows(capability)
    }

    /// Canonical level name, or `custom`
    pub fn level(&self) -> LevelMatch {
        self.capabilities.level()
    }
}

/// Storage for resource access entries
pub trait AccessEntryStore: Send + Sync {
    /// Create or overwrite the unique entry for `(resource, user)`
    fn upsert(
        &self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
    ) -> StoreResult<AccessEntry>;

    /// Create the entry only if none exists. Returns `None` when one already did.
    fn insert_if_absent(
        &self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
    ) -> StoreResult<Option<AccessEntry>>;

    fn find(&self, resource: ResourceRef, user: UserId) -> StoreResult<Option<AccessEntry>>;

    fn get(&self, id: EntryId) -> StoreResult<Option<AccessEntry>>;

    /// Overwrite the capabilities of an existing entry
    fn set_capabilities(&self, id: EntryId, capabilities: Capabilities)
    -> StoreResult<AccessEntry>;

    /// Entries for a resource in creation order
    fn list_for_resource(&self, resource: ResourceRef) -> StoreResult<Vec<AccessEntry>>;

    /// Entries held by a user in creation order
    fn list_for_user(&self, user: UserId) -> StoreResult<Vec<AccessEntry>>;

    fn delete_one(&self, id: EntryId) -> StoreResult<AccessEntry>;

    /// Remove every entry for a resource. All-or-nothing.
    fn delete_all_for_resource(&self, resource: ResourceRef) -> StoreResult<usize>;

    /// Remove every entry for several resources. All-or-nothing across all of them.
    fn delete_all_for_resources(&self, resources: &[ResourceRef]) -> StoreResult<usize>;

    /// Remove every entry held by a user. All-or-nothing.
    fn delete_all_for_user(&self, user: UserId) -> StoreResult<usize>;
}

/// Shared handle to an entry store
pub type SharedStore = Arc<dyn AccessEntryStore>;

/// Where committed tables go after a mutation
pub trait Persistence: Send + Sync {
    /// Apply `op` as one transaction and commit the result.
    ///
    /// `cached` is this process's view of the tables. Backends shared with
    /// other processes refresh it from storage before applying `op`.
    fn commit<T>(
        &self,
        cached: &mut EntryTables,
        op: impl FnOnce(&mut EntryTables) -> StoreResult<T>,
    ) -> StoreResult<T>;
}

/// Keeps tables in memory only
#[derive(Debug, Default, Clone, Copy)]
pub struct Volatile;

impl Persistence for Volatile {
    fn commit<T>(
        &self,
        cached: &mut EntryTables,
        op: impl FnOnce(&mut EntryTables) -> StoreResult<T>,
    ) -> StoreResult<T> {
        op(cached)
    }
}

/// Writes tables to a JSON file, replacing it atomically.
///
/// Writers serialize on an advisory lock held on `<path>.lock` from reload to
/// rename, so stores in different processes never overwrite each other's
/// entries or reuse an entry id.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "entries.json".into());
        name.push(".lock");
        self.dir().join(name)
    }

    /// Load tables from the file, or empty tables if it does not exist yet
    pub fn load(&self) -> StoreResult<EntryTables> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EntryTables::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(EntryTables::new());
        }
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        EntryTables::restore(snapshot)
    }

    fn write(&self, tables: &EntryTables) -> StoreResult<()> {
        let mut file = tempfile::NamedTempFile::new_in(self.dir())?;
        serde_json::to_writer_pretty(&mut file, &tables.snapshot())?;
        file.persist(&self.path)
            .map_err(|e| StoreError::Persist(e.error.to_string()))?;
        debug!(path = %self.path.display(), entries = tables.len(), "Persisted access entries");
        Ok(())
    }
}

impl Persistence for JsonSnapshot {
    fn commit<T>(
        &self,
        cached: &mut EntryTables,
        op: impl FnOnce(&mut EntryTables) -> StoreResult<T>,
    ) -> StoreResult<T> {
        std::fs::create_dir_all(self.dir())?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;

        // Another process may have committed since our last read
        let current = self.load()?;
        let mut staged = current.clone();
        *cached = current;

        let result = op(&mut staged)?;
        self.write(&staged)?;
        *cached = staged;
        Ok(result)
    }
}

/// Entry store over [`EntryTables`] guarded by a single lock
pub struct TableStore<P> {
    tables: RwLock<EntryTables>,
    persistence: P,
}

/// In-memory entry store
pub type MemoryEntryStore = TableStore<Volatile>;

/// JSON-file-backed entry store
pub type FileEntryStore = TableStore<JsonSnapshot>;

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(EntryTables::new()),
            persistence: Volatile,
        }
    }
}

impl Default for MemoryEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEntryStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let persistence = JsonSnapshot::new(path);
        let tables = persistence.load()?;
        debug!(
            path = %persistence.path().display(),
            entries = tables.len(),
            "Opened access entry store"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            persistence,
        })
    }

    pub fn path(&self) -> &Path {
        self.persistence.path()
    }
}

impl<P: Persistence> TableStore<P> {
    fn read_lock(&self) -> StoreResult<RwLockReadGuard<'_, EntryTables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned {
            context: "entry tables (read)".into(),
        })
    }

    fn write_lock(&self) -> StoreResult<RwLockWriteGuard<'_, EntryTables>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned {
            context: "entry tables (write)".into(),
        })
    }

    /// Apply `op` as one transaction.
    ///
    /// A change is only visible after it was committed, so a failed write
    /// leaves the store unchanged.
    fn transact<T>(&self, op: impl FnOnce(&mut EntryTables) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.write_lock()?;
        self.persistence.commit(&mut *guard, op)
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_lock()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read_lock()?.is_empty())
    }
}

impl<P: Persistence> AccessEntryStore for TableStore<P> {
    fn upsert(
        &self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
    ) -> StoreResult<AccessEntry> {
        self.transact(|tables| Ok(tables.upsert(resource, user, capabilities, Utc::now())))
    }

    fn insert_if_absent(
        &self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
    ) -> StoreResult<Option<AccessEntry>> {
        self.transact(|tables| {
            Ok(tables.insert_if_absent(resource, user, capabilities, Utc::now()))
        })
    }

    fn find(&self, resource: ResourceRef, user: UserId) -> StoreResult<Option<AccessEntry>> {
        Ok(self.read_lock()?.find(resource, user).cloned())
    }

    fn get(&self, id: EntryId) -> StoreResult<Option<AccessEntry>> {
        Ok(self.read_lock()?.get(id).cloned())
    }

    fn set_capabilities(
        &self,
        id: EntryId,
        capabilities: Capabilities,
    ) -> StoreResult<AccessEntry> {
        self.transact(|tables| tables.set_capabilities(id, capabilities, Utc::now()))
    }

    fn list_for_resource(&self, resource: ResourceRef) -> StoreResult<Vec<AccessEntry>> {
        Ok(self.read_lock()?.list_for_resource(resource))
    }

    fn list_for_user(&self, user: UserId) -> StoreResult<Vec<AccessEntry>> {
        Ok(self.read_lock()?.list_for_user(user))
    }

    fn delete_one(&self, id: EntryId) -> StoreResult<AccessEntry> {
        self.transact(|tables| tables.delete_one(id))
    }

    fn delete_all_for_resource(&self, resource: ResourceRef) -> StoreResult<usize> {
        self.transact(|tables| Ok(tables.delete_all_for_resource(resource)))
    }

    fn delete_all_for_resources(&self, resources: &[ResourceRef]) -> StoreResult<usize> {
        self.transact(|tables| {
            Ok(resources
                .iter()
                .map(|resource| tables.delete_all_for_resource(*resource))
                .sum::<usize>())
        })
    }

    fn delete_all_for_user(&self, user: UserId) -> StoreResult<usize> {
        self.transact(|tables| Ok(tables.delete_all_for_user(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_upsert_and_find() {
        let store = MemoryEntryStore::new();
        let entry = store
            .upsert(ResourceRef::project(1), UserId(2), Capabilities::DEPLOY)
            .unwrap();
        let found = store.find(ResourceRef::project(1), UserId(2)).unwrap().unwrap();
        assert_eq!(entry, found);
        assert_eq!(found.level().to_string(), "deploy");
        assert!(store.find(ResourceRef::project(1), UserId(3)).unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let store = MemoryEntryStore::new();
        store
            .upsert(ResourceRef::project(1), UserId(2), Capabilities::VIEW_ONLY)
            .unwrap();
        let inserted = store
            .insert_if_absent(ResourceRef::project(1), UserId(2), Capabilities::FULL_ACCESS)
            .unwrap();
        assert!(inserted.is_none());
        assert_eq!(
            store.find(ResourceRef::project(1), UserId(2)).unwrap().unwrap().capabilities,
            Capabilities::VIEW_ONLY
        );
    }

    #[test]
    fn test_set_capabilities_on_missing_entry() {
        let store = MemoryEntryStore::new();
        let err = store
            .set_capabilities(EntryId(99), Capabilities::FULL_ACCESS)
            .unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound(EntryId(99))));
    }

    #[test]
    fn test_json_snapshot_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = JsonSnapshot::new(dir.path().join("nope.json"));
        assert!(snapshot.load().unwrap().is_empty());
    }
}
