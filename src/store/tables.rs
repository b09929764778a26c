//! Entry tables and their indexes
//!
//! One table per resource type. Each table keeps rows ordered by entry id
//! (ids are allocated monotonically, so id order is creation order), a unique
//! index on `(resource_id, user_id)` and secondary indexes on resource and user.

use crate::access_control::capabilities::Capabilities;
use crate::access_control::types::{EntryId, ResourceId, ResourceRef, ResourceType, UserId};
use crate::error::{StoreError, StoreResult};
use crate::store::AccessEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
struct EntryTable {
    rows: BTreeMap<EntryId, AccessEntry>,
    unique: HashMap<(ResourceId, UserId), EntryId>,
    by_resource: HashMap<ResourceId, BTreeSet<EntryId>>,
    by_user: HashMap<UserId, BTreeSet<EntryId>>,
}

impl EntryTable {
    fn insert(&mut self, entry: AccessEntry) {
        let id = entry.id;
        self.unique.insert((entry.resource.id, entry.user), id);
        self.by_resource
            .entry(entry.resource.id)
            .or_default()
            .insert(id);
        self.by_user.entry(entry.user).or_default().insert(id);
        self.rows.insert(id, entry);
    }

    fn remove(&mut self, id: EntryId) -> Option<AccessEntry> {
        let entry = self.rows.remove(&id)?;
        self.unique.remove(&(entry.resource.id, entry.user));
        if let Some(ids) = self.by_resource.get_mut(&entry.resource.id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_resource.remove(&entry.resource.id);
            }
        }
        if let Some(ids) = self.by_user.get_mut(&entry.user) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_user.remove(&entry.user);
            }
        }
        Some(entry)
    }

    fn find(&self, resource_id: ResourceId, user: UserId) -> Option<&AccessEntry> {
        self.unique
            .get(&(resource_id, user))
            .and_then(|id| self.rows.get(id))
    }
}

/// All entry tables plus the id allocator
#[derive(Debug, Clone, Default)]
pub struct EntryTables {
    next_id: u64,
    tables: HashMap<ResourceType, EntryTable>,
    locator: HashMap<EntryId, ResourceType>,
}

impl EntryTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> EntryId {
        self.next_id += 1;
        EntryId(self.next_id)
    }

    fn table(&self, resource_type: ResourceType) -> Option<&EntryTable> {
        self.tables.get(&resource_type)
    }

    fn table_mut(&mut self, resource_type: ResourceType) -> &mut EntryTable {
        self.tables.entry(resource_type).or_default()
    }

    /// Create the unique entry for `(resource, user)` or overwrite its capabilities
    pub fn upsert(
        &mut self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> AccessEntry {
        let existing = self
            .table(resource.resource_type)
            .and_then(|t| t.unique.get(&(resource.id, user)))
            .copied();

        if let Some(id) = existing
            && let Some(entry) = self.table_mut(resource.resource_type).rows.get_mut(&id)
        {
            entry.capabilities = capabilities;
            entry.updated_at = now;
            return entry.clone();
        }

        let id = self.allocate_id();
        let entry = AccessEntry {
            id,
            resource,
            user,
            capabilities,
            created_at: now,
            updated_at: now,
        };
        self.table_mut(resource.resource_type).insert(entry.clone());
        self.locator.insert(id, resource.resource_type);
        entry
    }

    /// Create the entry only if none exists for `(resource, user)`
    pub fn insert_if_absent(
        &mut self,
        resource: ResourceRef,
        user: UserId,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> Option<AccessEntry> {
        if self.find(resource, user).is_some() {
            return None;
        }
        Some(self.upsert(resource, user, capabilities, now))
    }

    pub fn find(&self, resource: ResourceRef, user: UserId) -> Option<&AccessEntry> {
        self.table(resource.resource_type)
            .and_then(|t| t.find(resource.id, user))
    }

    pub fn get(&self, id: EntryId) -> Option<&AccessEntry> {
        let resource_type = self.locator.get(&id)?;
        self.table(*resource_type).and_then(|t| t.rows.get(&id))
    }

    pub fn set_capabilities(
        &mut self,
        id: EntryId,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> StoreResult<AccessEntry> {
        let resource_type = *self
            .locator
            .get(&id)
            .ok_or(StoreError::EntryNotFound(id))?;
        let entry = self
            .table_mut(resource_type)
            .rows
            .get_mut(&id)
            .ok_or(StoreError::EntryNotFound(id))?;
        entry.capabilities = capabilities;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// Entries for one resource in creation order
    pub fn list_for_resource(&self, resource: ResourceRef) -> Vec<AccessEntry> {
        let Some(table) = self.table(resource.resource_type) else {
            return Vec::new();
        };
        table
            .by_resource
            .get(&resource.id)
            .map(|ids| ids.iter().filter_map(|id| table.rows.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Entries held by one user across all tables, in creation order
    pub fn list_for_user(&self, user: UserId) -> Vec<AccessEntry> {
        let mut entries: Vec<AccessEntry> = self
            .tables
            .values()
            .filter_map(|table| {
                table
                    .by_user
                    .get(&user)
                    .map(|ids| ids.iter().filter_map(|id| table.rows.get(id)).cloned())
            })
            .flatten()
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn delete_one(&mut self, id: EntryId) -> StoreResult<AccessEntry> {
        let resource_type = self
            .locator
            .remove(&id)
            .ok_or(StoreError::EntryNotFound(id))?;
        self.table_mut(resource_type)
            .remove(id)
            .ok_or(StoreError::EntryNotFound(id))
    }

    pub fn delete_all_for_resource(&mut self, resource: ResourceRef) -> usize {
        let ids: Vec<EntryId> = self
            .table(resource.resource_type)
            .and_then(|t| t.by_resource.get(&resource.id))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        self.remove_all(resource.resource_type, &ids)
    }

    pub fn delete_all_for_user(&mut self, user: UserId) -> usize {
        let targets: Vec<(ResourceType, Vec<EntryId>)> = self
            .tables
            .iter()
            .filter_map(|(resource_type, table)| {
                table
                    .by_user
                    .get(&user)
                    .map(|ids| (*resource_type, ids.iter().copied().collect()))
            })
            .collect();
        targets
            .into_iter()
            .map(|(resource_type, ids)| self.remove_all(resource_type, &ids))
            .sum()
    }

    fn remove_all(&mut self, resource_type: ResourceType, ids: &[EntryId]) -> usize {
        let table = self.table_mut(resource_type);
        let removed = ids.iter().filter(|id| table.remove(**id).is_some()).count();
        for id in ids {
            self.locator.remove(id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locator.is_empty()
    }

    /// Serializable form: one row list per resource type
    pub fn snapshot(&self) -> Snapshot {
        let mut tables = BTreeMap::new();
        for (resource_type, table) in &self.tables {
            if table.rows.is_empty() {
                continue;
            }
            let rows = table.rows.values().map(PersistedRow::from).collect();
            tables.insert(*resource_type, rows);
        }
        Snapshot {
            next_id: self.next_id,
            tables,
        }
    }

    /// Rebuild tables and indexes from a snapshot
    pub fn restore(snapshot: Snapshot) -> StoreResult<Self> {
        let mut tables = Self {
            next_id: snapshot.next_id,
            ..Self::default()
        };
        for (resource_type, rows) in snapshot.tables {
            for row in rows {
                let entry = row.into_entry(resource_type);
                if tables.locator.contains_key(&entry.id)
                    || tables.find(entry.resource, entry.user).is_some()
                {
                    return Err(StoreError::Persist(format!(
                        "duplicate access entry {} for user {} on {}",
                        entry.id, entry.user, entry.resource
                    )));
                }
                tables.next_id = tables.next_id.max(entry.id.0);
                tables.locator.insert(entry.id, resource_type);
                tables.table_mut(resource_type).insert(entry);
            }
        }
        Ok(tables)
    }
}

/// On-disk layout of the entry tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub tables: BTreeMap<ResourceType, Vec<PersistedRow>>,
}

/// One persisted row: `(id, resource_id, user_id, capabilities, created_at, updated_at)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRow {
    pub id: EntryId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedRow {
    fn into_entry(self, resource_type: ResourceType) -> AccessEntry {
        AccessEntry {
            id: self.id,
            resource: ResourceRef::new(resource_type, self.resource_id),
            user: self.user_id,
            capabilities: self.capabilities,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<&AccessEntry> for PersistedRow {
    fn from(entry: &AccessEntry) -> Self {
        Self {
            id: entry.id,
            resource_id: entry.resource.id,
            user_id: entry.user,
            capabilities: entry.capabilities,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_upsert_keeps_id_and_created_at() {
        let mut tables = EntryTables::new();
        let first =
            tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        let second = tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::DEPLOY, now());

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.capabilities, Capabilities::DEPLOY);
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn test_same_id_different_type_are_distinct() {
        let mut tables = EntryTables::new();
        tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        tables.upsert(ResourceRef::environment(1), UserId(7), Capabilities::DEPLOY, now());

        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables.find(ResourceRef::environment(1), UserId(7)).unwrap().capabilities,
            Capabilities::DEPLOY
        );
    }

    #[test]
    fn test_list_for_resource_is_insertion_ordered() {
        let mut tables = EntryTables::new();
        for user in [9, 3, 5] {
            tables.upsert(ResourceRef::project(1), UserId(user), Capabilities::VIEW_ONLY, now());
        }
        let users: Vec<u64> = tables
            .list_for_resource(ResourceRef::project(1))
            .iter()
            .map(|e| e.user.0)
            .collect();
        assert_eq!(users, vec![9, 3, 5]);
    }

    #[test]
    fn test_delete_clears_indexes() {
        let mut tables = EntryTables::new();
        let entry =
            tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        tables.delete_one(entry.id).unwrap();

        assert!(tables.find(ResourceRef::project(1), UserId(7)).is_none());
        assert!(tables.get(entry.id).is_none());
        assert!(tables.list_for_user(UserId(7)).is_empty());
        assert!(matches!(tables.delete_one(entry.id), Err(StoreError::EntryNotFound(_))));

        // Re-granting allocates a fresh id
        let again =
            tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        assert_ne!(again.id, entry.id);
    }

    #[test]
    fn test_delete_all_for_user_spans_tables() {
        let mut tables = EntryTables::new();
        tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        tables.upsert(ResourceRef::application(4), UserId(7), Capabilities::DEPLOY, now());
        tables.upsert(ResourceRef::project(1), UserId(8), Capabilities::DEPLOY, now());

        assert_eq!(tables.delete_all_for_user(UserId(7)), 2);
        assert_eq!(tables.len(), 1);
        assert!(tables.find(ResourceRef::project(1), UserId(8)).is_some());
    }

    #[test]
    fn test_snapshot_restore_rebuilds_indexes() {
        let mut tables = EntryTables::new();
        tables.upsert(ResourceRef::project(1), UserId(7), Capabilities::VIEW_ONLY, now());
        let env =
            tables.upsert(ResourceRef::environment(2), UserId(8), Capabilities::DEPLOY, now());

        let json = serde_json::to_string(&tables.snapshot()).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&json).unwrap();
        let mut restored = EntryTables::restore(snapshot).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(env.id).unwrap().user, UserId(8));
        let fresh = restored.upsert(ResourceRef::project(3), UserId(1), Capabilities::NONE, now());
        assert!(fresh.id > env.id);
    }

    #[test]
    fn test_restore_rejects_duplicate_keys() {
        let row = |id| PersistedRow {
            id: EntryId(id),
            resource_id: ResourceId(1),
            user_id: UserId(1),
            capabilities: Capabilities::VIEW_ONLY,
            created_at: now(),
            updated_at: now(),
        };
        let mut snapshot = Snapshot::default();
        snapshot
            .tables
            .insert(ResourceType::Project, vec![row(1), row(2)]);
        assert!(EntryTables::restore(snapshot).is_err());
    }
}
