//! Access entry store tests
//!
//! Both backends: the in-memory store and the JSON-file store, including
//! persistence across reopen and concurrent writers.

use access_warden::access_control::{Capabilities, EntryId, LevelMatch, ResourceRef, UserId};
use access_warden::error::StoreError;
use access_warden::store::{AccessEntryStore, FileEntryStore, MemoryEntryStore, SharedStore};
use rstest::rstest;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn memory() -> SharedStore {
    Arc::new(MemoryEntryStore::new())
}

fn file() -> (SharedStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = FileEntryStore::open(dir.path().join("entries.json")).unwrap();
    (Arc::new(store), dir)
}

// =============================================================================
// Behavior shared by both backends
// =============================================================================

mod shared {
    use super::*;

    fn backends() -> Vec<(SharedStore, Option<tempfile::TempDir>)> {
        let (store, dir) = file();
        vec![(memory(), None), (store, Some(dir))]
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        for (store, _dir) in backends() {
            let project = ResourceRef::project(1);
            let first = store.upsert(project, UserId(7), Capabilities::VIEW_ONLY).unwrap();
            let second = store.upsert(project, UserId(7), Capabilities::DEPLOY).unwrap();

            assert_eq!(first.id, second.id);
            assert_eq!(first.created_at, second.created_at);
            assert!(second.updated_at >= first.updated_at);
            assert_eq!(store.list_for_resource(project).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_entry_ids_unique_across_types() {
        for (store, _dir) in backends() {
            let a = store
                .upsert(ResourceRef::project(1), UserId(7), Capabilities::DEPLOY)
                .unwrap();
            let b = store
                .upsert(ResourceRef::environment(1), UserId(7), Capabilities::DEPLOY)
                .unwrap();
            assert_ne!(a.id, b.id);
            assert_eq!(store.get(b.id).unwrap().unwrap().resource, ResourceRef::environment(1));
        }
    }

    #[test]
    fn test_delete_one_missing_entry() {
        for (store, _dir) in backends() {
            assert!(matches!(
                store.delete_one(EntryId(42)),
                Err(StoreError::EntryNotFound(EntryId(42)))
            ));
        }
    }

    #[test]
    fn test_scoped_revoke() {
        for (store, _dir) in backends() {
            let p = ResourceRef::project(1);
            let q = ResourceRef::project(2);
            for user in 1..=3 {
                store.upsert(p, UserId(user), Capabilities::DEPLOY).unwrap();
                store.upsert(q, UserId(user), Capabilities::DEPLOY).unwrap();
            }

            assert_eq!(store.delete_all_for_resource(p).unwrap(), 3);
            assert!(store.list_for_resource(p).unwrap().is_empty());
            assert_eq!(store.list_for_resource(q).unwrap().len(), 3);
            assert_eq!(store.delete_all_for_resource(p).unwrap(), 0);
        }
    }

    #[test]
    fn test_delete_for_several_resources() {
        for (store, _dir) in backends() {
            let keep = ResourceRef::project(2);
            for r in [ResourceRef::project(1), ResourceRef::environment(1), keep] {
                store.upsert(r, UserId(7), Capabilities::DEPLOY).unwrap();
            }

            let removed = store
                .delete_all_for_resources(&[ResourceRef::project(1), ResourceRef::environment(1)])
                .unwrap();
            assert_eq!(removed, 2);
            assert_eq!(store.list_for_user(UserId(7)).unwrap().len(), 1);
            assert!(store.find(keep, UserId(7)).unwrap().is_some());
        }
    }

    #[test]
    fn test_list_for_user_spans_types() {
        for (store, _dir) in backends() {
            store
                .upsert(ResourceRef::project(1), UserId(7), Capabilities::DEPLOY)
                .unwrap();
            store
                .upsert(ResourceRef::service(9), UserId(7), Capabilities::VIEW_ONLY)
                .unwrap();
            store
                .upsert(ResourceRef::service(9), UserId(8), Capabilities::VIEW_ONLY)
                .unwrap();

            let resources: Vec<ResourceRef> = store
                .list_for_user(UserId(7))
                .unwrap()
                .into_iter()
                .map(|e| e.resource)
                .collect();
            assert_eq!(resources, vec![ResourceRef::project(1), ResourceRef::service(9)]);

            assert_eq!(store.delete_all_for_user(UserId(7)).unwrap(), 2);
            assert_eq!(store.list_for_resource(ResourceRef::service(9)).unwrap().len(), 1);
        }
    }

    #[rstest]
    #[case(Capabilities::VIEW_ONLY, "view_only")]
    #[case(Capabilities::DEPLOY, "deploy")]
    #[case(Capabilities::FULL_ACCESS, "full_access")]
    #[case(Capabilities::new(true, false, true, false), "custom")]
    #[case(Capabilities::NONE, "custom")]
    fn test_stored_level_classification(#[case] caps: Capabilities, #[case] expected: &str) {
        let store = memory();
        let entry = store.upsert(ResourceRef::project(1), UserId(1), caps).unwrap();
        assert_eq!(entry.level().as_str(), expected);
    }
}

// =============================================================================
// File backend
// =============================================================================

mod file_backend {
    use super::*;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let (kept, removed) = {
            let store = FileEntryStore::open(&path).unwrap();
            let kept = store
                .upsert(ResourceRef::database(3), UserId(1), Capabilities::DEPLOY)
                .unwrap();
            let removed = store
                .upsert(ResourceRef::database(3), UserId(2), Capabilities::VIEW_ONLY)
                .unwrap();
            store.delete_one(removed.id).unwrap();
            (kept, removed)
        };

        let reopened = FileEntryStore::open(&path).unwrap();
        assert_eq!(reopened.get(kept.id).unwrap(), Some(kept.clone()));
        assert!(reopened.get(removed.id).unwrap().is_none());

        // Ids keep increasing after reopen
        let next = reopened
            .upsert(ResourceRef::database(3), UserId(3), Capabilities::DEPLOY)
            .unwrap();
        assert!(next.id > removed.id);
    }

    #[test]
    fn test_custom_capabilities_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let custom = Capabilities::new(false, true, false, true);
        {
            let store = FileEntryStore::open(&path).unwrap();
            store.upsert(ResourceRef::project(5), UserId(1), custom).unwrap();
        }
        let reopened = FileEntryStore::open(&path).unwrap();
        let entry = reopened
            .find(ResourceRef::project(5), UserId(1))
            .unwrap()
            .unwrap();
        assert_eq!(entry.capabilities, custom);
        assert_eq!(entry.level(), LevelMatch::Custom);
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("entries.json");
        let store = FileEntryStore::open(&path).unwrap();
        store
            .upsert(ResourceRef::project(1), UserId(1), Capabilities::DEPLOY)
            .unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_two_stores_on_one_file_keep_both_grants() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let a = FileEntryStore::open(&path).unwrap();
        let b = FileEntryStore::open(&path).unwrap();
        let project = ResourceRef::project(10);

        let first = a.upsert(project, UserId(2), Capabilities::FULL_ACCESS).unwrap();
        let second = b.upsert(project, UserId(3), Capabilities::VIEW_ONLY).unwrap();
        assert_ne!(first.id, second.id);

        let reopened = FileEntryStore::open(&path).unwrap();
        let on_disk: Vec<(EntryId, UserId)> = reopened
            .list_for_resource(project)
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.user))
            .collect();
        assert_eq!(on_disk, vec![(first.id, UserId(2)), (second.id, UserId(3))]);
    }

    #[test]
    fn test_mutation_sees_other_store_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let a = FileEntryStore::open(&path).unwrap();
        let b = FileEntryStore::open(&path).unwrap();
        let project = ResourceRef::project(10);

        let entry = a.upsert(project, UserId(2), Capabilities::DEPLOY).unwrap();
        // `b` opened before the grant and still revokes it by id
        let removed = b.delete_one(entry.id).unwrap();
        assert_eq!(removed.user, UserId(2));

        // Same key from both sides converges to the last committed value
        a.upsert(project, UserId(4), Capabilities::DEPLOY).unwrap();
        b.upsert(project, UserId(4), Capabilities::FULL_ACCESS).unwrap();
        let reopened = FileEntryStore::open(&path).unwrap();
        let entries = reopened.list_for_resource(project).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].capabilities, Capabilities::FULL_ACCESS);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileEntryStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_failed_persist_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("entries.json");
        let store = FileEntryStore::open(&path).unwrap();
        store
            .upsert(ResourceRef::project(1), UserId(1), Capabilities::DEPLOY)
            .unwrap();

        // Replace the parent directory with a file so the next write fails
        fs::remove_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub"), "blocker").unwrap();

        assert!(
            store
                .upsert(ResourceRef::project(1), UserId(2), Capabilities::DEPLOY)
                .is_err()
        );
        assert!(store.find(ResourceRef::project(1), UserId(2)).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_upserts_converge_to_one_entry() {
        let store = Arc::new(MemoryEntryStore::new());
        let project = ResourceRef::project(1);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let caps = if i % 2 == 0 {
                        Capabilities::DEPLOY
                    } else {
                        Capabilities::FULL_ACCESS
                    };
                    for _ in 0..50 {
                        store.upsert(project, UserId(9), caps).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = store.list_for_resource(project).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(
            entries[0].capabilities == Capabilities::DEPLOY
                || entries[0].capabilities == Capabilities::FULL_ACCESS
        );
    }

    #[test]
    fn test_separate_file_stores_in_parallel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let project = ResourceRef::project(1);

        let handles: Vec<_> = (0..4)
            .map(|user| {
                let path = path.clone();
                thread::spawn(move || {
                    let store = FileEntryStore::open(&path).unwrap();
                    store
                        .upsert(project, UserId(user), Capabilities::VIEW_ONLY)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = FileEntryStore::open(&path).unwrap();
        let mut ids: Vec<EntryId> = reopened
            .list_for_resource(project)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids.len(), 4);
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_concurrent_file_upserts_for_distinct_users() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let store = Arc::new(FileEntryStore::open(&path).unwrap());
        let project = ResourceRef::project(1);

        let handles: Vec<_> = (0..4)
            .map(|user| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .upsert(project, UserId(user), Capabilities::VIEW_ONLY)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = FileEntryStore::open(&path).unwrap();
        assert_eq!(reopened.list_for_resource(project).unwrap().len(), 4);
    }
}
