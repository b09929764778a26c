//! Explicit cascade cleanup of access entries
//!
//! Deletion workflows call these steps before removing a resource or user,
//! so that no access entry outlives what it refers to.

use crate::access_control::types::{ResourceRef, UserId};
use crate::directory::SharedResolver;
use crate::error::PermissionResult;
use crate::store::SharedStore;
use serde::Serialize;
use tracing::{info, instrument};

/// What a resource cleanup removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// The deleted resource followed by everything nested below it
    pub resources: Vec<ResourceRef>,
    /// Access entries removed across all of them
    pub entries_removed: usize,
}

/// Removes access entries for deleted resources and users
pub struct CascadeCleanup {
    store: SharedStore,
    resolver: SharedResolver,
}

impl CascadeCleanup {
    pub fn new(store: SharedStore, resolver: SharedResolver) -> Self {
        Self { store, resolver }
    }

    /// Remove entries for `resource` and every resource nested below it.
    ///
    /// Must run while the resource is still resolvable. The removal is one
    /// store transaction: on error no entry was removed and the call can be
    /// repeated.
    #[instrument(skip(self), fields(resource = %resource))]
    pub fn resource_deleted(&self, resource: ResourceRef) -> PermissionResult<CleanupReport> {
        let mut resources = vec![resource];
        resources.extend(self.resolver.descendants(resource)?);

        let targets: Vec<ResourceRef> = resources
            .iter()
            .copied()
            .filter(|r| r.resource_type.has_access_entries())
            .collect();
        let entries_removed = self.store.delete_all_for_resources(&targets)?;

        info!(
            resources = resources.len(),
            entries_removed, "Cleaned up access entries for deleted resource"
        );
        Ok(CleanupReport {
            resources,
            entries_removed,
        })
    }

    /// Remove every entry held by `user`
    #[instrument(skip(self), fields(user = %user))]
    pub fn user_deleted(&self, user: UserId) -> PermissionResult<usize> {
        let removed = self.store.delete_all_for_user(user)?;
        info!(entries_removed = removed, "Cleaned up access entries for deleted user");
        Ok(removed)
    }
}
