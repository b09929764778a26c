//! Access management for authorized callers
//!
//! [`AccessManager`] is what an access-management page talks to. Every
//! operation first checks that the acting principal may manage access on the
//! target resource (`update` on it), then delegates to the engine.
//!
//! The manager also refuses changes that would remove the actor's own ability
//! to manage the resource through their entry.

use crate::access_control::capabilities::{Capabilities, PermissionLevel};
use crate::access_control::engine::{BulkGrantReport, PermissionEngine};
use crate::access_control::gateway::Gateways;
use crate::access_control::types::{Action, EntryId, Principal, ResourceRef, UserId};
use crate::directory::TeamMember;
use crate::error::{AccessDeniedError, PermissionError, Result};
use crate::store::AccessEntry;
use std::sync::Arc;
use tracing::debug;

/// Authorizing facade over the engine's mutations
#[derive(Clone)]
pub struct AccessManager {
    engine: Arc<PermissionEngine>,
    gateways: Gateways,
}

impl AccessManager {
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        let gateways = Gateways::new(Arc::clone(&engine));
        Self { engine, gateways }
    }

    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    fn authorize(&self, actor: &Principal, resource: ResourceRef) -> Result<()> {
        let verdict = self
            .gateways
            .for_type(resource.resource_type)
            .can_manage_access(actor, resource.id)?;
        debug!(
            actor = %actor.id,
            resource = %resource,
            verdict = %verdict,
            "Checked access management permission"
        );
        if verdict.is_allowed() {
            Ok(())
        } else {
            Err(AccessDeniedError::manage_access(resource).into())
        }
    }

    /// Load an entry and make sure it belongs to `resource`
    fn entry_on(&self, resource: ResourceRef, id: EntryId) -> Result<AccessEntry> {
        let entry = self.engine.entry(id)?;
        if entry.resource != resource {
            return Err(PermissionError::EntryNotFound(id).into());
        }
        Ok(entry)
    }

    /// Reject a change that leaves the actor without `manage` when `entry`
    /// is the actor's own entry and is where their management permission
    /// comes from
    fn guard_self_lockout(
        &self,
        actor: &Principal,
        resource: ResourceRef,
        entry: &AccessEntry,
        remaining: Capabilities,
    ) -> Result<()> {
        if entry.user != actor.id
            || !entry.capabilities.manage
            || remaining.manage
            || !self.engine.is_enabled()
        {
            return Ok(());
        }
        if actor.is_global_admin
            || actor.is_instance_admin()
            || self.engine.has_role_bypass(actor, resource)?
        {
            return Ok(());
        }
        Err(AccessDeniedError::self_lockout(resource).into())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Entries on the resource. Requires `view` on it.
    pub fn list_access(
        &self,
        actor: &Principal,
        resource: ResourceRef,
    ) -> Result<Vec<AccessEntry>> {
        self.engine.require(actor, Action::View, resource)?;
        Ok(self.engine.list_access(resource)?)
    }

    /// Team members that could be granted access
    pub fn eligible_members(
        &self,
        actor: &Principal,
        resource: ResourceRef,
    ) -> Result<Vec<TeamMember>> {
        self.authorize(actor, resource)?;
        Ok(self.engine.eligible_members(resource)?)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn grant(
        &self,
        actor: &Principal,
        resource: ResourceRef,
        user: UserId,
        level: &str,
    ) -> Result<AccessEntry> {
        let level = PermissionLevel::try_parse(level)?;
        self.authorize(actor, resource)?;
        // A new entry on a nested resource shadows the one inherited from above
        if user == actor.id
            && let Some(current) = self.engine.effective_entry_for(user, resource)?
        {
            self.guard_self_lockout(actor, resource, &current, level.capabilities())?;
        }
        Ok(self.engine.grant_level(user, resource, level)?)
    }

    pub fn update_level(
        &self,
        actor: &Principal,
        resource: ResourceRef,
        entry: EntryId,
        level: &str,
    ) -> Result<AccessEntry> {
        let level = PermissionLevel::try_parse(level)?;
        self.authorize(actor, resource)?;
        let existing = self.entry_on(resource, entry)?;
        self.guard_self_lockout(actor, resource, &existing, level.capabilities())?;
        Ok(self.engine.set_permissions(entry, level.as_str())?)
    }

    pub fn update_capabilities(
        &self,
        actor: &Principal,
        resource: ResourceRef,
        entry: EntryId,
        capabilities: Capabilities,
    ) -> Result<AccessEntry> {
        self.authorize(actor, resource)?;
        let existing = self.entry_on(resource, entry)?;
        self.guard_self_lockout(actor, resource, &existing, capabilities)?;
        Ok(self.engine.set_capabilities(entry, capabilities)?)
    }

    pub fn revoke(
        &self,
        actor: &Principal,
        resource: ResourceRef,
        entry: EntryId,
    ) -> Result<AccessEntry> {
        self.authorize(actor, resource)?;
        let existing = self.entry_on(resource, entry)?;
        self.guard_self_lockout(actor, resource, &existing, Capabilities::NONE)?;
        Ok(self.engine.revoke_access(entry)?)
    }

    pub fn grant_full_access_to_all(
        &self,
        actor: &Principal,
        resource: ResourceRef,
    ) -> Result<BulkGrantReport> {
        self.authorize(actor, resource)?;
        Ok(self.engine.grant_full_access_to_all(resource)?)
    }

    pub fn revoke_all(&self, actor: &Principal, resource: ResourceRef) -> Result<usize> {
        self.authorize(actor, resource)?;
        if let Some(own) = self.engine.store().find(resource, actor.id)? {
            self.guard_self_lockout(actor, resource, &own, Capabilities::NONE)?;
        }
        Ok(self.engine.revoke_all_for_resource(resource)?)
    }
}
