//! Permission engine
//!
//! Decides allow/deny for `(principal, action, resource)` with the following
//! precedence, stopping at the first step that decides:
//!
//! 1. Feature flag disabled → allow
//! 2. Global admin or instance admin → allow
//! 3. Owner or admin of the resource's owning team → allow
//! 4. Resource types without entry tables (servers) → deny
//! 5. Most specific access entry (resource, then environment, then project):
//!    allow iff it holds the capability the action requires; no entry → deny
//!
//! Evaluation never writes. Mutations (grant, revoke, bulk variants) go
//! straight to the entry store; callers authorize them beforehand.

use crate::access_control::capabilities::{Capabilities, PermissionLevel};
use crate::access_control::flag::SharedFlag;
use crate::access_control::types::{
    Action, EntryId, Principal, ResourceRef, ResourceType, TeamId, TeamRole, UserId,
};
use crate::directory::{ResolvedResource, SharedPrincipals, SharedResolver, TeamMember};
use crate::error::{AccessDeniedError, PermissionError, PermissionResult};
use crate::store::{AccessEntry, SharedStore};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, instrument, trace, warn};

/// Why a verdict came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictReason {
    /// Granular access control is off
    FlagDisabled,
    /// Instance-wide administrator
    GlobalAdmin,
    /// Owner or admin of the owning team
    RoleBypass,
    /// Decided by an access entry
    ExplicitEntry,
    /// No applicable access entry
    NoEntry,
    /// Listing and creation, which are never gated
    Ungated,
}

impl VerdictReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VerdictReason::FlagDisabled => "flag-disabled",
            VerdictReason::GlobalAdmin => "global-admin",
            VerdictReason::RoleBypass => "role-bypass",
            VerdictReason::ExplicitEntry => "explicit-entry",
            VerdictReason::NoEntry => "no-entry",
            VerdictReason::Ungated => "ungated",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: VerdictReason,
}

impl Verdict {
    pub const fn allow(reason: VerdictReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub const fn deny(reason: VerdictReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.allowed { "allow" } else { "deny" };
        write!(f, "{} ({})", outcome, self.reason)
    }
}

/// Outcome of [`PermissionEngine::grant_full_access_to_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkGrantReport {
    /// Members that now hold `full_access`
    pub granted: Vec<UserId>,
    /// Owners and admins, who need no entry
    pub skipped: Vec<UserId>,
}

/// Ancestors checked for an entry: environment, then project
const MAX_ANCESTORS: usize = 2;

/// The permission engine
pub struct PermissionEngine {
    flag: SharedFlag,
    store: SharedStore,
    principals: SharedPrincipals,
    resolver: SharedResolver,
}

impl PermissionEngine {
    pub fn new(
        flag: SharedFlag,
        store: SharedStore,
        principals: SharedPrincipals,
        resolver: SharedResolver,
    ) -> Self {
        Self {
            flag,
            store,
            principals,
            resolver,
        }
    }

    /// Whether granular access control is currently on
    pub fn is_enabled(&self) -> bool {
        self.flag.is_enabled()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn principals(&self) -> &SharedPrincipals {
        &self.principals
    }

    pub fn resolver(&self) -> &SharedResolver {
        &self.resolver
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Decide whether `principal` may perform `action` on `resource`.
    ///
    /// Operational failures (unknown resource, storage errors) are returned as
    /// errors, never as a deny verdict.
    pub fn evaluate(
        &self,
        principal: &Principal,
        action: Action,
        resource: ResourceRef,
    ) -> PermissionResult<Verdict> {
        debug!(
            user = %principal.id,
            action = %action,
            resource = %resource,
            "Evaluating access"
        );

        // 1. Feature flag
        if !self.flag.is_enabled() {
            trace!("Granular permissions disabled");
            return Ok(Verdict::allow(VerdictReason::FlagDisabled));
        }

        // 2. Instance-wide override
        if principal.is_global_admin || principal.is_instance_admin() {
            trace!("Global admin override");
            return Ok(Verdict::allow(VerdictReason::GlobalAdmin));
        }

        // 3. Team role bypass
        let resolved = self.resolver.resolve(resource)?;
        if let Some(role) = principal.role_in(resolved.owning_team)
            && role.bypasses_access_control()
        {
            trace!(role = %role, team = %resolved.owning_team, "Team role bypass");
            return Ok(Verdict::allow(VerdictReason::RoleBypass));
        }

        // 4. Team-scoped resources have no entries
        if !resource.resource_type.has_access_entries() {
            trace!("No per-resource entries for this resource type");
            return Ok(Verdict::deny(VerdictReason::NoEntry));
        }

        // 5. Access entry
        match self.effective_entry(principal.id, &resolved)? {
            Some(entry) => {
                let capability = action.required_capability();
                let allowed = entry.allows(capability);
                trace!(
                    entry = %entry.id,
                    on = %entry.resource,
                    capability = %capability,
                    allowed,
                    "Matched access entry"
                );
                Ok(Verdict {
                    allowed,
                    reason: VerdictReason::ExplicitEntry,
                })
            }
            None => {
                trace!("No access entry");
                Ok(Verdict::deny(VerdictReason::NoEntry))
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate) for an action given by name.
    ///
    /// Unknown action names fail with `UnsupportedAction` regardless of the flag.
    pub fn evaluate_named(
        &self,
        principal: &Principal,
        action: &str,
        resource: ResourceRef,
    ) -> PermissionResult<Verdict> {
        let action = Action::try_parse(action)?;
        self.evaluate(principal, action, resource)
    }

    /// Evaluate and turn a deny verdict into an error
    pub fn require(
        &self,
        principal: &Principal,
        action: Action,
        resource: ResourceRef,
    ) -> crate::error::Result<()> {
        let verdict = self.evaluate(principal, action, resource)?;
        if verdict.is_allowed() {
            Ok(())
        } else {
            Err(AccessDeniedError::new(action, resource, verdict.reason.as_str()).into())
        }
    }

    /// Whether the principal is owner or admin of the team owning `resource`
    pub fn has_role_bypass(
        &self,
        principal: &Principal,
        resource: ResourceRef,
    ) -> PermissionResult<bool> {
        let resolved = self.resolver.resolve(resource)?;
        Ok(principal
            .role_in(resolved.owning_team)
            .is_some_and(|role| role.bypasses_access_control()))
    }

    /// The entry that decides access for `user` on a resolved resource:
    /// its own entry, else the nearest enclosing environment's or project's
    fn effective_entry(
        &self,
        user: UserId,
        resolved: &ResolvedResource,
    ) -> PermissionResult<Option<AccessEntry>> {
        if let Some(entry) = self.store.find(resolved.resource, user)? {
            return Ok(Some(entry));
        }

        let mut next = resolved.parent;
        for _ in 0..MAX_ANCESTORS {
            let Some(ancestor) = next else {
                break;
            };
            if let Some(entry) = self.store.find(ancestor, user)? {
                return Ok(Some(entry));
            }
            next = self.resolver.resolve(ancestor)?.parent;
        }
        Ok(None)
    }

    /// The entry that would decide access for `user` on `resource`, if any
    pub fn effective_entry_for(
        &self,
        user: UserId,
        resource: ResourceRef,
    ) -> PermissionResult<Option<AccessEntry>> {
        let resolved = self.resolver.resolve(resource)?;
        self.effective_entry(user, &resolved)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn entry(&self, id: EntryId) -> PermissionResult<AccessEntry> {
        self.store
            .get(id)?
            .ok_or(PermissionError::EntryNotFound(id))
    }

    /// Entries on `resource` in creation order
    pub fn list_access(&self, resource: ResourceRef) -> PermissionResult<Vec<AccessEntry>> {
        self.resolver.resolve(resource)?;
        Ok(self.store.list_for_resource(resource)?)
    }

    /// Members of the owning team that have no entry on `resource` yet
    pub fn eligible_members(&self, resource: ResourceRef) -> PermissionResult<Vec<TeamMember>> {
        let team = self.entry_bearing_team(resource)?;
        let entries = self.store.list_for_resource(resource)?;
        Ok(self
            .principals
            .team_members(team)?
            .into_iter()
            .filter(|member| !entries.iter().any(|e| e.user == member.user))
            .collect())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Grant `user` the named `level` on `resource`, creating or overwriting
    /// their entry. The user must belong to the owning team.
    #[instrument(skip(self), fields(user = %user, resource = %resource))]
    pub fn grant_access(
        &self,
        user: UserId,
        resource: ResourceRef,
        level: &str,
    ) -> PermissionResult<AccessEntry> {
        let level = PermissionLevel::try_parse(level)?;
        self.grant_level(user, resource, level)
    }

    /// Typed form of [`grant_access`](Self::grant_access)
    pub fn grant_level(
        &self,
        user: UserId,
        resource: ResourceRef,
        level: PermissionLevel,
    ) -> PermissionResult<AccessEntry> {
        let team = self.entry_bearing_team(resource)?;
        let is_member = self
            .principals
            .team_members(team)?
            .iter()
            .any(|m| m.user == user);
        if !is_member {
            return Err(PermissionError::NotATeamMember { user, team });
        }

        let entry = self.store.upsert(resource, user, level.capabilities())?;
        info!(
            user = %user,
            resource = %resource,
            level = %level,
            entry = %entry.id,
            "Granted access"
        );
        Ok(entry)
    }

    /// Replace an entry's capabilities with the named level
    #[instrument(skip(self), fields(entry = %entry))]
    pub fn set_permissions(&self, entry: EntryId, level: &str) -> PermissionResult<AccessEntry> {
        let level = PermissionLevel::try_parse(level)?;
        let updated = self.store.set_capabilities(entry, level.capabilities())?;
        info!(entry = %entry, level = %level, "Updated access level");
        Ok(updated)
    }

    /// Replace an entry's capabilities with an arbitrary set
    #[instrument(skip(self), fields(entry = %entry))]
    pub fn set_capabilities(
        &self,
        entry: EntryId,
        capabilities: Capabilities,
    ) -> PermissionResult<AccessEntry> {
        let updated = self.store.set_capabilities(entry, capabilities)?;
        info!(entry = %entry, level = %updated.level(), "Updated access capabilities");
        Ok(updated)
    }

    /// Grant `full_access` on `resource` to every member of the owning team
    /// except owners and admins.
    ///
    /// Not atomic across members: if a grant fails, earlier grants stay in
    /// place and the error lists who succeeded and who failed.
    #[instrument(skip(self), fields(resource = %resource))]
    pub fn grant_full_access_to_all(
        &self,
        resource: ResourceRef,
    ) -> PermissionResult<BulkGrantReport> {
        let team = self.entry_bearing_team(resource)?;
        let members = self.principals.team_members(team)?;

        let mut report = BulkGrantReport::default();
        for member in members {
            if member.role.bypasses_access_control() {
                report.skipped.push(member.user);
                continue;
            }
            if let Err(e) = self
                .store
                .upsert(resource, member.user, Capabilities::FULL_ACCESS)
            {
                warn!(
                    failed = %member.user,
                    succeeded = report.granted.len(),
                    error = %e,
                    "Bulk grant stopped part-way"
                );
                return Err(PermissionError::PartialBulkFailure {
                    succeeded: report.granted,
                    failed: member.user,
                    reason: e.to_string(),
                });
            }
            report.granted.push(member.user);
        }

        info!(
            granted = report.granted.len(),
            skipped = report.skipped.len(),
            "Granted full access to team members"
        );
        Ok(report)
    }

    /// Remove one entry
    #[instrument(skip(self), fields(entry = %entry))]
    pub fn revoke_access(&self, entry: EntryId) -> PermissionResult<AccessEntry> {
        let removed = self.store.delete_one(entry)?;
        info!(
            entry = %entry,
            user = %removed.user,
            resource = %removed.resource,
            "Revoked access"
        );
        Ok(removed)
    }

    /// Remove every entry on `resource`. Entries on other resources are untouched.
    #[instrument(skip(self), fields(resource = %resource))]
    pub fn revoke_all_for_resource(&self, resource: ResourceRef) -> PermissionResult<usize> {
        self.entry_bearing_team(resource)?;
        let removed = self.store.delete_all_for_resource(resource)?;
        info!(resource = %resource, removed, "Revoked all access");
        Ok(removed)
    }

    /// Give existing `member`/`viewer` users of `team` full access to every
    /// team project they have no entry for yet. Existing entries are kept.
    ///
    /// Returns the number of entries created.
    #[instrument(skip(self), fields(team = %team))]
    pub fn backfill_team_access(&self, team: TeamId) -> PermissionResult<usize> {
        let members: Vec<TeamMember> = self
            .principals
            .team_members(team)?
            .into_iter()
            .filter(|m| matches!(m.role, TeamRole::Member | TeamRole::Viewer))
            .collect();
        let projects = self
            .resolver
            .resources_of_team(team, ResourceType::Project)?;

        let mut created = 0;
        for member in &members {
            for project in &projects {
                if self
                    .store
                    .insert_if_absent(*project, member.user, Capabilities::FULL_ACCESS)?
                    .is_some()
                {
                    created += 1;
                }
            }
        }

        info!(
            members = members.len(),
            projects = projects.len(),
            created,
            "Backfilled project access for existing members"
        );
        Ok(created)
    }

    /// Resolve `resource`, requiring a type that has entries; returns the owning team
    fn entry_bearing_team(&self, resource: ResourceRef) -> PermissionResult<TeamId> {
        if !resource.resource_type.has_access_entries() {
            return Err(PermissionError::NoAccessEntries(resource.resource_type));
        }
        Ok(self.resolver.resolve(resource)?.owning_team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::capabilities::LevelMatch;
    use crate::access_control::flag::StaticFlag;
    use crate::directory::{Directory, PrincipalProvider};
    use crate::store::MemoryEntryStore;
    use std::sync::Arc;

    fn engine(enabled: bool) -> (PermissionEngine, Arc<Directory>) {
        let directory = Arc::new(
            Directory::new()
                .with_team(1, "Acme")
                .with_user(1, "owner")
                .with_user(2, "member")
                .with_member(1, 1, TeamRole::Owner)
                .with_member(1, 2, TeamRole::Member)
                .with_project(10, 1, "shop")
                .with_environment(20, 10, "prod")
                .with_instance(ResourceRef::application(30), 20, "web"),
        );
        let engine = PermissionEngine::new(
            Arc::new(StaticFlag(enabled)),
            Arc::new(MemoryEntryStore::new()),
            directory.clone(),
            directory.clone(),
        );
        (engine, directory)
    }

    #[test]
    fn test_flag_disabled_allows_unknown_resources() {
        let (engine, directory) = engine(false);
        let member = directory.principal(UserId(2)).unwrap();
        let verdict = engine
            .evaluate(&member, Action::Delete, ResourceRef::project(999))
            .unwrap();
        assert_eq!(verdict, Verdict::allow(VerdictReason::FlagDisabled));
    }

    #[test]
    fn test_unknown_resource_is_an_error_not_a_deny() {
        let (engine, directory) = engine(true);
        let member = directory.principal(UserId(2)).unwrap();
        let result = engine.evaluate(&member, Action::View, ResourceRef::project(999));
        assert!(matches!(result, Err(PermissionError::ResourceNotFound(_))));
    }

    #[test]
    fn test_named_action_rejected_even_when_flag_off() {
        let (engine, directory) = engine(false);
        let member = directory.principal(UserId(2)).unwrap();
        let result = engine.evaluate_named(&member, "restart", ResourceRef::project(10));
        assert!(matches!(result, Err(PermissionError::UnsupportedAction(_))));
    }

    #[test]
    fn test_project_entry_covers_nested_resources() {
        let (engine, directory) = engine(true);
        let member = directory.principal(UserId(2)).unwrap();
        engine
            .grant_access(UserId(2), ResourceRef::project(10), "view_only")
            .unwrap();

        let verdict = engine
            .evaluate(&member, Action::View, ResourceRef::application(30))
            .unwrap();
        assert_eq!(verdict, Verdict::allow(VerdictReason::ExplicitEntry));
        assert!(
            engine
                .evaluate(&member, Action::Deploy, ResourceRef::application(30))
                .unwrap()
                .is_denied()
        );
    }

    #[test]
    fn test_most_specific_entry_wins() {
        let (engine, directory) = engine(true);
        let member = directory.principal(UserId(2)).unwrap();
        engine
            .grant_access(UserId(2), ResourceRef::project(10), "full_access")
            .unwrap();
        engine
            .grant_access(UserId(2), ResourceRef::environment(20), "view_only")
            .unwrap();

        // Environment entry narrows the project grant for everything inside it
        assert!(
            engine
                .evaluate(&member, Action::Delete, ResourceRef::application(30))
                .unwrap()
                .is_denied()
        );
        // The project itself still uses the project entry
        assert!(
            engine
                .evaluate(&member, Action::Delete, ResourceRef::project(10))
                .unwrap()
                .is_allowed()
        );
    }

    #[test]
    fn test_grant_requires_valid_level_before_anything_else() {
        let (engine, _) = engine(true);
        let result = engine.grant_access(UserId(2), ResourceRef::project(999), "superuser");
        assert!(matches!(result, Err(PermissionError::InvalidLevel(_))));
        assert!(engine.store().list_for_user(UserId(2)).unwrap().is_empty());
    }

    #[test]
    fn test_grant_on_server_rejected() {
        let (engine, _) = engine(true);
        let result = engine.grant_access(UserId(2), ResourceRef::server(1), "deploy");
        assert!(matches!(result, Err(PermissionError::NoAccessEntries(_))));
    }

    #[test]
    fn test_set_permissions_and_custom_capabilities() {
        let (engine, _) = engine(true);
        let entry = engine
            .grant_access(UserId(2), ResourceRef::project(10), "view_only")
            .unwrap();

        let updated = engine.set_permissions(entry.id, "deploy").unwrap();
        assert_eq!(updated.level(), LevelMatch::Canonical(PermissionLevel::Deploy));

        let custom = engine
            .set_capabilities(entry.id, Capabilities::new(true, false, true, false))
            .unwrap();
        assert_eq!(custom.level(), LevelMatch::Custom);

        assert!(matches!(
            engine.set_permissions(EntryId(404), "deploy"),
            Err(PermissionError::EntryNotFound(EntryId(404)))
        ));
    }

    #[test]
    fn test_eligible_members_excludes_existing_entries() {
        let (engine, _) = engine(true);
        assert_eq!(engine.eligible_members(ResourceRef::project(10)).unwrap().len(), 2);
        engine
            .grant_access(UserId(2), ResourceRef::project(10), "deploy")
            .unwrap();
        let eligible = engine.eligible_members(ResourceRef::project(10)).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].user, UserId(1));
    }

    #[test]
    fn test_verdict_display_and_serialization() {
        let verdict = Verdict::deny(VerdictReason::NoEntry);
        assert_eq!(verdict.to_string(), "deny (no-entry)");
        let json = serde_json::to_value(verdict).unwrap();
        assert_eq!(json["reason"], "no-entry");
        assert_eq!(json["allowed"], false);
    }
}
