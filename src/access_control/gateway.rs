//! Policy gateways
//!
//! One gateway per protected resource type, all sharing this implementation.
//! A gateway translates the UI-level question ("can this user delete that
//! database?") into an engine evaluation for its resource type.
//!
//! Listing and creation are not gated: `can_view_any` and `can_create` always
//! allow. Every other check returns the engine's verdict unchanged.

use crate::access_control::engine::{PermissionEngine, Verdict, VerdictReason};
use crate::access_control::types::{Action, Principal, ResourceId, ResourceRef, ResourceType};
use crate::error::{PermissionError, PermissionResult};
use std::sync::Arc;
use tracing::trace;

/// Access checks for one resource type
#[derive(Clone)]
pub struct PolicyGateway {
    engine: Arc<PermissionEngine>,
    resource_type: ResourceType,
}

impl PolicyGateway {
    pub fn new(engine: Arc<PermissionEngine>, resource_type: ResourceType) -> Self {
        Self {
            engine,
            resource_type,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    fn resource(&self, id: impl Into<ResourceId>) -> ResourceRef {
        ResourceRef::new(self.resource_type, id)
    }

    /// Evaluate `action` on the instance `id` of this gateway's type
    pub fn check(
        &self,
        principal: &Principal,
        action: Action,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        if action == Action::Deploy && !self.resource_type.is_deployable() {
            return Err(PermissionError::UnsupportedAction(format!(
                "deploy on {}",
                self.resource_type
            )));
        }
        self.engine.evaluate(principal, action, self.resource(id))
    }

    /// Listing instances of this type
    pub fn can_view_any(&self, principal: &Principal) -> Verdict {
        trace!(user = %principal.id, resource_type = %self.resource_type, "Listing is ungated");
        Verdict::allow(VerdictReason::Ungated)
    }

    /// Creating a new instance of this type
    pub fn can_create(&self, principal: &Principal) -> Verdict {
        trace!(user = %principal.id, resource_type = %self.resource_type, "Creation is ungated");
        Verdict::allow(VerdictReason::Ungated)
    }

    pub fn can_view(
        &self,
        principal: &Principal,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        self.check(principal, Action::View, id)
    }

    pub fn can_update(
        &self,
        principal: &Principal,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        self.check(principal, Action::Update, id)
    }

    pub fn can_delete(
        &self,
        principal: &Principal,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        self.check(principal, Action::Delete, id)
    }

    /// Only applications, databases and services are deployable
    pub fn can_deploy(
        &self,
        principal: &Principal,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        self.check(principal, Action::Deploy, id)
    }

    /// Managing the access entries of an instance requires `update` on it
    pub fn can_manage_access(
        &self,
        principal: &Principal,
        id: impl Into<ResourceId>,
    ) -> PermissionResult<Verdict> {
        self.check(principal, Action::Update, id)
    }
}

impl PermissionEngine {
    /// Gateway for one resource type backed by this engine
    pub fn gateway(self: &Arc<Self>, resource_type: ResourceType) -> PolicyGateway {
        PolicyGateway::new(Arc::clone(self), resource_type)
    }
}

/// All gateways backed by one engine
#[derive(Clone)]
pub struct Gateways {
    pub projects: PolicyGateway,
    pub environments: PolicyGateway,
    pub applications: PolicyGateway,
    pub databases: PolicyGateway,
    pub services: PolicyGateway,
    pub servers: PolicyGateway,
}

impl Gateways {
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        Self {
            projects: engine.gateway(ResourceType::Project),
            environments: engine.gateway(ResourceType::Environment),
            applications: engine.gateway(ResourceType::Application),
            databases: engine.gateway(ResourceType::Database),
            services: engine.gateway(ResourceType::Service),
            servers: engine.gateway(ResourceType::Server),
        }
    }

    pub fn for_type(&self, resource_type: ResourceType) -> &PolicyGateway {
        match resource_type {
            ResourceType::Project => &self.projects,
            ResourceType::Environment => &self.environments,
            ResourceType::Application => &self.applications,
            ResourceType::Database => &self.databases,
            ResourceType::Service => &self.services,
            ResourceType::Server => &self.servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::flag::StaticFlag;
    use crate::access_control::types::{TeamRole, UserId};
    use crate::directory::{Directory, PrincipalProvider};
    use crate::store::MemoryEntryStore;

    fn gateways() -> (Gateways, Arc<Directory>) {
        let directory = Arc::new(
            Directory::new()
                .with_team(1, "Acme")
                .with_user(2, "viewer")
                .with_member(1, 2, TeamRole::Viewer)
                .with_project(10, 1, "shop")
                .with_server(40, 1, "box"),
        );
        let engine = Arc::new(PermissionEngine::new(
            Arc::new(StaticFlag(true)),
            Arc::new(MemoryEntryStore::new()),
            directory.clone(),
            directory.clone(),
        ));
        (Gateways::new(engine), directory)
    }

    #[test]
    fn test_listing_and_creation_are_ungated() {
        let (gateways, directory) = gateways();
        let viewer = directory.principal(UserId(2)).unwrap();
        for resource_type in ResourceType::all() {
            let gateway = gateways.for_type(*resource_type);
            assert!(gateway.can_view_any(&viewer).is_allowed());
            assert!(gateway.can_create(&viewer).is_allowed());
        }
    }

    #[test]
    fn test_deploy_on_project_is_unsupported() {
        let (gateways, directory) = gateways();
        let viewer = directory.principal(UserId(2)).unwrap();
        assert!(matches!(
            gateways.projects.can_deploy(&viewer, ResourceId(10)),
            Err(PermissionError::UnsupportedAction(_))
        ));
    }

    #[test]
    fn test_gateway_checks_its_own_type() {
        let (gateways, directory) = gateways();
        let viewer = directory.principal(UserId(2)).unwrap();
        // Project 10 exists, environment 10 does not
        assert!(gateways.projects.can_view(&viewer, ResourceId(10)).is_ok());
        assert!(matches!(
            gateways.environments.can_view(&viewer, ResourceId(10)),
            Err(PermissionError::ResourceNotFound(_))
        ));
        assert_eq!(
            gateways.servers.can_view(&viewer, ResourceId(40)).unwrap(),
            Verdict::deny(VerdictReason::NoEntry)
        );
    }
}
