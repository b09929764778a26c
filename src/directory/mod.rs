//! Principals, teams and the resource tree
//!
//! The engine only reads this data. [`PrincipalProvider`] answers who a user
//! is and who belongs to a team; [`ResourceResolver`] answers which team owns a
//! resource and where it sits in the project → environment → instance tree.
//!
//! [`Directory`] is the in-process implementation of both, loadable from TOML:
//!
//! ```toml
//! [[users]]
//! id = 1
//! name = "alice"
//! global_admin = false
//!
//! [[teams]]
//! id = 1
//! name = "Acme"
//! members = [{ user = 1, role = "owner" }]
//!
//! [[projects]]
//! id = 10
//! team = 1
//! name = "shop"
//!
//! [[environments]]
//! id = 20
//! project = 10
//! name = "production"
//!
//! [[applications]]
//! id = 30
//! environment = 20
//! name = "web"
//! ```

pub mod cleanup;

pub use cleanup::{CascadeCleanup, CleanupReport};

use crate::access_control::types::{
    AccountStatus, Principal, ResourceRef, ResourceType, TeamId, TeamMembership, TeamRole, UserId,
};
use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A member of a team as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMember {
    pub user: UserId,
    pub name: String,
    pub role: TeamRole,
}

/// A resource resolved against the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedResource {
    pub resource: ResourceRef,
    /// The team owning the resource, directly or through its project
    pub owning_team: TeamId,
    /// Enclosing environment or project, if nested
    pub parent: Option<ResourceRef>,
}

/// Supplies principals and team membership
pub trait PrincipalProvider: Send + Sync {
    fn principal(&self, user: UserId) -> Result<Principal, DirectoryError>;

    fn team_members(&self, team: TeamId) -> Result<Vec<TeamMember>, DirectoryError>;
}

/// Resolves resources to their owning team and position in the tree
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, resource: ResourceRef) -> Result<ResolvedResource, DirectoryError>;

    /// Resources of one type owned by `team`, ordered by id
    fn resources_of_team(
        &self,
        team: TeamId,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceRef>, DirectoryError>;

    /// Every resource nested below `resource`, depth-first
    fn descendants(&self, resource: ResourceRef) -> Result<Vec<ResourceRef>, DirectoryError>;
}

pub type SharedPrincipals = Arc<dyn PrincipalProvider>;
pub type SharedResolver = Arc<dyn ResourceResolver>;

// =============================================================================
// Directory file format
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub global_admin: bool,
    #[serde(default)]
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemberRecord {
    pub user: UserId,
    pub role: TeamRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: TeamId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
}

/// A resource owned directly by a team (projects, servers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamResourceRecord {
    pub id: u64,
    pub team: TeamId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: u64,
    pub project: u64,
    pub name: String,
}

/// An application, database or service inside an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: u64,
    pub environment: u64,
    pub name: String,
}

/// Serialized directory contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryFile {
    pub users: Vec<UserRecord>,
    pub teams: Vec<TeamRecord>,
    pub projects: Vec<TeamResourceRecord>,
    pub environments: Vec<EnvironmentRecord>,
    pub applications: Vec<InstanceRecord>,
    pub databases: Vec<InstanceRecord>,
    pub services: Vec<InstanceRecord>,
    pub servers: Vec<TeamResourceRecord>,
}

// =============================================================================
// In-process directory
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Team(TeamId),
    Parent(ResourceRef),
}

#[derive(Debug, Clone)]
struct ResourceNode {
    name: String,
    owner: Owner,
}

#[derive(Debug, Clone, Default)]
struct DirectoryData {
    users: BTreeMap<UserId, UserRecord>,
    teams: BTreeMap<TeamId, TeamRecord>,
    resources: BTreeMap<ResourceRef, ResourceNode>,
}

/// Longest owner chain: instance → environment → project → team
const MAX_DEPTH: usize = 4;

impl DirectoryData {
    fn resolve(&self, resource: ResourceRef) -> Result<ResolvedResource, DirectoryError> {
        let node = self
            .resources
            .get(&resource)
            .ok_or(DirectoryError::ResourceNotFound(resource))?;
        let parent = match node.owner {
            Owner::Parent(parent) => Some(parent),
            Owner::Team(_) => None,
        };

        let mut owner = node.owner;
        for _ in 0..MAX_DEPTH {
            match owner {
                Owner::Team(team) => {
                    return Ok(ResolvedResource {
                        resource,
                        owning_team: team,
                        parent,
                    });
                }
                Owner::Parent(up) => {
                    owner = self
                        .resources
                        .get(&up)
                        .ok_or(DirectoryError::ResourceNotFound(up))?
                        .owner;
                }
            }
        }
        Err(DirectoryError::ResourceNotFound(resource))
    }

    fn children(&self, resource: ResourceRef) -> Vec<ResourceRef> {
        self.resources
            .iter()
            .filter(|(_, node)| node.owner == Owner::Parent(resource))
            .map(|(child, _)| *child)
            .collect()
    }

    fn descendants(&self, resource: ResourceRef) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        let mut pending = self.children(resource);
        pending.reverse();
        while let Some(next) = pending.pop() {
            found.push(next);
            let mut children = self.children(next);
            children.reverse();
            pending.extend(children);
        }
        found
    }

    fn principal(&self, user: UserId) -> Result<Principal, DirectoryError> {
        let record = self
            .users
            .get(&user)
            .ok_or(DirectoryError::UserNotFound(user))?;
        let memberships = self
            .teams
            .values()
            .filter_map(|team| {
                team.members
                    .iter()
                    .find(|m| m.user == user)
                    .map(|m| TeamMembership {
                        team: team.id,
                        role: m.role,
                    })
            })
            .collect();
        Ok(Principal {
            id: record.id,
            name: record.name.clone(),
            is_global_admin: record.global_admin,
            status: record.status,
            memberships,
        })
    }

    fn insert_resource(
        &mut self,
        resource: ResourceRef,
        name: String,
        owner: Owner,
    ) -> Result<(), DirectoryError> {
        if self
            .resources
            .insert(resource, ResourceNode { name, owner })
            .is_some()
        {
            return Err(DirectoryError::Load(format!("duplicate {resource}")));
        }
        Ok(())
    }
}

/// In-memory principal provider and resource resolver
#[derive(Debug, Default)]
pub struct Directory {
    data: RwLock<DirectoryData>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from its serialized form, checking references
    pub fn from_file(file: DirectoryFile) -> Result<Self, DirectoryError> {
        let mut data = DirectoryData::default();

        for user in file.users {
            let id = user.id;
            if data.users.insert(id, user).is_some() {
                return Err(DirectoryError::Load(format!("duplicate user {id}")));
            }
        }
        for team in file.teams {
            for member in &team.members {
                if !data.users.contains_key(&member.user) {
                    return Err(DirectoryError::Load(format!(
                        "team {} lists unknown user {}",
                        team.id, member.user
                    )));
                }
            }
            let id = team.id;
            if data.teams.insert(id, team).is_some() {
                return Err(DirectoryError::Load(format!("duplicate team {id}")));
            }
        }

        let team_owned = [
            (ResourceType::Project, file.projects),
            (ResourceType::Server, file.servers),
        ];
        for (resource_type, records) in team_owned {
            for record in records {
                if !data.teams.contains_key(&record.team) {
                    return Err(DirectoryError::Load(format!(
                        "{} {} references unknown team {}",
                        resource_type, record.id, record.team
                    )));
                }
                data.insert_resource(
                    ResourceRef::new(resource_type, record.id),
                    record.name,
                    Owner::Team(record.team),
                )?;
            }
        }

        for record in file.environments {
            let parent = ResourceRef::project(record.project);
            Self::check_parent(&data, ResourceRef::environment(record.id), parent)?;
            data.insert_resource(
                ResourceRef::environment(record.id),
                record.name,
                Owner::Parent(parent),
            )?;
        }

        let instances = [
            (ResourceType::Application, file.applications),
            (ResourceType::Database, file.databases),
            (ResourceType::Service, file.services),
        ];
        for (resource_type, records) in instances {
            for record in records {
                let resource = ResourceRef::new(resource_type, record.id);
                let parent = ResourceRef::environment(record.environment);
                Self::check_parent(&data, resource, parent)?;
                data.insert_resource(resource, record.name, Owner::Parent(parent))?;
            }
        }

        debug!(
            users = data.users.len(),
            teams = data.teams.len(),
            resources = data.resources.len(),
            "Loaded directory"
        );
        Ok(Self {
            data: RwLock::new(data),
        })
    }

    fn check_parent(
        data: &DirectoryData,
        resource: ResourceRef,
        parent: ResourceRef,
    ) -> Result<(), DirectoryError> {
        if data.resources.contains_key(&parent) {
            Ok(())
        } else {
            Err(DirectoryError::Load(format!(
                "{} references unknown {}",
                resource, parent
            )))
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, DirectoryError> {
        let file: DirectoryFile =
            toml::from_str(raw).map_err(|e| DirectoryError::Load(e.to_string()))?;
        Self::from_file(file)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Serialize back to the file format
    pub fn to_file(&self) -> DirectoryFile {
        let data = self.read();
        let mut file = DirectoryFile {
            users: data.users.values().cloned().collect(),
            teams: data.teams.values().cloned().collect(),
            ..DirectoryFile::default()
        };
        for (resource, node) in &data.resources {
            let id = resource.id.0;
            let name = node.name.clone();
            match (resource.resource_type, node.owner) {
                (ResourceType::Project, Owner::Team(team)) => {
                    file.projects.push(TeamResourceRecord { id, team, name })
                }
                (ResourceType::Server, Owner::Team(team)) => {
                    file.servers.push(TeamResourceRecord { id, team, name })
                }
                (ResourceType::Environment, Owner::Parent(parent)) => {
                    file.environments.push(EnvironmentRecord {
                        id,
                        project: parent.id.0,
                        name,
                    })
                }
                (resource_type, Owner::Parent(parent)) => {
                    let record = InstanceRecord {
                        id,
                        environment: parent.id.0,
                        name,
                    };
                    match resource_type {
                        ResourceType::Application => file.applications.push(record),
                        ResourceType::Database => file.databases.push(record),
                        ResourceType::Service => file.services.push(record),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        file
    }

    /// Write the directory back as TOML, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<(), DirectoryError> {
        let failed = |e: &dyn std::fmt::Display| {
            DirectoryError::Write(format!("{}: {}", path.display(), e))
        };
        let raw = toml::to_string_pretty(&self.to_file()).map_err(|e| failed(&e))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| failed(&e))?;
        file.write_all(raw.as_bytes()).map_err(|e| failed(&e))?;
        file.persist(path).map_err(|e| failed(&e.error))?;
        debug!(path = %path.display(), "Saved directory");
        Ok(())
    }

    // The directory is plain data; a panicked writer cannot leave it half-updated
    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn data_mut(&mut self) -> &mut DirectoryData {
        self.data.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Builder-style construction
    // -------------------------------------------------------------------------

    pub fn with_user(mut self, id: u64, name: &str) -> Self {
        self.data_mut().users.insert(
            UserId(id),
            UserRecord {
                id: UserId(id),
                name: name.to_string(),
                global_admin: false,
                status: AccountStatus::Active,
            },
        );
        self
    }

    pub fn with_global_admin(mut self, id: u64, name: &str) -> Self {
        self.data_mut().users.insert(
            UserId(id),
            UserRecord {
                id: UserId(id),
                name: name.to_string(),
                global_admin: true,
                status: AccountStatus::Active,
            },
        );
        self
    }

    pub fn with_team(mut self, id: u64, name: &str) -> Self {
        self.data_mut().teams.insert(
            TeamId(id),
            TeamRecord {
                id: TeamId(id),
                name: name.to_string(),
                members: Vec::new(),
            },
        );
        self
    }

    /// Add `user` to `team`, replacing any previous role
    pub fn with_member(mut self, team: u64, user: u64, role: TeamRole) -> Self {
        if let Some(record) = self.data_mut().teams.get_mut(&TeamId(team)) {
            record.members.retain(|m| m.user != UserId(user));
            record.members.push(MemberRecord {
                user: UserId(user),
                role,
            });
        }
        self
    }

    pub fn with_project(mut self, id: u64, team: u64, name: &str) -> Self {
        self.data_mut().insert_resource(
            ResourceRef::project(id),
            name.to_string(),
            Owner::Team(TeamId(team)),
        );
        self
    }

    pub fn with_server(mut self, id: u64, team: u64, name: &str) -> Self {
        self.data_mut().insert_resource(
            ResourceRef::server(id),
            name.to_string(),
            Owner::Team(TeamId(team)),
        );
        self
    }

    pub fn with_environment(mut self, id: u64, project: u64, name: &str) -> Self {
        self.data_mut().insert_resource(
            ResourceRef::environment(id),
            name.to_string(),
            Owner::Parent(ResourceRef::project(project)),
        );
        self
    }

    /// Add an application, database or service under `environment`
    pub fn with_instance(mut self, resource: ResourceRef, environment: u64, name: &str) -> Self {
        self.data_mut().insert_resource(
            resource,
            name.to_string(),
            Owner::Parent(ResourceRef::environment(environment)),
        );
        self
    }

    // -------------------------------------------------------------------------
    // Mutation (used by deletion workflows)
    // -------------------------------------------------------------------------

    /// Remove a resource and everything nested below it. Returns what was removed.
    pub fn remove_resource(
        &self,
        resource: ResourceRef,
    ) -> Result<Vec<ResourceRef>, DirectoryError> {
        let mut data = self.write();
        if !data.resources.contains_key(&resource) {
            return Err(DirectoryError::ResourceNotFound(resource));
        }
        let mut removed = vec![resource];
        removed.extend(data.descendants(resource));
        for r in &removed {
            data.resources.remove(r);
        }
        info!(resource = %resource, removed = removed.len(), "Removed resource from directory");
        Ok(removed)
    }

    /// Remove a user and all of their team memberships
    pub fn remove_user(&self, user: UserId) -> Result<(), DirectoryError> {
        let mut data = self.write();
        data.users
            .remove(&user)
            .ok_or(DirectoryError::UserNotFound(user))?;
        for team in data.teams.values_mut() {
            team.members.retain(|m| m.user != user);
        }
        info!(user = %user, "Removed user from directory");
        Ok(())
    }
}

impl PrincipalProvider for Directory {
    fn principal(&self, user: UserId) -> Result<Principal, DirectoryError> {
        self.read().principal(user)
    }

    fn team_members(&self, team: TeamId) -> Result<Vec<TeamMember>, DirectoryError> {
        let data = self.read();
        let record = data
            .teams
            .get(&team)
            .ok_or(DirectoryError::TeamNotFound(team))?;
        Ok(record
            .members
            .iter()
            .map(|m| TeamMember {
                user: m.user,
                name: data
                    .users
                    .get(&m.user)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                role: m.role,
            })
            .collect())
    }
}

impl ResourceResolver for Directory {
    fn resolve(&self, resource: ResourceRef) -> Result<ResolvedResource, DirectoryError> {
        self.read().resolve(resource)
    }

    fn resources_of_team(
        &self,
        team: TeamId,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceRef>, DirectoryError> {
        let data = self.read();
        if !data.teams.contains_key(&team) {
            return Err(DirectoryError::TeamNotFound(team));
        }
        Ok(data
            .resources
            .keys()
            .filter(|r| r.resource_type == resource_type)
            .filter(|r| data.resolve(**r).is_ok_and(|res| res.owning_team == team))
            .copied()
            .collect())
    }

    fn descendants(&self, resource: ResourceRef) -> Result<Vec<ResourceRef>, DirectoryError> {
        let data = self.read();
        if !data.resources.contains_key(&resource) {
            return Err(DirectoryError::ResourceNotFound(resource));
        }
        Ok(data.descendants(resource))
    }
}
