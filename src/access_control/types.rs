//! Access control types
//!
//! Identifiers, resource tags, actions and principals shared by the engine,
//! the entry store and the policy gateways.

use crate::access_control::capabilities::Capability;
use crate::error::PermissionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// User (principal) identifier
    UserId
);
id_type!(
    /// Team identifier
    TeamId
);
id_type!(
    /// Identifier of a protected resource, unique within its resource type
    ResourceId
);
id_type!(
    /// Access entry identifier, unique across all entry tables
    EntryId
);

/// The team whose owners and admins are instance administrators
pub const ROOT_TEAM_ID: TeamId = TeamId(0);

/// Kind of protected resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Project,
    Environment,
    Application,
    Database,
    Service,
    Server,
}

impl ResourceType {
    /// Get the resource type name as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Project => "project",
            ResourceType::Environment => "environment",
            ResourceType::Application => "application",
            ResourceType::Database => "database",
            ResourceType::Service => "service",
            ResourceType::Server => "server",
        }
    }

    /// Try to parse a resource type from a string
    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(ResourceType::Project),
            "environment" => Some(ResourceType::Environment),
            "application" => Some(ResourceType::Application),
            "database" => Some(ResourceType::Database),
            "service" => Some(ResourceType::Service),
            "server" => Some(ResourceType::Server),
            _ => None,
        }
    }

    /// Get all resource types
    pub fn all() -> &'static [ResourceType] {
        &[
            ResourceType::Project,
            ResourceType::Environment,
            ResourceType::Application,
            ResourceType::Database,
            ResourceType::Service,
            ResourceType::Server,
        ]
    }

    /// Whether this resource type has a per-user access entry table.
    ///
    /// Servers are team-scoped and all-or-nothing.
    pub const fn has_access_entries(&self) -> bool {
        !matches!(self, ResourceType::Server)
    }

    /// Whether `deploy` is meaningful for this resource type
    pub const fn is_deployable(&self) -> bool {
        matches!(
            self,
            ResourceType::Application | ResourceType::Database | ResourceType::Service
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to one specific resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: ResourceType,
    pub id: ResourceId,
}

impl ResourceRef {
    pub fn new(resource_type: ResourceType, id: impl Into<ResourceId>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }

    pub fn project(id: u64) -> Self {
        Self::new(ResourceType::Project, id)
    }

    pub fn environment(id: u64) -> Self {
        Self::new(ResourceType::Environment, id)
    }

    pub fn application(id: u64) -> Self {
        Self::new(ResourceType::Application, id)
    }

    pub fn database(id: u64) -> Self {
        Self::new(ResourceType::Database, id)
    }

    pub fn service(id: u64) -> Self {
        Self::new(ResourceType::Service, id)
    }

    pub fn server(id: u64) -> Self {
        Self::new(ResourceType::Server, id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// Parses the `type:id` form, e.g. `project:42`
impl FromStr for ResourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected TYPE:ID, got '{}'", s))?;
        let resource_type = ResourceType::try_parse(kind.trim())
            .ok_or_else(|| format!("unknown resource type '{}'", kind))?;
        let id = id
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid resource id '{}': {}", id, e))?;
        Ok(Self::new(resource_type, id))
    }
}

/// An operation on a specific resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Deploy,
    Update,
    Delete,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Deploy => "deploy",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Parse an action name, refusing anything outside the fixed set
    pub fn try_parse(s: &str) -> Result<Self, PermissionError> {
        match s {
            "view" => Ok(Action::View),
            "deploy" => Ok(Action::Deploy),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(PermissionError::UnsupportedAction(other.to_string())),
        }
    }

    /// The capability an access entry must hold for this action
    pub const fn required_capability(&self) -> Capability {
        match self {
            Action::View => Capability::View,
            Action::Deploy => Capability::Deploy,
            Action::Update => Capability::Manage,
            Action::Delete => Capability::Delete,
        }
    }

    pub fn all() -> &'static [Action] {
        &[Action::View, Action::Deploy, Action::Update, Action::Delete]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::try_parse(s)
    }
}

/// Role held by a user within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl TeamRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TeamRole::Owner => "owner",
            TeamRole::Admin => "admin",
            TeamRole::Member => "member",
            TeamRole::Viewer => "viewer",
        }
    }

    /// Owners and admins have implicit full access to every team resource
    pub const fn bypasses_access_control(&self) -> bool {
        matches!(self, TeamRole::Owner | TeamRole::Admin)
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account status. Read by callers; the engine does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
}

/// Membership of a principal in a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    pub team: TeamId,
    pub role: TeamRole,
}

/// The acting user whose access is being decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub is_global_admin: bool,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub memberships: Vec<TeamMembership>,
}

impl Principal {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_global_admin: false,
            status: AccountStatus::Active,
            memberships: Vec::new(),
        }
    }

    /// Builder-style: add a team membership
    pub fn with_membership(mut self, team: impl Into<TeamId>, role: TeamRole) -> Self {
        self.memberships.push(TeamMembership {
            team: team.into(),
            role,
        });
        self
    }

    /// Builder-style: mark as global admin
    pub fn with_global_admin(mut self, is_global_admin: bool) -> Self {
        self.is_global_admin = is_global_admin;
        self
    }

    /// Role held on `team`, if a member
    pub fn role_in(&self, team: TeamId) -> Option<TeamRole> {
        self.memberships
            .iter()
            .find(|m| m.team == team)
            .map(|m| m.role)
    }

    /// Owners and admins of the root team administer the whole instance
    pub fn is_instance_admin(&self) -> bool {
        self.role_in(ROOT_TEAM_ID)
            .is_some_and(|role| role.bypasses_access_control())
    }
}
