//! Error types for access-warden
//!
//! This module defines the error hierarchy used throughout the crate.
//! A `Deny` verdict is not an error: everything here is an operational
//! failure that callers must handle separately from authorization denials.

use crate::access_control::types::{Action, EntryId, ResourceRef, ResourceType, TeamId, UserId};
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Access denied: {0}")]
    AccessDenied(#[from] AccessDeniedError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the permission engine and level mapper
#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("Invalid permission level '{0}' (expected view_only, deploy or full_access)")]
    InvalidLevel(String),

    #[error("Unsupported action '{0}' (expected view, deploy, update or delete)")]
    UnsupportedAction(String),

    #[error("User {user} is not a member of team {team}")]
    NotATeamMember { user: UserId, team: TeamId },

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceRef),

    #[error("Access entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Team not found: {0}")]
    TeamNotFound(TeamId),

    #[error("Resources of type '{0}' have no per-user access entries")]
    NoAccessEntries(ResourceType),

    #[error(
        "Bulk operation stopped at user {failed} after {} succeeded: {reason}",
        .succeeded.len()
    )]
    PartialBulkFailure {
        succeeded: Vec<UserId>,
        failed: UserId,
        reason: String,
    },

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PermissionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::EntryNotFound(id) => PermissionError::EntryNotFound(id),
            other => PermissionError::Store(other),
        }
    }
}

impl From<DirectoryError> for PermissionError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::UserNotFound(user) => PermissionError::UserNotFound(user),
            DirectoryError::TeamNotFound(team) => PermissionError::TeamNotFound(team),
            DirectoryError::ResourceNotFound(resource) => {
                PermissionError::ResourceNotFound(resource)
            }
            DirectoryError::Load(message) | DirectoryError::Write(message) => {
                PermissionError::DirectoryUnavailable(message)
            }
        }
    }
}

/// Access entry storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entry store lock poisoned: {context}")]
    LockPoisoned { context: String },

    #[error("Access entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist entries: {0}")]
    Persist(String),
}

/// Principal provider / resource resolver errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Team not found: {0}")]
    TeamNotFound(TeamId),

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceRef),

    #[error("Failed to load directory: {0}")]
    Load(String),

    #[error("Failed to save directory: {0}")]
    Write(String),
}

/// Raised by callers that turn a `Deny` verdict into a failure response
#[derive(Error, Debug)]
#[error("Access denied for '{action}' on {resource}: {reason}")]
pub struct AccessDeniedError {
    pub action: String,
    pub resource: ResourceRef,
    pub reason: String,
}

impl AccessDeniedError {
    pub fn new(action: Action, resource: ResourceRef, reason: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            resource,
            reason: reason.into(),
        }
    }

    /// The principal may not manage access entries of this resource
    pub fn manage_access(resource: ResourceRef) -> Self {
        Self {
            action: "manage_access".into(),
            resource,
            reason: "managing access requires update permission on the resource".into(),
        }
    }

    /// The change would remove the acting principal's own ability to manage access
    pub fn self_lockout(resource: ResourceRef) -> Self {
        Self {
            action: "manage_access".into(),
            resource,
            reason: "cannot remove your own access management permission".into(),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for engine operations
pub type PermissionResult<T> = std::result::Result<T, PermissionError>;

/// Result type alias for entry store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
