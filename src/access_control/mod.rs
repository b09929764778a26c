//! Access control module
//!
//! Decides whether a principal may act on a protected resource.
//!
//! ## Decision Model
//!
//! Evaluation runs these steps in order and stops at the first that decides:
//!
//! 1. **Feature flag** - granular access control is opt-in; while off, everything is allowed
//! 2. **Instance override** - global admins and root team owners/admins are allowed
//! 3. **Role bypass** - owners and admins of the owning team are allowed
//! 4. **Access entry** - the most specific entry (resource, environment, project)
//!    must hold the capability the action maps to; no entry means deny
//!
//! Servers have no access entries and stop after step 3.
//!
//! ## Capabilities and Levels
//!
//! | Level         | view | deploy | manage | delete |
//! |---------------|------|--------|--------|--------|
//! | `view_only`   | ✓    |        |        |        |
//! | `deploy`      | ✓    | ✓      |        |        |
//! | `full_access` | ✓    | ✓      | ✓      | ✓      |
//!
//! Any other combination is reported as `custom`.

pub mod capabilities;
pub mod engine;
pub mod flag;
pub mod gateway;
pub mod manage;
pub mod types;

pub use capabilities::{
    Capabilities, Capability, LevelMatch, PermissionLevel, capabilities_to_level,
    level_to_capabilities,
};
pub use engine::{BulkGrantReport, PermissionEngine, Verdict, VerdictReason};
pub use flag::{CachedFlag, EnvFlag, FlagSource, SharedFlag, StaticFlag, ToggleFlag};
pub use gateway::{Gateways, PolicyGateway};
pub use manage::AccessManager;
pub use types::{
    AccountStatus, Action, EntryId, Principal, ROOT_TEAM_ID, ResourceId, ResourceRef,
    ResourceType, TeamId, TeamMembership, TeamRole, UserId,
};
