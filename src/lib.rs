//! Access Warden
//!
//! Granular, per-resource access control for team-owned projects,
//! environments, applications, databases, services and servers.
//!
//! ## Features
//!
//! - **Opt-in rollout** behind a feature flag; while off, every check is allowed
//! - **Instance and team overrides** for global admins and team owners/admins
//! - **Per-user access entries** with `view_only`, `deploy`, `full_access` or custom capabilities
//! - **Policy gateways** for every resource type, plus an authorizing management layer
//! - **Flexible configuration** via TOML files and environment variables
//!
//! ## Example
//!
//! ```no_run
//! use access_warden::access_control::{Action, PermissionEngine, ResourceRef, StaticFlag, UserId};
//! use access_warden::directory::{Directory, PrincipalProvider};
//! use access_warden::store::MemoryEntryStore;
//! use std::sync::Arc;
//!
//! let directory = Arc::new(Directory::load("directory.toml".as_ref())?);
//! let engine = PermissionEngine::new(
//!     Arc::new(StaticFlag(true)),
//!     Arc::new(MemoryEntryStore::new()),
//!     directory.clone(),
//!     directory.clone(),
//! );
//!
//! let alice = directory.principal(UserId(1))?;
//! let verdict = engine.evaluate(&alice, Action::Deploy, ResourceRef::application(30))?;
//! println!("{verdict}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod access_control;
pub mod config;
pub mod directory;
pub mod error;
pub mod store;

// Re-export main types
pub use access_control::{AccessManager, PermissionEngine, PolicyGateway, Verdict};
pub use config::{AppConfig, load_config};
pub use error::{AppError, Result};
