//! Capability sets and named permission levels
//!
//! An access entry stores four independent capability bits. Three named
//! levels map to canonical sets:
//!
//! | Level         | view | deploy | manage | delete |
//! |---------------|------|--------|--------|--------|
//! | `view_only`   | ✓    |        |        |        |
//! | `deploy`      | ✓    | ✓      |        |        |
//! | `full_access` | ✓    | ✓      | ✓      | ✓      |
//!
//! Any other combination is `custom`.

use crate::error::PermissionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One atomic permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Deploy,
    Manage,
    Delete,
}

impl Capability {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Deploy => "deploy",
            Capability::Manage => "manage",
            Capability::Delete => "delete",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed four-bit capability record.
///
/// Missing fields deserialize as `false`, matching the column default of the
/// persisted entry tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub view: bool,
    pub deploy: bool,
    pub manage: bool,
    pub delete: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities::new(false, false, false, false);
    pub const VIEW_ONLY: Capabilities = Capabilities::new(true, false, false, false);
    pub const DEPLOY: Capabilities = Capabilities::new(true, true, false, false);
    pub const FULL_ACCESS: Capabilities = Capabilities::new(true, true, true, true);

    pub const fn new(view: bool, deploy: bool, manage: bool, delete: bool) -> Self {
        Self {
            view,
            deploy,
            manage,
            delete,
        }
    }

    /// Whether this set holds `capability`
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.view,
            Capability::Deploy => self.deploy,
            Capability::Manage => self.manage,
            Capability::Delete => self.delete,
        }
    }

    /// Return a copy with `capability` set to `enabled`
    pub const fn with(mut self, capability: Capability, enabled: bool) -> Self {
        match capability {
            Capability::View => self.view = enabled,
            Capability::Deploy => self.deploy = enabled,
            Capability::Manage => self.manage = enabled,
            Capability::Delete => self.delete = enabled,
        }
        self
    }

    /// Classify this set against the canonical levels
    pub fn level(&self) -> LevelMatch {
        capabilities_to_level(*self)
    }
}

/// Named shorthand for a canonical capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    ViewOnly,
    Deploy,
    FullAccess,
}

impl PermissionLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::ViewOnly => "view_only",
            PermissionLevel::Deploy => "deploy",
            PermissionLevel::FullAccess => "full_access",
        }
    }

    /// Parse a level name, failing with `InvalidLevel` for anything unknown
    pub fn try_parse(s: &str) -> Result<Self, PermissionError> {
        match s {
            "view_only" => Ok(PermissionLevel::ViewOnly),
            "deploy" => Ok(PermissionLevel::Deploy),
            "full_access" => Ok(PermissionLevel::FullAccess),
            other => Err(PermissionError::InvalidLevel(other.to_string())),
        }
    }

    /// The canonical capability set for this level
    pub const fn capabilities(&self) -> Capabilities {
        match self {
            PermissionLevel::ViewOnly => Capabilities::VIEW_ONLY,
            PermissionLevel::Deploy => Capabilities::DEPLOY,
            PermissionLevel::FullAccess => Capabilities::FULL_ACCESS,
        }
    }

    pub fn all() -> &'static [PermissionLevel] {
        &[
            PermissionLevel::ViewOnly,
            PermissionLevel::Deploy,
            PermissionLevel::FullAccess,
        ]
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionLevel::try_parse(s)
    }
}

/// Classification of a stored capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelMatch {
    /// Exactly one of the canonical sets
    Canonical(PermissionLevel),
    /// Any other combination
    Custom,
}

impl LevelMatch {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LevelMatch::Canonical(level) => level.as_str(),
            LevelMatch::Custom => "custom",
        }
    }
}

impl fmt::Display for LevelMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Convert a named level into its capability set
pub fn level_to_capabilities(level: &str) -> Result<Capabilities, PermissionError> {
    PermissionLevel::try_parse(level).map(|l| l.capabilities())
}

/// Classify a capability set. Total: non-canonical sets are `Custom`.
pub fn capabilities_to_level(caps: Capabilities) -> LevelMatch {
    PermissionLevel::all()
        .iter()
        .find(|level| level.capabilities() == caps)
        .map_or(LevelMatch::Custom, |level| LevelMatch::Canonical(*level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_roundtrip() {
        for level in PermissionLevel::all() {
            let caps = level_to_capabilities(level.as_str()).unwrap();
            assert_eq!(capabilities_to_level(caps), LevelMatch::Canonical(*level));
        }
    }

    #[test]
    fn test_canonical_sets_are_monotonic() {
        let view = Capabilities::VIEW_ONLY;
        let deploy = Capabilities::DEPLOY;
        let full = Capabilities::FULL_ACCESS;
        for cap in [
            Capability::View,
            Capability::Deploy,
            Capability::Manage,
            Capability::Delete,
        ] {
            assert!(!view.allows(cap) || deploy.allows(cap));
            assert!(!deploy.allows(cap) || full.allows(cap));
        }
    }

    #[test]
    fn test_invalid_level() {
        let err = level_to_capabilities("admin").unwrap_err();
        assert!(matches!(err, PermissionError::InvalidLevel(name) if name == "admin"));
        assert!(level_to_capabilities("").is_err());
        assert!(level_to_capabilities("Full_Access").is_err());
    }

    #[test]
    fn test_custom_classification() {
        // Delete without view has no level name
        let odd = Capabilities::new(false, false, false, true);
        assert_eq!(capabilities_to_level(odd), LevelMatch::Custom);
        assert_eq!(capabilities_to_level(Capabilities::NONE), LevelMatch::Custom);

        let manage_no_delete = Capabilities::DEPLOY.with(Capability::Manage, true);
        assert_eq!(manage_no_delete.level(), LevelMatch::Custom);
        assert_eq!(manage_no_delete.level().to_string(), "custom");
    }

    #[test]
    fn test_capabilities_missing_fields_default_false() {
        let caps: Capabilities = serde_json::from_str(r#"{"view":true}"#).unwrap();
        assert_eq!(caps, Capabilities::VIEW_ONLY);
    }

    #[test]
    fn test_deserialize_level() {
        let level: PermissionLevel = serde_json::from_str(r#""full_access""#).unwrap();
        assert_eq!(level, PermissionLevel::FullAccess);
    }
}
