//! Granular access control feature flag
//!
//! The engine reads the flag once per evaluation through a [`FlagSource`]
//! injected at construction. When the flag is off the engine allows
//! everything, which keeps installations that never opted in unchanged.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Supplies the current value of the granular access control flag
pub trait FlagSource: Send + Sync {
    /// Read the flag. One call is one atomic read.
    fn is_enabled(&self) -> bool;
}

/// Shared handle to a flag source
pub type SharedFlag = Arc<dyn FlagSource>;

/// A flag fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct StaticFlag(pub bool);

impl FlagSource for StaticFlag {
    fn is_enabled(&self) -> bool {
        self.0
    }
}

/// A flag that can be flipped at runtime
#[derive(Debug, Default)]
pub struct ToggleFlag(AtomicBool);

impl ToggleFlag {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

impl FlagSource for ToggleFlag {
    fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reads the flag from an environment variable on every call.
///
/// Accepts `1`, `true`, `yes`, `on` (case-insensitive) as enabled and
/// `0`, `false`, `no`, `off` as disabled. Unset or unparseable values fall
/// back to the configured default.
#[derive(Debug, Clone)]
pub struct EnvFlag {
    var: String,
    default: bool,
}

impl EnvFlag {
    pub fn new(var: impl Into<String>, default: bool) -> Self {
        Self {
            var: var.into(),
            default,
        }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl FlagSource for EnvFlag {
    fn is_enabled(&self) -> bool {
        match std::env::var(&self.var) {
            Ok(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!(var = %self.var, value = %raw, "Unrecognized flag value, using default");
                self.default
            }),
            Err(_) => self.default,
        }
    }
}

/// Parse a boolean flag value
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Caches another source's value for a bounded interval
pub struct CachedFlag<S> {
    inner: S,
    ttl: Duration,
    cached: Mutex<Option<(bool, Instant)>>,
}

impl<S: FlagSource> CachedFlag<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached value so the next read hits the inner source
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }
}

impl<S: FlagSource> FlagSource for CachedFlag<S> {
    fn is_enabled(&self) -> bool {
        // A poisoned cache only costs us the cache
        let Ok(mut cached) = self.cached.lock() else {
            return self.inner.is_enabled();
        };

        if let Some((value, read_at)) = *cached
            && read_at.elapsed() < self.ttl
        {
            return value;
        }

        let value = self.inner.is_enabled();
        trace!(enabled = value, "Refreshed granular permissions flag");
        *cached = Some((value, Instant::now()));
        value
    }
}

impl<S> fmt::Debug for CachedFlag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFlag").field("ttl", &self.ttl).finish()
    }
}

/// Build the flag source used in production: the environment variable
/// `var` with `default` as fallback, cached for `cache_secs` (0 disables caching)
pub fn flag_from_env(var: &str, default: bool, cache_secs: u64) -> SharedFlag {
    let env = EnvFlag::new(var, default);
    if cache_secs == 0 {
        Arc::new(env)
    } else {
        Arc::new(CachedFlag::new(env, Duration::from_secs(cache_secs)))
    }
}
